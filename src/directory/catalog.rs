//! Track catalog used to pad blended playlists with mood-matched filler

use crate::error::{BridgeError, Result};
use crate::mood::{normalize_mood, NEUTRAL_MOOD};
use crate::types::Track;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// Source of tracks that fit a mood
#[async_trait]
pub trait CatalogMatcher: Send + Sync {
    /// Up to `limit` tracks matching the mood label, best first
    async fn matching_tracks(&self, mood_label: &str, limit: usize) -> Result<Vec<Track>>;
}

/// Catalog keyed by canonical mood, falling back to neutral tracks
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    tracks: RwLock<HashMap<String, Vec<Track>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add tracks under a mood name, synonym or emoji
    pub fn add_tracks(&self, mood: &str, tracks: Vec<Track>) -> Result<()> {
        let mut catalog = self
            .tracks
            .write()
            .map_err(|_| BridgeError::internal("Failed to acquire catalog write lock"))?;

        catalog
            .entry(normalize_mood(mood).to_string())
            .or_default()
            .extend(tracks);
        Ok(())
    }

    /// Builder-style variant of [`InMemoryCatalog::add_tracks`]
    pub fn with_tracks(self, mood: &str, tracks: Vec<Track>) -> Self {
        // A fresh catalog lock cannot be poisoned
        let _ = self.add_tracks(mood, tracks);
        self
    }
}

#[async_trait]
impl CatalogMatcher for InMemoryCatalog {
    async fn matching_tracks(&self, mood_label: &str, limit: usize) -> Result<Vec<Track>> {
        let catalog = self
            .tracks
            .read()
            .map_err(|_| BridgeError::internal("Failed to acquire catalog read lock"))?;

        let key = normalize_mood(mood_label);
        let tracks = catalog
            .get(key)
            .filter(|tracks| !tracks.is_empty())
            .or_else(|| catalog.get(NEUTRAL_MOOD))
            .map(|tracks| tracks.iter().take(limit).cloned().collect())
            .unwrap_or_default();

        Ok(tracks)
    }
}
