//! Matching engine: anonymous discovery and the connection request protocol
//!
//! Profiles and their anonymous ids share one lock. Requests live in a second
//! table; when both are needed the profile directory is locked first.

use crate::amqp::messages::events;
use crate::amqp::publisher::{publish_or_warn, EventBroadcaster};
use crate::config::{MatchingConfig, MAX_REQUEST_MESSAGE_CHARS, REQUEST_TTL};
use crate::error::{BridgeError, Result};
use crate::matching::profile::{
    MatchAction, MatchCandidate, MatchHistoryEntry, MatchingOptions, MatchingProfile,
    ProfileDirectory,
};
use crate::matching::request::{ConnectionRequest, RequestStatus, ResponseDecision};
use crate::matching::similarity::{
    compatibility_score, cosine_similarity, languages_compatible, ranking_score,
};
use crate::metrics::MetricsCollector;
use crate::mood::FusedMood;
use crate::session::{ConnectOptions, SessionConnector};
use crate::types::{
    ConnectionRequestReceived, ConnectionRequestResolved, ConnectionRequestSent, MatchFound,
    MoodUpdatedForMatching, RequestId, RoomId,
};
use crate::utils::{chrono_duration, generate_anonymous_id, generate_request_id, Clock, SystemClock};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Message sent to the requester when nobody answered in time
const EXPIRED_MESSAGE: &str = "Request expired";

/// Statistics about matching engine operations
#[derive(Debug, Clone, Default, Serialize)]
pub struct MatchingStats {
    pub searches: u64,
    pub requests_sent: u64,
    pub requests_accepted: u64,
    pub requests_rejected: u64,
    pub requests_expired: u64,
    pub high_quality_matches: u64,
    pub profiles_evicted: u64,
    pub registered_profiles: usize,
    pub pending_requests: usize,
}

/// Opt-in discovery of rooms with similar moods
#[derive(Clone)]
pub struct MatchingEngine {
    config: MatchingConfig,
    profiles: Arc<RwLock<ProfileDirectory>>,
    requests: Arc<RwLock<HashMap<RequestId, ConnectionRequest>>>,
    expiry_timers: Arc<Mutex<HashMap<RequestId, JoinHandle<()>>>>,
    broadcaster: Arc<dyn EventBroadcaster>,
    connector: Arc<dyn SessionConnector>,
    clock: Arc<dyn Clock>,
    stats: Arc<RwLock<MatchingStats>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl MatchingEngine {
    pub fn new(
        config: MatchingConfig,
        broadcaster: Arc<dyn EventBroadcaster>,
        connector: Arc<dyn SessionConnector>,
    ) -> Self {
        Self {
            config,
            profiles: Arc::new(RwLock::new(ProfileDirectory::new())),
            requests: Arc::new(RwLock::new(HashMap::new())),
            expiry_timers: Arc::new(Mutex::new(HashMap::new())),
            broadcaster,
            connector,
            clock: Arc::new(SystemClock),
            stats: Arc::new(RwLock::new(MatchingStats::default())),
            metrics: None,
        }
    }

    /// Use a different wall clock for expiry and retention decisions
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Create or replace a room's profile and return its anonymous id.
    ///
    /// Re-registering keeps the anonymous id and match history.
    pub fn register(
        &self,
        room_id: &str,
        mood: Option<&FusedMood>,
        participant_count: usize,
        options: MatchingOptions,
    ) -> Result<String> {
        if room_id.trim().is_empty() {
            return Err(BridgeError::validation("Room id must not be empty").into());
        }
        options.validate()?;
        let mood = mood.ok_or_else(|| BridgeError::NoMoodData {
            room_id: room_id.to_string(),
        })?;

        let now = self.clock.now();
        let (anonymous_id, registered) = {
            let mut directory = self
                .profiles
                .write()
                .map_err(|_| BridgeError::internal("Failed to acquire profiles write lock"))?;

            let previous = directory.get(room_id).map(|profile| {
                (profile.anonymous_id.clone(), profile.match_history.clone())
            });
            let (anonymous_id, history) = match previous {
                Some(previous) => previous,
                None => (generate_anonymous_id(), Default::default()),
            };

            let mut profile = MatchingProfile::new(
                room_id.to_string(),
                anonymous_id.clone(),
                mood,
                participant_count,
                &options,
                self.config.default_similarity_threshold,
                now,
            );
            profile.match_history = history;
            directory.insert(profile);
            (anonymous_id, directory.len())
        };

        if let Some(metrics) = &self.metrics {
            metrics.set_registered_profiles(registered);
        }
        info!(
            "Room {} registered for matching as {} (mood {})",
            room_id, anonymous_id, mood.label
        );
        Ok(anonymous_id)
    }

    /// Refresh a registered room's mood and notify the room
    pub async fn update_mood(
        &self,
        room_id: &str,
        mood: &FusedMood,
        participant_count: usize,
    ) -> Result<()> {
        let now = self.clock.now();
        let anonymous_id = {
            let mut directory = self
                .profiles
                .write()
                .map_err(|_| BridgeError::internal("Failed to acquire profiles write lock"))?;

            let profile = directory
                .get_mut(room_id)
                .ok_or_else(|| BridgeError::ProfileNotFound {
                    reference: room_id.to_string(),
                })?;
            profile.update_mood(mood, participant_count, now);
            profile.anonymous_id.clone()
        };

        let event = MoodUpdatedForMatching {
            anonymous_id,
            mood_label: mood.label.clone(),
            mood_vector: mood.vector,
            confidence: mood.confidence,
            timestamp: now,
        };
        publish_or_warn(
            self.broadcaster.as_ref(),
            room_id,
            events::MOOD_UPDATED_FOR_MATCHING,
            &event,
        )
        .await;
        debug!("Matching profile of room {} now {}", room_id, mood.label);
        Ok(())
    }

    /// Remove a room from discovery. Its anonymous id stops resolving.
    pub fn unregister(&self, room_id: &str) -> Result<bool> {
        let (removed, registered) = {
            let mut directory = self
                .profiles
                .write()
                .map_err(|_| BridgeError::internal("Failed to acquire profiles write lock"))?;
            (directory.remove(room_id).is_some(), directory.len())
        };

        if removed {
            info!("Room {} left matching", room_id);
            if let Some(metrics) = &self.metrics {
                metrics.set_registered_profiles(registered);
            }
        }
        Ok(removed)
    }

    pub fn get_profile(&self, room_id: &str) -> Result<Option<MatchingProfile>> {
        let directory = self
            .profiles
            .read()
            .map_err(|_| BridgeError::internal("Failed to acquire profiles read lock"))?;
        Ok(directory.get(room_id).cloned())
    }

    /// Rank other public, matchable rooms by mood similarity and
    /// compatibility.
    ///
    /// Returns an empty list for a room that does not allow matching.
    pub fn find_matches(
        &self,
        room_id: &str,
        threshold_override: Option<f64>,
    ) -> Result<Vec<MatchCandidate>> {
        if let Some(threshold) = threshold_override {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(BridgeError::validation(format!(
                    "Similarity threshold must be within [0, 1], got {}",
                    threshold
                ))
                .into());
            }
        }

        let timer = Instant::now();
        let now = self.clock.now();
        let cooldown = chrono_duration(self.config.reconnect_cooldown());

        let candidates = {
            let mut directory = self
                .profiles
                .write()
                .map_err(|_| BridgeError::internal("Failed to acquire profiles write lock"))?;

            let profile = directory
                .get(room_id)
                .ok_or_else(|| BridgeError::ProfileNotFound {
                    reference: room_id.to_string(),
                })?;
            if !profile.allow_matching {
                return Ok(Vec::new());
            }

            let threshold = threshold_override.unwrap_or(profile.similarity_threshold);
            let mut candidates: Vec<MatchCandidate> = directory
                .profiles()
                .filter(|other| other.room_id != profile.room_id)
                .filter(|other| other.allow_matching && other.is_public)
                .filter(|other| profile.size_bounds.contains(other.participant_count))
                .filter(|other| languages_compatible(&profile.language, &other.language))
                .filter(|other| {
                    !profile.connected_recently(&other.room_id, now, cooldown)
                        && !other.connected_recently(&profile.room_id, now, cooldown)
                })
                .filter_map(|other| {
                    let similarity = cosine_similarity(&profile.mood_vector, &other.mood_vector);
                    if similarity < threshold {
                        return None;
                    }
                    let compatibility = compatibility_score(profile, other);
                    Some(MatchCandidate {
                        anonymous_id: other.anonymous_id.clone(),
                        mood_label: other.mood_label.clone(),
                        mood_vector: other.mood_vector,
                        participant_count: other.participant_count,
                        tags: other.tags.iter().cloned().collect(),
                        region: other.region.clone(),
                        language: other.language.clone(),
                        similarity,
                        compatibility,
                        score: ranking_score(similarity, compatibility),
                    })
                })
                .collect();

            candidates.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.anonymous_id.cmp(&b.anonymous_id))
            });
            candidates.truncate(self.config.max_results);

            if let Some(profile) = directory.get_mut(room_id) {
                profile.last_search = Some(now);
            }
            candidates
        };

        self.increment_stat(|stats| stats.searches += 1);
        if let Some(metrics) = &self.metrics {
            metrics.record_match_search(timer.elapsed());
        }
        debug!("Room {} found {} candidates", room_id, candidates.len());
        Ok(candidates)
    }

    /// Ask an anonymously discovered room to connect.
    ///
    /// The request expires after five minutes if unanswered.
    pub async fn request_connection(
        &self,
        from_room_id: &str,
        to_anonymous_id: &str,
        requester: &str,
        message: &str,
    ) -> Result<ConnectionRequest> {
        if requester.trim().is_empty() {
            return Err(BridgeError::validation("Requester must not be empty").into());
        }
        validate_message(message)?;

        let now = self.clock.now();
        let (from, target) = {
            let directory = self
                .profiles
                .read()
                .map_err(|_| BridgeError::internal("Failed to acquire profiles read lock"))?;

            let from = directory
                .get(from_room_id)
                .cloned()
                .ok_or_else(|| BridgeError::ProfileNotFound {
                    reference: from_room_id.to_string(),
                })?;
            let target = directory
                .resolve(to_anonymous_id)
                .filter(|target| target.allow_matching)
                .cloned()
                .ok_or_else(|| BridgeError::ProfileNotFound {
                    reference: to_anonymous_id.to_string(),
                })?;
            (from, target)
        };

        if target.room_id == from.room_id {
            return Err(BridgeError::validation("A room cannot request itself").into());
        }
        if !target.size_bounds.contains(from.participant_count) {
            return Err(BridgeError::CapacityExceeded {
                room_id: to_anonymous_id.to_string(),
                reason: format!(
                    "accepts {}..={} participants, requester has {}",
                    target.size_bounds.min, target.size_bounds.max, from.participant_count
                ),
            }
            .into());
        }

        let request = ConnectionRequest {
            id: generate_request_id(),
            from_room_id: from.room_id.clone(),
            to_room_id: target.room_id.clone(),
            from_anonymous_id: from.anonymous_id.clone(),
            to_anonymous_id: target.anonymous_id.clone(),
            requester: requester.to_string(),
            message: message.to_string(),
            similarity: cosine_similarity(&from.mood_vector, &target.mood_vector),
            status: RequestStatus::Pending,
            created_at: now,
            expires_at: now + chrono_duration(REQUEST_TTL),
            resolved_at: None,
            session_id: None,
            response_message: None,
            responding: false,
        };

        {
            let mut requests = self
                .requests
                .write()
                .map_err(|_| BridgeError::internal("Failed to acquire requests write lock"))?;

            let duplicate = requests.values().any(|existing| {
                existing.is_pending()
                    && existing.from_room_id == request.from_room_id
                    && existing.to_room_id == request.to_room_id
            });
            if duplicate {
                return Err(BridgeError::InvalidState {
                    message: format!("A request to {} is already pending", to_anonymous_id),
                }
                .into());
            }
            requests.insert(request.id, request.clone());
        }

        self.record_history(&from.room_id, &target.room_id, MatchAction::RequestSent, now);
        self.record_history(&target.room_id, &from.room_id, MatchAction::RequestReceived, now);
        self.start_expiry_timer(request.id);

        let received = ConnectionRequestReceived {
            request_id: request.id,
            from_anonymous_id: from.anonymous_id.clone(),
            from_mood_label: from.mood_label.clone(),
            message: request.message.clone(),
            similarity: request.similarity,
            expires_at: request.expires_at,
        };
        publish_or_warn(
            self.broadcaster.as_ref(),
            &target.room_id,
            events::CONNECTION_REQUEST_RECEIVED,
            &received,
        )
        .await;

        let sent = ConnectionRequestSent {
            request_id: request.id,
            to_anonymous_id: target.anonymous_id.clone(),
            similarity: request.similarity,
            expires_at: request.expires_at,
        };
        publish_or_warn(
            self.broadcaster.as_ref(),
            &from.room_id,
            events::CONNECTION_REQUEST_SENT,
            &sent,
        )
        .await;

        self.increment_stat(|stats| stats.requests_sent += 1);
        if let Some(metrics) = &self.metrics {
            metrics.record_request(RequestStatus::Pending.as_str());
        }
        info!(
            "Connection request {} from room {} to {} (similarity {:.3})",
            request.id, from.room_id, target.anonymous_id, request.similarity
        );
        Ok(request)
    }

    /// Answer a pending request on behalf of the room it was sent to.
    ///
    /// Expiry is checked here against the clock, whether or not the expiry
    /// timer has fired. Accepting delegates to the session connector; if that
    /// fails the request stays pending.
    pub async fn respond_to_request(
        &self,
        request_id: RequestId,
        responding_room_id: &str,
        responder: &str,
        decision: ResponseDecision,
        message: Option<String>,
    ) -> Result<ConnectionRequest> {
        if responder.trim().is_empty() {
            return Err(BridgeError::validation("Responder must not be empty").into());
        }
        if let Some(message) = &message {
            validate_message(message)?;
        }

        let now = self.clock.now();
        let outcome = {
            let mut requests = self
                .requests
                .write()
                .map_err(|_| BridgeError::internal("Failed to acquire requests write lock"))?;

            let request = requests
                .get_mut(&request_id)
                .filter(|request| request.to_room_id == responding_room_id)
                .ok_or_else(|| BridgeError::RequestNotFound {
                    request_id: request_id.to_string(),
                })?;

            match request.status {
                RequestStatus::Expired => {
                    return Err(BridgeError::RequestExpired {
                        request_id: request_id.to_string(),
                    }
                    .into())
                }
                RequestStatus::Accepted | RequestStatus::Rejected => {
                    return Err(BridgeError::InvalidState {
                        message: format!("Request {} was already answered", request_id),
                    }
                    .into())
                }
                RequestStatus::Pending if request.responding => {
                    return Err(BridgeError::InvalidState {
                        message: format!("Request {} is already being answered", request_id),
                    }
                    .into())
                }
                RequestStatus::Pending => {}
            }

            if request.is_past_expiry(now) {
                request.resolve(RequestStatus::Expired, now);
                Outcome::Expired(request.clone())
            } else {
                match decision {
                    ResponseDecision::Reject => {
                        request.resolve(RequestStatus::Rejected, now);
                        request.response_message = message.clone();
                        Outcome::Rejected(request.clone())
                    }
                    ResponseDecision::Accept => {
                        request.responding = true;
                        Outcome::Accepting(request.clone())
                    }
                }
            }
        };

        match outcome {
            Outcome::Expired(request) => {
                self.cancel_expiry_timer(request_id);
                self.notify_expired(&request).await;
                Err(BridgeError::RequestExpired {
                    request_id: request_id.to_string(),
                }
                .into())
            }
            Outcome::Rejected(request) => {
                self.cancel_expiry_timer(request_id);
                self.record_history(&request.from_room_id, &request.to_room_id, MatchAction::Rejected, now);
                self.record_history(&request.to_room_id, &request.from_room_id, MatchAction::Rejected, now);
                self.notify_resolution(&request, false).await;

                self.increment_stat(|stats| stats.requests_rejected += 1);
                if let Some(metrics) = &self.metrics {
                    metrics.record_request(RequestStatus::Rejected.as_str());
                }
                info!("Connection request {} rejected by {}", request_id, responder);
                Ok(request)
            }
            Outcome::Accepting(request) => {
                self.complete_acceptance(request, responder, message).await
            }
        }
    }

    async fn complete_acceptance(
        &self,
        request: ConnectionRequest,
        responder: &str,
        message: Option<String>,
    ) -> Result<ConnectionRequest> {
        let request_id = request.id;
        let connected = self
            .connector
            .connect(
                &request.from_room_id,
                &request.to_room_id,
                responder,
                ConnectOptions::default(),
            )
            .await;

        let now = self.clock.now();
        let session_id = match connected {
            Ok(session_id) => session_id,
            Err(e) => {
                // Back to plain pending, or straight to expired if the
                // deadline passed while the session was being set up
                let expired = match self.requests.write() {
                    Ok(mut requests) => match requests.get_mut(&request_id) {
                        Some(request) if request.is_pending() => {
                            request.responding = false;
                            if request.is_past_expiry(now) {
                                request.resolve(RequestStatus::Expired, now);
                                Some(request.clone())
                            } else {
                                None
                            }
                        }
                        _ => None,
                    },
                    Err(_) => None,
                };
                if let Some(expired) = expired {
                    self.cancel_expiry_timer(request_id);
                    self.notify_expired(&expired).await;
                }
                warn!(
                    "Accepting request {} failed to connect the rooms: {}",
                    request_id, e
                );
                return Err(e);
            }
        };

        let accepted = {
            let mut requests = self
                .requests
                .write()
                .map_err(|_| BridgeError::internal("Failed to acquire requests write lock"))?;
            let request = requests
                .get_mut(&request_id)
                .ok_or_else(|| BridgeError::RequestNotFound {
                    request_id: request_id.to_string(),
                })?;
            request.resolve(RequestStatus::Accepted, now);
            request.session_id = Some(session_id);
            request.response_message = message;
            request.clone()
        };

        self.cancel_expiry_timer(request_id);
        self.record_history(&accepted.from_room_id, &accepted.to_room_id, MatchAction::Connected, now);
        self.record_history(&accepted.to_room_id, &accepted.from_room_id, MatchAction::Connected, now);
        self.notify_resolution(&accepted, true).await;

        self.increment_stat(|stats| stats.requests_accepted += 1);
        if let Some(metrics) = &self.metrics {
            metrics.record_request(RequestStatus::Accepted.as_str());
        }
        info!(
            "Connection request {} accepted by {}, session {}",
            request_id, responder, session_id
        );
        Ok(accepted)
    }

    fn start_expiry_timer(&self, request_id: RequestId) {
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(REQUEST_TTL).await;
            engine.expire_request(request_id).await;
        });

        match self.expiry_timers.lock() {
            Ok(mut timers) => {
                timers.insert(request_id, handle);
            }
            Err(_) => warn!("Failed to track expiry timer for request {}", request_id),
        }
    }

    fn cancel_expiry_timer(&self, request_id: RequestId) {
        if let Ok(mut timers) = self.expiry_timers.lock() {
            if let Some(handle) = timers.remove(&request_id) {
                handle.abort();
            }
        }
    }

    /// Timer path of request expiry. Requests being accepted are left to the
    /// acceptance to resolve.
    async fn expire_request(&self, request_id: RequestId) {
        if let Ok(mut timers) = self.expiry_timers.lock() {
            timers.remove(&request_id);
        }

        let now = self.clock.now();
        let expired = match self.requests.write() {
            Ok(mut requests) => match requests.get_mut(&request_id) {
                Some(request) if request.is_pending() && !request.responding => {
                    request.resolve(RequestStatus::Expired, now);
                    Some(request.clone())
                }
                _ => None,
            },
            Err(_) => {
                warn!("Failed to acquire requests lock to expire {}", request_id);
                None
            }
        };

        match expired {
            Some(request) => self.notify_expired(&request).await,
            None => debug!("Expiry timer for request {} found nothing to do", request_id),
        }
    }

    async fn notify_expired(&self, request: &ConnectionRequest) {
        let event = ConnectionRequestResolved {
            request_id: request.id,
            to_anonymous_id: request.to_anonymous_id.clone(),
            accepted: false,
            message: Some(EXPIRED_MESSAGE.to_string()),
            session_id: None,
            timestamp: self.clock.now(),
        };
        publish_or_warn(
            self.broadcaster.as_ref(),
            &request.from_room_id,
            events::CONNECTION_REQUEST_REJECTED,
            &event,
        )
        .await;

        self.increment_stat(|stats| stats.requests_expired += 1);
        if let Some(metrics) = &self.metrics {
            metrics.record_request(RequestStatus::Expired.as_str());
        }
        info!("Connection request {} expired", request.id);
    }

    async fn notify_resolution(&self, request: &ConnectionRequest, accepted: bool) {
        let event = ConnectionRequestResolved {
            request_id: request.id,
            to_anonymous_id: request.to_anonymous_id.clone(),
            accepted,
            message: request.response_message.clone(),
            session_id: request.session_id,
            timestamp: self.clock.now(),
        };
        let event_name = if accepted {
            events::CONNECTION_REQUEST_ACCEPTED
        } else {
            events::CONNECTION_REQUEST_REJECTED
        };
        publish_or_warn(
            self.broadcaster.as_ref(),
            &request.from_room_id,
            event_name,
            &event,
        )
        .await;
    }

    fn record_history(
        &self,
        room_id: &str,
        other: &str,
        action: MatchAction,
        timestamp: chrono::DateTime<chrono::Utc>,
    ) {
        let Ok(mut directory) = self.profiles.write() else {
            warn!("Failed to record match history for room {}", room_id);
            return;
        };
        // The profile may have been evicted in the meantime
        if let Some(profile) = directory.get_mut(room_id) {
            profile.record(
                MatchHistoryEntry {
                    room_id: other.to_string(),
                    action,
                    timestamp,
                },
                self.config.match_history_capacity,
            );
        }
    }

    pub fn get_request(&self, request_id: RequestId) -> Result<Option<ConnectionRequest>> {
        let requests = self
            .requests
            .read()
            .map_err(|_| BridgeError::internal("Failed to acquire requests read lock"))?;
        Ok(requests.get(&request_id).cloned())
    }

    /// Search on behalf of every matchable room whose last search is older
    /// than the sweep interval, and notify rooms whose best candidate is a
    /// high-quality match. A failing room does not stop the sweep.
    pub async fn run_match_sweep(&self) -> Result<usize> {
        let now = self.clock.now();
        let interval = chrono_duration(self.config.sweep_interval());

        let due: Vec<RoomId> = {
            let directory = self
                .profiles
                .read()
                .map_err(|_| BridgeError::internal("Failed to acquire profiles read lock"))?;
            directory
                .profiles()
                .filter(|profile| profile.allow_matching)
                .filter(|profile| {
                    profile
                        .last_search
                        .map_or(true, |last_search| now - last_search >= interval)
                })
                .map(|profile| profile.room_id.clone())
                .collect()
        };

        let mut notified = 0;
        for room_id in &due {
            let candidates = match self.find_matches(room_id, None) {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!("Match sweep skipped room {}: {}", room_id, e);
                    continue;
                }
            };

            let Some(top) = candidates.first() else {
                continue;
            };
            if top.similarity < self.config.high_quality_threshold {
                continue;
            }

            let event = MatchFound {
                anonymous_id: top.anonymous_id.clone(),
                mood_label: top.mood_label.clone(),
                similarity: top.similarity,
                score: top.score,
                timestamp: now,
            };
            if publish_or_warn(self.broadcaster.as_ref(), room_id, events::MATCH_FOUND, &event)
                .await
            {
                notified += 1;
            }
            self.increment_stat(|stats| stats.high_quality_matches += 1);
            if let Some(metrics) = &self.metrics {
                metrics.record_high_quality_match();
            }
        }

        debug!(
            "Match sweep searched {} rooms, {} high-quality matches",
            due.len(),
            notified
        );
        Ok(notified)
    }

    /// Evict profiles not updated within the retention window, together
    /// with their anonymous ids
    pub fn expire_profiles(&self) -> Result<usize> {
        let cutoff = self.clock.now() - chrono_duration(self.config.profile_retention());
        let (evicted, registered) = {
            let mut directory = self
                .profiles
                .write()
                .map_err(|_| BridgeError::internal("Failed to acquire profiles write lock"))?;
            let evicted = directory.evict_stale(cutoff);
            (evicted, directory.len())
        };

        if !evicted.is_empty() {
            info!("Evicted {} stale matching profiles", evicted.len());
            self.increment_stat(|stats| stats.profiles_evicted += evicted.len() as u64);
            if let Some(metrics) = &self.metrics {
                metrics.record_profiles_evicted(evicted.len());
                metrics.set_registered_profiles(registered);
            }
        }
        Ok(evicted.len())
    }

    /// Drop resolved requests past the retention window
    pub fn cleanup_requests(&self) -> Result<usize> {
        let now = self.clock.now();
        let retention = chrono_duration(self.config.request_retention());
        let mut requests = self
            .requests
            .write()
            .map_err(|_| BridgeError::internal("Failed to acquire requests write lock"))?;

        let before = requests.len();
        requests.retain(|_, request| !request.is_collectable(now, retention));
        let removed = before - requests.len();
        if removed > 0 {
            debug!("Collected {} resolved connection requests", removed);
        }
        Ok(removed)
    }

    pub fn stats(&self) -> Result<MatchingStats> {
        let mut stats = self
            .stats
            .read()
            .map_err(|_| BridgeError::internal("Failed to acquire stats read lock"))?
            .clone();
        stats.registered_profiles = self
            .profiles
            .read()
            .map_err(|_| BridgeError::internal("Failed to acquire profiles read lock"))?
            .len();
        stats.pending_requests = self
            .requests
            .read()
            .map_err(|_| BridgeError::internal("Failed to acquire requests read lock"))?
            .values()
            .filter(|request| request.is_pending())
            .count();
        Ok(stats)
    }

    /// Abort every outstanding request expiry timer
    pub fn shutdown(&self) -> usize {
        let Ok(mut timers) = self.expiry_timers.lock() else {
            return 0;
        };
        let count = timers.len();
        for (_, handle) in timers.drain() {
            handle.abort();
        }
        info!("Matching engine shut down, {} expiry timers cancelled", count);
        count
    }

    fn increment_stat<F>(&self, update: F)
    where
        F: FnOnce(&mut MatchingStats),
    {
        if let Ok(mut stats) = self.stats.write() {
            update(&mut stats);
        }
    }
}

enum Outcome {
    Expired(ConnectionRequest),
    Rejected(ConnectionRequest),
    Accepting(ConnectionRequest),
}

fn validate_message(message: &str) -> Result<()> {
    let length = message.chars().count();
    if length > MAX_REQUEST_MESSAGE_CHARS {
        return Err(BridgeError::validation(format!(
            "Message is {} characters, the limit is {}",
            length, MAX_REQUEST_MESSAGE_CHARS
        ))
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::publisher::MockEventBroadcaster;
    use crate::error::{error_kind, ErrorKind};
    use crate::matching::profile::SizeBounds;
    use crate::mood::{fuse, MoodObservation};
    use crate::session::MockSessionConnector;
    use crate::utils::{generate_session_id, ManualClock};
    use chrono::Utc;

    fn mood(name: &str) -> FusedMood {
        fuse(&[MoodObservation::new(name, 0.9, 1.0)])
    }

    struct Harness {
        engine: MatchingEngine,
        broadcaster: Arc<MockEventBroadcaster>,
        clock: Arc<ManualClock>,
    }

    fn harness(connector: MockSessionConnector) -> Harness {
        let broadcaster = Arc::new(MockEventBroadcaster::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = MatchingEngine::new(
            MatchingConfig::default(),
            broadcaster.clone(),
            Arc::new(connector),
        )
        .with_clock(clock.clone());
        Harness {
            engine,
            broadcaster,
            clock,
        }
    }

    fn connecting(session_id: crate::types::SessionId) -> MockSessionConnector {
        let mut connector = MockSessionConnector::new();
        connector
            .expect_connect()
            .returning(move |_, _, _, _| Ok(session_id));
        connector
    }

    fn register(engine: &MatchingEngine, room_id: &str, mood_name: &str) -> String {
        engine
            .register(room_id, Some(&mood(mood_name)), 4, MatchingOptions::default())
            .unwrap()
    }

    #[test]
    fn test_register_requires_mood() {
        let h = harness(MockSessionConnector::new());
        let err = h
            .engine
            .register("room-a", None, 4, MatchingOptions::default())
            .unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Validation));
        assert!(matches!(
            err.downcast_ref::<BridgeError>(),
            Some(BridgeError::NoMoodData { .. })
        ));
    }

    #[test]
    fn test_reregistering_keeps_anonymous_id() {
        let h = harness(MockSessionConnector::new());
        let first = register(&h.engine, "room-a", "happy");
        let second = register(&h.engine, "room-a", "sad");
        assert_eq!(first, second);
        assert_eq!(h.engine.get_profile("room-a").unwrap().unwrap().mood_label, "sad");
    }

    #[test]
    fn test_find_matches_ranks_and_filters() {
        let h = harness(MockSessionConnector::new());
        register(&h.engine, "room-a", "happy");
        let romantic = register(&h.engine, "room-b", "romantic");
        let excited = register(&h.engine, "room-c", "excited");
        register(&h.engine, "room-d", "sad");
        h.engine
            .register(
                "room-private",
                Some(&mood("happy")),
                4,
                MatchingOptions {
                    is_public: false,
                    ..MatchingOptions::default()
                },
            )
            .unwrap();
        h.engine
            .register(
                "room-huge",
                Some(&mood("happy")),
                500,
                MatchingOptions {
                    size_bounds: SizeBounds::new(1, 1000),
                    ..MatchingOptions::default()
                },
            )
            .unwrap();

        let matches = h.engine.find_matches("room-a", None).unwrap();
        let ids: Vec<_> = matches.iter().map(|m| m.anonymous_id.clone()).collect();
        assert_eq!(ids, vec![romantic, excited]);
        assert!(matches[0].score >= matches[1].score);
        assert!(h.engine.get_profile("room-a").unwrap().unwrap().last_search.is_some());
    }

    #[test]
    fn test_language_mismatch_is_excluded() {
        let h = harness(MockSessionConnector::new());
        let options = |language: &str| MatchingOptions {
            language: language.to_string(),
            ..MatchingOptions::default()
        };
        h.engine
            .register("room-en", Some(&mood("happy")), 4, options("en"))
            .unwrap();
        h.engine
            .register("room-fr", Some(&mood("happy")), 4, options("fr"))
            .unwrap();
        h.engine
            .register("room-any", Some(&mood("happy")), 4, options("global"))
            .unwrap();

        let matches = h.engine.find_matches("room-en", None).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].language, "global");
    }

    #[test]
    fn test_find_matches_for_unknown_or_closed_rooms() {
        let h = harness(MockSessionConnector::new());
        let err = h.engine.find_matches("room-x", None).unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::NotFound));

        h.engine
            .register(
                "room-closed",
                Some(&mood("happy")),
                4,
                MatchingOptions {
                    allow_matching: false,
                    ..MatchingOptions::default()
                },
            )
            .unwrap();
        register(&h.engine, "room-b", "happy");
        assert!(h.engine.find_matches("room-closed", None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_request_to_unknown_anonymous_id() {
        let h = harness(MockSessionConnector::new());
        register(&h.engine, "room-a", "happy");
        let anon_b = register(&h.engine, "room-b", "happy");
        h.engine.unregister("room-b").unwrap();

        let err = h
            .engine
            .request_connection("room-a", &anon_b, "alice", "hi")
            .await
            .unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_request_message_limit() {
        let h = harness(MockSessionConnector::new());
        register(&h.engine, "room-a", "happy");
        let anon_b = register(&h.engine, "room-b", "happy");

        let long = "x".repeat(201);
        let err = h
            .engine
            .request_connection("room-a", &anon_b, "alice", &long)
            .await
            .unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Validation));
        assert_eq!(h.broadcaster.events().len(), 0);
    }

    #[tokio::test]
    async fn test_request_outside_size_bounds() {
        let h = harness(MockSessionConnector::new());
        h.engine
            .register("room-a", Some(&mood("happy")), 50, MatchingOptions::default())
            .unwrap();
        let anon_b = h
            .engine
            .register(
                "room-b",
                Some(&mood("happy")),
                4,
                MatchingOptions {
                    size_bounds: SizeBounds::new(1, 10),
                    ..MatchingOptions::default()
                },
            )
            .unwrap();

        let err = h
            .engine
            .request_connection("room-a", &anon_b, "alice", "")
            .await
            .unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Capacity));
    }

    #[tokio::test]
    async fn test_request_is_anonymous_to_the_target() {
        let h = harness(MockSessionConnector::new());
        let anon_a = register(&h.engine, "room-a", "happy");
        let anon_b = register(&h.engine, "room-b", "happy");

        let request = h
            .engine
            .request_connection("room-a", &anon_b, "alice", "want to jam?")
            .await
            .unwrap();
        assert_eq!(request.status, RequestStatus::Pending);

        let received = h.broadcaster.events_for("room-b");
        assert_eq!(received[0].event, events::CONNECTION_REQUEST_RECEIVED);
        assert_eq!(received[0].payload["from_anonymous_id"], anon_a.as_str());
        assert!(!received[0].payload.to_string().contains("room-a"));
        assert_eq!(
            h.broadcaster.event_names_for("room-a"),
            vec![events::CONNECTION_REQUEST_SENT.to_string()]
        );

        let err = h
            .engine
            .request_connection("room-a", &anon_b, "alice", "again")
            .await
            .unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Conflict));
        h.engine.shutdown();
    }

    #[tokio::test]
    async fn test_accept_connects_and_records_history() {
        let session_id = generate_session_id();
        let h = harness(connecting(session_id));
        register(&h.engine, "room-a", "happy");
        let anon_b = register(&h.engine, "room-b", "happy");

        let request = h
            .engine
            .request_connection("room-a", &anon_b, "alice", "")
            .await
            .unwrap();
        let accepted = h
            .engine
            .respond_to_request(request.id, "room-b", "bob", ResponseDecision::Accept, None)
            .await
            .unwrap();

        assert_eq!(accepted.status, RequestStatus::Accepted);
        assert_eq!(accepted.session_id, Some(session_id));
        assert_eq!(h.broadcaster.count(events::CONNECTION_REQUEST_ACCEPTED), 1);

        let profile = h.engine.get_profile("room-b").unwrap().unwrap();
        assert!(profile
            .match_history
            .iter()
            .any(|entry| entry.action == MatchAction::Connected && entry.room_id == "room-a"));

        // Cooldown hides the pair from each other's searches
        assert!(h.engine.find_matches("room-a", None).unwrap().is_empty());
        h.clock.advance(chrono::Duration::minutes(61));
        assert_eq!(h.engine.find_matches("room-a", None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_only_target_room_can_respond() {
        let h = harness(MockSessionConnector::new());
        register(&h.engine, "room-a", "happy");
        let anon_b = register(&h.engine, "room-b", "happy");
        let request = h
            .engine
            .request_connection("room-a", &anon_b, "alice", "")
            .await
            .unwrap();

        let err = h
            .engine
            .respond_to_request(request.id, "room-a", "alice", ResponseDecision::Accept, None)
            .await
            .unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::NotFound));
        h.engine.shutdown();
    }

    #[tokio::test]
    async fn test_response_after_deadline_is_expired() {
        let h = harness(MockSessionConnector::new());
        register(&h.engine, "room-a", "happy");
        let anon_b = register(&h.engine, "room-b", "happy");
        let request = h
            .engine
            .request_connection("room-a", &anon_b, "alice", "")
            .await
            .unwrap();

        h.clock.advance(chrono::Duration::seconds(301));
        let err = h
            .engine
            .respond_to_request(request.id, "room-b", "bob", ResponseDecision::Accept, None)
            .await
            .unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::NotFound));

        let stored = h.engine.get_request(request.id).unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Expired);
        assert_eq!(h.broadcaster.count(events::CONNECTION_REQUEST_REJECTED), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_keeps_request_pending() {
        let mut connector = MockSessionConnector::new();
        connector.expect_connect().returning(|room_a, _, _, _| {
            Err(BridgeError::AlreadyConnected {
                room_id: room_a.to_string(),
            }
            .into())
        });
        let h = harness(connector);
        register(&h.engine, "room-a", "happy");
        let anon_b = register(&h.engine, "room-b", "happy");
        let request = h
            .engine
            .request_connection("room-a", &anon_b, "alice", "")
            .await
            .unwrap();

        let err = h
            .engine
            .respond_to_request(request.id, "room-b", "bob", ResponseDecision::Accept, None)
            .await
            .unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Conflict));

        let stored = h.engine.get_request(request.id).unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Pending);
        assert!(!stored.responding);
        h.engine.shutdown();
    }

    #[tokio::test]
    async fn test_reject_notifies_requester() {
        let h = harness(MockSessionConnector::new());
        register(&h.engine, "room-a", "happy");
        let anon_b = register(&h.engine, "room-b", "happy");
        let request = h
            .engine
            .request_connection("room-a", &anon_b, "alice", "")
            .await
            .unwrap();

        let rejected = h
            .engine
            .respond_to_request(
                request.id,
                "room-b",
                "bob",
                ResponseDecision::Reject,
                Some("maybe later".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(rejected.status, RequestStatus::Rejected);

        let published = h.broadcaster.events_for("room-a");
        let last = published.last().unwrap();
        assert_eq!(last.event, events::CONNECTION_REQUEST_REJECTED);
        assert_eq!(last.payload["message"], "maybe later");

        let err = h
            .engine
            .respond_to_request(request.id, "room-b", "bob", ResponseDecision::Accept, None)
            .await
            .unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Conflict));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_timer_resolves_unanswered_request() {
        let h = harness(MockSessionConnector::new());
        register(&h.engine, "room-a", "happy");
        let anon_b = register(&h.engine, "room-b", "happy");
        let request = h
            .engine
            .request_connection("room-a", &anon_b, "alice", "")
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_secs(301)).await;

        let stored = h.engine.get_request(request.id).unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Expired);
        let published = h.broadcaster.events_for("room-a");
        assert_eq!(published.last().unwrap().payload["message"], EXPIRED_MESSAGE);
        assert_eq!(h.engine.stats().unwrap().requests_expired, 1);
    }

    #[tokio::test]
    async fn test_sweep_notifies_high_quality_matches() {
        let h = harness(MockSessionConnector::new());
        register(&h.engine, "room-a", "happy");
        register(&h.engine, "room-b", "romantic");
        register(&h.engine, "room-c", "sad");

        let notified = h.engine.run_match_sweep().await.unwrap();
        assert_eq!(notified, 2);
        assert_eq!(h.broadcaster.count(events::MATCH_FOUND), 2);
        assert!(h.broadcaster.events_for("room-c").is_empty());

        // Searched moments ago, so nothing is due
        assert_eq!(h.engine.run_match_sweep().await.unwrap(), 0);
    }

    #[test]
    fn test_stale_profiles_are_evicted_with_their_anonymous_ids() {
        let h = harness(MockSessionConnector::new());
        register(&h.engine, "room-a", "happy");
        h.clock.advance(chrono::Duration::minutes(30));
        register(&h.engine, "room-b", "happy");
        h.clock.advance(chrono::Duration::minutes(31));

        assert_eq!(h.engine.expire_profiles().unwrap(), 1);
        assert!(h.engine.get_profile("room-a").unwrap().is_none());
        assert_eq!(h.engine.stats().unwrap().registered_profiles, 1);
    }

    #[tokio::test]
    async fn test_resolved_requests_are_collected() {
        let h = harness(MockSessionConnector::new());
        register(&h.engine, "room-a", "happy");
        let anon_b = register(&h.engine, "room-b", "happy");
        let request = h
            .engine
            .request_connection("room-a", &anon_b, "alice", "")
            .await
            .unwrap();
        h.engine
            .respond_to_request(request.id, "room-b", "bob", ResponseDecision::Reject, None)
            .await
            .unwrap();

        assert_eq!(h.engine.cleanup_requests().unwrap(), 0);
        h.clock.advance(chrono::Duration::minutes(11));
        assert_eq!(h.engine.cleanup_requests().unwrap(), 1);
        assert!(h.engine.get_request(request.id).unwrap().is_none());
    }
}
