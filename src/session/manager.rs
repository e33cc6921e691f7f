//! Session manager: shared session lifecycle and the battle scheduler
//!
//! Sessions and battles each live in one table behind one lock. When both are
//! needed, the session table is always locked before the battle table, and
//! before the lifetime timer map. No lock is held across an await point; collaborators are called between critical
//! sections and state is re-validated afterwards.

use crate::amqp::messages::events;
use crate::amqp::publisher::{publish_or_warn, EventBroadcaster};
use crate::config::SessionConfig;
use crate::directory::{CatalogMatcher, RoomDirectory, SnapshotStore};
use crate::error::{BridgeError, Result};
use crate::metrics::MetricsCollector;
use crate::mood::{fuse_participants, FusedMood};
use crate::session::battle::{
    build_schedule, Battle, BattleResult, BattleSlot, BattleStatus, MoodSample,
};
use crate::session::playlist::{blend_playlist, top_tracks};
use crate::session::scoring::EngagementSource;
use crate::session::shared::{
    blend_ratio, BattleOptions, ConnectOptions, SessionConnector, SessionStatus, SharedSession,
};
use crate::types::{
    BattleFinished, BattleId, BattleStarted, BattleStarting, BattleTrackChanged, EndReason,
    RoomConnected, RoomId, RoomSnapshot, RoomsDisconnected, SessionId, Track, VoteKind,
};
use crate::utils::{chrono_duration, generate_battle_id, generate_session_id, Clock, SystemClock};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// External collaborators the session manager depends on
#[derive(Clone)]
pub struct SessionCollaborators {
    pub directory: Arc<dyn RoomDirectory>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub catalog: Arc<dyn CatalogMatcher>,
    pub engagement: Arc<dyn EngagementSource>,
    pub broadcaster: Arc<dyn EventBroadcaster>,
}

/// Statistics about session manager operations
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionManagerStats {
    pub sessions_created: u64,
    pub sessions_ended: u64,
    pub connect_failures: u64,
    pub battles_started: u64,
    pub battles_finished: u64,
    pub battles_cancelled: u64,
    pub votes_recorded: u64,
    pub active_sessions: usize,
    pub active_battles: usize,
}

#[derive(Default)]
struct SessionTable {
    sessions: HashMap<SessionId, SharedSession>,
    /// Rooms that are members of a non-ended session
    by_room: HashMap<RoomId, SessionId>,
}

impl SessionTable {
    fn release_rooms(&mut self, session: &SharedSession) {
        for room_id in [&session.room_a, &session.room_b] {
            if self.by_room.get(room_id) == Some(&session.id) {
                self.by_room.remove(room_id);
            }
        }
    }
}

#[derive(Default)]
struct BattleTable {
    battles: HashMap<BattleId, Battle>,
    /// Latest battle of each session
    by_session: HashMap<SessionId, BattleId>,
}

impl BattleTable {
    fn running_for(&self, session_id: &SessionId) -> Option<&Battle> {
        self.by_session
            .get(session_id)
            .and_then(|battle_id| self.battles.get(battle_id))
            .filter(|battle| !battle.status.is_terminal())
    }
}

/// What the rotation loop needs once the lead-in is over
struct ActiveBattle {
    session_id: SessionId,
    room_a: RoomId,
    room_b: RoomId,
    duration_ms: u64,
    schedule: Vec<BattleSlot>,
}

/// Orchestrates shared sessions and their battles
#[derive(Clone)]
pub struct SessionManager {
    config: SessionConfig,
    sessions: Arc<RwLock<SessionTable>>,
    battles: Arc<RwLock<BattleTable>>,
    lifetime_timers: Arc<Mutex<HashMap<SessionId, JoinHandle<()>>>>,
    battle_tasks: Arc<Mutex<HashMap<BattleId, JoinHandle<()>>>>,
    collaborators: SessionCollaborators,
    clock: Arc<dyn Clock>,
    stats: Arc<RwLock<SessionManagerStats>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl SessionManager {
    pub fn new(config: SessionConfig, collaborators: SessionCollaborators) -> Self {
        Self {
            config,
            sessions: Arc::new(RwLock::new(SessionTable::default())),
            battles: Arc::new(RwLock::new(BattleTable::default())),
            lifetime_timers: Arc::new(Mutex::new(HashMap::new())),
            battle_tasks: Arc::new(Mutex::new(HashMap::new())),
            collaborators,
            clock: Arc::new(SystemClock),
            stats: Arc::new(RwLock::new(SessionManagerStats::default())),
            metrics: None,
        }
    }

    /// Use a different wall clock for timestamps and retention
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Merge two rooms into a shared session.
    ///
    /// Both rooms are reserved atomically before any collaborator is called,
    /// so two concurrent connects involving the same room cannot both
    /// succeed. A directory failure releases the reservation.
    pub async fn connect_rooms(
        &self,
        room_a: &str,
        room_b: &str,
        initiator: &str,
        options: ConnectOptions,
    ) -> Result<SharedSession> {
        if room_a.trim().is_empty() || room_b.trim().is_empty() {
            return Err(BridgeError::validation("Room ids must not be empty").into());
        }
        if room_a == room_b {
            return Err(BridgeError::validation("Cannot connect a room to itself").into());
        }
        if initiator.trim().is_empty() {
            return Err(BridgeError::validation("Initiator must not be empty").into());
        }
        options.validate(self.config.max_session_duration_seconds)?;

        let duration = options
            .duration_seconds
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.config.session_duration());
        let session_id = generate_session_id();

        self.reserve(session_id, room_a, room_b, initiator, duration)?;

        match self.establish(session_id, room_a, room_b, duration).await {
            Ok(session) => Ok(session),
            Err(e) => {
                self.release_reservation(session_id);
                self.increment_stat(|stats| stats.connect_failures += 1);
                if let Some(metrics) = &self.metrics {
                    metrics.record_connect_failure(failure_kind(&e));
                }
                warn!(
                    "Failed to connect rooms {} and {}: {}",
                    room_a, room_b, e
                );
                Err(e)
            }
        }
    }

    /// Insert a `Connecting` session, failing if either room is taken
    fn reserve(
        &self,
        session_id: SessionId,
        room_a: &str,
        room_b: &str,
        initiator: &str,
        duration: Duration,
    ) -> Result<()> {
        let mut table = self
            .sessions
            .write()
            .map_err(|_| BridgeError::internal("Failed to acquire sessions write lock"))?;

        for room_id in [room_a, room_b] {
            if table.by_room.contains_key(room_id) {
                if let Some(metrics) = &self.metrics {
                    metrics.record_connect_failure("conflict");
                }
                return Err(BridgeError::AlreadyConnected {
                    room_id: room_id.to_string(),
                }
                .into());
            }
        }

        let session = SharedSession::connecting(
            session_id,
            room_a.to_string(),
            room_b.to_string(),
            initiator.to_string(),
            duration.as_secs(),
            self.clock.now(),
        );
        table.by_room.insert(room_a.to_string(), session_id);
        table.by_room.insert(room_b.to_string(), session_id);
        table.sessions.insert(session_id, session);

        debug!("Reserved rooms {} and {} for session {}", room_a, room_b, session_id);
        Ok(())
    }

    fn release_reservation(&self, session_id: SessionId) {
        let Ok(mut table) = self.sessions.write() else {
            warn!("Failed to release reservation for session {}", session_id);
            return;
        };
        if let Some(session) = table.sessions.remove(&session_id) {
            table.release_rooms(&session);
        }
    }

    /// Fetch both rooms, blend them and bring the session live
    async fn establish(
        &self,
        session_id: SessionId,
        room_a: &str,
        room_b: &str,
        duration: Duration,
    ) -> Result<SharedSession> {
        let snapshot_a = self.fetch_snapshot(room_a).await?;
        let snapshot_b = self.fetch_snapshot(room_b).await?;

        let fusion_timer = Instant::now();
        let blended_mood = fuse_participants(
            snapshot_a
                .participants
                .iter()
                .chain(snapshot_b.participants.iter()),
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_fusion(fusion_timer.elapsed());
        }

        let ratio = blend_ratio(snapshot_a.participants.len(), snapshot_b.participants.len());
        let filler = self.filler_tracks(&blended_mood).await;
        let playlist = {
            let mut rng = rand::rng();
            blend_playlist(
                top_tracks(&snapshot_a.top_tracks, self.config.top_tracks_per_room),
                top_tracks(&snapshot_b.top_tracks, self.config.top_tracks_per_room),
                ratio,
                filler,
                self.config.playlist_cap,
                &mut rng,
            )
        };

        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(chrono_duration(duration))
            .ok_or_else(|| {
                BridgeError::validation(format!("Session duration {:?} is out of range", duration))
            })?;

        // The timer is registered under the sessions lock that publishes
        // `Connected`, so a disconnect always finds it
        let timer = self.spawn_lifetime_timer(session_id, duration);
        let session = {
            let Ok(mut table) = self.sessions.write() else {
                timer.abort();
                return Err(BridgeError::internal("Failed to acquire sessions write lock").into());
            };

            let Some(session) = table
                .sessions
                .get_mut(&session_id)
                .filter(|session| session.status == SessionStatus::Connecting)
            else {
                timer.abort();
                return Err(BridgeError::InvalidState {
                    message: format!("Session {} ended while connecting", session_id),
                }
                .into());
            };

            session.participant_count_a = snapshot_a.participants.len();
            session.participants = snapshot_a
                .participants
                .iter()
                .chain(snapshot_b.participants.iter())
                .cloned()
                .collect();
            session.blended_mood = blended_mood;
            session.blend_ratio = ratio;
            session.playlist = playlist;
            session.status = SessionStatus::Connected;
            session.connected_at = Some(now);
            session.expires_at = Some(expires_at);
            let session = session.clone();

            match self.lifetime_timers.lock() {
                Ok(mut timers) => {
                    timers.insert(session_id, timer);
                }
                Err(_) => warn!("Failed to track lifetime timer for session {}", session_id),
            }
            session
        };

        info!(
            "Session {} connected rooms {} and {} (mood {}, ratio {:.2}, {} tracks)",
            session_id,
            room_a,
            room_b,
            session.blended_mood.label,
            ratio,
            session.playlist.len()
        );

        for (room_id, partner) in [(room_a, room_b), (room_b, room_a)] {
            let event = RoomConnected {
                session_id,
                partner_room_id: partner.to_string(),
                blended_mood: session.blended_mood.clone(),
                blend_ratio: ratio,
                playlist_length: session.playlist.len(),
                expires_at,
                timestamp: now,
            };
            publish_or_warn(
                self.collaborators.broadcaster.as_ref(),
                room_id,
                events::ROOM_CONNECTED,
                &event,
            )
            .await;
        }

        for (room_id, partner) in [(room_a, room_b), (room_b, room_a)] {
            let metadata = HashMap::from([
                ("event".to_string(), "session_connected".to_string()),
                ("session_id".to_string(), session_id.to_string()),
                ("partner_room_id".to_string(), partner.to_string()),
                ("blend_ratio".to_string(), format!("{:.4}", ratio)),
            ]);
            self.save_snapshot(room_id, &session.blended_mood, &session.playlist, metadata)
                .await;
        }

        self.increment_stat(|stats| stats.sessions_created += 1);
        if let Some(metrics) = &self.metrics {
            metrics.record_session_connected();
        }

        Ok(session)
    }

    async fn fetch_snapshot(&self, room_id: &str) -> Result<RoomSnapshot> {
        self.collaborators
            .directory
            .get_room_snapshot(room_id)
            .await
            .map_err(|e| upstream("room_directory", e))
    }

    async fn filler_tracks(&self, mood: &FusedMood) -> Vec<Track> {
        match self
            .collaborators
            .catalog
            .matching_tracks(&mood.label, self.config.playlist_cap)
            .await
        {
            Ok(tracks) => tracks,
            Err(e) => {
                warn!("Catalog lookup for mood {} failed: {}", mood.label, e);
                Vec::new()
            }
        }
    }

    async fn save_snapshot(
        &self,
        room_id: &str,
        mood: &FusedMood,
        playlist: &[Track],
        metadata: HashMap<String, String>,
    ) {
        match self
            .collaborators
            .snapshots
            .save_snapshot(room_id, mood, playlist, metadata)
            .await
        {
            Ok(memory_id) => debug!("Saved snapshot {} for room {}", memory_id, room_id),
            Err(e) => warn!("Failed to save snapshot for room {}: {}", room_id, e),
        }
    }

    fn spawn_lifetime_timer(&self, session_id: SessionId, duration: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            manager.expire_session(session_id).await;
        })
    }

    async fn expire_session(&self, session_id: SessionId) {
        // The timer is the running task; forget it rather than abort it
        if let Ok(mut timers) = self.lifetime_timers.lock() {
            timers.remove(&session_id);
        }

        match self.end_session(session_id, EndReason::Expired).await {
            Ok(_) => info!("Session {} expired", session_id),
            Err(e) => warn!("Lifetime timer for session {} found nothing to end: {}", session_id, e),
        }
    }

    /// End a session at the caller's request
    pub async fn disconnect_rooms(&self, session_id: SessionId) -> Result<SharedSession> {
        let session = self.end_session(session_id, EndReason::Requested).await?;
        info!(
            "Session {} disconnected rooms {} and {}",
            session_id, session.room_a, session.room_b
        );
        Ok(session)
    }

    /// Move a session to `Ended`, cancel its timer and battle, then notify
    /// both rooms. Both rooms are free to connect again once this returns.
    async fn end_session(&self, session_id: SessionId, reason: EndReason) -> Result<SharedSession> {
        let now = self.clock.now();
        let session = {
            let mut table = self
                .sessions
                .write()
                .map_err(|_| BridgeError::internal("Failed to acquire sessions write lock"))?;

            let session = table
                .sessions
                .get_mut(&session_id)
                .filter(|session| session.is_active())
                .ok_or_else(|| BridgeError::SessionNotFound {
                    session_id: session_id.to_string(),
                })?;
            session.end(reason, now);
            let session = session.clone();
            table.release_rooms(&session);
            session
        };

        if reason != EndReason::Expired {
            if let Ok(mut timers) = self.lifetime_timers.lock() {
                if let Some(handle) = timers.remove(&session_id) {
                    handle.abort();
                }
            }
        }

        self.cancel_battle_for(session_id)?;

        for room_id in [&session.room_a, &session.room_b] {
            let event = RoomsDisconnected {
                session_id,
                room_a: session.room_a.clone(),
                room_b: session.room_b.clone(),
                reason,
                timestamp: now,
            };
            publish_or_warn(
                self.collaborators.broadcaster.as_ref(),
                room_id,
                events::ROOMS_DISCONNECTED,
                &event,
            )
            .await;
        }

        self.increment_stat(|stats| stats.sessions_ended += 1);
        // Sessions that never went live were not counted as connected
        if let (Some(metrics), Some(connected_at)) = (&self.metrics, session.connected_at) {
            let lifetime = (now - connected_at).to_std().unwrap_or_default();
            metrics.record_session_ended(reason, lifetime);
        }

        Ok(session)
    }

    fn cancel_battle_for(&self, session_id: SessionId) -> Result<()> {
        let cancelled = {
            let mut table = self
                .battles
                .write()
                .map_err(|_| BridgeError::internal("Failed to acquire battles write lock"))?;

            let now = self.clock.now();
            let mut cancelled = None;
            if let Some(battle_id) = table.by_session.get(&session_id).copied() {
                if let Some(battle) = table.battles.get_mut(&battle_id) {
                    if battle.cancel(now) {
                        cancelled = Some(battle_id);
                    }
                }
            }
            cancelled
        };

        if let Some(battle_id) = cancelled {
            if let Ok(mut tasks) = self.battle_tasks.lock() {
                if let Some(handle) = tasks.remove(&battle_id) {
                    handle.abort();
                }
            }
            self.increment_stat(|stats| stats.battles_cancelled += 1);
            if let Some(metrics) = &self.metrics {
                metrics.record_battle_cancelled();
            }
            info!("Battle {} cancelled with session {}", battle_id, session_id);
        }
        Ok(())
    }

    /// Schedule a battle between the two rooms of a connected session
    pub async fn start_battle(&self, session_id: SessionId, options: BattleOptions) -> Result<Battle> {
        options.validate(self.config.max_battle_duration_seconds)?;
        let duration = options
            .duration_seconds
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.config.battle_duration());

        let (room_a, room_b) = self.check_battle_gate(session_id)?;

        let snapshot_a = self.fetch_snapshot(&room_a).await?;
        let snapshot_b = self.fetch_snapshot(&room_b).await?;
        let tracks_a = top_tracks(&snapshot_a.top_tracks, self.config.battle_tracks_per_room);
        let tracks_b = top_tracks(&snapshot_b.top_tracks, self.config.battle_tracks_per_room);

        let schedule = build_schedule(&room_a, &tracks_a, &room_b, &tracks_b, duration);
        if schedule.is_empty() {
            return Err(BridgeError::validation(format!(
                "No tracks available for a battle in session {}",
                session_id
            ))
            .into());
        }

        let battle = Battle::new(
            generate_battle_id(),
            session_id,
            room_a.clone(),
            room_b.clone(),
            duration,
            schedule,
            self.clock.now(),
        );
        let battle_id = battle.id;
        let cancel = battle.cancel_flag();

        // Re-check under both locks, since the session may have ended or
        // another battle may have started while the directory was queried
        {
            let sessions = self
                .sessions
                .read()
                .map_err(|_| BridgeError::internal("Failed to acquire sessions read lock"))?;
            let mut battles = self
                .battles
                .write()
                .map_err(|_| BridgeError::internal("Failed to acquire battles write lock"))?;

            gate(&sessions, &battles, session_id)?;
            battles.by_session.insert(session_id, battle_id);
            battles.battles.insert(battle_id, battle.clone());
        }

        let lead_in = self.config.battle_lead_in();
        let starting = BattleStarting {
            battle_id,
            session_id,
            slot_count: battle.schedule.len(),
            lead_in_ms: lead_in.as_millis() as u64,
            timestamp: self.clock.now(),
        };
        for room_id in [&room_a, &room_b] {
            publish_or_warn(
                self.collaborators.broadcaster.as_ref(),
                room_id,
                events::BATTLE_STARTING,
                &starting,
            )
            .await;
        }

        let manager = self.clone();
        let handle = tokio::spawn(async move {
            manager.run_battle(battle_id, cancel, lead_in).await;
        });
        if let Ok(mut tasks) = self.battle_tasks.lock() {
            if !handle.is_finished() {
                tasks.insert(battle_id, handle);
            }
        }

        self.increment_stat(|stats| stats.battles_started += 1);
        if let Some(metrics) = &self.metrics {
            metrics.record_battle_started();
        }
        info!(
            "Battle {} scheduled for session {} with {} slots over {:?}",
            battle_id,
            session_id,
            battle.schedule.len(),
            duration
        );

        Ok(battle)
    }

    fn check_battle_gate(&self, session_id: SessionId) -> Result<(RoomId, RoomId)> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| BridgeError::internal("Failed to acquire sessions read lock"))?;
        let battles = self
            .battles
            .read()
            .map_err(|_| BridgeError::internal("Failed to acquire battles read lock"))?;
        gate(&sessions, &battles, session_id)
    }

    /// The rotation loop. Checks the cancellation flag before every slot and
    /// never broadcasts slot `n + 1` before slot `n`'s wait completes.
    async fn run_battle(&self, battle_id: BattleId, cancel: Arc<AtomicBool>, lead_in: Duration) {
        tokio::time::sleep(lead_in).await;
        if cancel.load(Ordering::SeqCst) {
            debug!("Battle {} cancelled during lead-in", battle_id);
            return;
        }

        let Some(active) = self.activate(battle_id) else {
            warn!("Battle {} vanished before it could start", battle_id);
            return;
        };

        let started = BattleStarted {
            battle_id,
            session_id: active.session_id,
            duration_ms: active.duration_ms,
            timestamp: self.clock.now(),
        };
        self.broadcast_pair(&active, events::BATTLE_STARTED, &started).await;

        for (slot_index, slot) in active.schedule.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                debug!("Battle {} cancelled before slot {}", battle_id, slot_index);
                return;
            }
            if !self.with_battle(battle_id, |battle| battle.current_slot_index = slot_index) {
                warn!("Battle {} vanished at slot {}", battle_id, slot_index);
                return;
            }

            let changed = BattleTrackChanged {
                battle_id,
                slot_index,
                room_id: slot.room_id.clone(),
                track: slot.track.clone(),
                slot_duration_ms: slot.slot_duration_ms,
                timestamp: self.clock.now(),
            };
            self.broadcast_pair(&active, events::BATTLE_TRACK_CHANGED, &changed)
                .await;
            self.record_mood_sample(battle_id, &active, &slot.room_id).await;

            tokio::time::sleep(Duration::from_millis(slot.slot_duration_ms)).await;
            if cancel.load(Ordering::SeqCst) {
                debug!("Battle {} cancelled during slot {}", battle_id, slot_index);
                return;
            }

            let passive = match self
                .collaborators
                .engagement
                .passive_engagement(&slot.room_id, &slot.track)
                .await
            {
                Ok(engagement) => engagement,
                Err(e) => {
                    warn!(
                        "Passive engagement for room {} in battle {} unavailable: {}",
                        slot.room_id, battle_id, e
                    );
                    0.0
                }
            };
            self.with_battle(battle_id, |battle| battle.add_engagement(slot.side, passive));
        }

        if cancel.load(Ordering::SeqCst) {
            return;
        }
        if let Some(last) = active.schedule.last() {
            self.record_mood_sample(battle_id, &active, &last.room_id).await;
        }

        self.finish_battle(battle_id, &active).await;
    }

    /// `Starting -> Active`, returning what the loop needs
    fn activate(&self, battle_id: BattleId) -> Option<ActiveBattle> {
        let mut table = self.battles.write().ok()?;
        let battle = table.battles.get_mut(&battle_id)?;
        if battle.status.is_terminal() {
            return None;
        }
        battle.status = BattleStatus::Active;
        battle.started_at = Some(self.clock.now());
        Some(ActiveBattle {
            session_id: battle.session_id,
            room_a: battle.room_a.clone(),
            room_b: battle.room_b.clone(),
            duration_ms: battle.duration_ms,
            schedule: battle.schedule.clone(),
        })
    }

    /// Apply `update` to a live battle. Returns false if it is gone or over.
    fn with_battle<F>(&self, battle_id: BattleId, update: F) -> bool
    where
        F: FnOnce(&mut Battle),
    {
        let Ok(mut table) = self.battles.write() else {
            return false;
        };
        match table.battles.get_mut(&battle_id) {
            Some(battle) if !battle.status.is_terminal() => {
                update(battle);
                true
            }
            _ => false,
        }
    }

    async fn record_mood_sample(&self, battle_id: BattleId, active: &ActiveBattle, room_id: &str) {
        match self
            .collaborators
            .engagement
            .sample_mood(&active.room_a, &active.room_b)
            .await
        {
            Ok(mood) => {
                let sample = MoodSample {
                    timestamp: self.clock.now(),
                    room_id: room_id.to_string(),
                    mood,
                };
                self.with_battle(battle_id, |battle| battle.stats.mood_samples.push(sample));
            }
            Err(e) => warn!("Mood sample for battle {} unavailable: {}", battle_id, e),
        }
    }

    async fn finish_battle(&self, battle_id: BattleId, active: &ActiveBattle) {
        let now = self.clock.now();
        let result: Option<BattleResult> = match self.battles.write() {
            Ok(mut table) => table
                .battles
                .get_mut(&battle_id)
                .and_then(|battle| battle.finish(now)),
            Err(_) => None,
        };

        if let Ok(mut tasks) = self.battle_tasks.lock() {
            tasks.remove(&battle_id);
        }

        let Some(result) = result else {
            warn!("Battle {} could not be finished; it was already over", battle_id);
            return;
        };

        info!(
            "Battle {} finished: room {} wins ({:.2} vs {:.2}, movement {:.3})",
            battle_id, result.winner, result.engagement_a, result.engagement_b, result.mood_movement
        );

        let finished = BattleFinished {
            battle_id,
            session_id: active.session_id,
            result: result.clone(),
            timestamp: now,
        };
        self.broadcast_pair(active, events::BATTLE_FINISHED, &finished).await;

        if let Ok(Some(session)) = self.get_session(active.session_id) {
            for room_id in [&active.room_a, &active.room_b] {
                let metadata = HashMap::from([
                    ("event".to_string(), "battle_finished".to_string()),
                    ("session_id".to_string(), active.session_id.to_string()),
                    ("battle_id".to_string(), battle_id.to_string()),
                    ("winner".to_string(), result.winner.to_string()),
                    ("mood_movement".to_string(), format!("{:.4}", result.mood_movement)),
                ]);
                self.save_snapshot(room_id, &session.blended_mood, &session.playlist, metadata)
                    .await;
            }
        }

        self.increment_stat(|stats| stats.battles_finished += 1);
        if let Some(metrics) = &self.metrics {
            metrics.record_battle_finished(result.winner, result.mood_movement);
        }
    }

    async fn broadcast_pair<T>(&self, active: &ActiveBattle, event_name: &str, event: &T)
    where
        T: Serialize + Sync,
    {
        for room_id in [&active.room_a, &active.room_b] {
            publish_or_warn(
                self.collaborators.broadcaster.as_ref(),
                room_id,
                event_name,
                event,
            )
            .await;
        }
    }

    /// Add a vote's weight to a room's engagement
    pub fn record_vote(
        &self,
        battle_id: BattleId,
        room_id: &str,
        voter: &str,
        vote: VoteKind,
    ) -> Result<()> {
        if voter.trim().is_empty() {
            return Err(BridgeError::validation("Voter must not be empty").into());
        }

        {
            let mut table = self
                .battles
                .write()
                .map_err(|_| BridgeError::internal("Failed to acquire battles write lock"))?;

            let battle = table
                .battles
                .get_mut(&battle_id)
                .ok_or_else(|| BridgeError::BattleNotFound {
                    battle_id: battle_id.to_string(),
                })?;

            if !battle.accepts_votes() {
                return Err(BridgeError::InvalidState {
                    message: format!("Battle {} is not accepting votes", battle_id),
                }
                .into());
            }

            let side = battle.side_of(room_id).ok_or_else(|| {
                BridgeError::validation(format!(
                    "Room {} is not part of battle {}",
                    room_id, battle_id
                ))
            })?;

            battle.add_engagement(side, vote.weight());
            battle.count_vote(side);
        }

        self.increment_stat(|stats| stats.votes_recorded += 1);
        if let Some(metrics) = &self.metrics {
            metrics.record_vote(vote);
        }
        debug!(
            "Vote {} from {} for room {} in battle {}",
            vote.as_str(),
            voter,
            room_id,
            battle_id
        );
        Ok(())
    }

    pub fn get_session(&self, session_id: SessionId) -> Result<Option<SharedSession>> {
        let table = self
            .sessions
            .read()
            .map_err(|_| BridgeError::internal("Failed to acquire sessions read lock"))?;
        Ok(table.sessions.get(&session_id).cloned())
    }

    /// The non-ended session a room belongs to, if any
    pub fn session_for_room(&self, room_id: &str) -> Result<Option<SharedSession>> {
        let table = self
            .sessions
            .read()
            .map_err(|_| BridgeError::internal("Failed to acquire sessions read lock"))?;
        Ok(table
            .by_room
            .get(room_id)
            .and_then(|session_id| table.sessions.get(session_id))
            .cloned())
    }

    pub fn get_battle(&self, battle_id: BattleId) -> Result<Option<Battle>> {
        let table = self
            .battles
            .read()
            .map_err(|_| BridgeError::internal("Failed to acquire battles read lock"))?;
        Ok(table.battles.get(&battle_id).cloned())
    }

    /// The latest battle of a session, finished ones included while retained
    pub fn battle_for_session(&self, session_id: SessionId) -> Result<Option<Battle>> {
        let table = self
            .battles
            .read()
            .map_err(|_| BridgeError::internal("Failed to acquire battles read lock"))?;
        Ok(table
            .by_session
            .get(&session_id)
            .and_then(|battle_id| table.battles.get(battle_id))
            .cloned())
    }

    /// Drop ended sessions and finished battles past their retention window.
    /// Returns how many sessions and battles were removed.
    pub fn cleanup_retained(&self) -> Result<(usize, usize)> {
        let now = self.clock.now();
        let session_retention = chrono_duration(self.config.session_retention());
        let battle_retention = chrono_duration(self.config.battle_retention());

        let sessions_removed = {
            let mut table = self
                .sessions
                .write()
                .map_err(|_| BridgeError::internal("Failed to acquire sessions write lock"))?;
            let before = table.sessions.len();
            table.sessions.retain(|_, session| match session.ended_at {
                Some(ended_at) => now - ended_at < session_retention,
                None => true,
            });
            before - table.sessions.len()
        };

        let battles_removed = {
            let mut table = self
                .battles
                .write()
                .map_err(|_| BridgeError::internal("Failed to acquire battles write lock"))?;
            let expired: Vec<BattleId> = table
                .battles
                .values()
                .filter(|battle| battle.status.is_terminal())
                .filter(|battle| {
                    battle
                        .finished_at
                        .is_some_and(|finished_at| now - finished_at >= battle_retention)
                })
                .map(|battle| battle.id)
                .collect();

            for battle_id in &expired {
                if let Some(battle) = table.battles.remove(battle_id) {
                    if table.by_session.get(&battle.session_id) == Some(battle_id) {
                        table.by_session.remove(&battle.session_id);
                    }
                }
            }
            expired.len()
        };

        if sessions_removed > 0 || battles_removed > 0 {
            debug!(
                "Retention cleanup removed {} sessions and {} battles",
                sessions_removed, battles_removed
            );
        }
        Ok((sessions_removed, battles_removed))
    }

    pub fn stats(&self) -> Result<SessionManagerStats> {
        let mut stats = self
            .stats
            .read()
            .map_err(|_| BridgeError::internal("Failed to acquire stats read lock"))?
            .clone();

        stats.active_sessions = self
            .sessions
            .read()
            .map_err(|_| BridgeError::internal("Failed to acquire sessions read lock"))?
            .sessions
            .values()
            .filter(|session| session.is_active())
            .count();
        stats.active_battles = self
            .battles
            .read()
            .map_err(|_| BridgeError::internal("Failed to acquire battles read lock"))?
            .battles
            .values()
            .filter(|battle| !battle.status.is_terminal())
            .count();
        Ok(stats)
    }

    /// End every live session and abort all timers and battle loops
    pub async fn shutdown(&self) -> Result<usize> {
        let active: Vec<SessionId> = {
            let table = self
                .sessions
                .read()
                .map_err(|_| BridgeError::internal("Failed to acquire sessions read lock"))?;
            table
                .sessions
                .values()
                .filter(|session| session.is_active())
                .map(|session| session.id)
                .collect()
        };

        let mut ended = 0;
        for session_id in active {
            match self.end_session(session_id, EndReason::Shutdown).await {
                Ok(_) => ended += 1,
                Err(e) => debug!("Session {} already gone at shutdown: {}", session_id, e),
            }
        }

        if let Ok(mut timers) = self.lifetime_timers.lock() {
            for (_, handle) in timers.drain() {
                handle.abort();
            }
        }
        if let Ok(mut tasks) = self.battle_tasks.lock() {
            for (_, handle) in tasks.drain() {
                handle.abort();
            }
        }

        info!("Session manager shut down, {} sessions ended", ended);
        Ok(ended)
    }

    fn increment_stat<F>(&self, update: F)
    where
        F: FnOnce(&mut SessionManagerStats),
    {
        if let Ok(mut stats) = self.stats.write() {
            update(&mut stats);
        }
    }
}

/// Battle precondition: the session is connected and has no running battle
fn gate(sessions: &SessionTable, battles: &BattleTable, session_id: SessionId) -> Result<(RoomId, RoomId)> {
    let session = sessions
        .sessions
        .get(&session_id)
        .ok_or_else(|| BridgeError::SessionNotFound {
            session_id: session_id.to_string(),
        })?;

    // Ended sessions stay readable until cleanup but cannot host a battle
    if !session.is_connected() {
        return Err(BridgeError::InvalidState {
            message: format!("Session {} is not connected", session_id),
        }
        .into());
    }

    if battles.running_for(&session_id).is_some() {
        return Err(BridgeError::BattleInProgress {
            session_id: session_id.to_string(),
        }
        .into());
    }

    Ok((session.room_a.clone(), session.room_b.clone()))
}

/// Keep typed errors as they are; wrap anything else as an upstream failure
fn upstream(collaborator: &str, error: anyhow::Error) -> anyhow::Error {
    if error.downcast_ref::<BridgeError>().is_some() {
        error
    } else {
        BridgeError::Upstream {
            collaborator: collaborator.to_string(),
            message: error.to_string(),
        }
        .into()
    }
}

fn failure_kind(error: &anyhow::Error) -> &'static str {
    match error.downcast_ref::<BridgeError>() {
        Some(BridgeError::RoomNotFound { .. }) => "room_not_found",
        Some(BridgeError::Upstream { .. }) => "upstream",
        Some(BridgeError::InvalidState { .. }) => "interrupted",
        _ => "internal",
    }
}

#[async_trait]
impl SessionConnector for SessionManager {
    async fn connect(
        &self,
        room_a: &str,
        room_b: &str,
        initiator: &str,
        options: ConnectOptions,
    ) -> Result<SessionId> {
        self.connect_rooms(room_a, room_b, initiator, options)
            .await
            .map(|session| session.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::publisher::MockEventBroadcaster;
    use crate::directory::{
        InMemoryCatalog, InMemoryRoomDirectory, InMemorySnapshotStore, MockRoomDirectory,
        MockSnapshotStore,
    };
    use crate::error::{error_kind, ErrorKind};
    use crate::mood::MoodVector;
    use crate::session::scoring::FixedEngagement;
    use crate::types::{Participant, RoomSide};

    fn tracks(prefix: &str, count: usize) -> Vec<Track> {
        (0..count)
            .map(|i| {
                Track::new(format!("{}-{}", prefix, i), format!("Song {}", i), "Artist")
                    .with_play_count(10 - i as u32)
            })
            .collect()
    }

    fn directory() -> Arc<InMemoryRoomDirectory> {
        let directory = Arc::new(InMemoryRoomDirectory::new());
        for (room_id, mood) in [("room-a", "happy"), ("room-b", "calm"), ("room-c", "sad")] {
            directory
                .upsert_room(
                    room_id,
                    RoomSnapshot {
                        participants: vec![
                            Participant::new(format!("{}-u1", room_id), mood, 0.9),
                            Participant::new(format!("{}-u2", room_id), mood, 0.8),
                        ],
                        top_tracks: tracks(room_id, 4),
                    },
                )
                .unwrap();
        }
        directory
    }

    struct Harness {
        manager: SessionManager,
        broadcaster: Arc<MockEventBroadcaster>,
        snapshots: Arc<InMemorySnapshotStore>,
    }

    fn harness_with(
        directory: Arc<dyn RoomDirectory>,
        snapshots: Arc<dyn SnapshotStore>,
        engagement: FixedEngagement,
    ) -> (SessionManager, Arc<MockEventBroadcaster>) {
        let broadcaster = Arc::new(MockEventBroadcaster::new());
        let manager = SessionManager::new(
            SessionConfig::default(),
            SessionCollaborators {
                directory,
                snapshots,
                catalog: Arc::new(InMemoryCatalog::new()),
                engagement: Arc::new(engagement),
                broadcaster: broadcaster.clone(),
            },
        );
        (manager, broadcaster)
    }

    fn harness() -> Harness {
        let snapshots = Arc::new(InMemorySnapshotStore::default());
        let (manager, broadcaster) =
            harness_with(directory(), snapshots.clone(), FixedEngagement::new());
        Harness {
            manager,
            broadcaster,
            snapshots,
        }
    }

    #[tokio::test]
    async fn test_connect_blends_and_notifies_both_rooms() {
        let h = harness();
        let session = h
            .manager
            .connect_rooms("room-a", "room-b", "alice", ConnectOptions::default())
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Connected);
        assert_eq!(session.blend_ratio, 0.5);
        assert_eq!(session.participants.len(), 4);
        assert_eq!(session.playlist.len(), 8);
        assert_eq!(h.broadcaster.count(events::ROOM_CONNECTED), 2);
        assert_eq!(h.snapshots.len(), 2);

        let events = h.broadcaster.events_for("room-a");
        assert_eq!(events[0].payload["partner_room_id"], "room-b");
        h.manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_room_cannot_join_two_sessions() {
        let h = harness();
        let session = h
            .manager
            .connect_rooms("room-a", "room-b", "alice", ConnectOptions::default())
            .await
            .unwrap();

        let err = h
            .manager
            .connect_rooms("room-a", "room-c", "bob", ConnectOptions::default())
            .await
            .unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Conflict));

        h.manager.disconnect_rooms(session.id).await.unwrap();
        assert!(h
            .manager
            .connect_rooms("room-a", "room-c", "bob", ConnectOptions::default())
            .await
            .is_ok());
        h.manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_validation_rejects_before_mutation() {
        let h = harness();
        let err = h
            .manager
            .connect_rooms("room-a", "room-a", "alice", ConnectOptions::default())
            .await
            .unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Validation));
        assert!(h.manager.session_for_room("room-a").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_room_rolls_back_reservation() {
        let h = harness();
        let err = h
            .manager
            .connect_rooms("room-a", "room-missing", "alice", ConnectOptions::default())
            .await
            .unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::NotFound));
        assert!(h.manager.session_for_room("room-a").unwrap().is_none());
        assert_eq!(h.broadcaster.events().len(), 0);
        assert_eq!(h.manager.stats().unwrap().connect_failures, 1);
    }

    #[tokio::test]
    async fn test_directory_outage_is_upstream_error() {
        let mut directory = MockRoomDirectory::new();
        directory
            .expect_get_room_snapshot()
            .returning(|_| Err(anyhow::anyhow!("connection refused")));
        let (manager, _) = harness_with(
            Arc::new(directory),
            Arc::new(InMemorySnapshotStore::default()),
            FixedEngagement::new(),
        );

        let err = manager
            .connect_rooms("room-a", "room-b", "alice", ConnectOptions::default())
            .await
            .unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Upstream));
        assert!(manager.session_for_room("room-b").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persistence_failure_is_swallowed() {
        let mut snapshots = MockSnapshotStore::new();
        snapshots
            .expect_save_snapshot()
            .returning(|_, _, _, _| Err(anyhow::anyhow!("disk full")));
        let (manager, _) = harness_with(directory(), Arc::new(snapshots), FixedEngagement::new());

        let session = manager
            .connect_rooms("room-a", "room-b", "alice", ConnectOptions::default())
            .await
            .unwrap();
        assert!(session.is_connected());
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_unknown_session() {
        let h = harness();
        let err = h
            .manager
            .disconnect_rooms(generate_session_id())
            .await
            .unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::NotFound));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_expires_after_its_lifetime() {
        let h = harness();
        let session = h
            .manager
            .connect_rooms(
                "room-a",
                "room-b",
                "alice",
                ConnectOptions {
                    duration_seconds: Some(60),
                },
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;

        let ended = h.manager.get_session(session.id).unwrap().unwrap();
        assert_eq!(ended.status, SessionStatus::Ended);
        assert_eq!(ended.end_reason, Some(EndReason::Expired));
        assert!(h.manager.session_for_room("room-a").unwrap().is_none());
        assert_eq!(h.broadcaster.count(events::ROOMS_DISCONNECTED), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_battle_runs_to_completion() {
        let h = harness();
        let session = h
            .manager
            .connect_rooms("room-a", "room-b", "alice", ConnectOptions::default())
            .await
            .unwrap();

        let battle = h
            .manager
            .start_battle(session.id, BattleOptions::default())
            .await
            .unwrap();
        assert_eq!(battle.schedule.len(), 6);
        assert_eq!(battle.status, BattleStatus::Starting);

        for _ in 0..3 {
            h.manager
                .record_vote(battle.id, "room-b", "voter", VoteKind::Fire)
                .unwrap();
        }

        tokio::time::sleep(Duration::from_secs(100)).await;

        let finished = h.manager.get_battle(battle.id).unwrap().unwrap();
        assert_eq!(finished.status, BattleStatus::Finished);
        let result = finished.result.unwrap();
        assert_eq!(result.winner, RoomSide::B);
        assert_eq!(result.engagement_b, 9.0);
        assert_eq!(h.broadcaster.count(events::BATTLE_TRACK_CHANGED), 12);
        assert_eq!(h.broadcaster.count(events::BATTLE_FINISHED), 2);
        h.manager.shutdown().await.unwrap();
    }

    fn slot_indices(broadcaster: &MockEventBroadcaster, room_id: &str) -> Vec<u64> {
        broadcaster
            .events_for(room_id)
            .iter()
            .filter(|event| event.event == events::BATTLE_TRACK_CHANGED)
            .filter_map(|event| event.payload["slot_index"].as_u64())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotation_waits_out_each_slot() {
        let samples = [0.0, 0.2, 0.3, 0.5, 0.5, 0.6, 0.8]
            .into_iter()
            .map(|valence| MoodVector::new(valence, 0.0))
            .collect();
        let (manager, broadcaster) = harness_with(
            directory(),
            Arc::new(InMemorySnapshotStore::default()),
            FixedEngagement::new().with_mood_samples(samples),
        );
        let session = manager
            .connect_rooms("room-a", "room-b", "alice", ConnectOptions::default())
            .await
            .unwrap();
        let battle = manager
            .start_battle(session.id, BattleOptions::default())
            .await
            .unwrap();
        let slot = Duration::from_millis(battle.schedule[0].slot_duration_ms);
        assert_eq!(slot, Duration::from_secs(15));

        // One second into the first slot
        tokio::time::sleep(manager.config().battle_lead_in() + Duration::from_secs(1)).await;
        assert_eq!(slot_indices(&broadcaster, "room-a"), vec![0]);
        assert_eq!(slot_indices(&broadcaster, "room-b"), vec![0]);
        assert_eq!(
            manager.get_battle(battle.id).unwrap().unwrap().status,
            BattleStatus::Active
        );

        // Just short of the first slot's end nothing new is broadcast
        tokio::time::sleep(slot - Duration::from_secs(2)).await;
        assert_eq!(slot_indices(&broadcaster, "room-a"), vec![0]);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(slot_indices(&broadcaster, "room-a"), vec![0, 1]);
        assert_eq!(slot_indices(&broadcaster, "room-b"), vec![0, 1]);

        tokio::time::sleep(slot * 5).await;
        assert_eq!(slot_indices(&broadcaster, "room-a"), vec![0, 1, 2, 3, 4, 5]);

        let finished = manager.get_battle(battle.id).unwrap().unwrap();
        assert_eq!(finished.status, BattleStatus::Finished);
        assert_eq!(finished.stats.mood_samples.len(), 7);
        let result = finished.result.unwrap();
        // Steps per slot: A 0.2, B 0.1, A 0.2, B 0.0, A 0.1, B 0.2
        assert!((result.mood_movement - 0.8).abs() < 1e-9);
        assert!((result.movement_a - 0.5).abs() < 1e-9);
        assert!((result.movement_b - 0.3).abs() < 1e-9);
        manager.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_right_after_connect_stops_lifetime_timer() {
        let h = harness();
        let session = h
            .manager
            .connect_rooms("room-a", "room-b", "alice", ConnectOptions::default())
            .await
            .unwrap();
        assert!(h.manager.lifetime_timers.lock().unwrap().contains_key(&session.id));

        h.manager.disconnect_rooms(session.id).await.unwrap();
        assert!(h.manager.lifetime_timers.lock().unwrap().is_empty());

        tokio::time::sleep(h.manager.config().session_duration() + Duration::from_secs(1)).await;
        let ended = h.manager.get_session(session.id).unwrap().unwrap();
        assert_eq!(ended.end_reason, Some(EndReason::Requested));
        assert_eq!(h.broadcaster.count(events::ROOMS_DISCONNECTED), 2);
    }

    #[tokio::test]
    async fn test_oversized_durations_rejected_without_reserving() {
        let h = harness();
        let err = h
            .manager
            .connect_rooms(
                "room-a",
                "room-b",
                "alice",
                ConnectOptions {
                    duration_seconds: Some(u64::MAX / 2),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Validation));
        assert!(h.manager.session_for_room("room-a").unwrap().is_none());
        assert!(h.manager.session_for_room("room-b").unwrap().is_none());

        let session = h
            .manager
            .connect_rooms("room-a", "room-b", "alice", ConnectOptions::default())
            .await
            .unwrap();
        let err = h
            .manager
            .start_battle(
                session.id,
                BattleOptions {
                    duration_seconds: Some(h.manager.config().max_battle_duration_seconds + 1),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Validation));
        assert!(h.manager.battle_for_session(session.id).unwrap().is_none());
        h.manager.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_battle_is_rejected_while_running() {
        let h = harness();
        let session = h
            .manager
            .connect_rooms("room-a", "room-b", "alice", ConnectOptions::default())
            .await
            .unwrap();
        h.manager
            .start_battle(session.id, BattleOptions::default())
            .await
            .unwrap();

        let err = h
            .manager
            .start_battle(session.id, BattleOptions::default())
            .await
            .unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Conflict));
        h.manager.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_battle_loop() {
        let h = harness();
        let session = h
            .manager
            .connect_rooms("room-a", "room-b", "alice", ConnectOptions::default())
            .await
            .unwrap();
        let battle = h
            .manager
            .start_battle(session.id, BattleOptions::default())
            .await
            .unwrap();

        // Past the lead-in and into the first slot
        tokio::time::sleep(Duration::from_secs(5)).await;
        h.manager.disconnect_rooms(session.id).await.unwrap();
        let slots_seen = h.broadcaster.count(events::BATTLE_TRACK_CHANGED);

        tokio::time::sleep(Duration::from_secs(120)).await;

        let cancelled = h.manager.get_battle(battle.id).unwrap().unwrap();
        assert_eq!(cancelled.status, BattleStatus::Cancelled);
        assert!(cancelled.result.is_none());
        assert_eq!(h.broadcaster.count(events::BATTLE_TRACK_CHANGED), slots_seen);
        assert_eq!(h.broadcaster.count(events::BATTLE_FINISHED), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_votes_rejected_for_foreign_room() {
        let h = harness();
        let session = h
            .manager
            .connect_rooms("room-a", "room-b", "alice", ConnectOptions::default())
            .await
            .unwrap();
        let battle = h
            .manager
            .start_battle(session.id, BattleOptions::default())
            .await
            .unwrap();

        let err = h
            .manager
            .record_vote(battle.id, "room-c", "voter", VoteKind::Up)
            .unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::Validation));

        let err = h
            .manager
            .record_vote(generate_battle_id(), "room-a", "voter", VoteKind::Up)
            .unwrap_err();
        assert_eq!(error_kind(&err), Some(ErrorKind::NotFound));
        h.manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_retention_cleanup() {
        let h = harness();
        let session = h
            .manager
            .connect_rooms("room-a", "room-b", "alice", ConnectOptions::default())
            .await
            .unwrap();
        h.manager.disconnect_rooms(session.id).await.unwrap();

        assert_eq!(h.manager.cleanup_retained().unwrap(), (0, 0));
        assert!(h.manager.get_session(session.id).unwrap().is_some());

        let clock = Arc::new(crate::utils::ManualClock::new(
            chrono::Utc::now() + chrono::Duration::minutes(10),
        ));
        let later = h.manager.clone().with_clock(clock);
        assert_eq!(later.cleanup_retained().unwrap(), (1, 0));
        assert!(h.manager.get_session(session.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_ends_live_sessions() {
        let h = harness();
        h.manager
            .connect_rooms("room-a", "room-b", "alice", ConnectOptions::default())
            .await
            .unwrap();

        assert_eq!(h.manager.shutdown().await.unwrap(), 1);
        assert_eq!(h.manager.stats().unwrap().active_sessions, 0);
        assert!(h.manager.session_for_room("room-a").unwrap().is_none());
    }
}
