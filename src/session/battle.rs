//! Battle state machine: rotation schedule, engagement tally and result

use crate::mood::MoodVector;
use crate::types::{BattleId, RoomId, RoomSide, SessionId, Track};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// `Starting -> Active -> Finished`, or `Cancelled` when the session ends
/// mid-battle. `Finished` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BattleStatus {
    Starting,
    Active,
    Finished,
    Cancelled,
}

impl BattleStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BattleStatus::Finished | BattleStatus::Cancelled)
    }
}

/// One entry of the rotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleSlot {
    pub track: Track,
    pub room_id: RoomId,
    pub side: RoomSide,
    pub slot_duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodSample {
    pub timestamp: DateTime<Utc>,
    /// Room whose track was playing when the sample was taken
    pub room_id: RoomId,
    pub mood: MoodVector,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BattleStats {
    pub engagement_a: f64,
    pub engagement_b: f64,
    pub votes_a: u32,
    pub votes_b: u32,
    pub mood_samples: Vec<MoodSample>,
}

/// Outcome of a finished battle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleResult {
    pub winner: RoomSide,
    pub engagement_a: f64,
    pub engagement_b: f64,
    /// Engagement was exactly equal; room A wins ties
    pub tie: bool,
    /// Distance between the first and last mood samples
    pub mood_movement: f64,
    pub movement_a: f64,
    pub movement_b: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Battle {
    pub id: BattleId,
    pub session_id: SessionId,
    pub room_a: RoomId,
    pub room_b: RoomId,
    pub status: BattleStatus,
    pub duration_ms: u64,
    pub schedule: Vec<BattleSlot>,
    pub current_slot_index: usize,
    pub stats: BattleStats,
    pub result: Option<BattleResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    cancelled: Arc<AtomicBool>,
}

impl Battle {
    pub fn new(
        id: BattleId,
        session_id: SessionId,
        room_a: RoomId,
        room_b: RoomId,
        duration: Duration,
        schedule: Vec<BattleSlot>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            session_id,
            room_a,
            room_b,
            status: BattleStatus::Starting,
            duration_ms: duration.as_millis() as u64,
            schedule,
            current_slot_index: 0,
            stats: BattleStats::default(),
            result: None,
            created_at: now,
            started_at: None,
            finished_at: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn side_of(&self, room_id: &str) -> Option<RoomSide> {
        if self.room_a == room_id {
            Some(RoomSide::A)
        } else if self.room_b == room_id {
            Some(RoomSide::B)
        } else {
            None
        }
    }

    /// Whether votes are currently accepted
    pub fn accepts_votes(&self) -> bool {
        matches!(self.status, BattleStatus::Starting | BattleStatus::Active)
    }

    pub fn add_engagement(&mut self, side: RoomSide, delta: f64) {
        match side {
            RoomSide::A => self.stats.engagement_a += delta,
            RoomSide::B => self.stats.engagement_b += delta,
        }
    }

    pub fn count_vote(&mut self, side: RoomSide) {
        match side {
            RoomSide::A => self.stats.votes_a += 1,
            RoomSide::B => self.stats.votes_b += 1,
        }
    }

    /// Shared cancellation flag checked by the rotation loop
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Raise the cancellation flag and mark the battle cancelled, unless it
    /// already reached a terminal state
    pub(crate) fn cancel(&mut self, now: DateTime<Utc>) -> bool {
        self.cancelled.store(true, Ordering::SeqCst);
        if self.status.is_terminal() {
            return false;
        }
        self.status = BattleStatus::Cancelled;
        self.finished_at = Some(now);
        true
    }

    /// Compute the result and move to `Finished`
    pub(crate) fn finish(&mut self, now: DateTime<Utc>) -> Option<BattleResult> {
        if self.status.is_terminal() {
            return None;
        }
        let result = compute_result(&self.stats, &self.room_a);
        self.status = BattleStatus::Finished;
        self.finished_at = Some(now);
        self.result = Some(result.clone());
        Some(result)
    }
}

/// Alternate the two rooms' tracks A, B, A, B... and split `total` evenly
/// across the slots. A room with fewer tracks simply runs out first.
pub fn build_schedule(
    room_a: &str,
    tracks_a: &[Track],
    room_b: &str,
    tracks_b: &[Track],
    total: Duration,
) -> Vec<BattleSlot> {
    let count = tracks_a.len() + tracks_b.len();
    if count == 0 {
        return Vec::new();
    }
    let slot_duration_ms = (total.as_millis() / count as u128) as u64;

    let mut schedule = Vec::with_capacity(count);
    for i in 0..tracks_a.len().max(tracks_b.len()) {
        if let Some(track) = tracks_a.get(i) {
            schedule.push(BattleSlot {
                track: track.clone(),
                room_id: room_a.to_string(),
                side: RoomSide::A,
                slot_duration_ms,
            });
        }
        if let Some(track) = tracks_b.get(i) {
            schedule.push(BattleSlot {
                track: track.clone(),
                room_id: room_b.to_string(),
                side: RoomSide::B,
                slot_duration_ms,
            });
        }
    }
    schedule
}

/// Winner by total engagement with room A taking ties. Movement between
/// consecutive samples goes to the room whose track was playing at the
/// earlier sample.
pub fn compute_result(stats: &BattleStats, room_a: &str) -> BattleResult {
    let tie = stats.engagement_a == stats.engagement_b;
    let winner = if stats.engagement_a >= stats.engagement_b {
        RoomSide::A
    } else {
        RoomSide::B
    };

    let samples = &stats.mood_samples;
    let mood_movement = match (samples.first(), samples.last()) {
        (Some(first), Some(last)) => first.mood.distance(&last.mood),
        _ => 0.0,
    };

    let mut movement_a = 0.0;
    let mut movement_b = 0.0;
    for pair in samples.windows(2) {
        let step = pair[0].mood.distance(&pair[1].mood);
        if pair[0].room_id == room_a {
            movement_a += step;
        } else {
            movement_b += step;
        }
    }

    BattleResult {
        winner,
        engagement_a: stats.engagement_a,
        engagement_b: stats.engagement_b,
        tie,
        mood_movement,
        movement_a,
        movement_b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{generate_battle_id, generate_session_id};

    fn tracks(prefix: &str, count: usize) -> Vec<Track> {
        (0..count)
            .map(|i| Track::new(format!("{}-{}", prefix, i), "Song", "Artist"))
            .collect()
    }

    fn sample(room_id: &str, valence: f64) -> MoodSample {
        MoodSample {
            timestamp: Utc::now(),
            room_id: room_id.to_string(),
            mood: MoodVector::new(valence, 0.0),
        }
    }

    #[test]
    fn test_schedule_alternates_and_splits_duration() {
        let schedule = build_schedule(
            "room-a",
            &tracks("a", 3),
            "room-b",
            &tracks("b", 3),
            Duration::from_secs(90),
        );
        let sides: Vec<_> = schedule.iter().map(|slot| slot.side).collect();
        assert_eq!(
            sides,
            vec![RoomSide::A, RoomSide::B, RoomSide::A, RoomSide::B, RoomSide::A, RoomSide::B]
        );
        assert!(schedule.iter().all(|slot| slot.slot_duration_ms == 15_000));
    }

    #[test]
    fn test_schedule_with_uneven_tracks() {
        let schedule = build_schedule(
            "room-a",
            &tracks("a", 1),
            "room-b",
            &tracks("b", 3),
            Duration::from_secs(40),
        );
        let ids: Vec<_> = schedule.iter().map(|slot| slot.track.id.as_str()).collect();
        assert_eq!(ids, vec!["a-0", "b-0", "b-1", "b-2"]);
        assert_eq!(schedule[0].slot_duration_ms, 10_000);
    }

    #[test]
    fn test_empty_schedule() {
        assert!(build_schedule("a", &[], "b", &[], Duration::from_secs(90)).is_empty());
    }

    #[test]
    fn test_room_a_wins_ties() {
        let stats = BattleStats {
            engagement_a: 2.0,
            engagement_b: 2.0,
            ..BattleStats::default()
        };
        let result = compute_result(&stats, "room-a");
        assert_eq!(result.winner, RoomSide::A);
        assert!(result.tie);
    }

    #[test]
    fn test_higher_engagement_wins() {
        let stats = BattleStats {
            engagement_a: -3.0,
            engagement_b: 1.0,
            ..BattleStats::default()
        };
        let result = compute_result(&stats, "room-a");
        assert_eq!(result.winner, RoomSide::B);
        assert!(!result.tie);
    }

    #[test]
    fn test_movement_attribution() {
        let stats = BattleStats {
            mood_samples: vec![
                sample("room-a", 0.0),
                sample("room-b", 0.5),
                sample("room-a", 0.6),
                sample("room-b", 0.2),
            ],
            ..BattleStats::default()
        };
        let result = compute_result(&stats, "room-a");
        assert!((result.movement_a - 0.9).abs() < 1e-12);
        assert!((result.movement_b - 0.1).abs() < 1e-12);
        assert!((result.mood_movement - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_cancel_and_finish_are_exclusive() {
        let now = Utc::now();
        let mut battle = Battle::new(
            generate_battle_id(),
            generate_session_id(),
            "room-a".to_string(),
            "room-b".to_string(),
            Duration::from_secs(90),
            Vec::new(),
            now,
        );
        assert!(battle.accepts_votes());
        assert!(battle.cancel(now));
        assert!(battle.is_cancelled());
        assert!(battle.finish(now).is_none());
        assert_eq!(battle.status, BattleStatus::Cancelled);
        assert!(!battle.accepts_votes());
    }
}
