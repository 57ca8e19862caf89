//! Leaderboard engine
//!
//! In-memory ranking with exponential time-decay and crash-recoverable JSON
//! snapshots. A single coarse mutex guards the skip list, the decay settings,
//! and the clock; operations are microsecond-scale so contention stays low.
//!
//! Scores decay lazily: nothing touches an entry until a query, and queries
//! first refresh every resident score to its decayed value at the current
//! clock so the returned ordering is exactly "as if decay ran continuously".

mod decay;
mod skip_list;
mod snapshot;

pub use decay::TimeDecay;
pub use skip_list::{EntryRef, SkipList};
pub use snapshot::{SnapshotDocument, SnapshotEntry};

use std::path::Path;

use parking_lot::Mutex;

use crate::clock::unix_time_seconds;
use crate::config::LeaderboardConfig;
use crate::error::Result;

const SKIP_LIST_MAX_LEVEL: usize = 16;
const SKIP_LIST_PROBABILITY: f64 = 0.5;

/// Decayed-score changes below this threshold do not trigger a rewrite
/// during refresh.
const REFRESH_EPSILON: f64 = 1e-6;

/// Injectable time source returning whole seconds since the Unix epoch.
pub type ClockFn = Box<dyn Fn() -> i64 + Send>;

/// One ranked entry as returned by queries.
#[derive(Debug, Clone, PartialEq)]
pub struct RankEntry {
    pub user_id: String,
    pub score: f64,
    /// 1-based position
    pub rank: usize,
    pub last_update: i64,
}

struct Inner {
    skip_list: SkipList,
    decay: TimeDecay,
    max_users: usize,
    clock: ClockFn,
}

pub struct Leaderboard {
    inner: Mutex<Inner>,
}

impl Leaderboard {
    pub fn new(config: LeaderboardConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Mutex::new(Inner {
                skip_list: SkipList::new(SKIP_LIST_MAX_LEVEL, SKIP_LIST_PROBABILITY)?,
                decay: TimeDecay::new(config.decay_factor)?,
                max_users: config.max_users,
                clock: Box::new(unix_time_seconds),
            }),
        })
    }

    /// Replace the clock. Tests pin this to fixed instants.
    pub fn set_time_source<F>(&self, clock: F)
    where
        F: Fn() -> i64 + Send + 'static,
    {
        self.inner.lock().clock = Box::new(clock);
    }

    /// Seconds since epoch as seen by the engine's clock.
    pub fn current_time(&self) -> i64 {
        let inner = self.inner.lock();
        (inner.clock)()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().skip_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().skip_list.is_empty()
    }

    /// Credit (or debit, for negative `points`) a user. The resident score
    /// is decayed up to the effective timestamp before the points are added.
    /// A timestamp of zero or below means "now" per the engine clock.
    ///
    /// With a capacity configured, inserting past it evicts the worst-ranked
    /// entry other than the user just written.
    pub fn update_user(&self, user_id: &str, points: f64, timestamp: i64) {
        let mut inner = self.inner.lock();
        let now = if timestamp > 0 {
            timestamp
        } else {
            (inner.clock)()
        };

        if points == 0.0 && inner.skip_list.get(user_id).is_none() {
            return;
        }

        let new_score = match inner.skip_list.get(user_id) {
            Some(existing) => {
                inner.decay.apply(existing.score, existing.last_update, now) + points
            }
            None => points,
        };
        inner.skip_list.upsert(user_id, new_score, now);

        if inner.max_users > 0 && inner.skip_list.len() > inner.max_users {
            let victim = inner
                .skip_list
                .iter()
                .filter(|entry| entry.user_id != user_id)
                .last()
                .map(|entry| entry.user_id.to_string());
            if let Some(victim) = victim {
                inner.skip_list.erase(&victim);
                log::debug!("leaderboard evicted {} at capacity", victim);
            }
        }
    }

    /// The `min(k, len)` best entries with 1-based ranks, freshly decayed.
    pub fn get_top_users(&self, k: usize) -> Vec<RankEntry> {
        let mut inner = self.inner.lock();
        let now = (inner.clock)();
        inner.refresh_scores(now);
        inner
            .skip_list
            .iter()
            .take(k)
            .enumerate()
            .map(|(i, entry)| RankEntry {
                user_id: entry.user_id.to_string(),
                score: entry.score,
                rank: i + 1,
                last_update: entry.last_update,
            })
            .collect()
    }

    /// Rank and decayed score of one user, or `None` when absent.
    pub fn get_user_rank(&self, user_id: &str) -> Option<RankEntry> {
        let mut inner = self.inner.lock();
        let now = (inner.clock)();
        inner.refresh_scores(now);

        let rank = inner.skip_list.rank_of(user_id)?;
        let entry = inner.skip_list.get(user_id)?;
        Some(RankEntry {
            user_id: entry.user_id.to_string(),
            score: entry.score,
            rank,
            last_update: entry.last_update,
        })
    }

    /// Write the full state to `path` as a JSON snapshot.
    pub fn save_to_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let inner = self.inner.lock();
        let document = SnapshotDocument {
            decay_factor: inner.decay.factor(),
            max_users: inner.max_users as u64,
            entries: inner
                .skip_list
                .iter()
                .map(|entry| SnapshotEntry {
                    user_id: entry.user_id.to_string(),
                    score: entry.score,
                    last_update: entry.last_update,
                })
                .collect(),
        };
        document.write_to(path.as_ref())?;
        log::info!(
            "saved leaderboard snapshot: {} entries to {}",
            document.entries.len(),
            path.as_ref().display()
        );
        Ok(())
    }

    /// Replace the full state from a JSON snapshot. The engine is left
    /// untouched when the file cannot be read or parsed; entries keep their
    /// persisted scores and update times.
    pub fn load_from_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let document = SnapshotDocument::read_from(path.as_ref())?;
        let decay = TimeDecay::new(document.decay_factor)?;

        let mut inner = self.inner.lock();
        inner.decay = decay;
        inner.max_users = document.max_users as usize;
        inner.skip_list.clear();
        for entry in &document.entries {
            inner
                .skip_list
                .upsert(&entry.user_id, entry.score, entry.last_update);
        }
        log::info!(
            "loaded leaderboard snapshot: {} entries from {}",
            document.entries.len(),
            path.as_ref().display()
        );
        Ok(())
    }
}

impl Inner {
    /// Rewrite every entry whose decayed score differs materially from its
    /// stored score, preserving the ordering invariant before a read.
    fn refresh_scores(&mut self, now: i64) {
        let mut updates = Vec::new();
        for entry in self.skip_list.iter() {
            let decayed = self.decay.apply(entry.score, entry.last_update, now);
            if (decayed - entry.score).abs() > REFRESH_EPSILON || entry.last_update != now {
                updates.push((entry.user_id.to_string(), decayed));
            }
        }
        for (user_id, score) in updates {
            self.skip_list.upsert(&user_id, score, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_696_284_800;
    const DAY: i64 = 86_400;

    fn engine(decay_factor: f64, max_users: usize) -> Leaderboard {
        let board = Leaderboard::new(LeaderboardConfig {
            decay_factor,
            max_users,
        })
        .unwrap();
        board.set_time_source(|| T0);
        board
    }

    #[test]
    fn test_top_users_basic() {
        let board = engine(0.95, 10);
        board.update_user("alice", 50.0, T0);
        board.update_user("bob", 75.0, T0);
        board.update_user("carol", 30.0, T0);

        let top = board.get_top_users(2);
        assert_eq!(
            top,
            vec![
                RankEntry {
                    user_id: "bob".into(),
                    score: 75.0,
                    rank: 1,
                    last_update: T0,
                },
                RankEntry {
                    user_id: "alice".into(),
                    score: 50.0,
                    rank: 2,
                    last_update: T0,
                },
            ]
        );
    }

    #[test]
    fn test_decay_over_two_days() {
        let board = engine(0.95, 0);
        board.update_user("alice", 100.0, T0);

        board.set_time_source(|| T0 + 2 * DAY);
        let alice = board.get_user_rank("alice").unwrap();
        let expected = 100.0 * 0.95 * 0.95;
        assert!(
            (alice.score - expected).abs() / expected < 0.05,
            "score {} vs expected {}",
            alice.score,
            expected
        );
    }

    #[test]
    fn test_accumulation_decays_old_score_first() {
        let board = engine(0.5, 0);
        board.update_user("alice", 100.0, T0);
        board.update_user("alice", 10.0, T0 + DAY);

        board.set_time_source(|| T0 + DAY);
        let alice = board.get_user_rank("alice").unwrap();
        assert!((alice.score - 60.0).abs() < 1e-6, "score {}", alice.score);
    }

    #[test]
    fn test_zero_points_for_absent_user_is_noop() {
        let board = engine(0.95, 0);
        board.update_user("ghost", 0.0, T0);
        assert!(board.is_empty());
        assert!(board.get_user_rank("ghost").is_none());
    }

    #[test]
    fn test_zero_points_touches_resident_user() {
        let board = engine(0.95, 0);
        board.update_user("alice", 50.0, T0);
        board.update_user("alice", 0.0, T0 + DAY);

        board.set_time_source(|| T0 + DAY);
        let alice = board.get_user_rank("alice").unwrap();
        assert!((alice.score - 47.5).abs() < 1e-6);
        assert_eq!(alice.last_update, T0 + DAY);
    }

    #[test]
    fn test_negative_points_can_go_below_zero() {
        let board = engine(1.0, 0);
        board.update_user("alice", 10.0, T0);
        board.update_user("alice", -25.0, T0);

        let alice = board.get_user_rank("alice").unwrap();
        assert!((alice.score - -15.0).abs() < 1e-9);
    }

    #[test]
    fn test_capacity_bound_holds() {
        let board = engine(0.95, 3);
        for i in 0..10 {
            board.update_user(&format!("user-{}", i), (i * 10) as f64, T0);
            assert!(board.len() <= 3);
        }
        let top = board.get_top_users(10);
        assert_eq!(top.len(), 3);
        assert_eq!(top[0].user_id, "user-9");
    }

    #[test]
    fn test_eviction_spares_user_just_written() {
        let board = engine(0.95, 2);
        board.update_user("high", 100.0, T0);
        board.update_user("mid", 50.0, T0);
        // newcomer scores below everyone: the cap evicts "mid", not the
        // newcomer
        board.update_user("low", 10.0, T0);

        assert_eq!(board.len(), 2);
        assert!(board.get_user_rank("low").is_some());
        assert!(board.get_user_rank("mid").is_none());
        assert!(board.get_user_rank("high").is_some());
    }

    #[test]
    fn test_rank_consistency() {
        let board = engine(0.95, 0);
        for (user, points) in [("a", 5.0), ("b", 50.0), ("c", 20.0), ("d", 35.0)] {
            board.update_user(user, points, T0);
        }

        let top = board.get_top_users(usize::MAX);
        for (position, entry) in top.iter().enumerate() {
            let ranked = board.get_user_rank(&entry.user_id).unwrap();
            assert_eq!(ranked.rank, position + 1);
            assert_eq!(ranked.score, entry.score);
        }
    }

    #[test]
    fn test_ordering_strict_after_updates() {
        let board = engine(0.9, 0);
        for i in 0..200u32 {
            let user = format!("user-{:03}", i % 50);
            board.update_user(&user, ((i * 13) % 41) as f64, T0 + i as i64);
        }
        board.set_time_source(|| T0 + 300);

        let top = board.get_top_users(usize::MAX);
        for pair in top.windows(2) {
            let better = &pair[0];
            let worse = &pair[1];
            assert!(
                better.score > worse.score
                    || (better.score == worse.score && better.user_id < worse.user_id),
                "ordering violated: {:?} before {:?}",
                better,
                worse
            );
        }
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lb.json");

        let board = engine(0.95, 0);
        board.update_user("a", 10.0, T0);
        board.update_user("b", 20.0, T0);
        board.update_user("c", 30.0, T0);
        board.save_to_json(&path).unwrap();

        let restored = engine(0.95, 0);
        restored.load_from_json(&path).unwrap();

        assert_eq!(board.get_top_users(3), restored.get_top_users(3));
    }

    #[test]
    fn test_failed_load_leaves_state_intact() {
        let dir = tempfile::tempdir().unwrap();

        let board = engine(0.95, 0);
        board.update_user("alice", 50.0, T0);

        assert!(board.load_from_json(dir.path().join("missing.json")).is_err());

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "not json").unwrap();
        assert!(board.load_from_json(&bad).is_err());

        assert_eq!(board.len(), 1);
        assert_eq!(board.get_user_rank("alice").unwrap().score, 50.0);
    }

    #[test]
    fn test_load_restores_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let board = engine(0.5, 7);
        board.update_user("alice", 100.0, T0);
        board.save_to_json(&path).unwrap();

        let restored = engine(0.95, 0);
        restored.load_from_json(&path).unwrap();
        restored.set_time_source(|| T0 + DAY);

        // decay factor 0.5 must have been restored alongside the entries
        let alice = restored.get_user_rank("alice").unwrap();
        assert!((alice.score - 50.0).abs() < 1e-6, "score {}", alice.score);
    }

    #[test]
    fn test_injected_clock_drives_current_time() {
        let board = engine(0.95, 0);
        assert_eq!(board.current_time(), T0);
    }
}
