use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::Config;
use crate::gap::{GapPolicy, compute_gap_ms};
use crate::leaderboard::{LeaderboardEntry, rank};
use crate::state_store::{LieState, StateStore, StateStoreError};

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("{field}: {message}")]
    InvalidInput {
        field: &'static str,
        message: String,
    },
    #[error("{message}")]
    Persistence { message: String },
}

impl From<StateStoreError> for TrackerError {
    fn from(error: StateStoreError) -> Self {
        match error {
            StateStoreError::Persistence { message } => Self::Persistence { message },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerSnapshot {
    pub state: LieState,
    pub leaderboard: Vec<LeaderboardEntry>,
}

/// Applies lie events to the persisted state. Sole writer of its [`StateStore`].
#[derive(Clone)]
pub struct LieTracker {
    store: StateStore,
    gap_policy: GapPolicy,
    leaderboard_limit: usize,
    write_lock: Arc<Mutex<()>>,
}

impl LieTracker {
    pub fn new(store: StateStore, gap_policy: GapPolicy, leaderboard_limit: usize) -> Self {
        Self {
            store,
            gap_policy,
            leaderboard_limit,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            StateStore::from_config(config),
            config.gap_policy(),
            config.leaderboard_limit,
        )
    }

    pub fn gap_policy(&self) -> &GapPolicy {
        &self.gap_policy
    }

    /// Records one lie for `username` at `now_ms` (epoch milliseconds).
    ///
    /// The whole load, mutate and save cycle runs under one lock, so concurrent
    /// submissions are applied one after another. When the save fails nothing is
    /// committed and the caller must treat the event as not recorded.
    pub async fn record_lie(
        &self,
        username: &str,
        now_ms: i64,
    ) -> Result<TrackerSnapshot, TrackerError> {
        let username = normalize_username(username)?;

        let _guard = self.write_lock.lock().await;
        let mut state = self.store.load().await;
        let gap_ms = compute_gap_ms(state.last_event_at, now_ms, &self.gap_policy);

        let count = state.users.entry(username.clone()).or_insert(0);
        *count = count.saturating_add(1);
        let user_count = *count;
        state.total_count = state.total_count.saturating_add(1);
        state.last_event_at = Some(now_ms);
        state.longest_gap_ms = state.longest_gap_ms.max(gap_ms);

        if let Err(error) = self.store.save(&state).await {
            tracing::error!(
                target: "lie_tracker.tracker",
                path = %self.store.path().display(),
                username = %username,
                error = %error,
                "failed to persist lie; event not recorded",
            );
            return Err(error.into());
        }

        tracing::info!(
            target: "lie_tracker.tracker",
            username = %username,
            user_count,
            total_count = state.total_count,
            gap_ms,
            gap_policy = self.gap_policy.name(),
            "recorded lie",
        );

        let leaderboard = rank(&state.users, self.leaderboard_limit);
        Ok(TrackerSnapshot { state, leaderboard })
    }

    /// Current state and leaderboard; never writes.
    pub async fn snapshot(&self) -> TrackerSnapshot {
        let state = self.store.load().await;
        let leaderboard = rank(&state.users, self.leaderboard_limit);
        TrackerSnapshot { state, leaderboard }
    }
}

fn normalize_username(value: &str) -> Result<String, TrackerError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(TrackerError::InvalidInput {
            field: "username",
            message: "Username required".to_string(),
        });
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::FixedOffset;

    use super::*;
    use crate::gap::{WorkWindow, WorkdayZone};

    const HOUR_MS: i64 = 60 * 60 * 1000;
    // 2024-03-05T00:00:00Z
    const DAY_START_MS: i64 = 1_709_596_800_000;

    fn tracker_at(path: std::path::PathBuf, policy: GapPolicy) -> LieTracker {
        LieTracker::new(StateStore::new(path), policy, 10)
    }

    fn sum_of_users(state: &LieState) -> u64 {
        state.users.values().sum()
    }

    #[tokio::test]
    async fn totals_track_every_recorded_lie() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tracker = tracker_at(temp.path().join("data.json"), GapPolicy::Raw);

        let names = ["ann", "bob", "ann", " cid ", "ann", "bob"];
        let mut now = DAY_START_MS;
        let mut last = None;
        for name in names {
            now += 1_000;
            last = Some(tracker.record_lie(name, now).await.expect("record lie"));
        }

        let snapshot = last.expect("snapshot");
        assert_eq!(snapshot.state.total_count, names.len() as u64);
        assert_eq!(sum_of_users(&snapshot.state), snapshot.state.total_count);
        assert_eq!(
            snapshot.state.users,
            BTreeMap::from([
                ("ann".to_string(), 3),
                ("bob".to_string(), 2),
                ("cid".to_string(), 1),
            ])
        );
        assert_eq!(snapshot.state.last_event_at, Some(now));
        assert_eq!(snapshot.leaderboard[0].name, "ann");
        assert_eq!(snapshot.leaderboard[2].name, "cid");
    }

    #[tokio::test]
    async fn longest_gap_never_shrinks() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tracker = tracker_at(temp.path().join("data.json"), GapPolicy::Raw);

        let times = [0, 5_000, 6_000, 60_000, 61_000];
        let mut previous_longest = 0;
        for offset in times {
            let snapshot = tracker
                .record_lie("ann", DAY_START_MS + offset)
                .await
                .expect("record lie");
            assert!(snapshot.state.longest_gap_ms >= previous_longest);
            previous_longest = snapshot.state.longest_gap_ms;
        }
        assert_eq!(previous_longest, 54_000);
    }

    #[tokio::test]
    async fn first_lie_has_no_gap() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tracker = tracker_at(temp.path().join("data.json"), GapPolicy::Raw);
        let snapshot = tracker.record_lie("ann", DAY_START_MS).await.expect("record");
        assert_eq!(snapshot.state.longest_gap_ms, 0);
        assert_eq!(snapshot.state.total_count, 1);
    }

    #[tokio::test]
    async fn workday_policy_drives_longest_gap() {
        let temp = tempfile::tempdir().expect("tempdir");
        let policy = GapPolicy::Workday {
            window: WorkWindow::default(),
            zone: WorkdayZone::Fixed(FixedOffset::east_opt(0).expect("utc offset")),
        };
        let tracker = tracker_at(temp.path().join("data.json"), policy);

        tracker
            .record_lie("ann", DAY_START_MS + 16 * HOUR_MS)
            .await
            .expect("record");
        let snapshot = tracker
            .record_lie("bob", DAY_START_MS + 33 * HOUR_MS)
            .await
            .expect("record");
        assert_eq!(snapshot.state.longest_gap_ms, (2 * HOUR_MS) as u64);
    }

    #[tokio::test]
    async fn blank_username_is_rejected_without_writing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("data.json");
        let tracker = tracker_at(path.clone(), GapPolicy::Raw);

        for name in ["", "   ", "\t\n"] {
            let result = tracker.record_lie(name, DAY_START_MS).await;
            assert!(matches!(
                result,
                Err(TrackerError::InvalidInput {
                    field: "username",
                    ..
                })
            ));
        }
        assert!(!path.exists());

        tracker.record_lie("ann", DAY_START_MS).await.expect("record");
        let before = tracker.snapshot().await;
        let result = tracker.record_lie("  ", DAY_START_MS + 1).await;
        assert!(result.is_err());
        assert_eq!(tracker.snapshot().await, before);
    }

    #[tokio::test]
    async fn snapshot_is_read_only_and_repeatable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("data.json");
        let tracker = tracker_at(path.clone(), GapPolicy::Raw);

        let empty = tracker.snapshot().await;
        assert_eq!(empty.state, LieState::default());
        assert!(empty.leaderboard.is_empty());
        assert!(!path.exists());

        tracker.record_lie("ann", DAY_START_MS).await.expect("record");
        let first = tracker.snapshot().await;
        let second = tracker.snapshot().await;
        assert_eq!(first, second);
        assert_eq!(first.state.total_count, 1);
    }

    #[tokio::test]
    async fn state_survives_a_new_tracker_instance() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("data.json");

        tracker_at(path.clone(), GapPolicy::Raw)
            .record_lie("ann", DAY_START_MS)
            .await
            .expect("record");
        let restored = tracker_at(path, GapPolicy::Raw)
            .record_lie("ann", DAY_START_MS + 2_000)
            .await
            .expect("record");

        assert_eq!(restored.state.total_count, 2);
        assert_eq!(restored.state.users.get("ann"), Some(&2));
        assert_eq!(restored.state.longest_gap_ms, 2_000);
    }

    #[tokio::test]
    async fn failed_save_reports_persistence_error_and_commits_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let blocker = temp.path().join("blocker");
        std::fs::write(&blocker, "not a directory").expect("write");
        let tracker = tracker_at(blocker.join("data.json"), GapPolicy::Raw);

        let result = tracker.record_lie("ann", DAY_START_MS).await;
        assert!(matches!(result, Err(TrackerError::Persistence { .. })));
        assert_eq!(tracker.snapshot().await.state, LieState::default());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_lies_are_not_lost() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tracker = tracker_at(temp.path().join("data.json"), GapPolicy::Raw);

        let mut handles = Vec::new();
        for index in 0..32_i64 {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                let name = if index % 2 == 0 { "ann" } else { "bob" };
                tracker.record_lie(name, DAY_START_MS + index).await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("record lie");
        }

        let snapshot = tracker.snapshot().await;
        assert_eq!(snapshot.state.total_count, 32);
        assert_eq!(snapshot.state.users.get("ann"), Some(&16));
        assert_eq!(snapshot.state.users.get("bob"), Some(&16));
    }
}
