use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::config::Config;

/// The persisted aggregate. Field names on disk follow the original data file
/// (`totalLies`, `lastLieAt`); the generic names are accepted as aliases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LieState {
    #[serde(
        rename = "totalLies",
        alias = "totalCount",
        deserialize_with = "null_as_default"
    )]
    pub total_count: u64,
    #[serde(rename = "lastLieAt", alias = "lastEventAt")]
    pub last_event_at: Option<i64>,
    #[serde(rename = "longestGapMs", deserialize_with = "null_as_default")]
    pub longest_gap_ms: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub users: BTreeMap<String, u64>,
}

impl LieState {
    /// Drops tally rows that could only come from hand edits: zero counts and blank names.
    /// Drops zero-count and blank-name tallies. Counts dropped with a blank name
    /// come off the total too.
    fn normalize(&mut self) {
        let mut dropped: u64 = 0;
        self.users.retain(|name, count| {
            let keep = *count > 0 && !name.trim().is_empty();
            if !keep {
                dropped = dropped.saturating_add(*count);
            }
            keep
        });
        self.total_count = self.total_count.saturating_sub(dropped);
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, thiserror::Error)]
pub enum StateStoreError {
    #[error("{message}")]
    Persistence { message: String },
}

/// Whole-file JSON store for [`LieState`].
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.data_path.clone())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the state file. Missing, unreadable or malformed files yield the empty state.
    pub async fn load(&self) -> LieState {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(value) => value,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return LieState::default();
            }
            Err(error) => {
                tracing::warn!(
                    target: "lie_tracker.state_store",
                    path = %self.path.display(),
                    error = %error,
                    "failed to read state file; starting from empty state",
                );
                return LieState::default();
            }
        };

        match serde_json::from_str::<LieState>(&raw) {
            Ok(mut state) => {
                state.normalize();
                state
            }
            Err(error) => {
                tracing::warn!(
                    target: "lie_tracker.state_store",
                    path = %self.path.display(),
                    error = %error,
                    "failed to parse state file; starting from empty state",
                );
                LieState::default()
            }
        }
    }

    /// Replaces the state file with `state`. The payload is written to a temporary
    /// sibling first and renamed into place.
    pub async fn save(&self, state: &LieState) -> Result<(), StateStoreError> {
        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|error| StateStoreError::Persistence {
                    message: format!("failed to prepare state directory: {error}"),
                })?;
        }

        let payload =
            serde_json::to_vec_pretty(state).map_err(|error| StateStoreError::Persistence {
                message: format!("failed to encode state payload: {error}"),
            })?;

        let temp_path = self
            .path
            .with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        if let Err(error) = tokio::fs::write(&temp_path, payload).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(StateStoreError::Persistence {
                message: format!("failed to write state payload: {error}"),
            });
        }

        if let Err(error) = tokio::fs::rename(&temp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(StateStoreError::Persistence {
                message: format!("failed to finalize state payload: {error}"),
            });
        }

        Ok(())
    }
}
