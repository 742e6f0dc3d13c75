use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::error::Category;

use crate::leaderboard::LeaderboardEntry;
use crate::tracker::TrackerSnapshot;

pub const ROUTE_STATE: &str = "/api/state";
pub const ROUTE_LIE: &str = "/api/lie";

pub const MESSAGE_USERNAME_REQUIRED: &str = "Username required";
pub const MESSAGE_INVALID_JSON: &str = "Invalid JSON body";
pub const MESSAGE_INVALID_PAYLOAD: &str = "Invalid request payload";
pub const MESSAGE_RECORD_FAILED: &str = "Failed to record lie";
pub const MESSAGE_NOT_FOUND: &str = "Not found";
pub const MESSAGE_FORBIDDEN: &str = "Forbidden";

/// Body of `GET /api/state` and `POST /api/lie`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateResponse {
    pub total_count: u64,
    pub last_event_at: Option<i64>,
    pub longest_gap_ms: u64,
    pub users: BTreeMap<String, u64>,
    pub leaderboard: Vec<LeaderboardEntry>,
}

impl StateResponse {
    pub fn from_snapshot(snapshot: TrackerSnapshot) -> Self {
        let TrackerSnapshot { state, leaderboard } = snapshot;
        Self {
            total_count: state.total_count,
            last_event_at: state.last_event_at,
            longest_gap_ms: state.longest_gap_ms,
            users: state.users,
            leaderboard,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordLieRequest {
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadError {
    /// Body is not valid JSON.
    Syntax,
    /// Valid JSON, but not a `{"username": "..."}` object.
    Shape,
}

impl PayloadError {
    pub fn message(self) -> &'static str {
        match self {
            Self::Syntax => MESSAGE_INVALID_JSON,
            Self::Shape => MESSAGE_INVALID_PAYLOAD,
        }
    }
}

/// Decodes a `POST /api/lie` body. A blank body counts as `{}`.
pub fn parse_record_lie_request(body: &[u8]) -> Result<RecordLieRequest, PayloadError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(RecordLieRequest::default());
    }

    serde_json::from_slice::<RecordLieRequest>(body).map_err(|error| match error.classify() {
        Category::Data => PayloadError::Shape,
        Category::Io | Category::Syntax | Category::Eof => PayloadError::Syntax,
    })
}
