use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Recorded once per (session, hint). Re-requesting a revealed hint is a
/// read, not a second usage event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HintUsage {
    #[serde(rename = "_id")]
    pub id: String,
    pub session_id: String,
    pub problem_numeric_id: i64,
    pub hint_id: String,
    pub revealed_at: DateTime<Utc>,
}

impl HintUsage {
    pub fn doc_id(session_id: &str, hint_id: &str) -> String {
        format!("{}:{}", session_id, hint_id)
    }
}

/// A hint as presented to the session: content withheld while locked.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HintView {
    pub id: String,
    pub hint_order: u32,
    pub hint_type: String,
    pub locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Attempts still needed before this hint unlocks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unlocks_after_attempts: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HintListResponse {
    pub problem_numeric_id: i64,
    pub attempts_count: u32,
    pub hints: Vec<HintView>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealHintRequest {
    pub hint_id: String,
}
