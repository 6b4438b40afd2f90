use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::verdict::{ErrorAnalysis, Row};
use super::Dialect;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteSqlRequest {
    pub sql: String,
    pub dialect: Dialect,
    pub problem_numeric_id: i64,
}

/// Envelope shape shared by success and failure responses.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteSqlResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ExecuteSqlData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_analysis: Option<ErrorAnalysis>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteSqlData {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub row_count: usize,
    pub truncated: bool,
    pub execution_time_ms: u64,
    pub is_correct: bool,
    pub feedback: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Correct,
    Incorrect,
    ExecutionError,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Correct => "correct",
            AttemptOutcome::Incorrect => "incorrect",
            AttemptOutcome::ExecutionError => "execution_error",
        }
    }
}

/// Out-of-band attempt report, for clients that executed elsewhere.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordAttemptRequest {
    pub problem_numeric_id: i64,
    pub dialect: Dialect,
    #[serde(default)]
    pub sql: String,
    pub is_correct: bool,
    #[serde(default)]
    pub execution_time_ms: u64,
}

/// Immutable ledger entry. Aggregates are always recomputable from these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub problem_numeric_id: i64,
    pub dialect: Dialect,
    pub sql: String,
    pub outcome: AttemptOutcome,
    pub execution_time_ms: u64,
    pub hint_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub attempted_at: DateTime<Utc>,
}
