use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{verdict::Row, Dialect, Difficulty};

/// A practice problem with per-dialect sandbox definitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "_id")]
    pub id: String,
    /// Stable small integer used in URLs and sandbox namespace names.
    pub numeric_id: i64,
    pub title: String,
    pub description: String,
    pub difficulty: Difficulty,
    pub category: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Expected output is compared as an ordered list unless this is set.
    #[serde(default)]
    pub unordered_compare: bool,
    pub schemas: Vec<ProblemSchema>,
    #[serde(default)]
    pub hints: Vec<ProblemHint>,
    pub created_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemSchema {
    pub dialect: Dialect,
    /// Multi-statement DDL+seed script run inside the problem namespace.
    pub setup_sql: String,
    pub solution_sql: String,
    /// Canonical result of `solution_sql`, stored at authoring time.
    pub expected_output: Vec<Row>,
}

impl Problem {
    pub fn schema_for(&self, dialect: Dialect) -> Option<&ProblemSchema> {
        self.schemas.iter().find(|s| s.dialect == dialect)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemHint {
    pub id: String,
    pub hint_order: u32,
    pub hint_type: String,
    pub content: String,
    /// Hint stays locked until the session has made this many attempts.
    pub reveal_after_attempts: u32,
}

/// Listing view without solutions or setup scripts.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemSummary {
    pub numeric_id: i64,
    pub title: String,
    pub difficulty: Difficulty,
    pub category: String,
}

impl From<&Problem> for ProblemSummary {
    fn from(p: &Problem) -> Self {
        Self {
            numeric_id: p.numeric_id,
            title: p.title.clone(),
            difficulty: p.difficulty,
            category: p.category.clone(),
        }
    }
}
