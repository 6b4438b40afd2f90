use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::attempt::{AttemptOutcome, AttemptRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    NotStarted,
    InProgress,
    Completed,
}

/// Per-(session, problem) aggregate folded from the attempts ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemProgress {
    #[serde(rename = "_id")]
    pub id: String,
    pub session_id: String,
    pub problem_numeric_id: i64,
    pub status: ProgressStatus,
    pub attempts_count: u32,
    pub first_attempt_at: DateTime<Utc>,
    pub last_attempt_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_execution_time_ms: Option<u64>,
    pub hint_used: bool,
}

impl ProblemProgress {
    pub fn doc_id(session_id: &str, problem_numeric_id: i64) -> String {
        format!("{}:{}", session_id, problem_numeric_id)
    }

    fn new(attempt: &AttemptRecord) -> Self {
        Self {
            id: Self::doc_id(&attempt.session_id, attempt.problem_numeric_id),
            session_id: attempt.session_id.clone(),
            problem_numeric_id: attempt.problem_numeric_id,
            status: ProgressStatus::InProgress,
            attempts_count: 0,
            first_attempt_at: attempt.attempted_at,
            last_attempt_at: attempt.attempted_at,
            completed_at: None,
            best_execution_time_ms: None,
            hint_used: false,
        }
    }

    /// Fold one attempt into the aggregate. Status never moves backwards:
    /// a wrong attempt after a solve leaves the problem completed.
    pub fn apply(&mut self, attempt: &AttemptRecord) {
        self.attempts_count += 1;
        self.last_attempt_at = attempt.attempted_at;
        if attempt.attempted_at < self.first_attempt_at {
            self.first_attempt_at = attempt.attempted_at;
        }
        if attempt.hint_used {
            self.hint_used = true;
        }

        if attempt.outcome == AttemptOutcome::Correct {
            if self.status != ProgressStatus::Completed {
                self.status = ProgressStatus::Completed;
                self.completed_at = Some(attempt.attempted_at);
            }
            let better = self
                .best_execution_time_ms
                .is_none_or(|best| attempt.execution_time_ms < best);
            if better {
                self.best_execution_time_ms = Some(attempt.execution_time_ms);
            }
        }
    }

    /// Rebuild the aggregate from scratch. Attempts are folded in ledger
    /// order, so replay after a backfill yields the same document.
    pub fn replay<'a>(attempts: impl IntoIterator<Item = &'a AttemptRecord>) -> Option<Self> {
        let mut progress: Option<Self> = None;
        for attempt in attempts {
            let p = progress.get_or_insert_with(|| Self::new(attempt));
            p.apply(attempt);
        }
        progress
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressOverview {
    pub session_id: String,
    pub total_problems: u64,
    pub completed: u64,
    pub in_progress: u64,
    pub completion_rate: f64,
    pub total_attempts: u64,
    pub current_streak_days: u32,
    pub longest_streak_days: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub session_id: String,
    pub completed: u64,
    pub total_attempts: u64,
    pub rank: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Dialect;
    use chrono::TimeZone;

    fn attempt(outcome: AttemptOutcome, hour: u32, time_ms: u64, hint: bool) -> AttemptRecord {
        AttemptRecord {
            id: format!("a{}", hour),
            session_id: "s1".into(),
            user_id: None,
            problem_numeric_id: 7,
            dialect: Dialect::Postgresql,
            sql: "SELECT 1".into(),
            outcome,
            execution_time_ms: time_ms,
            hint_used: hint,
            error_kind: None,
            attempted_at: Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap(),
        }
    }

    #[test]
    fn completion_is_monotonic() {
        let attempts = vec![
            attempt(AttemptOutcome::Incorrect, 1, 50, false),
            attempt(AttemptOutcome::Correct, 2, 40, false),
            attempt(AttemptOutcome::Incorrect, 3, 60, false),
        ];
        let p = ProblemProgress::replay(&attempts).unwrap();
        assert_eq!(p.status, ProgressStatus::Completed);
        assert_eq!(p.attempts_count, 3);
        assert_eq!(
            p.completed_at,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 2, 0, 0).unwrap())
        );
    }

    #[test]
    fn best_time_only_tracks_correct_attempts() {
        let attempts = vec![
            attempt(AttemptOutcome::Incorrect, 1, 5, false),
            attempt(AttemptOutcome::Correct, 2, 40, false),
            attempt(AttemptOutcome::Correct, 3, 25, false),
        ];
        let p = ProblemProgress::replay(&attempts).unwrap();
        assert_eq!(p.best_execution_time_ms, Some(25));
    }

    #[test]
    fn hint_flag_is_sticky() {
        let attempts = vec![
            attempt(AttemptOutcome::Incorrect, 1, 50, true),
            attempt(AttemptOutcome::Correct, 2, 40, false),
        ];
        let p = ProblemProgress::replay(&attempts).unwrap();
        assert!(p.hint_used);
    }

    #[test]
    fn completed_at_keeps_first_solve() {
        let attempts = vec![
            attempt(AttemptOutcome::Correct, 2, 40, false),
            attempt(AttemptOutcome::Correct, 5, 30, false),
        ];
        let p = ProblemProgress::replay(&attempts).unwrap();
        assert_eq!(
            p.completed_at,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 2, 0, 0).unwrap())
        );
    }

    #[test]
    fn replay_of_nothing_is_none() {
        assert!(ProblemProgress::replay(&[]).is_none());
    }
}
