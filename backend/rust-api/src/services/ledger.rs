use anyhow::Result;
use chrono::{NaiveDate, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, to_bson, Document};
use mongodb::Collection;
use std::collections::BTreeSet;

use crate::metrics;
use crate::models::attempt::{AttemptOutcome, AttemptRecord};
use crate::models::problem::Problem;
use crate::models::progress::{
    LeaderboardEntry, ProblemProgress, ProgressOverview, ProgressStatus,
};
use crate::utils::retry::{retry_async_with_config, RetryConfig};
use crate::utils::time::{chrono_to_bson, utc_day};

use super::AppState;

fn attempts(state: &AppState) -> Collection<AttemptRecord> {
    state.mongo.collection("attempts")
}

fn progress(state: &AppState) -> Collection<ProblemProgress> {
    state.mongo.collection("problem_progress")
}

/// Append an attempt to the ledger and fold it into the per-problem
/// aggregate. The append is the durable fact; if the fold is lost it is
/// reproducible from the ledger.
pub async fn record_attempt(state: &AppState, attempt: &AttemptRecord) -> Result<ProblemProgress> {
    let coll = attempts(state);
    let inserted = retry_async_with_config(RetryConfig::aggressive(), || {
        let coll = coll.clone();
        async move { coll.insert_one(attempt).await }
    })
    .await;
    if let Err(e) = inserted {
        // A retry after a half-acknowledged write trips the unique _id;
        // the attempt is already durable in that case.
        if !e.to_string().contains("E11000") {
            return Err(e.into());
        }
    }

    metrics::ATTEMPTS_RECORDED_TOTAL
        .with_label_values(&[attempt.outcome.as_str()])
        .inc();

    let coll = progress(state);
    let mut ops = progress_updates(attempt)?.into_iter();
    // The first op creates the document when absent.
    if let Some((filter, update)) = ops.next() {
        coll.update_one(filter, update).upsert(true).await?;
    }
    for (filter, update) in ops {
        coll.update_one(filter, update).await?;
    }

    let doc_id = ProblemProgress::doc_id(&attempt.session_id, attempt.problem_numeric_id);
    coll.find_one(doc! { "_id": &doc_id })
        .await?
        .ok_or_else(|| anyhow::anyhow!("progress document missing after fold"))
}

/// Update operations folding one attempt into its progress document.
/// Each is a single server-side atomic update ($inc for the count, a
/// status write guarded against an existing completion, $min for the
/// best time), so racing submissions can interleave in any order
/// without losing counts or downgrading a completed status.
fn progress_updates(attempt: &AttemptRecord) -> Result<Vec<(Document, Document)>> {
    let doc_id = ProblemProgress::doc_id(&attempt.session_id, attempt.problem_numeric_id);
    let ts = chrono_to_bson(attempt.attempted_at);

    let mut set = doc! { "last_attempt_at": ts.clone() };
    let mut set_on_insert = doc! {
        "session_id": &attempt.session_id,
        "problem_numeric_id": attempt.problem_numeric_id,
        "status": to_bson(&ProgressStatus::InProgress)?,
        "first_attempt_at": ts.clone(),
    };
    if attempt.hint_used {
        set.insert("hint_used", true);
    } else {
        set_on_insert.insert("hint_used", false);
    }

    let mut ops = vec![(
        doc! { "_id": &doc_id },
        doc! {
            "$inc": { "attempts_count": 1 },
            "$set": set,
            "$setOnInsert": set_on_insert,
        },
    )];

    if attempt.outcome == AttemptOutcome::Correct {
        ops.push((
            doc! { "_id": &doc_id, "status": { "$ne": to_bson(&ProgressStatus::Completed)? } },
            doc! { "$set": {
                "status": to_bson(&ProgressStatus::Completed)?,
                "completed_at": ts,
            }},
        ));
        ops.push((
            doc! { "_id": &doc_id },
            doc! { "$min": { "best_execution_time_ms": attempt.execution_time_ms as i64 } },
        ));
    }
    Ok(ops)
}

/// Days with at least one solving attempt. Streaks reward solving,
/// not mere activity.
pub fn solved_days(attempts: &[AttemptRecord]) -> BTreeSet<NaiveDate> {
    attempts
        .iter()
        .filter(|a| a.outcome == AttemptOutcome::Correct)
        .map(|a| utc_day(a.attempted_at))
        .collect()
}

/// Consecutive-day streaks over a set of practice days. Returns
/// (current, longest). The current streak survives until a full
/// calendar day passes with no entry.
pub fn compute_streaks(days: &BTreeSet<NaiveDate>, today: NaiveDate) -> (u32, u32) {
    let mut longest = 0u32;
    let mut run = 0u32;
    let mut prev: Option<NaiveDate> = None;
    for &day in days {
        run = match prev {
            Some(p) if (day - p).num_days() == 1 => run + 1,
            _ => 1,
        };
        longest = longest.max(run);
        prev = Some(day);
    }

    let current = match days.iter().next_back() {
        Some(&last) if last == today || (today - last).num_days() == 1 => run,
        _ => 0,
    };
    (current, longest)
}

pub async fn overview(state: &AppState, session_id: &str) -> Result<ProgressOverview> {
    let total_problems = state
        .mongo
        .collection::<Problem>("problems")
        .count_documents(doc! { "is_active": true })
        .await?;

    let docs: Vec<ProblemProgress> = progress(state)
        .find(doc! { "session_id": session_id })
        .await?
        .try_collect()
        .await?;
    let completed = docs
        .iter()
        .filter(|p| p.status == ProgressStatus::Completed)
        .count() as u64;
    let in_progress = docs.len() as u64 - completed;
    let total_attempts = docs.iter().map(|p| p.attempts_count as u64).sum();

    let all: Vec<AttemptRecord> = attempts(state)
        .find(doc! { "session_id": session_id })
        .await?
        .try_collect()
        .await?;
    let (current_streak_days, longest_streak_days) =
        compute_streaks(&solved_days(&all), utc_day(Utc::now()));

    let completion_rate = if total_problems == 0 {
        0.0
    } else {
        completed as f64 / total_problems as f64
    };

    Ok(ProgressOverview {
        session_id: session_id.to_string(),
        total_problems,
        completed,
        in_progress,
        completion_rate,
        total_attempts,
        current_streak_days,
        longest_streak_days,
    })
}

/// Per-problem aggregates for the session, newest activity first.
pub async fn detailed(state: &AppState, session_id: &str) -> Result<Vec<ProblemProgress>> {
    let docs = progress(state)
        .find(doc! { "session_id": session_id })
        .sort(doc! { "last_attempt_at": -1 })
        .await?
        .try_collect()
        .await?;
    Ok(docs)
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub total_attempts: u64,
    pub correct: u64,
    pub incorrect: u64,
    pub execution_errors: u64,
    pub success_rate: f64,
    pub avg_attempts_to_solve: f64,
    pub active_days: u64,
}

pub async fn stats(state: &AppState, session_id: &str) -> Result<SessionStats> {
    let all: Vec<AttemptRecord> = attempts(state)
        .find(doc! { "session_id": session_id })
        .await?
        .try_collect()
        .await?;

    let total = all.len() as u64;
    let correct = count_outcome(&all, AttemptOutcome::Correct);
    let incorrect = count_outcome(&all, AttemptOutcome::Incorrect);
    let execution_errors = count_outcome(&all, AttemptOutcome::ExecutionError);

    let solved: Vec<ProblemProgress> = progress(state)
        .find(doc! { "session_id": session_id, "status": to_bson(&ProgressStatus::Completed)? })
        .await?
        .try_collect()
        .await?;
    let avg_attempts_to_solve = if solved.is_empty() {
        0.0
    } else {
        solved.iter().map(|p| p.attempts_count as f64).sum::<f64>() / solved.len() as f64
    };

    let days: BTreeSet<NaiveDate> = all.iter().map(|a| utc_day(a.attempted_at)).collect();

    Ok(SessionStats {
        total_attempts: total,
        correct,
        incorrect,
        execution_errors,
        success_rate: if total == 0 {
            0.0
        } else {
            correct as f64 / total as f64
        },
        avg_attempts_to_solve,
        active_days: days.len() as u64,
    })
}

fn count_outcome(all: &[AttemptRecord], outcome: AttemptOutcome) -> u64 {
    all.iter().filter(|a| a.outcome == outcome).count() as u64
}

/// Top sessions by solved problems. Ties broken by fewer attempts.
pub async fn leaderboard(state: &AppState, limit: i64) -> Result<Vec<LeaderboardEntry>> {
    let pipeline = vec![
        doc! { "$match": { "status": to_bson(&ProgressStatus::Completed)? } },
        doc! { "$group": {
            "_id": "$session_id",
            "completed": { "$sum": 1 },
            "total_attempts": { "$sum": "$attempts_count" },
        }},
        doc! { "$sort": { "completed": -1, "total_attempts": 1 } },
        doc! { "$limit": limit },
    ];
    let mut cursor = progress(state).aggregate(pipeline).await?;
    let mut entries = Vec::new();
    let mut rank = 0u32;
    while let Some(d) = cursor.try_next().await? {
        rank += 1;
        entries.push(LeaderboardEntry {
            session_id: d.get_str("_id").unwrap_or_default().to_string(),
            completed: d.get_i32("completed").unwrap_or_default() as u64,
            total_attempts: d
                .get_i64("total_attempts")
                .or_else(|_| d.get_i32("total_attempts").map(i64::from))
                .unwrap_or_default() as u64,
            rank,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Dialect;
    use chrono::TimeZone;

    fn days(dates: &[(i32, u32, u32)]) -> BTreeSet<NaiveDate> {
        dates
            .iter()
            .map(|&(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap())
            .collect()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn attempt_on(d: u32, outcome: AttemptOutcome) -> AttemptRecord {
        AttemptRecord {
            id: format!("a-{d}-{}", outcome.as_str()),
            session_id: "s1".into(),
            user_id: None,
            problem_numeric_id: 7,
            dialect: Dialect::Postgresql,
            sql: "SELECT 1".into(),
            outcome,
            execution_time_ms: 120,
            hint_used: false,
            error_kind: None,
            attempted_at: Utc.with_ymd_and_hms(2024, 5, d, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn solved_days_keep_only_correct_attempts() {
        let attempts = vec![
            attempt_on(1, AttemptOutcome::Correct),
            attempt_on(2, AttemptOutcome::Incorrect),
            attempt_on(2, AttemptOutcome::ExecutionError),
            attempt_on(3, AttemptOutcome::Correct),
        ];
        assert_eq!(solved_days(&attempts), days(&[(2024, 5, 1), (2024, 5, 3)]));
    }

    #[test]
    fn daily_practice_without_a_solve_earns_no_streak() {
        let attempts: Vec<AttemptRecord> = (1..=5)
            .map(|d| attempt_on(d, AttemptOutcome::Incorrect))
            .collect();
        let solved = solved_days(&attempts);
        assert!(solved.is_empty());
        assert_eq!(compute_streaks(&solved, day(2024, 5, 5)), (0, 0));
    }

    #[test]
    fn fold_increments_the_count_instead_of_rewriting_it() {
        let ops = progress_updates(&attempt_on(1, AttemptOutcome::Incorrect)).unwrap();
        assert_eq!(ops.len(), 1);
        let update = &ops[0].1;
        let inc = update.get_document("$inc").unwrap();
        assert_eq!(inc.get_i32("attempts_count").unwrap(), 1);
        assert!(!update.get_document("$set").unwrap().contains_key("attempts_count"));
        assert!(!update.get_document("$set").unwrap().contains_key("status"));
    }

    #[test]
    fn completion_write_is_guarded_against_downgrade() {
        let ops = progress_updates(&attempt_on(1, AttemptOutcome::Correct)).unwrap();
        assert_eq!(ops.len(), 3);

        let (filter, update) = &ops[1];
        let guard = filter.get_document("status").unwrap();
        assert_eq!(
            guard.get("$ne").unwrap(),
            &to_bson(&ProgressStatus::Completed).unwrap()
        );
        let set = update.get_document("$set").unwrap();
        assert!(set.contains_key("completed_at"));

        let (_, best) = &ops[2];
        assert!(best
            .get_document("$min")
            .unwrap()
            .contains_key("best_execution_time_ms"));
    }

    #[test]
    fn failed_attempts_never_touch_completion_or_best_time() {
        for outcome in [AttemptOutcome::Incorrect, AttemptOutcome::ExecutionError] {
            let ops = progress_updates(&attempt_on(1, outcome)).unwrap();
            assert_eq!(ops.len(), 1, "outcome: {}", outcome.as_str());
        }
    }

    #[test]
    fn empty_history_has_no_streak() {
        assert_eq!(compute_streaks(&BTreeSet::new(), day(2024, 5, 10)), (0, 0));
    }

    #[test]
    fn single_day_today_is_a_one_day_streak() {
        let d = days(&[(2024, 5, 10)]);
        assert_eq!(compute_streaks(&d, day(2024, 5, 10)), (1, 1));
    }

    #[test]
    fn consecutive_days_accumulate() {
        let d = days(&[(2024, 5, 8), (2024, 5, 9), (2024, 5, 10)]);
        assert_eq!(compute_streaks(&d, day(2024, 5, 10)), (3, 3));
    }

    #[test]
    fn gap_resets_current_but_keeps_longest() {
        let d = days(&[(2024, 5, 1), (2024, 5, 2), (2024, 5, 3), (2024, 5, 9)]);
        assert_eq!(compute_streaks(&d, day(2024, 5, 9)), (1, 3));
    }

    #[test]
    fn yesterday_still_counts_as_current() {
        let d = days(&[(2024, 5, 8), (2024, 5, 9)]);
        assert_eq!(compute_streaks(&d, day(2024, 5, 10)), (2, 2));
    }

    #[test]
    fn stale_streak_is_zero() {
        let d = days(&[(2024, 5, 1), (2024, 5, 2)]);
        assert_eq!(compute_streaks(&d, day(2024, 5, 10)), (0, 2));
    }

    #[test]
    fn streak_across_month_boundary() {
        let d = days(&[(2024, 4, 30), (2024, 5, 1)]);
        assert_eq!(compute_streaks(&d, day(2024, 5, 1)), (2, 2));
    }
}
