use anyhow::Result;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::Collection;
use std::collections::HashSet;
use thiserror::Error;

use crate::metrics;
use crate::models::hint::{HintListResponse, HintUsage, HintView};
use crate::models::problem::{Problem, ProblemHint};
use crate::models::progress::ProblemProgress;
use crate::utils::time::chrono_to_bson;

use super::AppState;

#[derive(Debug, Error)]
pub enum HintError {
    #[error("hint not found")]
    NotFound,
    #[error("hint unlocks after {required} attempts; session has {current}")]
    Locked { required: u32, current: u32 },
}

/// Whether a hint is open for a session with this many attempts. A hint
/// that was already revealed stays open even if authored thresholds
/// later change.
pub fn is_unlocked(hint: &ProblemHint, attempts: u32, already_revealed: bool) -> bool {
    already_revealed || attempts >= hint.reveal_after_attempts
}

/// Build the hint board for a problem: unlocked hints carry content,
/// locked ones only say how far away they are.
pub fn hint_views(
    hints: &[ProblemHint],
    attempts: u32,
    revealed: &HashSet<String>,
) -> Vec<HintView> {
    let mut ordered: Vec<&ProblemHint> = hints.iter().collect();
    ordered.sort_by_key(|h| h.hint_order);
    ordered
        .into_iter()
        .map(|h| {
            if is_unlocked(h, attempts, revealed.contains(&h.id)) {
                HintView {
                    id: h.id.clone(),
                    hint_order: h.hint_order,
                    hint_type: h.hint_type.clone(),
                    locked: false,
                    content: Some(h.content.clone()),
                    unlocks_after_attempts: None,
                }
            } else {
                HintView {
                    id: h.id.clone(),
                    hint_order: h.hint_order,
                    hint_type: h.hint_type.clone(),
                    locked: true,
                    content: None,
                    unlocks_after_attempts: Some(h.reveal_after_attempts - attempts),
                }
            }
        })
        .collect()
}

fn usage(state: &AppState) -> Collection<HintUsage> {
    state.mongo.collection("hint_usage")
}

async fn attempts_count(state: &AppState, session_id: &str, numeric_id: i64) -> Result<u32> {
    let progress: Collection<ProblemProgress> = state.mongo.collection("problem_progress");
    Ok(progress
        .find_one(doc! { "_id": ProblemProgress::doc_id(session_id, numeric_id) })
        .await?
        .map(|p| p.attempts_count)
        .unwrap_or(0))
}

async fn revealed_ids(state: &AppState, session_id: &str, numeric_id: i64) -> Result<HashSet<String>> {
    let mut cursor = usage(state)
        .find(doc! { "session_id": session_id, "problem_numeric_id": numeric_id })
        .await?;
    let mut ids = HashSet::new();
    while let Some(u) = cursor.try_next().await? {
        ids.insert(u.hint_id);
    }
    Ok(ids)
}

pub async fn list_hints(
    state: &AppState,
    session_id: &str,
    problem: &Problem,
) -> Result<HintListResponse> {
    let attempts = attempts_count(state, session_id, problem.numeric_id).await?;
    let revealed = revealed_ids(state, session_id, problem.numeric_id).await?;
    Ok(HintListResponse {
        problem_numeric_id: problem.numeric_id,
        attempts_count: attempts,
        hints: hint_views(&problem.hints, attempts, &revealed),
    })
}

/// Record a reveal and return the hint content. Idempotent: revealing
/// the same hint twice records one usage event.
pub async fn reveal_hint(
    state: &AppState,
    session_id: &str,
    problem: &Problem,
    hint_id: &str,
) -> Result<Result<HintView, HintError>> {
    let Some(hint) = problem.hints.iter().find(|h| h.id == hint_id) else {
        return Ok(Err(HintError::NotFound));
    };

    let attempts = attempts_count(state, session_id, problem.numeric_id).await?;
    let revealed = revealed_ids(state, session_id, problem.numeric_id).await?;
    if !is_unlocked(hint, attempts, revealed.contains(hint_id)) {
        return Ok(Err(HintError::Locked {
            required: hint.reveal_after_attempts,
            current: attempts,
        }));
    }

    let doc_id = HintUsage::doc_id(session_id, hint_id);
    let result = usage(state)
        .update_one(
            doc! { "_id": &doc_id },
            doc! { "$setOnInsert": {
                "session_id": session_id,
                "problem_numeric_id": problem.numeric_id,
                "hint_id": hint_id,
                "revealed_at": chrono_to_bson(Utc::now()),
            }},
        )
        .upsert(true)
        .await?;

    let first_reveal = result.upserted_id.is_some();
    metrics::HINTS_REVEALED_TOTAL
        .with_label_values(&[if first_reveal { "true" } else { "false" }])
        .inc();

    Ok(Ok(HintView {
        id: hint.id.clone(),
        hint_order: hint.hint_order,
        hint_type: hint.hint_type.clone(),
        locked: false,
        content: Some(hint.content.clone()),
        unlocks_after_attempts: None,
    }))
}

/// True when the session revealed any hint for this problem. Used to
/// mark attempts as hint-assisted.
pub async fn any_hint_used(state: &AppState, session_id: &str, numeric_id: i64) -> Result<bool> {
    let count = usage(state)
        .count_documents(doc! { "session_id": session_id, "problem_numeric_id": numeric_id })
        .await?;
    Ok(count > 0)
}
