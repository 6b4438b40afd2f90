use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::extractors::{AppJson, SessionIdentity};
use crate::models::attempt::{AttemptOutcome, AttemptRecord, RecordAttemptRequest};
use crate::services::{hints, ledger, session_service, AppState};

use super::internal_error;

/// POST /progress/session — get or create the practice session.
pub async fn session(State(state): State<Arc<AppState>>, identity: SessionIdentity) -> Response {
    match session_service::get_or_create(&state, &identity.session_id, identity.user_id.as_deref())
        .await
    {
        Ok(session) => (
            StatusCode::OK,
            Json(json!({ "success": true, "data": session })),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

/// POST /progress/heartbeat — keep-alive touch on last_seen_at.
pub async fn heartbeat(State(state): State<Arc<AppState>>, identity: SessionIdentity) -> Response {
    match session_service::heartbeat(&state, &identity.session_id).await {
        Ok(known) => (
            StatusCode::OK,
            Json(json!({ "success": true, "data": { "known": known } })),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /progress/overview
pub async fn overview(State(state): State<Arc<AppState>>, identity: SessionIdentity) -> Response {
    match ledger::overview(&state, &identity.session_id).await {
        Ok(data) => (StatusCode::OK, Json(json!({ "success": true, "data": data }))).into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /progress/detailed
pub async fn detailed(State(state): State<Arc<AppState>>, identity: SessionIdentity) -> Response {
    match ledger::detailed(&state, &identity.session_id).await {
        Ok(data) => (StatusCode::OK, Json(json!({ "success": true, "data": data }))).into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /progress/stats
pub async fn stats(State(state): State<Arc<AppState>>, identity: SessionIdentity) -> Response {
    match ledger::stats(&state, &identity.session_id).await {
        Ok(data) => (StatusCode::OK, Json(json!({ "success": true, "data": data }))).into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    #[serde(default = "default_leaderboard_limit")]
    pub limit: i64,
}

fn default_leaderboard_limit() -> i64 {
    10
}

/// GET /progress/leaderboard
pub async fn leaderboard(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeaderboardQuery>,
) -> Response {
    let limit = query.limit.clamp(1, 100);
    match ledger::leaderboard(&state, limit).await {
        Ok(data) => (StatusCode::OK, Json(json!({ "success": true, "data": data }))).into_response(),
        Err(e) => internal_error(e),
    }
}

/// POST /progress/attempt — record an attempt made out of band.
pub async fn record_attempt(
    State(state): State<Arc<AppState>>,
    identity: SessionIdentity,
    AppJson(req): AppJson<RecordAttemptRequest>,
) -> Response {
    if let Err(e) =
        session_service::get_or_create(&state, &identity.session_id, identity.user_id.as_deref())
            .await
    {
        return internal_error(e);
    }

    let hint_used = hints::any_hint_used(&state, &identity.session_id, req.problem_numeric_id)
        .await
        .unwrap_or(false);

    let attempt = AttemptRecord {
        id: Uuid::new_v4().to_string(),
        session_id: identity.session_id.clone(),
        user_id: identity.user_id,
        problem_numeric_id: req.problem_numeric_id,
        dialect: req.dialect,
        sql: req.sql,
        outcome: if req.is_correct {
            AttemptOutcome::Correct
        } else {
            AttemptOutcome::Incorrect
        },
        execution_time_ms: req.execution_time_ms,
        hint_used,
        error_kind: None,
        attempted_at: Utc::now(),
    };

    match ledger::record_attempt(&state, &attempt).await {
        Ok(progress) => (
            StatusCode::OK,
            Json(json!({ "success": true, "data": progress })),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}
