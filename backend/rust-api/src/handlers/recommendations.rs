use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mongodb::bson::doc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::extractors::{AppJson, SessionIdentity};
use crate::models::hint::RevealHintRequest;
use crate::models::problem::Problem;
use crate::services::{hints, mastery, AppState};

use super::internal_error;

#[derive(Debug, Deserialize)]
pub struct RecommendationsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    5
}

/// GET /recommendations/problems
pub async fn problems(
    State(state): State<Arc<AppState>>,
    identity: SessionIdentity,
    Query(query): Query<RecommendationsQuery>,
) -> Response {
    let limit = query.limit.clamp(1, 20);
    match mastery::recommendations(&state, &identity.session_id, limit).await {
        Ok(recs) => (
            StatusCode::OK,
            Json(json!({ "success": true, "data": { "recommendations": recs } })),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /recommendations/mastery
pub async fn mastery_breakdown(
    State(state): State<Arc<AppState>>,
    identity: SessionIdentity,
) -> Response {
    match mastery::mastery_breakdown(&state, &identity.session_id).await {
        Ok(data) => (
            StatusCode::OK,
            Json(json!({ "success": true, "data": { "categories": data } })),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /recommendations/daily-challenge
pub async fn daily_challenge(
    State(state): State<Arc<AppState>>,
    identity: SessionIdentity,
) -> Response {
    match mastery::daily_challenge(&state, &identity.session_id).await {
        Ok(Some(challenge)) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": {
                    "challenge": challenge,
                    "description": "Complete today's challenge to maintain your learning streak!"
                }
            })),
        )
            .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": "No daily challenge available" })),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /recommendations/achievements
pub async fn achievements(
    State(state): State<Arc<AppState>>,
    identity: SessionIdentity,
) -> Response {
    match mastery::achievements(&state, &identity.session_id).await {
        Ok(board) => (
            StatusCode::OK,
            Json(json!({ "success": true, "data": { "achievements": board } })),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

async fn load_problem(state: &AppState, numeric_id: i64) -> Result<Option<Problem>, Response> {
    state
        .mongo
        .collection::<Problem>("problems")
        .find_one(doc! { "numeric_id": numeric_id, "is_active": true })
        .await
        .map_err(|e| internal_error(e.into()))
}

/// GET /recommendations/hints/{problemId}
pub async fn list_hints(
    State(state): State<Arc<AppState>>,
    identity: SessionIdentity,
    Path(numeric_id): Path<i64>,
) -> Response {
    let problem = match load_problem(&state, numeric_id).await {
        Ok(Some(p)) => p,
        Ok(None) => return problem_not_found(numeric_id),
        Err(resp) => return resp,
    };

    match hints::list_hints(&state, &identity.session_id, &problem).await {
        Ok(data) => (StatusCode::OK, Json(json!({ "success": true, "data": data }))).into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HintUsageRequest {
    pub problem_numeric_id: i64,
    #[serde(flatten)]
    pub reveal: RevealHintRequest,
}

/// POST /recommendations/hint-usage
pub async fn reveal_hint(
    State(state): State<Arc<AppState>>,
    identity: SessionIdentity,
    AppJson(req): AppJson<HintUsageRequest>,
) -> Response {
    let problem = match load_problem(&state, req.problem_numeric_id).await {
        Ok(Some(p)) => p,
        Ok(None) => return problem_not_found(req.problem_numeric_id),
        Err(resp) => return resp,
    };

    match hints::reveal_hint(&state, &identity.session_id, &problem, &req.reveal.hint_id).await {
        Ok(Ok(view)) => (
            StatusCode::OK,
            Json(json!({ "success": true, "data": { "hint": view } })),
        )
            .into_response(),
        Ok(Err(hints::HintError::NotFound)) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": "Hint not found" })),
        )
            .into_response(),
        Ok(Err(e @ hints::HintError::Locked { .. })) => (
            StatusCode::FORBIDDEN,
            Json(json!({ "success": false, "error": e.to_string() })),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

fn problem_not_found(numeric_id: i64) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "error": format!("Problem {} not found", numeric_id)
        })),
    )
        .into_response()
}
