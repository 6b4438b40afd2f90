use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mongodb::bson::doc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::extractors::{AppJson, SessionIdentity};
use crate::models::attempt::ExecuteSqlRequest;
use crate::models::problem::Problem;
use crate::models::Dialect;
use crate::services::{grading, provisioner, session_service, AppState};

use super::internal_error;

/// POST /execute/sql
pub async fn execute_sql(
    State(state): State<Arc<AppState>>,
    identity: SessionIdentity,
    AppJson(req): AppJson<ExecuteSqlRequest>,
) -> Response {
    // Touch the session first so attempts never reference a session
    // that does not exist.
    if let Err(e) =
        session_service::get_or_create(&state, &identity.session_id, identity.user_id.as_deref())
            .await
    {
        return internal_error(e);
    }

    // Grading runs detached: if the client disconnects mid-execution,
    // the sandbox run still finishes and the attempt is still recorded.
    let graded = grading::detached(grading::execute_and_grade(
        state.clone(),
        identity.session_id,
        identity.user_id,
        req,
    ))
    .await;
    match graded {
        Ok((status, body)) => (status, Json(body)).into_response(),
        Err(e) => internal_error(anyhow::anyhow!("grading task failed: {e}")),
    }
}

#[derive(Debug, Deserialize)]
pub struct SetupRequest {
    pub dialect: Dialect,
}

/// POST /problems/{id}/setup
///
/// Force a rebuild check for one problem's environment. The execute
/// path does this on demand; the endpoint exists so the frontend can
/// warm an environment while the learner reads the problem.
pub async fn setup_problem(
    State(state): State<Arc<AppState>>,
    Path(numeric_id): Path<i64>,
    AppJson(req): AppJson<SetupRequest>,
) -> Response {
    let problem = match state
        .mongo
        .collection::<Problem>("problems")
        .find_one(doc! { "numeric_id": numeric_id, "is_active": true })
        .await
    {
        Ok(Some(p)) => p,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({
                    "success": false,
                    "error": format!("Problem {} not found", numeric_id)
                })),
            )
                .into_response();
        }
        Err(e) => return internal_error(e.into()),
    };

    match provisioner::ensure_environment(&state, &problem, req.dialect).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": { "problemNumericId": numeric_id, "dialect": req.dialect }
            })),
        )
            .into_response(),
        Err(e @ provisioner::ProvisionError::UnsupportedDialect { .. }) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": e.to_string() })),
        )
            .into_response(),
        Err(e @ provisioner::ProvisionError::SetupFailed(_)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "success": false, "error": e.to_string() })),
        )
            .into_response(),
    }
}
