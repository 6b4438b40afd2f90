use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures::TryStreamExt;
use mongodb::bson::doc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::models::problem::{Problem, ProblemSummary};
use crate::services::AppState;

use super::internal_error;

#[derive(Debug, Deserialize)]
pub struct ListProblemsQuery {
    pub category: Option<String>,
    pub difficulty: Option<String>,
}

/// GET /problems — catalog without solutions or setup scripts.
pub async fn list_problems(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListProblemsQuery>,
) -> Response {
    let mut filter = doc! { "is_active": true };
    if let Some(category) = &query.category {
        filter.insert("category", category);
    }
    if let Some(difficulty) = &query.difficulty {
        filter.insert("difficulty", difficulty.to_lowercase());
    }

    let cursor = match state
        .mongo
        .collection::<Problem>("problems")
        .find(filter)
        .sort(doc! { "numeric_id": 1 })
        .await
    {
        Ok(cursor) => cursor,
        Err(e) => return internal_error(e.into()),
    };

    match cursor.try_collect::<Vec<Problem>>().await {
        Ok(problems) => {
            let summaries: Vec<ProblemSummary> = problems.iter().map(ProblemSummary::from).collect();
            (
                StatusCode::OK,
                Json(json!({ "success": true, "data": { "problems": summaries } })),
            )
                .into_response()
        }
        Err(e) => internal_error(e.into()),
    }
}

/// GET /problems/{id} — full statement, minus the answer.
pub async fn get_problem(
    State(state): State<Arc<AppState>>,
    Path(numeric_id): Path<i64>,
) -> Response {
    match state
        .mongo
        .collection::<Problem>("problems")
        .find_one(doc! { "numeric_id": numeric_id, "is_active": true })
        .await
    {
        Ok(Some(p)) => {
            let dialects: Vec<_> = p.schemas.iter().map(|s| s.dialect).collect();
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "data": {
                        "numericId": p.numeric_id,
                        "title": p.title,
                        "description": p.description,
                        "difficulty": p.difficulty,
                        "category": p.category,
                        "unorderedCompare": p.unordered_compare,
                        "dialects": dialects,
                        "hintCount": p.hints.len(),
                    }
                })),
            )
                .into_response()
        }
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "success": false,
                "error": format!("Problem {} not found", numeric_id)
            })),
        )
            .into_response(),
        Err(e) => internal_error(e.into()),
    }
}
