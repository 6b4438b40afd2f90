use axum::http::StatusCode;
use chrono::Utc;
use mongodb::bson::doc;
use std::sync::Arc;
use uuid::Uuid;

use crate::metrics;
use crate::models::attempt::{
    AttemptOutcome, AttemptRecord, ExecuteSqlData, ExecuteSqlRequest, ExecuteSqlResponse,
};
use crate::models::problem::Problem;
use crate::models::verdict::ErrorAnalysis;

use super::executor::ExecutionError;
use super::{classifier, comparator, executor, hints, ledger, provisioner, AppState};

fn failure(error: String, analysis: Option<ErrorAnalysis>) -> ExecuteSqlResponse {
    ExecuteSqlResponse {
        success: false,
        data: None,
        error: Some(error),
        error_analysis: analysis,
    }
}

/// Run a grading future on the runtime so it survives the caller being
/// dropped. A disconnecting client cancels the handler future, not the
/// spawned task, so the sandbox run finishes and the attempt lands in
/// the ledger either way.
pub fn detached<F>(fut: F) -> tokio::task::JoinHandle<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(fut)
}

/// Run a submission end to end: provision, execute, compare, classify,
/// and record. Returns the HTTP status alongside the response envelope.
pub async fn execute_and_grade(
    state: Arc<AppState>,
    session_id: String,
    user_id: Option<String>,
    req: ExecuteSqlRequest,
) -> (StatusCode, ExecuteSqlResponse) {
    let problem = match state
        .mongo
        .collection::<Problem>("problems")
        .find_one(doc! { "numeric_id": req.problem_numeric_id, "is_active": true })
        .await
    {
        Ok(Some(p)) => p,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                failure(format!("Problem {} not found", req.problem_numeric_id), None),
            );
        }
        Err(e) => {
            tracing::error!(error = %e, "problem lookup failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                failure("Internal error".into(), None),
            );
        }
    };

    // Infrastructure failures are not the learner's fault: surface them
    // without recording an attempt.
    if let Err(e) = provisioner::ensure_environment(&state, &problem, req.dialect).await {
        tracing::error!(
            problem = problem.numeric_id,
            dialect = %req.dialect,
            error = %e,
            "environment provisioning failed"
        );
        let status = match e {
            provisioner::ProvisionError::UnsupportedDialect { .. } => StatusCode::BAD_REQUEST,
            provisioner::ProvisionError::SetupFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        return (status, failure(e.to_string(), None));
    }

    let timeout = std::time::Duration::from_secs(state.config.query_timeout_secs);
    let executed = executor::execute(
        &state.sandbox,
        req.dialect,
        problem.numeric_id,
        &req.sql,
        timeout,
    )
    .await;

    let (status, response, outcome, error_kind, execution_time_ms) = match executed {
        Ok((rows, elapsed_ms)) => {
            let expected = problem
                .schema_for(req.dialect)
                .map(|s| s.expected_output.as_slice())
                .unwrap_or_default();
            let compared = comparator::compare(&rows.rows, expected, problem.unordered_compare);
            let is_correct = compared.is_match();

            let (outcome, analysis) = if is_correct {
                (AttemptOutcome::Correct, None)
            } else {
                (
                    AttemptOutcome::Incorrect,
                    Some(classifier::classify_wrong_answer(&compared, &req.sql)),
                )
            };

            let response = ExecuteSqlResponse {
                success: true,
                data: Some(ExecuteSqlData {
                    columns: rows.columns,
                    rows: rows.rows,
                    row_count: rows.row_count,
                    truncated: rows.truncated,
                    execution_time_ms: elapsed_ms,
                    is_correct,
                    feedback: compared.feedback(),
                }),
                error: None,
                error_analysis: analysis,
            };
            (StatusCode::OK, response, outcome, None, elapsed_ms)
        }
        Err(ExecutionError::Forbidden(reason)) => {
            let analysis = classifier::classify_forbidden(&reason);
            (
                StatusCode::BAD_REQUEST,
                failure(reason, Some(analysis)),
                AttemptOutcome::ExecutionError,
                Some("forbidden_statement".to_string()),
                0,
            )
        }
        Err(ExecutionError::Timeout(limit)) => {
            let analysis = classifier::classify_timeout(limit.as_secs());
            (
                StatusCode::OK,
                failure(
                    format!("Query timed out after {} seconds", limit.as_secs()),
                    Some(analysis),
                ),
                AttemptOutcome::ExecutionError,
                Some("timeout".to_string()),
                limit.as_millis() as u64,
            )
        }
        Err(ExecutionError::Driver(message)) => {
            let analysis = classifier::classify_error(&message, &req.sql);
            let kind = serde_json::to_value(analysis.kind)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string));
            (
                StatusCode::OK,
                failure(message, Some(analysis)),
                AttemptOutcome::ExecutionError,
                kind,
                0,
            )
        }
    };

    metrics::QUERIES_EXECUTED_TOTAL
        .with_label_values(&[req.dialect.as_str(), outcome.as_str()])
        .inc();

    let mut attempt = AttemptRecord {
        id: Uuid::new_v4().to_string(),
        session_id,
        user_id,
        problem_numeric_id: problem.numeric_id,
        dialect: req.dialect,
        sql: req.sql,
        outcome,
        execution_time_ms,
        hint_used: false,
        attempted_at: Utc::now(),
        error_kind,
    };

    // This future runs detached from the client connection, so the
    // recording below happens even when nobody is waiting for the
    // response anymore.
    match hints::any_hint_used(&state, &attempt.session_id, attempt.problem_numeric_id).await {
        Ok(used) => attempt.hint_used = used,
        Err(e) => tracing::warn!(error = %e, "hint usage lookup failed"),
    }
    if let Err(e) = ledger::record_attempt(&state, &attempt).await {
        tracing::error!(
            session = %attempt.session_id,
            problem = attempt.problem_numeric_id,
            error = %e,
            "failed to record attempt"
        );
    }

    (status, response)
}
