use redis::AsyncCommands;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::metrics;
use crate::models::problem::Problem;
use crate::models::Dialect;

use super::AppState;

/// Rebuilt environments are trusted for this long before the setup
/// fingerprint is re-checked against the problem definition.
const ENV_HASH_TTL_SECS: u64 = 3600;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("problem {numeric_id} has no {dialect} schema")]
    UnsupportedDialect { numeric_id: i64, dialect: Dialect },
    #[error("failed to build sandbox environment: {0}")]
    SetupFailed(String),
}

fn hash_key(numeric_id: i64, dialect: Dialect) -> String {
    format!("env:hash:{}:{}", numeric_id, dialect)
}

fn setup_fingerprint(setup_sql: &str) -> String {
    hex::encode(Sha256::digest(setup_sql.as_bytes()))
}

/// Make sure the problem's namespace exists and matches its current
/// setup script. No-op when the stored fingerprint is fresh.
///
/// Callers across this process are serialized per (problem, dialect);
/// concurrent rebuilds from other replicas are tolerated because the
/// rebuild is idempotent (drop then create).
pub async fn ensure_environment(
    state: &AppState,
    problem: &Problem,
    dialect: Dialect,
) -> Result<(), ProvisionError> {
    let schema = problem
        .schema_for(dialect)
        .ok_or(ProvisionError::UnsupportedDialect {
            numeric_id: problem.numeric_id,
            dialect,
        })?;

    let lock = state.env_lock((problem.numeric_id, dialect)).await;
    let _guard = lock.lock().await;

    let fingerprint = setup_fingerprint(&schema.setup_sql);
    let key = hash_key(problem.numeric_id, dialect);

    let mut redis = state.redis.clone();
    let cached: Option<String> = redis.get(&key).await.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "env fingerprint lookup failed, forcing rebuild");
        None
    });
    if cached.as_deref() == Some(fingerprint.as_str()) {
        metrics::record_cache_hit();
        return Ok(());
    }
    metrics::record_cache_miss();

    tracing::info!(
        problem = problem.numeric_id,
        dialect = %dialect,
        "rebuilding sandbox environment"
    );

    let rebuild = match dialect {
        Dialect::Postgresql => {
            rebuild_postgres(state, problem.numeric_id, &schema.setup_sql).await
        }
        Dialect::Mysql => rebuild_mysql(state, problem.numeric_id, &schema.setup_sql).await,
    };

    match rebuild {
        Ok(()) => {
            metrics::ENVIRONMENTS_PROVISIONED_TOTAL
                .with_label_values(&[dialect.as_str(), "ok"])
                .inc();
            // Cache failure only costs an extra rebuild next time.
            let set: Result<(), _> = redis.set_ex(&key, &fingerprint, ENV_HASH_TTL_SECS).await;
            if let Err(e) = set {
                tracing::warn!(error = %e, "failed to store env fingerprint");
            }
            Ok(())
        }
        Err(e) => {
            metrics::ENVIRONMENTS_PROVISIONED_TOTAL
                .with_label_values(&[dialect.as_str(), "error"])
                .inc();
            // A half-built namespace must never be mistaken for fresh.
            let _: Result<(), _> = redis.del(&key).await;
            tear_down(state, problem.numeric_id, dialect).await;
            Err(ProvisionError::SetupFailed(e))
        }
    }
}

// Setup scripts run against the pool directly; a raw_sql batch executes
// on a single pooled connection either way, and borrowing an acquired
// connection here would make the future non-Send.
async fn rebuild_postgres(state: &AppState, numeric_id: i64, setup_sql: &str) -> Result<(), String> {
    let script = format!(
        "DROP SCHEMA IF EXISTS env_{id} CASCADE;\n\
         CREATE SCHEMA env_{id};\n\
         SET search_path TO env_{id};\n\
         {setup}",
        id = numeric_id,
        setup = setup_sql
    );
    sqlx::raw_sql(&script)
        .execute(&state.sandbox.postgres)
        .await
        .map(|_| ())
        .map_err(|e| e.to_string())
}

async fn rebuild_mysql(state: &AppState, numeric_id: i64, setup_sql: &str) -> Result<(), String> {
    let script = format!(
        "DROP DATABASE IF EXISTS env_{id};\n\
         CREATE DATABASE env_{id};\n\
         USE env_{id};\n\
         {setup}",
        id = numeric_id,
        setup = setup_sql
    );
    sqlx::raw_sql(&script)
        .execute(&state.sandbox.mysql)
        .await
        .map(|_| ())
        .map_err(|e| e.to_string())
}

/// Best-effort removal of a namespace after a failed rebuild.
async fn tear_down(state: &AppState, numeric_id: i64, dialect: Dialect) {
    let result = match dialect {
        Dialect::Postgresql => {
            sqlx::raw_sql(&format!("DROP SCHEMA IF EXISTS env_{} CASCADE", numeric_id))
                .execute(&state.sandbox.postgres)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string())
        }
        Dialect::Mysql => sqlx::raw_sql(&format!("DROP DATABASE IF EXISTS env_{}", numeric_id))
            .execute(&state.sandbox.mysql)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string()),
    };
    if let Err(e) = result {
        tracing::warn!(
            problem = numeric_id,
            dialect = %dialect,
            error = %e,
            "failed to tear down broken environment"
        );
    }
}

/// Warm every active problem's environment for both dialects. Used at
/// startup and by the admin setup endpoint.
pub async fn warm_all(state: &AppState, problems: &[Problem]) -> (usize, usize) {
    let mut ok = 0usize;
    let mut failed = 0usize;
    for problem in problems {
        for schema in &problem.schemas {
            match ensure_environment(state, problem, schema.dialect).await {
                Ok(()) => ok += 1,
                Err(e) => {
                    tracing::error!(
                        problem = problem.numeric_id,
                        dialect = %schema.dialect,
                        error = %e,
                        "environment warmup failed"
                    );
                    failed += 1;
                }
            }
        }
    }
    (ok, failed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_content_sensitive() {
        let a = setup_fingerprint("CREATE TABLE t (x INT);");
        let b = setup_fingerprint("CREATE TABLE t (x INT);");
        let c = setup_fingerprint("CREATE TABLE t (y INT);");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    // Axum handlers require Send futures; this stops compiling if the
    // rebuild path ever reintroduces a connection borrow that is not.
    #[test]
    fn ensure_environment_future_is_send() {
        fn require_send<F: std::future::Future + Send>(_: F) {}
        fn check(state: &AppState, problem: &Problem) {
            require_send(ensure_environment(state, problem, Dialect::Postgresql));
            require_send(ensure_environment(state, problem, Dialect::Mysql));
        }
        let _ = check;
    }

    #[test]
    fn hash_key_is_scoped_per_dialect() {
        assert_ne!(
            hash_key(7, Dialect::Postgresql),
            hash_key(7, Dialect::Mysql)
        );
        assert_eq!(hash_key(7, Dialect::Postgresql), "env:hash:7:postgresql");
    }
}
