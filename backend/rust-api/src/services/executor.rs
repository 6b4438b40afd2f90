use bigdecimal::{BigDecimal, ToPrimitive};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};
use sqlx::{Column, Connection, Row as SqlxRow, TypeInfo};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::metrics;
use crate::models::verdict::{Row, RowSet};
use crate::models::Dialect;

use super::SandboxPools;

/// Rows beyond this are dropped from the response; the true count is kept.
pub const DISPLAY_ROW_CAP: usize = 1000;

const MAX_STATEMENT_LEN: usize = 5000;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("{0}")]
    Forbidden(String),
    #[error("query exceeded the {0:?} time limit")]
    Timeout(Duration),
    #[error("{0}")]
    Driver(String),
}

lazy_static! {
    static ref LINE_COMMENT: Regex = Regex::new(r"--[^\n]*").unwrap();
    static ref BLOCK_COMMENT: Regex = Regex::new(r"(?s)/\*.*?\*/").unwrap();
    // Statement kinds and functions a read-only sandbox must never run.
    static ref FORBIDDEN: Regex = Regex::new(
        r"(?i)\b(INSERT|UPDATE|DELETE|DROP|CREATE|ALTER|TRUNCATE|GRANT|REVOKE|EXEC|EXECUTE|CALL|MERGE|REPLACE|LOAD_FILE|OUTFILE|INFILE|PG_SLEEP|PG_READ_FILE|COPY|VACUUM|LOCK|SET|SHOW|USE)\b"
    )
    .unwrap();
    static ref LEADING_KEYWORD: Regex = Regex::new(r"(?i)^\s*(SELECT|WITH)\b").unwrap();
}

/// Validate a user statement before it touches a sandbox engine.
///
/// Defense in depth only: the engines also run under a restricted
/// account, so a guard miss cannot reach application data.
pub fn check_statement(sql: &str) -> Result<(), ExecutionError> {
    let stripped = BLOCK_COMMENT.replace_all(sql, " ");
    let stripped = LINE_COMMENT.replace_all(&stripped, " ");
    let trimmed = stripped.trim();

    if trimmed.is_empty() {
        return Err(ExecutionError::Forbidden("Query is empty".into()));
    }
    if trimmed.len() > MAX_STATEMENT_LEN {
        return Err(ExecutionError::Forbidden(format!(
            "Query exceeds the {} character limit",
            MAX_STATEMENT_LEN
        )));
    }

    // Only a trailing semicolon is tolerated.
    let body = trimmed.trim_end_matches(';').trim_end();
    if body.contains(';') {
        return Err(ExecutionError::Forbidden(
            "Multiple statements are not allowed".into(),
        ));
    }

    if !LEADING_KEYWORD.is_match(body) {
        return Err(ExecutionError::Forbidden(
            "Only SELECT queries are allowed".into(),
        ));
    }

    if let Some(m) = FORBIDDEN.find(body) {
        return Err(ExecutionError::Forbidden(format!(
            "Statement contains a forbidden keyword: {}",
            m.as_str().to_uppercase()
        )));
    }

    Ok(())
}

/// Run a guarded statement inside a problem's namespace and normalize
/// the result set to JSON rows.
pub async fn execute(
    pools: &SandboxPools,
    dialect: Dialect,
    numeric_id: i64,
    sql: &str,
    timeout: Duration,
) -> Result<(RowSet, u64), ExecutionError> {
    check_statement(sql)?;

    let started = Instant::now();
    let result = match dialect {
        Dialect::Postgresql => execute_postgres(pools, numeric_id, sql, timeout).await,
        Dialect::Mysql => execute_mysql(pools, numeric_id, sql, timeout).await,
    };
    let elapsed_ms = started.elapsed().as_millis() as u64;

    metrics::QUERY_EXECUTION_DURATION_SECONDS
        .with_label_values(&[dialect.as_str()])
        .observe(started.elapsed().as_secs_f64());

    result.map(|rows| (rows, elapsed_ms))
}

async fn execute_postgres(
    pools: &SandboxPools,
    numeric_id: i64,
    sql: &str,
    timeout: Duration,
) -> Result<RowSet, ExecutionError> {
    let mut conn = pools
        .postgres
        .acquire()
        .await
        .map_err(|e| ExecutionError::Driver(e.to_string()))?;

    // Pin the session to the problem namespace and bound it server-side.
    sqlx::query(&format!(
        "SET search_path TO env_{}, pg_catalog",
        numeric_id
    ))
    .execute(&mut *conn)
    .await
    .map_err(|e| ExecutionError::Driver(e.to_string()))?;
    sqlx::query(&format!(
        "SET statement_timeout = {}",
        timeout.as_millis()
    ))
    .execute(&mut *conn)
    .await
    .map_err(|e| ExecutionError::Driver(e.to_string()))?;

    let fetched = tokio::time::timeout(
        timeout + Duration::from_secs(1),
        sqlx::query(sql).fetch_all(&mut *conn),
    )
    .await;

    match fetched {
        Ok(Ok(rows)) => Ok(normalize_pg_rows(&rows)),
        Ok(Err(e)) => {
            // 57014 is the server-side statement_timeout cancellation.
            let timed_out = e
                .as_database_error()
                .and_then(|d| d.code())
                .is_some_and(|c| c == "57014");
            if timed_out {
                Err(ExecutionError::Timeout(timeout))
            } else {
                Err(ExecutionError::Driver(driver_message(&e)))
            }
        }
        Err(_) => {
            // Server missed its own deadline. Close the connection so the
            // runaway query cannot poison the pool.
            let raw = conn.detach();
            let _ = raw.close().await;
            Err(ExecutionError::Timeout(timeout))
        }
    }
}

async fn execute_mysql(
    pools: &SandboxPools,
    numeric_id: i64,
    sql: &str,
    timeout: Duration,
) -> Result<RowSet, ExecutionError> {
    let mut conn = pools
        .mysql
        .acquire()
        .await
        .map_err(|e| ExecutionError::Driver(e.to_string()))?;

    sqlx::query(&format!("USE env_{}", numeric_id))
        .execute(&mut *conn)
        .await
        .map_err(|e| ExecutionError::Driver(e.to_string()))?;
    sqlx::query(&format!(
        "SET SESSION max_execution_time = {}",
        timeout.as_millis()
    ))
    .execute(&mut *conn)
    .await
    .map_err(|e| ExecutionError::Driver(e.to_string()))?;

    let fetched = tokio::time::timeout(
        timeout + Duration::from_secs(1),
        sqlx::query(sql).fetch_all(&mut *conn),
    )
    .await;

    match fetched {
        Ok(Ok(rows)) => Ok(normalize_mysql_rows(&rows)),
        Ok(Err(e)) => {
            // 3024: query interrupted by max_execution_time.
            let timed_out = e
                .as_database_error()
                .and_then(|d| d.code())
                .is_some_and(|c| c == "3024");
            if timed_out {
                Err(ExecutionError::Timeout(timeout))
            } else {
                Err(ExecutionError::Driver(driver_message(&e)))
            }
        }
        Err(_) => {
            let raw = conn.detach();
            let _ = raw.close().await;
            Err(ExecutionError::Timeout(timeout))
        }
    }
}

fn driver_message(e: &sqlx::Error) -> String {
    match e.as_database_error() {
        Some(db) => db.message().to_string(),
        None => e.to_string(),
    }
}

fn normalize_pg_rows(rows: &[sqlx::postgres::PgRow]) -> RowSet {
    let columns: Vec<String> = rows
        .first()
        .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let row_count = rows.len();
    let mut out = Vec::with_capacity(row_count.min(DISPLAY_ROW_CAP));
    for row in rows.iter().take(DISPLAY_ROW_CAP) {
        let mut obj = Row::new();
        for (i, col) in row.columns().iter().enumerate() {
            obj.insert(col.name().to_string(), pg_value(row, i));
        }
        out.push(obj);
    }

    RowSet {
        columns,
        rows: out,
        row_count,
        truncated: row_count > DISPLAY_ROW_CAP,
    }
}

fn pg_value(row: &sqlx::postgres::PgRow, i: usize) -> Value {
    let type_name = row.columns()[i].type_info().name().to_uppercase();
    match type_name.as_str() {
        "INT2" => opt_json(row.try_get::<Option<i16>, _>(i)),
        "INT4" => opt_json(row.try_get::<Option<i32>, _>(i)),
        "INT8" => opt_json(row.try_get::<Option<i64>, _>(i)),
        "FLOAT4" => opt_json(row.try_get::<Option<f32>, _>(i)),
        "FLOAT8" => opt_json(row.try_get::<Option<f64>, _>(i)),
        "NUMERIC" => match row.try_get::<Option<BigDecimal>, _>(i) {
            Ok(Some(d)) => d.to_f64().map(|f| json!(f)).unwrap_or(Value::Null),
            _ => Value::Null,
        },
        "BOOL" => opt_json(row.try_get::<Option<bool>, _>(i)),
        "DATE" => stringify(row.try_get::<Option<chrono::NaiveDate>, _>(i)),
        "TIME" => stringify(row.try_get::<Option<chrono::NaiveTime>, _>(i)),
        "TIMESTAMP" => stringify(row.try_get::<Option<chrono::NaiveDateTime>, _>(i)),
        "TIMESTAMPTZ" => {
            stringify(row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i))
        }
        "UUID" => stringify(row.try_get::<Option<uuid::Uuid>, _>(i)),
        _ => opt_json(row.try_get::<Option<String>, _>(i)),
    }
}

fn normalize_mysql_rows(rows: &[sqlx::mysql::MySqlRow]) -> RowSet {
    let columns: Vec<String> = rows
        .first()
        .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let row_count = rows.len();
    let mut out = Vec::with_capacity(row_count.min(DISPLAY_ROW_CAP));
    for row in rows.iter().take(DISPLAY_ROW_CAP) {
        let mut obj = Row::new();
        for (i, col) in row.columns().iter().enumerate() {
            obj.insert(col.name().to_string(), mysql_value(row, i));
        }
        out.push(obj);
    }

    RowSet {
        columns,
        rows: out,
        row_count,
        truncated: row_count > DISPLAY_ROW_CAP,
    }
}

fn mysql_value(row: &sqlx::mysql::MySqlRow, i: usize) -> Value {
    let type_name = row.columns()[i].type_info().name().to_uppercase();
    match type_name.as_str() {
        "TINYINT" => opt_json(row.try_get::<Option<i8>, _>(i)),
        "SMALLINT" => opt_json(row.try_get::<Option<i16>, _>(i)),
        "INT" | "MEDIUMINT" => opt_json(row.try_get::<Option<i32>, _>(i)),
        "BIGINT" => opt_json(row.try_get::<Option<i64>, _>(i)),
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "INT UNSIGNED" | "MEDIUMINT UNSIGNED"
        | "BIGINT UNSIGNED" => opt_json(row.try_get::<Option<u64>, _>(i)),
        "FLOAT" => opt_json(row.try_get::<Option<f32>, _>(i)),
        "DOUBLE" => opt_json(row.try_get::<Option<f64>, _>(i)),
        "DECIMAL" => match row.try_get::<Option<BigDecimal>, _>(i) {
            Ok(Some(d)) => d.to_f64().map(|f| json!(f)).unwrap_or(Value::Null),
            _ => Value::Null,
        },
        "BOOLEAN" => opt_json(row.try_get::<Option<bool>, _>(i)),
        "DATE" => stringify(row.try_get::<Option<chrono::NaiveDate>, _>(i)),
        "TIME" => stringify(row.try_get::<Option<chrono::NaiveTime>, _>(i)),
        "DATETIME" => stringify(row.try_get::<Option<chrono::NaiveDateTime>, _>(i)),
        "TIMESTAMP" => {
            stringify(row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i))
        }
        _ => opt_json(row.try_get::<Option<String>, _>(i)),
    }
}

fn opt_json<T: serde::Serialize>(v: Result<Option<T>, sqlx::Error>) -> Value {
    match v {
        Ok(Some(x)) => json!(x),
        _ => Value::Null,
    }
}

fn stringify<T: ToString>(v: Result<Option<T>, sqlx::Error>) -> Value {
    match v {
        Ok(Some(x)) => Value::String(x.to_string()),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_select() {
        assert!(check_statement("SELECT * FROM employees").is_ok());
    }

    #[test]
    fn accepts_cte() {
        assert!(check_statement("WITH t AS (SELECT 1 AS n) SELECT n FROM t").is_ok());
    }

    #[test]
    fn accepts_trailing_semicolon() {
        assert!(check_statement("SELECT 1;").is_ok());
    }

    #[test]
    fn rejects_empty_and_comment_only() {
        assert!(check_statement("").is_err());
        assert!(check_statement("   -- nothing here").is_err());
        assert!(check_statement("/* just a comment */").is_err());
    }

    #[test]
    fn rejects_multiple_statements() {
        assert!(check_statement("SELECT 1; SELECT 2").is_err());
        assert!(check_statement("SELECT 1; DROP TABLE employees").is_err());
    }

    #[test]
    fn rejects_mutations() {
        for sql in [
            "DELETE FROM employees",
            "INSERT INTO t VALUES (1)",
            "UPDATE t SET x = 1",
            "DROP TABLE t",
            "CREATE TABLE t (x INT)",
        ] {
            assert!(check_statement(sql).is_err(), "should reject: {}", sql);
        }
    }

    #[test]
    fn forbidden_keyword_inside_select_is_rejected() {
        assert!(check_statement("SELECT * FROM t; DELETE FROM t").is_err());
        assert!(check_statement("SELECT pg_sleep(10)").is_err());
    }

    #[test]
    fn keyword_hidden_in_comment_is_not_a_violation() {
        // Comments are stripped before matching.
        assert!(check_statement("SELECT 1 -- drop table t").is_ok());
    }

    #[test]
    fn column_named_like_keyword_is_rejected_conservatively() {
        // Word-boundary matching cannot tell identifiers from keywords,
        // so `created` passes but a bare `create` does not.
        assert!(check_statement("SELECT created FROM t").is_ok());
    }

    #[test]
    fn rejects_oversized_statement() {
        let big = format!("SELECT '{}'", "x".repeat(MAX_STATEMENT_LEN));
        assert!(check_statement(&big).is_err());
    }

    #[test]
    fn rejects_non_select_leading_keyword() {
        assert!(check_statement("EXPLAIN SELECT 1").is_err());
    }
}
