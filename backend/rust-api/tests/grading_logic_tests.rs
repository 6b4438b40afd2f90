use serde_json::{json, Value};
use sqlpractice_api::models::verdict::{CompareOutcome, ErrorKind, Row, Severity};
use sqlpractice_api::services::{classifier, comparator, executor};

fn row(pairs: &[(&str, Value)]) -> Row {
    let mut r = Row::new();
    for (k, v) in pairs {
        r.insert((*k).to_string(), v.clone());
    }
    r
}

#[test]
fn correct_submission_matches_expected_output() {
    let expected = vec![
        row(&[("department", json!("Engineering")), ("headcount", json!(12))]),
        row(&[("department", json!("Sales")), ("headcount", json!(7))]),
    ];
    let actual = expected.clone();
    assert!(comparator::compare(&actual, &expected, false).is_match());
}

#[test]
fn aggregate_rounding_differences_are_tolerated() {
    let expected = vec![row(&[("avg_salary", json!(58333.333333333336))])];
    let actual = vec![row(&[("avg_salary", json!(58333.33333333333))])];
    assert!(comparator::compare(&actual, &expected, false).is_match());
}

#[test]
fn mysql_decimal_strings_match_postgres_numbers() {
    let expected = vec![row(&[("total", json!(199.99))])];
    let actual = vec![row(&[("total", json!("199.99"))])];
    assert!(comparator::compare(&actual, &expected, false).is_match());
}

#[test]
fn extra_rows_fail_with_a_count_mismatch() {
    let expected = vec![row(&[("id", json!(1))])];
    let actual = vec![row(&[("id", json!(1))]), row(&[("id", json!(2))])];
    let outcome = comparator::compare(&actual, &expected, false);
    assert_eq!(
        outcome,
        CompareOutcome::RowCountMismatch {
            expected: 1,
            actual: 2
        }
    );
    // wrong answer analysis knows rows were extra, not missing
    let analysis = classifier::classify_wrong_answer(&outcome, "SELECT id FROM t");
    assert_eq!(analysis.kind, ErrorKind::WrongAnswer);
    assert!(analysis.suggestions.iter().any(|s| s.contains("extra")));
}

#[test]
fn wrong_answer_outranks_nothing_but_reads_as_warning() {
    let outcome = CompareOutcome::RowMismatch {
        index: 0,
        column: "name".into(),
    };
    let analysis = classifier::classify_wrong_answer(&outcome, "SELECT name FROM t");
    assert_eq!(analysis.severity, Severity::Warning);
    assert!(analysis.explanation.contains("name"));
}

#[test]
fn guard_blocks_everything_but_reads() {
    let rejected = [
        "DROP TABLE employees",
        "DELETE FROM employees WHERE 1=1",
        "SELECT 1; DROP TABLE employees",
        "INSERT INTO employees VALUES (1, 'x')",
        "GRANT ALL ON employees TO PUBLIC",
        "SELECT pg_sleep(60)",
        "",
        "-- only a comment",
    ];
    for sql in rejected {
        assert!(executor::check_statement(sql).is_err(), "accepted: {sql:?}");
    }

    let accepted = [
        "SELECT * FROM employees",
        "select name, salary from employees where salary > 50000",
        "WITH top AS (SELECT * FROM employees ORDER BY salary DESC LIMIT 5) SELECT name FROM top",
        "SELECT created, updated FROM audit_rows;",
    ];
    for sql in accepted {
        assert!(executor::check_statement(sql).is_ok(), "rejected: {sql:?}");
    }
}

#[test]
fn classifier_first_match_wins_over_generic_fallback() {
    let pg = classifier::classify_error(
        "ERROR: column \"e.name\" must appear in the GROUP BY clause or be used in an aggregate function",
        "SELECT name, COUNT(*) FROM employees e GROUP BY department",
    );
    assert_eq!(pg.kind, ErrorKind::GroupByViolation);

    let fallback = classifier::classify_error("weird driver hiccup xyz", "SELECT 1");
    assert_eq!(fallback.kind, ErrorKind::Unknown);
}

#[test]
fn classifier_covers_both_dialect_phrasings() {
    let cases = [
        ("relation \"usrs\" does not exist", ErrorKind::TableNotFound),
        ("Table 'env_12.usrs' doesn't exist", ErrorKind::TableNotFound),
        ("column \"nme\" does not exist", ErrorKind::ColumnNotFound),
        (
            "Unknown column 'nme' in 'field list'",
            ErrorKind::ColumnNotFound,
        ),
        (
            "function lowercase(character varying) does not exist",
            ErrorKind::FunctionNotFound,
        ),
        (
            "FUNCTION env_12.date_part does not exist",
            ErrorKind::FunctionNotFound,
        ),
        (
            "Expression #1 of SELECT list is not in GROUP BY clause and contains nonaggregated column 'env_12.e.name'",
            ErrorKind::GroupByViolation,
        ),
        (
            "You have an error in your SQL syntax; check the manual that corresponds",
            ErrorKind::SyntaxError,
        ),
        ("syntax error at or near \"FORM\"", ErrorKind::SyntaxError),
        ("division by zero", ErrorKind::DivisionByZero),
        (
            "aggregate functions are not allowed in WHERE",
            ErrorKind::AggregateMisuse,
        ),
        (
            "column reference \"id\" is ambiguous",
            ErrorKind::AmbiguousColumn,
        ),
        (
            "permission denied for table users",
            ErrorKind::PermissionDenied,
        ),
    ];
    for (message, kind) in cases {
        let analysis = classifier::classify_error(message, "SELECT 1");
        assert_eq!(analysis.kind, kind, "message: {message}");
        assert!(!analysis.suggestions.is_empty(), "message: {message}");
    }
}

#[test]
fn error_kinds_serialize_to_taxonomy_names() {
    for (kind, name) in [
        (ErrorKind::TableNotFound, "table_not_found"),
        (ErrorKind::ColumnNotFound, "column_not_found"),
        (ErrorKind::FunctionNotFound, "function_not_found"),
        (ErrorKind::GroupByViolation, "group_by_violation"),
        (ErrorKind::ForbiddenStatement, "forbidden_statement"),
    ] {
        assert_eq!(serde_json::to_value(kind).unwrap(), json!(name));
    }
}

#[test]
fn timeout_and_forbidden_have_dedicated_analyses() {
    let timeout = classifier::classify_timeout(30);
    assert_eq!(timeout.kind, ErrorKind::Timeout);
    assert!(timeout.explanation.contains("30"));

    let forbidden = classifier::classify_forbidden("Multiple statements are not allowed");
    assert_eq!(forbidden.kind, ErrorKind::ForbiddenStatement);
}

#[test]
fn performance_hints_attach_to_wrong_answers() {
    let outcome = CompareOutcome::RowMismatch {
        index: 2,
        column: "total".into(),
    };
    let analysis = classifier::classify_wrong_answer(&outcome, "SELECT * FROM orders o JOIN t");
    assert!(analysis
        .performance_hints
        .iter()
        .any(|h| h.contains("SELECT *")));
    assert!(analysis
        .performance_hints
        .iter()
        .any(|h| h.contains("ON conditions")));
}

#[test]
fn unordered_flag_only_relaxes_row_order() {
    let expected = vec![
        row(&[("id", json!(1))]),
        row(&[("id", json!(2))]),
        row(&[("id", json!(3))]),
    ];
    let shuffled = vec![
        row(&[("id", json!(3))]),
        row(&[("id", json!(1))]),
        row(&[("id", json!(2))]),
    ];
    assert!(!comparator::compare(&shuffled, &expected, false).is_match());
    assert!(comparator::compare(&shuffled, &expected, true).is_match());

    // column order is still strict in unordered mode
    let swapped_cols = vec![row(&[("name", json!("a")), ("id", json!(1))])];
    let expected_cols = vec![row(&[("id", json!(1)), ("name", json!("a"))])];
    assert!(!comparator::compare(&swapped_cols, &expected_cols, true).is_match());
}
