use serde_json::Value;

use crate::models::verdict::{CompareOutcome, Row};

/// Relative tolerance for float comparison. Aggregates computed by the
/// two engines legitimately differ in the last few bits.
const EPSILON: f64 = 1e-9;

/// Compare a result set against the problem's canonical output.
///
/// Column names are matched case-insensitively but in the exact order
/// produced by the statement. Rows are ordered by default; problems
/// whose solution has no ORDER BY opt into multiset comparison.
pub fn compare(actual: &[Row], expected: &[Row], unordered: bool) -> CompareOutcome {
    let expected_cols = column_names(expected);
    let actual_cols = column_names(actual);

    if !columns_match(&expected_cols, &actual_cols) {
        return CompareOutcome::ColumnMismatch {
            expected: expected_cols,
            actual: actual_cols,
        };
    }

    if actual.len() != expected.len() {
        return CompareOutcome::RowCountMismatch {
            expected: expected.len(),
            actual: actual.len(),
        };
    }

    if unordered {
        compare_unordered(actual, expected)
    } else {
        compare_ordered(actual, expected)
    }
}

fn column_names(rows: &[Row]) -> Vec<String> {
    rows.first()
        .map(|r| r.keys().cloned().collect())
        .unwrap_or_default()
}

fn columns_match(expected: &[String], actual: &[String]) -> bool {
    expected.len() == actual.len()
        && expected
            .iter()
            .zip(actual)
            .all(|(e, a)| e.eq_ignore_ascii_case(a))
}

fn compare_ordered(actual: &[Row], expected: &[Row]) -> CompareOutcome {
    for (index, (a, e)) in actual.iter().zip(expected).enumerate() {
        if let Some(column) = first_differing_column(a, e) {
            return CompareOutcome::RowMismatch { index, column };
        }
    }
    CompareOutcome::Match
}

/// Multiset comparison. Each expected row is consumed by the first
/// unclaimed actual row it matches.
fn compare_unordered(actual: &[Row], expected: &[Row]) -> CompareOutcome {
    let mut claimed = vec![false; actual.len()];
    for (index, e) in expected.iter().enumerate() {
        let found = actual.iter().enumerate().find(|(i, a)| {
            !claimed[*i] && first_differing_column(a, e).is_none()
        });
        match found {
            Some((i, _)) => claimed[i] = true,
            None => {
                let column = e.keys().next().cloned().unwrap_or_default();
                return CompareOutcome::RowMismatch { index, column };
            }
        }
    }
    CompareOutcome::Match
}

/// Name of the first expected column whose value differs, if any.
/// Lookup into the actual row is positional, since column order already
/// matched and names may differ only in case.
fn first_differing_column(actual: &Row, expected: &Row) -> Option<String> {
    for ((name, e), (_, a)) in expected.iter().zip(actual.iter()) {
        if !values_equal(a, e) {
            return Some(name.clone());
        }
    }
    None
}

fn values_equal(a: &Value, e: &Value) -> bool {
    match (a, e) {
        (Value::Null, Value::Null) => true,
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => approx_eq(x, y),
            _ => x == y,
        },
        // Engines disagree on whether numerics arrive as strings.
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            match (s.trim().parse::<f64>(), n.as_f64()) {
                (Ok(x), Some(y)) => approx_eq(x, y),
                _ => false,
            }
        }
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        _ => a == e,
    }
}

fn approx_eq(x: f64, y: f64) -> bool {
    if x == y {
        return true;
    }
    let scale = x.abs().max(y.abs()).max(1.0);
    (x - y).abs() <= EPSILON * scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> Row {
        let mut r = Row::new();
        for (k, v) in pairs {
            r.insert((*k).to_string(), v.clone());
        }
        r
    }

    #[test]
    fn identical_rows_match() {
        let rows = vec![row(&[("id", json!(1)), ("name", json!("Ada"))])];
        assert!(compare(&rows, &rows, false).is_match());
    }

    #[test]
    fn column_names_are_case_insensitive() {
        let actual = vec![row(&[("ID", json!(1))])];
        let expected = vec![row(&[("id", json!(1))])];
        assert!(compare(&actual, &expected, false).is_match());
    }

    #[test]
    fn column_order_matters() {
        let actual = vec![row(&[("name", json!("Ada")), ("id", json!(1))])];
        let expected = vec![row(&[("id", json!(1)), ("name", json!("Ada"))])];
        assert!(matches!(
            compare(&actual, &expected, false),
            CompareOutcome::ColumnMismatch { .. }
        ));
    }

    #[test]
    fn row_count_mismatch_reported_before_values() {
        let actual = vec![row(&[("id", json!(1))])];
        let expected = vec![row(&[("id", json!(1))]), row(&[("id", json!(2))])];
        assert_eq!(
            compare(&actual, &expected, false),
            CompareOutcome::RowCountMismatch {
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn ordered_comparison_flags_out_of_order_rows() {
        let a = vec![row(&[("id", json!(2))]), row(&[("id", json!(1))])];
        let e = vec![row(&[("id", json!(1))]), row(&[("id", json!(2))])];
        assert!(!compare(&a, &e, false).is_match());
        assert!(compare(&a, &e, true).is_match());
    }

    #[test]
    fn unordered_respects_duplicates() {
        let a = vec![row(&[("id", json!(1))]), row(&[("id", json!(1))])];
        let e = vec![row(&[("id", json!(1))]), row(&[("id", json!(2))])];
        assert!(!compare(&a, &e, true).is_match());
    }

    #[test]
    fn floats_compare_with_tolerance() {
        let a = vec![row(&[("avg", json!(33.333333333333336))])];
        let e = vec![row(&[("avg", json!(33.33333333333333))])];
        assert!(compare(&a, &e, false).is_match());
    }

    #[test]
    fn numeric_string_coerces_to_number() {
        let a = vec![row(&[("total", json!("42.50"))])];
        let e = vec![row(&[("total", json!(42.5))])];
        assert!(compare(&a, &e, false).is_match());
    }

    #[test]
    fn null_equals_null_only() {
        let a = vec![row(&[("x", Value::Null)])];
        let e = vec![row(&[("x", Value::Null)])];
        assert!(compare(&a, &e, false).is_match());

        let a2 = vec![row(&[("x", json!(0))])];
        assert!(!compare(&a2, &e, false).is_match());
        let a3 = vec![row(&[("x", json!(""))])];
        assert!(!compare(&a3, &e, false).is_match());
    }

    #[test]
    fn empty_results_match() {
        assert!(compare(&[], &[], false).is_match());
    }

    #[test]
    fn mismatch_names_offending_column() {
        let a = vec![row(&[("id", json!(1)), ("name", json!("Bob"))])];
        let e = vec![row(&[("id", json!(1)), ("name", json!("Ada"))])];
        assert_eq!(
            compare(&a, &e, false),
            CompareOutcome::RowMismatch {
                index: 0,
                column: "name".into()
            }
        );
    }
}
