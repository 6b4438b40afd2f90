use lazy_static::lazy_static;
use regex::Regex;

use crate::models::verdict::{CompareOutcome, ErrorAnalysis, ErrorKind, Severity};

/// One entry of the ordered pattern table. The first matching entry
/// wins, so specific messages must precede the generic syntax catch-all.
struct Matcher {
    pattern: Regex,
    build: fn(&regex::Captures<'_>) -> ErrorAnalysis,
}

lazy_static! {
    static ref MATCHERS: Vec<Matcher> = vec![
        // Postgres phrases the incomplete-input case distinctly; keep it
        // above the generic "syntax error at or near".
        Matcher {
            pattern: Regex::new(r"(?i)syntax error at end of input").unwrap(),
            build: |_| ErrorAnalysis {
                kind: ErrorKind::SyntaxError,
                severity: Severity::Error,
                title: "Incomplete Query".into(),
                explanation:
                    "Your SQL query appears to be incomplete. The database expected more content."
                        .into(),
                suggestions: vec![
                    "Make sure all clauses are complete (SELECT, FROM, WHERE, ...)".into(),
                    "Verify that all parentheses and quotes are properly closed".into(),
                ],
                example: Some("SELECT * FROM table_name WHERE condition".into()),
                quick_fix: None,
                performance_hints: vec![],
            },
        },
        Matcher {
            pattern: Regex::new(r#"(?i)syntax error at or near "(.+?)""#).unwrap(),
            build: |caps| ErrorAnalysis {
                kind: ErrorKind::SyntaxError,
                severity: Severity::Error,
                title: "Syntax Error Found".into(),
                explanation: format!(
                    "There's a syntax issue near \"{}\". This usually means a missing comma, parenthesis, or keyword.",
                    &caps[1]
                ),
                suggestions: vec![
                    "Check for missing commas between column names".into(),
                    "Ensure all parentheses are properly closed".into(),
                    "Verify that SQL keywords are spelled correctly".into(),
                ],
                example: Some("SELECT name, age FROM users".into()),
                quick_fix: None,
                performance_hints: vec![],
            },
        },
        Matcher {
            pattern: Regex::new(r"(?i)you have an error in your sql syntax").unwrap(),
            build: |_| ErrorAnalysis {
                kind: ErrorKind::SyntaxError,
                severity: Severity::Error,
                title: "Syntax Error Found".into(),
                explanation:
                    "MySQL could not parse your statement. Check punctuation and keyword order."
                        .into(),
                suggestions: vec![
                    "Check for missing commas between column names".into(),
                    "Verify that SQL keywords are spelled correctly".into(),
                ],
                example: Some("SELECT name, age FROM users".into()),
                quick_fix: None,
                performance_hints: vec![],
            },
        },
        Matcher {
            pattern: Regex::new(r#"(?i)column "(.+?)" must appear in the GROUP BY clause"#)
                .unwrap(),
            build: |caps| group_by_analysis(&caps[1]),
        },
        // MySQL's ONLY_FULL_GROUP_BY wording; the column carries the
        // sandbox database prefix, which learners never wrote.
        Matcher {
            pattern: Regex::new(
                r"(?i)is not in GROUP BY clause and contains nonaggregated column '(.+?)'"
            )
            .unwrap(),
            build: |caps| {
                let full = caps.get(1).map(|m| m.as_str()).unwrap_or("?");
                let parts: Vec<&str> = full.split('.').collect();
                let name = if parts.len() > 2 {
                    parts[parts.len() - 2..].join(".")
                } else {
                    full.to_string()
                };
                group_by_analysis(&name)
            },
        },
        Matcher {
            pattern: Regex::new(r"(?i)aggregate functions are not allowed in WHERE").unwrap(),
            build: |_| ErrorAnalysis {
                kind: ErrorKind::AggregateMisuse,
                severity: Severity::Error,
                title: "Aggregate Function Misplacement".into(),
                explanation:
                    "Aggregate functions (COUNT, SUM, AVG, ...) cannot be used in WHERE clauses."
                        .into(),
                suggestions: vec![
                    "Use HAVING instead of WHERE for aggregate conditions".into(),
                    "Filter individual rows with WHERE, then aggregate with GROUP BY and HAVING"
                        .into(),
                ],
                example: Some(
                    "SELECT department, COUNT(*) FROM employees GROUP BY department HAVING COUNT(*) > 5"
                        .into(),
                ),
                quick_fix: Some("Replace WHERE with HAVING for the aggregate condition".into()),
                performance_hints: vec![],
            },
        },
        Matcher {
            pattern: Regex::new(r#"(?i)relation "(.+?)" does not exist"#).unwrap(),
            build: |caps| table_not_found_analysis(&caps[1]),
        },
        Matcher {
            pattern: Regex::new(r"(?i)table '(?:.+?\.)?(.+?)' doesn't exist").unwrap(),
            build: |caps| table_not_found_analysis(&caps[1]),
        },
        Matcher {
            pattern: Regex::new(r#"(?i)column "(.+?)" does not exist"#).unwrap(),
            build: |caps| column_not_found_analysis(&caps[1]),
        },
        Matcher {
            pattern: Regex::new(r"(?i)unknown column '(.+?)'").unwrap(),
            build: |caps| column_not_found_analysis(&caps[1]),
        },
        // Covers both pg ("function lowercase(character varying) does
        // not exist") and MySQL ("FUNCTION env_3.lowercase does not
        // exist").
        Matcher {
            pattern: Regex::new(r"(?i)function (?:\w+\.)?(.+?) does not exist").unwrap(),
            build: |caps| function_not_found_analysis(&caps[1]),
        },
        Matcher {
            pattern: Regex::new(r#"(?i)(?:ambiguous column name "(.+?)"|column '(.+?)' in \w+ \w+ is ambiguous|column reference "(.+?)" is ambiguous)"#).unwrap(),
            build: |caps| {
                let name = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .or_else(|| caps.get(3))
                    .map(|m| m.as_str())
                    .unwrap_or("?");
                ErrorAnalysis {
                    kind: ErrorKind::AmbiguousColumn,
                    severity: Severity::Error,
                    title: "Ambiguous Column Reference".into(),
                    explanation: format!(
                        "Column \"{}\" exists in multiple tables, making the reference unclear.",
                        name
                    ),
                    suggestions: vec![
                        format!("Use table prefixes: table1.{0} or table2.{0}", name),
                        "Give tables aliases for shorter references: SELECT u.name FROM users u"
                            .into(),
                    ],
                    example: Some(
                        "SELECT users.id, orders.id FROM users JOIN orders ON users.id = orders.user_id"
                            .into(),
                    ),
                    quick_fix: Some(format!("Prefix the column with its table: t.{}", name)),
                    performance_hints: vec![],
                }
            },
        },
        Matcher {
            pattern: Regex::new(r"(?i)division by zero").unwrap(),
            build: |_| ErrorAnalysis {
                kind: ErrorKind::DivisionByZero,
                severity: Severity::Error,
                title: "Division by Zero Error".into(),
                explanation: "Your calculation attempted to divide by zero, which is undefined."
                    .into(),
                suggestions: vec![
                    "Exclude rows where the divisor is zero".into(),
                    "Use NULLIF: dividend / NULLIF(divisor, 0)".into(),
                ],
                example: Some("SELECT revenue / NULLIF(cost, 0) AS margin FROM sales".into()),
                quick_fix: Some("Wrap the divisor in NULLIF(divisor, 0)".into()),
                performance_hints: vec![],
            },
        },
        Matcher {
            pattern: Regex::new(
                r"(?i)(more than one row returned by a subquery|subquery returns more than 1 row)"
            )
            .unwrap(),
            build: |_| ErrorAnalysis {
                kind: ErrorKind::SubqueryError,
                severity: Severity::Error,
                title: "Subquery Returned Multiple Rows".into(),
                explanation:
                    "A subquery used as a single value produced more than one row.".into(),
                suggestions: vec![
                    "Use IN instead of = when the subquery can match several rows".into(),
                    "Add LIMIT 1 or an aggregate if a single value is intended".into(),
                ],
                example: Some("SELECT * FROM orders WHERE user_id IN (SELECT id FROM users)".into()),
                quick_fix: Some("Change = to IN for the subquery comparison".into()),
                performance_hints: vec![],
            },
        },
        Matcher {
            pattern: Regex::new(
                r"(?i)(operator does not exist|invalid input syntax for|incorrect \w+ value|cannot be cast)"
            )
            .unwrap(),
            build: |_| ErrorAnalysis {
                kind: ErrorKind::TypeMismatch,
                severity: Severity::Error,
                title: "Type Mismatch".into(),
                explanation:
                    "A value or comparison used incompatible types.".into(),
                suggestions: vec![
                    "Quote text values and leave numbers unquoted".into(),
                    "Use CAST(expr AS type) to convert explicitly".into(),
                ],
                example: Some("SELECT CAST(price AS DECIMAL(10,2)) FROM products".into()),
                quick_fix: None,
                performance_hints: vec![],
            },
        },
        Matcher {
            pattern: Regex::new(r"(?i)(permission denied|access denied|command denied)").unwrap(),
            build: |_| ErrorAnalysis {
                kind: ErrorKind::PermissionDenied,
                severity: Severity::Error,
                title: "Permission Denied".into(),
                explanation:
                    "The practice environment only allows reading the problem's tables.".into(),
                suggestions: vec!["Stick to SELECT statements over the provided tables".into()],
                example: None,
                quick_fix: None,
                performance_hints: vec![],
            },
        },
    ];
    static ref GROUP_BY_RE: Regex = Regex::new(r"(?i)\bGROUP\s+BY\b").unwrap();
    static ref AGGREGATE_RE: Regex =
        Regex::new(r"(?i)\b(COUNT|SUM|AVG|MIN|MAX)\s*\(").unwrap();
    static ref JOIN_RE: Regex = Regex::new(r"(?i)\bJOIN\b").unwrap();
    static ref JOIN_ON_RE: Regex = Regex::new(r"(?i)\b(ON|USING)\b").unwrap();
    static ref SELECT_STAR_RE: Regex = Regex::new(r"(?i)SELECT\s+\*").unwrap();
    static ref SELECT_LIST_RE: Regex =
        Regex::new(r"(?is)\bSELECT\s+(?:DISTINCT\s+)?(.+?)\s+FROM\b").unwrap();
    static ref GROUP_BY_LIST_RE: Regex =
        Regex::new(r"(?is)\bGROUP\s+BY\s+(.+?)(?:\s+HAVING\b|\s+ORDER\b|\s+LIMIT\b|;|$)").unwrap();
    static ref BARE_COLUMN_RE: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)?$").unwrap();
}

fn group_by_analysis(column: &str) -> ErrorAnalysis {
    ErrorAnalysis {
        kind: ErrorKind::GroupByViolation,
        severity: Severity::Error,
        title: "GROUP BY Rule Violation".into(),
        explanation: format!(
            "When using GROUP BY, every column in SELECT (except aggregates) must be in the GROUP BY clause. Column \"{}\" is missing.",
            column
        ),
        suggestions: vec![
            format!("Add \"{}\" to your GROUP BY clause", column),
            "Only aggregate functions (COUNT, SUM, ...) can appear without being grouped".into(),
        ],
        example: Some("SELECT department, COUNT(*) FROM employees GROUP BY department".into()),
        quick_fix: Some(format!("Add {} to GROUP BY", column)),
        performance_hints: vec![],
    }
}

fn table_not_found_analysis(table: &str) -> ErrorAnalysis {
    ErrorAnalysis {
        kind: ErrorKind::TableNotFound,
        severity: Severity::Error,
        title: "Table Not Found".into(),
        explanation: format!(
            "The table \"{}\" doesn't exist in this problem's environment.",
            table
        ),
        suggestions: vec![
            "Check the spelling of the table name".into(),
            "Review the problem description for the correct table names".into(),
        ],
        example: None,
        quick_fix: None,
        performance_hints: vec![],
    }
}

fn column_not_found_analysis(column: &str) -> ErrorAnalysis {
    ErrorAnalysis {
        kind: ErrorKind::ColumnNotFound,
        severity: Severity::Error,
        title: "Column Not Found".into(),
        explanation: format!(
            "The column \"{}\" doesn't exist in the tables you're querying.",
            column
        ),
        suggestions: vec![
            "Check the spelling of the column name".into(),
            "Use table.column format if there's ambiguity".into(),
            "Review the table schema in the problem description".into(),
        ],
        example: Some("SELECT users.name, orders.total FROM users JOIN orders ...".into()),
        quick_fix: None,
        performance_hints: vec![],
    }
}

fn function_not_found_analysis(func: &str) -> ErrorAnalysis {
    // pg reports the full signature; learners only typed the name.
    let name = func.split('(').next().unwrap_or(func).trim();
    ErrorAnalysis {
        kind: ErrorKind::FunctionNotFound,
        severity: Severity::Error,
        title: "Function Not Found".into(),
        explanation: format!(
            "The function \"{}\" doesn't exist, or its arguments have the wrong types.",
            name
        ),
        suggestions: vec![
            "Check the spelling of the function name (LOWER, UPPER, COUNT, ...)".into(),
            "Function names differ between databases; use the ones your dialect supports".into(),
            "Make sure the argument types match what the function expects".into(),
        ],
        example: Some("SELECT LOWER(name) FROM users".into()),
        quick_fix: None,
        performance_hints: vec![],
    }
}

fn last_segment(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// Bare selected column a GROUP BY query fails to group, if any.
/// Catches the mistake even when the driver's message is too generic
/// to name the column.
pub fn group_by_static_check(sql: &str) -> Option<String> {
    let select = SELECT_LIST_RE.captures(sql)?;
    let group = GROUP_BY_LIST_RE.captures(sql)?;
    let grouped: Vec<String> = group[1]
        .split(',')
        .map(|c| last_segment(c.trim().trim_matches('"')).to_lowercase())
        .collect();

    for item in select[1].split(',') {
        let item = item.trim();
        if item.is_empty() || AGGREGATE_RE.is_match(item) {
            continue;
        }
        let expr = item.split_whitespace().next()?;
        if !BARE_COLUMN_RE.is_match(expr) {
            continue;
        }
        if !grouped.contains(&last_segment(expr).to_lowercase()) {
            return Some(expr.to_string());
        }
    }
    None
}

/// Classify a driver error message into an educational analysis.
pub fn classify_error(message: &str, sql: &str) -> ErrorAnalysis {
    for m in MATCHERS.iter() {
        if let Some(caps) = m.pattern.captures(message) {
            let mut analysis = (m.build)(&caps);
            analysis.performance_hints = performance_hints(sql);
            return analysis;
        }
    }

    // The driver message named nothing useful; the statement itself may
    // still show the classic GROUP BY mistake.
    if let Some(column) = group_by_static_check(sql) {
        let mut analysis = group_by_analysis(&column);
        analysis.performance_hints = performance_hints(sql);
        return analysis;
    }

    let mut analysis = ErrorAnalysis {
        kind: ErrorKind::Unknown,
        severity: Severity::Error,
        title: "SQL Execution Error".into(),
        explanation: format!("Your query encountered an error: {}", message),
        suggestions: vec![
            "Check your SQL syntax carefully".into(),
            "Verify table and column names are spelled correctly".into(),
            "Try breaking down complex queries into smaller parts".into(),
        ],
        example: Some("Basic query structure: SELECT columns FROM table WHERE condition".into()),
        quick_fix: None,
        performance_hints: vec![],
    };
    analysis.performance_hints = performance_hints(sql);
    analysis
}

/// Analysis for a statement the guard refused to run.
pub fn classify_forbidden(reason: &str) -> ErrorAnalysis {
    ErrorAnalysis {
        kind: ErrorKind::ForbiddenStatement,
        severity: Severity::Error,
        title: "Statement Not Allowed".into(),
        explanation: reason.to_string(),
        suggestions: vec![
            "Only single SELECT (or WITH ... SELECT) statements are accepted".into(),
        ],
        example: None,
        quick_fix: None,
        performance_hints: vec![],
    }
}

pub fn classify_timeout(limit_secs: u64) -> ErrorAnalysis {
    ErrorAnalysis {
        kind: ErrorKind::Timeout,
        severity: Severity::Error,
        title: "Query Timed Out".into(),
        explanation: format!(
            "Your query did not finish within {} seconds and was cancelled.",
            limit_secs
        ),
        suggestions: vec![
            "Check JOIN conditions; a missing ON clause multiplies rows".into(),
            "Filter early with WHERE to reduce the rows being processed".into(),
        ],
        example: None,
        quick_fix: None,
        performance_hints: vec![],
    }
}

/// Analysis for a query that ran fine but produced the wrong rows.
pub fn classify_wrong_answer(outcome: &CompareOutcome, sql: &str) -> ErrorAnalysis {
    let suggestions = match outcome {
        CompareOutcome::ColumnMismatch { .. } => vec![
            "Match the expected column list exactly, using AS to rename".into(),
            "Check the order of columns in your SELECT list".into(),
        ],
        CompareOutcome::RowCountMismatch { expected, actual } if actual > expected => vec![
            "You returned extra rows; tighten your WHERE or JOIN conditions".into(),
            "Check for duplicate rows; DISTINCT or grouping may be needed".into(),
        ],
        CompareOutcome::RowCountMismatch { .. } => vec![
            "You returned too few rows; a filter may be too strict".into(),
            "Consider whether an INNER JOIN is dropping rows a LEFT JOIN would keep".into(),
        ],
        CompareOutcome::RowMismatch { .. } => vec![
            "Compare your output with the expected result carefully".into(),
            "Verify that your GROUP BY and ORDER BY clauses are correct".into(),
            "Make sure you're calculating the right metrics".into(),
        ],
        CompareOutcome::Match => vec![],
    };

    ErrorAnalysis {
        kind: ErrorKind::WrongAnswer,
        severity: Severity::Warning,
        title: "Query Executed Successfully".into(),
        explanation: outcome.feedback(),
        suggestions,
        example: None,
        quick_fix: None,
        performance_hints: performance_hints(sql),
    }
}

/// Static inspection of the statement text for habits worth flagging.
pub fn performance_hints(sql: &str) -> Vec<String> {
    let mut hints = Vec::new();
    if SELECT_STAR_RE.is_match(sql) {
        hints.push("Consider selecting only the columns you need instead of SELECT *".into());
    }
    if JOIN_RE.is_match(sql) && !JOIN_ON_RE.is_match(sql) {
        hints.push(
            "Make sure your JOINs have ON conditions to avoid unintended combinations".into(),
        );
    }
    if GROUP_BY_RE.is_match(sql) && !AGGREGATE_RE.is_match(sql) {
        hints.push(
            "GROUP BY without an aggregate often means you wanted DISTINCT".into(),
        );
    }
    hints
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pg_syntax_error_extracts_token() {
        let a = classify_error("syntax error at or near \"FORM\"", "SELECT * FORM t");
        assert_eq!(a.kind, ErrorKind::SyntaxError);
        assert!(a.explanation.contains("FORM"));
    }

    #[test]
    fn incomplete_input_beats_generic_syntax() {
        let a = classify_error("syntax error at end of input", "SELECT");
        assert_eq!(a.title, "Incomplete Query");
    }

    #[test]
    fn mysql_syntax_error_is_recognized() {
        let a = classify_error(
            "You have an error in your SQL syntax; check the manual",
            "SELEC 1",
        );
        assert_eq!(a.kind, ErrorKind::SyntaxError);
    }

    #[test]
    fn group_by_violation_names_the_column() {
        let a = classify_error(
            "column \"e.name\" must appear in the GROUP BY clause or be used in an aggregate function",
            "SELECT name, COUNT(*) FROM e GROUP BY dept",
        );
        assert_eq!(a.kind, ErrorKind::GroupByViolation);
        assert!(a.quick_fix.as_deref().unwrap().contains("e.name"));
    }

    #[test]
    fn missing_table_both_dialects() {
        let pg = classify_error("relation \"employes\" does not exist", "SELECT 1");
        let my = classify_error("Table 'env_3.employes' doesn't exist", "SELECT 1");
        assert_eq!(pg.kind, ErrorKind::TableNotFound);
        assert_eq!(my.kind, ErrorKind::TableNotFound);
        assert!(my.explanation.contains("employes"));
    }

    #[test]
    fn missing_column_both_dialects() {
        let pg = classify_error("column \"salry\" does not exist", "SELECT salry FROM e");
        let my = classify_error("Unknown column 'salry' in 'field list'", "SELECT salry FROM e");
        assert_eq!(pg.kind, ErrorKind::ColumnNotFound);
        assert_eq!(my.kind, ErrorKind::ColumnNotFound);
    }

    #[test]
    fn missing_function_both_dialects() {
        let pg = classify_error(
            "function lowercase(character varying) does not exist",
            "SELECT lowercase(name) FROM e",
        );
        assert_eq!(pg.kind, ErrorKind::FunctionNotFound);
        assert!(pg.explanation.contains("lowercase"));
        assert!(!pg.explanation.contains("character varying"));

        let my = classify_error(
            "FUNCTION env_3.date_part does not exist",
            "SELECT date_part(hired) FROM e",
        );
        assert_eq!(my.kind, ErrorKind::FunctionNotFound);
        assert!(my.explanation.contains("date_part"));
    }

    #[test]
    fn mysql_only_full_group_by_names_the_column() {
        let a = classify_error(
            "Expression #1 of SELECT list is not in GROUP BY clause and contains nonaggregated column 'env_3.e.name' which is not functionally dependent on columns in GROUP BY clause",
            "SELECT name, COUNT(*) FROM employees e GROUP BY dept",
        );
        assert_eq!(a.kind, ErrorKind::GroupByViolation);
        assert!(a.quick_fix.as_deref().unwrap().contains("e.name"));
        assert!(!a.quick_fix.as_deref().unwrap().contains("env_3"));
    }

    #[test]
    fn static_group_by_check_finds_the_ungrouped_column() {
        assert_eq!(
            group_by_static_check("SELECT name, COUNT(*) FROM employees GROUP BY department"),
            Some("name".to_string())
        );
        assert_eq!(
            group_by_static_check(
                "SELECT e.name, COUNT(*) FROM employees e GROUP BY e.name ORDER BY 2"
            ),
            None
        );
        assert_eq!(group_by_static_check("SELECT name FROM employees"), None);
    }

    #[test]
    fn generic_message_with_group_by_mistake_is_preempted() {
        let a = classify_error(
            "driver reported an unhelpful error",
            "SELECT name, COUNT(*) FROM employees GROUP BY department",
        );
        assert_eq!(a.kind, ErrorKind::GroupByViolation);
        assert!(a.quick_fix.as_deref().unwrap().contains("name"));
    }

    #[test]
    fn ambiguous_column_suggests_prefix() {
        let a = classify_error(
            "column reference \"id\" is ambiguous",
            "SELECT id FROM a JOIN b ON a.x = b.x",
        );
        assert_eq!(a.kind, ErrorKind::AmbiguousColumn);
        assert!(a.quick_fix.as_deref().unwrap().contains("id"));
    }

    #[test]
    fn unmatched_error_falls_back_to_unknown() {
        let a = classify_error("something entirely novel happened", "SELECT 1");
        assert_eq!(a.kind, ErrorKind::Unknown);
        assert!(a.explanation.contains("novel"));
    }

    #[test]
    fn wrong_answer_is_warning_severity() {
        let outcome = CompareOutcome::RowCountMismatch {
            expected: 3,
            actual: 5,
        };
        let a = classify_wrong_answer(&outcome, "SELECT * FROM t");
        assert_eq!(a.kind, ErrorKind::WrongAnswer);
        assert_eq!(a.severity, Severity::Warning);
        assert!(a.suggestions.iter().any(|s| s.contains("extra rows")));
    }

    #[test]
    fn select_star_triggers_performance_hint() {
        let hints = performance_hints("SELECT * FROM employees");
        assert!(hints.iter().any(|h| h.contains("SELECT *")));
    }

    #[test]
    fn join_without_on_triggers_hint() {
        let hints = performance_hints("SELECT a.x FROM a JOIN b");
        assert!(hints.iter().any(|h| h.contains("ON conditions")));
        assert!(performance_hints("SELECT a.x FROM a JOIN b ON a.id = b.id")
            .iter()
            .all(|h| !h.contains("ON conditions")));
    }
}
