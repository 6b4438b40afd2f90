use serde::{Deserialize, Serialize};

/// One result row. Key order matters: the comparator checks columns in
/// the order the statement produced them (serde_json preserves it).
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Result set of a sandboxed statement, capped for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    /// True count before the display cap was applied.
    pub row_count: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompareOutcome {
    Match,
    ColumnMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },
    RowCountMismatch {
        expected: usize,
        actual: usize,
    },
    RowMismatch {
        index: usize,
        column: String,
    },
}

impl CompareOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, CompareOutcome::Match)
    }

    /// Short learner-facing explanation of the first difference found.
    pub fn feedback(&self) -> String {
        match self {
            CompareOutcome::Match => "Correct! Your query produced the expected result.".into(),
            CompareOutcome::ColumnMismatch { expected, actual } => format!(
                "Column mismatch: expected [{}], got [{}]. Check your SELECT list and aliases.",
                expected.join(", "),
                actual.join(", ")
            ),
            CompareOutcome::RowCountMismatch { expected, actual } => format!(
                "Row count mismatch: expected {} rows, got {}. Check your WHERE and JOIN conditions.",
                expected, actual
            ),
            CompareOutcome::RowMismatch { index, column } => format!(
                "Value mismatch at row {} in column '{}'.",
                index + 1,
                column
            ),
        }
    }
}

/// Error taxonomy assigned by the classifier. Ordering here is cosmetic;
/// matching precedence lives in the classifier's pattern table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SyntaxError,
    TableNotFound,
    ColumnNotFound,
    FunctionNotFound,
    AmbiguousColumn,
    GroupByViolation,
    AggregateMisuse,
    TypeMismatch,
    DivisionByZero,
    SubqueryError,
    PermissionDenied,
    Timeout,
    ForbiddenStatement,
    WrongAnswer,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Educational breakdown attached to failed attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorAnalysis {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub title: String,
    pub explanation: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub suggestions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quick_fix: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub performance_hints: Vec<String>,
}
