//! Values and results exchanged with connections.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A single bind value for a query parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// SQL NULL.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating-point value.
    Float(f64),
    /// Text value.
    String(String),
    /// A query vector (pgvector `vector` or `real[]`).
    Vector(Vec<f32>),
    /// Arbitrary JSON.
    Json(serde_json::Value),
}

impl ParamValue {
    /// Check if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Create a vector parameter.
    pub fn vector(values: impl Into<Vec<f32>>) -> Self {
        Self::Vector(values.into())
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<f32>> for ParamValue {
    fn from(v: Vec<f32>) -> Self {
        Self::Vector(v)
    }
}

impl From<&[f32]> for ParamValue {
    fn from(v: &[f32]) -> Self {
        Self::Vector(v.to_vec())
    }
}

impl From<serde_json::Value> for ParamValue {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// The bind values for one query execution.
///
/// Its position in the request is the task index.
pub type ParameterSet = Vec<ParamValue>;

/// A result row: column name to value, in column order.
pub type Row = IndexMap<String, serde_json::Value>;

/// What a connection returns for one query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    /// Column names, in select-list order.
    pub fields: Vec<String>,
    /// Result rows.
    pub rows: Vec<Row>,
}

impl QueryOutput {
    /// Create an output from column names and rows.
    pub fn new(fields: Vec<String>, rows: Vec<Row>) -> Self {
        Self { fields, rows }
    }
}

/// Vector distance operators recognized in search templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DistanceOperator {
    /// Euclidean distance.
    L2,
    /// Cosine distance.
    Cosine,
    /// Negative inner product.
    InnerProduct,
    /// Taxicab distance.
    L1,
    /// Hamming distance (bit vectors).
    Hamming,
    /// Jaccard distance (bit vectors).
    Jaccard,
}

impl DistanceOperator {
    /// Every operator, in token-check order.
    pub const ALL: [DistanceOperator; 6] = [
        Self::L2,
        Self::Cosine,
        Self::InnerProduct,
        Self::L1,
        Self::Hamming,
        Self::Jaccard,
    ];

    /// The SQL operator token.
    pub fn token(&self) -> &'static str {
        match self {
            Self::L2 => "<->",
            Self::Cosine => "<=>",
            Self::InnerProduct => "<#>",
            Self::L1 => "<+>",
            Self::Hamming => "<~>",
            Self::Jaccard => "<%>",
        }
    }

    /// Operators whose token appears anywhere in `sql`.
    pub fn find_in(sql: &str) -> Vec<DistanceOperator> {
        Self::ALL
            .into_iter()
            .filter(|op| sql.contains(op.token()))
            .collect()
    }
}

impl fmt::Display for DistanceOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Outcome of one task.
///
/// A failed task has `success == false`, an `error` message, and empty
/// `fields`/`data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Whether the query succeeded.
    pub success: bool,
    /// Column names.
    pub fields: Vec<String>,
    /// Result rows.
    pub data: Vec<Row>,
    /// Failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Position of the parameter set in the request.
    pub index: usize,
}

impl TaskResult {
    /// Build a successful result.
    pub fn success(index: usize, output: QueryOutput) -> Self {
        Self {
            success: true,
            fields: output.fields,
            data: output.rows,
            error: None,
            index,
        }
    }

    /// Build a failed result.
    pub fn failure(index: usize, error: impl Into<String>) -> Self {
        Self {
            success: false,
            fields: Vec::new(),
            data: Vec::new(),
            error: Some(error.into()),
            index,
        }
    }

    /// Number of rows returned.
    pub fn row_count(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_param_value_conversions() {
        assert_eq!(ParamValue::from(7), ParamValue::Int(7));
        assert_eq!(ParamValue::from("x"), ParamValue::String("x".into()));
        assert_eq!(
            ParamValue::from(vec![0.5f32, 1.0]),
            ParamValue::Vector(vec![0.5, 1.0])
        );
        assert!(ParamValue::from(None::<i64>).is_null());
    }

    #[test]
    fn test_param_value_from_json() {
        let values: Vec<ParamValue> =
            serde_json::from_value(json!([null, true, 3, 1.5, "a"])).unwrap();
        assert_eq!(
            values,
            vec![
                ParamValue::Null,
                ParamValue::Bool(true),
                ParamValue::Int(3),
                ParamValue::Float(1.5),
                ParamValue::String("a".into()),
            ]
        );
    }

    #[test]
    fn test_distance_operator_tokens() {
        assert_eq!(DistanceOperator::Cosine.token(), "<=>");
        assert_eq!(
            DistanceOperator::find_in("SELECT a <-> $1, b <#> $2 FROM t"),
            vec![DistanceOperator::L2, DistanceOperator::InnerProduct]
        );
        assert!(DistanceOperator::find_in("SELECT 1").is_empty());
    }

    #[test]
    fn test_task_result_failure_shape() {
        let result = TaskResult::failure(3, "boom");
        assert!(!result.success);
        assert!(result.fields.is_empty());
        assert!(result.data.is_empty());
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert_eq!(result.index, 3);
    }

    #[test]
    fn test_task_result_serializes() {
        let mut row = Row::new();
        row.insert("id".into(), json!(1));
        let result = TaskResult::success(0, QueryOutput::new(vec!["id".into()], vec![row]));

        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"success": true, "fields": ["id"], "data": [{"id": 1}], "index": 0})
        );
    }
}
