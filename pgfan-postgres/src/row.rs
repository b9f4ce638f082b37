//! Conversion of PostgreSQL rows into JSON-valued result rows.

use postgres_types::{FromSql, Type};
use serde_json::Value;
use tokio_postgres::Row;

use crate::error::{PgError, PgResult};
use crate::types::{PgVector, RawValue, VECTOR_TYPE, to_hex};

/// Convert a row into column name to JSON value pairs, in column order.
pub fn row_to_json(row: &Row) -> PgResult<pgfan_dispatch::Row> {
    let mut out = pgfan_dispatch::Row::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = column_value(row, idx, column.type_())
            .map_err(|e| e.in_column(column.name()))?;
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

fn column_value(row: &Row, idx: usize, ty: &Type) -> PgResult<Value> {
    let value = match *ty {
        Type::BOOL => get::<bool>(row, idx)?.map(Value::from),
        Type::INT2 => get::<i16>(row, idx)?.map(Value::from),
        Type::INT4 => get::<i32>(row, idx)?.map(Value::from),
        Type::INT8 => get::<i64>(row, idx)?.map(Value::from),
        Type::OID => get::<u32>(row, idx)?.map(Value::from),
        Type::FLOAT4 => get::<f32>(row, idx)?.map(|f| Value::from(f as f64)),
        Type::FLOAT8 => get::<f64>(row, idx)?.map(Value::from),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            get::<String>(row, idx)?.map(Value::from)
        }
        Type::JSON | Type::JSONB => get::<Value>(row, idx)?,
        Type::UUID => get::<uuid::Uuid>(row, idx)?.map(|u| Value::from(u.to_string())),
        Type::DATE => get::<chrono::NaiveDate>(row, idx)?.map(|d| Value::from(d.to_string())),
        Type::TIMESTAMP => get::<chrono::NaiveDateTime>(row, idx)?
            .map(|t| Value::from(t.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        Type::TIMESTAMPTZ => get::<chrono::DateTime<chrono::Utc>>(row, idx)?
            .map(|t| Value::from(t.to_rfc3339())),
        Type::BYTEA => get::<Vec<u8>>(row, idx)?.map(|b| Value::from(to_hex(&b))),
        Type::FLOAT4_ARRAY => get::<Vec<Option<f32>>>(row, idx)?.map(|v| {
            Value::Array(
                v.into_iter()
                    .map(|x| x.map(|f| Value::from(f as f64)).unwrap_or(Value::Null))
                    .collect(),
            )
        }),
        Type::FLOAT8_ARRAY => get::<Vec<Option<f64>>>(row, idx)?.map(array),
        Type::INT4_ARRAY => get::<Vec<Option<i32>>>(row, idx)?.map(array),
        Type::INT8_ARRAY => get::<Vec<Option<i64>>>(row, idx)?.map(array),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => get::<Vec<Option<String>>>(row, idx)?.map(array),
        _ if ty.name() == VECTOR_TYPE => get::<PgVector>(row, idx)?.map(|v| {
            Value::Array(
                v.into_vec()
                    .into_iter()
                    .map(|f| Value::from(f as f64))
                    .collect(),
            )
        }),
        _ => get::<RawValue>(row, idx)?.map(|raw| Value::from(to_hex(&raw.0))),
    };

    Ok(value.unwrap_or(Value::Null))
}

fn get<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> PgResult<Option<T>> {
    row.try_get::<_, Option<T>>(idx)
        .map_err(|e| PgError::deserialization(e.to_string()))
}

fn array<T: Into<Value>>(values: Vec<Option<T>>) -> Value {
    Value::Array(
        values
            .into_iter()
            .map(|v| v.map(Into::into).unwrap_or(Value::Null))
            .collect(),
    )
}

impl PgError {
    fn in_column(self, column: &str) -> Self {
        match self {
            PgError::Deserialization(msg) => {
                PgError::deserialization(format!("failed to read column '{}': {}", column, msg))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_array_keeps_nulls() {
        assert_eq!(array(vec![Some(1i64), None, Some(3)]), json!([1, null, 3]));
    }

    #[test]
    fn test_in_column_only_wraps_deserialization() {
        let err = PgError::deserialization("unexpected null").in_column("distance");
        assert_eq!(
            err.to_string(),
            "deserialization error: failed to read column 'distance': unexpected null"
        );

        let err = PgError::query("boom").in_column("distance");
        assert!(matches!(err, PgError::Query(_)));
    }
}
