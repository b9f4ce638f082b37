//! Type conversions between pgfan values and PostgreSQL.
//!
//! Parameters are bound through [`PgParam`], which looks at the type the
//! server inferred for each placeholder and encodes the value to match:
//! an integer bound to an `int4` parameter is sent as `int4`, a vector bound
//! to a pgvector `vector` parameter is sent in pgvector's binary format.

use std::error::Error;

use bytes::{Buf, BufMut, BytesMut};
use pgfan_dispatch::ParamValue;
use postgres_types::{FromSql, IsNull, ToSql, Type, to_sql_checked};

/// Boxed error type used by `ToSql`/`FromSql`.
pub type SqlError = Box<dyn Error + Sync + Send>;

/// Name of pgvector's dense vector type.
pub const VECTOR_TYPE: &str = "vector";

/// Maximum dimensions pgvector accepts for a `vector`.
pub const MAX_VECTOR_DIMENSIONS: usize = 16_000;

fn is_vector(ty: &Type) -> bool {
    ty.name() == VECTOR_TYPE
}

fn mismatch(kind: &str, ty: &Type) -> SqlError {
    format!("cannot bind {} value to parameter of type {}", kind, ty).into()
}

/// A parameter value adapted to the placeholder's declared type.
#[derive(Debug)]
pub struct PgParam<'a>(pub &'a ParamValue);

impl<'a> PgParam<'a> {
    /// Wrap a value.
    pub fn new(value: &'a ParamValue) -> Self {
        Self(value)
    }
}

impl ToSql for PgParam<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, SqlError> {
        match self.0 {
            ParamValue::Null => Ok(IsNull::Yes),
            ParamValue::Bool(b) => match *ty {
                Type::BOOL => b.to_sql(ty, out),
                _ => Err(mismatch("boolean", ty)),
            },
            ParamValue::Int(i) => match *ty {
                Type::INT2 => i16::try_from(*i)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*i)?.to_sql(ty, out),
                Type::INT8 => i.to_sql(ty, out),
                Type::OID => u32::try_from(*i)?.to_sql(ty, out),
                Type::FLOAT4 => (*i as f32).to_sql(ty, out),
                Type::FLOAT8 => (*i as f64).to_sql(ty, out),
                _ => Err(mismatch("integer", ty)),
            },
            ParamValue::Float(f) => match *ty {
                Type::FLOAT4 => (*f as f32).to_sql(ty, out),
                Type::FLOAT8 => f.to_sql(ty, out),
                _ => Err(mismatch("float", ty)),
            },
            ParamValue::String(s) => {
                if <&str as ToSql>::accepts(ty) {
                    s.as_str().to_sql(ty, out)
                } else if is_vector(ty) {
                    parse_vector_literal(s)?.to_sql(ty, out)
                } else {
                    Err(mismatch("text", ty))
                }
            }
            ParamValue::Vector(v) => {
                if is_vector(ty) {
                    encode_vector(v, out)
                } else {
                    match *ty {
                        Type::FLOAT4_ARRAY => v.to_sql(ty, out),
                        Type::FLOAT8_ARRAY => v
                            .iter()
                            .map(|x| *x as f64)
                            .collect::<Vec<f64>>()
                            .to_sql(ty, out),
                        _ => Err(mismatch("vector", ty)),
                    }
                }
            }
            ParamValue::Json(j) => match *ty {
                Type::JSON | Type::JSONB => j.to_sql(ty, out),
                _ => Err(mismatch("json", ty)),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// A pgvector `vector` value.
#[derive(Debug, Clone, PartialEq)]
pub struct PgVector(pub Vec<f32>);

impl PgVector {
    /// Borrow the components.
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Take the components.
    pub fn into_vec(self) -> Vec<f32> {
        self.0
    }
}

impl From<Vec<f32>> for PgVector {
    fn from(v: Vec<f32>) -> Self {
        Self(v)
    }
}

impl ToSql for PgVector {
    fn to_sql(&self, _ty: &Type, out: &mut BytesMut) -> Result<IsNull, SqlError> {
        encode_vector(&self.0, out)
    }

    fn accepts(ty: &Type) -> bool {
        is_vector(ty)
    }

    to_sql_checked!();
}

impl<'a> FromSql<'a> for PgVector {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, SqlError> {
        decode_vector(raw).map(PgVector)
    }

    fn accepts(ty: &Type) -> bool {
        is_vector(ty)
    }
}

/// Write `values` in pgvector's binary format: dimension count (u16),
/// a reserved u16, then each component as a big-endian f32.
fn encode_vector(values: &[f32], out: &mut BytesMut) -> Result<IsNull, SqlError> {
    if values.len() > MAX_VECTOR_DIMENSIONS {
        return Err(format!(
            "vector has {} dimensions, at most {} are supported",
            values.len(),
            MAX_VECTOR_DIMENSIONS
        )
        .into());
    }

    out.reserve(4 + values.len() * 4);
    out.put_u16(values.len() as u16);
    out.put_u16(0);
    for value in values {
        out.put_f32(*value);
    }
    Ok(IsNull::No)
}

fn decode_vector(mut raw: &[u8]) -> Result<Vec<f32>, SqlError> {
    if raw.len() < 4 {
        return Err("vector value is truncated".into());
    }

    let dims = raw.get_u16() as usize;
    let _reserved = raw.get_u16();
    if raw.len() != dims * 4 {
        return Err(format!(
            "vector declares {} dimensions but carries {} bytes",
            dims,
            raw.len()
        )
        .into());
    }

    Ok((0..dims).map(|_| raw.get_f32()).collect())
}

/// Parse pgvector's text form, e.g. `[1,2.5,-3]`.
pub fn parse_vector_literal(text: &str) -> Result<PgVector, SqlError> {
    let inner = text
        .trim()
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .ok_or_else(|| format!("invalid vector literal: {}", text))?;

    if inner.trim().is_empty() {
        return Ok(PgVector(Vec::new()));
    }

    inner
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .map_err(|e| SqlError::from(format!("invalid vector component '{}': {}", part.trim(), e)))
        })
        .collect::<Result<Vec<f32>, SqlError>>()
        .map(PgVector)
}

/// Accepts any type and keeps the raw binary representation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawValue(pub Vec<u8>);

impl<'a> FromSql<'a> for RawValue {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, SqlError> {
        Ok(Self(raw.to_vec()))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// Hex-encode bytes in PostgreSQL's `\x...` style.
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for byte in bytes {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}
