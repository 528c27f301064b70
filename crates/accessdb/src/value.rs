//! SQL value types bridging domain fields and driver parameters.
//!
//! `SqlValue` is the single representation used in three places: write
//! parameters produced by the binder, cells decoded from result rows, and
//! cells encoded into the binary COPY stream. Keeping one enum for all three
//! means a value survives a round trip without lossy conversions.

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use uuid::Uuid;

/// Type hint for NULL values so the COPY encoder and parameter binder can
/// emit the correct wire format for a typed NULL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlNullType {
    Bool,
    I32,
    I64,
    F64,
    Text,
    Bytes,
    Uuid,
    Decimal,
    Timestamptz,
    Date,
    Json,
}

/// SQL value enum for type-safe parameter and row handling.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL with a type hint for wire-format encoding.
    Null(SqlNullType),

    /// Boolean value.
    Bool(bool),

    /// 32-bit signed integer (int4).
    I32(i32),

    /// 64-bit signed integer (int8).
    I64(i64),

    /// 64-bit floating point (float8).
    F64(f64),

    /// Text data.
    Text(String),

    /// Binary data (bytea).
    Bytes(Vec<u8>),

    /// UUID value.
    Uuid(Uuid),

    /// Arbitrary-precision numeric value.
    Decimal(Decimal),

    /// Timestamp with time zone, normalized to UTC.
    Timestamptz(DateTime<Utc>),

    /// Date without time component.
    Date(NaiveDate),

    /// JSON document (json/jsonb columns, collection projections).
    Json(serde_json::Value),
}

impl SqlValue {
    /// Whether this value is a SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null(_))
    }

    /// Short name of the contained variant, used in binding errors.
    pub fn kind(&self) -> &'static str {
        match self {
            SqlValue::Null(_) => "null",
            SqlValue::Bool(_) => "bool",
            SqlValue::I32(_) => "int4",
            SqlValue::I64(_) => "int8",
            SqlValue::F64(_) => "float8",
            SqlValue::Text(_) => "text",
            SqlValue::Bytes(_) => "bytea",
            SqlValue::Uuid(_) => "uuid",
            SqlValue::Decimal(_) => "numeric",
            SqlValue::Timestamptz(_) => "timestamptz",
            SqlValue::Date(_) => "date",
            SqlValue::Json(_) => "json",
        }
    }

    /// Render a short literal preview for error messages. Text is truncated
    /// so oversized payloads do not flood logs.
    pub fn preview(&self) -> String {
        match self {
            SqlValue::Null(_) => "NULL".to_string(),
            SqlValue::Bool(v) => v.to_string(),
            SqlValue::I32(v) => v.to_string(),
            SqlValue::I64(v) => v.to_string(),
            SqlValue::F64(v) => v.to_string(),
            SqlValue::Text(s) => {
                if s.len() > 64 {
                    format!("'{}…'", truncate_at_char(s, 64))
                } else {
                    format!("'{}'", s)
                }
            }
            SqlValue::Bytes(b) => format!("<{} bytes>", b.len()),
            SqlValue::Uuid(u) => format!("'{}'", u),
            SqlValue::Decimal(d) => d.to_string(),
            SqlValue::Timestamptz(t) => format!("'{}'", t.to_rfc3339()),
            SqlValue::Date(d) => format!("'{}'", d),
            SqlValue::Json(v) => {
                let s = v.to_string();
                if s.len() > 64 {
                    format!("{}…", truncate_at_char(&s, 64))
                } else {
                    s
                }
            }
        }
    }
}

/// Cut a string at (or just before) a byte position without splitting a
/// multi-byte character.
fn truncate_at_char(s: &str, max: usize) -> &str {
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            SqlValue::Null(_) => Ok(IsNull::Yes),
            SqlValue::Bool(v) => v.to_sql(ty, out),
            SqlValue::I32(v) => v.to_sql(ty, out),
            SqlValue::I64(v) => v.to_sql(ty, out),
            SqlValue::F64(v) => v.to_sql(ty, out),
            SqlValue::Text(v) => v.to_sql(ty, out),
            SqlValue::Bytes(v) => v.to_sql(ty, out),
            SqlValue::Uuid(v) => v.to_sql(ty, out),
            SqlValue::Decimal(v) => v.to_sql(ty, out),
            SqlValue::Timestamptz(v) => v.to_sql(ty, out),
            SqlValue::Date(v) => v.to_sql(ty, out),
            SqlValue::Json(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        // The variant decides the wire format; mismatches surface as driver
        // encode errors naming the column type.
        true
    }

    to_sql_checked!();
}

/// Conversion error raised when a row cell does not match the requested
/// field type. Wrapped into `DbError::Bind` with type/column context by the
/// binder helpers.
#[derive(Debug)]
pub struct ValueError {
    pub expected: &'static str,
    pub got: &'static str,
}

impl std::fmt::Display for ValueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "expected {}, got {}", self.expected, self.got)
    }
}

impl std::error::Error for ValueError {}

/// Typed extraction out of a `SqlValue`, used by the result binder.
pub trait FromSqlValue: Sized {
    fn from_sql_value(value: SqlValue) -> std::result::Result<Self, ValueError>;
}

macro_rules! from_sql_value {
    ($ty:ty, $variant:ident, $expected:literal) => {
        impl FromSqlValue for $ty {
            fn from_sql_value(value: SqlValue) -> std::result::Result<Self, ValueError> {
                match value {
                    SqlValue::$variant(v) => Ok(v),
                    other => Err(ValueError {
                        expected: $expected,
                        got: other.kind(),
                    }),
                }
            }
        }
    };
}

from_sql_value!(bool, Bool, "bool");
from_sql_value!(i64, I64, "int8");
from_sql_value!(f64, F64, "float8");
from_sql_value!(String, Text, "text");
from_sql_value!(Vec<u8>, Bytes, "bytea");
from_sql_value!(Uuid, Uuid, "uuid");
from_sql_value!(Decimal, Decimal, "numeric");
from_sql_value!(DateTime<Utc>, Timestamptz, "timestamptz");
from_sql_value!(NaiveDate, Date, "date");
from_sql_value!(serde_json::Value, Json, "json");

impl FromSqlValue for i32 {
    fn from_sql_value(value: SqlValue) -> std::result::Result<Self, ValueError> {
        match value {
            SqlValue::I32(v) => Ok(v),
            // int8 narrows when it fits; counts come back as int8.
            SqlValue::I64(v) => i32::try_from(v).map_err(|_| ValueError {
                expected: "int4",
                got: "int8",
            }),
            other => Err(ValueError {
                expected: "int4",
                got: other.kind(),
            }),
        }
    }
}

impl<T: FromSqlValue> FromSqlValue for Option<T> {
    fn from_sql_value(value: SqlValue) -> std::result::Result<Self, ValueError> {
        match value {
            SqlValue::Null(_) => Ok(None),
            other => T::from_sql_value(other).map(Some),
        }
    }
}

/// The NULL hint that belongs to a concrete value type, so optional fields
/// can produce typed NULL parameters.
pub trait NullHint {
    const NULL: SqlNullType;
}

macro_rules! null_hint {
    ($ty:ty, $null:ident) => {
        impl NullHint for $ty {
            const NULL: SqlNullType = SqlNullType::$null;
        }
    };
}

null_hint!(bool, Bool);
null_hint!(i32, I32);
null_hint!(i64, I64);
null_hint!(f64, F64);
null_hint!(String, Text);
null_hint!(Vec<u8>, Bytes);
null_hint!(Uuid, Uuid);
null_hint!(Decimal, Decimal);
null_hint!(DateTime<Utc>, Timestamptz);
null_hint!(NaiveDate, Date);
null_hint!(serde_json::Value, Json);

macro_rules! into_sql_value {
    ($ty:ty, $variant:ident) => {
        impl From<$ty> for SqlValue {
            fn from(v: $ty) -> Self {
                SqlValue::$variant(v)
            }
        }
    };
}

into_sql_value!(bool, Bool);
into_sql_value!(i32, I32);
into_sql_value!(i64, I64);
into_sql_value!(f64, F64);
into_sql_value!(String, Text);
into_sql_value!(Vec<u8>, Bytes);
into_sql_value!(Uuid, Uuid);
into_sql_value!(Decimal, Decimal);
into_sql_value!(DateTime<Utc>, Timestamptz);
into_sql_value!(NaiveDate, Date);
into_sql_value!(serde_json::Value, Json);

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl<T> From<Option<T>> for SqlValue
where
    T: Into<SqlValue> + NullHint,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => SqlValue::Null(T::NULL),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_conversion() {
        let v: SqlValue = Option::<String>::None.into();
        assert_eq!(v, SqlValue::Null(SqlNullType::Text));

        let v: SqlValue = Some("hello".to_string()).into();
        assert_eq!(v, SqlValue::Text("hello".into()));
    }

    #[test]
    fn test_from_sql_value_null_into_option() {
        let v = Option::<Uuid>::from_sql_value(SqlValue::Null(SqlNullType::Uuid)).unwrap();
        assert!(v.is_none());
    }

    #[test]
    fn test_from_sql_value_mismatch() {
        let err = Uuid::from_sql_value(SqlValue::Text("not-a-uuid".into())).unwrap_err();
        assert_eq!(err.expected, "uuid");
        assert_eq!(err.got, "text");
    }

    #[test]
    fn test_i32_narrows_from_i64() {
        assert_eq!(i32::from_sql_value(SqlValue::I64(42)).unwrap(), 42);
        assert!(i32::from_sql_value(SqlValue::I64(i64::MAX)).is_err());
    }

    #[test]
    fn test_preview_truncates_long_text() {
        let long = "x".repeat(200);
        let preview = SqlValue::Text(long).preview();
        assert!(preview.len() < 80);
    }
}
