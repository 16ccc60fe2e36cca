//! Bound parameter and column values.
//!
//! [`Value`] is the only carrier for caller data: builders never splice it into
//! command text, they register it and embed a placeholder instead.

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::error::Error;
use tokio_postgres::types::{FromSql, IsNull, Kind, ToSql, Type, to_sql_checked};
use uuid::Uuid;

#[cfg(feature = "rust_decimal")]
use rust_decimal::prelude::ToPrimitive;

/// A dynamically typed SQL value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    Json(serde_json::Value),
    Array(Vec<Value>),
    #[cfg(feature = "rust_decimal")]
    Decimal(rust_decimal::Decimal),
    /// Column of a type with no decoding, named by its engine type. Rows keep
    /// it so that targets which never read the column still materialize.
    Unsupported(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Serialize any `serde` value into a JSON value.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Value::Json)
    }

    /// Short name of the variant, used in decode errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::I16(_) => "int2",
            Value::I32(_) => "int4",
            Value::I64(_) => "int8",
            Value::F32(_) => "float4",
            Value::F64(_) => "float8",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytea",
            Value::Uuid(_) => "uuid",
            Value::Timestamp(_) => "timestamp",
            Value::TimestampTz(_) => "timestamptz",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Json(_) => "jsonb",
            Value::Array(_) => "array",
            #[cfg(feature = "rust_decimal")]
            Value::Decimal(_) => "numeric",
            Value::Unsupported(_) => "unsupported",
        }
    }
}

// ─── Rust → Value ───────────────────────────────────────────────────────────

macro_rules! impl_from_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

impl_from_scalar! {
    bool => Bool,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    String => Text,
    &str => Text,
    &String => Text,
    Vec<u8> => Bytes,
    Uuid => Uuid,
    NaiveDateTime => Timestamp,
    DateTime<Utc> => TimestampTz,
    NaiveDate => Date,
    NaiveTime => Time,
    serde_json::Value => Json,
}

#[cfg(feature = "rust_decimal")]
impl From<rust_decimal::Decimal> for Value {
    fn from(v: rust_decimal::Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

macro_rules! impl_from_vec {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<Vec<$ty>> for Value {
                fn from(v: Vec<$ty>) -> Self {
                    Value::Array(v.into_iter().map(Value::from).collect())
                }
            }
        )*
    };
}

impl_from_vec!(bool, i16, i32, i64, f32, f64, String, &str, Uuid, Value);

// ─── Value → Rust ───────────────────────────────────────────────────────────

/// Conversion out of a decoded [`Value`].
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, String>;

    /// Value to use when the column is absent from the row.
    ///
    /// `None` means absence is an error; nullable targets override this.
    fn absent() -> Option<Self> {
        None
    }
}

fn mismatch<T>(expected: &str, got: &Value) -> Result<T, String> {
    match got {
        Value::Unsupported(type_name) => Err(format!(
            "expected {expected}, got undecodable column type {type_name}"
        )),
        other => Err(format!("expected {expected}, got {}", other.kind())),
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, String> {
        Ok(value)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }

    fn absent() -> Option<Self> {
        Some(None)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Bool(v) => Ok(v),
            other => mismatch("bool", &other),
        }
    }
}

impl FromValue for i16 {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::I16(v) => Ok(v),
            other => mismatch("int2", &other),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::I16(v) => Ok(v.into()),
            Value::I32(v) => Ok(v),
            Value::I64(v) => i32::try_from(v).map_err(|e| e.to_string()),
            other => mismatch("int4", &other),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::I16(v) => Ok(v.into()),
            Value::I32(v) => Ok(v.into()),
            Value::I64(v) => Ok(v),
            // SUM(int8) and friends come back as numeric.
            #[cfg(feature = "rust_decimal")]
            Value::Decimal(v) if v.fract().is_zero() => {
                v.to_i64().ok_or_else(|| format!("numeric {v} out of range for int8"))
            }
            other => mismatch("int8", &other),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::F32(v) => Ok(v),
            other => mismatch("float4", &other),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::F32(v) => Ok(v.into()),
            Value::F64(v) => Ok(v),
            Value::I16(v) => Ok(v.into()),
            Value::I32(v) => Ok(v.into()),
            Value::I64(v) => Ok(v as f64),
            #[cfg(feature = "rust_decimal")]
            Value::Decimal(v) => v
                .to_f64()
                .ok_or_else(|| format!("numeric {v} out of range for float8")),
            other => mismatch("float8", &other),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Text(v) => Ok(v),
            other => mismatch("text", &other),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Bytes(v) => Ok(v),
            other => mismatch("bytea", &other),
        }
    }
}

impl FromValue for Uuid {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Uuid(v) => Ok(v),
            other => mismatch("uuid", &other),
        }
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Timestamp(v) => Ok(v),
            Value::TimestampTz(v) => Ok(v.naive_utc()),
            other => mismatch("timestamp", &other),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::TimestampTz(v) => Ok(v),
            Value::Timestamp(v) => Ok(v.and_utc()),
            other => mismatch("timestamptz", &other),
        }
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Date(v) => Ok(v),
            other => mismatch("date", &other),
        }
    }
}

impl FromValue for NaiveTime {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Time(v) => Ok(v),
            other => mismatch("time", &other),
        }
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Json(v) => Ok(v),
            other => mismatch("json", &other),
        }
    }
}

#[cfg(feature = "rust_decimal")]
impl FromValue for rust_decimal::Decimal {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Decimal(v) => Ok(v),
            Value::I16(v) => Ok(v.into()),
            Value::I32(v) => Ok(v.into()),
            Value::I64(v) => Ok(v.into()),
            other => mismatch("numeric", &other),
        }
    }
}

macro_rules! impl_from_value_vec {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FromValue for Vec<$ty> {
                fn from_value(value: Value) -> Result<Self, String> {
                    match value {
                        Value::Array(items) => items.into_iter().map(<$ty>::from_value).collect(),
                        other => mismatch("array", &other),
                    }
                }
            }
        )*
    };
}

impl_from_value_vec!(bool, i16, i32, i64, f32, f64, String, Uuid, Option<String>, Value);

/// JSON column decoded through `serde`.
#[derive(Debug, Clone, PartialEq)]
pub struct Json<T>(pub T);

impl<T: DeserializeOwned> FromValue for Json<T> {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Json(v) => serde_json::from_value(v).map(Json).map_err(|e| e.to_string()),
            other => mismatch("json", &other),
        }
    }
}

impl<T: Serialize> From<Json<T>> for Value {
    fn from(v: Json<T>) -> Self {
        serde_json::to_value(&v.0).map_or(Value::Null, Value::Json)
    }
}

// ─── ToSql / FromSql ────────────────────────────────────────────────────────

fn int_to_sql(
    v: i64,
    ty: &Type,
    out: &mut BytesMut,
) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
    match *ty {
        Type::INT2 => i16::try_from(v)?.to_sql(ty, out),
        Type::INT4 => i32::try_from(v)?.to_sql(ty, out),
        Type::FLOAT4 => (v as f32).to_sql(ty, out),
        Type::FLOAT8 => (v as f64).to_sql(ty, out),
        #[cfg(feature = "rust_decimal")]
        Type::NUMERIC => rust_decimal::Decimal::from(v).to_sql(ty, out),
        _ => v.to_sql_checked(ty, out),
    }
}

fn float_to_sql(
    v: f64,
    ty: &Type,
    out: &mut BytesMut,
) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
    match *ty {
        Type::FLOAT4 => (v as f32).to_sql(ty, out),
        _ => v.to_sql_checked(ty, out),
    }
}

impl ToSql for Value {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(v) => v.to_sql_checked(ty, out),
            Value::I16(v) => int_to_sql(i64::from(*v), ty, out),
            Value::I32(v) => int_to_sql(i64::from(*v), ty, out),
            Value::I64(v) => int_to_sql(*v, ty, out),
            Value::F32(v) => float_to_sql(f64::from(*v), ty, out),
            Value::F64(v) => float_to_sql(*v, ty, out),
            Value::Text(v) => {
                if matches!(ty.kind(), Kind::Enum(_)) {
                    out.extend_from_slice(v.as_bytes());
                    Ok(IsNull::No)
                } else {
                    v.to_sql_checked(ty, out)
                }
            }
            Value::Bytes(v) => v.to_sql_checked(ty, out),
            Value::Uuid(v) => v.to_sql_checked(ty, out),
            Value::Timestamp(v) => v.to_sql_checked(ty, out),
            Value::TimestampTz(v) => v.to_sql_checked(ty, out),
            Value::Date(v) => v.to_sql_checked(ty, out),
            Value::Time(v) => v.to_sql_checked(ty, out),
            Value::Json(v) => v.to_sql_checked(ty, out),
            Value::Array(items) => items.to_sql_checked(ty, out),
            #[cfg(feature = "rust_decimal")]
            Value::Decimal(v) => v.to_sql_checked(ty, out),
            Value::Unsupported(type_name) => {
                Err(format!("cannot bind a value of undecodable type {type_name}").into())
            }
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

impl<'a> FromSql<'a> for Value {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        if let Kind::Array(_) = ty.kind() {
            return Vec::<Value>::from_sql(ty, raw).map(Value::Array);
        }
        if let Kind::Enum(_) = ty.kind() {
            return Ok(Value::Text(std::str::from_utf8(raw)?.to_string()));
        }
        Ok(match *ty {
            Type::BOOL => Value::Bool(bool::from_sql(ty, raw)?),
            Type::INT2 => Value::I16(i16::from_sql(ty, raw)?),
            Type::INT4 => Value::I32(i32::from_sql(ty, raw)?),
            Type::INT8 => Value::I64(i64::from_sql(ty, raw)?),
            Type::FLOAT4 => Value::F32(f32::from_sql(ty, raw)?),
            Type::FLOAT8 => Value::F64(f64::from_sql(ty, raw)?),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
                Value::Text(String::from_sql(ty, raw)?)
            }
            Type::BYTEA => Value::Bytes(Vec::<u8>::from_sql(ty, raw)?),
            Type::UUID => Value::Uuid(Uuid::from_sql(ty, raw)?),
            Type::TIMESTAMP => Value::Timestamp(NaiveDateTime::from_sql(ty, raw)?),
            Type::TIMESTAMPTZ => Value::TimestampTz(DateTime::<Utc>::from_sql(ty, raw)?),
            Type::DATE => Value::Date(NaiveDate::from_sql(ty, raw)?),
            Type::TIME => Value::Time(NaiveTime::from_sql(ty, raw)?),
            Type::JSON | Type::JSONB => Value::Json(serde_json::Value::from_sql(ty, raw)?),
            #[cfg(feature = "rust_decimal")]
            Type::NUMERIC => Value::Decimal(rust_decimal::Decimal::from_sql(ty, raw)?),
            _ => Value::Unsupported(ty.name().to_string()),
        })
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(Value::Null)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_map_to_null() {
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".into()));
    }

    #[test]
    fn integers_widen_on_read() {
        assert_eq!(i64::from_value(Value::I32(7)), Ok(7));
        assert_eq!(f64::from_value(Value::I16(2)), Ok(2.0));
        assert!(i16::from_value(Value::I64(1)).is_err());
    }

    #[test]
    fn nullable_targets_accept_absence() {
        assert_eq!(<Option<String>>::absent(), Some(None));
        assert_eq!(<String>::absent(), None);
        assert_eq!(<Option<i32>>::from_value(Value::Null), Ok(None));
    }

    #[test]
    fn arrays_round_trip_through_vec() {
        let v = Value::from(vec!["a", "b"]);
        assert_eq!(
            <Vec<String>>::from_value(v),
            Ok(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn int_params_follow_the_target_type() {
        let mut buf = BytesMut::new();
        Value::I64(3).to_sql(&Type::INT4, &mut buf).unwrap();
        assert_eq!(buf.as_ref(), &3i32.to_be_bytes());

        let mut buf = BytesMut::new();
        assert!(Value::I64(i64::MAX).to_sql(&Type::INT2, &mut buf).is_err());
    }

    #[test]
    fn unknown_column_types_decode_to_a_marker() {
        let raw = [0u8; 16];
        let v = Value::from_sql(&Type::INTERVAL, &raw).unwrap();
        assert_eq!(v, Value::Unsupported("interval".into()));

        let err = i32::from_value(v).unwrap_err();
        assert!(err.contains("interval"), "{err}");
    }

    #[test]
    fn unsupported_values_refuse_to_bind() {
        let mut buf = BytesMut::new();
        assert!(
            Value::Unsupported("inet".into())
                .to_sql(&Type::INET, &mut buf)
                .is_err()
        );
    }

    #[cfg(feature = "rust_decimal")]
    #[test]
    fn numeric_aggregates_read_as_numbers() {
        use rust_decimal::Decimal;

        assert_eq!(i64::from_value(Value::Decimal(Decimal::from(125))), Ok(125));
        assert!(i64::from_value(Value::Decimal(Decimal::new(15, 1))).is_err());
        assert_eq!(f64::from_value(Value::Decimal(Decimal::new(15, 1))), Ok(1.5));
    }

    #[test]
    fn json_decodes_through_serde() {
        #[derive(serde::Deserialize, PartialEq, Debug)]
        struct Tag {
            name: String,
        }
        let v = Value::Json(serde_json::json!({ "name": "x" }));
        let Json(tag) = Json::<Tag>::from_value(v).unwrap();
        assert_eq!(tag.name, "x");
    }
}
