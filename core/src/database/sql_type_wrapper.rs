use std::{
    collections::BTreeMap,
    fmt,
    hash::{Hash, Hasher},
};

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rusqlite::types::{ToSqlOutput, Value as SqliteValue};
use rust_decimal::Decimal;
use serde_json::Value;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type as PgType};
use uuid::Uuid;

/// A typed value a caller wants stored in one column of one record.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),

    I16(i16),
    I32(i32),
    I64(i64),

    F32(f32),
    F64(f64),
    Numeric(Decimal),

    Text(String),
    Bytes(Vec<u8>),

    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Interval(Duration),

    Uuid(Uuid),
    /// A JSON document. `Json(Value::Null)` is the JSON literal `null`, not SQL NULL.
    Json(Value),

    Array(Vec<SqlValue>),
    HStore(BTreeMap<String, Option<String>>),
    Range(Box<RangeValue>),

    /// A database-side expression such as `"counter" + 1`. Never batchable.
    Expression(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RangeValue {
    Empty,
    Bounded { lower: RangeBound, upper: RangeBound },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RangeBound {
    Unbounded,
    Inclusive(SqlValue),
    Exclusive(SqlValue),
}

impl RangeBound {
    pub fn value(&self) -> Option<&SqlValue> {
        match self {
            RangeBound::Unbounded => None,
            RangeBound::Inclusive(value) | RangeBound::Exclusive(value) => Some(value),
        }
    }

    pub fn is_inclusive(&self) -> bool {
        matches!(self, RangeBound::Inclusive(_))
    }
}

impl SqlValue {
    pub fn array<T: Into<SqlValue>>(values: impl IntoIterator<Item = T>) -> Self {
        SqlValue::Array(values.into_iter().map(Into::into).collect())
    }

    pub fn range(lower: RangeBound, upper: RangeBound) -> Self {
        SqlValue::Range(Box::new(RangeValue::Bounded { lower, upper }))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn is_expression(&self) -> bool {
        matches!(self, SqlValue::Expression(_))
    }

    pub fn raw_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Bool(_) => "bool",
            SqlValue::I16(_) => "i16",
            SqlValue::I32(_) => "i32",
            SqlValue::I64(_) => "i64",
            SqlValue::F32(_) => "f32",
            SqlValue::F64(_) => "f64",
            SqlValue::Numeric(_) => "decimal",
            SqlValue::Text(_) => "text",
            SqlValue::Bytes(_) => "bytes",
            SqlValue::Date(_) => "date",
            SqlValue::Time(_) => "time",
            SqlValue::Timestamp(_) => "timestamp",
            SqlValue::TimestampTz(_) => "timestamptz",
            SqlValue::Interval(_) => "interval",
            SqlValue::Uuid(_) => "uuid",
            SqlValue::Json(_) => "json",
            SqlValue::Array(_) => "array",
            SqlValue::HStore(_) => "hstore",
            SqlValue::Range(_) => "range",
            SqlValue::Expression(_) => "expression",
        }
    }

    pub(crate) fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::I16(v) => Some(i64::from(*v)),
            SqlValue::I32(v) => Some(i64::from(*v)),
            SqlValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Equality as the database would store the two values.
    ///
    /// Integers compare across widths, floats by bit pattern with `-0.0`
    /// folded into `0.0`, decimals by value regardless of trailing zeros, and
    /// `Null` equals `Null`. Only ever used for
    /// grouping, never to build SQL predicates.
    pub fn storage_eq(&self, other: &SqlValue) -> bool {
        if let (Some(a), Some(b)) = (self.as_i64(), other.as_i64()) {
            return a == b;
        }

        match (self, other) {
            (SqlValue::F32(a), SqlValue::F32(b)) => f32_bits(*a) == f32_bits(*b),
            (SqlValue::F64(a), SqlValue::F64(b)) => f64_bits(*a) == f64_bits(*b),
            (SqlValue::Numeric(a), SqlValue::Numeric(b)) => {
                let (a, b) = (a.normalize(), b.normalize());
                a.mantissa() == b.mantissa() && a.scale() == b.scale()
            }
            (SqlValue::Array(a), SqlValue::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.storage_eq(y))
            }
            (SqlValue::Range(a), SqlValue::Range(b)) => match (a.as_ref(), b.as_ref()) {
                (RangeValue::Empty, RangeValue::Empty) => true,
                (
                    RangeValue::Bounded { lower: al, upper: au },
                    RangeValue::Bounded { lower: bl, upper: bu },
                ) => bound_storage_eq(al, bl) && bound_storage_eq(au, bu),
                _ => false,
            },
            _ => self == other,
        }
    }

    /// Hash consistent with [`SqlValue::storage_eq`].
    pub fn storage_hash<H: Hasher>(&self, state: &mut H) {
        if let Some(v) = self.as_i64() {
            state.write_u8(2);
            v.hash(state);
            return;
        }

        match self {
            SqlValue::Null => state.write_u8(0),
            SqlValue::Bool(v) => {
                state.write_u8(1);
                v.hash(state);
            }
            SqlValue::F32(v) => {
                state.write_u8(3);
                f32_bits(*v).hash(state);
            }
            SqlValue::F64(v) => {
                state.write_u8(4);
                f64_bits(*v).hash(state);
            }
            SqlValue::Numeric(v) => {
                state.write_u8(5);
                let v = v.normalize();
                v.mantissa().hash(state);
                v.scale().hash(state);
            }
            SqlValue::Text(v) => {
                state.write_u8(6);
                v.hash(state);
            }
            SqlValue::Bytes(v) => {
                state.write_u8(7);
                v.hash(state);
            }
            SqlValue::Date(v) => {
                state.write_u8(8);
                v.hash(state);
            }
            SqlValue::Time(v) => {
                state.write_u8(9);
                v.hash(state);
            }
            SqlValue::Timestamp(v) => {
                state.write_u8(10);
                v.hash(state);
            }
            SqlValue::TimestampTz(v) => {
                state.write_u8(11);
                v.hash(state);
            }
            SqlValue::Interval(v) => {
                state.write_u8(12);
                v.hash(state);
            }
            SqlValue::Uuid(v) => {
                state.write_u8(13);
                v.hash(state);
            }
            SqlValue::Json(v) => {
                state.write_u8(14);
                v.to_string().hash(state);
            }
            SqlValue::Array(values) => {
                state.write_u8(15);
                values.len().hash(state);
                for value in values {
                    value.storage_hash(state);
                }
            }
            SqlValue::HStore(v) => {
                state.write_u8(16);
                v.hash(state);
            }
            SqlValue::Range(range) => {
                state.write_u8(17);
                match range.as_ref() {
                    RangeValue::Empty => state.write_u8(0),
                    RangeValue::Bounded { lower, upper } => {
                        for bound in [lower, upper] {
                            state.write_u8(match bound {
                                RangeBound::Unbounded => 1,
                                RangeBound::Inclusive(_) => 2,
                                RangeBound::Exclusive(_) => 3,
                            });
                            if let Some(value) = bound.value() {
                                value.storage_hash(state);
                            }
                        }
                    }
                }
            }
            SqlValue::Expression(v) => {
                state.write_u8(18);
                v.hash(state);
            }
            SqlValue::I16(_) | SqlValue::I32(_) | SqlValue::I64(_) => {}
        }
    }
}

fn f32_bits(v: f32) -> u32 {
    if v == 0.0 {
        0
    } else {
        v.to_bits()
    }
}

fn f64_bits(v: f64) -> u64 {
    if v == 0.0 {
        0
    } else {
        v.to_bits()
    }
}

fn bound_storage_eq(a: &RangeBound, b: &RangeBound) -> bool {
    match (a, b) {
        (RangeBound::Unbounded, RangeBound::Unbounded) => true,
        (RangeBound::Inclusive(x), RangeBound::Inclusive(y))
        | (RangeBound::Exclusive(x), RangeBound::Exclusive(y)) => x.storage_eq(y),
        _ => false,
    }
}

/// A tuple of values hashed and compared with storage semantics.
#[derive(Debug, Clone)]
pub struct StorageKey<'a>(pub Vec<&'a SqlValue>);

impl PartialEq for StorageKey<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.0.iter().zip(&other.0).all(|(a, b)| a.storage_eq(b))
    }
}

impl Eq for StorageKey<'_> {}

impl Hash for StorageKey<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.len().hash(state);
        for value in &self.0 {
            value.storage_hash(state);
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Bool(v) => write!(f, "{}", v),
            SqlValue::I16(v) => write!(f, "{}", v),
            SqlValue::I32(v) => write!(f, "{}", v),
            SqlValue::I64(v) => write!(f, "{}", v),
            SqlValue::F32(v) => write!(f, "{}", v),
            SqlValue::F64(v) => write!(f, "{}", v),
            SqlValue::Numeric(v) => write!(f, "{}", v),
            SqlValue::Text(v) => write!(f, "{:?}", v),
            SqlValue::Bytes(v) => write!(f, "\\x{}", hex::encode(v)),
            SqlValue::Date(v) => write!(f, "{}", v),
            SqlValue::Time(v) => write!(f, "{}", v),
            SqlValue::Timestamp(v) => write!(f, "{}", v),
            SqlValue::TimestampTz(v) => write!(f, "{}", v.to_rfc3339()),
            SqlValue::Interval(v) => write!(f, "{}", v),
            SqlValue::Uuid(v) => write!(f, "{}", v),
            SqlValue::Json(v) => write!(f, "{}", v),
            SqlValue::Array(values) => {
                f.write_str("[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", value)?;
                }
                f.write_str("]")
            }
            SqlValue::HStore(map) => write!(f, "{:?}", map),
            SqlValue::Range(range) => match range.as_ref() {
                RangeValue::Empty => f.write_str("empty"),
                RangeValue::Bounded { lower, upper } => {
                    f.write_str(if lower.is_inclusive() { "[" } else { "(" })?;
                    if let Some(value) = lower.value() {
                        write!(f, "{}", value)?;
                    }
                    f.write_str(",")?;
                    if let Some(value) = upper.value() {
                        write!(f, "{}", value)?;
                    }
                    f.write_str(if upper.is_inclusive() { "]" } else { ")" })
                }
            },
            SqlValue::Expression(v) => f.write_str(v),
        }
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<i16> for SqlValue {
    fn from(value: i16) -> Self {
        SqlValue::I16(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::I32(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::I64(value)
    }
}

impl From<f32> for SqlValue {
    fn from(value: f32) -> Self {
        SqlValue::F32(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::F64(value)
    }
}

impl From<Decimal> for SqlValue {
    fn from(value: Decimal) -> Self {
        SqlValue::Numeric(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(value: NaiveDate) -> Self {
        SqlValue::Date(value)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(value: NaiveDateTime) -> Self {
        SqlValue::Timestamp(value)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(value: DateTime<Utc>) -> Self {
        SqlValue::TimestampTz(value)
    }
}

impl From<Uuid> for SqlValue {
    fn from(value: Uuid) -> Self {
        SqlValue::Uuid(value)
    }
}

impl From<Value> for SqlValue {
    fn from(value: Value) -> Self {
        SqlValue::Json(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(SqlValue::Null, Into::into)
    }
}

/// A value in the shape generic drivers bind natively.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

/// One bound parameter of a compiled statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Parameter {
    /// Already in PostgreSQL binary wire format, `None` is SQL NULL.
    Binary(Option<Bytes>),
    Driver(DriverValue),
}

impl ToSql for Parameter {
    fn to_sql(
        &self,
        _ty: &PgType,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            Parameter::Binary(Some(bytes)) => {
                out.extend_from_slice(bytes);
                Ok(IsNull::No)
            }
            Parameter::Binary(None) | Parameter::Driver(DriverValue::Null) => Ok(IsNull::Yes),
            Parameter::Driver(value) => Err(format!(
                "driver value {:?} has no PostgreSQL binary encoding, compile for postgres instead",
                value
            )
            .into()),
        }
    }

    // The encoder already wrote the exact wire format for the column's cast type.
    fn accepts(_ty: &PgType) -> bool {
        true
    }

    to_sql_checked!();
}

impl rusqlite::ToSql for Parameter {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Parameter::Driver(value) => value.to_sql(),
            Parameter::Binary(None) => Ok(ToSqlOutput::Owned(SqliteValue::Null)),
            Parameter::Binary(Some(_)) => Err(rusqlite::Error::ToSqlConversionFailure(
                "PostgreSQL binary parameters can not be bound to SQLite".into(),
            )),
        }
    }
}

impl rusqlite::ToSql for DriverValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            DriverValue::Null => ToSqlOutput::Owned(SqliteValue::Null),
            DriverValue::Integer(v) => ToSqlOutput::from(*v),
            DriverValue::Real(v) => ToSqlOutput::from(*v),
            DriverValue::Text(v) => ToSqlOutput::from(v.as_str()),
            DriverValue::Blob(v) => ToSqlOutput::from(v.as_slice()),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_storage_eq_integers_across_widths() {
        assert!(SqlValue::I16(7).storage_eq(&SqlValue::I64(7)));
        assert!(!SqlValue::I32(7).storage_eq(&SqlValue::I32(8)));
        assert!(SqlValue::Null.storage_eq(&SqlValue::Null));
    }

    #[test]
    fn test_storage_eq_floats_fold_signed_zero() {
        assert!(SqlValue::F64(f64::NAN).storage_eq(&SqlValue::F64(f64::NAN)));
        assert!(SqlValue::F64(0.0).storage_eq(&SqlValue::F64(-0.0)));
        assert!(SqlValue::F32(-0.0).storage_eq(&SqlValue::F32(0.0)));
        assert!(!SqlValue::F64(1.0).storage_eq(&SqlValue::F64(-1.0)));
    }

    #[test]
    fn test_storage_eq_decimals_ignore_trailing_zeros() {
        let a = SqlValue::Numeric(Decimal::new(10, 1));
        let b = SqlValue::Numeric(Decimal::new(100, 2));
        assert!(a.storage_eq(&b));
        assert!(!a.storage_eq(&SqlValue::Numeric(Decimal::new(11, 1))));

        let rows = [vec![a], vec![b], vec![SqlValue::F64(0.0)], vec![SqlValue::F64(-0.0)]];
        let keys: HashSet<StorageKey> =
            rows.iter().map(|row| StorageKey(row.iter().collect())).collect();
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_storage_key_groups_equal_tuples() {
        let rows = [
            vec![SqlValue::I32(10), SqlValue::from("x")],
            vec![SqlValue::I64(10), SqlValue::from("x")],
            vec![SqlValue::I32(99), SqlValue::from("y")],
        ];
        let keys: HashSet<StorageKey> =
            rows.iter().map(|row| StorageKey(row.iter().collect())).collect();
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_binary_parameter_writes_raw_bytes() {
        let mut out = BytesMut::new();
        let param = Parameter::Binary(Some(Bytes::from_static(&[0, 0, 0, 5])));
        let is_null = param.to_sql(&PgType::INT4, &mut out).unwrap();
        assert!(matches!(is_null, IsNull::No));
        assert_eq!(&out[..], &[0, 0, 0, 5]);

        let is_null = Parameter::Binary(None).to_sql(&PgType::INT4, &mut out).unwrap();
        assert!(matches!(is_null, IsNull::Yes));
    }

    #[test]
    fn test_display_renders_readable_values() {
        assert_eq!(SqlValue::array([1i32, 2]).to_string(), "[1, 2]");
        assert_eq!(SqlValue::Bytes(vec![0xde, 0xad]).to_string(), "\\xdead");
        assert_eq!(SqlValue::from(Option::<i32>::None).to_string(), "NULL");
    }
}
