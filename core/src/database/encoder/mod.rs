//! Value encoding for the three ways a value can reach the database.
//!
//! * `Literal` - an inline SQL fragment for the given dialect.
//! * `Binary` - the PostgreSQL binary wire format, shared by bound parameters
//!   and binary `COPY`.
//! * `Parameter` - a natively bindable driver value for the other dialects.
//!
//! Encoding is pure: the output depends only on the value, the column spec and
//! the dialect.

mod binary;
mod literal;

use std::{collections::HashMap, fmt, sync::Arc};

use bytes::Bytes;
use chrono::{NaiveDateTime, NaiveTime, Timelike};
use rust_decimal::Decimal;

use crate::database::{
    column_spec::{ColumnSpec, LogicalType},
    dialect::Dialect,
    sql_type_wrapper::{DriverValue, SqlValue},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Literal,
    Binary,
    Parameter,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Literal => f.write_str("literal"),
            Target::Binary => f.write_str("binary"),
            Target::Parameter => f.write_str("parameter"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Literal(String),
    /// `None` is SQL NULL.
    Binary(Option<Bytes>),
    Parameter(DriverValue),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EncodeError {
    #[error("no {target} encoder for column \"{column}\" of type {logical_type} on {dialect}")]
    UnsupportedType { column: String, logical_type: String, dialect: Dialect, target: Target },

    #[error("column \"{column}\" of type {logical_type} can not hold a {got} value ({dialect})")]
    TypeMismatch { column: String, logical_type: String, dialect: Dialect, got: &'static str },

    #[error("value for column \"{column}\" of type {logical_type} is out of range on {dialect}: {reason}")]
    ValueOutOfRange { column: String, logical_type: String, dialect: Dialect, reason: String },

    #[error("array for column \"{column}\" of type {logical_type} is not balanced: {reason}")]
    UnbalancedArray { column: String, logical_type: String, reason: String },

    #[error("column \"{column}\" names encoder \"{encoder_id}\" which is not registered")]
    UnknownEncoder { column: String, encoder_id: String },
}

/// Where an encoding happens, carried along for error context.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Ctx<'a> {
    pub column: &'a str,
    pub dialect: Dialect,
    pub target: Target,
}

impl Ctx<'_> {
    pub fn unsupported(&self, ty: &LogicalType) -> EncodeError {
        EncodeError::UnsupportedType {
            column: self.column.to_string(),
            logical_type: ty.to_string(),
            dialect: self.dialect,
            target: self.target,
        }
    }

    pub fn mismatch(&self, ty: &LogicalType, value: &SqlValue) -> EncodeError {
        EncodeError::TypeMismatch {
            column: self.column.to_string(),
            logical_type: ty.to_string(),
            dialect: self.dialect,
            got: value.raw_name(),
        }
    }

    pub fn out_of_range(&self, ty: &LogicalType, reason: impl Into<String>) -> EncodeError {
        EncodeError::ValueOutOfRange {
            column: self.column.to_string(),
            logical_type: ty.to_string(),
            dialect: self.dialect,
            reason: reason.into(),
        }
    }

    fn unbalanced(&self, ty: &LogicalType, reason: impl Into<String>) -> EncodeError {
        EncodeError::UnbalancedArray {
            column: self.column.to_string(),
            logical_type: ty.to_string(),
            reason: reason.into(),
        }
    }
}

/// Turns one value into a token for a given column, dialect and target.
///
/// Implement this to take over encoding of particular columns; register the
/// implementation in an [`EncoderRegistry`].
pub trait ValueEncoder: Send + Sync {
    fn encode(
        &self,
        value: &SqlValue,
        spec: &ColumnSpec,
        dialect: Dialect,
        target: Target,
    ) -> Result<Token, EncodeError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinEncoder;

static BUILTIN: BuiltinEncoder = BuiltinEncoder;

impl ValueEncoder for BuiltinEncoder {
    fn encode(
        &self,
        value: &SqlValue,
        spec: &ColumnSpec,
        dialect: Dialect,
        target: Target,
    ) -> Result<Token, EncodeError> {
        let ctx = Ctx { column: &spec.name, dialect, target };
        let ty = &spec.logical_type;

        match target {
            Target::Literal => literal::encode_literal(value, ty, &ctx).map(Token::Literal),
            Target::Parameter => literal::encode_parameter(value, ty, &ctx).map(Token::Parameter),
            Target::Binary => {
                if !dialect.supports_binary() {
                    return Err(ctx.unsupported(ty));
                }
                binary::encode_binary(value, ty, &ctx).map(Token::Binary)
            }
        }
    }
}

/// Encodes with the built-in encoders.
pub fn encode(
    value: &SqlValue,
    spec: &ColumnSpec,
    dialect: Dialect,
    target: Target,
) -> Result<Token, EncodeError> {
    BUILTIN.encode(value, spec, dialect, target)
}

/// Encoders addressable by `ColumnSpec::encoder_id`, plus per-column overrides.
#[derive(Clone, Default)]
pub struct EncoderRegistry {
    named: HashMap<String, Arc<dyn ValueEncoder>>,
    column_overrides: HashMap<String, Arc<dyn ValueEncoder>>,
}

impl fmt::Debug for EncoderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncoderRegistry")
            .field("named", &self.named.keys().collect::<Vec<_>>())
            .field("column_overrides", &self.column_overrides.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EncoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, encoder_id: impl Into<String>, encoder: Arc<dyn ValueEncoder>) {
        self.named.insert(encoder_id.into(), encoder);
    }

    /// Replaces whatever encoder `column` would otherwise use, for non-key columns.
    pub fn override_column(&mut self, column: impl Into<String>, encoder: Arc<dyn ValueEncoder>) {
        self.column_overrides.insert(column.into(), encoder);
    }

    fn by_id(&self, spec: &ColumnSpec) -> Result<&dyn ValueEncoder, EncodeError> {
        match &spec.encoder_id {
            None => Ok(&BUILTIN),
            Some(id) => self.named.get(id).map(|encoder| encoder.as_ref()).ok_or_else(|| {
                EncodeError::UnknownEncoder { column: spec.name.clone(), encoder_id: id.clone() }
            }),
        }
    }

    pub fn resolve(&self, spec: &ColumnSpec) -> Result<&dyn ValueEncoder, EncodeError> {
        match self.column_overrides.get(&spec.name) {
            Some(encoder) => Ok(encoder.as_ref()),
            None => self.by_id(spec),
        }
    }

    /// Primary keys only ever use their own spec's encoder.
    pub fn resolve_pk(&self, spec: &ColumnSpec) -> Result<&dyn ValueEncoder, EncodeError> {
        self.by_id(spec)
    }

    pub fn encode(
        &self,
        value: &SqlValue,
        spec: &ColumnSpec,
        dialect: Dialect,
        target: Target,
    ) -> Result<Token, EncodeError> {
        self.resolve(spec)?.encode(value, spec, dialect, target)
    }

    pub fn encode_pk(
        &self,
        value: &SqlValue,
        spec: &ColumnSpec,
        dialect: Dialect,
        target: Target,
    ) -> Result<Token, EncodeError> {
        self.resolve_pk(spec)?.encode(value, spec, dialect, target)
    }
}

pub(crate) fn int_in_range(value: &SqlValue, ty: &LogicalType, ctx: &Ctx) -> Result<i64, EncodeError> {
    let v = value.as_i64().ok_or_else(|| ctx.mismatch(ty, value))?;
    let (min, max) = match ty {
        LogicalType::SmallInt => (i64::from(i16::MIN), i64::from(i16::MAX)),
        LogicalType::Integer => (i64::from(i32::MIN), i64::from(i32::MAX)),
        _ => (i64::MIN, i64::MAX),
    };

    if v < min || v > max {
        return Err(ctx.out_of_range(ty, format!("{} does not fit in {}", v, ty)));
    }

    Ok(v)
}

/// Float value for a `Real` or `Double` column, refusing lossy conversions.
pub(crate) fn float_value(value: &SqlValue, ty: &LogicalType, ctx: &Ctx) -> Result<f64, EncodeError> {
    let is_real = matches!(ty, LogicalType::Real);

    let v = match value {
        SqlValue::F32(v) => f64::from(*v),
        SqlValue::F64(v) => {
            if is_real && v.is_finite() && f64::from(*v as f32) != *v {
                return Err(ctx.out_of_range(ty, format!("{} is not representable as real", v)));
            }
            *v
        }
        other => {
            let i = other.as_i64().ok_or_else(|| ctx.mismatch(ty, value))?;
            let exact_bits = if is_real { 24 } else { 53 };
            if i.unsigned_abs() > 1u64 << exact_bits {
                return Err(ctx.out_of_range(ty, format!("{} loses precision as {}", i, ty)));
            }
            i as f64
        }
    };

    Ok(v)
}

pub(crate) fn decimal_value(
    value: &SqlValue,
    ty: &LogicalType,
    ctx: &Ctx,
) -> Result<Decimal, EncodeError> {
    let d = match value {
        SqlValue::Numeric(d) => *d,
        other => Decimal::from(other.as_i64().ok_or_else(|| ctx.mismatch(ty, value))?),
    };

    if let LogicalType::Numeric { precision, scale } = ty {
        let scale = scale.unwrap_or(0);
        if precision.is_some() && d.scale() > scale {
            return Err(ctx.out_of_range(
                ty,
                format!("{} has {} fractional digits, column keeps {}", d, d.scale(), scale),
            ));
        }

        if let Some(precision) = precision {
            let integral = d.trunc().abs();
            let integral_digits =
                if integral.is_zero() { 0 } else { integral.normalize().to_string().len() as u32 };
            let allowed = precision.saturating_sub(scale);
            if integral_digits > allowed {
                return Err(ctx.out_of_range(
                    ty,
                    format!("{} has more than {} integral digits", d, allowed),
                ));
            }
        }
    }

    Ok(d)
}

pub(crate) fn text_value<'v>(
    value: &'v SqlValue,
    ty: &LogicalType,
    ctx: &Ctx,
) -> Result<&'v str, EncodeError> {
    let SqlValue::Text(text) = value else {
        return Err(ctx.mismatch(ty, value));
    };

    if let LogicalType::Varchar { max_length: Some(max) } = ty {
        let length = text.chars().count();
        if length > *max as usize {
            return Err(ctx.out_of_range(ty, format!("{} characters exceed {}", length, max)));
        }
    }

    if ctx.dialect == Dialect::Postgres && text.contains('\0') {
        return Err(ctx.out_of_range(ty, "PostgreSQL text can not contain NUL characters"));
    }

    Ok(text)
}

/// Drops fractional digits beyond `precision` (at most microseconds).
pub(crate) fn truncate_nanos(nanos: u32, precision: u8) -> u32 {
    let factor = 10u32.pow(9 - u32::from(precision.min(6)));
    nanos - nanos % factor
}

pub(crate) fn truncate_time(time: NaiveTime, precision: u8) -> NaiveTime {
    time.with_nanosecond(truncate_nanos(time.nanosecond(), precision)).unwrap_or(time)
}

pub(crate) fn truncate_timestamp(ts: NaiveDateTime, precision: u8) -> NaiveDateTime {
    ts.with_nanosecond(truncate_nanos(ts.nanosecond(), precision)).unwrap_or(ts)
}

fn reduces_to_empty(values: &[SqlValue], depth: usize) -> bool {
    values.is_empty()
        || (depth > 1
            && values.iter().all(
                |value| matches!(value, SqlValue::Array(inner) if reduces_to_empty(inner, depth - 1)),
            ))
}

/// Dimensions of an array value; empty when the value is an empty array.
///
/// Nested arrays must be rectangular, and `NULL` is only allowed in leaf
/// position.
pub(crate) fn array_shape(
    values: &[SqlValue],
    ty: &LogicalType,
    ctx: &Ctx,
) -> Result<Vec<usize>, EncodeError> {
    let max_depth = ty.array_depth();
    if reduces_to_empty(values, max_depth) {
        return Ok(Vec::new());
    }

    let mut dims = vec![values.len()];
    let mut level = values;
    while dims.len() < max_depth {
        match level.first() {
            Some(SqlValue::Array(inner)) => {
                dims.push(inner.len());
                level = inner;
            }
            _ => break,
        }
    }

    check_balanced(values, &dims, 0, ty, ctx)?;
    Ok(dims)
}

fn check_balanced(
    values: &[SqlValue],
    dims: &[usize],
    level: usize,
    ty: &LogicalType,
    ctx: &Ctx,
) -> Result<(), EncodeError> {
    if values.len() != dims[level] {
        return Err(ctx.unbalanced(
            ty,
            format!("sub-array of length {} where {} was expected", values.len(), dims[level]),
        ));
    }

    let leaf_level = level + 1 == dims.len();
    for value in values {
        match value {
            SqlValue::Array(inner) if !leaf_level => {
                check_balanced(inner, dims, level + 1, ty, ctx)?
            }
            SqlValue::Array(_) => {
                return Err(ctx.unbalanced(ty, "nested deeper than the other elements"))
            }
            _ if !leaf_level => {
                return Err(ctx.unbalanced(ty, "scalar or NULL where a sub-array was expected"))
            }
            _ => {}
        }
    }

    Ok(())
}

/// Leaf elements of a balanced array in row-major order.
pub(crate) fn array_leaves<'v>(values: &'v [SqlValue], out: &mut Vec<&'v SqlValue>) {
    for value in values {
        match value {
            SqlValue::Array(inner) => array_leaves(inner, out),
            leaf => out.push(leaf),
        }
    }
}
