use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use super::{
    array_shape, decimal_value, float_value, int_in_range, text_value, truncate_nanos,
    truncate_time, truncate_timestamp, Ctx, EncodeError,
};
use crate::database::{
    column_spec::{LogicalType, RangeKind},
    dialect::Dialect,
    sql_type_wrapper::{DriverValue, RangeBound, RangeValue, SqlValue},
};

pub(crate) fn encode_literal(
    value: &SqlValue,
    ty: &LogicalType,
    ctx: &Ctx,
) -> Result<String, EncodeError> {
    if value.is_expression() {
        return Err(ctx.mismatch(ty, value));
    }

    match ctx.dialect {
        Dialect::Postgres => postgres_literal(value, ty, ctx),
        _ => generic_literal(value, ty, ctx),
    }
}

pub(crate) fn encode_parameter(
    value: &SqlValue,
    ty: &LogicalType,
    ctx: &Ctx,
) -> Result<DriverValue, EncodeError> {
    if value.is_expression() {
        return Err(ctx.mismatch(ty, value));
    }

    if ctx.dialect == Dialect::Postgres {
        // text protocol input for drivers that do not speak binary
        return Ok(match value {
            SqlValue::Null => DriverValue::Null,
            other => DriverValue::Text(pg_text(other, ty, ctx)?),
        });
    }

    check_generic_support(ty, ctx)?;
    if value.is_null() {
        return Ok(DriverValue::Null);
    }

    let driver_value = match ty {
        LogicalType::Bool => DriverValue::Integer(i64::from(bool_value(value, ty, ctx)?)),
        LogicalType::SmallInt | LogicalType::Integer | LogicalType::BigInt => {
            DriverValue::Integer(int_in_range(value, ty, ctx)?)
        }
        LogicalType::Real | LogicalType::Double => {
            let v = float_value(value, ty, ctx)?;
            if !v.is_finite() && !(ctx.dialect.is_sqlite() && v.is_infinite()) {
                return Err(ctx.out_of_range(ty, format!("{} is not storable on {}", v, ctx.dialect)));
            }
            DriverValue::Real(v)
        }
        LogicalType::Numeric { .. } => DriverValue::Text(decimal_value(value, ty, ctx)?.to_string()),
        LogicalType::Text | LogicalType::Varchar { .. } => {
            DriverValue::Text(text_value(value, ty, ctx)?.to_string())
        }
        LogicalType::Bytes => match value {
            SqlValue::Bytes(bytes) => DriverValue::Blob(bytes.clone()),
            other => return Err(ctx.mismatch(ty, other)),
        },
        LogicalType::Interval => DriverValue::Integer(interval_micros(value, ty, ctx)?),
        _ => DriverValue::Text(plain_text(value, ty, ctx)?),
    };

    Ok(driver_value)
}

fn postgres_literal(value: &SqlValue, ty: &LogicalType, ctx: &Ctx) -> Result<String, EncodeError> {
    match (value, ty) {
        (SqlValue::Null, _) => Ok("NULL".to_string()),
        (_, LogicalType::Bool) => {
            let b = bool_value(value, ty, ctx)?;
            Ok((if b { "TRUE" } else { "FALSE" }).to_string())
        }
        (_, LogicalType::SmallInt | LogicalType::Integer | LogicalType::BigInt) => {
            Ok(int_in_range(value, ty, ctx)?.to_string())
        }
        (_, LogicalType::Real | LogicalType::Double) => {
            let v = float_value(value, ty, ctx)?;
            let text = float_text(v, ty);
            // NaN and the infinities are only valid as quoted input
            Ok(if v.is_finite() { text } else { quote_standard(&text) })
        }
        (_, LogicalType::Numeric { .. }) => Ok(decimal_value(value, ty, ctx)?.to_string()),
        _ => Ok(quote_standard(&pg_text(value, ty, ctx)?)),
    }
}

/// PostgreSQL text input form of a non-null value.
fn pg_text(value: &SqlValue, ty: &LogicalType, ctx: &Ctx) -> Result<String, EncodeError> {
    let text = match ty {
        LogicalType::Bool => bool_value(value, ty, ctx)?.to_string(),
        LogicalType::SmallInt | LogicalType::Integer | LogicalType::BigInt => {
            int_in_range(value, ty, ctx)?.to_string()
        }
        LogicalType::Real | LogicalType::Double => float_text(float_value(value, ty, ctx)?, ty),
        LogicalType::Numeric { .. } => decimal_value(value, ty, ctx)?.to_string(),
        LogicalType::Text | LogicalType::Varchar { .. } => text_value(value, ty, ctx)?.to_string(),
        LogicalType::Bytes => match value {
            SqlValue::Bytes(bytes) => format!("\\x{}", hex::encode(bytes)),
            other => return Err(ctx.mismatch(ty, other)),
        },
        LogicalType::Interval => format!("{} microseconds", interval_micros(value, ty, ctx)?),
        LogicalType::Array(_) => match value {
            SqlValue::Array(values) => array_text(values, ty, ctx)?,
            other => return Err(ctx.mismatch(ty, other)),
        },
        LogicalType::HStore => match value {
            SqlValue::HStore(map) => hstore_text(map),
            other => return Err(ctx.mismatch(ty, other)),
        },
        LogicalType::Range(kind) => match value {
            SqlValue::Range(range) => range_text(range, *kind, ctx)?,
            other => return Err(ctx.mismatch(ty, other)),
        },
        _ => plain_text(value, ty, ctx)?,
    };

    Ok(text)
}

/// Text form of dates, times, uuids and JSON, shared by every dialect.
fn plain_text(value: &SqlValue, ty: &LogicalType, ctx: &Ctx) -> Result<String, EncodeError> {
    let pg = ctx.dialect == Dialect::Postgres;

    let text = match (ty, value) {
        (LogicalType::Date, SqlValue::Date(date)) => {
            let (text, bc) = date_text(*date, ty, ctx)?;
            if bc {
                format!("{} BC", text)
            } else {
                text
            }
        }
        (LogicalType::Time { precision }, SqlValue::Time(time)) => {
            time_text(truncate_time(*time, *precision), *precision)
        }
        (LogicalType::Timestamp { precision }, SqlValue::Timestamp(ts)) => {
            timestamp_text(truncate_timestamp(*ts, *precision), *precision, None, ty, ctx)?
        }
        (LogicalType::TimestampTz { precision }, SqlValue::TimestampTz(ts)) => {
            let offset = if matches!(ctx.dialect, Dialect::Postgres | Dialect::Ansi) {
                Some("+00:00")
            } else {
                None
            };
            timestamp_text(truncate_timestamp(ts.naive_utc(), *precision), *precision, offset, ty, ctx)?
        }
        (LogicalType::Uuid, SqlValue::Uuid(uuid)) => uuid.hyphenated().to_string(),
        (LogicalType::Json | LogicalType::Jsonb, SqlValue::Json(json)) => {
            let text = json.to_string();
            if pg && matches!(ty, LogicalType::Jsonb) && text.contains("\\u0000") {
                return Err(ctx.out_of_range(ty, "jsonb can not store \\u0000"));
            }
            text
        }
        (_, other) => return Err(ctx.mismatch(ty, other)),
    };

    Ok(text)
}

fn generic_literal(value: &SqlValue, ty: &LogicalType, ctx: &Ctx) -> Result<String, EncodeError> {
    check_generic_support(ty, ctx)?;
    if value.is_null() {
        return Ok("NULL".to_string());
    }

    let dialect = ctx.dialect;
    let literal = match ty {
        LogicalType::Bool => {
            let b = bool_value(value, ty, ctx)?;
            match dialect {
                Dialect::Ansi => (if b { "TRUE" } else { "FALSE" }).to_string(),
                _ => (if b { "1" } else { "0" }).to_string(),
            }
        }
        LogicalType::SmallInt | LogicalType::Integer | LogicalType::BigInt => {
            int_in_range(value, ty, ctx)?.to_string()
        }
        LogicalType::Real | LogicalType::Double => {
            let v = float_value(value, ty, ctx)?;
            if v.is_finite() {
                float_text(v, ty)
            } else if dialect.is_sqlite() && v.is_infinite() {
                // SQLite reads an overflowing literal as +/-Inf
                (if v > 0.0 { "9e999" } else { "-9e999" }).to_string()
            } else {
                return Err(ctx.out_of_range(ty, format!("{} is not storable on {}", v, dialect)));
            }
        }
        LogicalType::Numeric { .. } => {
            let d = decimal_value(value, ty, ctx)?.to_string();
            // an unquoted SQLite literal would be parsed as a lossy REAL
            if dialect.is_sqlite() {
                quote_standard(&d)
            } else {
                d
            }
        }
        LogicalType::Text | LogicalType::Varchar { .. } => quote(text_value(value, ty, ctx)?, dialect),
        LogicalType::Bytes => match value {
            SqlValue::Bytes(bytes) => format!("X'{}'", hex::encode_upper(bytes)),
            other => return Err(ctx.mismatch(ty, other)),
        },
        LogicalType::Interval => interval_micros(value, ty, ctx)?.to_string(),
        _ => quote(&plain_text(value, ty, ctx)?, dialect),
    };

    Ok(literal)
}

fn check_generic_support(ty: &LogicalType, ctx: &Ctx) -> Result<(), EncodeError> {
    let supported = match ty {
        LogicalType::Array(_) | LogicalType::HStore | LogicalType::Range(_) => false,
        LogicalType::Interval | LogicalType::Json | LogicalType::Jsonb => {
            ctx.dialect != Dialect::Ansi
        }
        _ => true,
    };

    if supported {
        Ok(())
    } else {
        Err(ctx.unsupported(ty))
    }
}

fn bool_value(value: &SqlValue, ty: &LogicalType, ctx: &Ctx) -> Result<bool, EncodeError> {
    match value {
        SqlValue::Bool(b) => Ok(*b),
        other => Err(ctx.mismatch(ty, other)),
    }
}

fn interval_micros(value: &SqlValue, ty: &LogicalType, ctx: &Ctx) -> Result<i64, EncodeError> {
    match value {
        SqlValue::Interval(duration) => duration
            .num_microseconds()
            .ok_or_else(|| ctx.out_of_range(ty, "interval overflows 64-bit microseconds")),
        other => Err(ctx.mismatch(ty, other)),
    }
}

fn float_text(v: f64, ty: &LogicalType) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        (if v > 0.0 { "Infinity" } else { "-Infinity" }).to_string()
    } else if matches!(ty, LogicalType::Real) {
        format!("{:?}", v as f32)
    } else {
        format!("{:?}", v)
    }
}

fn fraction_text(nanos: u32, precision: u8) -> String {
    let digits = usize::from(precision.min(6));
    let nanos = truncate_nanos(nanos, precision);
    if digits == 0 || nanos == 0 {
        return String::new();
    }

    let padded = format!("{:09}", nanos);
    format!(".{}", &padded[..digits])
}

fn time_text(time: NaiveTime, precision: u8) -> String {
    format!(
        "{:02}:{:02}:{:02}{}",
        time.hour(),
        time.minute(),
        time.second(),
        fraction_text(time.nanosecond(), precision)
    )
}

/// Returns the `YYYY-MM-DD` text and whether the date is BC.
fn date_text(date: NaiveDate, ty: &LogicalType, ctx: &Ctx) -> Result<(String, bool), EncodeError> {
    let year = date.year();
    if year > 0 {
        return Ok((format!("{:04}-{:02}-{:02}", year, date.month(), date.day()), false));
    }

    if ctx.dialect != Dialect::Postgres {
        return Err(ctx.out_of_range(ty, format!("year {} is before the common era", year)));
    }

    // year 0 is 1 BC
    Ok((format!("{:04}-{:02}-{:02}", 1 - year, date.month(), date.day()), true))
}

fn timestamp_text(
    ts: NaiveDateTime,
    precision: u8,
    offset: Option<&str>,
    ty: &LogicalType,
    ctx: &Ctx,
) -> Result<String, EncodeError> {
    let (date, bc) = date_text(ts.date(), ty, ctx)?;
    let mut text = format!("{} {}", date, time_text(ts.time(), precision));
    if let Some(offset) = offset {
        text.push_str(offset);
    }
    if bc {
        text.push_str(" BC");
    }
    Ok(text)
}

fn array_text(values: &[SqlValue], ty: &LogicalType, ctx: &Ctx) -> Result<String, EncodeError> {
    let dims = array_shape(values, ty, ctx)?;
    if dims.is_empty() {
        return Ok("{}".to_string());
    }

    let mut out = String::new();
    write_array_level(values, ty.base_element(), &mut out, ctx)?;
    Ok(out)
}

fn write_array_level(
    values: &[SqlValue],
    element: &LogicalType,
    out: &mut String,
    ctx: &Ctx,
) -> Result<(), EncodeError> {
    out.push('{');
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        match value {
            SqlValue::Null => out.push_str("NULL"),
            SqlValue::Array(inner) => write_array_level(inner, element, out, ctx)?,
            other => push_double_quoted(out, &pg_text(other, element, ctx)?),
        }
    }
    out.push('}');
    Ok(())
}

fn hstore_text(map: &BTreeMap<String, Option<String>>) -> String {
    let mut out = String::new();
    for (i, (key, value)) in map.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        push_double_quoted(&mut out, key);
        out.push_str("=>");
        match value {
            Some(value) => push_double_quoted(&mut out, value),
            None => out.push_str("NULL"),
        }
    }
    out
}

fn range_text(range: &RangeValue, kind: RangeKind, ctx: &Ctx) -> Result<String, EncodeError> {
    let RangeValue::Bounded { lower, upper } = range else {
        return Ok("empty".to_string());
    };

    let element = kind.element_type();
    let mut out = String::new();

    let lower_value = bound_value(lower);
    out.push(if lower_value.is_some() && lower.is_inclusive() { '[' } else { '(' });
    if let Some(value) = lower_value {
        push_double_quoted(&mut out, &pg_text(value, &element, ctx)?);
    }
    out.push(',');

    let upper_value = bound_value(upper);
    if let Some(value) = upper_value {
        push_double_quoted(&mut out, &pg_text(value, &element, ctx)?);
    }
    out.push(if upper_value.is_some() && upper.is_inclusive() { ']' } else { ')' });

    Ok(out)
}

/// A NULL bound is the same as an unbounded side.
pub(super) fn bound_value(bound: &RangeBound) -> Option<&SqlValue> {
    bound.value().filter(|value| !value.is_null())
}

fn push_double_quoted(out: &mut String, text: &str) {
    out.push('"');
    for c in text.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

fn quote(text: &str, dialect: Dialect) -> String {
    match dialect {
        Dialect::MySql => quote_mysql(text),
        _ => quote_standard(text),
    }
}

/// Standard SQL string literal: only the quote character is special.
fn quote_standard(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn quote_mysql(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for c in text.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x1a' => out.push_str("\\Z"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}
