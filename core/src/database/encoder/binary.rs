use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};
use tokio_postgres::types::{ToSql, Type as PgType};

use super::{
    array_leaves, array_shape, decimal_value, float_value, int_in_range, literal::bound_value,
    text_value, truncate_time, truncate_timestamp, Ctx, EncodeError,
};
use crate::database::{
    column_spec::{LogicalType, RangeKind},
    sql_type_wrapper::{RangeValue, SqlValue},
};

const RANGE_EMPTY: u8 = 0x01;
const RANGE_LB_INC: u8 = 0x02;
const RANGE_UB_INC: u8 = 0x04;
const RANGE_LB_INF: u8 = 0x08;
const RANGE_UB_INF: u8 = 0x10;

const JSONB_VERSION: u8 = 1;

/// PostgreSQL binary wire format of `value`; `None` is SQL NULL.
pub(crate) fn encode_binary(
    value: &SqlValue,
    ty: &LogicalType,
    ctx: &Ctx,
) -> Result<Option<Bytes>, EncodeError> {
    if value.is_null() {
        return Ok(None);
    }

    let mut buf = BytesMut::new();
    write_value(value, ty, &mut buf, ctx)?;
    Ok(Some(buf.freeze()))
}

fn write_value(
    value: &SqlValue,
    ty: &LogicalType,
    out: &mut BytesMut,
    ctx: &Ctx,
) -> Result<(), EncodeError> {
    match ty {
        LogicalType::Bool => match value {
            SqlValue::Bool(b) => out.put_u8(u8::from(*b)),
            other => return Err(ctx.mismatch(ty, other)),
        },
        LogicalType::SmallInt => out.put_i16(int_in_range(value, ty, ctx)? as i16),
        LogicalType::Integer => out.put_i32(int_in_range(value, ty, ctx)? as i32),
        LogicalType::BigInt => out.put_i64(int_in_range(value, ty, ctx)?),
        LogicalType::Real => out.put_f32(float_value(value, ty, ctx)? as f32),
        LogicalType::Double => out.put_f64(float_value(value, ty, ctx)?),
        LogicalType::Numeric { .. } => {
            let d = decimal_value(value, ty, ctx)?;
            write_with_driver(&d, &PgType::NUMERIC, ty, out, ctx)?
        }
        LogicalType::Text | LogicalType::Varchar { .. } => {
            out.put_slice(text_value(value, ty, ctx)?.as_bytes())
        }
        LogicalType::Bytes => match value {
            SqlValue::Bytes(bytes) => out.put_slice(bytes),
            other => return Err(ctx.mismatch(ty, other)),
        },
        LogicalType::Date => match value {
            SqlValue::Date(date) => write_with_driver(date, &PgType::DATE, ty, out, ctx)?,
            other => return Err(ctx.mismatch(ty, other)),
        },
        LogicalType::Time { precision } => match value {
            SqlValue::Time(time) => {
                write_with_driver(&truncate_time(*time, *precision), &PgType::TIME, ty, out, ctx)?
            }
            other => return Err(ctx.mismatch(ty, other)),
        },
        LogicalType::Timestamp { precision } => match value {
            SqlValue::Timestamp(ts) => write_with_driver(
                &truncate_timestamp(*ts, *precision),
                &PgType::TIMESTAMP,
                ty,
                out,
                ctx,
            )?,
            other => return Err(ctx.mismatch(ty, other)),
        },
        LogicalType::TimestampTz { precision } => match value {
            SqlValue::TimestampTz(ts) => write_with_driver(
                &truncate_timestamp(ts.naive_utc(), *precision).and_utc(),
                &PgType::TIMESTAMPTZ,
                ty,
                out,
                ctx,
            )?,
            other => return Err(ctx.mismatch(ty, other)),
        },
        LogicalType::Interval => match value {
            SqlValue::Interval(duration) => {
                let micros = duration.num_microseconds().ok_or_else(|| {
                    ctx.out_of_range(ty, "interval overflows 64-bit microseconds")
                })?;
                out.put_i64(micros);
                // days, months
                out.put_i32(0);
                out.put_i32(0);
            }
            other => return Err(ctx.mismatch(ty, other)),
        },
        LogicalType::Uuid => match value {
            SqlValue::Uuid(uuid) => out.put_slice(uuid.as_bytes()),
            other => return Err(ctx.mismatch(ty, other)),
        },
        LogicalType::Json | LogicalType::Jsonb => match value {
            SqlValue::Json(json) => {
                let text = json.to_string();
                if matches!(ty, LogicalType::Jsonb) {
                    if text.contains("\\u0000") {
                        return Err(ctx.out_of_range(ty, "jsonb can not store \\u0000"));
                    }
                    out.put_u8(JSONB_VERSION);
                }
                out.put_slice(text.as_bytes());
            }
            other => return Err(ctx.mismatch(ty, other)),
        },
        LogicalType::Array(_) => match value {
            SqlValue::Array(values) => write_array(values, ty, out, ctx)?,
            other => return Err(ctx.mismatch(ty, other)),
        },
        LogicalType::HStore => match value {
            SqlValue::HStore(map) => write_hstore(map, ty, out, ctx)?,
            other => return Err(ctx.mismatch(ty, other)),
        },
        LogicalType::Range(kind) => match value {
            SqlValue::Range(range) => write_range(range, *kind, out, ctx)?,
            other => return Err(ctx.mismatch(ty, other)),
        },
    }

    Ok(())
}

fn write_with_driver<T: ToSql>(
    value: &T,
    pg_type: &PgType,
    ty: &LogicalType,
    out: &mut BytesMut,
    ctx: &Ctx,
) -> Result<(), EncodeError> {
    value.to_sql(pg_type, out).map(|_| ()).map_err(|e| ctx.out_of_range(ty, e.to_string()))
}

/// Writes a length-prefixed field, `-1` for NULL.
fn write_field(
    value: &SqlValue,
    ty: &LogicalType,
    out: &mut BytesMut,
    ctx: &Ctx,
) -> Result<(), EncodeError> {
    if value.is_null() {
        out.put_i32(-1);
        return Ok(());
    }

    let start = out.len();
    out.put_i32(0);
    write_value(value, ty, out, ctx)?;

    let len = i32::try_from(out.len() - start - 4)
        .map_err(|_| ctx.out_of_range(ty, "element larger than 2GiB"))?;
    out[start..start + 4].copy_from_slice(&len.to_be_bytes());
    Ok(())
}

fn write_len(len: usize, ty: &LogicalType, out: &mut BytesMut, ctx: &Ctx) -> Result<(), EncodeError> {
    let len = i32::try_from(len).map_err(|_| ctx.out_of_range(ty, "length exceeds i32"))?;
    out.put_i32(len);
    Ok(())
}

fn write_array(
    values: &[SqlValue],
    ty: &LogicalType,
    out: &mut BytesMut,
    ctx: &Ctx,
) -> Result<(), EncodeError> {
    let element = ty.base_element();
    let element_oid = element.pg_type().map(|t| t.oid()).ok_or_else(|| ctx.unsupported(ty))?;

    let dims = array_shape(values, ty, ctx)?;
    let mut leaves = Vec::new();
    if !dims.is_empty() {
        array_leaves(values, &mut leaves);
    }

    write_len(dims.len(), ty, out, ctx)?;
    out.put_i32(i32::from(leaves.iter().any(|leaf| leaf.is_null())));
    out.put_u32(element_oid);
    for dim in &dims {
        write_len(*dim, ty, out, ctx)?;
        // lower bound
        out.put_i32(1);
    }

    for leaf in leaves {
        write_field(leaf, element, out, ctx)?;
    }

    Ok(())
}

fn write_hstore(
    map: &BTreeMap<String, Option<String>>,
    ty: &LogicalType,
    out: &mut BytesMut,
    ctx: &Ctx,
) -> Result<(), EncodeError> {
    write_len(map.len(), ty, out, ctx)?;
    for (key, value) in map {
        write_len(key.len(), ty, out, ctx)?;
        out.put_slice(key.as_bytes());
        match value {
            Some(value) => {
                write_len(value.len(), ty, out, ctx)?;
                out.put_slice(value.as_bytes());
            }
            None => out.put_i32(-1),
        }
    }
    Ok(())
}

fn write_range(
    range: &RangeValue,
    kind: RangeKind,
    out: &mut BytesMut,
    ctx: &Ctx,
) -> Result<(), EncodeError> {
    let RangeValue::Bounded { lower, upper } = range else {
        out.put_u8(RANGE_EMPTY);
        return Ok(());
    };

    let lower_value = bound_value(lower);
    let upper_value = bound_value(upper);

    let mut flags = 0;
    match lower_value {
        None => flags |= RANGE_LB_INF,
        Some(_) if lower.is_inclusive() => flags |= RANGE_LB_INC,
        Some(_) => {}
    }
    match upper_value {
        None => flags |= RANGE_UB_INF,
        Some(_) if upper.is_inclusive() => flags |= RANGE_UB_INC,
        Some(_) => {}
    }
    out.put_u8(flags);

    let element = kind.element_type();
    for value in [lower_value, upper_value].into_iter().flatten() {
        write_field(value, &element, out, ctx)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
    use rust_decimal::Decimal;
    use serde_json::{json, Value};
    use tokio_postgres::types::FromSql;
    use uuid::Uuid;

    use super::*;
    use crate::database::{
        column_spec::ColumnSpec,
        dialect::Dialect,
        encoder::{encode, Target, Token},
        sql_type_wrapper::RangeBound,
    };

    fn binary(value: &SqlValue, ty: LogicalType) -> Option<Bytes> {
        let spec = ColumnSpec::new("c", ty).with_null(true);
        match encode(value, &spec, Dialect::Postgres, Target::Binary).unwrap() {
            Token::Binary(bytes) => bytes,
            other => panic!("unexpected token {:?}", other),
        }
    }

    fn decode<'a, T: FromSql<'a>>(bytes: &'a Option<Bytes>, pg_type: &PgType) -> T {
        T::from_sql(pg_type, bytes.as_ref().unwrap()).unwrap()
    }

    #[test]
    fn test_fixed_width_scalars() {
        let small = binary(&SqlValue::I32(-2), LogicalType::SmallInt);
        assert_eq!(small.as_ref().unwrap().len(), 2);
        assert_eq!(decode::<i16>(&small, &PgType::INT2), -2);

        let int = binary(&SqlValue::I16(7), LogicalType::Integer);
        assert_eq!(int.as_ref().unwrap().len(), 4);
        assert_eq!(decode::<i32>(&int, &PgType::INT4), 7);

        let big = binary(&SqlValue::I64(i64::MIN), LogicalType::BigInt);
        assert_eq!(decode::<i64>(&big, &PgType::INT8), i64::MIN);

        let real = binary(&SqlValue::F32(1.5), LogicalType::Real);
        assert_eq!(real.as_ref().unwrap().len(), 4);
        assert_eq!(decode::<f32>(&real, &PgType::FLOAT4), 1.5);

        let double = binary(&SqlValue::F64(f64::INFINITY), LogicalType::Double);
        assert_eq!(decode::<f64>(&double, &PgType::FLOAT8), f64::INFINITY);

        let b = binary(&SqlValue::Bool(true), LogicalType::Bool);
        assert!(decode::<bool>(&b, &PgType::BOOL));
    }

    #[test]
    fn test_text_bytes_numeric_uuid() {
        let text = binary(&SqlValue::from("héllo"), LogicalType::Text);
        assert_eq!(decode::<String>(&text, &PgType::TEXT), "héllo");

        let bytes = binary(&SqlValue::Bytes(vec![0, 1, 255]), LogicalType::Bytes);
        assert_eq!(decode::<Vec<u8>>(&bytes, &PgType::BYTEA), vec![0, 1, 255]);

        let d = Decimal::new(-123456789, 4);
        let numeric = binary(
            &SqlValue::Numeric(d),
            LogicalType::Numeric { precision: Some(20), scale: Some(4) },
        );
        assert_eq!(decode::<Decimal>(&numeric, &PgType::NUMERIC), d);

        let id = Uuid::new_v4();
        let uuid = binary(&SqlValue::Uuid(id), LogicalType::Uuid);
        assert_eq!(decode::<Uuid>(&uuid, &PgType::UUID), id);
    }

    #[test]
    fn test_temporal_round_trip() {
        let date = NaiveDate::from_ymd_opt(1999, 12, 31).unwrap();
        let encoded = binary(&SqlValue::Date(date), LogicalType::Date);
        assert_eq!(decode::<NaiveDate>(&encoded, &PgType::DATE), date);

        let ts = date.and_hms_micro_opt(23, 59, 59, 999_999).unwrap();
        let encoded = binary(&SqlValue::Timestamp(ts), LogicalType::Timestamp { precision: 6 });
        assert_eq!(decode::<NaiveDateTime>(&encoded, &PgType::TIMESTAMP), ts);

        let tz = Utc.with_ymd_and_hms(2030, 6, 1, 12, 0, 0).unwrap();
        let encoded = binary(&SqlValue::TimestampTz(tz), LogicalType::TimestampTz { precision: 3 });
        assert_eq!(decode::<DateTime<Utc>>(&encoded, &PgType::TIMESTAMPTZ), tz);

        let interval = binary(&SqlValue::Interval(Duration::seconds(90)), LogicalType::Interval);
        let raw = interval.unwrap();
        assert_eq!(&raw[..8], &90_000_000i64.to_be_bytes());
        assert_eq!(&raw[8..], &[0u8; 8]);
    }

    #[test]
    fn test_json_and_jsonb() {
        let doc = json!({"a": [1, null, "x"]});
        let json_bytes = binary(&SqlValue::Json(doc.clone()), LogicalType::Json);
        assert_eq!(decode::<Value>(&json_bytes, &PgType::JSON), doc);

        let jsonb_bytes = binary(&SqlValue::Json(doc.clone()), LogicalType::Jsonb);
        assert_eq!(jsonb_bytes.as_ref().unwrap()[0], JSONB_VERSION);
        assert_eq!(decode::<Value>(&jsonb_bytes, &PgType::JSONB), doc);
    }

    #[test]
    fn test_array_nulls_survive() {
        let ty = LogicalType::array_of(LogicalType::Integer);
        let value = SqlValue::Array(vec![SqlValue::I32(1), SqlValue::Null, SqlValue::I32(3)]);
        let encoded = binary(&value, ty.clone());
        assert_eq!(
            decode::<Vec<Option<i32>>>(&encoded, &PgType::INT4_ARRAY),
            vec![Some(1), None, Some(3)]
        );

        let empty = binary(&SqlValue::Array(vec![]), ty.clone());
        assert_eq!(decode::<Vec<Option<i32>>>(&empty, &PgType::INT4_ARRAY), vec![]);

        // a NULL array is NULL, never an empty array
        assert_eq!(binary(&SqlValue::Null, ty), None);
    }

    #[test]
    fn test_two_dimensional_array_header() {
        let ty = LogicalType::array_of(LogicalType::array_of(LogicalType::SmallInt));
        let value = SqlValue::Array(vec![SqlValue::array([1i16, 2]), SqlValue::array([3i16, 4])]);
        let raw = binary(&value, ty).unwrap();

        let mut expected = BytesMut::new();
        expected.put_i32(2);
        expected.put_i32(0);
        expected.put_u32(PgType::INT2.oid());
        for _ in 0..2 {
            expected.put_i32(2);
            expected.put_i32(1);
        }
        for v in 1i16..=4 {
            expected.put_i32(2);
            expected.put_i16(v);
        }
        assert_eq!(raw, expected.freeze());
    }

    #[test]
    fn test_hstore_round_trip() {
        let mut map = BTreeMap::new();
        map.insert("k1".to_string(), Some("v1".to_string()));
        map.insert("k2".to_string(), None);
        let encoded = binary(&SqlValue::HStore(map), LogicalType::HStore);

        let decoded = decode::<HashMap<String, Option<String>>>(&encoded, &PgType::TEXT);
        assert_eq!(decoded.get("k1"), Some(&Some("v1".to_string())));
        assert_eq!(decoded.get("k2"), Some(&None));
    }

    #[test]
    fn test_hstore_arrays_need_a_known_oid() {
        let spec = ColumnSpec::new("c", LogicalType::array_of(LogicalType::HStore));
        let result = encode(
            &SqlValue::Array(vec![SqlValue::HStore(BTreeMap::new())]),
            &spec,
            Dialect::Postgres,
            Target::Binary,
        );
        assert!(matches!(result, Err(EncodeError::UnsupportedType { .. })));
    }

    #[test]
    fn test_range_flags() {
        let ty = LogicalType::Range(RangeKind::Int4);

        let empty = binary(&SqlValue::Range(Box::new(RangeValue::Empty)), ty.clone()).unwrap();
        assert_eq!(&empty[..], &[RANGE_EMPTY]);

        let half_open = SqlValue::range(RangeBound::Inclusive(SqlValue::I32(5)), RangeBound::Unbounded);
        let raw = binary(&half_open, ty.clone()).unwrap();
        assert_eq!(raw[0], RANGE_LB_INC | RANGE_UB_INF);
        assert_eq!(&raw[1..], &[0, 0, 0, 4, 0, 0, 0, 5]);

        let closed = SqlValue::range(
            RangeBound::Exclusive(SqlValue::I32(1)),
            RangeBound::Inclusive(SqlValue::I32(2)),
        );
        let raw = binary(&closed, ty).unwrap();
        assert_eq!(raw[0], RANGE_UB_INC);
        assert_eq!(raw.len(), 1 + 8 + 8);
    }

    #[test]
    fn test_binary_is_postgres_only() {
        let spec = ColumnSpec::new("c", LogicalType::Integer);
        assert!(matches!(
            encode(&SqlValue::I32(1), &spec, Dialect::Sqlite, Target::Binary),
            Err(EncodeError::UnsupportedType { target: Target::Binary, .. })
        ));
    }
}
