use std::{borrow::Cow, collections::HashMap, fmt};

use serde::{Deserialize, Serialize};
use tokio_postgres::types::Type as PgType;

use crate::database::{
    changeset::{UnsupportedReason, ValidationError},
    dialect::Dialect,
};

/// Element type of a PostgreSQL range column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeKind {
    Int4,
    Int8,
    Numeric,
    Date,
    Timestamp,
    TimestampTz,
}

impl RangeKind {
    pub fn pg_name(&self) -> &'static str {
        match self {
            RangeKind::Int4 => "int4range",
            RangeKind::Int8 => "int8range",
            RangeKind::Numeric => "numrange",
            RangeKind::Date => "daterange",
            RangeKind::Timestamp => "tsrange",
            RangeKind::TimestampTz => "tstzrange",
        }
    }

    pub fn element_type(&self) -> LogicalType {
        match self {
            RangeKind::Int4 => LogicalType::Integer,
            RangeKind::Int8 => LogicalType::BigInt,
            RangeKind::Numeric => LogicalType::Numeric { precision: None, scale: None },
            RangeKind::Date => LogicalType::Date,
            RangeKind::Timestamp => LogicalType::Timestamp { precision: 6 },
            RangeKind::TimestampTz => LogicalType::TimestampTz { precision: 6 },
        }
    }

    fn pg_type(&self) -> PgType {
        match self {
            RangeKind::Int4 => PgType::INT4_RANGE,
            RangeKind::Int8 => PgType::INT8_RANGE,
            RangeKind::Numeric => PgType::NUM_RANGE,
            RangeKind::Date => PgType::DATE_RANGE,
            RangeKind::Timestamp => PgType::TS_RANGE,
            RangeKind::TimestampTz => PgType::TSTZ_RANGE,
        }
    }
}

/// Storage type of an updatable column, independent of any backend.
///
/// Fractional-second `precision` on the temporal types is the number of
/// digits kept after the decimal point (0 to 6).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LogicalType {
    Bool,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Numeric { precision: Option<u32>, scale: Option<u32> },
    Text,
    Varchar { max_length: Option<u32> },
    Bytes,
    Date,
    Time { precision: u8 },
    Timestamp { precision: u8 },
    TimestampTz { precision: u8 },
    Interval,
    Uuid,
    Json,
    Jsonb,
    Array(Box<LogicalType>),
    HStore,
    Range(RangeKind),
}

impl LogicalType {
    pub fn array_of(element: LogicalType) -> Self {
        LogicalType::Array(Box::new(element))
    }

    /// Number of array dimensions this type declares, 0 for scalars.
    pub fn array_depth(&self) -> usize {
        match self {
            LogicalType::Array(inner) => 1 + inner.array_depth(),
            _ => 0,
        }
    }

    /// The innermost non-array type.
    pub fn base_element(&self) -> &LogicalType {
        match self {
            LogicalType::Array(inner) => inner.base_element(),
            other => other,
        }
    }

    /// Name of the type as PostgreSQL spells it, used for casts and staging columns.
    pub fn pg_name(&self) -> String {
        match self {
            LogicalType::Bool => "boolean".to_string(),
            LogicalType::SmallInt => "smallint".to_string(),
            LogicalType::Integer => "integer".to_string(),
            LogicalType::BigInt => "bigint".to_string(),
            LogicalType::Real => "real".to_string(),
            LogicalType::Double => "double precision".to_string(),
            LogicalType::Numeric { precision: Some(p), scale } => {
                format!("numeric({},{})", p, scale.unwrap_or(0))
            }
            LogicalType::Numeric { precision: None, .. } => "numeric".to_string(),
            LogicalType::Text => "text".to_string(),
            LogicalType::Varchar { max_length: Some(n) } => format!("varchar({})", n),
            LogicalType::Varchar { max_length: None } => "varchar".to_string(),
            LogicalType::Bytes => "bytea".to_string(),
            LogicalType::Date => "date".to_string(),
            LogicalType::Time { precision } => format!("time({})", precision),
            LogicalType::Timestamp { precision } => format!("timestamp({})", precision),
            LogicalType::TimestampTz { precision } => {
                format!("timestamp({}) with time zone", precision)
            }
            LogicalType::Interval => "interval".to_string(),
            LogicalType::Uuid => "uuid".to_string(),
            LogicalType::Json => "json".to_string(),
            LogicalType::Jsonb => "jsonb".to_string(),
            LogicalType::Array(inner) => format!("{}[]", inner.pg_name()),
            LogicalType::HStore => "hstore".to_string(),
            LogicalType::Range(kind) => kind.pg_name().to_string(),
        }
    }

    /// The PostgreSQL type used on the binary wire, `None` for extension types
    /// whose OID is only known per database (hstore).
    pub fn pg_type(&self) -> Option<PgType> {
        let ty = match self {
            LogicalType::Bool => PgType::BOOL,
            LogicalType::SmallInt => PgType::INT2,
            LogicalType::Integer => PgType::INT4,
            LogicalType::BigInt => PgType::INT8,
            LogicalType::Real => PgType::FLOAT4,
            LogicalType::Double => PgType::FLOAT8,
            LogicalType::Numeric { .. } => PgType::NUMERIC,
            LogicalType::Text => PgType::TEXT,
            LogicalType::Varchar { .. } => PgType::VARCHAR,
            LogicalType::Bytes => PgType::BYTEA,
            LogicalType::Date => PgType::DATE,
            LogicalType::Time { .. } => PgType::TIME,
            LogicalType::Timestamp { .. } => PgType::TIMESTAMP,
            LogicalType::TimestampTz { .. } => PgType::TIMESTAMPTZ,
            LogicalType::Interval => PgType::INTERVAL,
            LogicalType::Uuid => PgType::UUID,
            LogicalType::Json => PgType::JSON,
            LogicalType::Jsonb => PgType::JSONB,
            LogicalType::Range(kind) => kind.pg_type(),
            LogicalType::HStore => return None,
            LogicalType::Array(_) => match self.base_element() {
                LogicalType::Bool => PgType::BOOL_ARRAY,
                LogicalType::SmallInt => PgType::INT2_ARRAY,
                LogicalType::Integer => PgType::INT4_ARRAY,
                LogicalType::BigInt => PgType::INT8_ARRAY,
                LogicalType::Real => PgType::FLOAT4_ARRAY,
                LogicalType::Double => PgType::FLOAT8_ARRAY,
                LogicalType::Numeric { .. } => PgType::NUMERIC_ARRAY,
                LogicalType::Text => PgType::TEXT_ARRAY,
                LogicalType::Varchar { .. } => PgType::VARCHAR_ARRAY,
                LogicalType::Bytes => PgType::BYTEA_ARRAY,
                LogicalType::Date => PgType::DATE_ARRAY,
                LogicalType::Time { .. } => PgType::TIME_ARRAY,
                LogicalType::Timestamp { .. } => PgType::TIMESTAMP_ARRAY,
                LogicalType::TimestampTz { .. } => PgType::TIMESTAMPTZ_ARRAY,
                LogicalType::Interval => PgType::INTERVAL_ARRAY,
                LogicalType::Uuid => PgType::UUID_ARRAY,
                LogicalType::Json => PgType::JSON_ARRAY,
                LogicalType::Jsonb => PgType::JSONB_ARRAY,
                LogicalType::Range(RangeKind::Int4) => PgType::INT4_RANGE_ARRAY,
                LogicalType::Range(RangeKind::Int8) => PgType::INT8_RANGE_ARRAY,
                LogicalType::Range(RangeKind::Numeric) => PgType::NUM_RANGE_ARRAY,
                LogicalType::Range(RangeKind::Date) => PgType::DATE_RANGE_ARRAY,
                LogicalType::Range(RangeKind::Timestamp) => PgType::TS_RANGE_ARRAY,
                LogicalType::Range(RangeKind::TimestampTz) => PgType::TSTZ_RANGE_ARRAY,
                LogicalType::HStore | LogicalType::Array(_) => return None,
            },
        };

        Some(ty)
    }

    /// The cast target a dialect uses for this type, `None` when the dialect
    /// has no storage for it.
    pub fn default_cast(&self, dialect: Dialect) -> Option<String> {
        match dialect {
            Dialect::Postgres => Some(self.pg_name()),
            Dialect::Sqlite | Dialect::SqliteLegacy => self.sqlite_affinity().map(str::to_string),
            Dialect::MySql => self.mysql_cast(),
            Dialect::Ansi => self.ansi_name(),
        }
    }

    fn sqlite_affinity(&self) -> Option<&'static str> {
        match self {
            LogicalType::Bool
            | LogicalType::SmallInt
            | LogicalType::Integer
            | LogicalType::BigInt
            | LogicalType::Interval => Some("INTEGER"),
            LogicalType::Real | LogicalType::Double => Some("REAL"),
            LogicalType::Numeric { .. } => Some("NUMERIC"),
            LogicalType::Text
            | LogicalType::Varchar { .. }
            | LogicalType::Date
            | LogicalType::Time { .. }
            | LogicalType::Timestamp { .. }
            | LogicalType::TimestampTz { .. }
            | LogicalType::Uuid
            | LogicalType::Json
            | LogicalType::Jsonb => Some("TEXT"),
            LogicalType::Bytes => Some("BLOB"),
            LogicalType::Array(_) | LogicalType::HStore | LogicalType::Range(_) => None,
        }
    }

    fn mysql_cast(&self) -> Option<String> {
        let cast = match self {
            LogicalType::Bool
            | LogicalType::SmallInt
            | LogicalType::Integer
            | LogicalType::BigInt
            | LogicalType::Interval => "SIGNED".to_string(),
            LogicalType::Real => "FLOAT".to_string(),
            LogicalType::Double => "DOUBLE".to_string(),
            // MySQL's bare DECIMAL means DECIMAL(10,0), which would drop the fraction.
            LogicalType::Numeric { precision, scale } => {
                format!("DECIMAL({},{})", precision.unwrap_or(65), scale.unwrap_or(30))
            }
            LogicalType::Text | LogicalType::Varchar { .. } | LogicalType::Uuid => {
                "CHAR".to_string()
            }
            LogicalType::Bytes => "BINARY".to_string(),
            LogicalType::Date => "DATE".to_string(),
            LogicalType::Time { precision } => format!("TIME({})", precision),
            LogicalType::Timestamp { precision } | LogicalType::TimestampTz { precision } => {
                format!("DATETIME({})", precision)
            }
            LogicalType::Json | LogicalType::Jsonb => "JSON".to_string(),
            LogicalType::Array(_) | LogicalType::HStore | LogicalType::Range(_) => return None,
        };

        Some(cast)
    }

    fn ansi_name(&self) -> Option<String> {
        let name = match self {
            LogicalType::Bool => "BOOLEAN".to_string(),
            LogicalType::SmallInt => "SMALLINT".to_string(),
            LogicalType::Integer => "INTEGER".to_string(),
            LogicalType::BigInt => "BIGINT".to_string(),
            LogicalType::Real => "REAL".to_string(),
            LogicalType::Double => "DOUBLE PRECISION".to_string(),
            LogicalType::Numeric { precision: Some(p), scale } => {
                format!("NUMERIC({},{})", p, scale.unwrap_or(0))
            }
            LogicalType::Numeric { precision: None, .. } => "NUMERIC".to_string(),
            LogicalType::Varchar { max_length: Some(n) } => format!("VARCHAR({})", n),
            LogicalType::Text | LogicalType::Varchar { max_length: None } => "VARCHAR".to_string(),
            LogicalType::Bytes => "VARBINARY".to_string(),
            LogicalType::Date => "DATE".to_string(),
            LogicalType::Time { precision } => format!("TIME({})", precision),
            LogicalType::Timestamp { precision } => format!("TIMESTAMP({})", precision),
            LogicalType::TimestampTz { precision } => {
                format!("TIMESTAMP({}) WITH TIME ZONE", precision)
            }
            LogicalType::Uuid => "CHAR(36)".to_string(),
            LogicalType::Interval
            | LogicalType::Json
            | LogicalType::Jsonb
            | LogicalType::Array(_)
            | LogicalType::HStore
            | LogicalType::Range(_) => return None,
        };

        Some(name)
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pg_name())
    }
}

/// Static description of one updatable column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub logical_type: LogicalType,
    /// Overrides the dialect's default cast target for this column.
    pub sql_cast: Option<String>,
    pub nullable: bool,
    /// Key into an `EncoderRegistry`; `None` uses the built-in encoder.
    pub encoder_id: Option<String>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, logical_type: LogicalType) -> Self {
        ColumnSpec {
            name: name.into(),
            logical_type,
            sql_cast: None,
            nullable: false,
            encoder_id: None,
        }
    }

    pub fn with_null(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn with_cast(mut self, sql_cast: impl Into<String>) -> Self {
        self.sql_cast = Some(sql_cast.into());
        self
    }

    pub fn with_encoder(mut self, encoder_id: impl Into<String>) -> Self {
        self.encoder_id = Some(encoder_id.into());
        self
    }

    /// Cast target for this column in `dialect`. Serial pseudo-types are
    /// not castable and become their integer base type.
    pub fn cast_for(&self, dialect: Dialect) -> Option<Cow<'_, str>> {
        match &self.sql_cast {
            Some(cast) => Some(match serial_base_type(cast) {
                Some(base) => Cow::Borrowed(base),
                None => Cow::Borrowed(cast.as_str()),
            }),
            None => self.logical_type.default_cast(dialect).map(Cow::Owned),
        }
    }
}

fn serial_base_type(sql_type: &str) -> Option<&'static str> {
    match sql_type.trim().to_ascii_lowercase().as_str() {
        "serial" | "serial4" => Some("integer"),
        "bigserial" | "serial8" => Some("bigint"),
        "smallserial" | "serial2" => Some("smallint"),
        _ => None,
    }
}

/// Read-only table of the columns one target exposes for updating.
///
/// Built once by the caller from its own schema knowledge and shared by every
/// compile call against that target.
#[derive(Debug, Clone)]
pub struct ColumnRegistry {
    pk: ColumnSpec,
    columns: Vec<ColumnSpec>,
    by_name: HashMap<String, usize>,
}

impl ColumnRegistry {
    pub fn new(pk: ColumnSpec, columns: Vec<ColumnSpec>) -> Self {
        let by_name =
            columns.iter().enumerate().map(|(index, column)| (column.name.clone(), index)).collect();

        ColumnRegistry { pk, columns, by_name }
    }

    pub fn pk(&self) -> &ColumnSpec {
        &self.pk
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn get(&self, name: &str) -> Option<&ColumnSpec> {
        self.by_name.get(name).map(|index| &self.columns[*index])
    }

    /// Resolves `names` in the given order, the way callers pick the subset of
    /// columns one change set touches.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<ColumnSpec>, ValidationError> {
        names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                if name == self.pk.name {
                    return Err(ValidationError::UnsupportedValue {
                        column: name.to_string(),
                        reason: UnsupportedReason::PrimaryKeyColumn,
                    });
                }

                self.get(name).cloned().ok_or_else(|| ValidationError::UnsupportedValue {
                    column: name.to_string(),
                    reason: UnsupportedReason::UnknownColumn,
                })
            })
            .collect()
    }
}
