use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Built-in SQL backends the compiler knows how to target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Postgres,
    /// SQLite 3.33 and later (`UPDATE ... FROM`).
    Sqlite,
    /// SQLite 3.15 to 3.32 (row values, no `UPDATE ... FROM`).
    SqliteLegacy,
    MySql,
    /// Any backend that only understands standard `CASE` updates.
    Ansi,
}

/// Which rows of a derived VALUES table get an explicit cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastPolicy {
    EveryRow,
    /// The backend takes the derived column type from the first row.
    FirstRow,
    Never,
}

/// How the update statement is shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementShape {
    ValuesJoin,
    CaseWhen,
}

/// Size bounds a single compiled statement has to respect.
///
/// `None` means unbounded. Defaults only carry documented protocol limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialectLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parameters: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rows: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_statement_bytes: Option<usize>,
}

impl DialectLimits {
    /// Takes every bound set in `overrides`, keeping `self` for the rest.
    pub fn merge(self, overrides: DialectLimits) -> Self {
        DialectLimits {
            max_parameters: overrides.max_parameters.or(self.max_parameters),
            max_rows: overrides.max_rows.or(self.max_rows),
            max_statement_bytes: overrides.max_statement_bytes.or(self.max_statement_bytes),
        }
    }
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Sqlite => "sqlite",
            Dialect::SqliteLegacy => "sqlite_legacy",
            Dialect::MySql => "mysql",
            Dialect::Ansi => "ansi",
        }
    }

    /// Always quotes, doubling any embedded quote character.
    pub fn quote_identifier(&self, name: &str) -> String {
        match self {
            Dialect::MySql => format!("`{}`", name.replace('`', "``")),
            _ => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }

    /// Quotes a possibly schema-qualified table name (`schema.table`).
    pub fn quote_table(&self, table_name: &str) -> String {
        match table_name.split_once('.') {
            Some((schema, table)) if !schema.is_empty() && !table.is_empty() => format!(
                "{}.{}",
                self.quote_identifier(schema.trim_matches('"')),
                self.quote_identifier(table.trim_matches('"'))
            ),
            _ => self.quote_identifier(table_name),
        }
    }

    /// Placeholder for the 1-based parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", index),
            _ => "?".to_string(),
        }
    }

    pub fn cast_policy(&self) -> CastPolicy {
        match self {
            Dialect::Postgres | Dialect::Ansi => CastPolicy::EveryRow,
            Dialect::MySql => CastPolicy::FirstRow,
            Dialect::Sqlite | Dialect::SqliteLegacy => CastPolicy::Never,
        }
    }

    pub fn shape(&self) -> StatementShape {
        match self {
            Dialect::Ansi => StatementShape::CaseWhen,
            _ => StatementShape::ValuesJoin,
        }
    }

    pub fn default_limits(&self) -> DialectLimits {
        let max_parameters = match self {
            Dialect::Postgres | Dialect::MySql => Some(65_535),
            Dialect::Sqlite | Dialect::SqliteLegacy => Some(32_766),
            Dialect::Ansi => None,
        };

        DialectLimits { max_parameters, max_rows: None, max_statement_bytes: None }
    }

    pub fn supports_binary(&self) -> bool {
        matches!(self, Dialect::Postgres)
    }

    pub fn is_sqlite(&self) -> bool {
        matches!(self, Dialect::Sqlite | Dialect::SqliteLegacy)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown dialect \"{0}\"")]
pub struct UnknownDialect(pub String);

impl FromStr for Dialect {
    type Err = UnknownDialect;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "sqlite" => Ok(Dialect::Sqlite),
            "sqlite_legacy" => Ok(Dialect::SqliteLegacy),
            "mysql" => Ok(Dialect::MySql),
            "ansi" => Ok(Dialect::Ansi),
            _ => Err(UnknownDialect(s.to_string())),
        }
    }
}
