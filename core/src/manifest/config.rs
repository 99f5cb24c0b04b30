use serde::{Deserialize, Serialize};

use crate::database::{
    batch_operations::{DialectId, ValueBinding},
    dialect::DialectLimits,
    executor::RowCountPolicy,
    merge::CostPolicy,
    postgres::copy_update::CopyOptions,
};

fn default_dialect() -> String {
    "postgres".to_string()
}

fn default_analyze_threshold() -> usize {
    CopyOptions::default().analyze_threshold
}

/// Settings for one update target, usually read from a YAML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FastUpdateConfig {
    /// A built-in dialect (`postgres`, `sqlite`, `sqlite_legacy`, `mysql`, `ansi`) or
    /// the name of a registered custom compiler.
    #[serde(default = "default_dialect")]
    pub dialect: String,

    /// Upper bound on records per statement, on top of the dialect limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    #[serde(default)]
    pub value_binding: ValueBinding,

    /// Emit `CASE` updates even where a values-join is available.
    #[serde(default)]
    pub force_case_shape: bool,

    #[serde(default)]
    pub merge: MergeConfig,

    #[serde(default)]
    pub row_count_policy: RowCountPolicy,

    /// Overrides of the dialect's statement limits.
    #[serde(default)]
    pub limits: DialectLimits,

    #[serde(default)]
    pub copy: CopyConfig,
}

impl Default for FastUpdateConfig {
    fn default() -> Self {
        FastUpdateConfig {
            dialect: default_dialect(),
            batch_size: None,
            value_binding: ValueBinding::default(),
            force_case_shape: false,
            merge: MergeConfig::default(),
            row_count_policy: RowCountPolicy::default(),
            limits: DialectLimits::default(),
            copy: CopyConfig::default(),
        }
    }
}

impl FastUpdateConfig {
    pub fn dialect_id(&self) -> DialectId {
        match self.dialect.parse() {
            Ok(id) => id,
            Err(never) => match never {},
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Columns compared across records. All changed columns when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,

    #[serde(default)]
    pub cost_policy: CostPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyConfig {
    #[serde(default = "default_analyze_threshold")]
    pub analyze_threshold: usize,
}

impl Default for CopyConfig {
    fn default() -> Self {
        CopyConfig { analyze_threshold: default_analyze_threshold() }
    }
}
