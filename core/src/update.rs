use std::{fmt, sync::Arc};

use tracing::info;

use crate::{
    database::{
        batch_operations::{
            CompileError, CompileOptions, DialectId, DialectRegistry, UpdateCompiler, ValueBinding,
        },
        changeset::{ChangeSet, UnsupportedReason, ValidationError},
        dialect::DialectLimits,
        encoder::EncoderRegistry,
        executor::{BatchExecutor, BatchPlan, ExecutionError, RowCountPolicy, StatementExecutor, UpdateReport},
        layout::TargetLayout,
        merge::{plan_merge, CostPolicy},
        postgres::{
            client::PostgresClient,
            copy_update::{BulkLoadError, CopyOptions, CopyUpdateError},
        },
    },
    manifest::config::FastUpdateConfig,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOptions {
    /// Columns compared across records; all changed columns when `None`.
    pub columns: Option<Vec<String>>,
    pub cost_policy: CostPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOptions {
    pub dialect: DialectId,
    pub batch_size: Option<usize>,
    pub binding: ValueBinding,
    pub force_case_shape: bool,
    /// `None` disables the merge pass.
    pub merge: Option<MergeOptions>,
    pub row_count_policy: RowCountPolicy,
    pub limits: DialectLimits,
    pub analyze_threshold: usize,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        UpdateOptions {
            dialect: DialectId::default(),
            batch_size: None,
            binding: ValueBinding::default(),
            force_case_shape: false,
            merge: None,
            row_count_policy: RowCountPolicy::default(),
            limits: DialectLimits::default(),
            analyze_threshold: CopyOptions::default().analyze_threshold,
        }
    }
}

impl UpdateOptions {
    pub fn for_dialect(dialect: impl Into<DialectId>) -> Self {
        UpdateOptions { dialect: dialect.into(), ..Default::default() }
    }

    fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            binding: self.binding,
            force_case_shape: self.force_case_shape,
            limits: self.limits,
        }
    }

    fn copy_options(&self) -> CopyOptions {
        CopyOptions { analyze_threshold: self.analyze_threshold, row_count_policy: self.row_count_policy }
    }
}

impl From<&FastUpdateConfig> for UpdateOptions {
    fn from(config: &FastUpdateConfig) -> Self {
        UpdateOptions {
            dialect: config.dialect_id(),
            batch_size: config.batch_size,
            binding: config.value_binding,
            force_case_shape: config.force_case_shape,
            merge: config.merge.enabled.then(|| MergeOptions {
                columns: config.merge.columns.clone(),
                cost_policy: config.merge.cost_policy,
            }),
            row_count_policy: config.row_count_policy,
            limits: config.limits,
            analyze_threshold: config.copy.analyze_threshold,
        }
    }
}

/// Pipeline step an update failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validate,
    Compile,
    Stage,
    Execute,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Validate => f.write_str("validate"),
            Stage::Compile => f.write_str("compile"),
            Stage::Stage => f.write_str("stage"),
            Stage::Execute => f.write_str("execute"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum FastUpdateError {
    #[error("validate failed: {0}")]
    Validate(#[from] ValidationError),

    #[error("compile failed: {0}")]
    Compile(#[from] CompileError),

    #[error("stage failed: {0}")]
    Stage(#[from] BulkLoadError),

    #[error("execute failed: {0}")]
    Execute(#[from] ExecutionError),
}

impl FastUpdateError {
    pub fn stage(&self) -> Stage {
        match self {
            FastUpdateError::Validate(_) => Stage::Validate,
            FastUpdateError::Compile(_) => Stage::Compile,
            FastUpdateError::Stage(_) => Stage::Stage,
            FastUpdateError::Execute(_) => Stage::Execute,
        }
    }
}

impl From<CopyUpdateError> for FastUpdateError {
    fn from(error: CopyUpdateError) -> Self {
        match error {
            // encoding is a compile concern even on the staged path
            CopyUpdateError::Load(BulkLoadError::Encode(e)) => {
                FastUpdateError::Compile(CompileError::Encode(e))
            }
            CopyUpdateError::Load(e) => FastUpdateError::Stage(e),
            CopyUpdateError::Execute(e) => FastUpdateError::Execute(e),
        }
    }
}

/// Entry point for batched partial updates.
///
/// Holds the compilers for custom dialects and the custom value encoders;
/// both are read-only while an update runs.
#[derive(Debug, Default, Clone)]
pub struct FastUpdater {
    dialects: DialectRegistry,
    encoders: EncoderRegistry,
}

impl FastUpdater {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_encoders(mut self, encoders: EncoderRegistry) -> Self {
        self.encoders = encoders;
        self
    }

    pub fn register_compiler(&mut self, compiler: Arc<dyn UpdateCompiler>) {
        self.dialects.register(compiler);
    }

    pub fn encoders(&self) -> &EncoderRegistry {
        &self.encoders
    }

    /// Validates, merges and compiles without touching a database.
    pub fn plan(
        &self,
        layout: &TargetLayout,
        changes: ChangeSet,
        options: &UpdateOptions,
    ) -> Result<BatchPlan, FastUpdateError> {
        check_batch_size(options)?;
        let changes = changes.validate()?;
        let compiler = self.dialects.resolve(&options.dialect)?;

        let merge = match &options.merge {
            Some(merge) if !changes.is_empty() => {
                plan_merge(&changes, merge.columns.as_deref(), merge.cost_policy)?
            }
            _ => None,
        };

        let compile_options = options.compile_options();
        let executor =
            BatchExecutor::new(compiler.as_ref(), &self.encoders, &compile_options, options.batch_size);
        Ok(executor.plan(layout, &changes, merge.as_ref())?)
    }

    /// Updates every record of `changes` in one transaction on `executor`.
    pub async fn fast_update(
        &self,
        executor: &dyn StatementExecutor,
        layout: &TargetLayout,
        changes: ChangeSet,
        options: &UpdateOptions,
    ) -> Result<UpdateReport, FastUpdateError> {
        let plan = self.plan(layout, changes, options)?;
        let report = plan.execute(executor, options.row_count_policy).await?;

        info!(
            "Updated {} rows for {} records on {} with {} statements ({} merged groups)",
            report.rows_affected,
            report.records,
            layout.root().name,
            report.statements,
            report.merged_groups
        );

        Ok(report)
    }

    /// Updates through a PostgreSQL staging table loaded with binary `COPY`.
    pub async fn copy_update(
        &self,
        client: &PostgresClient,
        layout: &TargetLayout,
        changes: ChangeSet,
        options: &UpdateOptions,
    ) -> Result<UpdateReport, FastUpdateError> {
        check_batch_size(options)?;
        let changes = changes.validate()?;
        let report =
            client.copy_update(layout, &changes, &self.encoders, &options.copy_options()).await?;
        Ok(report)
    }
}

fn check_batch_size(options: &UpdateOptions) -> Result<(), ValidationError> {
    if options.batch_size == Some(0) {
        return Err(ValidationError::UnsupportedValue {
            column: "batch_size".to_string(),
            reason: UnsupportedReason::InvalidBatchSize,
        });
    }
    Ok(())
}
