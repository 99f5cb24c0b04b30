use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::database::{
    batch_operations::{CompileError, CompileOptions, CompiledStatement, UpdateCompiler, ValueBinding},
    changeset::ValidatedChangeSet,
    column_spec::ColumnSpec,
    encoder::EncoderRegistry,
    layout::{PhysicalTable, TargetLayout},
    merge::MergePlan,
    postgres::client::PostgresError,
    sql_type_wrapper::SqlValue,
    sqlite::client::SqliteError,
};

/// What to do when a statement affects a different number of rows than it
/// has records, typically because a target row no longer exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowCountPolicy {
    /// Log a warning and list the mismatch in the report.
    #[default]
    Warn,
    /// Fail the batch and roll the transaction back.
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowCountMismatch {
    pub table: String,
    pub statement_index: usize,
    pub expected: u64,
    pub affected: u64,
}

#[derive(thiserror::Error, Debug)]
pub enum ExecutionError {
    #[error("{0}")]
    Postgres(#[from] PostgresError),

    #[error("{0}")]
    Sqlite(#[from] SqliteError),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("statement {statement_index} on \"{table}\" affected {affected} rows, expected {expected}")]
    RowCountMismatch { table: String, statement_index: usize, expected: u64, affected: u64 },
}

/// Runs compiled statements against a connection.
#[async_trait]
pub trait StatementExecutor: Send + Sync {
    /// Executes every statement in order inside one transaction and returns
    /// the affected row count of each. Any error rolls the whole batch back.
    async fn execute_atomically(
        &self,
        statements: &[CompiledStatement],
        policy: RowCountPolicy,
    ) -> Result<Vec<u64>, ExecutionError>;
}

/// Fails under [`RowCountPolicy::Fail`] when `affected` differs from the
/// statement's expected rows. Executors call this before committing.
pub fn check_row_count(
    statement_index: usize,
    statement: &CompiledStatement,
    affected: u64,
    policy: RowCountPolicy,
) -> Result<(), ExecutionError> {
    if policy == RowCountPolicy::Fail && affected != statement.expected_rows {
        return Err(ExecutionError::RowCountMismatch {
            table: statement.table.clone(),
            statement_index,
            expected: statement.expected_rows,
            affected,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// Logical records updated; for multi-table targets the largest count
    /// seen on any one table.
    pub rows_affected: u64,
    pub records: usize,
    pub statements: usize,
    pub merged_groups: usize,
    pub mismatches: Vec<RowCountMismatch>,
}

/// The statements of one update call, ready to run in a single transaction.
#[derive(Debug, Clone, Default)]
pub struct BatchPlan {
    pub statements: Vec<CompiledStatement>,
    pub records: usize,
    pub merged_groups: usize,
    /// Statements revisiting rows another statement already counted.
    uncounted: Vec<bool>,
}

impl BatchPlan {
    /// A plan whose statements each count their own rows.
    pub fn new(statements: Vec<CompiledStatement>, records: usize) -> Self {
        let mut plan = BatchPlan { records, ..Default::default() };
        plan.push(statements, true);
        plan
    }

    pub async fn execute(
        &self,
        executor: &dyn StatementExecutor,
        policy: RowCountPolicy,
    ) -> Result<UpdateReport, ExecutionError> {
        if self.statements.is_empty() {
            return Ok(self.report(&[]));
        }

        let affected = executor.execute_atomically(&self.statements, policy).await?;
        Ok(self.report(&affected))
    }

    /// Builds the report for the given per-statement affected counts.
    pub fn report(&self, affected: &[u64]) -> UpdateReport {
        let mut per_table: HashMap<&str, u64> = HashMap::new();
        let mut mismatches = Vec::new();

        for (index, (statement, affected)) in self.statements.iter().zip(affected).enumerate() {
            if *affected != statement.expected_rows {
                warn!(
                    "Statement {} on {} affected {} rows, expected {}",
                    index, statement.table, affected, statement.expected_rows
                );
                mismatches.push(RowCountMismatch {
                    table: statement.table.clone(),
                    statement_index: index,
                    expected: statement.expected_rows,
                    affected: *affected,
                });
            }
            if !self.uncounted.get(index).copied().unwrap_or(false) {
                *per_table.entry(statement.table.as_str()).or_default() += *affected;
            }
        }

        UpdateReport {
            rows_affected: per_table.values().copied().max().unwrap_or(0),
            records: self.records,
            statements: self.statements.len(),
            merged_groups: self.merged_groups,
            mismatches,
        }
    }

    fn push(&mut self, statements: Vec<CompiledStatement>, counted: bool) {
        self.uncounted.extend(std::iter::repeat(!counted).take(statements.len()));
        self.statements.extend(statements);
    }
}

/// Cuts a validated change set into statements that respect the compiler's
/// limits. A record's columns for one table always travel together.
pub struct BatchExecutor<'a> {
    compiler: &'a dyn UpdateCompiler,
    encoders: &'a EncoderRegistry,
    options: &'a CompileOptions,
    batch_size: Option<usize>,
}

impl<'a> BatchExecutor<'a> {
    pub fn new(
        compiler: &'a dyn UpdateCompiler,
        encoders: &'a EncoderRegistry,
        options: &'a CompileOptions,
        batch_size: Option<usize>,
    ) -> Self {
        BatchExecutor { compiler, encoders, options, batch_size }
    }

    /// Records per values-join statement for `columns` changed columns.
    pub fn rows_per_chunk(&self, columns: usize) -> usize {
        let limits = self.compiler.limits(self.options);
        let mut rows = self.batch_size.unwrap_or(usize::MAX);

        if let Some(max_rows) = limits.max_rows {
            rows = rows.min(max_rows);
        }

        let per_row = self.compiler.parameters_per_row(columns, self.options);
        if let (Some(max_parameters), true) = (limits.max_parameters, per_row > 0) {
            rows = rows.min(max_parameters / per_row);
        }

        rows.max(1)
    }

    fn keys_per_group_statement(&self, assignments: usize) -> usize {
        let limits = self.compiler.limits(self.options);
        let mut keys = self.batch_size.unwrap_or(usize::MAX);

        if let Some(max_rows) = limits.max_rows {
            keys = keys.min(max_rows);
        }
        if let (Some(max_parameters), ValueBinding::Parameters) =
            (limits.max_parameters, self.options.binding)
        {
            keys = keys.min(max_parameters.saturating_sub(assignments));
        }

        keys.max(1)
    }

    pub fn plan(
        &self,
        layout: &TargetLayout,
        changes: &ValidatedChangeSet,
        merge: Option<&MergePlan>,
    ) -> Result<BatchPlan, CompileError> {
        let mut plan = BatchPlan {
            records: changes.len(),
            merged_groups: merge.map_or(0, |merge| merge.groups.len()),
            ..Default::default()
        };

        for part in layout.split(changes) {
            let Some(merge) = merge else {
                let projected = changes.project(&part.column_indexes);
                plan.push(self.compile_chunked(part.table, &projected)?, true);
                continue;
            };

            for group in &merge.groups {
                let assignments: Vec<(&ColumnSpec, &SqlValue)> = merge
                    .merge_columns
                    .iter()
                    .zip(&group.shared_values)
                    .filter(|(index, _)| part.column_indexes.contains(index))
                    .map(|(_, (spec, value))| (spec, value))
                    .collect();
                if assignments.is_empty() {
                    continue;
                }
                let statements =
                    self.compile_group_chunked(part.table, changes.pk_spec(), &assignments, &group.member_pks)?;
                plan.push(statements, true);
            }

            let remainder: Vec<usize> = part
                .column_indexes
                .iter()
                .copied()
                .filter(|index| !merge.merge_columns.contains(index))
                .collect();
            if !remainder.is_empty() {
                let grouped = merge.grouped.project(&remainder);
                let has_group_statement = part.column_indexes.len() > remainder.len();
                plan.push(self.compile_chunked(part.table, &grouped)?, !has_group_statement);
            }

            let residual = merge.residual.project(&part.column_indexes);
            plan.push(self.compile_chunked(part.table, &residual)?, true);
        }

        debug!(
            "Planned {} statements for {} records ({} merged groups)",
            plan.statements.len(),
            plan.records,
            plan.merged_groups
        );

        Ok(plan)
    }

    fn compile_chunked(
        &self,
        table: &PhysicalTable,
        changes: &ValidatedChangeSet,
    ) -> Result<Vec<CompiledStatement>, CompileError> {
        let mut statements = Vec::new();
        if changes.is_empty() || changes.columns().is_empty() {
            return Ok(statements);
        }

        let rows = self.rows_per_chunk(changes.columns().len());
        for chunk in changes.chunks(rows) {
            self.compile_fitting(table, &chunk, &mut statements)?;
        }
        Ok(statements)
    }

    /// Halves the chunk until the statement fits the byte bound.
    fn compile_fitting(
        &self,
        table: &PhysicalTable,
        chunk: &ValidatedChangeSet,
        out: &mut Vec<CompiledStatement>,
    ) -> Result<(), CompileError> {
        match self.compiler.compile(table, chunk, self.encoders, self.options) {
            Ok(statement) => {
                out.push(statement);
                Ok(())
            }
            Err(e) if e.is_too_large() && chunk.len() > 1 => {
                let half = chunk.len() / 2;
                let first: Vec<usize> = (0..half).collect();
                let second: Vec<usize> = (half..chunk.len()).collect();
                self.compile_fitting(table, &chunk.select_rows(&first), out)?;
                self.compile_fitting(table, &chunk.select_rows(&second), out)
            }
            Err(e) => Err(e),
        }
    }

    fn compile_group_chunked(
        &self,
        table: &PhysicalTable,
        pk_spec: &ColumnSpec,
        assignments: &[(&ColumnSpec, &SqlValue)],
        member_pks: &[SqlValue],
    ) -> Result<Vec<CompiledStatement>, CompileError> {
        let mut statements = Vec::new();
        for keys in member_pks.chunks(self.keys_per_group_statement(assignments.len())) {
            self.compile_group_fitting(table, pk_spec, assignments, keys, &mut statements)?;
        }
        Ok(statements)
    }

    fn compile_group_fitting(
        &self,
        table: &PhysicalTable,
        pk_spec: &ColumnSpec,
        assignments: &[(&ColumnSpec, &SqlValue)],
        keys: &[SqlValue],
        out: &mut Vec<CompiledStatement>,
    ) -> Result<(), CompileError> {
        match self.compiler.compile_group(table, pk_spec, assignments, keys, self.encoders, self.options)
        {
            Ok(statement) => {
                out.push(statement);
                Ok(())
            }
            Err(e) if e.is_too_large() && keys.len() > 1 => {
                let (first, second) = keys.split_at(keys.len() / 2);
                self.compile_group_fitting(table, pk_spec, assignments, first, out)?;
                self.compile_group_fitting(table, pk_spec, assignments, second, out)
            }
            Err(e) => Err(e),
        }
    }
}
