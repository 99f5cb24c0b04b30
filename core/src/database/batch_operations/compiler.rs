use std::{collections::HashMap, convert::Infallible, fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::query_builder::{
    build_case_update, build_cast, build_in_list_update, build_values_join_update, CaseColumn,
};
use crate::database::{
    changeset::ValidatedChangeSet,
    column_spec::{ColumnSpec, LogicalType},
    dialect::{CastPolicy, Dialect, DialectLimits, StatementShape},
    encoder::{EncodeError, EncoderRegistry, Target, Token},
    layout::{KeySource, PhysicalTable},
    sql_type_wrapper::{Parameter, SqlValue},
};

/// How value cells travel to the database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueBinding {
    /// Placeholders in the text, values as bound parameters.
    #[default]
    Parameters,
    /// Literal tokens in the text, no parameters.
    Inline,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompileOptions {
    pub binding: ValueBinding,
    /// Use `CASE` updates even where the dialect supports a values-join.
    pub force_case_shape: bool,
    /// Overrides on top of the dialect's default limits.
    pub limits: DialectLimits,
}

/// A ready-to-execute statement.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledStatement {
    pub table: String,
    pub text: String,
    /// In placeholder order.
    pub parameters: Vec<Parameter>,
    /// Rows the statement should affect when every record still exists.
    pub expected_rows: u64,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("{0}")]
    Encode(#[from] EncodeError),

    #[error("statement for \"{table}\" on {dialect} exceeds {limit} ({rows} rows, {parameters} parameters, {bytes} bytes), use a smaller batch")]
    StatementTooLarge {
        table: String,
        dialect: String,
        limit: String,
        rows: usize,
        parameters: usize,
        bytes: usize,
    },

    #[error("table \"{table}\" can not be updated this way: {reason}")]
    UnsupportedLayout { table: String, reason: String },

    #[error("no update compiler registered for dialect \"{0}\"")]
    UnknownDialect(String),

    #[error("encoder for column \"{column}\" returned a {got} token where a {expected} token was expected")]
    UnexpectedToken { column: String, expected: Target, got: &'static str },
}

impl CompileError {
    /// Whether the statement only failed on its size and a smaller chunk may pass.
    pub fn is_too_large(&self) -> bool {
        matches!(self, CompileError::StatementTooLarge { .. })
    }
}

/// Compiles validated change sets into statements for one backend.
///
/// Built-in dialects are handled by [`BuiltinCompiler`]; other backends plug
/// in through a [`DialectRegistry`].
pub trait UpdateCompiler: Send + Sync {
    /// Identifier the compiler is registered under.
    fn name(&self) -> &str;

    /// Dialect whose encoders, quoting and default limits this compiler uses.
    fn dialect(&self) -> Dialect;

    /// Bind parameters one record with `columns` changed columns needs.
    fn parameters_per_row(&self, columns: usize, options: &CompileOptions) -> usize;

    fn compile(
        &self,
        table: &PhysicalTable,
        changes: &ValidatedChangeSet,
        encoders: &EncoderRegistry,
        options: &CompileOptions,
    ) -> Result<CompiledStatement, CompileError>;

    /// Sets the same values on every record in `member_pks`.
    fn compile_group(
        &self,
        table: &PhysicalTable,
        pk_spec: &ColumnSpec,
        assignments: &[(&ColumnSpec, &SqlValue)],
        member_pks: &[SqlValue],
        encoders: &EncoderRegistry,
        options: &CompileOptions,
    ) -> Result<CompiledStatement, CompileError>;

    fn limits(&self, options: &CompileOptions) -> DialectLimits {
        self.dialect().default_limits().merge(options.limits)
    }
}

/// Renders value cells, collecting parameters in placeholder order.
struct CellWriter<'a> {
    dialect: Dialect,
    binding: ValueBinding,
    encoders: &'a EncoderRegistry,
    parameters: Vec<Parameter>,
}

impl<'a> CellWriter<'a> {
    fn new(dialect: Dialect, binding: ValueBinding, encoders: &'a EncoderRegistry) -> Self {
        CellWriter { dialect, binding, encoders, parameters: Vec::new() }
    }

    fn key(&mut self, value: &SqlValue, spec: &ColumnSpec, cast: bool) -> Result<String, CompileError> {
        self.render(value, spec, cast, true)
    }

    fn value(&mut self, value: &SqlValue, spec: &ColumnSpec, cast: bool) -> Result<String, CompileError> {
        self.render(value, spec, cast, false)
    }

    fn render(
        &mut self,
        value: &SqlValue,
        spec: &ColumnSpec,
        cast: bool,
        is_key: bool,
    ) -> Result<String, CompileError> {
        let target = match (self.binding, self.dialect) {
            (ValueBinding::Inline, _) => Target::Literal,
            (ValueBinding::Parameters, Dialect::Postgres) => Target::Binary,
            (ValueBinding::Parameters, _) => Target::Parameter,
        };

        let token = if is_key {
            self.encoders.encode_pk(value, spec, self.dialect, target)?
        } else {
            self.encoders.encode(value, spec, self.dialect, target)?
        };

        let cell = match (target, token) {
            (Target::Literal, Token::Literal(text)) => text,
            (Target::Binary, Token::Binary(bytes)) => self.push(Parameter::Binary(bytes), spec),
            (Target::Parameter, Token::Parameter(value)) => {
                self.push(Parameter::Driver(value), spec)
            }
            (expected, got) => {
                return Err(CompileError::UnexpectedToken {
                    column: spec.name.clone(),
                    expected,
                    got: token_name(&got),
                })
            }
        };

        if !cast {
            return Ok(cell);
        }

        let sql_type = spec.cast_for(self.dialect).ok_or_else(|| EncodeError::UnsupportedType {
            column: spec.name.clone(),
            logical_type: spec.logical_type.to_string(),
            dialect: self.dialect,
            target,
        })?;

        Ok(build_cast(&cell, &sql_type))
    }

    fn push(&mut self, parameter: Parameter, spec: &ColumnSpec) -> String {
        self.parameters.push(parameter);
        let placeholder = self.dialect.placeholder(self.parameters.len());
        if self.dialect == Dialect::MySql && spec.logical_type == LogicalType::Bytes {
            format!("_binary {}", placeholder)
        } else {
            placeholder
        }
    }
}

fn token_name(token: &Token) -> &'static str {
    match token {
        Token::Literal(_) => "literal",
        Token::Binary(_) => "binary",
        Token::Parameter(_) => "parameter",
    }
}

/// Compiler for every built-in [`Dialect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinCompiler {
    dialect: Dialect,
}

impl BuiltinCompiler {
    pub fn new(dialect: Dialect) -> Self {
        BuiltinCompiler { dialect }
    }

    fn shape(&self, options: &CompileOptions) -> StatementShape {
        if options.force_case_shape {
            StatementShape::CaseWhen
        } else {
            self.dialect.shape()
        }
    }

    fn row_cast(&self, row_index: usize) -> bool {
        match self.dialect.cast_policy() {
            CastPolicy::EveryRow => true,
            CastPolicy::FirstRow => row_index == 0,
            CastPolicy::Never => false,
        }
    }

    fn check_size_before(
        &self,
        table: &PhysicalTable,
        rows: usize,
        columns: usize,
        options: &CompileOptions,
    ) -> Result<(), CompileError> {
        let limits = self.limits(options);
        let parameters = rows * self.parameters_per_row(columns, options);

        if let Some(max_rows) = limits.max_rows {
            if rows > max_rows {
                return Err(self.too_large(table, format!("max_rows = {}", max_rows), rows, parameters, 0));
            }
        }
        if let Some(max_parameters) = limits.max_parameters {
            if parameters > max_parameters {
                return Err(self.too_large(
                    table,
                    format!("max_parameters = {}", max_parameters),
                    rows,
                    parameters,
                    0,
                ));
            }
        }
        Ok(())
    }

    fn finish(
        &self,
        table: &PhysicalTable,
        text: String,
        cells: CellWriter,
        expected_rows: usize,
        options: &CompileOptions,
    ) -> Result<CompiledStatement, CompileError> {
        if let Some(max_bytes) = self.limits(options).max_statement_bytes {
            if text.len() > max_bytes {
                return Err(self.too_large(
                    table,
                    format!("max_statement_bytes = {}", max_bytes),
                    expected_rows,
                    cells.parameters.len(),
                    text.len(),
                ));
            }
        }

        debug!(
            "Compiled {} update for {} with {} rows and {} parameters",
            self.dialect,
            table.name,
            expected_rows,
            cells.parameters.len()
        );

        Ok(CompiledStatement {
            table: table.name.clone(),
            text,
            parameters: cells.parameters,
            expected_rows: expected_rows as u64,
        })
    }

    fn too_large(
        &self,
        table: &PhysicalTable,
        limit: String,
        rows: usize,
        parameters: usize,
        bytes: usize,
    ) -> CompileError {
        CompileError::StatementTooLarge {
            table: table.name.clone(),
            dialect: self.dialect.to_string(),
            limit,
            rows,
            parameters,
            bytes,
        }
    }

    fn compile_values_join(
        &self,
        table: &PhysicalTable,
        changes: &ValidatedChangeSet,
        encoders: &EncoderRegistry,
        options: &CompileOptions,
    ) -> Result<CompiledStatement, CompileError> {
        let pk_spec = changes.pk_spec();
        let mut cells = CellWriter::new(self.dialect, options.binding, encoders);

        let mut rows = Vec::with_capacity(changes.len());
        for (i, row) in changes.rows().iter().enumerate() {
            let cast = self.row_cast(i);
            let mut rendered = Vec::with_capacity(row.values.len() + 1);
            rendered.push(cells.key(&row.primary_key, pk_spec, cast)?);
            for (value, spec) in row.values.iter().zip(changes.columns()) {
                rendered.push(cells.value(value, spec, cast)?);
            }
            rows.push(rendered);
        }

        let mut in_list = Vec::new();
        if self.dialect == Dialect::SqliteLegacy {
            for row in changes.rows() {
                in_list.push(cells.key(&row.primary_key, pk_spec, false)?);
            }
        }

        let columns: Vec<&str> = changes.columns().iter().map(|c| c.name.as_str()).collect();
        let text = build_values_join_update(
            self.dialect,
            &table.name,
            &table.key_column,
            &columns,
            &rows,
            &in_list,
        );

        self.finish(table, text, cells, changes.len(), options)
    }

    fn compile_case(
        &self,
        table: &PhysicalTable,
        changes: &ValidatedChangeSet,
        encoders: &EncoderRegistry,
        options: &CompileOptions,
    ) -> Result<CompiledStatement, CompileError> {
        let pk_spec = changes.pk_spec();
        let cast = self.dialect.cast_policy() != CastPolicy::Never;
        let mut cells = CellWriter::new(self.dialect, options.binding, encoders);

        let mut case_columns = Vec::with_capacity(changes.columns().len());
        for (index, spec) in changes.columns().iter().enumerate() {
            let mut arms = Vec::with_capacity(changes.len());
            for row in changes.rows() {
                let key = cells.key(&row.primary_key, pk_spec, cast)?;
                let value = cells.value(&row.values[index], spec, cast)?;
                arms.push((key, value));
            }
            case_columns.push(CaseColumn { name: &spec.name, arms });
        }

        let mut in_list = Vec::with_capacity(changes.len());
        for row in changes.rows() {
            in_list.push(cells.key(&row.primary_key, pk_spec, cast)?);
        }

        let text =
            build_case_update(self.dialect, &table.name, &table.key_column, &case_columns, &in_list);

        self.finish(table, text, cells, changes.len(), options)
    }
}

fn reject_linked(table: &PhysicalTable) -> Result<(), CompileError> {
    match &table.key_source {
        KeySource::Shared => Ok(()),
        KeySource::Via { column } => Err(CompileError::UnsupportedLayout {
            table: table.name.clone(),
            reason: format!(
                "its key is stored in column \"{}\" of another table, use copy_update",
                column
            ),
        }),
    }
}

impl UpdateCompiler for BuiltinCompiler {
    fn name(&self) -> &str {
        self.dialect.as_str()
    }

    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn parameters_per_row(&self, columns: usize, options: &CompileOptions) -> usize {
        if options.binding == ValueBinding::Inline {
            return 0;
        }

        match self.shape(options) {
            StatementShape::CaseWhen => 2 * columns + 1,
            StatementShape::ValuesJoin if self.dialect == Dialect::SqliteLegacy => columns + 2,
            StatementShape::ValuesJoin => columns + 1,
        }
    }

    fn compile(
        &self,
        table: &PhysicalTable,
        changes: &ValidatedChangeSet,
        encoders: &EncoderRegistry,
        options: &CompileOptions,
    ) -> Result<CompiledStatement, CompileError> {
        reject_linked(table)?;
        self.check_size_before(table, changes.len(), changes.columns().len(), options)?;

        match self.shape(options) {
            StatementShape::ValuesJoin => self.compile_values_join(table, changes, encoders, options),
            StatementShape::CaseWhen => self.compile_case(table, changes, encoders, options),
        }
    }

    fn compile_group(
        &self,
        table: &PhysicalTable,
        pk_spec: &ColumnSpec,
        assignments: &[(&ColumnSpec, &SqlValue)],
        member_pks: &[SqlValue],
        encoders: &EncoderRegistry,
        options: &CompileOptions,
    ) -> Result<CompiledStatement, CompileError> {
        reject_linked(table)?;

        let limits = self.limits(options);
        let parameters = match options.binding {
            ValueBinding::Inline => 0,
            ValueBinding::Parameters => assignments.len() + member_pks.len(),
        };
        if let Some(max_parameters) = limits.max_parameters {
            if parameters > max_parameters {
                return Err(self.too_large(
                    table,
                    format!("max_parameters = {}", max_parameters),
                    member_pks.len(),
                    parameters,
                    0,
                ));
            }
        }

        let cast = self.dialect.cast_policy() != CastPolicy::Never;
        let mut cells = CellWriter::new(self.dialect, options.binding, encoders);

        let mut rendered = Vec::with_capacity(assignments.len());
        for (spec, value) in assignments {
            rendered.push((spec.name.as_str(), cells.value(value, spec, cast)?));
        }

        let mut in_list = Vec::with_capacity(member_pks.len());
        for pk in member_pks {
            in_list.push(cells.key(pk, pk_spec, cast)?);
        }

        let text =
            build_in_list_update(self.dialect, &table.name, &table.key_column, &rendered, &in_list);

        self.finish(table, text, cells, member_pks.len(), options)
    }
}

/// Names a compiler: a built-in dialect or a registered custom one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DialectId {
    Builtin(Dialect),
    Custom(String),
}

impl Default for DialectId {
    fn default() -> Self {
        DialectId::Builtin(Dialect::Postgres)
    }
}

impl From<Dialect> for DialectId {
    fn from(dialect: Dialect) -> Self {
        DialectId::Builtin(dialect)
    }
}

impl FromStr for DialectId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.parse::<Dialect>() {
            Ok(dialect) => DialectId::Builtin(dialect),
            Err(_) => DialectId::Custom(s.to_string()),
        })
    }
}

impl fmt::Display for DialectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialectId::Builtin(dialect) => write!(f, "{}", dialect),
            DialectId::Custom(name) => f.write_str(name),
        }
    }
}

/// Table of compilers for backends outside the built-in set.
#[derive(Clone, Default)]
pub struct DialectRegistry {
    custom: HashMap<String, Arc<dyn UpdateCompiler>>,
}

impl fmt::Debug for DialectRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialectRegistry")
            .field("custom", &self.custom.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DialectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, compiler: Arc<dyn UpdateCompiler>) {
        self.custom.insert(compiler.name().to_string(), compiler);
    }

    pub fn resolve(&self, id: &DialectId) -> Result<Arc<dyn UpdateCompiler>, CompileError> {
        match id {
            DialectId::Builtin(dialect) => Ok(Arc::new(BuiltinCompiler::new(*dialect))),
            DialectId::Custom(name) => self
                .custom
                .get(name)
                .cloned()
                .ok_or_else(|| CompileError::UnknownDialect(name.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{
        changeset::{validate, Record},
        sql_type_wrapper::DriverValue,
    };

    fn changes() -> ValidatedChangeSet {
        validate(
            ColumnSpec::new("id", LogicalType::BigInt),
            vec![
                ColumnSpec::new("a", LogicalType::Integer),
                ColumnSpec::new("b", LogicalType::Text).with_null(true),
            ],
            vec![
                Record::new(1i64).set("a", 10).set("b", "x"),
                Record::new(2i64).set("a", 20).set("b", SqlValue::Null),
            ],
        )
        .unwrap()
    }

    fn table() -> PhysicalTable {
        PhysicalTable::shared("t", "id", Vec::<String>::new())
    }

    fn inline() -> CompileOptions {
        CompileOptions { binding: ValueBinding::Inline, ..Default::default() }
    }

    #[test]
    fn test_postgres_inline_casts_every_cell() {
        let compiled = BuiltinCompiler::new(Dialect::Postgres)
            .compile(&table(), &changes(), &EncoderRegistry::new(), &inline())
            .unwrap();

        assert!(compiled.parameters.is_empty());
        assert_eq!(compiled.expected_rows, 2);
        assert!(compiled.text.contains(
            "(CAST(1 AS bigint), CAST(10 AS integer), CAST('x' AS text)),\n    (CAST(2 AS bigint), CAST(20 AS integer), CAST(NULL AS text))"
        ));
    }

    #[test]
    fn test_postgres_parameters_are_binary_and_ordered() {
        let compiled = BuiltinCompiler::new(Dialect::Postgres)
            .compile(&table(), &changes(), &EncoderRegistry::new(), &CompileOptions::default())
            .unwrap();

        assert!(compiled.text.contains("(CAST($1 AS bigint), CAST($2 AS integer), CAST($3 AS text))"));
        assert!(compiled.text.contains("(CAST($4 AS bigint), CAST($5 AS integer), CAST($6 AS text))"));
        assert_eq!(compiled.parameters.len(), 6);
        assert_eq!(
            compiled.parameters[1],
            Parameter::Binary(Some(bytes::Bytes::from_static(&[0, 0, 0, 10])))
        );
        assert_eq!(compiled.parameters[5], Parameter::Binary(None));
    }

    #[test]
    fn test_sqlite_parameters_never_cast() {
        let compiled = BuiltinCompiler::new(Dialect::Sqlite)
            .compile(&table(), &changes(), &EncoderRegistry::new(), &CompileOptions::default())
            .unwrap();

        assert!(compiled.text.contains("(?, ?, ?),\n    (?, ?, ?)"));
        assert!(!compiled.text.contains("CAST"));
        assert_eq!(
            compiled.parameters,
            vec![
                Parameter::Driver(DriverValue::Integer(1)),
                Parameter::Driver(DriverValue::Integer(10)),
                Parameter::Driver(DriverValue::Text("x".to_string())),
                Parameter::Driver(DriverValue::Integer(2)),
                Parameter::Driver(DriverValue::Integer(20)),
                Parameter::Driver(DriverValue::Null),
            ]
        );
    }

    #[test]
    fn test_sqlite_legacy_repeats_keys_for_in_list() {
        let compiled = BuiltinCompiler::new(Dialect::SqliteLegacy)
            .compile(&table(), &changes(), &EncoderRegistry::new(), &CompileOptions::default())
            .unwrap();

        assert_eq!(compiled.parameters.len(), 8);
        assert_eq!(compiled.parameters[6], Parameter::Driver(DriverValue::Integer(1)));
        assert_eq!(compiled.parameters[7], Parameter::Driver(DriverValue::Integer(2)));
    }

    #[test]
    fn test_mysql_casts_first_row_only() {
        let compiled = BuiltinCompiler::new(Dialect::MySql)
            .compile(&table(), &changes(), &EncoderRegistry::new(), &inline())
            .unwrap();

        assert!(compiled.text.contains(
            "SELECT CAST(1 AS SIGNED) AS `id`, CAST(10 AS SIGNED) AS `a`, CAST('x' AS CHAR) AS `b`"
        ));
        assert!(compiled.text.contains("UNION ALL SELECT 2, 20, NULL"));
    }

    #[test]
    fn test_case_shape() {
        let compiled = BuiltinCompiler::new(Dialect::Ansi)
            .compile(&table(), &changes(), &EncoderRegistry::new(), &inline())
            .unwrap();

        assert!(compiled.text.contains(
            "\"a\" = CASE \"id\" WHEN CAST(1 AS BIGINT) THEN CAST(10 AS INTEGER) WHEN CAST(2 AS BIGINT) THEN CAST(20 AS INTEGER) ELSE \"a\" END"
        ));
        assert!(compiled.text.ends_with("WHERE \"id\" IN (CAST(1 AS BIGINT), CAST(2 AS BIGINT))"));
    }

    #[test]
    fn test_forced_case_shape_counts_parameters() {
        let options = CompileOptions { force_case_shape: true, ..Default::default() };
        let compiler = BuiltinCompiler::new(Dialect::Sqlite);
        assert_eq!(compiler.parameters_per_row(2, &options), 5);

        let compiled =
            compiler.compile(&table(), &changes(), &EncoderRegistry::new(), &options).unwrap();
        assert_eq!(compiled.parameters.len(), 10);
        assert!(compiled.text.contains("CASE \"id\" WHEN ? THEN ?"));
    }

    #[test]
    fn test_limits_raise_statement_too_large() {
        let options = CompileOptions {
            limits: DialectLimits { max_parameters: Some(5), ..Default::default() },
            ..Default::default()
        };
        let result = BuiltinCompiler::new(Dialect::Postgres).compile(
            &table(),
            &changes(),
            &EncoderRegistry::new(),
            &options,
        );
        assert!(result.unwrap_err().is_too_large());

        let options = CompileOptions {
            binding: ValueBinding::Inline,
            limits: DialectLimits { max_statement_bytes: Some(32), ..Default::default() },
            ..Default::default()
        };
        let result = BuiltinCompiler::new(Dialect::Postgres).compile(
            &table(),
            &changes(),
            &EncoderRegistry::new(),
            &options,
        );
        assert!(matches!(result, Err(CompileError::StatementTooLarge { bytes, .. }) if bytes > 32));
    }

    #[test]
    fn test_group_statement() {
        let a = ColumnSpec::new("a", LogicalType::Integer);
        let value = SqlValue::I32(10);
        let compiled = BuiltinCompiler::new(Dialect::Postgres)
            .compile_group(
                &table(),
                &ColumnSpec::new("id", LogicalType::BigInt),
                &[(&a, &value)],
                &[SqlValue::I64(1), SqlValue::I64(2)],
                &EncoderRegistry::new(),
                &inline(),
            )
            .unwrap();

        assert_eq!(
            compiled.text,
            "UPDATE \"t\"\nSET \"a\" = CAST(10 AS integer)\nWHERE \"id\" IN (CAST(1 AS bigint), CAST(2 AS bigint))"
        );
        assert_eq!(compiled.expected_rows, 2);
    }

    #[test]
    fn test_serial_key_compiles_to_integer_cast() {
        let changes = validate(
            ColumnSpec::new("id", LogicalType::Integer).with_cast("serial"),
            vec![ColumnSpec::new("a", LogicalType::Integer)],
            vec![Record::new(1).set("a", 10)],
        )
        .unwrap();
        let compiled = BuiltinCompiler::new(Dialect::Postgres)
            .compile(&table(), &changes, &EncoderRegistry::new(), &inline())
            .unwrap();

        assert!(compiled.text.contains("(CAST(1 AS integer), CAST(10 AS integer))"));
        assert!(!compiled.text.contains("serial"));
    }

    #[test]
    fn test_linked_tables_are_rejected() {
        let linked = PhysicalTable::via("parent", "id", "parent_id", ["a"]);
        let result = BuiltinCompiler::new(Dialect::Postgres).compile(
            &linked,
            &changes(),
            &EncoderRegistry::new(),
            &inline(),
        );
        assert!(matches!(result, Err(CompileError::UnsupportedLayout { .. })));
    }

    #[test]
    fn test_unsupported_type_names_column_and_dialect() {
        let changes = validate(
            ColumnSpec::new("id", LogicalType::Integer),
            vec![ColumnSpec::new("tags", LogicalType::array_of(LogicalType::Text))],
            vec![Record::new(1).set("tags", SqlValue::array(["a"]))],
        )
        .unwrap();

        let err = BuiltinCompiler::new(Dialect::MySql)
            .compile(&table(), &changes, &EncoderRegistry::new(), &inline())
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("\"tags\""));
        assert!(message.contains("text[]"));
        assert!(message.contains("mysql"));
    }

    #[test]
    fn test_registry_resolves_builtin_and_custom() {
        let registry = DialectRegistry::new();
        let compiler = registry.resolve(&"sqlite".parse().unwrap()).unwrap();
        assert_eq!(compiler.dialect(), Dialect::Sqlite);

        let unknown = registry.resolve(&"oracle".parse().unwrap());
        assert!(matches!(unknown, Err(CompileError::UnknownDialect(name)) if name == "oracle"));

        #[derive(Debug)]
        struct Oracle(BuiltinCompiler);
        impl UpdateCompiler for Oracle {
            fn name(&self) -> &str {
                "oracle"
            }
            fn dialect(&self) -> Dialect {
                self.0.dialect()
            }
            fn parameters_per_row(&self, columns: usize, options: &CompileOptions) -> usize {
                self.0.parameters_per_row(columns, options)
            }
            fn compile(
                &self,
                table: &PhysicalTable,
                changes: &ValidatedChangeSet,
                encoders: &EncoderRegistry,
                options: &CompileOptions,
            ) -> Result<CompiledStatement, CompileError> {
                self.0.compile(table, changes, encoders, options)
            }
            fn compile_group(
                &self,
                table: &PhysicalTable,
                pk_spec: &ColumnSpec,
                assignments: &[(&ColumnSpec, &SqlValue)],
                member_pks: &[SqlValue],
                encoders: &EncoderRegistry,
                options: &CompileOptions,
            ) -> Result<CompiledStatement, CompileError> {
                self.0.compile_group(table, pk_spec, assignments, member_pks, encoders, options)
            }
        }

        let mut registry = DialectRegistry::new();
        registry.register(Arc::new(Oracle(BuiltinCompiler::new(Dialect::Ansi))));
        let compiler = registry.resolve(&DialectId::Custom("oracle".to_string())).unwrap();
        assert_eq!(compiler.name(), "oracle");
    }
}
