// public
pub mod manifest;

mod database;
pub use database::{
    batch_operations::{
        BuiltinCompiler, CompileError, CompileOptions, CompiledStatement, DialectId,
        DialectRegistry, UpdateCompiler, ValueBinding,
    },
    changeset::{
        ChangeSet, Record, Row, UnsupportedReason, ValidatedChangeSet, ValidationError,
    },
    column_spec::{ColumnRegistry, ColumnSpec, LogicalType, RangeKind},
    dialect::{CastPolicy, Dialect, DialectLimits, StatementShape, UnknownDialect},
    encoder::{
        encode, BuiltinEncoder, EncodeError, EncoderRegistry, Target, Token, ValueEncoder,
    },
    executor::{
        check_row_count, BatchPlan, ExecutionError, RowCountMismatch, RowCountPolicy,
        StatementExecutor, UpdateReport,
    },
    layout::{KeySource, PhysicalTable, TargetLayout},
    merge::{partition, plan_merge, CostPolicy, MergeGroup, MergePlan},
    postgres::{
        client::{PostgresClient, PostgresConnectionError, PostgresError, PgType, ToSql},
        copy_update::{BulkLoadError, CopyOptions, CopyUpdateError},
    },
    sql_type_wrapper::{DriverValue, Parameter, RangeBound, RangeValue, SqlValue},
    sqlite::client::{SqliteClient, SqliteConnectionError, SqliteError},
};

mod update;
pub use update::{FastUpdateError, FastUpdater, MergeOptions, Stage, UpdateOptions};

mod helpers;
pub use helpers::generate_random_id;

mod logger;
pub use logger::{setup_info_logger, setup_logger, setup_sql_logger};

// export 3rd party dependencies
pub use async_trait::async_trait;
pub use tokio::main as fast_update_main;
pub use tracing::{error as fast_update_error, info as fast_update_info};
