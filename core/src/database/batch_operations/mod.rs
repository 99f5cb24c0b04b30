//! Multi-row partial updates compiled into as few statements as possible.
//!
//! `query_builder` assembles the SQL text of every supported shape; `compiler`
//! renders value cells through the encoders and picks the shape per dialect.

mod compiler;
mod query_builder;

pub use compiler::{
    BuiltinCompiler, CompileError, CompileOptions, CompiledStatement, DialectId, DialectRegistry,
    UpdateCompiler, ValueBinding,
};
pub use query_builder::{build_staging_update, source_alias};
