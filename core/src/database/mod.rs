pub mod batch_operations;
pub mod changeset;
pub mod column_spec;
pub mod dialect;
pub mod encoder;
pub mod executor;
pub mod layout;
pub mod merge;
pub mod postgres;
pub mod sql_type_wrapper;
pub mod sqlite;
