use std::{env, path::PathBuf};

use async_trait::async_trait;
use dotenv::dotenv;
use rusqlite::{params_from_iter, Connection};
use tracing::{debug, error, info};

use crate::database::{
    batch_operations::CompiledStatement,
    executor::{check_row_count, ExecutionError, RowCountPolicy, StatementExecutor},
};

pub fn connection_string() -> Result<String, env::VarError> {
    dotenv().ok();
    // Default to ./fast_update.db if DATABASE_URL is not set
    let connection = env::var("DATABASE_URL").unwrap_or_else(|_| "./fast_update.db".to_string());
    Ok(connection)
}

#[derive(thiserror::Error, Debug)]
pub enum SqliteConnectionError {
    #[error("The database connection string is wrong please check your environment: {0}")]
    DatabaseConnectionConfigWrong(#[from] env::VarError),

    #[error("Can not connect to the database please make sure your connection string is correct")]
    CanNotConnectToDatabase,
}

#[derive(thiserror::Error, Debug)]
pub enum SqliteError {
    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    #[error("Failed to acquire connection lock")]
    ConnectionLockError,
}

pub struct SqliteClient {
    db_path: String,
}

impl SqliteClient {
    /// Opens the database named by `DATABASE_URL`.
    pub async fn new() -> Result<Self, SqliteConnectionError> {
        Self::open(connection_string()?).await
    }

    pub async fn open(db_path: impl Into<String>) -> Result<Self, SqliteConnectionError> {
        let db_path = db_path.into();
        info!("Connecting to SQLite database at: {}", db_path);

        let path = db_path.clone();
        tokio::task::spawn_blocking(move || {
            if let Some(parent) = PathBuf::from(&path).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        error!("Failed to create parent directories for SQLite database: {}", e);
                        SqliteConnectionError::CanNotConnectToDatabase
                    })?;
                }
            }

            let conn = Connection::open(&path).map_err(|e| {
                error!("Error connecting to SQLite database: {}", e);
                SqliteConnectionError::CanNotConnectToDatabase
            })?;

            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;").map_err(
                |_e| {
                    error!("Error setting SQLite pragmas");
                    SqliteConnectionError::CanNotConnectToDatabase
                },
            )?;

            Ok::<(), SqliteConnectionError>(())
        })
        .await
        .map_err(|_| SqliteConnectionError::CanNotConnectToDatabase)??;

        Ok(SqliteClient { db_path })
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    pub async fn batch_execute(&self, sql: &str) -> Result<(), SqliteError> {
        let db_path = self.db_path.clone();
        let sql = sql.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            conn.execute_batch(&sql)?;
            Ok::<(), rusqlite::Error>(())
        })
        .await
        .map_err(|_| SqliteError::ConnectionLockError)?
        .map_err(SqliteError::SqliteError)
    }
}

#[async_trait]
impl StatementExecutor for SqliteClient {
    async fn execute_atomically(
        &self,
        statements: &[CompiledStatement],
        policy: RowCountPolicy,
    ) -> Result<Vec<u64>, ExecutionError> {
        let db_path = self.db_path.clone();
        let statements = statements.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(&db_path).map_err(SqliteError::SqliteError)?;
            // rolls back on drop unless committed
            let transaction = conn.transaction().map_err(SqliteError::SqliteError)?;

            let mut counts = Vec::with_capacity(statements.len());
            for (index, statement) in statements.iter().enumerate() {
                debug!("Executing update on {}: {}", statement.table, statement.text);

                let affected = transaction
                    .execute(&statement.text, params_from_iter(statement.parameters.iter()))
                    .map_err(|e| {
                        error!(
                            "Error executing update on {}: {} - query: {}",
                            statement.table, e, statement.text
                        );
                        SqliteError::SqliteError(e)
                    })? as u64;

                check_row_count(index, statement, affected, policy)?;
                counts.push(affected);
            }

            transaction.commit().map_err(SqliteError::SqliteError)?;
            Ok::<Vec<u64>, ExecutionError>(counts)
        })
        .await
        .map_err(|_| SqliteError::ConnectionLockError)?
    }
}
