use std::{env, time::Duration};

use async_trait::async_trait;
use bb8::{Pool, PooledConnection, RunError};
use bb8_postgres::PostgresConnectionManager;
use dotenv::dotenv;
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use tokio::{task, time::timeout};
pub use tokio_postgres::types::{ToSql, Type as PgType};
use tokio_postgres::{config::SslMode, Config, Error as PgError, Transaction};
use tracing::{debug, error, warn};

use crate::database::{
    batch_operations::CompiledStatement,
    executor::{check_row_count, ExecutionError, RowCountPolicy, StatementExecutor},
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

type Manager = PostgresConnectionManager<MakeTlsConnector>;

pub(crate) type PgConnection<'a> = PooledConnection<'a, Manager>;

pub fn connection_string() -> Result<String, env::VarError> {
    dotenv().ok();
    env::var("DATABASE_URL")
}

#[derive(thiserror::Error, Debug)]
pub enum PostgresConnectionError {
    #[error("DATABASE_URL is not set: {0}")]
    MissingConnectionString(#[from] env::VarError),

    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(PgError),

    #[error("Could not build the TLS connector: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("Could not reach the database: {0}")]
    Unreachable(PgError),

    #[error("Timed out after {0:?} connecting to the database")]
    Timeout(Duration),

    #[error("Could not build the connection pool: {0}")]
    Pool(PgError),
}

#[derive(thiserror::Error, Debug)]
pub enum PostgresError {
    #[error("{0}")]
    Query(#[from] PgError),

    #[error("Connection pool error: {0}")]
    Pool(#[from] RunError<PgError>),
}

pub struct PostgresClient {
    pool: Pool<Manager>,
}

impl PostgresClient {
    /// Connects with the `DATABASE_URL` connection string.
    pub async fn new() -> Result<Self, PostgresConnectionError> {
        Self::connect(&connection_string()?).await
    }

    /// Opens a pool for `url`. With the default `sslmode=prefer`, a server
    /// that fails the TLS handshake is retried in plain text.
    pub async fn connect(url: &str) -> Result<Self, PostgresConnectionError> {
        let mut config: Config =
            url.parse().map_err(PostgresConnectionError::InvalidConnectionString)?;
        let tls = MakeTlsConnector::new(TlsConnector::builder().build()?);

        if let Err(e) = check_reachable(&config, &tls).await {
            if config.get_ssl_mode() != SslMode::Prefer {
                return Err(e);
            }
            warn!("Connecting with TLS failed ({}), retrying without TLS", e);
            config.ssl_mode(SslMode::Disable);
            check_reachable(&config, &tls).await?;
        }

        let pool = Pool::builder()
            .build(PostgresConnectionManager::new(config, tls))
            .await
            .map_err(PostgresConnectionError::Pool)?;

        Ok(PostgresClient { pool })
    }

    pub(crate) async fn pooled(&self) -> Result<PgConnection<'_>, PostgresError> {
        Ok(self.pool.get().await?)
    }

    pub async fn batch_execute(&self, sql: &str) -> Result<(), PostgresError> {
        let conn = self.pooled().await?;
        Ok(conn.batch_execute(sql).await?)
    }
}

async fn check_reachable(
    config: &Config,
    tls: &MakeTlsConnector,
) -> Result<(), PostgresConnectionError> {
    let (client, connection) = timeout(CONNECT_TIMEOUT, config.connect(tls.clone()))
        .await
        .map_err(|_| PostgresConnectionError::Timeout(CONNECT_TIMEOUT))?
        .map_err(PostgresConnectionError::Unreachable)?;

    let driver = task::spawn(connection);
    let checked = client.simple_query("SELECT 1").await;

    // the connection future finishes once its client is gone
    drop(client);
    let _ = driver.await;

    checked.map(|_| ()).map_err(PostgresConnectionError::Unreachable)
}

/// Runs `statements` in order on `transaction`, checking each row count.
/// Committing is left to the caller.
pub(crate) async fn execute_statements(
    transaction: &Transaction<'_>,
    statements: &[CompiledStatement],
    policy: RowCountPolicy,
) -> Result<Vec<u64>, ExecutionError> {
    let mut counts = Vec::with_capacity(statements.len());

    for (index, statement) in statements.iter().enumerate() {
        debug!("Executing update on {}: {}", statement.table, statement.text);

        let params: Vec<&(dyn ToSql + Sync)> =
            statement.parameters.iter().map(|param| param as &(dyn ToSql + Sync)).collect();

        let affected =
            transaction.execute(statement.text.as_str(), &params).await.map_err(|e| {
                error!("Update on {} failed: {} - query: {}", statement.table, e, statement.text);
                PostgresError::Query(e)
            })?;

        check_row_count(index, statement, affected, policy)?;
        counts.push(affected);
    }

    Ok(counts)
}

#[async_trait]
impl StatementExecutor for PostgresClient {
    async fn execute_atomically(
        &self,
        statements: &[CompiledStatement],
        policy: RowCountPolicy,
    ) -> Result<Vec<u64>, ExecutionError> {
        let mut conn = self.pooled().await?;
        // dropped without commit means rolled back
        let transaction = conn.transaction().await.map_err(PostgresError::Query)?;

        let counts = execute_statements(&transaction, statements, policy).await?;

        transaction.commit().await.map_err(PostgresError::Query)?;
        Ok(counts)
    }
}
