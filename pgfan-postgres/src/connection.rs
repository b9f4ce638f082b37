//! PostgreSQL connections for the dispatcher.

use std::sync::Arc;

use pgfan_dispatch::traits::{BoxFuture, Connection, Connector};
use pgfan_dispatch::{DispatchResult, ParamValue, QueryOutput};
use tokio::task::JoinHandle;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, warn};

use crate::config::PgConfig;
use crate::error::{PgError, PgResult, describe};
use crate::row::row_to_json;
use crate::statement::StatementCache;
use crate::types::PgParam;

/// Opens [`PgConnection`]s from a [`PgConfig`].
#[derive(Debug, Clone)]
pub struct PgConnector {
    config: Arc<PgConfig>,
}

impl PgConnector {
    /// Create a connector.
    pub fn new(config: PgConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// The connection configuration.
    pub fn config(&self) -> &PgConfig {
        &self.config
    }
}

impl Connector for PgConnector {
    type Connection = PgConnection;

    fn connect(&self) -> BoxFuture<'_, DispatchResult<PgConnection>> {
        Box::pin(async move { Ok(PgConnection::connect(&self.config).await?) })
    }
}

/// A single PostgreSQL session with its own prepared statement cache.
pub struct PgConnection {
    client: Client,
    driver: JoinHandle<()>,
    statements: StatementCache,
}

impl PgConnection {
    /// Open a connection.
    pub async fn connect(config: &PgConfig) -> PgResult<Self> {
        let (client, connection) = config
            .to_pg_config()
            .connect(NoTls)
            .await
            .map_err(|e| {
                PgError::connection(format!(
                    "failed to connect to {}:{}/{}: {}",
                    config.host,
                    config.port,
                    config.database,
                    describe(&e)
                ))
            })?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "PostgreSQL connection terminated with error");
            }
        });

        debug!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            "Connected to PostgreSQL"
        );

        Ok(Self {
            client,
            driver,
            statements: StatementCache::default(),
        })
    }

    /// Run a query, returning column names and JSON-valued rows.
    ///
    /// Column names come from the prepared statement, so they are present
    /// even when no rows match.
    pub async fn query_rows(&self, sql: &str, params: &[ParamValue]) -> PgResult<QueryOutput> {
        let stmt = self.statements.get_or_prepare(&self.client, sql).await?;

        let fields = stmt
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let bound: Vec<PgParam<'_>> = params.iter().map(PgParam::new).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        let rows = self.client.query(&stmt, &refs).await?;
        let rows = rows.iter().map(row_to_json).collect::<PgResult<Vec<_>>>()?;

        Ok(QueryOutput::new(fields, rows))
    }

    /// Execute a batch of statements in a single round-trip.
    pub async fn batch_execute(&self, sql: &str) -> PgResult<()> {
        debug!(sql = %sql, "Executing batch");
        self.client.batch_execute(sql).await?;
        Ok(())
    }

    /// Close the session and wait for the connection task to finish.
    pub async fn close(self) -> PgResult<()> {
        let Self { client, driver, .. } = self;
        drop(client);
        driver
            .await
            .map_err(|e| PgError::internal(format!("connection task failed: {}", e)))
    }
}

impl Connection for PgConnection {
    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [ParamValue],
    ) -> BoxFuture<'a, DispatchResult<QueryOutput>> {
        Box::pin(async move { Ok(self.query_rows(sql, params).await?) })
    }

    fn batch_execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, DispatchResult<()>> {
        Box::pin(async move { Ok(PgConnection::batch_execute(self, sql).await?) })
    }

    fn close(self) -> BoxFuture<'static, DispatchResult<()>> {
        Box::pin(async move { Ok(PgConnection::close(self).await?) })
    }
}
