//! High-level entry point for parallel pgvector searches.

use pgfan_dispatch::{
    DispatchOptions, DispatchRequest, DispatchResult, DispatchStats, ParallelDispatcher,
    ParamValue, ParameterSet, TaskResult,
};
use tracing::debug;

use crate::config::PgConfig;
use crate::connection::PgConnector;
use crate::error::PgResult;

/// Runs search templates against one PostgreSQL database.
///
/// Every search opens `min(max_concurrency, number of parameter sets)`
/// connections, applies the configured session settings, runs the searches
/// and closes the connections again.
pub struct PgSearchEngine {
    dispatcher: ParallelDispatcher<PgConnector>,
    options: DispatchOptions,
}

impl PgSearchEngine {
    /// Create an engine with default dispatch options.
    pub fn new(config: PgConfig) -> Self {
        Self::with_options(config, DispatchOptions::default())
    }

    /// Create an engine with explicit dispatch options.
    pub fn with_options(config: PgConfig, options: DispatchOptions) -> Self {
        Self {
            dispatcher: ParallelDispatcher::new(PgConnector::new(config)),
            options,
        }
    }

    /// Create an engine from a database URL.
    pub fn from_url(url: &str) -> PgResult<Self> {
        Ok(Self::new(PgConfig::from_url(url)?))
    }

    /// Create an engine from `DATABASE_URL`.
    pub fn from_env() -> PgResult<Self> {
        Ok(Self::new(PgConfig::from_env()?))
    }

    /// The connection configuration.
    pub fn config(&self) -> &PgConfig {
        self.dispatcher.connector().config()
    }

    /// The dispatch options applied to every search.
    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    /// Replace the dispatch options.
    #[must_use]
    pub fn set_options(mut self, options: DispatchOptions) -> Self {
        self.options = options;
        self
    }

    /// Run `sql` once per parameter set.
    pub async fn search(
        &self,
        sql: &str,
        param_sets: Vec<ParameterSet>,
    ) -> DispatchResult<Vec<TaskResult>> {
        self.execute(&self.request(sql, param_sets)).await
    }

    /// Run `sql` once per query vector, bound as `$1`.
    pub async fn search_vectors<I>(&self, sql: &str, vectors: I) -> DispatchResult<Vec<TaskResult>>
    where
        I: IntoIterator<Item = Vec<f32>>,
    {
        let param_sets = vectors
            .into_iter()
            .map(|v| vec![ParamValue::Vector(v)])
            .collect();
        self.search(sql, param_sets).await
    }

    /// Like [`search`](Self::search), also returning execution statistics.
    pub async fn search_with_stats(
        &self,
        sql: &str,
        param_sets: Vec<ParameterSet>,
    ) -> DispatchResult<(Vec<TaskResult>, DispatchStats)> {
        let request = self.request(sql, param_sets);
        self.dispatcher.execute_with_stats(&request).await
    }

    /// Run a fully specified request, ignoring the engine's options.
    pub async fn execute(&self, request: &DispatchRequest) -> DispatchResult<Vec<TaskResult>> {
        debug!(
            tasks = request.param_sets.len(),
            max_concurrency = request.max_concurrency,
            "Starting parallel search"
        );
        self.dispatcher.execute(request).await
    }

    fn request(&self, sql: &str, param_sets: Vec<ParameterSet>) -> DispatchRequest {
        DispatchRequest::new(sql, param_sets).with_options(&self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_from_url() {
        let engine = PgSearchEngine::from_url("postgres://search@localhost/vectors").unwrap();
        assert_eq!(engine.config().database, "vectors");
        assert_eq!(engine.options(), &DispatchOptions::default());
    }

    #[test]
    fn test_engine_from_bad_url() {
        assert!(PgSearchEngine::from_url("postgres://localhost").is_err());
    }

    #[tokio::test]
    async fn test_invalid_template_fails_before_connecting() {
        // Nothing listens on this port; validation must fail first.
        let engine = PgSearchEngine::from_url("postgres://localhost:1/vectors").unwrap();
        let err = engine
            .search_vectors("SELECT * FROM items", vec![vec![1.0, 2.0]])
            .await
            .unwrap_err();
        assert!(err.is_validation_error());
    }

    #[tokio::test]
    async fn test_empty_param_sets_fail_before_connecting() {
        let engine = PgSearchEngine::from_url("postgres://localhost:1/vectors").unwrap();
        let err = engine
            .search("SELECT id FROM items ORDER BY e <-> $1", Vec::new())
            .await
            .unwrap_err();
        assert!(err.is_config_error());
    }
}
