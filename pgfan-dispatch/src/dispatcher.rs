//! Parallel execution of one search template over many parameter sets.
//!
//! A dispatch call moves through these phases:
//!
//! ```text
//! Validating -> PoolBuilding -> Dispatching -> Draining -> Done
//!      |              |                            ^
//!      +-- error      +----------- error ----------+
//! ```
//!
//! Validation failures return before any connection is opened. A pool that
//! cannot be built is torn down and its error returned without running any
//! task. Once dispatching starts, a failing query only marks its own
//! [`TaskResult`]; the pool is always drained before the call returns.
//!
//! Tasks are admitted through a semaphore with one permit per pooled
//! connection: whenever a task finishes, the next queued one starts. Results
//! come back in parameter-set order regardless of completion order.
//!
//! ```rust,ignore
//! use pgfan_dispatch::{DispatchRequest, ParallelDispatcher, ParamValue};
//!
//! let request = DispatchRequest::builder()
//!     .sql("SELECT id FROM items ORDER BY embedding <=> $1 LIMIT 10")
//!     .param_set(vec![ParamValue::vector(vec![0.1, 0.2, 0.3])])
//!     .param_set(vec![ParamValue::vector(vec![0.3, 0.2, 0.1])])
//!     .session_option("hnsw.ef_search", 100)
//!     .max_concurrency(8)
//!     .build();
//!
//! let results = ParallelDispatcher::new(connector).execute(&request).await?;
//! ```

use std::fmt;
use std::panic::{AssertUnwindSafe, resume_unwind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tracing::{debug, info, trace, warn};

use crate::config::{DEFAULT_MAX_CONCURRENCY, DispatchOptions};
use crate::error::{DispatchError, DispatchResult};
use crate::pool::ConnectionPool;
use crate::session::{SessionOptions, SessionValue};
use crate::traits::{Connection, Connector};
use crate::types::{ParameterSet, TaskResult};
use crate::validation::validate_sql_template;

/// Phases of a dispatch call, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPhase {
    /// Checking the request.
    Validating,
    /// Opening connections.
    PoolBuilding,
    /// Running tasks.
    Dispatching,
    /// Closing connections.
    Draining,
    /// Finished.
    Done,
}

impl fmt::Display for DispatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validating => "validating",
            Self::PoolBuilding => "pool_building",
            Self::Dispatching => "dispatching",
            Self::Draining => "draining",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// One search template and the parameter sets to run it with.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRequest {
    /// The query template, with `$n` placeholders.
    pub sql: String,
    /// One entry per task, in result order.
    pub param_sets: Vec<ParameterSet>,
    /// Settings applied to each connection before use.
    pub session: SessionOptions,
    /// Upper bound on concurrently running queries.
    pub max_concurrency: usize,
}

impl DispatchRequest {
    /// Create a request with default options.
    pub fn new(sql: impl Into<String>, param_sets: Vec<ParameterSet>) -> Self {
        Self {
            sql: sql.into(),
            param_sets,
            session: SessionOptions::new(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    /// Create a builder.
    pub fn builder() -> DispatchRequestBuilder {
        DispatchRequestBuilder::default()
    }

    /// Take concurrency and session settings from `options`.
    #[must_use]
    pub fn with_options(mut self, options: &DispatchOptions) -> Self {
        self.max_concurrency = options.max_concurrency;
        self.session = options.session.clone();
        self
    }

    /// Check the request and return the effective concurrency.
    ///
    /// Checks run in a fixed order: template, parameter sets, concurrency.
    /// The effective concurrency is `min(max_concurrency, param_sets.len())`.
    pub fn validate(&self) -> DispatchResult<usize> {
        validate_sql_template(&self.sql)?;

        if self.param_sets.is_empty() {
            return Err(DispatchError::config(
                "param sets must be a non-empty list",
            ));
        }

        if self.max_concurrency == 0 {
            return Err(DispatchError::config(
                "max concurrency must be greater than 0",
            ));
        }

        Ok(self.max_concurrency.min(self.param_sets.len()))
    }
}

/// Builder for [`DispatchRequest`].
#[derive(Debug, Default)]
pub struct DispatchRequestBuilder {
    sql: String,
    param_sets: Vec<ParameterSet>,
    session: SessionOptions,
    max_concurrency: Option<usize>,
}

impl DispatchRequestBuilder {
    /// Set the query template.
    pub fn sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = sql.into();
        self
    }

    /// Append one parameter set.
    pub fn param_set(mut self, params: ParameterSet) -> Self {
        self.param_sets.push(params);
        self
    }

    /// Append several parameter sets.
    pub fn param_sets(mut self, sets: impl IntoIterator<Item = ParameterSet>) -> Self {
        self.param_sets.extend(sets);
        self
    }

    /// Add a session setting.
    pub fn session_option(mut self, name: impl Into<String>, value: impl Into<SessionValue>) -> Self {
        self.session.set(name, value);
        self
    }

    /// Replace all session settings.
    pub fn session(mut self, session: SessionOptions) -> Self {
        self.session = session;
        self
    }

    /// Set maximum concurrency.
    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max);
        self
    }

    /// Build the request. Nothing is checked until it is executed.
    pub fn build(self) -> DispatchRequest {
        DispatchRequest {
            sql: self.sql,
            param_sets: self.param_sets,
            session: self.session,
            max_concurrency: self.max_concurrency.unwrap_or(DEFAULT_MAX_CONCURRENCY),
        }
    }
}

/// Statistics from one dispatch call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Number of tasks run.
    pub total_tasks: usize,
    /// Tasks whose query succeeded.
    pub successful: usize,
    /// Tasks whose query failed.
    pub failed: usize,
    /// Connections opened for the call.
    pub pool_size: usize,
    /// Peak number of queries in flight at once.
    pub max_concurrent: usize,
    /// Wall time from pool build to drain.
    pub total_duration: Duration,
}

/// Runs search templates in parallel over connections from one [`Connector`].
///
/// Each call opens its own connections and closes them before returning;
/// nothing is shared between calls.
pub struct ParallelDispatcher<K> {
    connector: K,
}

impl<K: Connector> ParallelDispatcher<K> {
    /// Create a dispatcher that opens connections with `connector`.
    pub fn new(connector: K) -> Self {
        Self { connector }
    }

    /// The connector.
    pub fn connector(&self) -> &K {
        &self.connector
    }

    /// Run `request`, returning one result per parameter set in input order.
    ///
    /// Fails only when the request is invalid or the connections cannot be
    /// opened. Individual query failures are reported in their task result.
    ///
    /// The call may be wrapped in `tokio::time::timeout`. If the future is
    /// dropped early, in-flight queries are abandoned and the open
    /// connections are closed in the background.
    pub async fn execute(&self, request: &DispatchRequest) -> DispatchResult<Vec<TaskResult>> {
        self.execute_with_stats(request)
            .await
            .map(|(results, _)| results)
    }

    /// Like [`execute`](Self::execute), also returning execution statistics.
    pub async fn execute_with_stats(
        &self,
        request: &DispatchRequest,
    ) -> DispatchResult<(Vec<TaskResult>, DispatchStats)> {
        trace!(phase = %DispatchPhase::Validating, "Dispatch phase");
        let concurrency = request.validate()?;

        let start = Instant::now();
        trace!(phase = %DispatchPhase::PoolBuilding, "Dispatch phase");
        let mut pool =
            ConnectionPool::open(&self.connector, concurrency, Some(&request.session)).await?;

        trace!(phase = %DispatchPhase::Dispatching, "Dispatch phase");
        let outcome = AssertUnwindSafe(run_tasks(
            &pool,
            &request.sql,
            &request.param_sets,
            concurrency,
        ))
        .catch_unwind()
        .await;

        trace!(phase = %DispatchPhase::Draining, "Dispatch phase");
        pool.close().await;

        let (results, max_concurrent) = match outcome {
            Ok(outcome) => outcome,
            Err(panic) => resume_unwind(panic),
        };

        let successful = results.iter().filter(|r| r.success).count();
        let stats = DispatchStats {
            total_tasks: results.len(),
            successful,
            failed: results.len() - successful,
            pool_size: concurrency,
            max_concurrent,
            total_duration: start.elapsed(),
        };

        trace!(phase = %DispatchPhase::Done, "Dispatch phase");
        info!(
            tasks = stats.total_tasks,
            successful = stats.successful,
            failed = stats.failed,
            concurrency,
            duration_ms = stats.total_duration.as_millis() as u64,
            "Dispatch complete"
        );

        Ok((results, stats))
    }
}

/// Run every task with at most `concurrency` in flight.
///
/// Returns the results in task order and the observed peak concurrency.
async fn run_tasks<C: Connection>(
    pool: &ConnectionPool<C>,
    sql: &str,
    param_sets: &[ParameterSet],
    concurrency: usize,
) -> (Vec<TaskResult>, usize) {
    let semaphore = Semaphore::new(concurrency);
    let gauge = ConcurrencyGauge::default();

    let mut pending: FuturesUnordered<_> = param_sets
        .iter()
        .enumerate()
        .map(|(index, params)| {
            let semaphore = &semaphore;
            let gauge = &gauge;
            async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return TaskResult::failure(index, "task admission closed");
                };
                let _active = gauge.enter();

                let conn = pool.checkout();
                debug!(index, slot = conn.slot(), "Running search task");

                match conn.query(sql, params).await {
                    Ok(output) => {
                        debug!(index, rows = output.rows.len(), "Search task finished");
                        TaskResult::success(index, output)
                    }
                    Err(e) => {
                        warn!(index, error = %e, "Search task failed");
                        TaskResult::failure(index, e.message())
                    }
                }
            }
        })
        .collect();

    let mut slots: Vec<Option<TaskResult>> = vec![None; param_sets.len()];
    while let Some(result) = pending.next().await {
        let index = result.index;
        slots[index] = Some(result);
    }

    (slots.into_iter().flatten().collect(), gauge.peak())
}

/// Tracks in-flight tasks and the peak reached.
#[derive(Default)]
struct ConcurrencyGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyGauge {
    fn enter(&self) -> GaugeGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        GaugeGuard { gauge: self }
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct GaugeGuard<'a> {
    gauge: &'a ConcurrencyGauge,
}

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
    }
}
