//! Integration tests for parallel dispatch.
//!
//! These tests drive the dispatcher through an instrumented in-memory
//! connector, so they check scheduling and teardown behaviour without a
//! database.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::FutureExt;
use pgfan::dispatch::{
    BoxFuture, Connection, Connector, DispatchError, DispatchRequest, DispatchResult,
    ParallelDispatcher, ParamValue, ParameterSet, QueryOutput, Row, SessionOptions,
};
use pretty_assertions::assert_eq;
use serde_json::json;

const SEARCH_SQL: &str = "SELECT id, embedding <-> $1 AS distance FROM items ORDER BY distance LIMIT 3";

/// Counters shared by every connection a [`MockConnector`] opens.
#[derive(Default)]
struct Probe {
    attempts: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    session_statements: Mutex<Vec<String>>,
    /// Task index to the connection id that served it.
    served_by: Mutex<HashMap<usize, usize>>,
    /// Task indexes in the order their queries finished.
    finished: Mutex<Vec<usize>>,
}

impl Probe {
    fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Failures and latencies the mock injects.
#[derive(Clone, Default)]
struct Faults {
    /// Refuse the n-th connect attempt (zero based).
    refuse_connect: Option<usize>,
    /// Reject every session statement.
    reject_session: bool,
    /// Task indexes whose query returns an error.
    failing_tasks: HashSet<usize>,
    /// Task index whose query panics.
    panicking_task: Option<usize>,
    /// Query latency per task index, in milliseconds.
    latencies: HashMap<usize, u64>,
    /// Latency for tasks not listed in `latencies`.
    default_latency: Option<u64>,
}

impl Faults {
    fn latency(&self, index: usize) -> u64 {
        match self.latencies.get(&index) {
            Some(ms) => *ms,
            // Uneven delays so completion order differs from input order.
            None => self
                .default_latency
                .unwrap_or(1 + ((index * 7) % 5) as u64),
        }
    }
}

#[derive(Clone, Default)]
struct MockConnector {
    probe: Arc<Probe>,
    faults: Faults,
}

impl MockConnector {
    fn with_faults(faults: Faults) -> Self {
        Self {
            probe: Arc::default(),
            faults,
        }
    }
}

impl Connector for MockConnector {
    type Connection = MockConnection;

    fn connect(&self) -> BoxFuture<'_, DispatchResult<MockConnection>> {
        Box::pin(async move {
            let attempt = self.probe.attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(1)).await;

            if self.faults.refuse_connect == Some(attempt) {
                return Err(DispatchError::connection("connection refused"));
            }

            self.probe.opened.fetch_add(1, Ordering::SeqCst);
            Ok(MockConnection {
                id: attempt,
                probe: Arc::clone(&self.probe),
                faults: self.faults.clone(),
            })
        })
    }
}

struct MockConnection {
    id: usize,
    probe: Arc<Probe>,
    faults: Faults,
}

/// Each parameter set carries its task index as the second parameter.
fn task_index(params: &[ParamValue]) -> usize {
    match params.get(1) {
        Some(ParamValue::Int(i)) => *i as usize,
        other => panic!("missing task index: {:?}", other),
    }
}

impl Connection for MockConnection {
    fn query<'a>(
        &'a self,
        _sql: &'a str,
        params: &'a [ParamValue],
    ) -> BoxFuture<'a, DispatchResult<QueryOutput>> {
        Box::pin(async move {
            let index = task_index(params);
            let now = self.probe.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.probe.peak.fetch_max(now, Ordering::SeqCst);
            self.probe
                .served_by
                .lock()
                .unwrap()
                .insert(index, self.id);

            tokio::time::sleep(Duration::from_millis(self.faults.latency(index))).await;
            self.probe.active.fetch_sub(1, Ordering::SeqCst);
            self.probe.finished.lock().unwrap().push(index);

            if self.faults.panicking_task == Some(index) {
                panic!("query {} blew up", index);
            }
            if self.faults.failing_tasks.contains(&index) {
                return Err(DispatchError::query(format!(
                    "relation \"items_{}\" does not exist",
                    index
                )));
            }

            let mut row = Row::new();
            row.insert("id".to_string(), json!(index));
            row.insert("distance".to_string(), json!(0.5));
            Ok(QueryOutput::new(
                vec!["id".to_string(), "distance".to_string()],
                vec![row],
            ))
        })
    }

    fn batch_execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, DispatchResult<()>> {
        Box::pin(async move {
            if self.faults.reject_session {
                return Err(DispatchError::query(
                    "unrecognized configuration parameter \"hnsw.ef_search\"",
                ));
            }
            self.probe
                .session_statements
                .lock()
                .unwrap()
                .push(sql.to_string());
            Ok(())
        })
    }

    fn close(self) -> BoxFuture<'static, DispatchResult<()>> {
        Box::pin(async move {
            self.probe.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

fn param_sets(n: usize) -> Vec<ParameterSet> {
    (0..n)
        .map(|i| {
            vec![
                ParamValue::vector(vec![i as f32, 1.0, 0.0]),
                ParamValue::Int(i as i64),
            ]
        })
        .collect()
}

fn request(n: usize, max_concurrency: usize) -> DispatchRequest {
    DispatchRequest::builder()
        .sql(SEARCH_SQL)
        .param_sets(param_sets(n))
        .max_concurrency(max_concurrency)
        .build()
}

#[tokio::test]
async fn test_results_follow_input_order() {
    let connector = MockConnector::default();
    let dispatcher = ParallelDispatcher::new(connector.clone());

    let results = dispatcher.execute(&request(12, 4)).await.unwrap();

    assert_eq!(results.len(), 12);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.index, i);
        assert!(result.success);
        assert_eq!(result.fields, vec!["id", "distance"]);
        assert_eq!(result.data[0]["id"], json!(i));
    }
}

#[tokio::test]
async fn test_concurrency_never_exceeds_limit() {
    let connector = MockConnector::default();
    let dispatcher = ParallelDispatcher::new(connector.clone());

    let (results, stats) = dispatcher
        .execute_with_stats(&request(20, 3))
        .await
        .unwrap();

    assert_eq!(results.len(), 20);
    assert!(connector.probe.peak() <= 3);
    assert!(stats.max_concurrent >= 1 && stats.max_concurrent <= 3);
    assert_eq!(stats.pool_size, 3);
    assert_eq!(stats.total_tasks, 20);
    assert_eq!(stats.successful, 20);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn test_freed_slot_admits_next_task_immediately() {
    let connector = MockConnector::with_faults(Faults {
        latencies: [(0, 500)].into_iter().collect(),
        default_latency: Some(20),
        ..Faults::default()
    });
    let dispatcher = ParallelDispatcher::new(connector.clone());

    let start = Instant::now();
    let results = dispatcher.execute(&request(11, 2)).await.unwrap();
    let elapsed = start.elapsed();

    assert!(results.iter().all(|r| r.success));
    // Tasks 1..=10 share the second slot while task 0 holds the first.
    let finished = connector.probe.finished.lock().unwrap().clone();
    assert_eq!(finished.last(), Some(&0));
    assert_eq!(finished.len(), 11);
    assert!(elapsed < Duration::from_millis(700), "took {:?}", elapsed);
}

#[tokio::test]
async fn test_timed_out_call_still_closes_connections() {
    let connector = MockConnector::with_faults(Faults {
        default_latency: Some(300),
        ..Faults::default()
    });
    let dispatcher = ParallelDispatcher::new(connector.clone());
    let request = request(4, 2);

    let outcome =
        tokio::time::timeout(Duration::from_millis(100), dispatcher.execute(&request)).await;
    assert!(outcome.is_err());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(connector.probe.opened(), 2);
    assert_eq!(connector.probe.closed(), 2);
    assert!(connector.probe.finished.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_pool_size_is_clamped_to_task_count() {
    let connector = MockConnector::default();
    let dispatcher = ParallelDispatcher::new(connector.clone());

    let results = dispatcher.execute(&request(2, 10)).await.unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(connector.probe.opened(), 2);
    assert_eq!(connector.probe.closed(), 2);
}

#[tokio::test]
async fn test_default_concurrency_opens_four_connections() {
    let connector = MockConnector::default();
    let dispatcher = ParallelDispatcher::new(connector.clone());
    let request = DispatchRequest::new(SEARCH_SQL, param_sets(9));

    dispatcher.execute(&request).await.unwrap();

    assert_eq!(connector.probe.opened(), 4);
}

#[tokio::test]
async fn test_failures_are_isolated() {
    let connector = MockConnector::with_faults(Faults {
        failing_tasks: [1, 4].into_iter().collect(),
        ..Faults::default()
    });
    let dispatcher = ParallelDispatcher::new(connector.clone());

    let (results, stats) = dispatcher
        .execute_with_stats(&request(6, 2))
        .await
        .unwrap();

    assert_eq!(stats.successful, 4);
    assert_eq!(stats.failed, 2);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.index, i);
        if i == 1 || i == 4 {
            assert!(!result.success);
            assert!(result.fields.is_empty());
            assert!(result.data.is_empty());
            assert_eq!(
                result.error.as_deref(),
                Some(format!("relation \"items_{}\" does not exist", i).as_str())
            );
        } else {
            assert!(result.success);
            assert_eq!(result.error, None);
        }
    }
    assert_eq!(connector.probe.closed(), 2);
}

#[tokio::test]
async fn test_all_failures_still_resolve() {
    let connector = MockConnector::with_faults(Faults {
        failing_tasks: (0..5).collect(),
        ..Faults::default()
    });
    let dispatcher = ParallelDispatcher::new(connector.clone());

    let results = dispatcher.execute(&request(5, 2)).await.unwrap();

    assert!(results.iter().all(|r| !r.success));
    assert_eq!(connector.probe.closed(), connector.probe.opened());
}

#[tokio::test]
async fn test_connections_closed_once_after_success() {
    let connector = MockConnector::default();
    let dispatcher = ParallelDispatcher::new(connector.clone());

    dispatcher.execute(&request(8, 3)).await.unwrap();

    assert_eq!(connector.probe.opened(), 3);
    assert_eq!(connector.probe.closed(), 3);
}

#[tokio::test]
async fn test_refused_connection_closes_the_rest() {
    let connector = MockConnector::with_faults(Faults {
        refuse_connect: Some(1),
        ..Faults::default()
    });
    let dispatcher = ParallelDispatcher::new(connector.clone());

    let err = dispatcher.execute(&request(8, 4)).await.unwrap_err();

    assert!(err.is_connection_error());
    assert_eq!(err.message(), "connection refused");
    assert_eq!(connector.probe.opened(), 3);
    assert_eq!(connector.probe.closed(), 3);
    assert!(connector.probe.served_by.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_rejected_session_settings_close_every_connection() {
    let connector = MockConnector::with_faults(Faults {
        reject_session: true,
        ..Faults::default()
    });
    let dispatcher = ParallelDispatcher::new(connector.clone());
    let request = DispatchRequest::builder()
        .sql(SEARCH_SQL)
        .param_sets(param_sets(4))
        .session_option("hnsw.ef_search", 40)
        .max_concurrency(2)
        .build();

    let err = dispatcher.execute(&request).await.unwrap_err();

    assert!(err.is_connection_error());
    assert!(err.message().contains("hnsw.ef_search"));
    assert_eq!(connector.probe.opened(), 2);
    assert_eq!(connector.probe.closed(), 2);
    assert!(connector.probe.served_by.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_panicking_task_still_closes_pool() {
    let connector = MockConnector::with_faults(Faults {
        panicking_task: Some(2),
        ..Faults::default()
    });
    let dispatcher = ParallelDispatcher::new(connector.clone());
    let request = request(5, 2);

    let outcome = AssertUnwindSafe(dispatcher.execute(&request))
        .catch_unwind()
        .await;

    assert!(outcome.is_err());
    assert_eq!(connector.probe.opened(), 2);
    assert_eq!(connector.probe.closed(), 2);
}

#[tokio::test]
async fn test_session_settings_applied_to_every_connection() {
    let connector = MockConnector::default();
    let dispatcher = ParallelDispatcher::new(connector.clone());
    let session: SessionOptions = [("hnsw.ef_search", 40)].into_iter().collect();
    let request = DispatchRequest::builder()
        .sql(SEARCH_SQL)
        .param_sets(param_sets(6))
        .session(session.with("enable_seqscan", false))
        .max_concurrency(3)
        .build();

    dispatcher.execute(&request).await.unwrap();

    let statements = connector.probe.session_statements.lock().unwrap().clone();
    assert_eq!(
        statements,
        vec!["set hnsw.ef_search=40; set enable_seqscan=false;".to_string(); 3]
    );
}

#[tokio::test]
async fn test_no_session_statement_without_settings() {
    let connector = MockConnector::default();
    let dispatcher = ParallelDispatcher::new(connector.clone());

    dispatcher.execute(&request(3, 3)).await.unwrap();

    assert!(connector.probe.session_statements.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_first_round_uses_distinct_connections() {
    let connector = MockConnector::default();
    let dispatcher = ParallelDispatcher::new(connector.clone());

    dispatcher.execute(&request(4, 4)).await.unwrap();

    let served_by = connector.probe.served_by.lock().unwrap();
    let distinct: HashSet<usize> = served_by.values().copied().collect();
    assert_eq!(distinct.len(), 4);
}

#[tokio::test]
async fn test_round_robin_spreads_tasks_evenly() {
    let connector = MockConnector::default();
    let dispatcher = ParallelDispatcher::new(connector.clone());

    dispatcher.execute(&request(6, 2)).await.unwrap();

    let served_by = connector.probe.served_by.lock().unwrap();
    let mut per_connection: HashMap<usize, usize> = HashMap::new();
    for conn in served_by.values() {
        *per_connection.entry(*conn).or_default() += 1;
    }
    assert_eq!(per_connection.len(), 2);
    assert!(per_connection.values().all(|&n| n == 3));
}

#[tokio::test]
async fn test_invalid_templates_open_no_connections() {
    let cases = [
        ("UPDATE items SET embedding = $1", "must be a SELECT statement"),
        (
            "SELECT id FROM items ORDER BY embedding <-> $1; SELECT 1",
            "found 2",
        ),
        (
            "SELECT id FROM items",
            "must contain vector operator <->, <=>, <+>, <~>, <%> or <#>",
        ),
    ];

    for (sql, expected) in cases {
        let connector = MockConnector::default();
        let dispatcher = ParallelDispatcher::new(connector.clone());
        let request = DispatchRequest::new(sql, param_sets(3));

        let err = dispatcher.execute(&request).await.unwrap_err();

        assert!(err.is_validation_error(), "{}", sql);
        assert!(err.to_string().contains(expected), "{}: {}", sql, err);
        assert_eq!(connector.probe.attempts.load(Ordering::SeqCst), 0);
    }
}

#[tokio::test]
async fn test_empty_param_sets_open_no_connections() {
    let connector = MockConnector::default();
    let dispatcher = ParallelDispatcher::new(connector.clone());

    let err = dispatcher
        .execute(&DispatchRequest::new(SEARCH_SQL, Vec::new()))
        .await
        .unwrap_err();

    assert!(err.is_config_error());
    assert_eq!(connector.probe.attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_zero_concurrency_opens_no_connections() {
    let connector = MockConnector::default();
    let dispatcher = ParallelDispatcher::new(connector.clone());

    let err = dispatcher.execute(&request(3, 0)).await.unwrap_err();

    assert!(err.is_config_error());
    assert_eq!(connector.probe.attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_results_serialize_like_task_records() {
    let connector = MockConnector::with_faults(Faults {
        failing_tasks: [1].into_iter().collect(),
        ..Faults::default()
    });
    let dispatcher = ParallelDispatcher::new(connector);

    let results = dispatcher.execute(&request(2, 2)).await.unwrap();
    let value = serde_json::to_value(&results).unwrap();

    assert_eq!(
        value,
        json!([
            {
                "success": true,
                "fields": ["id", "distance"],
                "data": [{ "id": 0, "distance": 0.5 }],
                "index": 0
            },
            {
                "success": false,
                "fields": [],
                "data": [],
                "error": "relation \"items_1\" does not exist",
                "index": 1
            }
        ])
    );
}
