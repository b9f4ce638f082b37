//! # pgfan-dispatch
//!
//! Fans one vector similarity search template out over many query vectors.
//!
//! Given a `SELECT ... ORDER BY embedding <-> $1` template and a list of
//! parameter sets, [`ParallelDispatcher`] opens a fixed set of connections,
//! runs up to `max_concurrency` queries at a time, and returns one
//! [`TaskResult`] per parameter set in input order. A failing query is
//! reported in its own result and does not stop the others.
//!
//! This crate is database-agnostic: it talks to the database through the
//! [`Connector`] and [`Connection`] traits. `pgfan-postgres` provides the
//! PostgreSQL/pgvector implementation.
//!
//! ## Example
//!
//! ```rust,ignore
//! use pgfan_dispatch::prelude::*;
//!
//! let request = DispatchRequest::builder()
//!     .sql("SELECT id, embedding <=> $1 AS distance FROM items ORDER BY distance LIMIT 10")
//!     .param_sets(query_vectors.into_iter().map(|v| vec![ParamValue::vector(v)]))
//!     .session_option("hnsw.ef_search", 100)
//!     .max_concurrency(8)
//!     .build();
//!
//! let results = ParallelDispatcher::new(connector).execute(&request).await?;
//! for result in results {
//!     println!("{}: {} rows", result.index, result.row_count());
//! }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod pool;
pub mod session;
pub mod traits;
pub mod types;
pub mod validation;

pub use config::DispatchOptions;
pub use dispatcher::{
    DispatchPhase, DispatchRequest, DispatchRequestBuilder, DispatchStats, ParallelDispatcher,
};
pub use error::{DispatchError, DispatchResult, ValidationError};
pub use pool::{ConnectionPool, PooledConnection};
pub use session::{SessionOptions, SessionValue, build_set_statements};
pub use traits::{BoxFuture, Connection, Connector};
pub use types::{DistanceOperator, ParamValue, ParameterSet, QueryOutput, Row, TaskResult};
pub use validation::validate_sql_template;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::DispatchOptions;
    pub use crate::dispatcher::{DispatchRequest, DispatchStats, ParallelDispatcher};
    pub use crate::error::{DispatchError, DispatchResult};
    pub use crate::session::{SessionOptions, SessionValue};
    pub use crate::traits::{Connection, Connector};
    pub use crate::types::{ParamValue, ParameterSet, TaskResult};
}
