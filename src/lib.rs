//! # pgfan
//!
//! Parallel fan-out of vector similarity searches over PostgreSQL/pgvector.
//!
//! pgfan takes one approximate-nearest-neighbour query template and many
//! query vectors, runs the searches concurrently over a fixed set of
//! connections, and returns one result per vector in input order:
//!
//! - the template is checked up front (one `SELECT`, with a vector distance
//!   operator such as `<->`, `<=>` or `<#>`)
//! - session settings such as `hnsw.ef_search` are applied to every connection
//! - at most `max_concurrency` queries run at once
//! - a failing search is reported in its own result without stopping others
//! - connections are always closed before the call returns
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pgfan::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = DispatchOptions::new()
//!         .with_max_concurrency(8)
//!         .with_session("hnsw.ef_search", 100);
//!     let engine = PgSearchEngine::with_options(PgConfig::from_env()?, options);
//!
//!     let results = engine
//!         .search_vectors(
//!             "SELECT id FROM items ORDER BY embedding <-> $1 LIMIT 10",
//!             query_vectors,
//!         )
//!         .await?;
//!
//!     println!("{}", serde_json::to_string_pretty(&results)?);
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// The database-agnostic dispatch engine.
pub mod dispatch {
    pub use pgfan_dispatch::*;
}

/// PostgreSQL/pgvector connections.
#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub mod postgres {
    pub use pgfan_postgres::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use pgfan_dispatch::prelude::*;

    #[cfg(feature = "postgres")]
    pub use pgfan_postgres::{PgConfig, PgConnector, PgSearchEngine};
}

// Re-export key types at the crate root
pub use pgfan_dispatch::{
    DispatchError, DispatchOptions, DispatchRequest, DispatchResult, ParallelDispatcher,
    ParamValue, TaskResult,
};
