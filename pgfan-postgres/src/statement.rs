//! Per-connection prepared statement cache.
//!
//! A dispatch call runs the same template many times on each connection, so
//! each connection prepares it once and reuses the statement afterwards.
//! Prepared statements belong to the session that created them, which is
//! why the cache lives on the connection rather than being shared.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio_postgres::{Client, Statement};
use tracing::debug;

use crate::error::PgResult;

/// Default number of statements kept per connection.
pub const DEFAULT_CACHE_SIZE: usize = 32;

/// Prepared statements keyed by SQL text.
pub struct StatementCache {
    max_size: usize,
    statements: Mutex<HashMap<String, Statement>>,
}

impl StatementCache {
    /// Create a cache holding at most `max_size` statements.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            statements: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached statement for `sql`, preparing it on a miss.
    pub async fn get_or_prepare(&self, client: &Client, sql: &str) -> PgResult<Statement> {
        if let Some(stmt) = self.get(sql) {
            debug!(sql = %sql, "Using cached prepared statement");
            return Ok(stmt);
        }

        debug!(sql = %sql, "Preparing new statement");
        let stmt = client.prepare(sql).await?;
        self.insert(sql, stmt.clone());
        Ok(stmt)
    }

    /// Look up a cached statement.
    pub fn get(&self, sql: &str) -> Option<Statement> {
        self.statements.lock().get(sql).cloned()
    }

    fn insert(&self, sql: &str, stmt: Statement) {
        let mut statements = self.statements.lock();
        if statements.len() >= self.max_size && !statements.contains_key(sql) {
            // Simple eviction: drop half the entries.
            let to_remove: Vec<_> = statements
                .keys()
                .take(statements.len() / 2 + 1)
                .cloned()
                .collect();
            for key in to_remove {
                statements.remove(&key);
            }
        }
        statements.insert(sql.to_string(), stmt);
    }

    /// Number of cached statements.
    pub fn len(&self) -> usize {
        self.statements.lock().len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of cached statements.
    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

impl Default for StatementCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_creation() {
        let cache = StatementCache::new(16);
        assert_eq!(cache.max_size(), 16);
        assert!(cache.is_empty());
        assert!(cache.get("SELECT 1").is_none());
    }

    #[test]
    fn test_zero_size_is_raised_to_one() {
        assert_eq!(StatementCache::new(0).max_size(), 1);
    }
}
