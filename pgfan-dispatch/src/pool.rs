//! A fixed set of connections owned by a single dispatch call.
//!
//! Unlike a general-purpose pool there is no resizing, health checking or
//! recycling: the pool opens exactly `size` connections up front, hands them
//! out round-robin, and closes all of them when the call ends.

use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::error::{DispatchError, DispatchResult};
use crate::session::{SessionOptions, build_set_statements};
use crate::traits::{Connection, Connector};

/// A connection handed out by [`ConnectionPool::checkout`].
///
/// Only a borrow: the pool keeps ownership and does not track use, so the
/// same connection may serve several tasks over the pool's lifetime.
pub struct PooledConnection<'a, C> {
    slot: usize,
    conn: &'a C,
}

impl<'a, C: Connection> PooledConnection<'a, C> {
    /// The connection's position in the pool.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// The underlying connection.
    pub fn connection(&self) -> &'a C {
        self.conn
    }
}

impl<C> std::ops::Deref for PooledConnection<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.conn
    }
}

/// Round-robin pool over a fixed set of open connections.
pub struct ConnectionPool<C: Connection> {
    connections: Vec<C>,
    cursor: Mutex<usize>,
}

impl<C: Connection> ConnectionPool<C> {
    /// Open `size` connections and apply `session` to each.
    ///
    /// Connections are opened concurrently. If any connect or session
    /// statement fails, every connection that did open is closed before the
    /// first failure is returned.
    pub async fn open<K>(
        connector: &K,
        size: usize,
        session: Option<&SessionOptions>,
    ) -> DispatchResult<Self>
    where
        K: Connector<Connection = C> + ?Sized,
    {
        if size == 0 {
            return Err(DispatchError::config("pool size must be greater than 0"));
        }

        let set_statements = build_set_statements(session);
        let set_statements = set_statements.as_deref();

        let mut pool = Self {
            connections: Vec::with_capacity(size),
            cursor: Mutex::new(0),
        };

        // Opened connections go into the pool as they arrive, so they are
        // closed by the drop guard if this future is cancelled.
        let mut attempts: FuturesUnordered<_> = (0..size)
            .map(|slot| async move {
                let conn = connector
                    .connect()
                    .await
                    .map_err(|e| DispatchError::connection(e.message()))?;

                if let Some(sql) = set_statements {
                    debug!(slot, sql = %sql, "Applying session settings");
                    if let Err(e) = conn.batch_execute(sql).await {
                        close_quietly(slot, conn).await;
                        return Err(DispatchError::connection(format!(
                            "failed to apply session settings: {}",
                            e.message()
                        )));
                    }
                }

                Ok(conn)
            })
            .collect();

        let mut first_error = None;
        while let Some(attempt) = attempts.next().await {
            match attempt {
                Ok(conn) => pool.connections.push(conn),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(err) = first_error {
            warn!(
                opened = pool.size(),
                requested = size,
                error = %err,
                "Connection pool build failed"
            );
            pool.close().await;
            return Err(err);
        }

        info!(size, "Connection pool opened");
        Ok(pool)
    }

    /// Build a pool from connections that are already open.
    pub fn from_connections(connections: Vec<C>) -> Self {
        Self {
            connections,
            cursor: Mutex::new(0),
        }
    }

    /// Hand out the next connection in round-robin order.
    ///
    /// # Panics
    ///
    /// Panics if the pool is empty (never the case between a successful
    /// [`open`](Self::open) and [`close`](Self::close)).
    pub fn checkout(&self) -> PooledConnection<'_, C> {
        let slot = {
            let mut cursor = self.cursor.lock();
            let slot = *cursor;
            *cursor = (slot + 1) % self.connections.len();
            slot
        };

        PooledConnection {
            slot,
            conn: &self.connections[slot],
        }
    }

    /// Number of open connections.
    pub fn size(&self) -> usize {
        self.connections.len()
    }

    /// Check if the pool holds no connections.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Close every connection.
    ///
    /// Close failures are logged and otherwise ignored. Calling this again,
    /// or on an empty pool, does nothing.
    pub async fn close(&mut self) {
        if self.connections.is_empty() {
            return;
        }

        let connections = std::mem::take(&mut self.connections);
        let count = connections.len();
        join_all(
            connections
                .into_iter()
                .enumerate()
                .map(|(slot, conn)| close_quietly(slot, conn)),
        )
        .await;
        *self.cursor.lock() = 0;

        info!(closed = count, "Connection pool closed");
    }
}

impl<C: Connection> Drop for ConnectionPool<C> {
    /// Close whatever is still open when the pool is dropped without
    /// [`close`](Self::close), e.g. when a dispatch call is cancelled.
    ///
    /// Closing is spawned onto the current Tokio runtime. Outside a runtime
    /// the connections are dropped without being closed.
    fn drop(&mut self) {
        if self.connections.is_empty() {
            return;
        }

        let connections = std::mem::take(&mut self.connections);
        let count = connections.len();
        match Handle::try_current() {
            Ok(handle) => {
                warn!(count, "Connection pool dropped while open, closing in background");
                handle.spawn(async move {
                    join_all(
                        connections
                            .into_iter()
                            .enumerate()
                            .map(|(slot, conn)| close_quietly(slot, conn)),
                    )
                    .await;
                });
            }
            Err(_) => {
                warn!(count, "Connection pool dropped outside a runtime, connections not closed");
            }
        }
    }
}

async fn close_quietly<C: Connection>(slot: usize, conn: C) {
    if let Err(e) = conn.close().await {
        warn!(slot, error = %e, "Ignoring error while closing connection");
    }
}
