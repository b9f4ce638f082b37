//! The connection capability the dispatcher is written against.
//!
//! The dispatcher never talks to a database directly. A [`Connector`] knows
//! how to open connections (it carries the database configuration) and each
//! [`Connection`] runs queries until it is closed.

use std::future::Future;
use std::pin::Pin;

use crate::error::DispatchResult;
use crate::types::{ParamValue, QueryOutput};

/// A boxed future for async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A live database connection.
pub trait Connection: Send + Sync + 'static {
    /// Run `sql` with `params` bound and return its columns and rows.
    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [ParamValue],
    ) -> BoxFuture<'a, DispatchResult<QueryOutput>>;

    /// Run one or more `;`-separated statements without parameters.
    fn batch_execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, DispatchResult<()>>;

    /// Close the connection.
    fn close(self) -> BoxFuture<'static, DispatchResult<()>>
    where
        Self: Sized;
}

/// Opens connections to one database.
pub trait Connector: Send + Sync {
    /// The connection type produced.
    type Connection: Connection;

    /// Open a new connection.
    fn connect(&self) -> BoxFuture<'_, DispatchResult<Self::Connection>>;
}

impl<C: Connector + ?Sized> Connector for std::sync::Arc<C> {
    type Connection = C::Connection;

    fn connect(&self) -> BoxFuture<'_, DispatchResult<Self::Connection>> {
        (**self).connect()
    }
}

impl<C: Connector + ?Sized> Connector for &C {
    type Connection = C::Connection;

    fn connect(&self) -> BoxFuture<'_, DispatchResult<Self::Connection>> {
        (**self).connect()
    }
}
