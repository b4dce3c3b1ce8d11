use async_trait::async_trait;

use crate::config::PoolConfig;
use crate::error::DbError;
use crate::value::{Row, Value};

/// Factory for network connections to one kind of backing store.
///
/// The pool calls `connect` lazily, one connection at a time, and owns the
/// result for its whole lifetime. A driver must map its native errors into
/// [`DbError`], classifying a server-side silent disconnect as
/// [`DbError::Stale`] so the executor knows the statement is retryable.
#[async_trait]
pub trait Driver: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&self, config: &PoolConfig) -> Result<Box<dyn Connection>, DbError>;
}

/// A single live connection, owned exclusively by whoever checked it out.
///
/// Statement parameters always travel separately from the statement text and
/// are bound through the driver's placeholder mechanism.
#[async_trait]
pub trait Connection: Send {
    /// Run a statement, returning the number of affected rows.
    async fn execute(&mut self, stmt: &str, params: &[Value]) -> Result<u64, DbError>;

    /// Run a statement and materialize its full result set.
    async fn query(&mut self, stmt: &str, params: &[Value]) -> Result<Vec<Row>, DbError>;

    /// Run a statement and leave its result set open for [`Self::fetch_batch`].
    async fn start(&mut self, stmt: &str, params: &[Value]) -> Result<(), DbError>;

    /// Pull up to `n` rows from the cursor opened by [`Self::start`].
    async fn fetch_batch(&mut self, n: usize) -> Result<Vec<Row>, DbError>;

    /// Discard any open cursor state. Called by the pool when a connection
    /// comes back, so an abandoned iteration cannot leak into the next
    /// checkout.
    async fn reset(&mut self) -> Result<(), DbError> {
        Ok(())
    }

    /// Identifier generated by the most recent INSERT on this connection.
    async fn last_insert_id(&mut self) -> Result<u64, DbError>;

    /// Liveness probe. A successful ping may re-establish the underlying
    /// session, after which a previously stale connection is usable again.
    async fn ping(&mut self) -> Result<(), DbError>;

    async fn begin(&mut self) -> Result<(), DbError>;
    async fn commit(&mut self) -> Result<(), DbError>;
    async fn rollback(&mut self) -> Result<(), DbError>;

    async fn close(&mut self) -> Result<(), DbError>;
}
