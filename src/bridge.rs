use std::future::Future;
use std::time::Duration;

use tokio::runtime::Runtime;
use tracing::debug;

use crate::error::DbError;
use crate::pool::Pool;
use crate::session::{ExecOutcome, Session};
use crate::transaction::Transaction;
use crate::value::{Row, Value};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Blocking facade over a [`Pool`] for callers without an async runtime.
///
/// The bridge owns its scheduler outright: a `tokio` runtime passed in at
/// construction, used for nothing else, and torn down by [`SyncBridge::close`].
/// Every operation submits the corresponding async operation to that runtime
/// and blocks the calling thread until it completes.
///
/// With a `wait` bound configured, a call that exceeds it returns
/// [`DbError::Timeout`]; the underlying operation is abandoned but keeps
/// running on the bridge runtime, so its connection is still released when
/// it completes.
pub struct SyncBridge {
    runtime: Option<Runtime>,
    session: Session,
    wait: Option<Duration>,
}

impl SyncBridge {
    /// Build a bridge around an explicitly owned runtime. The runtime must
    /// have timers enabled when a `wait` bound is used.
    pub fn new(runtime: Runtime, pool: Pool) -> Self {
        Self {
            runtime: Some(runtime),
            session: Session::new(pool),
            wait: None,
        }
    }

    /// Convenience constructor owning a private single-worker runtime.
    pub fn for_pool(pool: Pool) -> Result<Self, DbError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .map_err(|e| DbError::Driver(Box::new(e)))?;
        Ok(Self::new(runtime, pool))
    }

    /// Bound every subsequent call to `wait`. `None` blocks indefinitely.
    pub fn wait(mut self, wait: Option<Duration>) -> Self {
        self.wait = wait;
        self
    }

    pub fn pool(&self) -> &Pool {
        self.session.pool()
    }

    fn run<T, F>(&self, fut: F) -> Result<T, DbError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, DbError>> + Send + 'static,
    {
        let runtime = self
            .runtime
            .as_ref()
            .expect("BUG: SyncBridge used after close");
        match self.wait {
            None => runtime.block_on(fut),
            Some(bound) => {
                // Spawn instead of racing the future directly: on timeout the
                // task keeps running to completion, releasing its connection.
                let task = runtime.spawn(fut);
                match runtime.block_on(async { tokio::time::timeout(bound, task).await }) {
                    Ok(Ok(result)) => result,
                    Ok(Err(join)) => Err(DbError::Driver(Box::new(join))),
                    Err(_) => Err(DbError::Timeout(bound)),
                }
            }
        }
    }

    pub fn fetch_one(&self, stmt: &str, params: &[Value]) -> Result<Option<Row>, DbError> {
        let session = self.session.clone();
        let stmt = stmt.to_owned();
        let params = params.to_vec();
        self.run(async move { session.fetch_one(&stmt, &params).await })
    }

    pub fn fetch_all(&self, stmt: &str, params: &[Value]) -> Result<Vec<Row>, DbError> {
        let session = self.session.clone();
        let stmt = stmt.to_owned();
        let params = params.to_vec();
        self.run(async move { session.fetch_all(&stmt, &params).await })
    }

    pub fn fetch_many(&self, stmt: &str, params: &[Value], n: usize) -> Result<Vec<Row>, DbError> {
        let session = self.session.clone();
        let stmt = stmt.to_owned();
        let params = params.to_vec();
        self.run(async move { session.fetch_many(&stmt, &params, n).await })
    }

    pub fn execute_insert(&self, stmt: &str, params: &[Value]) -> Result<ExecOutcome, DbError> {
        let session = self.session.clone();
        let stmt = stmt.to_owned();
        let params = params.to_vec();
        self.run(async move { session.execute_insert(&stmt, &params).await })
    }

    pub fn execute_mutation(&self, stmt: &str, params: &[Value]) -> Result<ExecOutcome, DbError> {
        let session = self.session.clone();
        let stmt = stmt.to_owned();
        let params = params.to_vec();
        self.run(async move { session.execute_mutation(&stmt, &params).await })
    }

    pub fn execute(&self, stmt: &str, params: &[Value]) -> Result<ExecOutcome, DbError> {
        let session = self.session.clone();
        let stmt = stmt.to_owned();
        let params = params.to_vec();
        self.run(async move { session.execute(&stmt, &params).await })
    }

    pub fn ping(&self) -> bool {
        let pool = self.session.pool().clone();
        self.run(async move { Ok(pool.ping().await) }).unwrap_or(false)
    }

    pub fn begin(&self) -> Result<SyncTransaction<'_>, DbError> {
        let session = self.session.clone();
        let tx = self.run(async move { session.begin().await })?;
        Ok(SyncTransaction {
            bridge: self,
            tx: Some(tx),
        })
    }

    /// Shut the owned runtime down, draining outstanding work within a
    /// grace period.
    pub fn close(mut self) {
        if let Some(runtime) = self.runtime.take() {
            debug!("sync bridge shutting down");
            runtime.shutdown_timeout(SHUTDOWN_GRACE);
        }
    }
}

impl Drop for SyncBridge {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Blocking counterpart of [`Transaction`], bound to the bridge that begun
/// it. If a bounded call times out, the transaction travels with the
/// abandoned task and is rolled back when it finishes; the handle is then
/// terminal.
pub struct SyncTransaction<'a> {
    bridge: &'a SyncBridge,
    tx: Option<Transaction>,
}

impl SyncTransaction<'_> {
    fn take(&mut self) -> Result<Transaction, DbError> {
        self.tx.take().ok_or(DbError::InvalidTransactionState(
            "transaction no longer held by this bridge",
        ))
    }

    pub fn fetch_one(&mut self, stmt: &str, params: &[Value]) -> Result<Option<Row>, DbError> {
        let mut tx = self.take()?;
        let stmt = stmt.to_owned();
        let params = params.to_vec();
        let (tx, result) = self.bridge.run(async move {
            let result = tx.fetch_one(&stmt, &params).await;
            Ok((tx, result))
        })?;
        self.tx = Some(tx);
        result
    }

    pub fn fetch_all(&mut self, stmt: &str, params: &[Value]) -> Result<Vec<Row>, DbError> {
        let mut tx = self.take()?;
        let stmt = stmt.to_owned();
        let params = params.to_vec();
        let (tx, result) = self.bridge.run(async move {
            let result = tx.fetch_all(&stmt, &params).await;
            Ok((tx, result))
        })?;
        self.tx = Some(tx);
        result
    }

    pub fn execute_insert(&mut self, stmt: &str, params: &[Value]) -> Result<ExecOutcome, DbError> {
        let mut tx = self.take()?;
        let stmt = stmt.to_owned();
        let params = params.to_vec();
        let (tx, result) = self.bridge.run(async move {
            let result = tx.execute_insert(&stmt, &params).await;
            Ok((tx, result))
        })?;
        self.tx = Some(tx);
        result
    }

    pub fn execute_mutation(
        &mut self,
        stmt: &str,
        params: &[Value],
    ) -> Result<ExecOutcome, DbError> {
        let mut tx = self.take()?;
        let stmt = stmt.to_owned();
        let params = params.to_vec();
        let (tx, result) = self.bridge.run(async move {
            let result = tx.execute_mutation(&stmt, &params).await;
            Ok((tx, result))
        })?;
        self.tx = Some(tx);
        result
    }

    pub fn commit(mut self) -> Result<(), DbError> {
        let mut tx = self.take()?;
        self.bridge.run(async move { tx.commit().await })
    }

    pub fn rollback(mut self) -> Result<(), DbError> {
        let mut tx = self.take()?;
        self.bridge.run(async move { tx.rollback().await })
    }
}

impl Drop for SyncTransaction<'_> {
    fn drop(&mut self) {
        if let (Some(mut tx), Some(runtime)) = (self.tx.take(), self.bridge.runtime.as_ref()) {
            runtime.spawn(async move {
                let _ = tx.rollback().await;
            });
        }
    }
}
