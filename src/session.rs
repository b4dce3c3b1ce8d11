use std::time::Instant;

use tracing::{debug, warn};

use crate::driver::Connection;
use crate::error::DbError;
use crate::pool::{Pool, PooledConn};
use crate::stream::RowStream;
use crate::transaction::Transaction;
use crate::value::{Row, Value};

/// Result of a write statement, tagged by what the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Identifier generated for the inserted row.
    LastInsertId(u64),
    /// Number of rows the statement touched.
    AffectedRows(u64),
}

impl ExecOutcome {
    pub fn value(&self) -> u64 {
        match self {
            ExecOutcome::LastInsertId(v) | ExecOutcome::AffectedRows(v) => *v,
        }
    }
}

/// DB-API style operation surface over a [`Pool`].
///
/// Each call checks a connection out, runs the statement with bound
/// parameters, and returns the connection on every exit path. A failure the
/// driver classifies as stale is pinged and retried exactly once on the same
/// connection; statement-level failures surface immediately.
#[derive(Clone)]
pub struct Session {
    pool: Pool,
}

impl Session {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// First row of the result set, if any.
    pub async fn fetch_one(&self, stmt: &str, params: &[Value]) -> Result<Option<Row>, DbError> {
        let mut rows = self.fetch_many(stmt, params, 1).await?;
        Ok(rows.pop())
    }

    /// The complete result set.
    ///
    /// Materializes every row; for result sets that may not fit in memory
    /// use [`Session::iterate`] instead.
    pub async fn fetch_all(&self, stmt: &str, params: &[Value]) -> Result<Vec<Row>, DbError> {
        let mut conn = self.pool.acquire().await?;
        let start = Instant::now();
        let result = query_with_retry(&mut conn, stmt, params).await;
        log_fetch(stmt, start, &result);
        finish(conn, &result).await;
        result
    }

    /// Up to `n` rows; the remainder of the result set is discarded.
    pub async fn fetch_many(
        &self,
        stmt: &str,
        params: &[Value],
        n: usize,
    ) -> Result<Vec<Row>, DbError> {
        let mut conn = self.pool.acquire().await?;
        let start = Instant::now();
        let result = match start_with_retry(&mut conn, stmt, params).await {
            Ok(()) => conn.fetch_batch(n).await,
            Err(e) => Err(e),
        };
        log_fetch(stmt, start, &result);
        finish(conn, &result).await;
        result
    }

    /// Run an INSERT and report the generated identifier.
    pub async fn execute_insert(
        &self,
        stmt: &str,
        params: &[Value],
    ) -> Result<ExecOutcome, DbError> {
        let mut conn = self.pool.acquire().await?;
        let start = Instant::now();
        let result = match execute_with_retry(&mut conn, stmt, params).await {
            Ok(_affected) => conn.last_insert_id().await.map(ExecOutcome::LastInsertId),
            Err(e) => Err(e),
        };
        log_execute(stmt, start, &result);
        finish(conn, &result).await;
        result
    }

    /// Run an UPDATE/DELETE (or any non-INSERT write) and report the
    /// affected row count.
    pub async fn execute_mutation(
        &self,
        stmt: &str,
        params: &[Value],
    ) -> Result<ExecOutcome, DbError> {
        let mut conn = self.pool.acquire().await?;
        let start = Instant::now();
        let result = execute_with_retry(&mut conn, stmt, params)
            .await
            .map(ExecOutcome::AffectedRows);
        log_execute(stmt, start, &result);
        finish(conn, &result).await;
        result
    }

    /// Compatibility shim choosing between [`Session::execute_insert`] and
    /// [`Session::execute_mutation`] by the statement's leading keyword.
    ///
    /// This is a textual inspection, not SQL parsing; do not rely on it for
    /// multi-statement input. New code should call the explicit variant.
    pub async fn execute(&self, stmt: &str, params: &[Value]) -> Result<ExecOutcome, DbError> {
        if leading_keyword_is(stmt, "INSERT") {
            self.execute_insert(stmt, params).await
        } else {
            self.execute_mutation(stmt, params).await
        }
    }

    /// Open a forward-only row stream fetching `batch_size` rows per driver
    /// round trip. The connection is held until the stream is exhausted or
    /// dropped.
    pub async fn iterate(
        &self,
        stmt: &str,
        params: &[Value],
        batch_size: usize,
    ) -> Result<RowStream, DbError> {
        let batch_size = batch_size.max(1);
        let mut conn = self.pool.acquire().await?;
        match start_with_retry(&mut conn, stmt, params).await {
            Ok(()) => {
                debug!(stmt, batch_size, "streaming result set opened");
                Ok(RowStream::new(conn, batch_size))
            }
            Err(e) => {
                if e.is_transient() {
                    conn.poison();
                }
                conn.release().await;
                Err(e)
            }
        }
    }

    /// Begin a transaction on a dedicated connection. The connection does
    /// not return to the pool until the handle commits or rolls back.
    pub async fn begin(&self) -> Result<Transaction, DbError> {
        let mut conn = self.pool.acquire().await?;
        match conn.begin().await {
            Ok(()) => {
                debug!("transaction begun");
                Ok(Transaction::new(conn))
            }
            Err(e) => {
                if e.is_transient() {
                    conn.poison();
                }
                conn.release().await;
                Err(e)
            }
        }
    }
}

fn leading_keyword_is(stmt: &str, keyword: &str) -> bool {
    stmt.trim_start()
        .split_whitespace()
        .next()
        .is_some_and(|word| word.eq_ignore_ascii_case(keyword))
}

/// Release `conn`, closing it instead of recycling when the operation died
/// of a stale connection that a retry could not revive.
async fn finish<T>(mut conn: PooledConn, result: &Result<T, DbError>) {
    if let Err(e) = result
        && e.is_transient()
    {
        conn.poison();
    }
    conn.release().await;
}

fn log_fetch(stmt: &str, start: Instant, result: &Result<Vec<Row>, DbError>) {
    let elapsed_ms = start.elapsed().as_millis();
    match result {
        Ok(rows) => debug!(stmt, elapsed_ms, rows = rows.len(), "fetch"),
        Err(e) => debug!(stmt, elapsed_ms, error = %e, "fetch failed"),
    }
}

fn log_execute(stmt: &str, start: Instant, result: &Result<ExecOutcome, DbError>) {
    let elapsed_ms = start.elapsed().as_millis();
    match result {
        Ok(outcome) => debug!(stmt, elapsed_ms, outcome = ?outcome, "execute"),
        Err(e) => debug!(stmt, elapsed_ms, error = %e, "execute failed"),
    }
}

// One retry, on the same connection, only for failures the driver classified
// as a silently dropped session. A second failure of any kind propagates.

pub(crate) async fn query_with_retry(
    conn: &mut PooledConn,
    stmt: &str,
    params: &[Value],
) -> Result<Vec<Row>, DbError> {
    match conn.query(stmt, params).await {
        Err(e) if e.is_transient() => {
            warn!(stmt, error = %e, "stale connection, pinging and retrying once");
            conn.ping().await?;
            conn.query(stmt, params).await
        }
        other => other,
    }
}

pub(crate) async fn execute_with_retry(
    conn: &mut PooledConn,
    stmt: &str,
    params: &[Value],
) -> Result<u64, DbError> {
    match conn.execute(stmt, params).await {
        Err(e) if e.is_transient() => {
            warn!(stmt, error = %e, "stale connection, pinging and retrying once");
            conn.ping().await?;
            conn.execute(stmt, params).await
        }
        other => other,
    }
}

pub(crate) async fn start_with_retry(
    conn: &mut PooledConn,
    stmt: &str,
    params: &[Value],
) -> Result<(), DbError> {
    match conn.start(stmt, params).await {
        Err(e) if e.is_transient() => {
            warn!(stmt, error = %e, "stale connection, pinging and retrying once");
            conn.ping().await?;
            conn.start(stmt, params).await
        }
        other => other,
    }
}
