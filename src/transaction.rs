use tracing::{debug, warn};

use crate::driver::Connection;
use crate::error::DbError;
use crate::pool::PooledConn;
use crate::session::ExecOutcome;
use crate::value::{Row, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Active,
    Committed,
    RolledBack,
}

/// An in-progress transaction bound to one held connection.
///
/// The connection leaves the pool's available set at `begin` and returns on
/// `commit` or `rollback` — on every path, including when the terminal
/// statement itself fails. After either call the handle is terminal and all
/// further operations fail with [`DbError::InvalidTransactionState`].
///
/// Statements inside a transaction are never retried: a stale connection
/// means the server already discarded the transaction's state, and silently
/// re-running the statement on a fresh session would commit only a fragment
/// of the caller's intent.
///
/// Dropping an active handle rolls back in a background task.
pub struct Transaction {
    conn: Option<PooledConn>,
    state: TxState,
}

impl Transaction {
    pub(crate) fn new(conn: PooledConn) -> Self {
        Self {
            conn: Some(conn),
            state: TxState::Active,
        }
    }

    fn conn_mut(&mut self) -> Result<&mut PooledConn, DbError> {
        match self.state {
            TxState::Active => Ok(self
                .conn
                .as_mut()
                .expect("BUG: active transaction without a connection")),
            TxState::Committed => Err(DbError::InvalidTransactionState(
                "transaction already committed",
            )),
            TxState::RolledBack => Err(DbError::InvalidTransactionState(
                "transaction already rolled back",
            )),
        }
    }

    pub async fn fetch_one(
        &mut self,
        stmt: &str,
        params: &[Value],
    ) -> Result<Option<Row>, DbError> {
        let mut rows = self.fetch_many(stmt, params, 1).await?;
        Ok(rows.pop())
    }

    pub async fn fetch_all(&mut self, stmt: &str, params: &[Value]) -> Result<Vec<Row>, DbError> {
        self.conn_mut()?.query(stmt, params).await
    }

    pub async fn fetch_many(
        &mut self,
        stmt: &str,
        params: &[Value],
        n: usize,
    ) -> Result<Vec<Row>, DbError> {
        let conn = self.conn_mut()?;
        conn.start(stmt, params).await?;
        let rows = conn.fetch_batch(n).await;
        // Drop the remainder so the next statement starts clean.
        let _ = conn.reset().await;
        rows
    }

    pub async fn execute_insert(
        &mut self,
        stmt: &str,
        params: &[Value],
    ) -> Result<ExecOutcome, DbError> {
        let conn = self.conn_mut()?;
        conn.execute(stmt, params).await?;
        conn.last_insert_id().await.map(ExecOutcome::LastInsertId)
    }

    pub async fn execute_mutation(
        &mut self,
        stmt: &str,
        params: &[Value],
    ) -> Result<ExecOutcome, DbError> {
        let affected = self.conn_mut()?.execute(stmt, params).await?;
        Ok(ExecOutcome::AffectedRows(affected))
    }

    pub async fn last_insert_id(&mut self) -> Result<u64, DbError> {
        self.conn_mut()?.last_insert_id().await
    }

    /// Commit and release the connection. Terminal even on failure.
    pub async fn commit(&mut self) -> Result<(), DbError> {
        let mut conn = self.take_conn(TxState::Committed)?;
        let result = conn.commit().await;
        if result.is_err() {
            conn.poison();
        }
        conn.release().await;
        debug!(ok = result.is_ok(), "transaction commit");
        result
    }

    /// Roll back and release the connection. Terminal even on failure.
    pub async fn rollback(&mut self) -> Result<(), DbError> {
        let mut conn = self.take_conn(TxState::RolledBack)?;
        let result = conn.rollback().await;
        if result.is_err() {
            conn.poison();
        }
        conn.release().await;
        debug!(ok = result.is_ok(), "transaction rollback");
        result
    }

    fn take_conn(&mut self, next: TxState) -> Result<PooledConn, DbError> {
        self.conn_mut()?;
        self.state = next;
        Ok(self
            .conn
            .take()
            .expect("BUG: active transaction without a connection"))
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            warn!("transaction dropped without commit or rollback, rolling back");
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if conn.rollback().await.is_err() {
                        conn.poison();
                    }
                    conn.release().await;
                });
            }
            // Without a runtime the connection drops with the process.
        }
    }
}
