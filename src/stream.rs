use std::collections::VecDeque;

use tracing::debug;

use crate::driver::Connection;
use crate::error::DbError;
use crate::pool::PooledConn;
use crate::value::Row;

/// Forward-only row stream over a single held connection.
///
/// Rows arrive from the driver `batch_size` at a time and are yielded one by
/// one, so a result set of any size is consumed in bounded memory. A batch
/// shorter than `batch_size` marks the end of the result set; the connection
/// is released the moment exhaustion is known and the buffer drains.
/// Dropping the stream early releases the connection as well — abandonment
/// can never leak a checkout.
///
/// Not restartable: iterate again by opening a fresh stream.
pub struct RowStream {
    conn: Option<PooledConn>,
    buffer: VecDeque<Row>,
    batch_size: usize,
    exhausted: bool,
    yielded: u64,
}

impl RowStream {
    pub(crate) fn new(conn: PooledConn, batch_size: usize) -> Self {
        Self {
            conn: Some(conn),
            buffer: VecDeque::with_capacity(batch_size),
            batch_size,
            exhausted: false,
            yielded: 0,
        }
    }

    /// Next row, or `None` once the result set is exhausted.
    pub async fn next(&mut self) -> Result<Option<Row>, DbError> {
        loop {
            if let Some(row) = self.buffer.pop_front() {
                self.yielded += 1;
                if self.exhausted && self.buffer.is_empty() {
                    self.release().await;
                }
                return Ok(Some(row));
            }
            if self.exhausted {
                self.release().await;
                return Ok(None);
            }
            let conn = match self.conn.as_mut() {
                Some(conn) => conn,
                None => return Ok(None),
            };
            match conn.fetch_batch(self.batch_size).await {
                Ok(batch) => {
                    if batch.len() < self.batch_size {
                        self.exhausted = true;
                    }
                    self.buffer.extend(batch);
                }
                Err(e) => {
                    self.exhausted = true;
                    if let Some(mut conn) = self.conn.take() {
                        if e.is_transient() {
                            conn.poison();
                        }
                        conn.release().await;
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Rows yielded so far.
    pub fn count(&self) -> u64 {
        self.yielded
    }

    async fn release(&mut self) {
        if let Some(conn) = self.conn.take() {
            debug!(rows = self.yielded, "row stream exhausted");
            conn.release().await;
        }
    }
}

// No Drop impl needed: dropping the inner PooledConn returns the connection
// to the pool, and the pool resets any cursor it still carries.
