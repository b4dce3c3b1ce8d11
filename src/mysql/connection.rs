use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Params, Row as MyRow};

use crate::driver::Connection;
use crate::error::DbError;
use crate::mysql::codec;
use crate::value::{Row, Value};

/// One MySQL session, exclusively owned by its checkout.
///
/// `fetch_batch` serves from a result set buffered at `start` time: the text
/// protocol delivers the full result anyway, and buffering keeps the
/// connection free of self-referential stream state. A driver with true
/// server-side cursors can serve batches incrementally behind the same
/// trait.
pub struct MysqlConnection {
    conn: Option<Conn>,
    cursor: Option<VecDeque<Row>>,
}

impl MysqlConnection {
    pub fn new(conn: Conn) -> Self {
        Self {
            conn: Some(conn),
            cursor: None,
        }
    }

    fn conn_mut(&mut self) -> Result<&mut Conn, DbError> {
        self.conn
            .as_mut()
            .ok_or_else(|| DbError::Connection("connection already closed".into()))
    }

    fn bind(params: &[Value]) -> Params {
        if params.is_empty() {
            Params::Empty
        } else {
            Params::Positional(params.iter().map(codec::to_mysql).collect())
        }
    }

    fn convert_rows(rows: Vec<MyRow>) -> Vec<Row> {
        let mut columns: Option<Arc<[String]>> = None;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let cols = match &columns {
                Some(cols) => Arc::clone(cols),
                None => {
                    let cols: Arc<[String]> = row
                        .columns_ref()
                        .iter()
                        .map(|c| c.name_str().to_string())
                        .collect();
                    columns = Some(Arc::clone(&cols));
                    cols
                }
            };
            let values = row.unwrap().into_iter().map(codec::from_mysql).collect();
            out.push(Row::new(cols, values));
        }
        out
    }
}

#[async_trait]
impl Connection for MysqlConnection {
    async fn execute(&mut self, stmt: &str, params: &[Value]) -> Result<u64, DbError> {
        let params = Self::bind(params);
        let conn = self.conn_mut()?;
        conn.exec_drop(stmt, params).await?;
        Ok(conn.affected_rows())
    }

    async fn query(&mut self, stmt: &str, params: &[Value]) -> Result<Vec<Row>, DbError> {
        let params = Self::bind(params);
        let rows: Vec<MyRow> = self.conn_mut()?.exec(stmt, params).await?;
        Ok(Self::convert_rows(rows))
    }

    async fn start(&mut self, stmt: &str, params: &[Value]) -> Result<(), DbError> {
        let rows = self.query(stmt, params).await?;
        self.cursor = Some(rows.into());
        Ok(())
    }

    async fn fetch_batch(&mut self, n: usize) -> Result<Vec<Row>, DbError> {
        let cursor = self
            .cursor
            .as_mut()
            .ok_or_else(|| DbError::Statement("fetch without an open result set".into()))?;
        let take = n.min(cursor.len());
        Ok(cursor.drain(..take).collect())
    }

    async fn reset(&mut self) -> Result<(), DbError> {
        self.cursor = None;
        Ok(())
    }

    async fn last_insert_id(&mut self) -> Result<u64, DbError> {
        Ok(self.conn_mut()?.last_insert_id().unwrap_or(0))
    }

    async fn ping(&mut self) -> Result<(), DbError> {
        self.conn_mut()?.ping().await?;
        Ok(())
    }

    async fn begin(&mut self) -> Result<(), DbError> {
        self.conn_mut()?.query_drop("BEGIN").await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        self.conn_mut()?.query_drop("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        self.conn_mut()?.query_drop("ROLLBACK").await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DbError> {
        self.cursor = None;
        if let Some(conn) = self.conn.take() {
            conn.disconnect().await?;
        }
        Ok(())
    }
}
