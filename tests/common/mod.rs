//! In-memory mock driver: a single shared "table" of row ids with failure
//! injection, enough to exercise pooling, retry, transactions and streaming
//! without a real server.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dbpool::config::PoolConfig;
use dbpool::driver::{Connection, Driver};
use dbpool::error::DbError;
use dbpool::value::{Row, Value, columns};
use dbpool::Pool;

#[derive(Default)]
pub struct MockServer {
    state: Mutex<ServerState>,
    /// Connections ever established.
    pub connects: AtomicUsize,
    /// Connections closed for good.
    pub closed_conns: AtomicUsize,
    /// `fetch_batch` round trips.
    pub fetch_calls: AtomicUsize,
    /// Statement attempts, including ones that failed as stale.
    pub attempts: AtomicUsize,
}

#[derive(Default)]
struct ServerState {
    rows: Vec<i64>,
    next_id: i64,
    stale_failures: usize,
    refuse_connects: bool,
    fail_pings: bool,
}

impl MockServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Append `n` fresh rows with sequential ids.
    pub fn seed(&self, n: usize) {
        let mut state = self.state.lock().unwrap();
        for _ in 0..n {
            state.next_id += 1;
            let id = state.next_id;
            state.rows.push(id);
        }
    }

    pub fn rows(&self) -> Vec<i64> {
        self.state.lock().unwrap().rows.clone()
    }

    /// The next `count` statements fail as if the server had silently
    /// closed the session.
    pub fn inject_stale(&self, count: usize) {
        self.state.lock().unwrap().stale_failures = count;
    }

    pub fn refuse_connects(&self, refuse: bool) {
        self.state.lock().unwrap().refuse_connects = refuse;
    }

    pub fn fail_pings(&self, fail: bool) {
        self.state.lock().unwrap().fail_pings = fail;
    }

    pub fn driver(self: &Arc<Self>) -> Arc<MockDriver> {
        Arc::new(MockDriver {
            server: Arc::clone(self),
        })
    }
}

pub struct MockDriver {
    server: Arc<MockServer>,
}

#[async_trait]
impl Driver for MockDriver {
    fn name(&self) -> &str {
        "mock"
    }

    async fn connect(&self, _config: &PoolConfig) -> Result<Box<dyn Connection>, DbError> {
        if self.server.state.lock().unwrap().refuse_connects {
            return Err(DbError::Connection("mock server refused connection".into()));
        }
        self.server.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConn {
            server: Arc::clone(&self.server),
            snapshot: None,
            cursor: None,
            last_id: 0,
            alive: true,
        }))
    }
}

pub struct MockConn {
    server: Arc<MockServer>,
    /// Rows as they were at `begin`, restored on rollback.
    snapshot: Option<Vec<i64>>,
    cursor: Option<VecDeque<Row>>,
    last_id: i64,
    alive: bool,
}

impl MockConn {
    fn check_stale(&mut self) -> Result<(), DbError> {
        self.server.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.alive {
            return Err(DbError::Stale("session was closed by the server".into()));
        }
        let mut state = self.server.state.lock().unwrap();
        if state.stale_failures > 0 {
            state.stale_failures -= 1;
            self.alive = false;
            return Err(DbError::Stale("server dropped the connection".into()));
        }
        Ok(())
    }

    fn select_rows(&self) -> Vec<Row> {
        let cols = columns(["id"]);
        self.server
            .state
            .lock()
            .unwrap()
            .rows
            .iter()
            .map(|id| Row::new(Arc::clone(&cols), vec![Value::I64(*id)]))
            .collect()
    }
}

#[async_trait]
impl Connection for MockConn {
    async fn execute(&mut self, stmt: &str, _params: &[Value]) -> Result<u64, DbError> {
        self.check_stale()?;
        let head = stmt
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_uppercase();
        let mut state = self.server.state.lock().unwrap();
        match head.as_str() {
            "INSERT" => {
                state.next_id += 1;
                let id = state.next_id;
                state.rows.push(id);
                self.last_id = id;
                Ok(1)
            }
            "UPDATE" => Ok(state.rows.len() as u64),
            "DELETE" => {
                let n = state.rows.len() as u64;
                state.rows.clear();
                Ok(n)
            }
            _ => Err(DbError::Statement(format!("unsupported statement: {stmt}"))),
        }
    }

    async fn query(&mut self, stmt: &str, _params: &[Value]) -> Result<Vec<Row>, DbError> {
        self.check_stale()?;
        let trimmed = stmt.trim_start();
        // "SLOW SELECT ..." stalls before answering, for timeout tests.
        let select = if let Some(rest) = trimmed.strip_prefix("SLOW ") {
            tokio::time::sleep(Duration::from_millis(300)).await;
            rest
        } else {
            trimmed
        };
        if !select.to_ascii_uppercase().starts_with("SELECT") {
            return Err(DbError::Statement(format!("not a query: {stmt}")));
        }
        Ok(self.select_rows())
    }

    async fn start(&mut self, stmt: &str, params: &[Value]) -> Result<(), DbError> {
        let rows = self.query(stmt, params).await?;
        self.cursor = Some(rows.into());
        Ok(())
    }

    async fn fetch_batch(&mut self, n: usize) -> Result<Vec<Row>, DbError> {
        self.server.fetch_calls.fetch_add(1, Ordering::SeqCst);
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
        Ok(self.last_id as u64)
    }

    async fn ping(&mut self) -> Result<(), DbError> {
        if self.server.state.lock().unwrap().fail_pings {
            return Err(DbError::Connection("ping refused".into()));
        }
        // A successful ping re-establishes the session.
        self.alive = true;
        Ok(())
    }

    async fn begin(&mut self) -> Result<(), DbError> {
        self.check_stale()?;
        let rows = self.server.state.lock().unwrap().rows.clone();
        self.snapshot = Some(rows);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        self.check_stale()?;
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        if let Some(snapshot) = self.snapshot.take() {
            self.server.state.lock().unwrap().rows = snapshot;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DbError> {
        self.alive = false;
        self.cursor = None;
        self.server.closed_conns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Honor `RUST_LOG` in test output. Safe to call repeatedly.
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn test_config() -> PoolConfig {
    PoolConfig::new("localhost", 3306, "tester", "secret", "mockdb")
}

pub fn make_pool(server: &Arc<MockServer>, config: PoolConfig) -> Pool {
    Pool::new(config, server.driver())
}

/// Ids of the `id` column across `rows`.
pub fn ids(rows: &[Row]) -> Vec<i64> {
    rows.iter()
        .map(|row| match row.get("id") {
            Some(Value::I64(id)) => *id,
            other => panic!("unexpected id value: {other:?}"),
        })
        .collect()
}
