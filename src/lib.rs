//! Bounded async connection pooling with a DB-API style operation surface.
//!
//! A [`PoolRegistry`] resolves a named configuration key to at most one live
//! [`Pool`]. A [`Session`] over the pool offers `fetch_one` / `fetch_all` /
//! `fetch_many` / `execute_insert` / `execute_mutation`, retrying a statement
//! exactly once when the driver reports the connection was silently closed by
//! the server. [`Transaction`] pins one connection until commit or rollback,
//! [`RowStream`] iterates large result sets in bounded batches, and
//! [`bridge::SyncBridge`] drives it all from synchronous callers.
//!
//! The network driver is pluggable through the [`driver::Driver`] and
//! [`driver::Connection`] traits; a `mysql_async` binding ships behind the
//! `mysql` feature.

pub mod bridge;
pub mod config;
pub mod driver;
pub mod error;
#[cfg(feature = "mysql")]
pub mod mysql;
pub mod pool;
pub mod registry;
pub mod session;
pub mod stream;
pub mod transaction;
pub mod value;

pub use config::{ConfigMap, PoolConfig, PoolOverrides};
pub use error::{DbError, ErrorKind};
pub use pool::{Pool, PoolStats, PoolStatus, PooledConn};
pub use registry::PoolRegistry;
pub use session::{ExecOutcome, Session};
pub use stream::RowStream;
pub use transaction::Transaction;
pub use value::{Row, Value};
