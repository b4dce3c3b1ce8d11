use std::time::Duration;

use thiserror::Error;

/// Retry classification for a failure.
///
/// The query executor retries a statement exactly once when the error it got
/// back is [`ErrorKind::Transient`]. Everything a driver does not positively
/// classify as a dropped session is `Fatal` and surfaces immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The connection was silently closed by the server; the same statement
    /// may succeed after a ping on the same connection.
    Transient,
    /// Anything else: configuration, statement, pool or programmer errors.
    Fatal,
}

/// Errors produced by the pool, registry, executor and bridge.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("unknown config key '{key}', available keys: {}", available.join(", "))]
    UnknownConfigKey { key: String, available: Vec<String> },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("pool exhausted: {0}")]
    PoolExhausted(String),
    #[error("pool is closed")]
    PoolClosed,
    #[error("stale connection: {0}")]
    Stale(String),
    #[error("statement failed: {0}")]
    Statement(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("invalid transaction state: {0}")]
    InvalidTransactionState(&'static str),
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("driver error: {0}")]
    Driver(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl DbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::Stale(_) => ErrorKind::Transient,
            _ => ErrorKind::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

#[cfg(feature = "mysql")]
impl From<mysql_async::Error> for DbError {
    fn from(e: mysql_async::Error) -> Self {
        match e {
            // The socket went away underneath us: the server closed an idle
            // session. Safe to ping and re-issue the statement once.
            mysql_async::Error::Io(io) => DbError::Stale(io.to_string()),
            // Reported by the server: syntax, constraint, missing object.
            mysql_async::Error::Server(s) => DbError::Statement(s.to_string()),
            other => DbError::Driver(Box::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_is_the_only_transient_kind() {
        assert!(DbError::Stale("gone".into()).is_transient());
        assert_eq!(DbError::Statement("syntax".into()).kind(), ErrorKind::Fatal);
        assert_eq!(DbError::PoolClosed.kind(), ErrorKind::Fatal);
        assert_eq!(
            DbError::Timeout(Duration::from_secs(1)).kind(),
            ErrorKind::Fatal
        );
    }

    #[test]
    fn unknown_key_lists_alternatives() {
        let e = DbError::UnknownConfigKey {
            key: "staging".into(),
            available: vec!["default".into(), "replica".into()],
        };
        let msg = e.to_string();
        assert!(msg.contains("staging"));
        assert!(msg.contains("default, replica"));
    }
}
