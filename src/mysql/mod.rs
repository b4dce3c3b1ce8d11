//! MySQL binding over `mysql_async`.
//!
//! The driver hands out bare connections; pooling, recycling and retry all
//! live in the crate core.

pub mod codec;
pub mod connection;

use async_trait::async_trait;
use mysql_async::{Conn, Opts, OptsBuilder};

use crate::config::PoolConfig;
use crate::driver::{Connection, Driver};
use crate::error::DbError;

pub use connection::MysqlConnection;

#[derive(Debug, Default)]
pub struct MysqlDriver;

impl MysqlDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Driver for MysqlDriver {
    fn name(&self) -> &str {
        "mysql"
    }

    async fn connect(&self, config: &PoolConfig) -> Result<Box<dyn Connection>, DbError> {
        let autocommit = if config.autocommit { 1 } else { 0 };
        let opts = OptsBuilder::default()
            .ip_or_hostname(config.host.clone())
            .tcp_port(config.port)
            .user(Some(config.user.clone()))
            .pass(Some(config.password.clone()))
            .db_name(Some(config.database.clone()))
            .setup(vec![
                format!("SET NAMES {}", config.charset),
                format!("SET autocommit={autocommit}"),
            ]);
        let conn = Conn::new(Opts::from(opts)).await?;
        Ok(Box::new(MysqlConnection::new(conn)))
    }
}
