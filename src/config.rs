use std::time::Duration;

use dashmap::DashMap;

use crate::error::DbError;

/// Connection and sizing parameters for one pool.
///
/// Immutable once a pool has been constructed from it.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Warm-up target for [`crate::pool::Pool::warm_up`].
    pub min_size: usize,
    /// Hard ceiling on simultaneously checked-out connections.
    pub max_size: usize,
    pub charset: String,
    pub autocommit: bool,
    /// Connections older than this are retired at release time.
    /// `None` disables recycling.
    pub recycle: Option<Duration>,
    /// Bound on waiting for a free connection. `None` waits indefinitely.
    pub acquire_timeout: Option<Duration>,
}

impl PoolConfig {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            database: database.into(),
            min_size: 1,
            max_size: 10,
            charset: "utf8mb4".to_string(),
            autocommit: true,
            recycle: None,
            acquire_timeout: Some(Duration::from_secs(10)),
        }
    }

    pub fn min_size(mut self, min_size: usize) -> Self {
        self.min_size = min_size;
        self
    }

    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    pub fn autocommit(mut self, autocommit: bool) -> Self {
        self.autocommit = autocommit;
        self
    }

    pub fn recycle(mut self, recycle: Option<Duration>) -> Self {
        self.recycle = recycle;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), DbError> {
        for (value, name) in [
            (&self.host, "host"),
            (&self.user, "user"),
            (&self.database, "database"),
        ] {
            if value.is_empty() {
                return Err(DbError::Config(format!(
                    "missing required parameter: {name}"
                )));
            }
        }
        if self.max_size == 0 {
            return Err(DbError::Config("max_size must be at least 1".into()));
        }
        if self.min_size > self.max_size {
            return Err(DbError::Config(format!(
                "min_size {} exceeds max_size {}",
                self.min_size, self.max_size
            )));
        }
        Ok(())
    }

    pub(crate) fn apply(&self, overrides: &PoolOverrides) -> PoolConfig {
        let mut cfg = self.clone();
        if let Some(min_size) = overrides.min_size {
            cfg.min_size = min_size;
        }
        if let Some(max_size) = overrides.max_size {
            cfg.max_size = max_size;
        }
        if let Some(recycle) = overrides.recycle {
            cfg.recycle = recycle;
        }
        if let Some(timeout) = overrides.acquire_timeout {
            cfg.acquire_timeout = timeout;
        }
        if let Some(autocommit) = overrides.autocommit {
            cfg.autocommit = autocommit;
        }
        cfg
    }
}

/// Per-call overlay applied on top of a resolved [`PoolConfig`] by
/// [`crate::registry::PoolRegistry::open`].
#[derive(Debug, Clone, Default)]
pub struct PoolOverrides {
    pub min_size: Option<usize>,
    pub max_size: Option<usize>,
    pub recycle: Option<Option<Duration>>,
    pub acquire_timeout: Option<Option<Duration>>,
    pub autocommit: Option<bool>,
}

impl PoolOverrides {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn min_size(mut self, min_size: usize) -> Self {
        self.min_size = Some(min_size);
        self
    }

    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    pub fn recycle(mut self, recycle: Option<Duration>) -> Self {
        self.recycle = Some(recycle);
        self
    }

    pub fn acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    pub fn autocommit(mut self, autocommit: bool) -> Self {
        self.autocommit = Some(autocommit);
        self
    }
}

/// Named configuration lookup: key → [`PoolConfig`].
///
/// `resolve` on an absent key reports every registered key, so a typo in a
/// deployment points straight at the fix.
#[derive(Default)]
pub struct ConfigMap {
    entries: DashMap<String, PoolConfig>,
}

impl ConfigMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a configuration under `key`, replacing any previous entry.
    pub fn insert(&self, key: impl Into<String>, config: PoolConfig) {
        self.entries.insert(key.into(), config);
    }

    pub fn resolve(&self, key: &str) -> Result<PoolConfig, DbError> {
        match self.entries.get(key) {
            Some(cfg) => Ok(cfg.clone()),
            None => {
                let mut available: Vec<String> =
                    self.entries.iter().map(|e| e.key().clone()).collect();
                available.sort();
                Err(DbError::UnknownConfigKey {
                    key: key.to_string(),
                    available,
                })
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> PoolConfig {
        PoolConfig::new("localhost", 3306, "root", "secret", "app")
    }

    #[test]
    fn defaults_match_expectations() {
        let c = cfg();
        assert_eq!(c.min_size, 1);
        assert_eq!(c.max_size, 10);
        assert_eq!(c.charset, "utf8mb4");
        assert!(c.autocommit);
        assert!(c.recycle.is_none());
    }

    #[test]
    fn validation_rejects_bad_sizes() {
        assert!(cfg().max_size(0).validate().is_err());
        assert!(cfg().min_size(5).max_size(2).validate().is_err());
        assert!(cfg().validate().is_ok());
    }

    #[test]
    fn validation_requires_host_user_database() {
        let c = PoolConfig::new("", 3306, "root", "", "app");
        let err = c.validate().unwrap_err();
        assert!(err.to_string().contains("host"));
    }

    #[test]
    fn overrides_apply_selectively() {
        let c = cfg().apply(
            &PoolOverrides::none()
                .max_size(3)
                .recycle(Some(Duration::from_secs(60))),
        );
        assert_eq!(c.max_size, 3);
        assert_eq!(c.recycle, Some(Duration::from_secs(60)));
        assert_eq!(c.min_size, 1);
    }

    #[test]
    fn resolve_unknown_key_lists_known_ones() {
        let map = ConfigMap::new();
        map.insert("default", cfg());
        map.insert("replica", cfg());
        match map.resolve("prod") {
            Err(DbError::UnknownConfigKey { key, available }) => {
                assert_eq!(key, "prod");
                assert_eq!(available, vec!["default".to_string(), "replica".into()]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
