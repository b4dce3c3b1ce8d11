use std::sync::{Arc, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::info;

use crate::config::{ConfigMap, PoolOverrides};
use crate::driver::Driver;
use crate::error::DbError;
use crate::pool::{Pool, PoolInner};

/// Keyed pool registry: at most one live [`Pool`] per configuration key.
///
/// Owned by the application's composition root and passed to whatever needs
/// to open pools. Holds only weak references, so a pool's lifetime is
/// governed by its external holders; once the last handle drops, the next
/// `open` for that key builds a fresh pool.
pub struct PoolRegistry {
    configs: ConfigMap,
    driver: Arc<dyn Driver>,
    pools: DashMap<String, Weak<PoolInner>>,
}

impl PoolRegistry {
    pub fn new(configs: ConfigMap, driver: Arc<dyn Driver>) -> Self {
        Self {
            configs,
            driver,
            pools: DashMap::new(),
        }
    }

    pub fn configs(&self) -> &ConfigMap {
        &self.configs
    }

    /// Resolve `key`, apply `overrides`, and return the pool for it —
    /// constructing one only if no live pool exists under the key.
    ///
    /// Idempotent: a second `open` under the same key returns the existing
    /// pool unchanged, ignoring `overrides` (the first opener's
    /// configuration wins for the pool's lifetime).
    pub fn open(&self, key: &str, overrides: &PoolOverrides) -> Result<Pool, DbError> {
        let config = self.configs.resolve(key)?.apply(overrides);
        config.validate()?;
        let driver = Arc::clone(&self.driver);
        self.get_or_create(key, move || Ok(Pool::new(config, driver)))
    }

    /// Double-checked lookup: a lock-free read first, then a re-check under
    /// the map shard lock before running `factory`. Concurrent first use
    /// from many threads constructs at most one pool per key. The factory
    /// must not perform I/O — pool construction is lazy by design, so the
    /// shard lock never spans a network call.
    pub fn get_or_create<F>(&self, key: &str, factory: F) -> Result<Pool, DbError>
    where
        F: FnOnce() -> Result<Pool, DbError>,
    {
        if let Some(live) = self.pools.get(key).and_then(|w| w.upgrade()) {
            return Ok(Pool::from_inner(live));
        }
        match self.pools.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if let Some(live) = occupied.get().upgrade() {
                    return Ok(Pool::from_inner(live));
                }
                let pool = factory()?;
                occupied.insert(pool.downgrade());
                info!(key, "pool registered (replacing dead entry)");
                Ok(pool)
            }
            Entry::Vacant(vacant) => {
                let pool = factory()?;
                vacant.insert(pool.downgrade());
                info!(key, "pool registered");
                Ok(pool)
            }
        }
    }

    /// Evict the entry for `key`. Existing handles keep working; the next
    /// `open` constructs a new pool.
    pub fn reset(&self, key: &str) {
        self.pools.remove(key);
    }

    /// Whether a live pool currently exists under `key`. Never constructs.
    pub fn has(&self, key: &str) -> bool {
        self.pools
            .get(key)
            .map(|w| w.upgrade().is_some())
            .unwrap_or(false)
    }
}
