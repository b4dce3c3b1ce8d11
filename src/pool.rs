use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::driver::{Connection, Driver};
use crate::error::DbError;

/// A bounded pool of driver connections.
///
/// Cheap to clone: all clones share the same underlying pool. Connections are
/// created lazily, reused newest-first, and retired at release time once they
/// exceed the configured recycle age. At most `max_size` connections are
/// checked out simultaneously; further acquirers wait, bounded by
/// `acquire_timeout`.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .field("total", &self.inner.total.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

pub(crate) struct PoolInner {
    config: PoolConfig,
    driver: Arc<dyn Driver>,
    idle: Mutex<Vec<IdleEntry>>,
    semaphore: Semaphore,
    total: AtomicUsize,
    closed: AtomicBool,
    stats: PoolCounters,
}

struct IdleEntry {
    conn: Box<dyn Connection>,
    created_at: Instant,
}

#[derive(Default)]
struct PoolCounters {
    acquisitions: AtomicU64,
    releases: AtomicU64,
    created: AtomicU64,
    retired: AtomicU64,
    recycled: AtomicU64,
}

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Connections currently alive (idle + checked out).
    pub size: usize,
    pub idle: usize,
    pub in_use: usize,
    pub max_size: usize,
}

/// Monotonic pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub acquisitions: u64,
    pub releases: u64,
    pub created: u64,
    /// Connections closed for any reason.
    pub retired: u64,
    /// Subset of `retired` closed for exceeding the recycle age.
    pub recycled: u64,
}

impl Pool {
    /// Construct a pool. Performs no I/O: the first connection is only
    /// established by the first `acquire` (or an explicit [`Pool::warm_up`]).
    pub fn new(config: PoolConfig, driver: Arc<dyn Driver>) -> Pool {
        info!(
            driver = driver.name(),
            host = %config.host,
            database = %config.database,
            min_size = config.min_size,
            max_size = config.max_size,
            "pool created"
        );
        Pool {
            inner: Arc::new(PoolInner {
                semaphore: Semaphore::new(config.max_size),
                idle: Mutex::new(Vec::with_capacity(config.max_size)),
                total: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                stats: PoolCounters::default(),
                config,
                driver,
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// True when `other` is a handle to this same pool.
    pub fn same_pool(&self, other: &Pool) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<PoolInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Arc<PoolInner>) -> Pool {
        Pool { inner }
    }

    /// Check a connection out of the pool.
    ///
    /// Reuses the most recently released idle connection, creates a new one
    /// when none are idle and the pool is below `max_size`, and otherwise
    /// waits until a checkout comes back. Waiting longer than
    /// `acquire_timeout` fails with [`DbError::PoolExhausted`].
    pub async fn acquire(&self) -> Result<PooledConn, DbError> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(DbError::PoolClosed);
        }

        let permit = match inner.config.acquire_timeout {
            Some(bound) => tokio::time::timeout(bound, inner.semaphore.acquire())
                .await
                .map_err(|_| {
                    DbError::PoolExhausted(format!(
                        "no connection became available within {bound:?}"
                    ))
                })?,
            None => inner.semaphore.acquire().await,
        }
        .map_err(|_| DbError::PoolClosed)?;

        // The permit travels with the checkout and is handed back in
        // reclaim(), not when this guard leaves scope.
        permit.forget();

        match self.checkout().await {
            Ok(conn) => {
                inner.stats.acquisitions.fetch_add(1, Ordering::Relaxed);
                Ok(conn)
            }
            Err(e) => {
                inner.semaphore.add_permits(1);
                Err(e)
            }
        }
    }

    async fn checkout(&self) -> Result<PooledConn, DbError> {
        let inner = &self.inner;
        // Re-checked after the permit wait: close() may have begun since.
        if inner.closed.load(Ordering::Acquire) {
            return Err(DbError::PoolClosed);
        }
        loop {
            let entry = inner.idle.lock().await.pop();
            match entry {
                Some(entry) if self.expired(entry.created_at) => {
                    // Aged out while idle; never hand it back to a caller.
                    self.retire(entry.conn, true).await;
                }
                Some(entry) => {
                    return Ok(PooledConn::new(self.clone(), entry.conn, entry.created_at));
                }
                None => {
                    let conn = inner.driver.connect(&inner.config).await?;
                    inner.total.fetch_add(1, Ordering::AcqRel);
                    inner.stats.created.fetch_add(1, Ordering::Relaxed);
                    debug!(driver = inner.driver.name(), "connection established");
                    return Ok(PooledConn::new(self.clone(), conn, Instant::now()));
                }
            }
        }
    }

    /// Eagerly establish connections up to `min_size`.
    pub async fn warm_up(&self) -> Result<(), DbError> {
        let target = self.inner.config.min_size;
        // Hold the checkouts until the target is reached, otherwise each
        // acquire would just reuse the connection released before it.
        let mut held = Vec::new();
        while self.status().await.size < target && held.len() < target {
            held.push(self.acquire().await?);
        }
        for conn in held {
            conn.release().await;
        }
        Ok(())
    }

    /// Probe the backing store. Acquires a connection, pings it, releases
    /// it. Reports failure instead of raising.
    pub async fn ping(&self) -> bool {
        match self.acquire().await {
            Ok(mut conn) => {
                let healthy = conn.ping().await.is_ok();
                if !healthy {
                    conn.poison();
                }
                conn.release().await;
                healthy
            }
            Err(e) => {
                warn!(error = %e, "pool ping failed");
                false
            }
        }
    }

    /// Close the pool: refuse new checkouts, wait for every outstanding
    /// connection to come back, then close the idle set. Idempotent.
    pub async fn close(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Every checkout holds one forgotten permit; holding the full
        // capacity means all of them have been reclaimed.
        match inner
            .semaphore
            .acquire_many(inner.config.max_size as u32)
            .await
        {
            Ok(all) => all.forget(),
            Err(_) => return,
        }
        let mut idle = inner.idle.lock().await;
        for mut entry in idle.drain(..) {
            if let Err(e) = entry.conn.close().await {
                warn!(error = %e, "error closing idle connection");
            }
            inner.total.fetch_sub(1, Ordering::AcqRel);
            inner.stats.retired.fetch_add(1, Ordering::Relaxed);
        }
        // Wake any acquirer that queued before the flag flipped.
        inner.semaphore.close();
        info!(driver = inner.driver.name(), "pool closed");
    }

    pub async fn status(&self) -> PoolStatus {
        let idle = self.inner.idle.lock().await.len();
        let size = self.inner.total.load(Ordering::Acquire);
        PoolStatus {
            size,
            idle,
            in_use: size.saturating_sub(idle),
            max_size: self.inner.config.max_size,
        }
    }

    pub fn stats(&self) -> PoolStats {
        let s = &self.inner.stats;
        PoolStats {
            acquisitions: s.acquisitions.load(Ordering::Relaxed),
            releases: s.releases.load(Ordering::Relaxed),
            created: s.created.load(Ordering::Relaxed),
            retired: s.retired.load(Ordering::Relaxed),
            recycled: s.recycled.load(Ordering::Relaxed),
        }
    }

    fn expired(&self, created_at: Instant) -> bool {
        match self.inner.config.recycle {
            Some(age) => created_at.elapsed() > age,
            None => false,
        }
    }

    async fn retire(&self, mut conn: Box<dyn Connection>, recycled: bool) {
        if let Err(e) = conn.close().await {
            debug!(error = %e, "error closing retired connection");
        }
        self.inner.total.fetch_sub(1, Ordering::AcqRel);
        self.inner.stats.retired.fetch_add(1, Ordering::Relaxed);
        if recycled {
            self.inner.stats.recycled.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Take a connection back from a checkout. Healthy connections within
    /// the recycle age rejoin the idle set; everything else is closed.
    async fn reclaim(&self, mut conn: Box<dyn Connection>, created_at: Instant, poisoned: bool) {
        let inner = &self.inner;
        inner.stats.releases.fetch_add(1, Ordering::Relaxed);

        let dirty = conn.reset().await.is_err();
        let expired = self.expired(created_at);
        if poisoned || dirty || inner.closed.load(Ordering::Acquire) {
            self.retire(conn, false).await;
        } else if expired {
            debug!("recycling connection past its configured age");
            self.retire(conn, true).await;
        } else {
            inner.idle.lock().await.push(IdleEntry { conn, created_at });
        }
        inner.semaphore.add_permits(1);
    }
}

/// A connection checked out of a [`Pool`].
///
/// Dereferences to the underlying [`Connection`]. Returns itself to the pool
/// when dropped; prefer the explicit [`PooledConn::release`] where an await
/// point is available, so the return is not deferred to a spawned task.
pub struct PooledConn {
    conn: Option<Box<dyn Connection>>,
    created_at: Instant,
    poisoned: bool,
    pool: Pool,
}

impl std::fmt::Debug for PooledConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConn")
            .field("poisoned", &self.poisoned)
            .field("checked_in", &self.conn.is_none())
            .finish_non_exhaustive()
    }
}

impl PooledConn {
    fn new(pool: Pool, conn: Box<dyn Connection>, created_at: Instant) -> Self {
        Self {
            conn: Some(conn),
            created_at,
            poisoned: false,
            pool,
        }
    }

    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    /// Mark the connection unfit for reuse; release will close it instead
    /// of returning it to the idle set.
    pub fn poison(&mut self) {
        self.poisoned = true;
    }

    /// Return the connection to the pool immediately.
    pub async fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool
                .reclaim(conn, self.created_at, self.poisoned)
                .await;
        }
    }
}

impl std::ops::Deref for PooledConn {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_ref()
            .expect("BUG: PooledConn used after release")
            .as_ref()
    }
}

impl std::ops::DerefMut for PooledConn {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_mut()
            .expect("BUG: PooledConn used after release")
            .as_mut()
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let pool = self.pool.clone();
            let created_at = self.created_at;
            let poisoned = self.poisoned;
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    pool.reclaim(conn, created_at, poisoned).await;
                });
            } else {
                // Runtime already gone; the process is shutting down and the
                // socket closes with it.
                warn!("connection dropped outside a runtime, not returned to pool");
            }
        }
    }
}
