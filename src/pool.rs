//! Connection pool with idle-timeout eviction
//!
//! [`ConnectionPool`] caches live resource connections keyed by the
//! fingerprint of the full effective configuration (see
//! [`crate::config::ServerConfig::fingerprint`]), so distinct
//! configurations never share a connection.
//!
//! # Lifecycle
//!
//! - A cache miss runs the caller-supplied connect factory (which
//!   obtains a bearer token through the auth manager and opens the
//!   underlying transport) and inserts the resulting handle.
//! - A cache hit returns the existing handle, stamps `last_used_at`, and
//!   schedules a fresh idle timer.
//! - Each idle timer is single-shot: when it fires it re-checks whether
//!   the entry is still idle and only then closes and removes it. An
//!   entry touched in the meantime is left for the newer timer.
//! - A handle that closes or errors out removes its own entry through
//!   the watch task registered at insert time.
//! - [`shutdown`](ConnectionPool::shutdown) closes and clears every
//!   entry and cancels every timer.
//!
//! # Concurrency
//!
//! Creation is a critical section per fingerprint: the pool keeps one
//! async mutex slot per fingerprint and runs the connect factory while
//! holding it, so concurrent first callers for the same fingerprint
//! share a single connection attempt instead of racing to create
//! duplicates. Callers driving different fingerprints proceed
//! independently.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::connection::Connection;
use crate::error::Result;

/// Default idle duration after which an unused connection is evicted.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(180);

// ---------------------------------------------------------------------------
// Pool internals
// ---------------------------------------------------------------------------

/// One cached connection and its last-use stamp.
struct PoolEntry {
    handle: Arc<dyn Connection>,
    last_used_at: Instant,
}

/// Per-fingerprint slot. Locking the slot serializes creation for that
/// fingerprint only.
#[derive(Default)]
struct Slot {
    entry: Option<PoolEntry>,
}

type SlotMap = HashMap<String, Arc<Mutex<Slot>>>;

// ---------------------------------------------------------------------------
// ConnectionPool
// ---------------------------------------------------------------------------

/// Cache of live resource connections keyed by configuration fingerprint.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use mcplink::pool::{ConnectionPool, DEFAULT_IDLE_TIMEOUT};
/// use mcplink::connection::Connection;
///
/// # async fn example(
/// #     connect: impl std::future::Future<Output = mcplink::error::Result<Arc<dyn Connection>>>,
/// # ) -> mcplink::error::Result<()> {
/// let pool = ConnectionPool::new(DEFAULT_IDLE_TIMEOUT);
/// let handle = pool.get_or_create("fingerprint", || connect).await?;
/// # let _ = handle;
/// pool.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionPool {
    idle_timeout: Duration,
    slots: Arc<Mutex<SlotMap>>,
    shutdown: CancellationToken,
}

impl ConnectionPool {
    /// Creates an empty pool evicting entries after `idle_timeout` of
    /// disuse.
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            slots: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Returns the cached connection for `fingerprint`, or runs `connect`
    /// to create one.
    ///
    /// On a hit the entry's idle timer is reset. On a miss the factory
    /// runs inside the per-fingerprint critical section; concurrent first
    /// callers for the same fingerprint await the same attempt and then
    /// observe its result. A failed attempt caches nothing.
    ///
    /// # Errors
    ///
    /// Propagates the connect factory's error, or fails when the pool has
    /// been shut down.
    pub async fn get_or_create<F, Fut>(
        &self,
        fingerprint: &str,
        connect: F,
    ) -> Result<Arc<dyn Connection>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn Connection>>>,
    {
        if self.shutdown.is_cancelled() {
            anyhow::bail!("connection pool is shut down");
        }

        let slot = {
            let mut slots = self.slots.lock().await;
            Arc::clone(
                slots
                    .entry(fingerprint.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(Slot::default()))),
            )
        };

        let mut guard = slot.lock().await;

        if let Some(entry) = guard.entry.as_mut() {
            entry.last_used_at = Instant::now();
            let handle = Arc::clone(&entry.handle);
            drop(guard);
            self.schedule_idle_timer(fingerprint, &slot);
            tracing::debug!(fingerprint = %fingerprint, "connection pool hit");
            return Ok(handle);
        }

        tracing::debug!(fingerprint = %fingerprint, "connection pool miss; connecting");
        let handle = connect().await?;
        guard.entry = Some(PoolEntry {
            handle: Arc::clone(&handle),
            last_used_at: Instant::now(),
        });
        drop(guard);

        self.watch_handle(fingerprint, &slot, &handle);
        self.schedule_idle_timer(fingerprint, &slot);
        Ok(handle)
    }

    /// Closes and removes the entry for `fingerprint`, if any.
    pub async fn close(&self, fingerprint: &str) {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots.remove(fingerprint)
        };
        if let Some(slot) = slot {
            let entry = slot.lock().await.entry.take();
            if let Some(entry) = entry {
                entry.handle.close().await;
                tracing::debug!(fingerprint = %fingerprint, "connection closed on request");
            }
        }
    }

    /// Whether a live entry is currently cached for `fingerprint`.
    pub async fn contains(&self, fingerprint: &str) -> bool {
        let slot = {
            let slots = self.slots.lock().await;
            slots.get(fingerprint).cloned()
        };
        match slot {
            Some(slot) => slot.lock().await.entry.is_some(),
            None => false,
        }
    }

    /// Closes every cached connection, clears the pool, and cancels all
    /// timers. Subsequent [`get_or_create`](Self::get_or_create) calls
    /// fail.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let slots: Vec<_> = {
            let mut map = self.slots.lock().await;
            map.drain().collect()
        };
        for (fingerprint, slot) in slots {
            let entry = slot.lock().await.entry.take();
            if let Some(entry) = entry {
                entry.handle.close().await;
                tracing::debug!(fingerprint = %fingerprint, "connection closed on shutdown");
            }
        }
        tracing::info!("connection pool shut down");
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    /// Spawns a single-shot idle timer for the entry currently in `slot`.
    ///
    /// The timer re-checks `last_used_at` when it fires; an entry touched
    /// since then is left alone, and the timer scheduled by that touch
    /// takes over.
    fn schedule_idle_timer(&self, fingerprint: &str, slot: &Arc<Mutex<Slot>>) {
        let fingerprint = fingerprint.to_string();
        let slot = Arc::clone(slot);
        let idle_timeout = self.idle_timeout;
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(idle_timeout) => {
                    let stale = {
                        let mut guard = slot.lock().await;
                        match guard.entry.as_ref() {
                            Some(entry) if entry.last_used_at.elapsed() >= idle_timeout => {
                                guard.entry.take()
                            }
                            _ => None,
                        }
                    };
                    if let Some(entry) = stale {
                        entry.handle.close().await;
                        tracing::debug!(fingerprint = %fingerprint, "idle connection evicted");
                    }
                }
            }
        });
    }

    /// Spawns a task that removes the entry when the handle reports
    /// close or error.
    fn watch_handle(
        &self,
        fingerprint: &str,
        slot: &Arc<Mutex<Slot>>,
        handle: &Arc<dyn Connection>,
    ) {
        let fingerprint = fingerprint.to_string();
        let slot = Arc::clone(slot);
        let handle = Arc::clone(handle);
        let closed = handle.closed();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = closed.cancelled() => {
                    let mut guard = slot.lock().await;
                    // Only drop the entry if it still holds this handle; a
                    // newer connection may have replaced it.
                    if let Some(entry) = guard.entry.as_ref() {
                        if Arc::ptr_eq(&entry.handle, &handle) {
                            guard.entry = None;
                            tracing::debug!(fingerprint = %fingerprint, "connection dropped after close/error");
                        }
                    }
                }
            }
        });
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// In-process connection fake driven entirely by its token.
    #[derive(Debug)]
    struct FakeConnection {
        closed: CancellationToken,
    }

    impl FakeConnection {
        fn create() -> Arc<dyn Connection> {
            Arc::new(Self {
                closed: CancellationToken::new(),
            })
        }
    }

    #[async_trait::async_trait]
    impl Connection for FakeConnection {
        fn closed(&self) -> CancellationToken {
            self.closed.clone()
        }

        async fn close(&self) {
            self.closed.cancel();
        }
    }

    #[tokio::test]
    async fn test_hit_returns_same_handle() {
        let pool = ConnectionPool::new(Duration::from_secs(60));
        let a = pool
            .get_or_create("fp", || async { Ok(FakeConnection::create()) })
            .await
            .unwrap();
        let b = pool
            .get_or_create("fp", || async { panic!("factory must not run on a hit") })
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_distinct_fingerprints_get_distinct_handles() {
        let pool = ConnectionPool::new(Duration::from_secs(60));
        let a = pool
            .get_or_create("fp_a", || async { Ok(FakeConnection::create()) })
            .await
            .unwrap();
        let b = pool
            .get_or_create("fp_b", || async { Ok(FakeConnection::create()) })
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_failed_connect_caches_nothing() {
        let pool = ConnectionPool::new(Duration::from_secs(60));
        let result = pool
            .get_or_create("fp", || async { anyhow::bail!("connect refused") })
            .await;
        assert!(result.is_err());
        assert!(!pool.contains("fp").await);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_connections() {
        let pool = ConnectionPool::new(Duration::from_secs(60));
        pool.shutdown().await;
        let result = pool
            .get_or_create("fp", || async { Ok(FakeConnection::create()) })
            .await;
        assert!(result.is_err());
    }

    // Timing-sensitive eviction and concurrency tests live in
    // tests/pool_test.rs.
}
