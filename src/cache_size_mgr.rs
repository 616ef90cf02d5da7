//! The cache size manager (spec.md C5, §4.5).
//!
//! Tracks total local cache bytes and blocks `expand` callers while the
//! cache is over budget, waking them as space frees up. Ported from the
//! original `cache_size_mgr` (condvar + mutex) onto `tokio::sync::Notify`;
//! the "only block when more than one cache file exists" guard is kept
//! verbatim since it's what lets a fresh, empty cache directory accept its
//! first oversized write without deadlocking.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

use crate::error::ApiError;
use crate::events::{Event, EventBus};

const CACHE_WAIT: Duration = Duration::from_secs(5);

/// Counts how many cache-file entries currently exist under `cache_dir`, so
/// `expand` only blocks once there is more than one file to evict from.
#[async_trait::async_trait]
pub trait CacheDirCounter: Send + Sync {
    async fn file_count(&self) -> u64;
}

pub struct CacheSizeMgr {
    cache_size: AtomicU64,
    max_cache_size_bytes: u64,
    stop_requested: AtomicBool,
    notify: Arc<Notify>,
    events: Arc<EventBus>,
    dir: Arc<dyn CacheDirCounter>,
    lock: Mutex<()>,
}

impl CacheSizeMgr {
    pub fn new(
        initial_cache_size: u64,
        max_cache_size_bytes: u64,
        events: Arc<EventBus>,
        dir: Arc<dyn CacheDirCounter>,
    ) -> Self {
        Self {
            cache_size: AtomicU64::new(initial_cache_size),
            max_cache_size_bytes,
            stop_requested: AtomicBool::new(false),
            notify: Arc::new(Notify::new()),
            events,
            dir,
        }
    }

    pub fn size(&self) -> u64 {
        self.cache_size.load(Ordering::SeqCst)
    }

    fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        if self.stop_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        self.notify.notify_waiters();
    }

    /// Accounts for `size` additional bytes, blocking until the cache is
    /// back under budget if the directory holds more than one file.
    /// Returns `ApiError::IoError` if stopped while waiting.
    pub async fn expand(&self, size: u64) -> Result<(), ApiError> {
        let _guard = self.lock.lock().await;

        if size == 0 {
            self.notify.notify_waiters();
            return Ok(());
        }

        let mut last_cache_size = self.cache_size.load(Ordering::SeqCst);
        let new_size = last_cache_size + size;
        self.cache_size.store(new_size, Ordering::SeqCst);

        while !self.stop_requested()
            && self.cache_size.load(Ordering::SeqCst) > self.max_cache_size_bytes
            && self.dir.file_count().await > 1
        {
            let current = self.cache_size.load(Ordering::SeqCst);
            if last_cache_size != current {
                self.events.raise(Event::MaxCacheSizeReached {
                    cache_size_bytes: current,
                    max_cache_size_bytes: self.max_cache_size_bytes,
                });
                last_cache_size = current;
            }
            let _ = tokio::time::timeout(CACHE_WAIT, self.notify.notified()).await;
        }

        self.notify.notify_waiters();

        if self.stop_requested() {
            Err(ApiError::IoError)
        } else {
            Ok(())
        }
    }

    /// Accounts for `size` fewer bytes. If `size` exceeds the tracked total
    /// (a bookkeeping bug elsewhere), raises `InvalidCacheSize` and clamps to
    /// zero rather than underflowing.
    pub async fn shrink(&self, size: u64) {
        let _guard = self.lock.lock().await;

        if size == 0 {
            self.notify.notify_waiters();
            return;
        }

        let current = self.cache_size.load(Ordering::SeqCst);
        if current >= size {
            self.cache_size.store(current - size, Ordering::SeqCst);
        } else {
            self.events.raise(Event::InvalidCacheSize { configured_bytes: current, minimum_bytes: size });
            self.cache_size.store(0, Ordering::SeqCst);
        }

        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Level;

    struct FixedCount(u64);

    #[async_trait::async_trait]
    impl CacheDirCounter for FixedCount {
        async fn file_count(&self) -> u64 {
            self.0
        }
    }

    #[tokio::test]
    async fn expand_under_budget_does_not_block() {
        let mgr = CacheSizeMgr::new(0, 100, Arc::new(EventBus::new(Level::Debug)), Arc::new(FixedCount(5)));
        mgr.expand(10).await.unwrap();
        assert_eq!(mgr.size(), 10);
    }

    #[tokio::test]
    async fn expand_over_budget_with_one_file_does_not_block() {
        let mgr = CacheSizeMgr::new(0, 10, Arc::new(EventBus::new(Level::Debug)), Arc::new(FixedCount(1)));
        mgr.expand(100).await.unwrap();
        assert_eq!(mgr.size(), 100);
    }

    #[tokio::test]
    async fn shrink_below_zero_clamps_and_raises_event() {
        let bus = Arc::new(EventBus::new(Level::Debug));
        let mut rx = bus.subscribe();
        let mgr = CacheSizeMgr::new(5, 100, bus, Arc::new(FixedCount(5)));
        mgr.shrink(10).await;
        assert_eq!(mgr.size(), 0);
        let evt = rx.recv().await.unwrap();
        assert!(matches!(evt, Event::InvalidCacheSize { .. }));
    }

    #[tokio::test]
    async fn stop_unblocks_expand() {
        let mgr = Arc::new(CacheSizeMgr::new(0, 10, Arc::new(EventBus::new(Level::Debug)), Arc::new(FixedCount(5))));
        let mgr2 = mgr.clone();
        let handle = tokio::spawn(async move { mgr2.expand(100).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        mgr.stop();
        let result = handle.await.unwrap();
        assert_eq!(result.unwrap_err(), ApiError::IoError);
    }
}
