//! Background cache eviction (spec.md C9, §4.9): periodically reclaims
//! clean, closed files' local cache bytes under the configured policy once
//! the cache is over budget.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use super::FileManager;
use crate::cache_size_mgr::CacheSizeMgr;
use crate::config::{EvictionConfig, EvictionPolicy};
use crate::path::ApiPath;
use crate::provider::{FilesystemItem, Provider};

/// Drives periodic eviction sweeps. Candidates come from the provider's
/// directory listing rather than a separate index, since eviction only
/// needs `(path, size, modified)` and the provider already exposes that.
pub struct Eviction {
    file_manager: Arc<FileManager>,
    provider: Arc<dyn Provider>,
    cache_size: Arc<CacheSizeMgr>,
    config: EvictionConfig,
    stop: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Eviction {
    pub fn new(
        file_manager: Arc<FileManager>,
        provider: Arc<dyn Provider>,
        cache_size: Arc<CacheSizeMgr>,
        config: EvictionConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            file_manager,
            provider,
            cache_size,
            config,
            stop: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        })
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn spawn(self: &Arc<Self>, max_cache_size_bytes: u64) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.run(max_cache_size_bytes).await })
    }

    async fn run(&self, max_cache_size_bytes: u64) {
        while !self.stop.load(Ordering::SeqCst) {
            if self.cache_size.size() > max_cache_size_bytes {
                let _ = self.sweep_once(&ApiPath::root()).await;
            }
            let _ = tokio::time::timeout(self.config.delay, self.notify.notified()).await;
        }
    }

    /// Runs a single eviction pass starting from `root`, evicting the
    /// highest-priority candidate under [`EvictionPolicy`] and returning
    /// whether anything was evicted.
    pub async fn sweep_once(&self, root: &ApiPath) -> bool {
        let candidates = self.collect_candidates(root).await;

        let mut evictable = Vec::new();
        for item in candidates {
            if !self.file_manager.is_processing(&item.api_path).await {
                evictable.push(item);
            }
        }

        let chosen = match self.config.policy {
            EvictionPolicy::OldestAccess => evictable.iter().min_by_key(|i| i.modified),
            EvictionPolicy::LargestFile => evictable.iter().max_by_key(|i| i.size),
        };

        let Some(item) = chosen.cloned() else {
            return false;
        };

        if self.file_manager.evict_file(&item.api_path).await.is_ok() {
            self.cache_size.shrink(item.size).await;
            true
        } else {
            false
        }
    }

    async fn collect_candidates(&self, root: &ApiPath) -> Vec<FilesystemItem> {
        let mut out = Vec::new();
        let mut stack = vec![root.clone()];
        while let Some(dir) = stack.pop() {
            let Ok(items) = self.provider.get_directory_items(&dir).await else { continue };
            for item in items {
                if item.directory {
                    stack.push(item.api_path.clone());
                } else {
                    out.push(item);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, EvictionConfig, EvictionPolicy};
    use crate::db::{InMemoryFileMgrDb, InMemoryMetaDb};
    use crate::events::{EventBus, Level};
    use crate::provider::MemoryProvider;
    use std::time::Duration;

    struct AlwaysOne;
    #[async_trait::async_trait]
    impl crate::cache_size_mgr::CacheDirCounter for AlwaysOne {
        async fn file_count(&self) -> u64 {
            1
        }
    }

    async fn fixture() -> (Arc<Eviction>, Arc<CacheSizeMgr>, Arc<dyn Provider>) {
        let provider: Arc<dyn Provider> = Arc::new(MemoryProvider::new());
        provider.create_file(&ApiPath::normalize("/a").unwrap()).await.unwrap();
        provider.write_file(&ApiPath::normalize("/a").unwrap(), 0, &[0u8; 10]).await.unwrap();
        provider.create_file(&ApiPath::normalize("/b").unwrap()).await.unwrap();
        provider.write_file(&ApiPath::normalize("/b").unwrap(), 0, &[0u8; 100]).await.unwrap();

        let events = Arc::new(EventBus::new(Level::Debug));
        let cache_size = Arc::new(CacheSizeMgr::new(110, 50, events.clone(), Arc::new(AlwaysOne)));
        let config = Arc::new(Config::new(std::path::PathBuf::from("/tmp"), 50));
        let fm = FileManager::new(
            config,
            provider.clone(),
            Arc::new(InMemoryMetaDb::new()),
            Arc::new(InMemoryFileMgrDb::new()),
            cache_size.clone(),
            events,
        );
        let eviction = Eviction::new(fm, provider.clone(), cache_size.clone(), EvictionConfig { policy: EvictionPolicy::LargestFile, delay: Duration::from_secs(1) });
        (eviction, cache_size, provider)
    }

    #[tokio::test]
    async fn sweep_evicts_largest_file_under_that_policy() {
        let (eviction, cache_size, _provider) = fixture().await;
        assert!(eviction.sweep_once(&ApiPath::root()).await);
        assert_eq!(cache_size.size(), 10);
    }

    /// A file with unpushed local writes must never be reclaimed, even when
    /// it is the only thing keeping the cache over budget and a sweep is
    /// forced: the sweep should pass over it and take a clean file instead.
    #[tokio::test]
    async fn a_dirty_open_file_survives_a_sweep_that_evicts_a_clean_one_instead() {
        let provider: Arc<dyn Provider> = Arc::new(MemoryProvider::new());
        let dirty = ApiPath::normalize("/dirty.txt").unwrap();
        let clean = ApiPath::normalize("/clean.txt").unwrap();
        provider.create_file(&dirty).await.unwrap();
        provider.write_file(&dirty, 0, &[0u8; 90]).await.unwrap();
        provider.create_file(&clean).await.unwrap();
        provider.write_file(&clean, 0, &[0u8; 10]).await.unwrap();

        let events = Arc::new(EventBus::new(Level::Debug));
        let mut rx = events.subscribe();
        // 90 of 100 bytes resident: "cache filled to 90%", over the 50-byte budget.
        let cache_size = Arc::new(CacheSizeMgr::new(90, 50, events.clone(), Arc::new(AlwaysOne)));
        let cache_dir = std::env::temp_dir().join(format!("repertory-evict-it-{}", std::process::id()));
        let config = Arc::new(Config::new(cache_dir.clone(), 50));
        let fm = FileManager::new(
            config,
            provider.clone(),
            Arc::new(InMemoryMetaDb::new()),
            Arc::new(InMemoryFileMgrDb::new()),
            cache_size.clone(),
            events,
        );

        // Open and write dirty.txt without closing it, so it is still
        // tracked as open and its write never reached the provider.
        let handle = fm.open(&dirty).await.unwrap();
        handle.write(0, b"edit").await.unwrap();

        let eviction = Eviction::new(
            fm,
            provider,
            cache_size.clone(),
            EvictionConfig { policy: EvictionPolicy::LargestFile, delay: Duration::from_secs(1) },
        );

        assert!(eviction.sweep_once(&ApiPath::root()).await);
        assert_eq!(cache_size.size(), 80);

        let evt = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        match evt {
            crate::events::Event::FilesystemItemEvicted { api_path } => assert_eq!(api_path, clean),
            other => panic!("unexpected event: {other:?}"),
        }

        let _ = std::fs::remove_dir_all(&cache_dir);
    }

    #[tokio::test]
    async fn sweep_on_empty_tree_evicts_nothing() {
        let provider: Arc<dyn Provider> = Arc::new(MemoryProvider::new());
        let events = Arc::new(EventBus::new(Level::Debug));
        let cache_size = Arc::new(CacheSizeMgr::new(0, 50, events.clone(), Arc::new(AlwaysOne)));
        let config = Arc::new(Config::new(std::path::PathBuf::from("/tmp"), 50));
        let fm = FileManager::new(config, provider.clone(), Arc::new(InMemoryMetaDb::new()), Arc::new(InMemoryFileMgrDb::new()), cache_size.clone(), events);
        let eviction = Eviction::new(fm, provider, cache_size, EvictionConfig::default());
        assert!(!eviction.sweep_once(&ApiPath::root()).await);
    }
}
