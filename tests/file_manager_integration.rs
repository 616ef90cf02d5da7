//! End-to-end tests against the in-memory provider, covering the
//! scenarios and invariants spec.md §8 calls out by name.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use repertory_core::cache_size_mgr::{CacheDirCounter, CacheSizeMgr};
use repertory_core::config::Config;
use repertory_core::db::{InMemoryFileMgrDb, InMemoryMetaDb};
use repertory_core::events::{Event, EventBus, Level};
use repertory_core::file_manager::FileManager;
use repertory_core::path::ApiPath;
use repertory_core::provider::{MemoryProvider, Provider};

struct AlwaysOne;

#[async_trait::async_trait]
impl CacheDirCounter for AlwaysOne {
    async fn file_count(&self) -> u64 {
        1
    }
}

async fn build_file_manager(max_cache_size_bytes: u64) -> (Arc<FileManager>, Arc<dyn Provider>, Arc<EventBus>) {
    let provider: Arc<dyn Provider> = Arc::new(MemoryProvider::new());
    let events = Arc::new(EventBus::new(Level::Debug));
    let cache_size = Arc::new(CacheSizeMgr::new(0, max_cache_size_bytes, events.clone(), Arc::new(AlwaysOne)));
    let config = Arc::new(Config::new(PathBuf::from("/tmp/repertory-it"), max_cache_size_bytes));
    let fm = FileManager::new(
        config,
        provider.clone(),
        Arc::new(InMemoryMetaDb::new()),
        Arc::new(InMemoryFileMgrDb::new()),
        cache_size,
        events.clone(),
    );
    (fm, provider, events)
}

#[tokio::test]
async fn closing_a_modified_file_queues_an_upload() {
    let (fm, provider, events) = build_file_manager(1 << 20).await;
    let path = ApiPath::normalize("/doc.txt").unwrap();
    provider.create_file(&path).await.unwrap();

    let mut rx = events.subscribe();
    fm.upload_manager().spawn();

    let file = fm.open(&path).await.unwrap();
    file.write(0, b"draft one").await.unwrap();
    drop(file);
    fm.close(&path).await.unwrap();

    let evt = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    assert!(matches!(evt, Event::FileUploadCompleted { error: None, .. }));
}

#[tokio::test]
async fn remove_file_fails_while_open() {
    let (fm, provider, _events) = build_file_manager(1 << 20).await;
    let path = ApiPath::normalize("/locked.txt").unwrap();
    provider.create_file(&path).await.unwrap();

    let _file = fm.open(&path).await.unwrap();
    let result = fm.remove_file(&path).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn rename_file_moves_metadata_and_open_handle() {
    let (fm, provider, _events) = build_file_manager(1 << 20).await;
    let from = ApiPath::normalize("/old.txt").unwrap();
    let to = ApiPath::normalize("/new.txt").unwrap();
    provider.create_file(&from).await.unwrap();

    let file = fm.open(&from).await.unwrap();
    fm.rename_file(&from, &to).await.unwrap();

    assert_eq!(file.path().await, to);
    assert!(fm.is_processing(&to).await);
    assert!(!fm.is_processing(&from).await);
}

#[tokio::test]
async fn eviction_reclaims_closed_files_under_a_cache_budget() {
    let (fm, provider, events) = build_file_manager(50).await;
    let a = ApiPath::normalize("/a").unwrap();
    provider.create_file(&a).await.unwrap();
    provider.write_file(&a, 0, &[0u8; 100]).await.unwrap();

    use repertory_core::config::{EvictionConfig, EvictionPolicy};
    use repertory_core::file_manager::Eviction;

    let cache_size = Arc::new(CacheSizeMgr::new(100, 50, events.clone(), Arc::new(AlwaysOne)));
    let eviction = Eviction::new(
        fm.clone(),
        provider.clone(),
        cache_size.clone(),
        EvictionConfig { policy: EvictionPolicy::LargestFile, delay: Duration::from_secs(1) },
    );

    assert!(eviction.sweep_once(&ApiPath::root()).await);
    assert_eq!(cache_size.size(), 0);
}
