//! repertory-core: the engine behind mounting a remote object store as a
//! local filesystem.
//!
//! This crate owns the parts that don't depend on a specific host
//! filesystem binding or a specific remote backend: the chunked local
//! cache and upload manager (`file_manager`), the remote-mount packet
//! protocol (`remote`, `packet`), and chunk-level streaming encryption
//! (`crypto`). Concrete providers and host bindings are supplied by the
//! caller through the `provider::Provider` and `drive::DriveAdapter`
//! traits; this crate ships one in-memory reference implementation of
//! each for testing (`provider::memory`, `drive::remote_adapter` against a
//! loopback `remote::Server`).

pub mod cache_size_mgr;
pub mod config;
pub mod crypto;
pub mod db;
pub mod drive;
pub mod error;
pub mod events;
pub mod file_manager;
pub mod packet;
pub mod path;
pub mod provider;
pub mod remote;
pub mod stop_token;

use std::sync::Arc;

use config::Config;
use db::{FileMgrDb, InMemoryFileMgrDb, InMemoryMetaDb, MetaDb};
use events::EventBus;
use file_manager::FileManager;
use provider::Provider;

/// Everything a running mount needs, built from one [`Config`] and one
/// [`Provider`]. Construction wires the default in-memory metadata stores
/// together; callers who bring their own `MetaDb`/`FileMgrDb` backend
/// should build a `FileManager` directly instead of going through this
/// convenience constructor.
pub struct Engine {
    pub config: Arc<Config>,
    pub events: Arc<EventBus>,
    pub file_manager: Arc<FileManager>,
    pub cache_size: Arc<cache_size_mgr::CacheSizeMgr>,
}

struct NoopCounter;

#[async_trait::async_trait]
impl cache_size_mgr::CacheDirCounter for NoopCounter {
    async fn file_count(&self) -> u64 {
        0
    }
}

impl Engine {
    /// Starts an engine over `provider`, with fresh in-memory metadata
    /// stores and cache accounting starting from zero bytes used.
    pub fn start(config: Config, provider: Arc<dyn Provider>) -> Self {
        let config = Arc::new(config);
        let events = Arc::new(EventBus::new(config.event_level));
        let meta_db: Arc<dyn MetaDb> = Arc::new(InMemoryMetaDb::new());
        let file_mgr_db: Arc<dyn FileMgrDb> = Arc::new(InMemoryFileMgrDb::new());
        let cache_size = Arc::new(cache_size_mgr::CacheSizeMgr::new(
            0,
            config.max_cache_size_bytes,
            events.clone(),
            Arc::new(NoopCounter),
        ));
        let file_manager =
            FileManager::new(config.clone(), provider, meta_db, file_mgr_db, cache_size.clone(), events.clone());
        file_manager.upload_manager().spawn();

        Self { config, events, file_manager, cache_size }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provider::MemoryProvider;

    #[tokio::test]
    async fn engine_starts_and_opens_a_file() {
        let provider: Arc<dyn Provider> = Arc::new(MemoryProvider::new());
        let path = path::ApiPath::normalize("/hello.txt").unwrap();
        provider.create_file(&path).await.unwrap();
        provider.write_file(&path, 0, b"hi").await.unwrap();

        let config = Config::new(std::path::PathBuf::from("/tmp/repertory-test-cache"), 1 << 20);
        let engine = Engine::start(config, provider);

        let file = engine.file_manager.open(&path).await.unwrap();
        assert_eq!(file.read(0, 2).await.unwrap(), b"hi");
    }
}
