//! The upload manager (spec.md C7, §4.7): a single background worker that
//! drains the LIFO upload queue, pushing each closed, modified file back to
//! the provider, with crash recovery via `upload_active`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Notify};

use crate::config::Config;
use crate::crypto::encrypting_reader::{AsyncReaderSource, EncryptingReader};
use crate::db::{FileMgrDb, MetaDb, UploadActiveEntry, UploadEntry};
use crate::error::ApiError;
use crate::events::{Event, EventBus};
use crate::path::ApiPath;
use crate::provider::Provider;
use crate::stop_token::StopToken;

/// A single queued/active upload, returned by [`UploadManager::current`]
/// for status reporting.
#[derive(Debug, Clone)]
pub struct Upload {
    pub path: ApiPath,
    pub source_path: String,
}

/// Drains the `i_file_mgr_db` upload queue one entry at a time. At most one
/// upload runs at once (spec.md §4.7's "single worker" design) — a second
/// `enqueue` for an in-flight path simply replaces the queued entry, it
/// does not start a second concurrent upload of the same path.
pub struct UploadManager {
    config: Arc<Config>,
    provider: Arc<dyn Provider>,
    file_mgr_db: Arc<dyn FileMgrDb>,
    meta_db: Arc<dyn MetaDb>,
    events: Arc<EventBus>,
    stop: Arc<AtomicBool>,
    notify: Arc<Notify>,
    /// The path and stop token of the upload currently in flight, if any, so
    /// `cancel` can interrupt it instead of only removing queued-but-not-yet-
    /// started entries.
    active_stop: Mutex<Option<(ApiPath, StopToken)>>,
}

impl UploadManager {
    pub fn new(
        config: Arc<Config>,
        provider: Arc<dyn Provider>,
        file_mgr_db: Arc<dyn FileMgrDb>,
        meta_db: Arc<dyn MetaDb>,
        events: Arc<EventBus>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            provider,
            file_mgr_db,
            meta_db,
            events,
            stop: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
            active_stop: Mutex::new(None),
        })
    }

    pub async fn enqueue(&self, path: ApiPath, source_path: String) {
        self.file_mgr_db.add_upload(UploadEntry { path, source_path }).await;
        self.notify.notify_one();
    }

    /// Removes `path` from the queue, and interrupts it mid-transfer if it
    /// is the upload currently running.
    pub async fn cancel(&self, path: &ApiPath) {
        if let Some((active_path, token)) = &*self.active_stop.lock().await {
            if active_path == path {
                token.stop();
            }
        }
        self.file_mgr_db.remove_upload(path).await;
        self.file_mgr_db.clear_upload_active(path).await;
    }

    pub async fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        if let Some((_, token)) = &*self.active_stop.lock().await {
            token.stop();
        }
    }

    /// Spawns the worker loop; returns its join handle so the owner can
    /// await shutdown after calling [`Self::stop`].
    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.run().await })
    }

    async fn run(&self) {
        // Any entries left in `upload_active` on startup are from a
        // process that crashed mid-upload; requeue them (spec.md §4.7).
        for active in self.file_mgr_db.list_upload_active().await {
            self.file_mgr_db
                .add_upload(UploadEntry { path: active.path.clone(), source_path: active.source_path })
                .await;
            self.file_mgr_db.clear_upload_active(&active.path).await;
        }

        while !self.stop.load(Ordering::SeqCst) {
            let Some(entry) = self.file_mgr_db.get_next_upload().await else {
                self.notify.notified().await;
                continue;
            };

            self.file_mgr_db
                .set_upload_active(UploadActiveEntry {
                    path: entry.path.clone(),
                    source_path: entry.source_path.clone(),
                    started_at: 0,
                })
                .await;

            let upload_stop = StopToken::new();
            *self.active_stop.lock().await = Some((entry.path.clone(), upload_stop.clone()));
            let result = self.upload_one(&entry.path, &entry.source_path, &upload_stop).await;
            let cancelled = upload_stop.is_stopped();
            *self.active_stop.lock().await = None;
            self.file_mgr_db.clear_upload_active(&entry.path).await;

            self.events.raise(Event::FileUploadCompleted {
                api_path: entry.path.clone(),
                error: result.err(),
                cancelled,
            });
        }
    }

    /// Pushes `source_path`'s current bytes to the provider under `path`,
    /// sealing them chunk-by-chunk first when the manager was configured
    /// with an encryption key (spec.md C3) — the provider itself never sees
    /// plaintext in that case, regardless of which backend is mounted.
    async fn upload_one(&self, path: &ApiPath, source_path: &str, stop: &StopToken) -> Result<(), ApiError> {
        let _meta = self.meta_db.get(path).await.ok_or(ApiError::NotFound)?;

        let Some(key) = self.config.encryption_key else {
            return self.provider.upload_file(path, Path::new(source_path), stop).await;
        };

        let sealed_path = self.seal_to_temp(source_path, &key, stop).await?;
        let result = self.provider.upload_file(path, &sealed_path, stop).await;
        let _ = tokio::fs::remove_file(&sealed_path).await;
        result
    }

    /// Streams `source_path` through [`EncryptingReader`] one
    /// `data_chunk_size` chunk at a time into a sibling `.sealed` file,
    /// never holding the whole file in memory (spec.md C3).
    async fn seal_to_temp(&self, source_path: &str, key: &[u8; 32], stop: &StopToken) -> Result<PathBuf, ApiError> {
        let file = tokio::fs::File::open(source_path).await.map_err(|_| ApiError::IoError)?;
        let source = Arc::new(AsyncReaderSource::new(file, self.config.data_chunk_size));
        let mut reader = EncryptingReader::new(source, *key, self.config.data_chunk_size);

        let sealed_path = PathBuf::from(format!("{source_path}.sealed"));
        let mut out = tokio::fs::File::create(&sealed_path).await.map_err(|_| ApiError::IoError)?;
        while let Some(frame) = reader.next_frame().await? {
            if stop.is_stopped() {
                let _ = tokio::fs::remove_file(&sealed_path).await;
                return Err(ApiError::CommError);
            }
            out.write_all(&frame).await.map_err(|_| ApiError::IoError)?;
        }
        out.flush().await.map_err(|_| ApiError::IoError)?;
        Ok(sealed_path)
    }

    pub async fn current(&self) -> Vec<Upload> {
        self.file_mgr_db
            .list_upload_active()
            .await
            .into_iter()
            .map(|e| Upload { path: e.path, source_path: e.source_path })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{InMemoryFileMgrDb, InMemoryMetaDb};
    use crate::events::Level;
    use crate::provider::MemoryProvider;
    use std::time::Duration;

    fn temp_source(tag: &str, contents: &[u8]) -> String {
        let path = std::env::temp_dir().join(format!("repertory-upload-test-{tag}-{}", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path.to_str().unwrap().to_string()
    }

    fn test_config() -> Arc<Config> {
        Arc::new(Config::new(std::env::temp_dir().join("repertory-upload-test-cache"), 1024 * 1024))
    }

    #[tokio::test]
    async fn uploads_are_processed_and_raise_completion_event() {
        let provider: Arc<dyn Provider> = Arc::new(MemoryProvider::new());
        let path = ApiPath::normalize("/a.txt").unwrap();
        provider.create_file(&path).await.unwrap();
        let source_path = temp_source("completed", b"hello upload");

        let meta_db: Arc<dyn MetaDb> = Arc::new(InMemoryMetaDb::new());
        meta_db.put(&path, crate::db::ApiMetaMap::new_file("a".into(), 0)).await;
        let file_mgr_db: Arc<dyn FileMgrDb> = Arc::new(InMemoryFileMgrDb::new());
        let events = Arc::new(EventBus::new(Level::Debug));
        let mut rx = events.subscribe();

        let mgr = UploadManager::new(test_config(), provider.clone(), file_mgr_db, meta_db, events);
        let handle = mgr.spawn();
        mgr.enqueue(path.clone(), source_path.clone()).await;

        let evt = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert!(matches!(evt, Event::FileUploadCompleted { error: None, cancelled: false, .. }));

        let uploaded = provider.read_file(&path, 0, 64).await.unwrap();
        assert_eq!(uploaded, b"hello upload");

        mgr.stop().await;
        let _ = handle.await;
        let _ = std::fs::remove_file(&source_path);
    }

    #[tokio::test]
    async fn cancel_removes_queued_upload() {
        let provider: Arc<dyn Provider> = Arc::new(MemoryProvider::new());
        let meta_db: Arc<dyn MetaDb> = Arc::new(InMemoryMetaDb::new());
        let file_mgr_db: Arc<dyn FileMgrDb> = Arc::new(InMemoryFileMgrDb::new());
        let events = Arc::new(EventBus::new(Level::Debug));
        let mgr = UploadManager::new(test_config(), provider, file_mgr_db.clone(), meta_db, events);

        let path = ApiPath::normalize("/a").unwrap();
        mgr.enqueue(path.clone(), "a".into()).await;
        mgr.cancel(&path).await;
        assert!(file_mgr_db.get_next_upload().await.is_none());
    }

    #[tokio::test]
    async fn encryption_key_seals_chunks_before_the_provider_ever_sees_them() {
        let provider: Arc<dyn Provider> = Arc::new(MemoryProvider::new());
        let path = ApiPath::normalize("/secret.txt").unwrap();
        provider.create_file(&path).await.unwrap();
        let source_path = temp_source("encrypted", b"do not leak this");

        let meta_db: Arc<dyn MetaDb> = Arc::new(InMemoryMetaDb::new());
        meta_db.put(&path, crate::db::ApiMetaMap::new_file("secret".into(), 0)).await;
        let file_mgr_db: Arc<dyn FileMgrDb> = Arc::new(InMemoryFileMgrDb::new());
        let events = Arc::new(EventBus::new(Level::Debug));
        let mut rx = events.subscribe();

        let mut config = Config::new(std::env::temp_dir().join("repertory-upload-test-cache-enc"), 1024 * 1024);
        config.encryption_key = Some([7u8; 32]);
        let mgr = UploadManager::new(Arc::new(config), provider.clone(), file_mgr_db, meta_db, events);
        let handle = mgr.spawn();
        mgr.enqueue(path.clone(), source_path.clone()).await;

        let evt = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert!(matches!(evt, Event::FileUploadCompleted { error: None, .. }));

        let uploaded = provider.read_file(&path, 0, 4096).await.unwrap();
        assert_ne!(uploaded, b"do not leak this");
        assert!(!uploaded.is_empty());

        mgr.stop().await;
        let _ = handle.await;
        let _ = std::fs::remove_file(&source_path);
        let _ = std::fs::remove_file(format!("{source_path}.sealed"));
    }
}
