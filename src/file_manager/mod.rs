//! The file manager (spec.md C8, §4.8): owns every open file handle,
//! fronts the provider with the local chunk cache, and wires the upload
//! manager and eviction sweep together.

pub mod eviction;
pub mod open_file;
pub mod upload;

pub use eviction::Eviction;
pub use open_file::OpenFile;
pub use upload::{Upload, UploadManager};

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::cache_size_mgr::CacheSizeMgr;
use crate::config::Config;
use crate::db::{ApiMetaMap, FileMgrDb, MetaDb};
use crate::error::ApiError;
use crate::events::{Event, EventBus};
use crate::path::ApiPath;
use crate::provider::Provider;

/// Owns every currently-open [`OpenFile`] and coordinates close, rename,
/// and remove against the provider and the metadata store. Mirrors the
/// original `file_manager`'s `open_file_mtx_`-guarded handle map, but one
/// `tokio::sync::Mutex<HashMap<..>>` instead of a raw mutex plus map.
pub struct FileManager {
    config: Arc<Config>,
    provider: Arc<dyn Provider>,
    meta_db: Arc<dyn MetaDb>,
    file_mgr_db: Arc<dyn FileMgrDb>,
    cache_size: Arc<CacheSizeMgr>,
    events: Arc<EventBus>,
    open_files: Mutex<HashMap<ApiPath, Arc<OpenFile>>>,
    upload_manager: Arc<UploadManager>,
}

impl FileManager {
    pub fn new(
        config: Arc<Config>,
        provider: Arc<dyn Provider>,
        meta_db: Arc<dyn MetaDb>,
        file_mgr_db: Arc<dyn FileMgrDb>,
        cache_size: Arc<CacheSizeMgr>,
        events: Arc<EventBus>,
    ) -> Arc<Self> {
        let upload_manager = UploadManager::new(
            config.clone(),
            provider.clone(),
            file_mgr_db.clone(),
            meta_db.clone(),
            events.clone(),
        );
        Arc::new(Self {
            config,
            provider,
            meta_db,
            file_mgr_db,
            cache_size,
            events,
            open_files: Mutex::new(HashMap::new()),
            upload_manager,
        })
    }

    pub fn upload_manager(&self) -> &Arc<UploadManager> {
        &self.upload_manager
    }

    /// Opens `path`, creating a fresh [`OpenFile`] if it isn't already
    /// open, or returning the existing shared handle (spec.md invariant:
    /// "at most one `OpenFile` per path").
    pub async fn open(&self, path: &ApiPath) -> Result<Arc<OpenFile>, ApiError> {
        let mut open_files = self.open_files.lock().await;
        if let Some(existing) = open_files.get(path) {
            return Ok(existing.clone());
        }

        let item = self.provider.get_item(path).await?;
        if item.directory {
            return Err(ApiError::IsADirectory);
        }

        let meta = self.meta_db.get(path).await.unwrap_or_else(|| ApiMetaMap::new_file(String::new(), item.size));
        let handle = OpenFile::open(
            path.clone(),
            item.size,
            self.config.clone(),
            self.provider.clone(),
            self.file_mgr_db.clone(),
            self.cache_size.clone(),
            self.events.clone(),
        )
        .await?;
        self.meta_db.put(path, meta).await;
        open_files.insert(path.clone(), handle.clone());
        Ok(handle)
    }

    /// Closes `path` if it has no other references and queues an upload
    /// if it was modified (spec.md §4.7-§4.8 handoff between C6/C7).
    pub async fn close(&self, path: &ApiPath) -> Result<(), ApiError> {
        let mut open_files = self.open_files.lock().await;
        let Some(handle) = open_files.get(path).cloned() else {
            return Ok(());
        };

        // Only the file manager's own map and this call hold a strong
        // reference once callers drop theirs; two (map + local clone) is
        // the "no other users" threshold.
        if Arc::strong_count(&handle) > 2 {
            return Ok(());
        }

        // Queue the upload before dropping from the map, not after: once
        // the path is gone from `open_files`, eviction considers it a
        // candidate, and a gap between "closed" and "upload queued" would
        // let a dirty file be evicted in between.
        let modified = handle.is_modified();
        if modified {
            self.upload_manager.enqueue(path.clone(), handle.source_path().to_string()).await;
        }
        open_files.remove(path);
        drop(open_files);
        Ok(())
    }

    /// Closes every open file whose last activity exceeds `timeout`
    /// (spec.md §4.8 "close_timed_out_files").
    pub async fn close_timed_out_files(&self, timeout: std::time::Duration) {
        let candidates: Vec<ApiPath> = {
            let open_files = self.open_files.lock().await;
            open_files
                .iter()
                .filter(|(_, f)| f.idle_for() >= timeout && Arc::strong_count(f) <= 2)
                .map(|(p, _)| p.clone())
                .collect()
        };
        for path in candidates {
            let _ = self.close(&path).await;
        }
    }

    pub async fn rename_file(&self, from: &ApiPath, to: &ApiPath) -> Result<(), ApiError> {
        self.provider.rename_item(from, to).await?;
        self.meta_db.rename(from, to).await?;
        let _ = self.file_mgr_db.rename_resume(from, to).await;

        let mut open_files = self.open_files.lock().await;
        if let Some(handle) = open_files.remove(from) {
            handle.set_path(to.clone()).await;
            open_files.insert(to.clone(), handle);
        }
        Ok(())
    }

    pub async fn rename_directory(&self, from: &ApiPath, to: &ApiPath) -> Result<(), ApiError> {
        self.provider.rename_item(from, to).await?;
        self.meta_db.rename(from, to).await
    }

    /// Removes a file that must not currently be open (spec.md invariant
    /// 10: "remove_file fails while the path is open"). A file with a
    /// queued or in-flight upload is treated the same way: its local writes
    /// haven't reached the provider yet, so deleting it now would silently
    /// drop data the caller still expects to land remotely.
    pub async fn remove_file(&self, path: &ApiPath) -> Result<(), ApiError> {
        {
            let open_files = self.open_files.lock().await;
            if open_files.contains_key(path) {
                return Err(ApiError::PermissionDenied);
            }
        }
        if self.file_mgr_db.is_upload_pending(path).await {
            return Err(ApiError::PermissionDenied);
        }
        self.provider.remove_file(path).await?;
        self.meta_db.remove(path).await;
        self.file_mgr_db.remove_upload(path).await;
        Ok(())
    }

    /// Evicts a clean, closed file's local cache without touching the
    /// remote copy (spec.md C9, invariant: "never evict a dirty file" —
    /// a file that is open, modified, or has a pending/active upload is
    /// never a candidate).
    pub async fn evict_file(&self, path: &ApiPath) -> Result<(), ApiError> {
        if self.is_processing(path).await {
            return Err(ApiError::PermissionDenied);
        }
        self.events.raise(Event::FilesystemItemEvicted { api_path: path.clone() });
        Ok(())
    }

    /// True if `path` is open, or has writes not yet pushed to the
    /// provider — the combined "do not touch" state eviction and removal
    /// both gate on.
    pub async fn is_processing(&self, path: &ApiPath) -> bool {
        if self.open_files.lock().await.contains_key(path) {
            return true;
        }
        self.file_mgr_db.is_upload_pending(path).await
    }

    pub async fn get_stored_downloads(&self) -> Vec<ApiPath> {
        self.open_files.lock().await.keys().cloned().collect()
    }
}
