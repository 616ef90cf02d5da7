//! In-memory `i_file_mgr_db` (spec.md §3 `resume_entry`/`upload_entry`/
//! `upload_active_entry`, §4.7).

use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;

use super::FileMgrDb;
use crate::error::ApiError;
use crate::path::ApiPath;

/// Tracks which chunks of a partially-downloaded file are present locally
/// (spec.md §3 `read_state`), so a closed-and-reopened file resumes instead
/// of re-downloading from byte zero.
#[derive(Debug, Clone)]
pub struct ResumeEntry {
    pub path: ApiPath,
    pub source_path: String,
    pub chunk_count: u64,
    pub read_state: Vec<bool>,
}

#[derive(Debug, Clone)]
pub struct UploadEntry {
    pub path: ApiPath,
    pub source_path: String,
}

#[derive(Debug, Clone)]
pub struct UploadActiveEntry {
    pub path: ApiPath,
    pub source_path: String,
    pub started_at: u64,
}

/// `dashmap`-backed resume/upload tables plus a LIFO upload queue.
///
/// The queue is intentionally LIFO, not FIFO: the most recently closed file
/// is the one most likely to be reopened and edited again soon, so
/// uploading it first keeps the remote copy fresh for the common
/// edit-save-edit-save pattern (kept as specified, not a redesign).
pub struct InMemoryFileMgrDb {
    resume: DashMap<ApiPath, ResumeEntry>,
    upload: DashMap<ApiPath, UploadEntry>,
    upload_active: DashMap<ApiPath, UploadActiveEntry>,
    upload_order: Mutex<Vec<ApiPath>>,
}

impl Default for InMemoryFileMgrDb {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryFileMgrDb {
    pub fn new() -> Self {
        Self {
            resume: DashMap::new(),
            upload: DashMap::new(),
            upload_active: DashMap::new(),
            upload_order: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl FileMgrDb for InMemoryFileMgrDb {
    async fn add_resume(&self, entry: ResumeEntry) {
        self.resume.insert(entry.path.clone(), entry);
    }

    async fn get_resume(&self, path: &ApiPath) -> Option<ResumeEntry> {
        self.resume.get(path).map(|e| e.clone())
    }

    async fn remove_resume(&self, path: &ApiPath) -> Option<ResumeEntry> {
        self.resume.remove(path).map(|(_, v)| v)
    }

    async fn rename_resume(&self, from: &ApiPath, to: &ApiPath) -> Result<(), ApiError> {
        let Some((_, mut entry)) = self.resume.remove(from) else {
            return Err(ApiError::NotFound);
        };
        entry.path = to.clone();
        self.resume.insert(to.clone(), entry);
        Ok(())
    }

    async fn add_upload(&self, entry: UploadEntry) {
        let path = entry.path.clone();
        let replaced = self.upload.insert(path.clone(), entry).is_some();
        let mut order = self.upload_order.lock().unwrap();
        if replaced {
            order.retain(|p| p != &path);
        }
        order.push(path);
    }

    async fn get_next_upload(&self) -> Option<UploadEntry> {
        let path = {
            let mut order = self.upload_order.lock().unwrap();
            order.pop()?
        };
        self.upload.remove(&path).map(|(_, v)| v)
    }

    async fn remove_upload(&self, path: &ApiPath) -> Option<UploadEntry> {
        let removed = self.upload.remove(path).map(|(_, v)| v);
        if removed.is_some() {
            self.upload_order.lock().unwrap().retain(|p| p != path);
        }
        removed
    }

    async fn set_upload_active(&self, entry: UploadActiveEntry) {
        self.upload_active.insert(entry.path.clone(), entry);
    }

    async fn clear_upload_active(&self, path: &ApiPath) {
        self.upload_active.remove(path);
    }

    async fn list_upload_active(&self) -> Vec<UploadActiveEntry> {
        self.upload_active.iter().map(|e| e.clone()).collect()
    }

    async fn is_upload_pending(&self, path: &ApiPath) -> bool {
        self.upload.contains_key(path) || self.upload_active.contains_key(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> ApiPath {
        ApiPath::normalize(s).unwrap()
    }

    #[tokio::test]
    async fn get_next_upload_is_lifo() {
        let db = InMemoryFileMgrDb::new();
        db.add_upload(UploadEntry { path: path("/a"), source_path: "a".into() }).await;
        db.add_upload(UploadEntry { path: path("/b"), source_path: "b".into() }).await;
        db.add_upload(UploadEntry { path: path("/c"), source_path: "c".into() }).await;

        assert_eq!(db.get_next_upload().await.unwrap().path, path("/c"));
        assert_eq!(db.get_next_upload().await.unwrap().path, path("/b"));
        assert_eq!(db.get_next_upload().await.unwrap().path, path("/a"));
        assert!(db.get_next_upload().await.is_none());
    }

    #[tokio::test]
    async fn re_adding_a_queued_path_moves_it_to_the_top() {
        let db = InMemoryFileMgrDb::new();
        db.add_upload(UploadEntry { path: path("/a"), source_path: "a".into() }).await;
        db.add_upload(UploadEntry { path: path("/b"), source_path: "b".into() }).await;
        db.add_upload(UploadEntry { path: path("/a"), source_path: "a2".into() }).await;

        let next = db.get_next_upload().await.unwrap();
        assert_eq!(next.path, path("/a"));
        assert_eq!(next.source_path, "a2");
        assert_eq!(db.get_next_upload().await.unwrap().path, path("/b"));
    }

    #[tokio::test]
    async fn upload_active_survives_as_a_crash_recovery_list() {
        let db = InMemoryFileMgrDb::new();
        db.set_upload_active(UploadActiveEntry { path: path("/a"), source_path: "a".into(), started_at: 1 }).await;
        assert_eq!(db.list_upload_active().await.len(), 1);
        db.clear_upload_active(&path("/a")).await;
        assert!(db.list_upload_active().await.is_empty());
    }

    #[tokio::test]
    async fn is_upload_pending_covers_both_queued_and_active() {
        let db = InMemoryFileMgrDb::new();
        assert!(!db.is_upload_pending(&path("/a")).await);

        db.add_upload(UploadEntry { path: path("/a"), source_path: "a".into() }).await;
        assert!(db.is_upload_pending(&path("/a")).await);

        db.get_next_upload().await;
        assert!(!db.is_upload_pending(&path("/a")).await);

        db.set_upload_active(UploadActiveEntry { path: path("/a"), source_path: "a".into(), started_at: 1 }).await;
        assert!(db.is_upload_pending(&path("/a")).await);
    }
}
