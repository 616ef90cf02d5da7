//! Metadata store contracts (spec.md C4, §4.4) and their in-memory
//! implementation — the only concrete backend this crate ships, since
//! RocksDB/SQLite selection is explicitly out of scope.

mod file_mgr_db;
mod meta_db;

pub use file_mgr_db::{InMemoryFileMgrDb, ResumeEntry, UploadActiveEntry, UploadEntry};
pub use meta_db::{ApiMetaMap, InMemoryMetaDb};

use async_trait::async_trait;

use crate::error::ApiError;
use crate::path::ApiPath;

/// The `meta_db` contract: api_path-keyed metadata with an atomic rename
/// (spec.md invariant 9 — rename updates the key without a remove+insert
/// window visible to a concurrent reader).
#[async_trait]
pub trait MetaDb: Send + Sync {
    async fn get(&self, path: &ApiPath) -> Option<ApiMetaMap>;
    async fn put(&self, path: &ApiPath, meta: ApiMetaMap);
    async fn remove(&self, path: &ApiPath) -> Option<ApiMetaMap>;
    /// Atomically moves metadata from `from` to `to`; fails with
    /// `AlreadyExists` if `to` is occupied, `NotFound` if `from` is absent.
    async fn rename(&self, from: &ApiPath, to: &ApiPath) -> Result<(), ApiError>;
    async fn source_path_to_api_path(&self, source_path: &str) -> Option<ApiPath>;
    async fn set_pinned(&self, path: &ApiPath, pinned: bool) -> Result<(), ApiError>;
}

/// The `i_file_mgr_db` contract: resume/upload bookkeeping that survives a
/// crash mid-upload (spec.md §3 `resume_entry`/`upload_entry`/
/// `upload_active_entry`).
#[async_trait]
pub trait FileMgrDb: Send + Sync {
    async fn add_resume(&self, entry: ResumeEntry);
    async fn get_resume(&self, path: &ApiPath) -> Option<ResumeEntry>;
    async fn remove_resume(&self, path: &ApiPath) -> Option<ResumeEntry>;
    async fn rename_resume(&self, from: &ApiPath, to: &ApiPath) -> Result<(), ApiError>;

    /// Enqueues `entry`, replacing any existing queued entry for the same
    /// path in place (spec.md: "at most one queued upload per path").
    async fn add_upload(&self, entry: UploadEntry);
    /// Pops the most recently enqueued entry (LIFO by design, spec.md §4.7).
    async fn get_next_upload(&self) -> Option<UploadEntry>;
    async fn remove_upload(&self, path: &ApiPath) -> Option<UploadEntry>;

    async fn set_upload_active(&self, entry: UploadActiveEntry);
    async fn clear_upload_active(&self, path: &ApiPath);
    /// Entries left over from a prior process (crash recovery, spec.md §4.7).
    async fn list_upload_active(&self) -> Vec<UploadActiveEntry>;

    /// True if `path` is queued or currently uploading. Callers that must
    /// never act on a file with unpushed writes (remove, evict) check this
    /// alongside the open-files map (spec.md invariant: "never evict a
    /// dirty file").
    async fn is_upload_pending(&self, path: &ApiPath) -> bool;
}
