//! The provider contract (spec.md §6 `i_provider`) and its in-memory
//! reference implementation.

pub mod memory;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ApiError;
use crate::path::ApiPath;
use crate::stop_token::StopToken;

pub use memory::MemoryProvider;

/// Invoked by a provider when it learns of a new item it did not itself
/// create locally (spec.md §9 "break cyclic references" — the provider
/// holds only this owned closure, never a back-pointer to the file
/// manager).
pub type ItemAddedCallback = Arc<dyn Fn(FilesystemItem) + Send + Sync>;

/// A directory entry as the provider sees it, independent of any local
/// cache metadata.
#[derive(Debug, Clone)]
pub struct FilesystemItem {
    pub api_path: ApiPath,
    pub directory: bool,
    pub size: u64,
    pub modified: u64,
}

/// The remote object-store contract every drive adapter is built on
/// (spec.md §6). Implementations own no local cache state — that's the
/// file manager's job — they only know how to list, stat, and move bytes.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn get_item(&self, path: &ApiPath) -> Result<FilesystemItem, ApiError>;
    async fn get_directory_items(&self, path: &ApiPath) -> Result<Vec<FilesystemItem>, ApiError>;

    async fn create_directory(&self, path: &ApiPath) -> Result<(), ApiError>;
    async fn remove_directory(&self, path: &ApiPath) -> Result<(), ApiError>;

    async fn create_file(&self, path: &ApiPath) -> Result<(), ApiError>;
    async fn remove_file(&self, path: &ApiPath) -> Result<(), ApiError>;

    async fn rename_item(&self, from: &ApiPath, to: &ApiPath) -> Result<(), ApiError>;

    /// Reads `[offset, offset+len)` of the remote object's bytes.
    async fn read_file(&self, path: &ApiPath, offset: u64, len: usize) -> Result<Vec<u8>, ApiError>;

    /// Writes `data` at `offset`, extending the object if necessary.
    async fn write_file(&self, path: &ApiPath, offset: u64, data: &[u8]) -> Result<(), ApiError>;

    async fn resize_file(&self, path: &ApiPath, size: u64) -> Result<(), ApiError>;

    /// Whether this backend supports a native rename, as opposed to the
    /// adapter faking one with copy+delete.
    async fn is_rename_supported(&self) -> bool;

    /// Pushes the local cache file at `source_path` to the backend as
    /// `api_path`'s content. The caller guarantees no concurrent write to
    /// `source_path` for the duration of the call; implementations must
    /// observe `stop` periodically and return [`ApiError::CommError`] once
    /// it is set rather than completing the transfer.
    async fn upload_file(&self, api_path: &ApiPath, source_path: &Path, stop: &StopToken) -> Result<(), ApiError>;

    async fn get_pinned_files(&self) -> Vec<ApiPath>;
    async fn get_total_drive_space(&self) -> u64;
    async fn get_used_drive_space(&self) -> u64;

    /// One-shot startup hook: the provider may begin background polling
    /// here and report newly discovered items through `on_item_added`
    /// instead of holding a direct reference to the file manager.
    async fn start(&self, on_item_added: ItemAddedCallback);
    async fn stop(&self);
}
