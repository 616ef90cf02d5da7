//! The drive adapter (spec.md C12, §4.12): the thin layer a host filesystem
//! binding (FUSE, WinFsp) calls into. Concrete OS bindings are out of scope
//! (spec.md non-goals); what this crate provides is the adapter contract
//! and its one concrete implementation, the remote-mount forwarding client,
//! so a host binding has something real to sit on top of.

pub mod remote_adapter;

pub use remote_adapter::RemoteAdapter;

use async_trait::async_trait;

use crate::error::ApiError;
use crate::path::ApiPath;
use crate::provider::FilesystemItem;

/// The operations a host filesystem binding needs, independent of whether
/// they're served by a local [`crate::file_manager::FileManager`] or
/// forwarded over the remote-mount protocol.
#[async_trait]
pub trait DriveAdapter: Send + Sync {
    async fn get_attr(&self, path: &ApiPath) -> Result<FilesystemItem, ApiError>;
    async fn read_dir(&self, path: &ApiPath) -> Result<Vec<FilesystemItem>, ApiError>;
    async fn read(&self, path: &ApiPath, offset: u64, len: usize) -> Result<Vec<u8>, ApiError>;
    async fn write(&self, path: &ApiPath, offset: u64, data: &[u8]) -> Result<(), ApiError>;
    async fn create(&self, path: &ApiPath) -> Result<(), ApiError>;
    async fn remove(&self, path: &ApiPath) -> Result<(), ApiError>;
    async fn mkdir(&self, path: &ApiPath) -> Result<(), ApiError>;
    async fn rmdir(&self, path: &ApiPath) -> Result<(), ApiError>;
    async fn rename(&self, from: &ApiPath, to: &ApiPath) -> Result<(), ApiError>;
    async fn resize(&self, path: &ApiPath, size: u64) -> Result<(), ApiError>;
}
