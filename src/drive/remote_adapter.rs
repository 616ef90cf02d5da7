//! A [`DriveAdapter`] that forwards every operation over the remote-mount
//! packet protocol via a [`ClientPool`], so a host binding on one machine
//! can mount a filesystem served by a `remote::Server` on another.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use super::DriveAdapter;
use crate::error::ApiError;
use crate::packet::Packet;
use crate::path::ApiPath;
use crate::provider::FilesystemItem;
use crate::remote::{ClientPool, OpCode};

pub struct RemoteAdapter {
    pool: Arc<ClientPool>,
    client_id: u32,
    next_thread_id: AtomicU32,
}

impl RemoteAdapter {
    pub fn new(pool: Arc<ClientPool>, client_id: u32) -> Self {
        Self { pool, client_id, next_thread_id: AtomicU32::new(0) }
    }

    fn thread_id(&self) -> u32 {
        self.next_thread_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn call(&self, op: OpCode, body: Packet) -> Result<Packet, ApiError> {
        self.pool.call(self.client_id, self.thread_id(), op, body).await
    }
}

fn encode_path(path: &ApiPath) -> Packet {
    let mut p = Packet::new();
    p.encode_string(path.as_str());
    p
}

#[async_trait]
impl DriveAdapter for RemoteAdapter {
    async fn get_attr(&self, path: &ApiPath) -> Result<FilesystemItem, ApiError> {
        let mut resp = self.call(OpCode::FuseGetattr, encode_path(path)).await?;
        let directory = resp.decode_bool().map_err(ApiError::from)?;
        let size = resp.decode_u64().map_err(ApiError::from)?;
        let modified = resp.decode_u64().map_err(ApiError::from)?;
        Ok(FilesystemItem { api_path: path.clone(), directory, size, modified })
    }

    async fn read_dir(&self, path: &ApiPath) -> Result<Vec<FilesystemItem>, ApiError> {
        let mut resp = self.call(OpCode::FuseReaddir, encode_path(path)).await?;
        let count = resp.decode_u32().map_err(ApiError::from)?;
        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let raw = resp.decode_string().map_err(ApiError::from)?;
            let directory = resp.decode_bool().map_err(ApiError::from)?;
            let size = resp.decode_u64().map_err(ApiError::from)?;
            items.push(FilesystemItem { api_path: ApiPath::normalize(&raw)?, directory, size, modified: 0 });
        }
        Ok(items)
    }

    async fn read(&self, path: &ApiPath, offset: u64, len: usize) -> Result<Vec<u8>, ApiError> {
        let mut body = encode_path(path);
        body.encode_u64(offset).encode_u32(len as u32);
        let mut resp = self.call(OpCode::FuseRead, body).await?;
        resp.decode_bytes().map_err(ApiError::from)
    }

    async fn write(&self, path: &ApiPath, offset: u64, data: &[u8]) -> Result<(), ApiError> {
        let mut body = encode_path(path);
        body.encode_u64(offset).encode_bytes(data);
        self.call(OpCode::FuseWrite, body).await?;
        Ok(())
    }

    async fn create(&self, path: &ApiPath) -> Result<(), ApiError> {
        self.call(OpCode::FuseCreate, encode_path(path)).await?;
        Ok(())
    }

    async fn remove(&self, path: &ApiPath) -> Result<(), ApiError> {
        self.call(OpCode::FuseUnlink, encode_path(path)).await?;
        Ok(())
    }

    async fn mkdir(&self, path: &ApiPath) -> Result<(), ApiError> {
        self.call(OpCode::FuseMkdir, encode_path(path)).await?;
        Ok(())
    }

    async fn rmdir(&self, path: &ApiPath) -> Result<(), ApiError> {
        self.call(OpCode::FuseRmdir, encode_path(path)).await?;
        Ok(())
    }

    async fn rename(&self, from: &ApiPath, to: &ApiPath) -> Result<(), ApiError> {
        let mut body = encode_path(from);
        body.encode_string(to.as_str());
        self.call(OpCode::FuseRename, body).await?;
        Ok(())
    }

    async fn resize(&self, path: &ApiPath, size: u64) -> Result<(), ApiError> {
        let mut body = encode_path(path);
        body.encode_u64(size);
        self.call(OpCode::FuseTruncate, body).await?;
        Ok(())
    }
}
