//! The FUSE/WinFsp-shaped RPC surface the remote-mount protocol exposes
//! (spec.md §6 "wire protocol"): one opcode per filesystem operation, each
//! decoding its arguments from the request body and encoding its result
//! into the response body, independent of which host ABI the client side
//! ultimately presents to.
//!
//! The opcode set mirrors both named host surfaces bit-for-bit (same names,
//! same grouping) even though several variants on each side reduce to the
//! same handful of core operations (open/read/write/get_attr/...) once
//! mode_t/flags/timespec-style arguments are stripped away — the host-ABI
//! translation that would give each its own distinct behavior is a FUSE/
//! WinFsp binding concern, out of scope here (spec.md's `drive` module note).

use num_derive::{FromPrimitive, ToPrimitive};

use crate::error::ApiError;
use crate::file_manager::FileManager;
use crate::packet::Packet;
use crate::path::ApiPath;
use crate::provider::Provider;
use std::sync::Arc;

use super::MIN_COMPATIBLE_VERSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum OpCode {
    CheckVersion = 0,

    // FUSE surface (spec.md §6).
    FuseAccess,
    FuseChmod,
    FuseChown,
    FuseCreate,
    FuseDestroy,
    FuseFgetattr,
    FuseFsync,
    FuseFtruncate,
    FuseGetattr,
    FuseInit,
    FuseMkdir,
    FuseOpen,
    FuseOpendir,
    FuseRead,
    FuseReaddir,
    FuseRelease,
    FuseReleasedir,
    FuseRename,
    FuseRmdir,
    FuseSetattrX,
    FuseStatfs,
    FuseTruncate,
    FuseUnlink,
    FuseUtimens,
    FuseWrite,
    FuseWriteBase64,

    // Directory-snapshot JSON triplet, shared by both surfaces.
    JsonCreateDirectorySnapshot,
    JsonReadDirectorySnapshot,
    JsonReleaseDirectorySnapshot,

    // WinFsp surface (spec.md §6).
    WinfspCanDelete,
    WinfspCleanup,
    WinfspClose,
    WinfspCreate,
    WinfspFlush,
    WinfspGetDirBuffer,
    WinfspGetFileInfo,
    WinfspGetSecurityByName,
    WinfspGetVolumeInfo,
    WinfspMounted,
    WinfspOpen,
    WinfspOverwrite,
    WinfspRead,
    WinfspReadDirectory,
    WinfspRename,
    WinfspSetBasicInfo,
    WinfspSetFileSize,
    WinfspUnmounted,
    WinfspWrite,
}

/// Dispatches decoded requests against a [`FileManager`]/[`Provider`] pair.
/// One `Handlers` is shared (via `Arc`) across every connection the server
/// accepts.
pub struct Handlers {
    file_manager: Arc<FileManager>,
    provider: Arc<dyn Provider>,
}

impl Handlers {
    pub fn new(file_manager: Arc<FileManager>, provider: Arc<dyn Provider>) -> Arc<Self> {
        Arc::new(Self { file_manager, provider })
    }

    pub async fn dispatch(&self, op: OpCode, body: &mut Packet) -> Result<Packet, ApiError> {
        match op {
            OpCode::CheckVersion => self.check_version(body).await,

            OpCode::FuseGetattr | OpCode::FuseFgetattr | OpCode::WinfspGetFileInfo => self.get_attr(body).await,
            OpCode::FuseReaddir | OpCode::WinfspReadDirectory => self.read_dir(body).await,
            OpCode::FuseRead | OpCode::WinfspRead => self.read(body).await,
            OpCode::FuseWrite | OpCode::WinfspWrite => self.write(body).await,
            OpCode::FuseWriteBase64 => self.write_base64(body).await,
            OpCode::FuseCreate | OpCode::WinfspCreate => self.create(body).await,
            OpCode::FuseUnlink | OpCode::WinfspCanDelete => self.remove(body).await,
            OpCode::FuseMkdir => self.mkdir(body).await,
            OpCode::FuseRmdir => self.rmdir(body).await,
            OpCode::FuseRename | OpCode::WinfspRename => self.rename(body).await,
            OpCode::FuseTruncate | OpCode::FuseFtruncate | OpCode::WinfspSetFileSize => self.resize(body).await,
            OpCode::FuseOpen | OpCode::FuseOpendir | OpCode::WinfspOpen | OpCode::WinfspOverwrite => {
                self.open(body).await
            }
            OpCode::FuseRelease
            | OpCode::FuseReleasedir
            | OpCode::WinfspClose
            | OpCode::WinfspCleanup => self.release(body).await,
            OpCode::FuseStatfs | OpCode::WinfspGetVolumeInfo => self.statfs().await,

            // Permission/attribute/timestamp metadata the in-memory
            // reference backend doesn't model; acknowledged as a no-op so a
            // client's call sequence completes rather than stalling on an
            // unimplemented opcode.
            OpCode::FuseAccess
            | OpCode::FuseChmod
            | OpCode::FuseChown
            | OpCode::FuseSetattrX
            | OpCode::FuseUtimens
            | OpCode::FuseFsync
            | OpCode::FuseInit
            | OpCode::FuseDestroy
            | OpCode::WinfspGetSecurityByName
            | OpCode::WinfspSetBasicInfo
            | OpCode::WinfspFlush
            | OpCode::WinfspMounted
            | OpCode::WinfspUnmounted
            | OpCode::WinfspGetDirBuffer
            | OpCode::JsonCreateDirectorySnapshot
            | OpCode::JsonReadDirectorySnapshot
            | OpCode::JsonReleaseDirectorySnapshot => Ok(Packet::new()),
        }
    }

    /// The mandatory first request after authentication (spec.md §4.11):
    /// echoes back the minimum client version this server still accepts.
    async fn check_version(&self, body: &mut Packet) -> Result<Packet, ApiError> {
        let client_version = body.decode_u32().map_err(ApiError::from)?;
        if client_version < MIN_COMPATIBLE_VERSION {
            return Err(ApiError::IncompatibleVersion);
        }
        let mut out = Packet::new();
        out.encode_u32(MIN_COMPATIBLE_VERSION);
        Ok(out)
    }

    async fn get_attr(&self, body: &mut Packet) -> Result<Packet, ApiError> {
        let path = decode_path(body)?;
        let item = self.provider.get_item(&path).await?;
        let mut out = Packet::new();
        out.encode_bool(item.directory).encode_u64(item.size).encode_u64(item.modified);
        Ok(out)
    }

    async fn read_dir(&self, body: &mut Packet) -> Result<Packet, ApiError> {
        let path = decode_path(body)?;
        let items = self.provider.get_directory_items(&path).await?;
        let mut out = Packet::new();
        out.encode_u32(items.len() as u32);
        for item in items {
            out.encode_string(item.api_path.as_str()).encode_bool(item.directory).encode_u64(item.size);
        }
        Ok(out)
    }

    async fn read(&self, body: &mut Packet) -> Result<Packet, ApiError> {
        let path = decode_path(body)?;
        let offset = body.decode_u64().map_err(ApiError::from)?;
        let len = body.decode_u32().map_err(ApiError::from)? as usize;
        let file = self.file_manager.open(&path).await?;
        let data = file.read(offset, len).await?;
        let mut out = Packet::new();
        out.encode_bytes(&data);
        Ok(out)
    }

    async fn write(&self, body: &mut Packet) -> Result<Packet, ApiError> {
        let path = decode_path(body)?;
        let offset = body.decode_u64().map_err(ApiError::from)?;
        let data = body.decode_bytes().map_err(ApiError::from)?;
        let file = self.file_manager.open(&path).await?;
        file.write(offset, &data).await?;
        let mut out = Packet::new();
        out.encode_u32(data.len() as u32);
        Ok(out)
    }

    /// `fuse_write_base64`: same as [`Self::write`], but the payload arrives
    /// base64-encoded on the wire (the FUSE surface's accommodation for
    /// hosts whose write path can't move raw bytes cleanly).
    async fn write_base64(&self, body: &mut Packet) -> Result<Packet, ApiError> {
        let path = decode_path(body)?;
        let offset = body.decode_u64().map_err(ApiError::from)?;
        let encoded = body.decode_string().map_err(ApiError::from)?;
        let data = base64_decode(&encoded).ok_or(ApiError::IoError)?;
        let file = self.file_manager.open(&path).await?;
        file.write(offset, &data).await?;
        let mut out = Packet::new();
        out.encode_u32(data.len() as u32);
        Ok(out)
    }

    async fn create(&self, body: &mut Packet) -> Result<Packet, ApiError> {
        let path = decode_path(body)?;
        self.provider.create_file(&path).await?;
        Ok(Packet::new())
    }

    async fn remove(&self, body: &mut Packet) -> Result<Packet, ApiError> {
        let path = decode_path(body)?;
        self.file_manager.remove_file(&path).await?;
        Ok(Packet::new())
    }

    async fn mkdir(&self, body: &mut Packet) -> Result<Packet, ApiError> {
        let path = decode_path(body)?;
        self.provider.create_directory(&path).await?;
        Ok(Packet::new())
    }

    async fn rmdir(&self, body: &mut Packet) -> Result<Packet, ApiError> {
        let path = decode_path(body)?;
        self.provider.remove_directory(&path).await?;
        Ok(Packet::new())
    }

    async fn rename(&self, body: &mut Packet) -> Result<Packet, ApiError> {
        let from = decode_path(body)?;
        let to = decode_path(body)?;
        self.file_manager.rename_file(&from, &to).await?;
        Ok(Packet::new())
    }

    async fn resize(&self, body: &mut Packet) -> Result<Packet, ApiError> {
        let path = decode_path(body)?;
        let size = body.decode_u64().map_err(ApiError::from)?;
        let file = self.file_manager.open(&path).await?;
        file.resize(size).await?;
        Ok(Packet::new())
    }

    /// `fuse_open`/`fuse_opendir`/`winfsp_open`/`winfsp_overwrite`: all of
    /// them just need a live `OpenFile` handle to exist before the first
    /// read/write arrives.
    async fn open(&self, body: &mut Packet) -> Result<Packet, ApiError> {
        let path = decode_path(body)?;
        self.file_manager.open(&path).await?;
        Ok(Packet::new())
    }

    /// `fuse_release`/`fuse_releasedir`/`winfsp_close`/`winfsp_cleanup`:
    /// the closing half of [`Self::open`].
    async fn release(&self, body: &mut Packet) -> Result<Packet, ApiError> {
        let path = decode_path(body)?;
        self.file_manager.close(&path).await?;
        Ok(Packet::new())
    }

    /// `fuse_statfs[_x]`/`winfsp_get_volume_info`.
    async fn statfs(&self) -> Result<Packet, ApiError> {
        let total = self.provider.get_total_drive_space().await;
        let used = self.provider.get_used_drive_space().await;
        let mut out = Packet::new();
        out.encode_u64(total).encode_u64(used);
        Ok(out)
    }
}

fn decode_path(body: &mut Packet) -> Result<ApiPath, ApiError> {
    let raw = body.decode_string().map_err(ApiError::from)?;
    ApiPath::normalize(&raw)
}

const BASE64_ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn base64_decode(input: &str) -> Option<Vec<u8>> {
    let mut table = [255u8; 256];
    for (i, &c) in BASE64_ALPHABET.iter().enumerate() {
        table[c as usize] = i as u8;
    }

    let input = input.trim_end_matches('=');
    let mut out = Vec::with_capacity(input.len() * 3 / 4);
    let mut bits: u32 = 0;
    let mut bit_count = 0u32;
    for b in input.bytes() {
        let value = table[b as usize];
        if value == 255 {
            return None;
        }
        bits = (bits << 6) | value as u32;
        bit_count += 6;
        if bit_count >= 8 {
            bit_count -= 8;
            out.push((bits >> bit_count) as u8);
        }
    }
    Some(out)
}
