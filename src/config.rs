//! Strongly-typed, immutable-after-construction configuration.
//!
//! The original design reads a JSON-merged `app_config` shared by many
//! components; CLI parsing and config-file loading are out of scope here; a
//! single [`Config`] built once and handed around by `Arc` replaces it, as
//! spec.md's REDESIGN FLAGS direct.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::events::Level;

/// Policy eviction uses to pick which clean, closed files to reclaim first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    OldestAccess,
    LargestFile,
}

/// How an open file materializes provider bytes locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadType {
    /// Lazy, on-read chunk fetch with full local caching.
    Default,
    /// No local cache; reads pass through the provider per-range.
    Direct,
    /// Sequential streaming with eviction behind the read head.
    RingBuffer,
}

/// Argon2id memory-cost enum (spec.md's `kdf_config.memlimit`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KdfMemLimit {
    Interactive,
    Moderate,
    Sensitive,
}

impl KdfMemLimit {
    pub fn kib(self) -> u32 {
        match self {
            KdfMemLimit::Interactive => 64 * 1024,
            KdfMemLimit::Moderate => 256 * 1024,
            KdfMemLimit::Sensitive => 1024 * 1024,
        }
    }

    /// Stable on-wire/on-header discriminant (part of `kdf_config`'s 40-byte
    /// header), independent of enum declaration order.
    pub fn level(self) -> u8 {
        match self {
            KdfMemLimit::Interactive => 1,
            KdfMemLimit::Moderate => 2,
            KdfMemLimit::Sensitive => 3,
        }
    }

    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            1 => Some(KdfMemLimit::Interactive),
            2 => Some(KdfMemLimit::Moderate),
            3 => Some(KdfMemLimit::Sensitive),
            _ => None,
        }
    }
}

/// Argon2id time-cost enum (spec.md's `kdf_config.opslimit`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KdfOpsLimit {
    Interactive,
    Moderate,
    Sensitive,
}

impl KdfOpsLimit {
    pub fn iterations(self) -> u32 {
        match self {
            KdfOpsLimit::Interactive => 2,
            KdfOpsLimit::Moderate => 3,
            KdfOpsLimit::Sensitive => 4,
        }
    }

    pub fn level(self) -> u8 {
        match self {
            KdfOpsLimit::Interactive => 1,
            KdfOpsLimit::Moderate => 2,
            KdfOpsLimit::Sensitive => 3,
        }
    }

    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            1 => Some(KdfOpsLimit::Interactive),
            2 => Some(KdfOpsLimit::Moderate),
            3 => Some(KdfOpsLimit::Sensitive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KdfParams {
    pub memlimit: KdfMemLimit,
    pub opslimit: KdfOpsLimit,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self { memlimit: KdfMemLimit::Moderate, opslimit: KdfOpsLimit::Moderate }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EvictionConfig {
    pub policy: EvictionPolicy,
    pub delay: Duration,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self { policy: EvictionPolicy::OldestAccess, delay: Duration::from_secs(30) }
    }
}

/// Settings for the optional remote-mount packet server/client.
#[derive(Debug, Clone)]
pub struct RemoteMountConfig {
    pub bind_addr: SocketAddr,
    pub token: String,
    pub pool_size: usize,
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
    pub recv_timeout: Duration,
    /// Idle connections held by the client pool longer than this are
    /// reclaimed by `remove_expired`. Clamped to a 5 second minimum.
    pub idle_expiry: Duration,
}

impl RemoteMountConfig {
    pub fn idle_expiry_clamped(&self) -> Duration {
        self.idle_expiry.max(Duration::from_secs(5))
    }
}

/// The top-level, immutable configuration struct threaded explicitly
/// through every component that needs it.
#[derive(Debug, Clone)]
pub struct Config {
    pub cache_dir: PathBuf,
    pub max_cache_size_bytes: u64,
    /// Unit of local cache residency (spec.md §3 `chunk`). Power of two.
    pub chunk_size: u64,
    /// Plaintext unit of the chunk-AEAD framing (spec.md §3 `data_chunk_size`).
    pub data_chunk_size: u32,
    pub eviction: EvictionConfig,
    pub download_type: DownloadType,
    pub ring_buffer_window_chunks: usize,
    pub remote_mount: Option<RemoteMountConfig>,
    pub kdf: KdfParams,
    pub event_level: Level,
    /// When set, the upload manager seals every chunk with this key (spec.md
    /// C3's "encrypt passthrough") before handing the file to the provider,
    /// regardless of which concrete provider is mounted. `None` uploads the
    /// cache file as-is.
    pub encryption_key: Option<[u8; 32]>,
}

impl Config {
    pub fn new(cache_dir: PathBuf, max_cache_size_bytes: u64) -> Self {
        Self {
            cache_dir,
            max_cache_size_bytes,
            chunk_size: 1024 * 1024,
            data_chunk_size: 128 * 1024,
            eviction: EvictionConfig::default(),
            download_type: DownloadType::Default,
            ring_buffer_window_chunks: 8,
            remote_mount: None,
            kdf: KdfParams::default(),
            event_level: Level::Info,
            encryption_key: None,
        }
    }
}
