//! An open file handle (spec.md C6, §3 `open_file_data`/`i_open_file`).
//!
//! Bridges a single api_path between the provider (source of truth) and a
//! real on-disk cache file under `config.cache_dir`, tracking which chunks
//! are present (`read_state`) so a read past the cached region triggers
//! exactly one fetch and a read inside it never touches the provider.
//! Writes land only in the local cache file; pushing them to the provider
//! is the upload manager's job once the file closes (spec.md C7), not
//! something `write()` does synchronously.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, RwLock};

use crate::cache_size_mgr::CacheSizeMgr;
use crate::config::{Config, DownloadType};
use crate::db::{FileMgrDb, ResumeEntry};
use crate::error::ApiError;
use crate::events::{Event, EventBus};
use crate::path::ApiPath;
use crate::provider::Provider;

/// A single open file. Shared by every caller that currently has the path
/// open — spec.md's "at most one `OpenFile` per path" invariant lives in
/// `FileManager`, which hands out clones of this `Arc`.
pub struct OpenFile {
    path: RwLock<ApiPath>,
    config: Arc<Config>,
    provider: Arc<dyn Provider>,
    file_mgr_db: Arc<dyn FileMgrDb>,
    cache_size: Arc<CacheSizeMgr>,
    events: Arc<EventBus>,
    cache_path: PathBuf,
    file: Mutex<tokio::fs::File>,
    /// One entry per chunk; `true` once that chunk has been fetched from
    /// the provider into the cache file (spec.md §3 `read_state`).
    read_state: Mutex<Vec<bool>>,
    size: AtomicU64,
    modified: AtomicBool,
    last_active: Mutex<Instant>,
}

/// Where a file's local cache content lives on disk: `cache/<xx>/<hash>`,
/// sharded by the first byte of a keyed hash of its api_path so a single
/// directory never holds every cached file (spec.md §6 on-disk layout).
fn cache_file_path(config: &Config, api_path: &ApiPath) -> PathBuf {
    use blake2::digest::{Update, VariableOutput};
    use blake2::Blake2bVar;

    let mut hasher = Blake2bVar::new(16).expect("16 is a valid BLAKE2b output length");
    hasher.update(api_path.as_str().as_bytes());
    let mut out = [0u8; 16];
    hasher.finalize_variable(&mut out).expect("output buffer matches requested length");
    let hex: String = out.iter().map(|b| format!("{b:02x}")).collect();

    config.cache_dir.join("cache").join(&hex[..2]).join(hex)
}

impl OpenFile {
    /// Opens (or resumes) the on-disk cache file for `path`. Reuses a prior
    /// `read_state` from `file_mgr_db` when the resume row still points at
    /// this same cache file and chunk layout, so a process restart doesn't
    /// force a full re-download.
    pub async fn open(
        path: ApiPath,
        size: u64,
        config: Arc<Config>,
        provider: Arc<dyn Provider>,
        file_mgr_db: Arc<dyn FileMgrDb>,
        cache_size: Arc<CacheSizeMgr>,
        events: Arc<EventBus>,
    ) -> Result<Arc<Self>, ApiError> {
        let cache_path = cache_file_path(&config, &path);
        if let Some(parent) = cache_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|_| ApiError::IoError)?;
        }
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&cache_path)
            .await
            .map_err(|_| ApiError::IoError)?;

        let chunks = chunk_count(size, config.chunk_size);
        let source_path_str = cache_path.to_string_lossy().into_owned();
        let read_state = match file_mgr_db.get_resume(&path).await {
            Some(resume) if resume.source_path == source_path_str && resume.chunk_count as usize == chunks => {
                resume.read_state
            }
            _ => vec![false; chunks],
        };

        let current_len = file.metadata().await.map_err(|_| ApiError::IoError)?.len();
        if current_len < size {
            file.set_len(size).await.map_err(|_| ApiError::IoError)?;
        }

        Ok(Arc::new(Self {
            path: RwLock::new(path),
            config,
            provider,
            file_mgr_db,
            cache_size,
            events,
            cache_path,
            file: Mutex::new(file),
            read_state: Mutex::new(read_state),
            size: AtomicU64::new(size),
            modified: AtomicBool::new(false),
            last_active: Mutex::new(Instant::now()),
        }))
    }

    pub async fn path(&self) -> ApiPath {
        self.path.read().await.clone()
    }

    pub async fn set_path(&self, path: ApiPath) {
        *self.path.write().await = path;
    }

    /// Local cache file path — what the upload manager hands the provider
    /// as `source_path` once this file closes (spec.md §4.7).
    pub fn source_path(&self) -> &str {
        self.cache_path.to_str().unwrap_or("")
    }

    pub fn size(&self) -> u64 {
        self.size.load(Ordering::SeqCst)
    }

    pub fn is_modified(&self) -> bool {
        self.modified.load(Ordering::SeqCst)
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active.try_lock().map(|g| g.elapsed()).unwrap_or_default()
    }

    async fn touch(&self) {
        *self.last_active.lock().await = Instant::now();
    }

    async fn read_at(&self, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len];
        let mut total = 0;
        while total < len {
            let n = file.read(&mut buf[total..]).await?;
            if n == 0 {
                break;
            }
            total += n;
        }
        buf.truncate(total);
        Ok(buf)
    }

    async fn write_at(&self, offset: u64, data: &[u8]) -> std::io::Result<()> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn persist_resume(&self) {
        let read_state = self.read_state.lock().await.clone();
        let path = self.path().await;
        self.file_mgr_db
            .add_resume(ResumeEntry {
                path,
                source_path: self.cache_path.to_string_lossy().into_owned(),
                chunk_count: read_state.len() as u64,
                read_state,
            })
            .await;
    }

    /// Ensures every chunk overlapping `[offset, offset+len)` is present in
    /// the local cache file, fetching any missing ones from the provider.
    /// In `ring_buffer` mode, fetching a chunk also evicts chunks that have
    /// fallen behind the configured window.
    async fn ensure_range(&self, path: &ApiPath, offset: u64, len: usize) -> Result<(), ApiError> {
        let chunk_size = self.config.chunk_size;
        let first = offset / chunk_size;
        let last = (offset + len as u64).saturating_sub(1) / chunk_size;

        let mut read_state = self.read_state.lock().await;
        for chunk_index in first..=last {
            let idx = chunk_index as usize;
            if idx >= read_state.len() || read_state[idx] {
                continue;
            }
            let chunk_start = chunk_index * chunk_size;
            let chunk_len = chunk_size.min(self.size().saturating_sub(chunk_start)) as usize;
            if chunk_len == 0 {
                read_state[idx] = true;
                continue;
            }
            let data = self.provider.read_file(path, chunk_start, chunk_len).await?;
            self.write_at(chunk_start, &data).await.map_err(|_| ApiError::IoError)?;
            read_state[idx] = true;
            self.cache_size.expand(data.len() as u64).await?;

            if matches!(self.config.download_type, DownloadType::RingBuffer) {
                let window = self.config.ring_buffer_window_chunks as u64;
                if chunk_index >= window {
                    for behind in 0..(chunk_index - window) {
                        let behind_idx = behind as usize;
                        if behind_idx < read_state.len() && read_state[behind_idx] {
                            read_state[behind_idx] = false;
                            let behind_start = behind * chunk_size;
                            let behind_len = chunk_size.min(self.size().saturating_sub(behind_start));
                            self.cache_size.shrink(behind_len).await;
                        }
                    }
                }
            }
        }
        drop(read_state);
        self.persist_resume().await;
        Ok(())
    }

    pub async fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>, ApiError> {
        self.touch().await;
        let path = self.path().await;
        if matches!(self.config.download_type, DownloadType::Direct) {
            return self.provider.read_file(&path, offset, len).await;
        }

        self.ensure_range(&path, offset, len).await?;
        let clamped = len.min(self.size().saturating_sub(offset.min(self.size())) as usize);
        self.read_at(offset, clamped).await.map_err(|_| ApiError::IoError)
    }

    /// Writes to the local cache file only; the provider is never touched
    /// here (spec.md C6/C7 handoff — an upload is queued on close).
    pub async fn write(&self, offset: u64, data: &[u8]) -> Result<(), ApiError> {
        self.touch().await;
        if matches!(self.config.download_type, DownloadType::Direct) {
            return Err(ApiError::NotSupported);
        }

        let end = offset + data.len() as u64;
        self.write_at(offset, data).await.map_err(|_| ApiError::IoError)?;

        {
            let mut read_state = self.read_state.lock().await;
            let chunk_size = self.config.chunk_size;
            let first = offset / chunk_size;
            let last = end.saturating_sub(1) / chunk_size;
            for chunk_index in first..=last {
                let idx = chunk_index as usize;
                if idx >= read_state.len() {
                    read_state.resize(idx + 1, false);
                }
                read_state[idx] = true;
            }
        }

        if end > self.size() {
            self.size.store(end, Ordering::SeqCst);
        }
        self.modified.store(true, Ordering::SeqCst);
        self.persist_resume().await;
        Ok(())
    }

    pub async fn resize(&self, size: u64) -> Result<(), ApiError> {
        self.touch().await;
        {
            let file = self.file.lock().await;
            file.set_len(size).await.map_err(|_| ApiError::IoError)?;
        }
        {
            let mut read_state = self.read_state.lock().await;
            read_state.resize(chunk_count(size, self.config.chunk_size), true);
        }
        self.size.store(size, Ordering::SeqCst);
        self.modified.store(true, Ordering::SeqCst);
        self.persist_resume().await;
        Ok(())
    }

    /// Forces every chunk to be fetched into the local cache immediately,
    /// ahead of any read that would have triggered it lazily.
    pub async fn force_download(&self) -> Result<(), ApiError> {
        let path = self.path().await;
        let size = self.size();
        if size > 0 {
            self.ensure_range(&path, 0, size as usize).await?;
        }
        Ok(())
    }

    /// Runs `f` against the full current cache contents, for callers that
    /// need a raw byte-slice view rather than a ranged read.
    pub async fn native_operation(&self, f: impl FnOnce(&[u8]) -> Result<(), ApiError> + Send) -> Result<(), ApiError> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(0)).await.map_err(|_| ApiError::IoError)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await.map_err(|_| ApiError::IoError)?;
        f(&buf)
    }

    pub async fn close(&self) {
        self.events.raise(Event::ProviderError { api_path: self.path().await, error: ApiError::Success });
    }
}

fn chunk_count(size: u64, chunk_size: u64) -> usize {
    if size == 0 {
        0
    } else {
        ((size + chunk_size - 1) / chunk_size) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryFileMgrDb;
    use crate::events::Level;
    use crate::provider::MemoryProvider;

    async fn fixture(size: u64) -> (Arc<OpenFile>, ApiPath, PathBuf) {
        let provider: Arc<dyn Provider> = Arc::new(MemoryProvider::new());
        let path = ApiPath::normalize("/f").unwrap();
        provider.create_file(&path).await.unwrap();
        if size > 0 {
            provider.write_file(&path, 0, &vec![0u8; size as usize]).await.unwrap();
        }
        let cache_dir = std::env::temp_dir().join(format!("repertory-open-file-test-{}", uniq()));
        let config = Arc::new(Config::new(cache_dir.clone(), 1 << 30));
        let events = Arc::new(EventBus::new(Level::Debug));
        let cache_size = Arc::new(CacheSizeMgr::new(0, 1 << 30, events.clone(), Arc::new(AlwaysOne)));
        let file_mgr_db: Arc<dyn FileMgrDb> = Arc::new(InMemoryFileMgrDb::new());
        let file = OpenFile::open(path.clone(), size, config, provider, file_mgr_db, cache_size, events).await.unwrap();
        (file, path, cache_dir)
    }

    fn uniq() -> u64 {
        static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
        std::process::id() as u64 * 1_000_000 + COUNTER.fetch_add(1, Ordering::SeqCst)
    }

    struct AlwaysOne;
    #[async_trait::async_trait]
    impl crate::cache_size_mgr::CacheDirCounter for AlwaysOne {
        async fn file_count(&self) -> u64 {
            1
        }
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let (file, _, dir) = fixture(0).await;
        file.write(0, b"hello world").await.unwrap();
        assert_eq!(file.read(0, 5).await.unwrap(), b"hello");
        assert!(file.is_modified());
        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn write_does_not_push_to_the_provider() {
        let (file, path, dir) = fixture(0).await;
        file.write(0, b"draft").await.unwrap();

        let provider_view = file.provider.read_file(&path, 0, 5).await.unwrap();
        assert_eq!(provider_view, vec![0u8; 5]);
        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn resize_extends_with_zeros() {
        let (file, _, dir) = fixture(4).await;
        file.resize(8).await.unwrap();
        assert_eq!(file.size(), 8);
        assert_eq!(file.read(4, 4).await.unwrap(), vec![0u8; 4]);
        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn force_download_fetches_every_chunk() {
        let (file, path, dir) = fixture(0).await;
        file.write(0, b"abc").await.unwrap();
        let _ = path;
        file.force_download().await.unwrap();
        assert_eq!(file.read(0, 3).await.unwrap(), b"abc");
        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn source_path_points_at_a_real_cache_file() {
        let (file, _, dir) = fixture(0).await;
        assert!(!file.source_path().is_empty());
        file.write(0, b"x").await.unwrap();
        let contents = tokio::fs::read(file.source_path()).await.unwrap();
        assert_eq!(&contents[..1], b"x");
        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn read_state_resumes_from_a_prior_session() {
        let provider: Arc<dyn Provider> = Arc::new(MemoryProvider::new());
        let path = ApiPath::normalize("/resumed").unwrap();
        provider.create_file(&path).await.unwrap();
        provider.write_file(&path, 0, &[7u8; 20]).await.unwrap();

        let cache_dir = std::env::temp_dir().join(format!("repertory-open-file-resume-{}", uniq()));
        let config = Arc::new(Config::new(cache_dir.clone(), 1 << 30));
        let events = Arc::new(EventBus::new(Level::Debug));
        let cache_size = Arc::new(CacheSizeMgr::new(0, 1 << 30, events.clone(), Arc::new(AlwaysOne)));
        let file_mgr_db: Arc<dyn FileMgrDb> = Arc::new(InMemoryFileMgrDb::new());

        let first =
            OpenFile::open(path.clone(), 20, config.clone(), provider.clone(), file_mgr_db.clone(), cache_size.clone(), events.clone())
                .await
                .unwrap();
        first.force_download().await.unwrap();
        drop(first);

        // A second open for the same path reuses the resume row: no data
        // left in the provider to re-fetch proves it didn't start over.
        provider.write_file(&path, 0, &[0u8; 20]).await.unwrap();
        let second = OpenFile::open(path, 20, config, provider, file_mgr_db, cache_size, events).await.unwrap();
        assert_eq!(second.read(0, 20).await.unwrap(), vec![7u8; 20]);
        let _ = tokio::fs::remove_dir_all(cache_dir).await;
    }
}
