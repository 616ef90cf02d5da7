//! The lazy, chunk-at-a-time encrypted stream used by the upload manager
//! (spec.md C3, §4.3): reads one plaintext `data_chunk_size` chunk from the
//! local cache at a time, seals it, and yields the frame — so a large file
//! is never fully buffered in memory during upload.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Notify;

use super::chunk_aead::seal_chunk;
use crate::error::ApiError;

/// Source of plaintext bytes the reader pulls chunks from; implemented by
/// the file manager's local-cache file handle in production and by an
/// in-memory buffer in tests.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    async fn read_chunk(&self, chunk_index: u64, buf: &mut Vec<u8>) -> Result<usize, ApiError>;
}

/// Derives the filename used on the remote provider for an encrypted file,
/// so directory listings never leak the plaintext name.
pub fn encrypted_file_name(key: &[u8; 32], plaintext_name: &str) -> String {
    use blake2::digest::{Update, VariableOutput};
    use blake2::Blake2bVar;

    let mut hasher = Blake2bVar::new_keyed(key, 16);
    hasher.update(plaintext_name.as_bytes());
    let mut out = [0u8; 16];
    hasher.finalize_variable(&mut out).expect("16 is a valid BLAKE2b output length");
    hex_encode(&out)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Lazily reads, encrypts, and yields chunk frames from a [`ChunkSource`]
/// until the source is exhausted or the reader is stopped.
///
/// Stoppable via the same `Arc<AtomicBool>` + `Notify` pattern the rest of
/// the core uses for background workers (spec.md §5, §9) — an in-flight
/// upload can be cancelled without waiting for the next chunk boundary.
pub struct EncryptingReader<S: ChunkSource> {
    source: Arc<S>,
    key: [u8; 32],
    data_chunk_size: u32,
    next_chunk: u64,
    stop: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl<S: ChunkSource> EncryptingReader<S> {
    pub fn new(source: Arc<S>, key: [u8; 32], data_chunk_size: u32) -> Self {
        Self {
            source,
            key,
            data_chunk_size,
            next_chunk: 0,
            stop: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn stop_token(&self) -> (Arc<AtomicBool>, Arc<Notify>) {
        (self.stop.clone(), self.notify.clone())
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Reads, seals, and returns the next chunk frame, or `None` at
    /// end-of-stream or if stopped.
    pub async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, ApiError> {
        if self.stop.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let mut plaintext = Vec::with_capacity(self.data_chunk_size as usize);
        let read = self.source.read_chunk(self.next_chunk, &mut plaintext).await?;
        if read == 0 {
            return Ok(None);
        }
        let frame = seal_chunk(&self.key, &plaintext[..read]);
        self.next_chunk += 1;
        Ok(Some(frame))
    }
}

/// A [`ChunkSource`] over an in-memory byte slice, for tests and the
/// `demos/in_memory` example.
pub struct SliceSource {
    data: Vec<u8>,
    data_chunk_size: u32,
}

impl SliceSource {
    pub fn new(data: Vec<u8>, data_chunk_size: u32) -> Self {
        Self { data, data_chunk_size }
    }
}

#[async_trait]
impl ChunkSource for SliceSource {
    async fn read_chunk(&self, chunk_index: u64, buf: &mut Vec<u8>) -> Result<usize, ApiError> {
        let chunk_size = self.data_chunk_size as usize;
        let start = chunk_index as usize * chunk_size;
        if start >= self.data.len() {
            return Ok(0);
        }
        let end = (start + chunk_size).min(self.data.len());
        buf.extend_from_slice(&self.data[start..end]);
        Ok(end - start)
    }
}

/// A [`ChunkSource`] reading chunks sequentially from an async reader (the
/// local cache file), used by [`EncryptingReader`] in production.
pub struct AsyncReaderSource<R> {
    inner: tokio::sync::Mutex<R>,
    data_chunk_size: u32,
}

impl<R: AsyncRead + Unpin + Send> AsyncReaderSource<R> {
    pub fn new(inner: R, data_chunk_size: u32) -> Self {
        Self { inner: tokio::sync::Mutex::new(inner), data_chunk_size }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> ChunkSource for AsyncReaderSource<R> {
    async fn read_chunk(&self, _chunk_index: u64, buf: &mut Vec<u8>) -> Result<usize, ApiError> {
        let mut inner = self.inner.lock().await;
        let mut tmp = vec![0u8; self.data_chunk_size as usize];
        let mut total = 0usize;
        while total < tmp.len() {
            let n = inner.read(&mut tmp[total..]).await.map_err(|_| ApiError::IoError)?;
            if n == 0 {
                break;
            }
            total += n;
        }
        buf.extend_from_slice(&tmp[..total]);
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn yields_sealed_frames_until_exhausted() {
        let data: Vec<u8> = (0..40u8).collect();
        let source = Arc::new(SliceSource::new(data, 8));
        let key = [1u8; 32];
        let mut reader = EncryptingReader::new(source, key, 8);

        let mut frames = Vec::new();
        while let Some(frame) = reader.next_frame().await.unwrap() {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 5);
    }

    #[tokio::test]
    async fn stop_halts_further_frames() {
        let data: Vec<u8> = (0..40u8).collect();
        let source = Arc::new(SliceSource::new(data, 8));
        let mut reader = EncryptingReader::new(source, [1u8; 32], 8);
        reader.next_frame().await.unwrap();
        reader.stop();
        assert!(reader.next_frame().await.unwrap().is_none());
    }

    #[test]
    fn encrypted_names_differ_from_plaintext_and_are_deterministic() {
        let key = [2u8; 32];
        let a = encrypted_file_name(&key, "notes.txt");
        let b = encrypted_file_name(&key, "notes.txt");
        assert_eq!(a, b);
        assert_ne!(a, "notes.txt");
    }
}
