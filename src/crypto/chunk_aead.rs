//! Per-chunk AEAD framing for encrypted files (spec.md §3 "encrypted chunk
//! frame", §4.2, invariant 6).
//!
//! Each plaintext `data_chunk_size` chunk becomes a frame
//! `nonce(24) || mac(16) || ciphertext`, with the frame's own total length
//! (header + ciphertext, as a big-endian u32) bound in as associated data,
//! so a frame cannot be truncated, padded, or have its ciphertext spliced
//! into a differently-sized frame without detection.

use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use chacha20poly1305::{Key, Tag, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use thiserror::Error;

pub const NONCE_LEN: usize = 24;
pub const MAC_LEN: usize = 16;
const HEADER_LEN: usize = NONCE_LEN + MAC_LEN;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ChunkAeadError {
    #[error("encrypted chunk frame is shorter than the nonce+mac header")]
    FrameTooShort,
    #[error("chunk authentication failed: tampered, truncated, or wrong key")]
    AuthenticationFailed,
}

fn frame_len_aad(total_frame_len: u32) -> [u8; 4] {
    total_frame_len.to_be_bytes()
}

/// Encrypts one plaintext chunk into its on-disk/on-wire frame.
pub fn seal_chunk(key: &[u8; 32], plaintext: &[u8]) -> Vec<u8> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let total_frame_len = (HEADER_LEN + plaintext.len()) as u32;
    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(nonce, &frame_len_aad(total_frame_len), &mut buffer)
        .expect("XChaCha20-Poly1305 encryption is infallible for in-memory buffers");

    let mut frame = Vec::with_capacity(total_frame_len as usize);
    frame.extend_from_slice(&nonce_bytes);
    frame.extend_from_slice(tag.as_slice());
    frame.extend_from_slice(&buffer);
    frame
}

/// Decrypts one chunk frame. The frame's own on-wire length is re-derived
/// and checked as associated data, so a frame moved, truncated, or merged
/// with another one fails authentication rather than decrypting quietly.
pub fn open_chunk(key: &[u8; 32], frame: &[u8]) -> Result<Vec<u8>, ChunkAeadError> {
    if frame.len() < HEADER_LEN {
        return Err(ChunkAeadError::FrameTooShort);
    }
    let (nonce_bytes, rest) = frame.split_at(NONCE_LEN);
    let (tag_bytes, ciphertext) = rest.split_at(MAC_LEN);

    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let nonce = XNonce::from_slice(nonce_bytes);
    let tag = Tag::from_slice(tag_bytes);
    let total_frame_len = frame.len() as u32;

    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(nonce, &frame_len_aad(total_frame_len), &mut buffer, tag)
        .map_err(|_| ChunkAeadError::AuthenticationFailed)?;
    Ok(buffer)
}

/// Reads plaintext bytes in `[start, start+out.len())` from a chunked
/// encrypted stream, fetching only the chunks that overlap the requested
/// range. `fetch_frame` returns the raw on-disk/on-wire frame for a given
/// chunk index. Fills `out` in place and returns the number of bytes
/// written (short only at end-of-file).
pub fn read_encrypted_range(
    key: &[u8; 32],
    data_chunk_size: u32,
    start: u64,
    out: &mut [u8],
    mut fetch_frame: impl FnMut(u64) -> Option<Vec<u8>>,
) -> Result<usize, ChunkAeadError> {
    let chunk_size = data_chunk_size as u64;
    let mut written = 0usize;
    let mut offset = start;

    while written < out.len() {
        let chunk_index = offset / chunk_size;
        let chunk_offset = (offset % chunk_size) as usize;

        let Some(frame) = fetch_frame(chunk_index) else { break };
        let plaintext = open_chunk(key, &frame)?;
        if chunk_offset >= plaintext.len() {
            break;
        }

        let available = plaintext.len() - chunk_offset;
        let want = out.len() - written;
        let take = available.min(want);
        out[written..written + take].copy_from_slice(&plaintext[chunk_offset..chunk_offset + take]);

        written += take;
        offset += take as u64;
        if take < available {
            break;
        }
    }
    Ok(written)
}

/// Convenience overload of [`read_encrypted_range`] that allocates and
/// returns a fresh buffer rather than filling a caller-supplied one.
pub fn read_encrypted_range_to_vec(
    key: &[u8; 32],
    data_chunk_size: u32,
    start: u64,
    len: usize,
    fetch_frame: impl FnMut(u64) -> Option<Vec<u8>>,
) -> Result<Vec<u8>, ChunkAeadError> {
    let mut out = vec![0u8; len];
    let written = read_encrypted_range(key, data_chunk_size, start, &mut out, fetch_frame)?;
    out.truncate(written);
    Ok(out)
}
