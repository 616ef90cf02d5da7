//! Packet-level AEAD sealing (`encrypt(token)`/`decrypt(token)` from
//! spec.md §4.1), distinct from the per-chunk framing in `crypto::chunk_aead`
//! — this seals a whole remote-mount packet body with a pre-shared token,
//! wrapping XChaCha20-Poly1305 around a caller-supplied key the same way
//! `crypto::chunk_aead` does for per-chunk payloads.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;

use super::Error;

pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;

/// Seals `plaintext` under `token` (a 32-byte key derived once per
/// connection by the handshake), returning `nonce || ciphertext+tag`.
pub fn seal(token: &[u8; 32], plaintext: &[u8]) -> Vec<u8> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(token));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .expect("XChaCha20-Poly1305 encryption is infallible for in-memory buffers");
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    out
}

/// Inverse of [`seal`]. Fails with [`Error::DecryptFailed`] on a short
/// buffer, bad tag, or wrong token.
pub fn open(token: &[u8; 32], sealed: &[u8]) -> super::Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(Error::DecryptFailed);
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(token));
    let nonce = XNonce::from_slice(nonce_bytes);
    cipher.decrypt(nonce, ciphertext).map_err(|_| Error::DecryptFailed)
}
