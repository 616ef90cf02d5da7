//! Chunk-level streaming encryption (spec.md C2/C3, §4.2-4.3).
//!
//! `kdf` derives a file key from a passphrase and a per-file salt into the
//! 40-byte `kdf_config` header; `chunk_aead` seals/opens individual
//! `data_chunk_size` plaintext chunks under that key; `encrypting_reader`
//! exposes the whole thing as a lazy, chunk-at-a-time stream for upload.

pub mod chunk_aead;
pub mod encrypting_reader;
pub mod kdf;

pub use chunk_aead::{read_encrypted_range, seal_chunk, ChunkAeadError};
pub use kdf::{KdfConfig, KdfContext, KdfError, KdfType};
