//! Exercises the crypto stack end-to-end: derive a master key from a
//! passphrase via the on-disk kdf header, split a file into encrypted
//! chunk frames through `EncryptingReader`, then read an arbitrary
//! sub-range back out through `read_encrypted_range`.

use std::sync::Arc;

use repertory_core::config::KdfParams;
use repertory_core::crypto::encrypting_reader::{EncryptingReader, SliceSource};
use repertory_core::crypto::{chunk_aead, KdfConfig, KdfContext};

#[test]
fn kdf_header_round_trips_through_a_simulated_disk_write() {
    let kdf = KdfConfig::generate(b"correct horse battery staple", KdfParams::default()).unwrap();
    let header_on_disk = kdf.to_header();

    let reopened = KdfConfig::from_header(&header_on_disk, b"correct horse battery staple").unwrap();
    assert_eq!(kdf.master_key(), reopened.master_key());

    let wrong = KdfConfig::from_header(&header_on_disk, b"wrong passphrase");
    assert!(wrong.is_ok(), "a wrong passphrase still derives *a* key, just the wrong one");
    assert_ne!(wrong.unwrap().master_key(), kdf.master_key());
}

#[tokio::test]
async fn file_round_trips_through_chunked_encryption_and_range_reads() {
    let kdf = KdfConfig::generate(b"passphrase", KdfParams::default()).unwrap();
    let chunk_key = kdf.derive_subkey(KdfContext::Data, "chunk-encryption");
    let data_chunk_size = 16u32;

    let plaintext: Vec<u8> = (0u8..100).collect();
    let source = Arc::new(SliceSource::new(plaintext.clone(), data_chunk_size));
    let mut reader = EncryptingReader::new(source, chunk_key, data_chunk_size);

    let mut frames = Vec::new();
    while let Some(frame) = reader.next_frame().await.unwrap() {
        frames.push(frame);
    }
    assert_eq!(frames.len(), plaintext.len().div_ceil(data_chunk_size as usize));

    let mut out = vec![0u8; 30];
    let read = chunk_aead::read_encrypted_range(&chunk_key, data_chunk_size, 10, &mut out, |idx| {
        frames.get(idx as usize).cloned()
    })
    .unwrap();
    assert_eq!(read, 30);
    assert_eq!(out, plaintext[10..40]);
}

#[test]
fn a_frame_padded_with_extra_bytes_fails_to_decrypt() {
    let key = [7u8; 32];
    let mut frame = chunk_aead::seal_chunk(&key, b"some plaintext");
    frame.push(0); // extends the frame past the length bound into its own AAD
    assert!(chunk_aead::open_chunk(&key, &frame).is_err());
}

#[test]
fn a_frame_sealed_under_a_different_key_fails_to_decrypt() {
    let frame = chunk_aead::seal_chunk(&[7u8; 32], b"some plaintext");
    assert!(chunk_aead::open_chunk(&[9u8; 32], &frame).is_err());
}
