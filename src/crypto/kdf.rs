//! `kdf_config`: the 40-byte on-disk header that makes an encrypted file
//! self-describing (spec.md §3 `kdf_config`, §4.2, invariant 7).
//!
//! Layout (big-endian, 40 bytes total):
//!
//! ```text
//! offset  size  field
//! 0       1     version
//! 1       1     kdf_type
//! 2       1     memlimit level
//! 3       1     opslimit level
//! 4       4     reserved (zero)
//! 8       16    salt
//! 24      8     unique_id (0 = master config, non-zero = derived sub-key slot)
//! 32      8     checksum (BLAKE2b-64 over bytes [0, 32))
//! ```
//!
//! The checksum is not a MAC: it only detects a corrupted header before an
//! expensive Argon2id run is attempted, exactly as `invalid_cache_size`-style
//! checks elsewhere in the core fail fast on bad configuration. Because
//! `unique_id` is covered by the checksum, a header whose sub-key slot was
//! tampered with independently of its salt still fails to restore.

use argon2::{Algorithm, Argon2, Params, Version};
use blake2::digest::{Update, VariableOutput};
use blake2::Blake2bVar;
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroize;

use crate::config::{KdfMemLimit, KdfOpsLimit, KdfParams};

pub const HEADER_LEN: usize = 40;
const SALT_LEN: usize = 16;
const VERSION: u8 = 1;

/// The only KDF this header format names today; kept as an enum (rather than
/// a bare constant) so `from_header` can reject a header written by a future
/// version that picks a different one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KdfType {
    Argon2id,
}

impl KdfType {
    fn code(self) -> u8 {
        match self {
            KdfType::Argon2id => 1,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(KdfType::Argon2id),
            _ => None,
        }
    }
}

/// Domain-separation tag for [`KdfConfig::derive_subkey`]. `Undefined` is a
/// caller-convenience fallback, not a distinct key space: it derives
/// identically to `Data` (mirroring `create_subkey_with_undefined_context_uses_fallback`
/// in the original test suite).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KdfContext {
    Undefined,
    Data,
    Path,
}

impl KdfContext {
    fn tag(self) -> u8 {
        match self {
            KdfContext::Undefined | KdfContext::Data => 1,
            KdfContext::Path => 2,
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum KdfError {
    #[error("kdf_config header has the wrong length")]
    WrongLength,
    #[error("kdf_config header is corrupt (checksum mismatch)")]
    ChecksumMismatch,
    #[error("unsupported kdf_config version")]
    UnsupportedVersion,
    #[error("unsupported kdf_config kdf_type")]
    UnsupportedKdfType,
    #[error("kdf_config memlimit/opslimit level is out of the enumerated set")]
    BadLevel,
    #[error("kdf_config salt is all-zero")]
    InvalidSalt,
    #[error("argon2id key derivation failed")]
    DerivationFailed,
}

/// A parsed, validated `kdf_config` header plus the 32-byte master key
/// derived from it. The master key is zeroized on drop.
pub struct KdfConfig {
    pub version: u8,
    pub kdf_type: KdfType,
    pub memlimit: KdfMemLimit,
    pub opslimit: KdfOpsLimit,
    pub salt: [u8; SALT_LEN],
    /// `0` for the master config; non-zero identifies which derived
    /// sub-key slot this particular header/key pair represents.
    pub unique_id: u64,
    master_key: [u8; 32],
}

impl Drop for KdfConfig {
    fn drop(&mut self) {
        self.master_key.zeroize();
    }
}

impl KdfConfig {
    /// Generates a fresh header (new random salt, `unique_id = 0`) and
    /// derives the master key from `passphrase`.
    pub fn generate(passphrase: &[u8], params: KdfParams) -> Result<Self, KdfError> {
        let mut salt = [0u8; SALT_LEN];
        rand::rng().fill_bytes(&mut salt);
        Self::derive(passphrase, params.memlimit, params.opslimit, salt, 0)
    }

    fn derive(
        passphrase: &[u8],
        memlimit: KdfMemLimit,
        opslimit: KdfOpsLimit,
        salt: [u8; SALT_LEN],
        unique_id: u64,
    ) -> Result<Self, KdfError> {
        let params = Params::new(memlimit.kib(), opslimit.iterations(), 1, Some(32))
            .map_err(|_| KdfError::DerivationFailed)?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let mut master_key = [0u8; 32];
        argon2
            .hash_password_into(passphrase, &salt, &mut master_key)
            .map_err(|_| KdfError::DerivationFailed)?;
        Ok(Self { version: VERSION, kdf_type: KdfType::Argon2id, memlimit, opslimit, salt, unique_id, master_key })
    }

    /// Parses and verifies a 40-byte on-disk header, then derives the
    /// master key from `passphrase`. Rejects a header whose version,
    /// kdf_type, memlimit, or opslimit is outside the enumerated set, whose
    /// salt is all-zero, or whose checksum mismatches.
    pub fn from_header(header: &[u8], passphrase: &[u8]) -> Result<Self, KdfError> {
        if header.len() != HEADER_LEN {
            return Err(KdfError::WrongLength);
        }
        if header[0] != VERSION {
            return Err(KdfError::UnsupportedVersion);
        }
        let kdf_type = KdfType::from_code(header[1]).ok_or(KdfError::UnsupportedKdfType)?;
        let memlimit = KdfMemLimit::from_level(header[2]).ok_or(KdfError::BadLevel)?;
        let opslimit = KdfOpsLimit::from_level(header[3]).ok_or(KdfError::BadLevel)?;

        let expected_checksum = checksum(&header[..32]);
        if u64::from_be_bytes(header[32..40].try_into().unwrap()) != expected_checksum {
            return Err(KdfError::ChecksumMismatch);
        }

        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&header[8..24]);
        if salt == [0u8; SALT_LEN] {
            return Err(KdfError::InvalidSalt);
        }
        let unique_id = u64::from_be_bytes(header[24..32].try_into().unwrap());

        let _ = kdf_type; // only Argon2id exists today; kept for the match above's exhaustiveness
        Self::derive(passphrase, memlimit, opslimit, salt, unique_id)
    }

    /// Serializes this config back into its 40-byte on-disk header.
    pub fn to_header(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = self.version;
        out[1] = self.kdf_type.code();
        out[2] = self.memlimit.level();
        out[3] = self.opslimit.level();
        out[8..24].copy_from_slice(&self.salt);
        out[24..32].copy_from_slice(&self.unique_id.to_be_bytes());
        let sum = checksum(&out[..32]);
        out[32..40].copy_from_slice(&sum.to_be_bytes());
        out
    }

    pub fn master_key(&self) -> &[u8; 32] {
        &self.master_key
    }

    /// Derives a labelled, domain-separated sub-key (e.g. the per-chunk
    /// AEAD key) from the master key via a keyed BLAKE2b hash over the
    /// context tag, this config's `unique_id`, and `label`, so a leaked
    /// sub-key never exposes the master key or a sibling derived under a
    /// different context, id, or label.
    pub fn derive_subkey(&self, context: KdfContext, label: &str) -> [u8; 32] {
        let mut hasher = Blake2bVar::new_keyed(&self.master_key, 32);
        hasher.update(&[context.tag()]);
        hasher.update(&self.unique_id.to_be_bytes());
        hasher.update(label.as_bytes());
        let mut out = [0u8; 32];
        hasher.finalize_variable(&mut out).expect("32 is a valid BLAKE2b output length");
        out
    }

    /// Derives both a sub-key and the `kdf_config` that names its slot:
    /// same version/kdf_type/memlimit/opslimit/salt as `self`, but
    /// `unique_id = sub_id` with a checksum recomputed over the new header.
    /// Deterministic in `(context, sub_id, self.master_key)`; never mutates
    /// `self`.
    pub fn create_subkey(&self, context: KdfContext, sub_id: u64) -> ([u8; 32], KdfConfig) {
        let mut hasher = Blake2bVar::new_keyed(&self.master_key, 32);
        hasher.update(&[context.tag()]);
        hasher.update(&sub_id.to_be_bytes());
        let mut subkey = [0u8; 32];
        hasher.finalize_variable(&mut subkey).expect("32 is a valid BLAKE2b output length");

        let updated = KdfConfig {
            version: self.version,
            kdf_type: self.kdf_type,
            memlimit: self.memlimit,
            opslimit: self.opslimit,
            salt: self.salt,
            unique_id: sub_id,
            master_key: subkey,
        };
        (subkey, updated)
    }
}

/// BLAKE2b-64 over `bytes`, read back as a big-endian `u64`. Used only as a
/// corruption check, never as a MAC.
fn checksum(bytes: &[u8]) -> u64 {
    let mut hasher = Blake2bVar::new(8).expect("8 is a valid BLAKE2b output length");
    hasher.update(bytes);
    let mut out = [0u8; 8];
    hasher.finalize_variable(&mut out).expect("checksum buffer matches output length");
    u64::from_be_bytes(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_and_derives_same_key() {
        let cfg = KdfConfig::generate(b"hunter2", KdfParams::default()).unwrap();
        let header = cfg.to_header();
        let reopened = KdfConfig::from_header(&header, b"hunter2").unwrap();
        assert_eq!(cfg.master_key(), reopened.master_key());
        assert_eq!(cfg.unique_id, reopened.unique_id);
    }

    #[test]
    fn wrong_passphrase_derives_different_key() {
        let cfg = KdfConfig::generate(b"hunter2", KdfParams::default()).unwrap();
        let header = cfg.to_header();
        let reopened = KdfConfig::from_header(&header, b"wrong").unwrap();
        assert_ne!(cfg.master_key(), reopened.master_key());
    }

    #[test]
    fn corrupted_header_fails_checksum() {
        let cfg = KdfConfig::generate(b"hunter2", KdfParams::default()).unwrap();
        let mut header = cfg.to_header();
        header[15] ^= 0xff;
        assert_eq!(KdfConfig::from_header(&header, b"hunter2").unwrap_err(), KdfError::ChecksumMismatch);
    }

    #[test]
    fn mutated_unique_id_fails_to_restore() {
        let cfg = KdfConfig::generate(b"hunter2", KdfParams::default()).unwrap();
        let mut header = cfg.to_header();
        header[24..32].copy_from_slice(&7u64.to_be_bytes());
        assert_eq!(KdfConfig::from_header(&header, b"hunter2").unwrap_err(), KdfError::ChecksumMismatch);
    }

    #[test]
    fn all_zero_salt_is_rejected() {
        let cfg = KdfConfig::generate(b"hunter2", KdfParams::default()).unwrap();
        let mut header = cfg.to_header();
        header[8..24].fill(0);
        let sum = checksum(&header[..32]);
        header[32..40].copy_from_slice(&sum.to_be_bytes());
        assert_eq!(KdfConfig::from_header(&header, b"hunter2").unwrap_err(), KdfError::InvalidSalt);
    }

    #[test]
    fn wrong_length_header_is_rejected() {
        assert_eq!(KdfConfig::from_header(&[0u8; 10], b"x").unwrap_err(), KdfError::WrongLength);
    }

    #[test]
    fn subkeys_differ_by_label() {
        let cfg = KdfConfig::generate(b"hunter2", KdfParams::default()).unwrap();
        assert_ne!(cfg.derive_subkey(KdfContext::Data, "chunk"), cfg.derive_subkey(KdfContext::Data, "filename"));
    }

    #[test]
    fn subkeys_differ_by_context() {
        let cfg = KdfConfig::generate(b"hunter2", KdfParams::default()).unwrap();
        assert_ne!(cfg.derive_subkey(KdfContext::Data, "x"), cfg.derive_subkey(KdfContext::Path, "x"));
    }

    #[test]
    fn undefined_context_falls_back_to_data() {
        let cfg = KdfConfig::generate(b"hunter2", KdfParams::default()).unwrap();
        assert_eq!(cfg.derive_subkey(KdfContext::Undefined, "x"), cfg.derive_subkey(KdfContext::Data, "x"));
    }

    #[test]
    fn create_subkey_is_deterministic_and_varies_with_sub_id() {
        let cfg = KdfConfig::generate(b"hunter2", KdfParams::default()).unwrap();
        let (k1, c1) = cfg.create_subkey(KdfContext::Data, 5);
        let (k1_again, c1_again) = cfg.create_subkey(KdfContext::Data, 5);
        assert_eq!(k1, k1_again);
        assert_eq!(c1.unique_id, c1_again.unique_id);
        assert_eq!(c1.to_header(), c1_again.to_header());

        let (k2, c2) = cfg.create_subkey(KdfContext::Data, 6);
        assert_ne!(k1, k2);
        assert_eq!(c2.unique_id, 6);
    }
}
