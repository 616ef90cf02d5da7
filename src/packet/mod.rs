//! The remote-mount wire codec (spec.md C1/§4.1).
//!
//! A `Packet` owns a growable byte buffer plus a read cursor; `encode_*`
//! appends big-endian primitives and `decode_*` advances the cursor, in the
//! same cursor-owning style as an XDR primitive parser but without XDR's
//! 4-byte alignment padding, since the wire format here is length-prefixed
//! frames, not XDR.

mod seal;

pub use seal::{open, seal, NONCE_LEN, TAG_LEN};

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

use crate::error::ApiError;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("short read: needed {needed} bytes, {available} available")]
    ShortRead { needed: usize, available: usize },
    #[error("invalid enum discriminant")]
    BadDiscriminant,
    #[error("invalid utf-8 in string field")]
    Utf8,
    #[error("string field exceeds maximum length")]
    TooLong,
    #[error("packet decryption failed")]
    DecryptFailed,
    #[error("incompatible protocol version")]
    IncompatibleVersion,
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        match e {
            Error::DecryptFailed => ApiError::DecryptionError,
            Error::IncompatibleVersion => ApiError::IncompatibleVersion,
            _ => ApiError::IoError,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Maximum length of a length-prefixed string field, guarding against a
/// hostile peer claiming an enormous allocation.
pub const MAX_STRING_LEN: usize = 64 * 1024;

/// A growable byte buffer with an independent read cursor, used both to
/// build outgoing packets (`encode_*`) and to walk incoming ones
/// (`decode_*`). Cloning a `Packet` copies its bytes; this is the
/// "keep the copy, simpler, thread-safe" choice recorded in DESIGN.md.
#[derive(Debug, Clone, Default)]
pub struct Packet {
    buf: Vec<u8>,
    pos: usize,
}

impl Packet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(buf: Vec<u8>) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Current read-cursor offset, exposed so handlers can report how much
    /// of a frame was consumed before an error.
    pub fn current_pointer(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    fn require(&self, n: usize) -> Result<()> {
        if self.remaining().len() < n {
            Err(Error::ShortRead { needed: n, available: self.remaining().len() })
        } else {
            Ok(())
        }
    }

    // -- encode --

    pub fn encode_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn encode_i8(&mut self, v: i8) -> &mut Self {
        self.encode_u8(v as u8)
    }

    pub fn encode_bool(&mut self, v: bool) -> &mut Self {
        self.encode_u8(if v { 1 } else { 0 })
    }

    pub fn encode_u16(&mut self, v: u16) -> &mut Self {
        let mut tmp = [0u8; 2];
        BigEndian::write_u16(&mut tmp, v);
        self.buf.extend_from_slice(&tmp);
        self
    }

    pub fn encode_i16(&mut self, v: i16) -> &mut Self {
        self.encode_u16(v as u16)
    }

    pub fn encode_u32(&mut self, v: u32) -> &mut Self {
        let mut tmp = [0u8; 4];
        BigEndian::write_u32(&mut tmp, v);
        self.buf.extend_from_slice(&tmp);
        self
    }

    pub fn encode_i32(&mut self, v: i32) -> &mut Self {
        self.encode_u32(v as u32)
    }

    pub fn encode_u64(&mut self, v: u64) -> &mut Self {
        let mut tmp = [0u8; 8];
        BigEndian::write_u64(&mut tmp, v);
        self.buf.extend_from_slice(&tmp);
        self
    }

    pub fn encode_i64(&mut self, v: i64) -> &mut Self {
        self.encode_u64(v as u64)
    }

    pub fn encode_bytes(&mut self, v: &[u8]) -> &mut Self {
        self.encode_u32(v.len() as u32);
        self.buf.extend_from_slice(v);
        self
    }

    pub fn encode_string(&mut self, v: &str) -> &mut Self {
        self.encode_bytes(v.as_bytes())
    }

    /// Writes the total packet length as a 4-byte big-endian prefix at
    /// offset 0, reserving space for it first if not already present. Call
    /// once, after every other `encode_*` call, before sending.
    pub fn encode_top(&mut self) -> &mut Self {
        let total = self.buf.len() as u32;
        let mut prefix = [0u8; 4];
        BigEndian::write_u32(&mut prefix, total);
        self.buf.splice(0..0, prefix.iter().copied());
        self
    }

    // -- decode --

    pub fn decode_u8(&mut self) -> Result<u8> {
        self.require(1)?;
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn decode_i8(&mut self) -> Result<i8> {
        Ok(self.decode_u8()? as i8)
    }

    pub fn decode_bool(&mut self) -> Result<bool> {
        match self.decode_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(Error::BadDiscriminant),
        }
    }

    pub fn decode_u16(&mut self) -> Result<u16> {
        self.require(2)?;
        let v = BigEndian::read_u16(&self.buf[self.pos..self.pos + 2]);
        self.pos += 2;
        Ok(v)
    }

    pub fn decode_i16(&mut self) -> Result<i16> {
        Ok(self.decode_u16()? as i16)
    }

    pub fn decode_u32(&mut self) -> Result<u32> {
        self.require(4)?;
        let v = BigEndian::read_u32(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(v)
    }

    pub fn decode_i32(&mut self) -> Result<i32> {
        Ok(self.decode_u32()? as i32)
    }

    pub fn decode_u64(&mut self) -> Result<u64> {
        self.require(8)?;
        let v = BigEndian::read_u64(&self.buf[self.pos..self.pos + 8]);
        self.pos += 8;
        Ok(v)
    }

    pub fn decode_i64(&mut self) -> Result<i64> {
        Ok(self.decode_u64()? as i64)
    }

    pub fn decode_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.decode_u32()? as usize;
        if len > MAX_STRING_LEN {
            return Err(Error::TooLong);
        }
        self.require(len)?;
        let v = self.buf[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(v)
    }

    pub fn decode_string(&mut self) -> Result<String> {
        String::from_utf8(self.decode_bytes()?).map_err(|_| Error::Utf8)
    }

    /// Variant of [`Self::decode_string`] that also exposes the same bytes
    /// as UTF-16 code units, for WinFsp-surface callers that want wide
    /// strings without a second wire format.
    pub fn decode_string_w(&mut self) -> Result<(String, Vec<u16>)> {
        let s = self.decode_string()?;
        let wide: Vec<u16> = s.encode_utf16().collect();
        Ok((s, wide))
    }

    pub fn decode_enum<T: num_traits::FromPrimitive>(&mut self) -> Result<T> {
        num_traits::FromPrimitive::from_u32(self.decode_u32()?).ok_or(Error::BadDiscriminant)
    }

    /// Appends a field-group that knows its own wire layout (a wire struct),
    /// without the caller unpacking its fields one at a time.
    pub fn encode_struct<T: WireEncode>(&mut self, v: &T) -> &mut Self {
        v.encode_fields(self);
        self
    }

    /// Reads a field-group that knows its own wire layout.
    pub fn decode_struct<T: WireDecode>(&mut self) -> Result<T> {
        T::decode_fields(self)
    }
}

/// A fixed field-group with a stable wire layout, encoded field-by-field in
/// declaration order (the wire analogue of a plain struct, not a generic
/// serializer): `fuse_stat`/`dir_item`/`os_item`-shaped request and response
/// payloads implement this so handlers encode/decode them as one call.
pub trait WireEncode {
    fn encode_fields(&self, p: &mut Packet);
}

/// The decode half of [`WireEncode`].
pub trait WireDecode: Sized {
    fn decode_fields(p: &mut Packet) -> Result<Self>;
}
