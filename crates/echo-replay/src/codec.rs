// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Deterministic little-endian codec for action records.
//!
//! Every scalar is fixed-width little-endian; every variable-length field is
//! a `u32` length prefix followed by the raw bytes. Readers bound every
//! length prefix so a corrupt log cannot request an unbounded allocation.
use std::str;

use thiserror::Error;

/// Errors produced by codec readers and writers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Attempted to read beyond the end of the buffer.
    #[error("buffer too short")]
    OutOfBounds,
    /// UTF-8 decoding failed.
    #[error("invalid utf-8")]
    InvalidUtf8,
    /// String length exceeded max bound.
    #[error("string too long")]
    StringTooLong,
    /// Length prefix exceeded max bound.
    #[error("length too large")]
    LengthTooLarge,
    /// Enum decoding failed.
    #[error("invalid enum value")]
    InvalidEnum,
}

/// Deterministic encoding to bytes.
pub trait Encode {
    /// Encode into the provided writer.
    fn encode(&self, writer: &mut Writer) -> Result<(), CodecError>;
}

/// Deterministic decoding from bytes.
pub trait Decode: Sized {
    /// Decode from the provided reader.
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError>;
}

/// Encode a value into a fresh Vec.
pub fn encode_to_vec<T: Encode>(value: &T) -> Result<Vec<u8>, CodecError> {
    let mut writer = Writer::default();
    value.encode(&mut writer)?;
    Ok(writer.into_vec())
}

/// Decode a value from a byte slice.
pub fn decode_from_bytes<T: Decode>(bytes: &[u8]) -> Result<T, CodecError> {
    let mut reader = Reader::new(bytes);
    T::decode(&mut reader)
}

/// Writer for little-endian scalars and length-prefixed bytes.
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// Create a new writer with a pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// `true` when nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Write raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Write a bool as a single `0`/`1` byte.
    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    /// Write a little-endian u32.
    pub fn write_u32_le(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a little-endian i32.
    pub fn write_i32_le(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a little-endian u64.
    pub fn write_u64_le(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a little-endian i64.
    pub fn write_i64_le(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write an f64 by its IEEE-754 bit pattern.
    pub fn write_f64_le(&mut self, value: f64) {
        self.write_u64_le(value.to_bits());
    }

    /// Write a fixed 32-byte digest.
    pub fn write_digest(&mut self, digest: &[u8; 32]) {
        self.buf.extend_from_slice(digest);
    }

    /// Write length-prefixed bytes (u32 LE length).
    pub fn write_len_prefixed_bytes(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        let len: u32 = bytes
            .len()
            .try_into()
            .map_err(|_| CodecError::LengthTooLarge)?;
        self.write_u32_le(len);
        self.write_bytes(bytes);
        Ok(())
    }

    /// Write a length-prefixed UTF-8 string with a max bound.
    pub fn write_string(&mut self, value: &str, max_len: usize) -> Result<(), CodecError> {
        let bytes = value.as_bytes();
        if bytes.len() > max_len {
            return Err(CodecError::StringTooLong);
        }
        self.write_len_prefixed_bytes(bytes)
    }

    /// Write a count as a little-endian u32.
    pub fn write_count(&mut self, count: usize) -> Result<(), CodecError> {
        let count: u32 = count.try_into().map_err(|_| CodecError::LengthTooLarge)?;
        self.write_u32_le(count);
        Ok(())
    }

    /// Consume the writer and return the buffer.
    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// Reader for little-endian scalars and length-prefixed bytes.
#[derive(Debug)]
pub struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    /// Create a reader over the provided byte slice.
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let end = self
            .offset
            .checked_add(len)
            .ok_or(CodecError::OutOfBounds)?;
        let out = self
            .bytes
            .get(self.offset..end)
            .ok_or(CodecError::OutOfBounds)?;
        self.offset = end;
        Ok(out)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        self.take(N)?
            .try_into()
            .map_err(|_| CodecError::OutOfBounds)
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take_array::<1>()?[0])
    }

    /// Read a bool written by [`Writer::write_bool`].
    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(CodecError::InvalidEnum),
        }
    }

    /// Read a little-endian u32.
    pub fn read_u32_le(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    /// Read a little-endian i32.
    pub fn read_i32_le(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    /// Read a little-endian u64.
    pub fn read_u64_le(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    /// Read a little-endian i64.
    pub fn read_i64_le(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    /// Read an f64 from its IEEE-754 bit pattern.
    pub fn read_f64_le(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_bits(self.read_u64_le()?))
    }

    /// Read a fixed 32-byte digest.
    pub fn read_digest(&mut self) -> Result<[u8; 32], CodecError> {
        self.take_array()
    }

    /// Read a u32 count, rejecting values above `max`.
    pub fn read_count(&mut self, max: usize) -> Result<usize, CodecError> {
        let count = self.read_u32_le()? as usize;
        if count > max {
            return Err(CodecError::LengthTooLarge);
        }
        Ok(count)
    }

    /// Read a length-prefixed byte slice with a max bound.
    pub fn read_len_prefixed_bytes(&mut self, max_len: usize) -> Result<&'a [u8], CodecError> {
        let len = self.read_count(max_len)?;
        self.take(len)
    }

    /// Read a length-prefixed UTF-8 string with a max bound.
    pub fn read_string(&mut self, max_len: usize) -> Result<String, CodecError> {
        let bytes = self.read_len_prefixed_bytes(max_len)?;
        str::from_utf8(bytes)
            .map(ToString::to_string)
            .map_err(|_| CodecError::InvalidUtf8)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn scalars_are_little_endian() {
        let mut w = Writer::default();
        w.write_u32_le(1);
        w.write_i32_le(-1);
        assert_eq!(w.into_vec(), vec![1, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn truncated_input_is_out_of_bounds() {
        let mut r = Reader::new(&[1, 2, 3]);
        assert_eq!(r.read_u32_le(), Err(CodecError::OutOfBounds));
    }

    #[test]
    fn length_prefix_is_bounded_before_reading() {
        let mut w = Writer::default();
        w.write_len_prefixed_bytes(&[0u8; 16]).unwrap();
        let bytes = w.into_vec();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_len_prefixed_bytes(8), Err(CodecError::LengthTooLarge));
    }

    #[test]
    fn writer_enforces_string_bound() {
        let mut w = Writer::default();
        assert_eq!(w.write_string("abcdef", 3), Err(CodecError::StringTooLong));
        assert!(w.is_empty());
    }

    #[test]
    fn f64_keeps_nan_payload_bits() {
        let nan = f64::from_bits(0x7FF8_0000_0000_0001);
        let mut w = Writer::default();
        w.write_f64_le(nan);
        let bytes = w.into_vec();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_f64_le().unwrap().to_bits(), nan.to_bits());
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn bool_rejects_values_other_than_zero_and_one() {
        let mut r = Reader::new(&[2]);
        assert_eq!(r.read_bool(), Err(CodecError::InvalidEnum));
    }
}
