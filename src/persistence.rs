//! Snapshot primitives for chunks and aggregation contexts
//!
//! Chunk and aggregator (de)serialization only ever calls four operations:
//! `save_unsigned`, `save_bytes`, `read_unsigned` and `read_bytes`. The
//! backing store is supplied by the caller through [`SnapshotWriter`] and
//! [`SnapshotReader`], so the same layouts can be written anywhere.
//!
//! [`MemorySnapshot`] and [`SnapshotCursor`] are the in-process
//! implementation: tagged frames in a `BytesMut`, sealed with a
//! CRC-64-ECMA-182 trailer that is verified before anything is read.
//!
//! # Frame layout
//!
//! ```text
//! unsigned: [0x01][u64 LE]
//! bytes:    [0x02][len: u64 LE][len bytes]
//! trailer:  [crc64 of all frames: u64 LE]
//! ```
//!
//! # Example
//!
//! ```rust
//! use kuba_tscore::persistence::{MemorySnapshot, SnapshotCursor, SnapshotReader, SnapshotWriter};
//!
//! let mut snapshot = MemorySnapshot::new();
//! snapshot.save_unsigned(42);
//! snapshot.save_bytes(b"cpu");
//!
//! let mut cursor = SnapshotCursor::new(snapshot.finish()).unwrap();
//! assert_eq!(cursor.read_unsigned().unwrap(), 42);
//! assert_eq!(&cursor.read_bytes().unwrap()[..], b"cpu");
//! ```

use crate::error::PersistenceError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_64_ECMA_182};
use tracing::warn;

/// CRC-64-ECMA-182 calculator instance
const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

const TAG_UNSIGNED: u8 = 0x01;
const TAG_BYTES: u8 = 0x02;
const TRAILER_LEN: usize = 8;

/// Sink for snapshot data
pub trait SnapshotWriter {
    /// Save an unsigned 64-bit integer
    fn save_unsigned(&mut self, value: u64);

    /// Save an opaque byte string
    fn save_bytes(&mut self, bytes: &[u8]);

    /// Save a signed integer through its two's complement bits
    fn save_signed(&mut self, value: i64) {
        self.save_unsigned(value as u64);
    }

    /// Save a double through its IEEE 754 bits
    fn save_double(&mut self, value: f64) {
        self.save_unsigned(value.to_bits());
    }
}

/// Source of snapshot data, read back in the order it was saved
pub trait SnapshotReader {
    /// Read an unsigned 64-bit integer
    fn read_unsigned(&mut self) -> Result<u64, PersistenceError>;

    /// Read an opaque byte string
    fn read_bytes(&mut self) -> Result<Bytes, PersistenceError>;

    /// Read a signed integer saved with [`SnapshotWriter::save_signed`]
    fn read_signed(&mut self) -> Result<i64, PersistenceError> {
        Ok(self.read_unsigned()? as i64)
    }

    /// Read a double saved with [`SnapshotWriter::save_double`]
    fn read_double(&mut self) -> Result<f64, PersistenceError> {
        Ok(f64::from_bits(self.read_unsigned()?))
    }
}

/// Calculate the CRC-64-ECMA-182 checksum used by snapshot trailers
#[inline]
pub fn calculate_checksum(data: &[u8]) -> u64 {
    CRC64.checksum(data)
}

/// In-memory snapshot writer
#[derive(Debug, Default)]
pub struct MemorySnapshot {
    buf: BytesMut,
}

impl MemorySnapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes written so far, without the trailer
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if nothing was saved
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Seal the snapshot with its checksum trailer
    pub fn finish(mut self) -> Bytes {
        let checksum = calculate_checksum(&self.buf);
        self.buf.put_u64_le(checksum);
        self.buf.freeze()
    }
}

impl SnapshotWriter for MemorySnapshot {
    fn save_unsigned(&mut self, value: u64) {
        self.buf.put_u8(TAG_UNSIGNED);
        self.buf.put_u64_le(value);
    }

    fn save_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_u8(TAG_BYTES);
        self.buf.put_u64_le(bytes.len() as u64);
        self.buf.put_slice(bytes);
    }
}

/// Reader over a sealed [`MemorySnapshot`]
#[derive(Debug, Clone)]
pub struct SnapshotCursor {
    payload: Bytes,
}

impl SnapshotCursor {
    /// Verify the trailer and open the snapshot for reading
    ///
    /// # Errors
    /// - `UnexpectedEof` if the data is shorter than the trailer
    /// - `ChecksumMismatch` if the payload does not match its trailer
    pub fn new(mut data: Bytes) -> Result<Self, PersistenceError> {
        if data.len() < TRAILER_LEN {
            return Err(PersistenceError::UnexpectedEof);
        }
        let mut trailer = data.split_off(data.len() - TRAILER_LEN);
        let expected = trailer.get_u64_le();
        let actual = calculate_checksum(&data);
        if expected != actual {
            warn!(expected, actual, size = data.len(), "Snapshot checksum mismatch");
            return Err(PersistenceError::ChecksumMismatch { expected, actual });
        }
        Ok(Self { payload: data })
    }

    /// True once every frame has been read
    pub fn is_exhausted(&self) -> bool {
        !self.payload.has_remaining()
    }

    fn expect_tag(&mut self, expected: u8) -> Result<(), PersistenceError> {
        if !self.payload.has_remaining() {
            return Err(PersistenceError::UnexpectedEof);
        }
        let found = self.payload[0];
        if found != expected {
            return Err(PersistenceError::TypeMismatch {
                expected: tag_name(expected),
                found: tag_name(found),
            });
        }
        self.payload.advance(1);
        Ok(())
    }

    fn take_u64(&mut self) -> Result<u64, PersistenceError> {
        if self.payload.remaining() < 8 {
            return Err(PersistenceError::UnexpectedEof);
        }
        Ok(self.payload.get_u64_le())
    }
}

impl SnapshotReader for SnapshotCursor {
    fn read_unsigned(&mut self) -> Result<u64, PersistenceError> {
        self.expect_tag(TAG_UNSIGNED)?;
        self.take_u64()
    }

    fn read_bytes(&mut self) -> Result<Bytes, PersistenceError> {
        self.expect_tag(TAG_BYTES)?;
        let len = self.take_u64()?;
        let len = usize::try_from(len)
            .map_err(|_| PersistenceError::Corrupted(format!("byte string of {} bytes", len)))?;
        if self.payload.remaining() < len {
            return Err(PersistenceError::UnexpectedEof);
        }
        Ok(self.payload.split_to(len))
    }
}

fn tag_name(tag: u8) -> &'static str {
    match tag {
        TAG_UNSIGNED => "unsigned",
        TAG_BYTES => "bytes",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_frames_roundtrip() {
        let mut snapshot = MemorySnapshot::new();
        snapshot.save_signed(-5);
        snapshot.save_double(f64::NAN);
        snapshot.save_bytes(&[]);
        snapshot.save_bytes(&[1, 2, 3]);

        let mut cursor = SnapshotCursor::new(snapshot.finish()).unwrap();
        assert_eq!(cursor.read_signed().unwrap(), -5);
        assert_eq!(cursor.read_double().unwrap().to_bits(), f64::NAN.to_bits());
        assert!(cursor.read_bytes().unwrap().is_empty());
        assert_eq!(&cursor.read_bytes().unwrap()[..], &[1, 2, 3]);
        assert!(cursor.is_exhausted());
        assert_eq!(cursor.read_unsigned(), Err(PersistenceError::UnexpectedEof));
    }

    #[test]
    fn test_type_mismatch() {
        let mut snapshot = MemorySnapshot::new();
        snapshot.save_bytes(b"key");

        let mut cursor = SnapshotCursor::new(snapshot.finish()).unwrap();
        assert_eq!(
            cursor.read_unsigned(),
            Err(PersistenceError::TypeMismatch {
                expected: "unsigned",
                found: "bytes"
            })
        );
    }

    #[test]
    fn test_corruption_detected() {
        let mut snapshot = MemorySnapshot::new();
        snapshot.save_unsigned(7);
        let mut raw = snapshot.finish().to_vec();
        raw[3] ^= 0x10;

        assert!(matches!(
            SnapshotCursor::new(Bytes::from(raw)),
            Err(PersistenceError::ChecksumMismatch { .. })
        ));
        assert_eq!(
            SnapshotCursor::new(Bytes::from_static(&[1, 2])).unwrap_err(),
            PersistenceError::UnexpectedEof
        );
    }

    #[test]
    fn test_truncated_byte_string() {
        let mut buf = BytesMut::new();
        buf.put_u8(TAG_BYTES);
        buf.put_u64_le(100);
        buf.put_slice(&[0; 4]);
        let checksum = calculate_checksum(&buf);
        buf.put_u64_le(checksum);

        let mut cursor = SnapshotCursor::new(buf.freeze()).unwrap();
        assert_eq!(cursor.read_bytes(), Err(PersistenceError::UnexpectedEof));
    }
}
