//! Bit-level I/O primitives for the packed chunk codec
//!
//! Bits are stored MSB-first (most significant bit first) within each byte:
//! ```text
//! Byte: [bit0 bit1 bit2 bit3 bit4 bit5 bit6 bit7]
//!        MSB                                    LSB
//! ```
//!
//! Unlike a streaming writer, [`BitWriter`] owns a fixed byte budget. The
//! buffer is zero-filled up to its capacity and a bit cursor marks how much of
//! it is in use. A write that does not fit fails without touching the buffer,
//! so callers decide whether to [`grow`](BitWriter::grow) or give up.
//!
//! # Example
//! ```
//! use kuba_tscore::compression::bit_stream::BitWriter;
//!
//! let mut writer = BitWriter::with_capacity_bytes(2);
//! writer.write_bit(true).unwrap();
//! writer.write_bits(0b1010, 4).unwrap();
//! assert_eq!(writer.bit_len(), 5);
//!
//! let mut reader = writer.reader();
//! assert!(reader.read_bit().unwrap());
//! assert_eq!(reader.read_bits(4).unwrap(), 0b1010);
//! assert!(reader.is_at_end());
//! ```

use crate::error::CompressionError;

/// Fixed-capacity bit writer
///
/// # Internal State
///
/// - `buffer`: Zero-filled bytes, `buffer.len()` is the capacity
/// - `bit_len`: Number of bits written so far, never above `buffer.len() * 8`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitWriter {
    buffer: Vec<u8>,
    bit_len: usize,
}

impl BitWriter {
    /// Create an empty writer able to hold `bytes` bytes
    pub fn with_capacity_bytes(bytes: usize) -> Self {
        Self {
            buffer: vec![0u8; bytes],
            bit_len: 0,
        }
    }

    /// Create an empty writer, reporting allocation failure instead of aborting
    ///
    /// # Errors
    /// `AllocationFailed` if the bit count overflows or the bytes cannot be
    /// reserved.
    pub fn try_with_capacity_bytes(bytes: usize) -> Result<Self, CompressionError> {
        let mut writer = Self {
            buffer: Vec::new(),
            bit_len: 0,
        };
        writer.grow(bytes)?;
        Ok(writer)
    }

    /// Rebuild a writer from a persisted buffer and cursor
    ///
    /// # Errors
    /// `CorruptedData` if the cursor points past the end of the buffer.
    pub fn from_parts(buffer: Vec<u8>, bit_len: usize) -> Result<Self, CompressionError> {
        let capacity_bits = buffer.len().checked_mul(8).ok_or_else(|| {
            CompressionError::CorruptedData("buffer length overflows bit count".to_string())
        })?;
        if bit_len > capacity_bits {
            return Err(CompressionError::CorruptedData(format!(
                "bit cursor {} exceeds buffer of {} bits",
                bit_len, capacity_bits
            )));
        }
        Ok(Self { buffer, bit_len })
    }

    /// Byte budget of the buffer
    pub fn capacity_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Bits written so far
    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// Minimum whole bytes holding every written bit
    pub fn used_bytes(&self) -> usize {
        self.bit_len.div_ceil(8)
    }

    /// Bits still free before the buffer is full
    pub fn remaining_bits(&self) -> usize {
        self.buffer.len() * 8 - self.bit_len
    }

    /// Whole buffer, including the unused zero tail
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Write a single bit
    ///
    /// # Errors
    /// `BufferFull` if no bit is left; the writer is unchanged.
    pub fn write_bit(&mut self, bit: bool) -> Result<(), CompressionError> {
        self.ensure_room(1)?;
        self.put_bit(bit);
        Ok(())
    }

    /// Write the low `num_bits` bits of `value`, MSB-first
    ///
    /// `write_bits(0b1010, 4)` writes 1, 0, 1, 0 in that order. The write is
    /// all-or-nothing: on `BufferFull` nothing is written.
    ///
    /// # Errors
    /// - `InvalidData` if `num_bits > 64`
    /// - `BufferFull` if the bits do not fit
    pub fn write_bits(&mut self, value: u64, num_bits: u8) -> Result<(), CompressionError> {
        if num_bits > 64 {
            return Err(CompressionError::InvalidData(format!(
                "Cannot write more than 64 bits (requested: {})",
                num_bits
            )));
        }
        self.ensure_room(num_bits as usize)?;
        for i in (0..num_bits).rev() {
            self.put_bit((value >> i) & 1 == 1);
        }
        Ok(())
    }

    /// Extend the buffer by `additional` zero bytes
    ///
    /// # Errors
    /// `AllocationFailed` if the new size overflows or cannot be reserved.
    pub fn grow(&mut self, additional: usize) -> Result<(), CompressionError> {
        let new_len = self.buffer.len().checked_add(additional).ok_or_else(|| {
            CompressionError::AllocationFailed(format!(
                "growing {} bytes by {} overflows",
                self.buffer.len(),
                additional
            ))
        })?;
        new_len.checked_mul(8).ok_or_else(|| {
            CompressionError::AllocationFailed(format!("{} bytes overflow bit count", new_len))
        })?;
        self.buffer.try_reserve_exact(additional).map_err(|e| {
            CompressionError::AllocationFailed(format!(
                "cannot reserve {} more bytes: {}",
                additional, e
            ))
        })?;
        self.buffer.resize(new_len, 0);
        Ok(())
    }

    /// Shrink (or extend) the buffer to exactly `bytes` bytes
    ///
    /// # Panics
    /// If `bytes` would cut into written bits. A partially written final byte
    /// always survives.
    pub fn trim_to(&mut self, bytes: usize) {
        assert!(
            bytes >= self.used_bytes(),
            "trim to {} bytes would drop written bits ({} bits in use)",
            bytes,
            self.bit_len
        );
        self.buffer.resize(bytes, 0);
        self.buffer.shrink_to_fit();
    }

    /// Reader over the written bits only
    pub fn reader(&self) -> BitReader<'_> {
        BitReader::with_limit(&self.buffer, self.bit_len)
    }

    fn ensure_room(&self, bits: usize) -> Result<(), CompressionError> {
        let available = self.remaining_bits();
        if bits > available {
            return Err(CompressionError::BufferFull {
                needed: bits,
                available,
            });
        }
        Ok(())
    }

    #[inline]
    fn put_bit(&mut self, bit: bool) {
        let byte = self.bit_len / 8;
        let shift = 7 - (self.bit_len % 8);
        if bit {
            self.buffer[byte] |= 1 << shift;
        } else {
            self.buffer[byte] &= !(1 << shift);
        }
        self.bit_len += 1;
    }
}

/// Reader for bit-level operations
///
/// Reads MSB-first and stops at `limit` bits, so the zero tail of a
/// fixed-capacity buffer is never mistaken for data.
///
/// # Example
/// ```
/// use kuba_tscore::compression::bit_stream::BitReader;
///
/// let data = vec![0b10101100];
/// let mut reader = BitReader::new(&data);
/// assert!(reader.read_bit().unwrap());   // Reads 1
/// assert!(!reader.read_bit().unwrap());  // Reads 0
/// ```
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    buffer: &'a [u8],
    limit: usize,
    position: usize,
}

impl<'a> BitReader<'a> {
    /// Reader over every bit of `buffer`
    pub fn new(buffer: &'a [u8]) -> Self {
        Self::with_limit(buffer, buffer.len() * 8)
    }

    /// Reader over the first `limit` bits of `buffer`
    pub fn with_limit(buffer: &'a [u8], limit: usize) -> Self {
        Self {
            buffer,
            limit: limit.min(buffer.len() * 8),
            position: 0,
        }
    }

    /// Read a single bit
    ///
    /// # Errors
    /// `CorruptedData` when reading past the limit, which means the packed
    /// stream is truncated.
    pub fn read_bit(&mut self) -> Result<bool, CompressionError> {
        if self.position >= self.limit {
            return Err(CompressionError::CorruptedData(
                "Unexpected end of buffer".to_string(),
            ));
        }
        let byte = self.buffer[self.position / 8];
        let bit = (byte >> (7 - (self.position % 8))) & 1 == 1;
        self.position += 1;
        Ok(bit)
    }

    /// Read `num_bits` bits into the low end of a u64
    ///
    /// Reading 0 bits returns `Ok(0)` without advancing.
    ///
    /// # Errors
    /// - `InvalidData` if `num_bits > 64`
    /// - `CorruptedData` if the stream ends first
    pub fn read_bits(&mut self, num_bits: u8) -> Result<u64, CompressionError> {
        if num_bits > 64 {
            return Err(CompressionError::InvalidData(format!(
                "Cannot read more than 64 bits (requested: {})",
                num_bits
            )));
        }
        if self.position + num_bits as usize > self.limit {
            return Err(CompressionError::CorruptedData(format!(
                "Unexpected end of buffer: {} bits requested, {} left",
                num_bits,
                self.limit - self.position
            )));
        }
        let mut value: u64 = 0;
        for _ in 0..num_bits {
            value = (value << 1) | (self.read_bit()? as u64);
        }
        Ok(value)
    }

    /// True once every bit up to the limit has been consumed
    pub fn is_at_end(&self) -> bool {
        self.position >= self.limit
    }

    /// Bits consumed so far
    pub fn bit_position(&self) -> usize {
        self.position
    }

    /// Current position as (byte_index, bit_index_within_byte)
    pub fn position(&self) -> (usize, u8) {
        (self.position / 8, (self.position % 8) as u8)
    }
}
