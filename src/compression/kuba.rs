//! Kuba sample codec: delta-of-delta timestamps and XOR values
//!
//! # Algorithm Overview
//!
//! ## 1. Delta-of-Delta Timestamp Compression
//!
//! ```text
//! Timestamps:  1000, 1010, 1020, 1030, 1040
//! Deltas:           10,   10,   10,   10
//! Delta-of-Delta:    0,    0,    0,    0    <- Highly compressible!
//! ```
//!
//! The first timestamp lives in the chunk header and costs no bits. The
//! second sample stores its raw delta in 64 bits. Every later sample stores
//! the delta-of-delta as two's complement behind a unary prefix:
//!
//! | Prefix  | Payload | Range                  |
//! |---------|---------|------------------------|
//! | `0`     | -       | 0                      |
//! | `10`    | 7 bits  | [-64, 63]              |
//! | `110`   | 9 bits  | [-256, 255]            |
//! | `1110`  | 12 bits | [-2048, 2047]          |
//! | `11110` | 32 bits | i32 range              |
//! | `11111` | 64 bits | anything               |
//!
//! Timestamp arithmetic wraps, so every `i64` sequence round-trips.
//!
//! ## 2. XOR Floating-Point Value Compression
//!
//! - `0`: value unchanged (XOR = 0)
//! - `10` + meaningful bits: XOR fits the previous leading/trailing window
//! - `11` + 5-bit leading + 6-bit (length - 1) + meaningful bits: new window
//!
//! The window starts as leading = trailing = 32, which no non-zero XOR fits,
//! so the first change always opens an explicit window.
//!
//! # Example
//!
//! ```rust
//! use kuba_tscore::compression::bit_stream::BitWriter;
//! use kuba_tscore::compression::kuba::{decode, encode, ReplayState};
//!
//! let samples = [(1000, 1.0), (1010, 1.5), (1020, 1.5)];
//! let mut writer = BitWriter::with_capacity_bytes(64);
//! let mut state = ReplayState::new(samples[0].0, samples[0].1);
//! for (index, &(ts, value)) in samples.iter().enumerate().skip(1) {
//!     encode(&mut writer, &mut state, index as u64, ts, value).unwrap();
//! }
//!
//! let mut reader = writer.reader();
//! let mut replay = ReplayState::new(samples[0].0, samples[0].1);
//! let second = decode(&mut reader, &mut replay, 1).unwrap();
//! assert_eq!((second.timestamp, second.value), (1010, 1.5));
//! ```
//!
//! # References
//!
//! - Paper: "Gorilla: A Fast, Scalable, In-Memory Time Series Database"
//! - URL: <http://www.vldb.org/pvldb/vol8/p1816-teller.pdf>

use super::bit_stream::{BitReader, BitWriter};
use crate::error::CompressionError;
use crate::types::{Sample, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Window assumed before any value has changed
pub const INITIAL_WINDOW: u8 = 32;

/// Largest encoding of one sample: `11111` + 64 and `11` + 5 + 6 + 64
pub const MAX_SAMPLE_BITS: usize = 5 + 64 + 2 + 5 + 6 + 64;

/// Deltas beyond roughly ten years of milliseconds are logged
const MAX_REASONABLE_DELTA_MS: u64 = 10 * 365 * 24 * 60 * 60 * 1_000;

/// State needed to encode or decode the next sample
///
/// Each sample's bits depend on the previous sample, so this is required to
/// resume a stream, not a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayState {
    /// Timestamp of the last sample in the stream
    pub prev_timestamp: Timestamp,
    /// Delta between the last two samples (0 after the first)
    pub prev_delta: i64,
    /// Bit pattern of the last value
    pub prev_value: u64,
    /// Leading zeros of the current XOR window
    pub prev_leading: u8,
    /// Trailing zeros of the current XOR window
    pub prev_trailing: u8,
}

impl ReplayState {
    /// State right after the header sample
    pub fn new(base_timestamp: Timestamp, base_value: f64) -> Self {
        Self {
            prev_timestamp: base_timestamp,
            prev_delta: 0,
            prev_value: base_value.to_bits(),
            prev_leading: INITIAL_WINDOW,
            prev_trailing: INITIAL_WINDOW,
        }
    }

    fn window_bits(&self) -> u32 {
        64u32.saturating_sub(self.prev_leading as u32 + self.prev_trailing as u32)
    }
}

/// Bit fields of one encoded sample, collected before anything is written
struct BitPlan {
    fields: [(u64, u8); 6],
    len: usize,
    total: usize,
}

impl BitPlan {
    fn new() -> Self {
        Self {
            fields: [(0, 0); 6],
            len: 0,
            total: 0,
        }
    }

    fn push(&mut self, value: u64, bits: u8) {
        self.fields[self.len] = (value, bits);
        self.len += 1;
        self.total += bits as usize;
    }

    fn write(&self, writer: &mut BitWriter) -> Result<(), CompressionError> {
        for &(value, bits) in &self.fields[..self.len] {
            writer.write_bits(value, bits)?;
        }
        Ok(())
    }
}

/// Append the sample at position `index` (>= 1) of a stream
///
/// The sample at index 0 is the chunk header and is never encoded. Either
/// every bit of the sample is written and `state` advances, or nothing
/// changes and `BufferFull` reports the bits that were needed.
///
/// # Errors
/// - `InvalidData` for index 0
/// - `BufferFull` when the writer cannot hold the sample
pub fn encode(
    writer: &mut BitWriter,
    state: &mut ReplayState,
    index: u64,
    timestamp: Timestamp,
    value: f64,
) -> Result<(), CompressionError> {
    if index == 0 {
        return Err(CompressionError::InvalidData(
            "first sample belongs to the header".to_string(),
        ));
    }

    let mut plan = BitPlan::new();

    let delta = timestamp.wrapping_sub(state.prev_timestamp);
    if delta.unsigned_abs() > MAX_REASONABLE_DELTA_MS {
        warn!(
            delta_ms = delta,
            prev_ts = state.prev_timestamp,
            curr_ts = timestamp,
            "Unusually large timestamp delta"
        );
    }
    if index == 1 {
        plan.push(delta as u64, 64);
    } else {
        push_delta_of_delta(&mut plan, delta.wrapping_sub(state.prev_delta));
    }

    let bits = value.to_bits();
    let xor = state.prev_value ^ bits;
    let mut window = (state.prev_leading, state.prev_trailing);
    if xor == 0 {
        plan.push(0, 1);
    } else {
        let leading = (xor.leading_zeros() as u8).min(31);
        let trailing = xor.trailing_zeros() as u8;
        if leading >= state.prev_leading && trailing >= state.prev_trailing {
            let meaningful = state.window_bits() as u8;
            plan.push(0b10, 2);
            plan.push(xor >> state.prev_trailing, meaningful);
        } else {
            let meaningful = 64 - leading - trailing;
            plan.push(0b11, 2);
            plan.push(leading as u64, 5);
            plan.push((meaningful - 1) as u64, 6);
            plan.push(xor >> trailing, meaningful);
            window = (leading, trailing);
        }
    }

    let available = writer.remaining_bits();
    if plan.total > available {
        return Err(CompressionError::BufferFull {
            needed: plan.total,
            available,
        });
    }
    plan.write(writer)?;

    state.prev_timestamp = timestamp;
    state.prev_delta = delta;
    state.prev_value = bits;
    state.prev_leading = window.0;
    state.prev_trailing = window.1;
    Ok(())
}

fn push_delta_of_delta(plan: &mut BitPlan, dod: i64) {
    if dod == 0 {
        plan.push(0, 1);
    } else if (-64..=63).contains(&dod) {
        plan.push(0b10, 2);
        plan.push(dod as u64 & 0x7F, 7);
    } else if (-256..=255).contains(&dod) {
        plan.push(0b110, 3);
        plan.push(dod as u64 & 0x1FF, 9);
    } else if (-2048..=2047).contains(&dod) {
        plan.push(0b1110, 4);
        plan.push(dod as u64 & 0xFFF, 12);
    } else if i32::try_from(dod).is_ok() {
        plan.push(0b11110, 5);
        plan.push(dod as u64 & 0xFFFF_FFFF, 32);
    } else {
        plan.push(0b11111, 5);
        plan.push(dod as u64, 64);
    }
}

/// Decode the sample at position `index` (>= 1) and advance `state`
///
/// # Errors
/// `CorruptedData` when the stream ends early or holds an impossible window.
pub fn decode(
    reader: &mut BitReader<'_>,
    state: &mut ReplayState,
    index: u64,
) -> Result<Sample, CompressionError> {
    if index == 0 {
        return Err(CompressionError::InvalidData(
            "first sample belongs to the header".to_string(),
        ));
    }

    let delta = if index == 1 {
        reader.read_bits(64)? as i64
    } else {
        let dod = if !reader.read_bit()? {
            0
        } else if !reader.read_bit()? {
            sign_extend(reader.read_bits(7)?, 7)
        } else if !reader.read_bit()? {
            sign_extend(reader.read_bits(9)?, 9)
        } else if !reader.read_bit()? {
            sign_extend(reader.read_bits(12)?, 12)
        } else if !reader.read_bit()? {
            sign_extend(reader.read_bits(32)?, 32)
        } else {
            reader.read_bits(64)? as i64
        };
        state.prev_delta.wrapping_add(dod)
    };
    let timestamp = state.prev_timestamp.wrapping_add(delta);

    let mut bits = state.prev_value;
    if reader.read_bit()? {
        if !reader.read_bit()? {
            let meaningful = state.window_bits();
            if meaningful == 0 {
                return Err(CompressionError::CorruptedData(format!(
                    "sample {} reuses an empty XOR window",
                    index
                )));
            }
            let xor = reader.read_bits(meaningful as u8)? << state.prev_trailing;
            bits ^= xor;
        } else {
            let leading = reader.read_bits(5)? as u8;
            let meaningful = reader.read_bits(6)? as u8 + 1;
            if leading as u32 + meaningful as u32 > 64 {
                return Err(CompressionError::CorruptedData(format!(
                    "sample {} has window of {} leading + {} meaningful bits",
                    index, leading, meaningful
                )));
            }
            let trailing = 64 - leading - meaningful;
            bits ^= reader.read_bits(meaningful)? << trailing;
            state.prev_leading = leading;
            state.prev_trailing = trailing;
        }
    }

    state.prev_timestamp = timestamp;
    state.prev_delta = delta;
    state.prev_value = bits;
    Ok(Sample::new(timestamp, f64::from_bits(bits)))
}

#[inline]
fn sign_extend(raw: u64, width: u32) -> i64 {
    let shift = 64 - width;
    ((raw << shift) as i64) >> shift
}
