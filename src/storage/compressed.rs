//! Bit-packed chunk
//!
//! `CompressedChunk` stores its first sample in the header and every later
//! sample through the [`kuba`](crate::compression::kuba) codec. The stream
//! can only be appended to and read forward, so mutations other than append
//! rebuild the chunk:
//!
//! ```text
//! old chunk ──decode──▶ splice / skip target ──encode──▶ new chunk
//!                                                          │
//!                                  swap into old slot ◀────┘
//! ```
//!
//! The replacement is complete before it is moved over the old value. Any
//! error on the way (a `Block` conflict, a failed allocation, corrupted
//! input) drops the replacement and leaves the original untouched.

use crate::compression::bit_stream::{BitReader, BitWriter};
use crate::compression::kuba::{self, ReplayState};
use crate::error::{ChunkError, CompressionError, PersistenceError};
use crate::metrics;
use crate::persistence::{SnapshotReader, SnapshotWriter};
use crate::storage::plain::PlainChunk;
use crate::types::{ChunkPosition, DuplicatePolicy, Sample, TimeRange, Timestamp};
use tracing::{debug, warn};

/// Bytes added each time an append overflows a growable buffer
pub const GROWTH_BYTES: usize = 64;

/// Headroom reserved for upsert/delete rebuilds near the end of the buffer
pub const REBUILD_HEADROOM: usize = 1024;

/// Compressed chunk of sorted samples
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedChunk {
    writer: BitWriter,
    sample_count: u64,
    base_timestamp: Timestamp,
    base_value: f64,
    state: ReplayState,
}

impl CompressedChunk {
    /// Create an empty chunk with a packed buffer of `size_bytes`
    pub fn new(size_bytes: usize) -> Self {
        Self {
            writer: BitWriter::with_capacity_bytes(size_bytes),
            sample_count: 0,
            base_timestamp: 0,
            base_value: 0.0,
            state: ReplayState::new(0, 0.0),
        }
    }

    /// Create an empty chunk, reporting allocation failure instead of aborting
    ///
    /// # Errors
    /// `AllocationFailed` if `size_bytes` cannot be reserved.
    pub fn try_new(size_bytes: usize) -> Result<Self, CompressionError> {
        Ok(Self {
            writer: BitWriter::try_with_capacity_bytes(size_bytes)?,
            sample_count: 0,
            base_timestamp: 0,
            base_value: 0.0,
            state: ReplayState::new(0, 0.0),
        })
    }

    /// Number of samples stored
    pub fn len(&self) -> usize {
        self.sample_count as usize
    }

    /// True if the chunk holds no samples
    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }

    /// Byte budget of the packed buffer
    pub fn capacity_bytes(&self) -> usize {
        self.writer.capacity_bytes()
    }

    /// Bits written into the packed buffer
    pub fn bit_len(&self) -> usize {
        self.writer.bit_len()
    }

    /// Timestamp of the first sample (meaningless while empty)
    pub fn base_timestamp(&self) -> Timestamp {
        self.base_timestamp
    }

    /// Timestamp of the first sample
    pub fn first_timestamp(&self) -> Option<Timestamp> {
        (!self.is_empty()).then_some(self.base_timestamp)
    }

    /// Timestamp of the last sample
    pub fn last_timestamp(&self) -> Option<Timestamp> {
        (!self.is_empty()).then_some(self.state.prev_timestamp)
    }

    /// Memory used by the packed buffer, plus the struct itself if asked
    pub fn size_bytes(&self, include_struct: bool) -> usize {
        let header = if include_struct {
            std::mem::size_of::<Self>()
        } else {
            0
        };
        self.capacity_bytes() + header
    }

    /// Append a sample after the last one without growing the buffer
    ///
    /// # Errors
    /// - `ChunkFull` when the encoded sample does not fit
    /// - `OutOfOrder` when `timestamp` does not follow the last sample
    pub fn add(&mut self, sample: Sample) -> Result<(), ChunkError> {
        self.push(sample, false)
    }

    /// Forward decoder over the stored samples
    pub fn decoder(&self) -> Decoder<'_> {
        Decoder {
            reader: self.writer.reader(),
            state: ReplayState::new(self.base_timestamp, self.base_value),
            base: Sample::new(self.base_timestamp, self.base_value),
            index: 0,
            count: self.sample_count,
        }
    }

    /// Decode every sample into a plain chunk sized to fit them exactly
    pub fn decompress(&self) -> Result<PlainChunk, CompressionError> {
        let mut plain = PlainChunk::with_sample_capacity(self.len());
        for sample in self.decoder() {
            plain.add(sample?).map_err(|e| {
                CompressionError::CorruptedData(format!("decoded stream out of order: {}", e))
            })?;
        }
        Ok(plain)
    }

    /// Insert or merge a sample into the latest chunk of a series
    ///
    /// Same as [`upsert_at`](Self::upsert_at) with [`ChunkPosition::Latest`].
    pub fn upsert(&mut self, sample: Sample, policy: DuplicatePolicy) -> Result<usize, ChunkError> {
        self.upsert_at(sample, policy, ChunkPosition::Latest)
    }

    /// Insert or merge a sample at any position
    ///
    /// Appends past the last sample grow the buffer in place. Anything else
    /// rebuilds the chunk. A sealed chunk is trimmed to the bytes it uses
    /// afterwards. Returns the number of samples added (0 or 1).
    ///
    /// # Errors
    /// - `DuplicateTimestampConflict` under `Block`
    /// - `CodecOverflow` if the buffer cannot grow or the stream is corrupt
    ///
    /// The chunk is unchanged on error.
    pub fn upsert_at(
        &mut self,
        sample: Sample,
        policy: DuplicatePolicy,
        position: ChunkPosition,
    ) -> Result<usize, ChunkError> {
        let appends = match self.last_timestamp() {
            None => true,
            Some(last) => sample.timestamp > last,
        };
        if appends {
            self.push(sample, true)?;
            if position == ChunkPosition::Sealed {
                self.trim();
            }
            return Ok(1);
        }

        let mut rebuilt = self.empty_replacement()?;
        let mut pending = Some(sample);
        let mut added = 1;

        for existing in self.decoder() {
            let existing = existing?;
            if let Some(incoming) = pending {
                if existing.timestamp == incoming.timestamp {
                    let value =
                        policy.resolve_at(incoming.timestamp, existing.value, incoming.value)?;
                    if value.to_bits() == existing.value.to_bits() {
                        return Ok(0);
                    }
                    rebuilt.push(Sample::new(existing.timestamp, value), true)?;
                    pending = None;
                    added = 0;
                    continue;
                }
                if existing.timestamp > incoming.timestamp {
                    rebuilt.push(incoming, true)?;
                    pending = None;
                }
            }
            rebuilt.push(existing, true)?;
        }
        if let Some(incoming) = pending {
            rebuilt.push(incoming, true)?;
        }

        self.swap_in(rebuilt, "upsert", position);
        Ok(added)
    }

    /// Remove the sample at `timestamp` from the latest chunk of a series
    pub fn delete_sample(&mut self, timestamp: Timestamp) -> Result<(), ChunkError> {
        self.delete_sample_at(timestamp, ChunkPosition::Latest)
    }

    /// Remove the sample at `timestamp` by rebuilding the chunk
    ///
    /// # Errors
    /// `DeleteNotFound` if no sample has that timestamp; the chunk is unchanged.
    pub fn delete_sample_at(
        &mut self,
        timestamp: Timestamp,
        position: ChunkPosition,
    ) -> Result<(), ChunkError> {
        let in_bounds = matches!(
            (self.first_timestamp(), self.last_timestamp()),
            (Some(first), Some(last)) if first <= timestamp && timestamp <= last
        );
        if !in_bounds {
            return Err(ChunkError::DeleteNotFound { timestamp });
        }

        let mut rebuilt = self.empty_replacement()?;
        let mut found = false;
        for existing in self.decoder() {
            let existing = existing?;
            if existing.timestamp == timestamp {
                found = true;
                continue;
            }
            rebuilt.push(existing, true)?;
        }
        if !found {
            return Err(ChunkError::DeleteNotFound { timestamp });
        }

        self.swap_in(rebuilt, "delete", position);
        Ok(())
    }

    /// Remove every sample inside `range` from the latest chunk of a series
    pub fn delete_range(&mut self, range: TimeRange) -> Result<usize, ChunkError> {
        self.delete_range_at(range, ChunkPosition::Latest)
    }

    /// Remove every sample inside `range` (inclusive), returning how many
    ///
    /// # Errors
    /// `CodecOverflow` if the rebuild fails; the chunk is unchanged.
    pub fn delete_range_at(
        &mut self,
        range: TimeRange,
        position: ChunkPosition,
    ) -> Result<usize, ChunkError> {
        let overlaps = matches!(
            (self.first_timestamp(), self.last_timestamp()),
            (Some(first), Some(last)) if first <= range.end && range.start <= last
        );
        if !overlaps {
            return Ok(0);
        }

        let mut rebuilt = self.empty_replacement()?;
        let mut removed = 0;
        for existing in self.decoder() {
            let existing = existing?;
            if range.contains(existing.timestamp) {
                removed += 1;
                continue;
            }
            rebuilt.push(existing, true)?;
        }
        if removed > 0 {
            self.swap_in(rebuilt, "delete_range", position);
        }
        Ok(removed)
    }

    /// Move the newest floor(n/2) samples into a new chunk
    ///
    /// Both halves are re-encoded and trimmed to the bytes they use; `self`
    /// is replaced by the older half.
    ///
    /// # Panics
    /// If the chunk is empty.
    pub fn split(&mut self) -> Result<CompressedChunk, ChunkError> {
        assert!(!self.is_empty(), "cannot split an empty chunk");
        let total = self.len();
        let keep = total - total / 2;

        let mut left = CompressedChunk::try_new(self.capacity_bytes())?;
        let mut right = CompressedChunk::try_new(self.capacity_bytes())?;
        for (index, sample) in self.decoder().enumerate() {
            let target = if index < keep { &mut left } else { &mut right };
            target.push(sample?, true)?;
        }
        left.trim();
        right.trim();

        debug!(
            total,
            kept = keep,
            moved = total - keep,
            left_bytes = left.capacity_bytes(),
            right_bytes = right.capacity_bytes(),
            "Split compressed chunk"
        );
        metrics::record_rebuild("split");
        *self = left;
        Ok(right)
    }

    /// Write the chunk through the snapshot primitives
    ///
    /// Layout: base_timestamp, sample_count, capacity_bytes, packed buffer,
    /// bit_cursor, base_value, prev_timestamp, prev_delta, prev_value,
    /// prev_leading, prev_trailing.
    pub fn serialize<W: SnapshotWriter + ?Sized>(&self, writer: &mut W) {
        writer.save_signed(self.base_timestamp);
        writer.save_unsigned(self.sample_count);
        writer.save_unsigned(self.capacity_bytes() as u64);
        writer.save_bytes(self.writer.as_bytes());
        writer.save_unsigned(self.writer.bit_len() as u64);
        writer.save_double(self.base_value);
        writer.save_signed(self.state.prev_timestamp);
        writer.save_signed(self.state.prev_delta);
        writer.save_unsigned(self.state.prev_value);
        writer.save_unsigned(self.state.prev_leading as u64);
        writer.save_unsigned(self.state.prev_trailing as u64);
    }

    /// Read a chunk written by [`serialize`](Self::serialize)
    ///
    /// The whole stream is replayed; the load fails unless the replay ends
    /// exactly at the stored cursor with the stored state.
    pub fn deserialize<R: SnapshotReader + ?Sized>(reader: &mut R) -> Result<Self, PersistenceError> {
        let base_timestamp = reader.read_signed()?;
        let sample_count = reader.read_unsigned()?;
        let capacity = reader.read_unsigned()?;
        let buffer = reader.read_bytes()?;
        let bit_len = reader.read_unsigned()?;
        let base_value = reader.read_double()?;
        let stored = ReplayState {
            prev_timestamp: reader.read_signed()?,
            prev_delta: reader.read_signed()?,
            prev_value: reader.read_unsigned()?,
            prev_leading: narrow(reader.read_unsigned()?, "prev_leading")?,
            prev_trailing: narrow(reader.read_unsigned()?, "prev_trailing")?,
        };

        if buffer.len() as u64 != capacity {
            return Err(reject(format!(
                "buffer of {} bytes, header says {}",
                buffer.len(),
                capacity
            )));
        }
        let bit_len = usize::try_from(bit_len).map_err(|_| reject("bit cursor overflows usize"))?;
        let writer = BitWriter::from_parts(buffer.to_vec(), bit_len)?;

        let chunk = CompressedChunk {
            writer,
            sample_count,
            base_timestamp,
            base_value,
            state: stored,
        };
        chunk.verify_replay()?;
        Ok(chunk)
    }

    fn verify_replay(&self) -> Result<(), PersistenceError> {
        if self.is_empty() {
            if self.writer.bit_len() != 0 {
                return Err(reject("empty chunk with written bits"));
            }
            return Ok(());
        }

        let mut reader = self.writer.reader();
        let mut state = ReplayState::new(self.base_timestamp, self.base_value);
        for index in 1..self.sample_count {
            let previous = state.prev_timestamp;
            let sample = kuba::decode(&mut reader, &mut state, index)?;
            if sample.timestamp <= previous {
                return Err(reject(format!(
                    "sample {} at {} does not follow {}",
                    index, sample.timestamp, previous
                )));
            }
        }
        if !reader.is_at_end() {
            return Err(reject(format!(
                "replay stopped at bit {} of {}",
                reader.bit_position(),
                self.writer.bit_len()
            )));
        }
        if state != self.state {
            return Err(reject("replay state differs from stored state"));
        }
        Ok(())
    }

    /// Encode one sample; `grow` extends the buffer instead of failing
    pub(crate) fn push(&mut self, sample: Sample, grow: bool) -> Result<(), ChunkError> {
        if self.sample_count == 0 {
            self.base_timestamp = sample.timestamp;
            self.base_value = sample.value;
            self.state = ReplayState::new(sample.timestamp, sample.value);
            self.sample_count = 1;
            return Ok(());
        }
        if sample.timestamp <= self.state.prev_timestamp {
            return Err(ChunkError::OutOfOrder {
                timestamp: sample.timestamp,
                last: self.state.prev_timestamp,
            });
        }

        loop {
            match kuba::encode(
                &mut self.writer,
                &mut self.state,
                self.sample_count,
                sample.timestamp,
                sample.value,
            ) {
                Ok(()) => break,
                Err(CompressionError::BufferFull { .. }) if grow => {
                    self.writer.grow(GROWTH_BYTES)?;
                    metrics::record_codec_growth(GROWTH_BYTES);
                }
                Err(CompressionError::BufferFull { .. }) => {
                    return Err(ChunkError::ChunkFull {
                        capacity: self.capacity_bytes(),
                    });
                }
                Err(e) => return Err(ChunkError::CodecOverflow(e)),
            }
        }
        self.sample_count += 1;
        Ok(())
    }

    fn empty_replacement(&self) -> Result<CompressedChunk, ChunkError> {
        let mut size = self.capacity_bytes();
        if size - self.writer.used_bytes() < REBUILD_HEADROOM {
            size = size.saturating_add(REBUILD_HEADROOM);
        }
        CompressedChunk::try_new(size).map_err(ChunkError::from)
    }

    /// Trim the replacement and move it over `self`
    ///
    /// The latest chunk keeps its old byte budget so it never accepts fewer
    /// appends than before; only unused headroom is released. A sealed chunk
    /// shrinks to the bytes it uses.
    fn swap_in(
        &mut self,
        mut rebuilt: CompressedChunk,
        operation: &'static str,
        position: ChunkPosition,
    ) {
        let used = rebuilt.writer.used_bytes();
        let target = match position {
            ChunkPosition::Latest => self.capacity_bytes().max(used),
            ChunkPosition::Sealed => used,
        };
        rebuilt.writer.trim_to(target);
        debug!(
            operation,
            before = self.len(),
            after = rebuilt.len(),
            bytes = rebuilt.capacity_bytes(),
            ?position,
            "Rebuilt compressed chunk"
        );
        metrics::record_rebuild(operation);
        *self = rebuilt;
    }

    fn trim(&mut self) {
        let used = self.writer.used_bytes();
        self.writer.trim_to(used);
    }
}

/// Forward replay over a compressed chunk
///
/// Yields `Err` once if the stream is corrupt and then stops.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    reader: BitReader<'a>,
    state: ReplayState,
    base: Sample,
    index: u64,
    count: u64,
}

impl Iterator for Decoder<'_> {
    type Item = Result<Sample, CompressionError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.count {
            return None;
        }
        let index = self.index;
        self.index += 1;
        if index == 0 {
            return Some(Ok(self.base));
        }
        match kuba::decode(&mut self.reader, &mut self.state, index) {
            Ok(sample) => Some(Ok(sample)),
            Err(e) => {
                self.index = self.count;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.count - self.index) as usize;
        (remaining, Some(remaining))
    }
}

fn narrow(value: u64, field: &str) -> Result<u8, PersistenceError> {
    match u8::try_from(value) {
        Ok(v) if v <= 64 => Ok(v),
        _ => Err(reject(format!("{} of {} is not a bit count", field, value))),
    }
}

fn reject(reason: impl Into<String>) -> PersistenceError {
    let reason = reason.into();
    warn!(reason = %reason, "Rejected compressed chunk snapshot");
    PersistenceError::Corrupted(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{MemorySnapshot, SnapshotCursor};

    fn samples(chunk: &CompressedChunk) -> Vec<Sample> {
        chunk.decoder().map(|s| s.unwrap()).collect()
    }

    fn filled(timestamps: &[i64]) -> CompressedChunk {
        let mut chunk = CompressedChunk::new(256);
        for &ts in timestamps {
            chunk.add(Sample::new(ts, ts as f64 * 1.5)).unwrap();
        }
        chunk
    }

    #[test]
    fn test_header_sample_costs_no_bits() {
        let mut chunk = CompressedChunk::new(0);
        chunk.add(Sample::new(42, 1.0)).unwrap();
        assert_eq!(chunk.len(), 1);
        assert_eq!(chunk.bit_len(), 0);
        assert_eq!(chunk.first_timestamp(), Some(42));
        assert_eq!(chunk.last_timestamp(), Some(42));

        assert_eq!(
            chunk.add(Sample::new(43, 1.0)),
            Err(ChunkError::ChunkFull { capacity: 0 })
        );
        assert_eq!(chunk.len(), 1);
    }

    #[test]
    fn test_add_rejects_out_of_order() {
        let mut chunk = filled(&[10, 20]);
        assert_eq!(
            chunk.add(Sample::new(15, 0.0)),
            Err(ChunkError::OutOfOrder {
                timestamp: 15,
                last: 20
            })
        );
    }

    #[test]
    fn test_add_until_full_then_roundtrip() {
        let mut chunk = CompressedChunk::new(64);
        let mut written = Vec::new();
        for i in 0..10_000i64 {
            let sample = Sample::new(i * 10 + (i % 3), (i as f64).sin());
            match chunk.add(sample) {
                Ok(()) => written.push(sample),
                Err(ChunkError::ChunkFull { capacity }) => {
                    assert_eq!(capacity, 64);
                    break;
                }
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert!(written.len() > 2);
        assert!(chunk.bit_len() <= 64 * 8);
        assert_eq!(samples(&chunk), written);
    }

    #[test]
    fn test_upsert_append_grows_buffer() {
        let mut chunk = CompressedChunk::new(0);
        for i in 0..100 {
            chunk
                .upsert(Sample::new(i, i as f64 * 0.1), DuplicatePolicy::Block)
                .unwrap();
        }
        assert_eq!(chunk.len(), 100);
        assert_eq!(chunk.capacity_bytes() % GROWTH_BYTES, 0);
        let decoded = samples(&chunk);
        assert_eq!(decoded[99], Sample::new(99, 99.0 * 0.1));
    }

    #[test]
    fn test_upsert_middle_and_front() {
        let mut chunk = filled(&[10, 30, 40]);
        assert_eq!(chunk.upsert(Sample::new(20, 7.0), DuplicatePolicy::Block), Ok(1));
        assert_eq!(chunk.upsert(Sample::new(5, 8.0), DuplicatePolicy::Block), Ok(1));

        let ts: Vec<i64> = samples(&chunk).iter().map(|s| s.timestamp).collect();
        assert_eq!(ts, vec![5, 10, 20, 30, 40]);
        assert_eq!(chunk.base_timestamp(), 5);
        assert_eq!(chunk.capacity_bytes(), 256);
    }

    #[test]
    fn test_sealed_rebuilds_trim_to_used_bytes() {
        let ts: Vec<i64> = (0..10).map(|i| i * 10).collect();
        let mut chunk = CompressedChunk::new(4096);
        for &t in &ts {
            chunk.add(Sample::new(t, t as f64 * 1.5)).unwrap();
        }

        let mut latest = chunk.clone();
        latest
            .upsert_at(Sample::new(45, 2.0), DuplicatePolicy::Block, ChunkPosition::Latest)
            .unwrap();
        assert_eq!(latest.capacity_bytes(), 4096);

        chunk
            .upsert_at(Sample::new(45, 2.0), DuplicatePolicy::Block, ChunkPosition::Sealed)
            .unwrap();
        assert_eq!(chunk.capacity_bytes(), chunk.bit_len().div_ceil(8));
        assert_eq!(samples(&chunk), samples(&latest));

        chunk.delete_sample_at(20, ChunkPosition::Sealed).unwrap();
        assert_eq!(chunk.capacity_bytes(), chunk.bit_len().div_ceil(8));
        chunk
            .delete_range_at(TimeRange::new(60, 70).unwrap(), ChunkPosition::Sealed)
            .unwrap();
        assert_eq!(chunk.capacity_bytes(), chunk.bit_len().div_ceil(8));

        // Appending to a sealed chunk does not leave growth slack behind
        chunk
            .upsert_at(Sample::new(500, 9.0), DuplicatePolicy::Block, ChunkPosition::Sealed)
            .unwrap();
        assert_eq!(chunk.capacity_bytes(), chunk.bit_len().div_ceil(8));
        assert_eq!(chunk.len(), 9);
        assert_eq!(chunk.last_timestamp(), Some(500));
    }

    #[test]
    fn test_try_new_reports_allocation_failure() {
        assert!(matches!(
            CompressedChunk::try_new(usize::MAX),
            Err(CompressionError::AllocationFailed(_))
        ));
        let chunk = CompressedChunk::try_new(64).unwrap();
        assert_eq!(chunk, CompressedChunk::new(64));
    }

    #[test]
    fn test_upsert_duplicate_policies() {
        let cases = [
            (DuplicatePolicy::First, 10.0),
            (DuplicatePolicy::Last, 20.0),
            (DuplicatePolicy::Min, 10.0),
            (DuplicatePolicy::Max, 20.0),
            (DuplicatePolicy::Sum, 30.0),
        ];
        for (policy, expected) in cases {
            let mut chunk = CompressedChunk::new(128);
            chunk.add(Sample::new(1, 1.0)).unwrap();
            chunk.add(Sample::new(2, 10.0)).unwrap();
            chunk.add(Sample::new(3, 3.0)).unwrap();

            assert_eq!(chunk.upsert(Sample::new(2, 20.0), policy), Ok(0));
            assert_eq!(chunk.len(), 3);
            assert_eq!(samples(&chunk)[1], Sample::new(2, expected));
        }
    }

    #[test]
    fn test_block_conflict_leaves_chunk_untouched() {
        let mut chunk = filled(&[1, 2, 3]);
        let before = chunk.clone();
        assert!(matches!(
            chunk.upsert(Sample::new(2, 99.0), DuplicatePolicy::Block),
            Err(ChunkError::DuplicateTimestampConflict { timestamp: 2, .. })
        ));
        assert_eq!(chunk, before);
    }

    #[test]
    fn test_delete_sample() {
        let mut chunk = filled(&[1, 2, 3]);
        chunk.delete_sample(1).unwrap();
        assert_eq!(chunk.base_timestamp(), 2);
        assert_eq!(chunk.len(), 2);

        let before = chunk.clone();
        assert_eq!(
            chunk.delete_sample(100),
            Err(ChunkError::DeleteNotFound { timestamp: 100 })
        );
        assert_eq!(chunk, before);

        let mut gapped = filled(&[1, 3]);
        let before = gapped.clone();
        assert_eq!(
            gapped.delete_sample(2),
            Err(ChunkError::DeleteNotFound { timestamp: 2 })
        );
        assert_eq!(gapped, before);
    }

    #[test]
    fn test_delete_range() {
        let mut chunk = filled(&[1, 2, 3, 4, 5]);
        assert_eq!(chunk.delete_range(TimeRange::new(2, 3).unwrap()), Ok(2));
        let ts: Vec<i64> = samples(&chunk).iter().map(|s| s.timestamp).collect();
        assert_eq!(ts, vec![1, 4, 5]);

        assert_eq!(chunk.delete_range(TimeRange::new(10, 20).unwrap()), Ok(0));
        assert_eq!(chunk.delete_range(TimeRange::all()), Ok(3));
        assert!(chunk.is_empty());
        assert_eq!(chunk.first_timestamp(), None);
    }

    #[test]
    fn test_split_halves_and_trims() {
        let ts: Vec<i64> = (0..7).map(|i| i * 100).collect();
        let mut left = filled(&ts);
        let original = samples(&left);

        let right = left.split().unwrap();
        assert_eq!(left.len(), 4);
        assert_eq!(right.len(), 3);
        assert_eq!(right.base_timestamp(), 400);
        assert_eq!(left.capacity_bytes(), left.bit_len().div_ceil(8));

        let mut joined = samples(&left);
        joined.extend(samples(&right));
        assert_eq!(joined, original);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let chunk = filled(&[-50, -10, 0, 7, 1000]);
        let mut snapshot = MemorySnapshot::new();
        chunk.serialize(&mut snapshot);

        let mut cursor = SnapshotCursor::new(snapshot.finish()).unwrap();
        let restored = CompressedChunk::deserialize(&mut cursor).unwrap();
        assert_eq!(restored, chunk);
        assert!(cursor.is_exhausted());
    }

    #[test]
    fn test_snapshot_rejects_tampered_state() {
        let chunk = filled(&[1, 2, 3]);
        let mut snapshot = MemorySnapshot::new();
        snapshot.save_signed(chunk.base_timestamp);
        snapshot.save_unsigned(chunk.sample_count);
        snapshot.save_unsigned(chunk.capacity_bytes() as u64);
        snapshot.save_bytes(chunk.writer.as_bytes());
        snapshot.save_unsigned(chunk.bit_len() as u64);
        snapshot.save_double(chunk.base_value);
        snapshot.save_signed(chunk.state.prev_timestamp + 1);
        snapshot.save_signed(chunk.state.prev_delta);
        snapshot.save_unsigned(chunk.state.prev_value);
        snapshot.save_unsigned(chunk.state.prev_leading as u64);
        snapshot.save_unsigned(chunk.state.prev_trailing as u64);

        let mut cursor = SnapshotCursor::new(snapshot.finish()).unwrap();
        assert!(matches!(
            CompressedChunk::deserialize(&mut cursor),
            Err(PersistenceError::Corrupted(_))
        ));
    }

    #[test]
    fn test_decompress_matches_decoder() {
        let chunk = filled(&[3, 9, 27, 81]);
        let plain = chunk.decompress().unwrap();
        assert_eq!(plain.len(), 4);
        assert_eq!(plain.capacity(), 4);
        assert_eq!(plain.sample_at(3), Some(Sample::new(81, 81.0 * 1.5)));
    }
}
