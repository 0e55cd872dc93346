//! Encoding-independent chunk interface
//!
//! [`Chunk`] wraps either representation behind one API so the series layer
//! never needs to know how a given chunk is stored. The one asymmetry is
//! reverse iteration: compressed chunks decode into a temporary plain chunk
//! and walk that backwards.
//!
//! # Example
//!
//! ```rust
//! use kuba_tscore::storage::{Chunk, ChunkType, IterDirection};
//! use kuba_tscore::types::{DuplicatePolicy, Sample};
//!
//! let mut chunk = Chunk::new(ChunkType::Compressed, 4096);
//! chunk.add(Sample::new(1000, 1.0)).unwrap();
//! chunk.add(Sample::new(2000, 2.0)).unwrap();
//! chunk.upsert(Sample::new(1500, 1.5), DuplicatePolicy::Block).unwrap();
//!
//! let newest_first: Vec<i64> = chunk
//!     .iter(IterDirection::Reverse)
//!     .map(|s| s.timestamp)
//!     .collect();
//! assert_eq!(newest_first, vec![2000, 1500, 1000]);
//! ```

use crate::aggregation::{aggregate_values, AggregationType};
use crate::error::{AggregationError, ChunkError, CompressionError, PersistenceError};
use crate::metrics;
use crate::persistence::{SnapshotReader, SnapshotWriter};
use crate::storage::compressed::CompressedChunk;
use crate::storage::iter::{ChunkIterator, IterDirection};
use crate::storage::plain::PlainChunk;
use crate::types::{ChunkPosition, DuplicatePolicy, Sample, TimeRange, Timestamp, SAMPLE_SIZE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Chunk encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    /// Uncompressed parallel arrays
    #[serde(alias = "uncompressed")]
    Regular,
    /// Bit-packed delta-of-delta / XOR stream
    #[default]
    Compressed,
}

impl ChunkType {
    /// Tag written ahead of a serialized chunk
    pub fn tag(&self) -> u64 {
        match self {
            ChunkType::Regular => 0,
            ChunkType::Compressed => 1,
        }
    }

    /// Encoding for a snapshot tag
    pub fn from_tag(tag: u64) -> Option<Self> {
        match tag {
            0 => Some(ChunkType::Regular),
            1 => Some(ChunkType::Compressed),
            _ => None,
        }
    }

    /// Lower-case name used in configuration and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Regular => "regular",
            ChunkType::Compressed => "compressed",
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "regular" | "uncompressed" => Ok(ChunkType::Regular),
            "compressed" => Ok(ChunkType::Compressed),
            other => Err(format!("unknown chunk encoding '{}'", other)),
        }
    }
}

/// A chunk of either encoding
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    /// Array-backed chunk
    Plain(PlainChunk),
    /// Bit-packed chunk
    Compressed(CompressedChunk),
}

impl Chunk {
    /// Create an empty chunk with a byte budget of `size_bytes`
    pub fn new(chunk_type: ChunkType, size_bytes: usize) -> Self {
        match chunk_type {
            ChunkType::Regular => Chunk::Plain(PlainChunk::new(size_bytes)),
            ChunkType::Compressed => Chunk::Compressed(CompressedChunk::new(size_bytes)),
        }
    }

    /// Encoding of this chunk
    pub fn chunk_type(&self) -> ChunkType {
        match self {
            Chunk::Plain(_) => ChunkType::Regular,
            Chunk::Compressed(_) => ChunkType::Compressed,
        }
    }

    /// Number of samples stored
    pub fn len(&self) -> usize {
        match self {
            Chunk::Plain(c) => c.len(),
            Chunk::Compressed(c) => c.len(),
        }
    }

    /// True if the chunk holds no samples
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Timestamp of the first sample
    pub fn first_timestamp(&self) -> Option<Timestamp> {
        match self {
            Chunk::Plain(c) => c.first_timestamp(),
            Chunk::Compressed(c) => c.first_timestamp(),
        }
    }

    /// Timestamp of the last sample
    pub fn last_timestamp(&self) -> Option<Timestamp> {
        match self {
            Chunk::Plain(c) => c.last_timestamp(),
            Chunk::Compressed(c) => c.last_timestamp(),
        }
    }

    /// Byte budget of the sample storage
    pub fn capacity_bytes(&self) -> usize {
        match self {
            Chunk::Plain(c) => c.capacity_bytes(),
            Chunk::Compressed(c) => c.capacity_bytes(),
        }
    }

    /// Memory used by the samples, plus the chunk struct if asked
    pub fn size_bytes(&self, include_struct: bool) -> usize {
        match self {
            Chunk::Plain(c) => c.size_bytes(include_struct),
            Chunk::Compressed(c) => c.size_bytes(include_struct),
        }
    }

    /// Append a sample after the last one
    ///
    /// # Errors
    /// `ChunkFull` when there is no room; the caller opens a new chunk.
    pub fn add(&mut self, sample: Sample) -> Result<(), ChunkError> {
        let result = match self {
            Chunk::Plain(c) => c.add(sample),
            Chunk::Compressed(c) => c.add(sample),
        };
        metrics::record_chunk_op(self.chunk_type().as_str(), "add", &result);
        result
    }

    /// Insert a sample anywhere, resolving an occupied timestamp by `policy`
    ///
    /// Treats the chunk as the latest of its series. Returns the number of
    /// samples added (0 or 1).
    pub fn upsert(&mut self, sample: Sample, policy: DuplicatePolicy) -> Result<usize, ChunkError> {
        self.upsert_at(sample, policy, ChunkPosition::Latest)
    }

    /// Upsert into a chunk at `position` in its series
    ///
    /// A sealed chunk releases its unused space after the change.
    pub fn upsert_at(
        &mut self,
        sample: Sample,
        policy: DuplicatePolicy,
        position: ChunkPosition,
    ) -> Result<usize, ChunkError> {
        let result = match self {
            Chunk::Plain(c) => {
                let added = c.upsert(sample, policy);
                if added.is_ok() && position == ChunkPosition::Sealed {
                    c.release_slack();
                }
                added
            }
            Chunk::Compressed(c) => c.upsert_at(sample, policy, position),
        };
        metrics::record_chunk_op(self.chunk_type().as_str(), "upsert", &result);
        result
    }

    /// Remove the sample at `timestamp` from the latest chunk of a series
    pub fn delete_sample(&mut self, timestamp: Timestamp) -> Result<(), ChunkError> {
        self.delete_sample_at(timestamp, ChunkPosition::Latest)
    }

    /// Remove the sample at `timestamp`
    ///
    /// A sealed chunk releases its unused space after the change.
    pub fn delete_sample_at(
        &mut self,
        timestamp: Timestamp,
        position: ChunkPosition,
    ) -> Result<(), ChunkError> {
        let result = match self {
            Chunk::Plain(c) => {
                let deleted = c.delete_sample(timestamp);
                if deleted.is_ok() && position == ChunkPosition::Sealed {
                    c.release_slack();
                }
                deleted
            }
            Chunk::Compressed(c) => c.delete_sample_at(timestamp, position),
        };
        metrics::record_chunk_op(self.chunk_type().as_str(), "delete", &result);
        result
    }

    /// Remove every sample in `range` from the latest chunk of a series
    pub fn delete_range(&mut self, range: TimeRange) -> Result<usize, ChunkError> {
        self.delete_range_at(range, ChunkPosition::Latest)
    }

    /// Remove every sample in `range` (inclusive), returning how many
    ///
    /// A sealed chunk releases its unused space after the change.
    pub fn delete_range_at(
        &mut self,
        range: TimeRange,
        position: ChunkPosition,
    ) -> Result<usize, ChunkError> {
        let result = match self {
            Chunk::Plain(c) => {
                let removed = c.delete_range(range);
                if position == ChunkPosition::Sealed {
                    c.release_slack();
                }
                Ok(removed)
            }
            Chunk::Compressed(c) => c.delete_range_at(range, position),
        };
        metrics::record_chunk_op(self.chunk_type().as_str(), "delete_range", &result);
        result
    }

    /// Move the newest floor(n/2) samples into a new chunk of the same type
    ///
    /// # Panics
    /// If the chunk is empty.
    pub fn split(&mut self) -> Result<Chunk, ChunkError> {
        let result = match self {
            Chunk::Plain(c) => Ok(Chunk::Plain(c.split())),
            Chunk::Compressed(c) => c.split().map(Chunk::Compressed),
        };
        metrics::record_chunk_op(self.chunk_type().as_str(), "split", &result);
        result
    }

    /// Scan the chunk in `direction`
    pub fn iter(&self, direction: IterDirection) -> ChunkIterator<'_> {
        match self {
            Chunk::Plain(c) => ChunkIterator::plain(c, direction),
            Chunk::Compressed(c) => ChunkIterator::compressed(c, direction),
        }
    }

    /// Re-encode the samples into a chunk of `target` type
    ///
    /// The byte budget carries over; a plain target is widened if the
    /// budget cannot hold every sample.
    pub fn convert(&self, target: ChunkType) -> Result<Chunk, ChunkError> {
        if target == self.chunk_type() {
            return Ok(self.clone());
        }
        let converted = match target {
            ChunkType::Regular => {
                let slots = self.len().max(self.capacity_bytes() / SAMPLE_SIZE);
                let mut plain = PlainChunk::with_sample_capacity(self.len());
                plain.set_capacity(slots);
                for sample in self.iter(IterDirection::Forward) {
                    plain.add(sample)?;
                }
                Chunk::Plain(plain)
            }
            ChunkType::Compressed => {
                let mut packed = CompressedChunk::try_new(self.capacity_bytes())?;
                for sample in self.iter(IterDirection::Forward) {
                    packed.push(sample, true)?;
                }
                Chunk::Compressed(packed)
            }
        };
        if converted.len() != self.len() {
            return Err(ChunkError::CodecOverflow(CompressionError::CorruptedData(
                format!("converted {} of {} samples", converted.len(), self.len()),
            )));
        }
        debug!(
            from = %self.chunk_type(),
            to = %target,
            samples = self.len(),
            bytes = converted.capacity_bytes(),
            "Converted chunk encoding"
        );
        Ok(converted)
    }

    /// Aggregate the values whose timestamps fall in `range`
    ///
    /// # Errors
    /// `EmptyAccumulator` if no sample is in range.
    pub fn aggregate(&self, kind: AggregationType, range: TimeRange) -> Result<f64, AggregationError> {
        let values = self
            .iter(IterDirection::Forward)
            .skip_while(|s| s.timestamp < range.start)
            .take_while(|s| s.timestamp <= range.end)
            .map(|s| s.value);
        aggregate_values(kind, values)
    }

    /// Write the encoding tag then the chunk
    pub fn serialize<W: SnapshotWriter + ?Sized>(&self, writer: &mut W) {
        writer.save_unsigned(self.chunk_type().tag());
        match self {
            Chunk::Plain(c) => c.serialize(writer),
            Chunk::Compressed(c) => c.serialize(writer),
        }
    }

    /// Read a chunk written by [`serialize`](Self::serialize)
    pub fn deserialize<R: SnapshotReader + ?Sized>(reader: &mut R) -> Result<Self, PersistenceError> {
        let tag = reader.read_unsigned()?;
        match ChunkType::from_tag(tag) {
            Some(ChunkType::Regular) => Ok(Chunk::Plain(PlainChunk::deserialize(reader)?)),
            Some(ChunkType::Compressed) => {
                Ok(Chunk::Compressed(CompressedChunk::deserialize(reader)?))
            }
            None => Err(PersistenceError::Corrupted(format!(
                "unknown chunk tag {}",
                tag
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{MemorySnapshot, SnapshotCursor};

    const TYPES: [ChunkType; 2] = [ChunkType::Regular, ChunkType::Compressed];

    fn chunk_with(chunk_type: ChunkType, timestamps: &[i64]) -> Chunk {
        let mut chunk = Chunk::new(chunk_type, 1024);
        for &ts in timestamps {
            chunk.add(Sample::new(ts, ts as f64 / 10.0)).unwrap();
        }
        chunk
    }

    fn timestamps(chunk: &Chunk) -> Vec<i64> {
        chunk.iter(IterDirection::Forward).map(|s| s.timestamp).collect()
    }

    #[test]
    fn test_sealed_chunks_release_slack() {
        for chunk_type in TYPES {
            let mut chunk = chunk_with(chunk_type, &[10, 20, 30, 40, 50]);
            chunk
                .upsert_at(Sample::new(25, 2.5), DuplicatePolicy::Block, ChunkPosition::Sealed)
                .unwrap();
            let tight = match &chunk {
                Chunk::Plain(c) => c.len() * SAMPLE_SIZE,
                Chunk::Compressed(c) => c.bit_len().div_ceil(8),
            };
            assert_eq!(chunk.capacity_bytes(), tight, "{}", chunk_type);

            chunk.delete_sample_at(10, ChunkPosition::Sealed).unwrap();
            chunk
                .delete_range_at(TimeRange::new(40, 50).unwrap(), ChunkPosition::Sealed)
                .unwrap();
            let tight = match &chunk {
                Chunk::Plain(c) => c.len() * SAMPLE_SIZE,
                Chunk::Compressed(c) => c.bit_len().div_ceil(8),
            };
            assert_eq!(chunk.capacity_bytes(), tight, "{}", chunk_type);
            let ts: Vec<i64> = chunk.iter(IterDirection::Forward).map(|s| s.timestamp).collect();
            assert_eq!(ts, vec![20, 25, 30]);
        }
    }

    #[test]
    fn test_latest_chunk_keeps_budget() {
        for chunk_type in TYPES {
            let mut chunk = chunk_with(chunk_type, &[10, 20, 30]);
            chunk.upsert(Sample::new(15, 1.0), DuplicatePolicy::Block).unwrap();
            chunk.delete_sample(20).unwrap();
            assert_eq!(chunk.capacity_bytes(), 1024, "{}", chunk_type);
        }
    }

    #[test]
    fn test_snapshot_with_huge_capacity_is_not_preallocated() {
        let mut snapshot = MemorySnapshot::new();
        snapshot.save_unsigned(ChunkType::Regular.tag());
        snapshot.save_signed(0);
        snapshot.save_unsigned(0);
        snapshot.save_unsigned(u64::MAX);
        snapshot.save_bytes(&[]);

        let mut cursor = SnapshotCursor::new(snapshot.finish()).unwrap();
        let chunk = Chunk::deserialize(&mut cursor).unwrap();
        assert!(chunk.is_empty());

        // Migrating the oversized budget fails cleanly instead of aborting
        assert!(matches!(
            chunk.convert(ChunkType::Compressed),
            Err(ChunkError::CodecOverflow(CompressionError::AllocationFailed(_)))
        ));
    }

    #[test]
    fn test_chunk_type_names() {
        assert_eq!("uncompressed".parse::<ChunkType>(), Ok(ChunkType::Regular));
        assert_eq!("COMPRESSED".parse::<ChunkType>(), Ok(ChunkType::Compressed));
        assert!("gzip".parse::<ChunkType>().is_err());
        assert_eq!(ChunkType::from_tag(ChunkType::Compressed.tag()), Some(ChunkType::Compressed));
    }

    #[test]
    fn test_same_behaviour_for_both_encodings() {
        for chunk_type in TYPES {
            let mut chunk = chunk_with(chunk_type, &[10, 20, 30, 40]);
            assert_eq!(chunk.chunk_type(), chunk_type);

            assert_eq!(chunk.upsert(Sample::new(25, 0.0), DuplicatePolicy::Block), Ok(1));
            assert_eq!(chunk.upsert(Sample::new(20, 5.0), DuplicatePolicy::Sum), Ok(0));
            assert_eq!(chunk.delete_sample(10), Ok(()));
            assert_eq!(chunk.delete_range(TimeRange::new(35, 100).unwrap()), Ok(1));

            assert_eq!(timestamps(&chunk), vec![20, 25, 30], "{}", chunk_type);
            assert_eq!(chunk.first_timestamp(), Some(20));
            assert_eq!(chunk.last_timestamp(), Some(30));
            let first = chunk.iter(IterDirection::Forward).next().unwrap();
            assert_eq!(first.value, 7.0);
        }
    }

    #[test]
    fn test_split_through_dispatch() {
        for chunk_type in TYPES {
            let mut left = chunk_with(chunk_type, &[1, 2, 3, 4, 5, 6]);
            let right = left.split().unwrap();
            assert_eq!(right.chunk_type(), chunk_type);
            assert_eq!(timestamps(&left), vec![1, 2, 3]);
            assert_eq!(timestamps(&right), vec![4, 5, 6]);
        }
    }

    #[test]
    fn test_convert_between_encodings() {
        let plain = chunk_with(ChunkType::Regular, &[5, 10, 15]);
        let packed = plain.convert(ChunkType::Compressed).unwrap();
        assert_eq!(packed.chunk_type(), ChunkType::Compressed);
        assert!(packed.size_bytes(false) <= plain.size_bytes(false));

        let back = packed.convert(ChunkType::Regular).unwrap();
        assert_eq!(
            back.iter(IterDirection::Forward).collect::<Vec<_>>(),
            plain.iter(IterDirection::Forward).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_aggregate_over_range() {
        for chunk_type in TYPES {
            let chunk = chunk_with(chunk_type, &[10, 20, 30, 40]);
            let range = TimeRange::new(15, 35).unwrap();
            assert_eq!(chunk.aggregate(AggregationType::Sum, range), Ok(5.0));
            assert_eq!(chunk.aggregate(AggregationType::Count, range), Ok(2.0));
            assert_eq!(
                chunk.aggregate(AggregationType::Avg, TimeRange::new(50, 60).unwrap()),
                Err(AggregationError::EmptyAccumulator)
            );
        }
    }

    #[test]
    fn test_snapshot_roundtrip_with_tag() {
        for chunk_type in TYPES {
            let chunk = chunk_with(chunk_type, &[-7, 0, 7]);
            let mut snapshot = MemorySnapshot::new();
            chunk.serialize(&mut snapshot);

            let mut cursor = SnapshotCursor::new(snapshot.finish()).unwrap();
            assert_eq!(Chunk::deserialize(&mut cursor).unwrap(), chunk);
        }

        let mut snapshot = MemorySnapshot::new();
        snapshot.save_unsigned(9);
        let mut cursor = SnapshotCursor::new(snapshot.finish()).unwrap();
        assert!(matches!(
            Chunk::deserialize(&mut cursor),
            Err(PersistenceError::Corrupted(_))
        ));
    }
}
