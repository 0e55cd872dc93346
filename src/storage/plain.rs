//! Array-backed chunk
//!
//! `PlainChunk` keeps timestamps and values in parallel vectors. It is the
//! baseline encoding and also the decode target used for reverse iteration
//! over compressed chunks.
//!
//! # Memory Layout
//!
//! ```text
//! timestamps: |t0|t1|t2|...|t(n-1)|  <- sorted, unique
//! values:     |v0|v1|v2|...|v(n-1)|
//! capacity:   samples the byte budget allows (bytes / 16)
//! ```

use crate::error::{ChunkError, PersistenceError};
use crate::persistence::{SnapshotReader, SnapshotWriter};
use crate::types::{DuplicatePolicy, Sample, TimeRange, Timestamp, SAMPLE_SIZE};
use tracing::debug;

/// Uncompressed chunk of sorted samples
#[derive(Debug, Clone, PartialEq)]
pub struct PlainChunk {
    timestamps: Vec<Timestamp>,
    values: Vec<f64>,
    /// Sample slots the chunk may hold before `add` reports `ChunkFull`
    capacity: usize,
    base_timestamp: Timestamp,
}

impl PlainChunk {
    /// Create an empty chunk with a byte budget of `size_bytes`
    ///
    /// The budget is rounded down to whole samples.
    pub fn new(size_bytes: usize) -> Self {
        Self::with_sample_capacity(size_bytes / SAMPLE_SIZE)
    }

    /// Create an empty chunk holding up to `capacity` samples
    pub fn with_sample_capacity(capacity: usize) -> Self {
        Self {
            timestamps: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
            capacity,
            base_timestamp: 0,
        }
    }

    /// Number of samples stored
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// True if the chunk holds no samples
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Sample slots available in total
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Byte budget (`capacity * 16`)
    pub fn capacity_bytes(&self) -> usize {
        self.capacity * SAMPLE_SIZE
    }

    /// Timestamp of the first sample (meaningless while empty)
    pub fn base_timestamp(&self) -> Timestamp {
        self.base_timestamp
    }

    /// Timestamp of the first sample
    pub fn first_timestamp(&self) -> Option<Timestamp> {
        self.timestamps.first().copied()
    }

    /// Timestamp of the last sample
    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.timestamps.last().copied()
    }

    /// Sample at position `index`
    pub fn sample_at(&self, index: usize) -> Option<Sample> {
        Some(Sample::new(
            *self.timestamps.get(index)?,
            *self.values.get(index)?,
        ))
    }

    /// Memory used by the sample arrays, plus the struct itself if asked
    pub fn size_bytes(&self, include_struct: bool) -> usize {
        let header = if include_struct {
            std::mem::size_of::<Self>()
        } else {
            0
        };
        self.capacity_bytes() + header
    }

    /// Append a sample after the last one
    ///
    /// # Errors
    /// - `ChunkFull` when every slot is used
    /// - `OutOfOrder` when `timestamp` does not follow the last sample
    pub fn add(&mut self, sample: Sample) -> Result<(), ChunkError> {
        if self.len() >= self.capacity {
            return Err(ChunkError::ChunkFull {
                capacity: self.capacity_bytes(),
            });
        }
        if let Some(last) = self.last_timestamp() {
            if sample.timestamp <= last {
                return Err(ChunkError::OutOfOrder {
                    timestamp: sample.timestamp,
                    last,
                });
            }
        } else {
            self.base_timestamp = sample.timestamp;
        }
        self.timestamps.push(sample.timestamp);
        self.values.push(sample.value);
        Ok(())
    }

    /// Insert or merge a sample at any position
    ///
    /// A full chunk grows by one slot instead of failing. Returns the number
    /// of samples added: 0 when an existing timestamp was resolved through
    /// `policy`, 1 for an insertion.
    ///
    /// # Errors
    /// `DuplicateTimestampConflict` under `Block`; the chunk is unchanged.
    pub fn upsert(&mut self, sample: Sample, policy: DuplicatePolicy) -> Result<usize, ChunkError> {
        let rank = self.rank_of(sample.timestamp);

        if self.timestamps.get(rank) == Some(&sample.timestamp) {
            let resolved = policy.resolve_at(sample.timestamp, self.values[rank], sample.value)?;
            self.values[rank] = resolved;
            return Ok(0);
        }

        if self.len() >= self.capacity {
            self.capacity += 1;
        }
        self.timestamps.insert(rank, sample.timestamp);
        self.values.insert(rank, sample.value);
        if rank == 0 {
            self.base_timestamp = sample.timestamp;
        }
        Ok(1)
    }

    /// Remove the sample at `timestamp`
    ///
    /// # Errors
    /// `DeleteNotFound` if no sample has that timestamp.
    pub fn delete_sample(&mut self, timestamp: Timestamp) -> Result<(), ChunkError> {
        let index = self
            .timestamps
            .binary_search(&timestamp)
            .map_err(|_| ChunkError::DeleteNotFound { timestamp })?;
        self.timestamps.remove(index);
        self.values.remove(index);
        self.refresh_base();
        Ok(())
    }

    /// Remove every sample inside `range` (inclusive), returning how many
    pub fn delete_range(&mut self, range: TimeRange) -> usize {
        let lo = self.rank_of(range.start);
        let hi = self.timestamps.partition_point(|&t| t <= range.end);
        if lo >= hi {
            return 0;
        }
        self.timestamps.drain(lo..hi);
        self.values.drain(lo..hi);
        self.refresh_base();
        hi - lo
    }

    /// Set the slot budget without reserving memory for it
    pub(crate) fn set_capacity(&mut self, capacity: usize) {
        assert!(capacity >= self.len(), "capacity below sample count");
        self.capacity = capacity;
    }

    /// Shrink the slot budget to the samples held
    pub fn release_slack(&mut self) {
        self.capacity = self.len();
        self.timestamps.shrink_to_fit();
        self.values.shrink_to_fit();
    }

    /// Move the newest floor(n/2) samples into a new chunk
    ///
    /// `self` keeps the oldest ceil(n/2) samples and shrinks to exactly that
    /// many slots; the returned chunk is sized to what it holds.
    ///
    /// # Panics
    /// If the chunk is empty.
    pub fn split(&mut self) -> PlainChunk {
        assert!(!self.is_empty(), "cannot split an empty chunk");
        let total = self.len();
        let keep = total - total / 2;

        let timestamps = self.timestamps.split_off(keep);
        let values = self.values.split_off(keep);
        let moved = timestamps.len();
        let right = PlainChunk {
            base_timestamp: timestamps.first().copied().unwrap_or(self.base_timestamp),
            timestamps,
            values,
            capacity: moved,
        };

        self.capacity = keep;
        self.timestamps.shrink_to_fit();
        self.values.shrink_to_fit();

        debug!(total, kept = keep, moved, "Split plain chunk");
        right
    }

    /// Write the chunk through the snapshot primitives
    ///
    /// Layout: base_timestamp, num_samples, capacity_bytes, then one byte
    /// string of little-endian (timestamp, value bits) pairs.
    pub fn serialize<W: SnapshotWriter + ?Sized>(&self, writer: &mut W) {
        writer.save_signed(self.base_timestamp);
        writer.save_unsigned(self.len() as u64);
        writer.save_unsigned(self.capacity_bytes() as u64);

        let mut payload = Vec::with_capacity(self.len() * SAMPLE_SIZE);
        for (ts, value) in self.timestamps.iter().zip(&self.values) {
            payload.extend_from_slice(&ts.to_le_bytes());
            payload.extend_from_slice(&value.to_bits().to_le_bytes());
        }
        writer.save_bytes(&payload);
    }

    /// Read a chunk written by [`serialize`](Self::serialize)
    ///
    /// # Errors
    /// `Corrupted` if the payload disagrees with its header or breaks the
    /// ordering invariant.
    pub fn deserialize<R: SnapshotReader + ?Sized>(reader: &mut R) -> Result<Self, PersistenceError> {
        let base_timestamp = reader.read_signed()?;
        let count = to_usize(reader.read_unsigned()?)?;
        let capacity = to_usize(reader.read_unsigned()?)? / SAMPLE_SIZE;
        let payload = reader.read_bytes()?;

        if count > capacity {
            return Err(PersistenceError::Corrupted(format!(
                "{} samples exceed capacity of {}",
                count, capacity
            )));
        }
        if count.checked_mul(SAMPLE_SIZE) != Some(payload.len()) {
            return Err(PersistenceError::Corrupted(format!(
                "payload of {} bytes does not hold {} samples",
                payload.len(),
                count
            )));
        }

        // Only the stored samples are reserved; the slot budget is a number
        let mut chunk = PlainChunk::with_sample_capacity(count);
        chunk.set_capacity(capacity);
        for pair in payload.chunks_exact(SAMPLE_SIZE) {
            let (ts, value) = pair.split_at(8);
            let ts = i64::from_le_bytes(to_array(ts)?);
            let value = f64::from_bits(u64::from_le_bytes(to_array(value)?));
            chunk
                .add(Sample::new(ts, value))
                .map_err(|e| PersistenceError::Corrupted(e.to_string()))?;
        }

        if !chunk.is_empty() && chunk.base_timestamp != base_timestamp {
            return Err(PersistenceError::Corrupted(format!(
                "base timestamp {} does not match first sample {}",
                base_timestamp, chunk.base_timestamp
            )));
        }
        chunk.base_timestamp = base_timestamp;
        Ok(chunk)
    }

    pub(crate) fn timestamps(&self) -> &[Timestamp] {
        &self.timestamps
    }

    pub(crate) fn values(&self) -> &[f64] {
        &self.values
    }

    /// Count of timestamps strictly below `timestamp`
    fn rank_of(&self, timestamp: Timestamp) -> usize {
        self.timestamps.partition_point(|&t| t < timestamp)
    }

    fn refresh_base(&mut self) {
        if let Some(&first) = self.timestamps.first() {
            self.base_timestamp = first;
        }
    }
}

fn to_usize(value: u64) -> Result<usize, PersistenceError> {
    usize::try_from(value).map_err(|_| PersistenceError::Corrupted(format!("{} overflows usize", value)))
}

fn to_array(bytes: &[u8]) -> Result<[u8; 8], PersistenceError> {
    bytes
        .try_into()
        .map_err(|_| PersistenceError::Corrupted("short sample field".to_string()))
}
