//! Time-bucketed downsampling
//!
//! A [`CompactionRule`] watches the samples of a source series and emits one
//! aggregated sample per closed bucket. Buckets are aligned to multiples of
//! the bucket duration:
//!
//! ```text
//! bucket 60_000:  ts 125_000 -> bucket 120_000
//!                 ts -1      -> bucket -60_000
//! ```
//!
//! A bucket closes when the first sample of a later bucket arrives. The rule
//! never looks back: samples older than the open bucket are ignored.

use super::{AggregationType, Aggregator};
use crate::error::{AggregationError, PersistenceError};
use crate::metrics;
use crate::persistence::{SnapshotReader, SnapshotWriter};
use crate::types::{Sample, Timestamp};
use tracing::debug;

/// Downsampling rule from a source series into `dest_key`
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionRule {
    dest_key: String,
    bucket_duration: u64,
    aggregator: Aggregator,
    bucket_start: Option<Timestamp>,
}

impl CompactionRule {
    /// Create a rule with an empty aggregation context
    ///
    /// # Errors
    /// `InvalidBucket` if the duration is zero or does not fit an `i64`.
    pub fn new(
        dest_key: impl Into<String>,
        bucket_duration: u64,
        kind: AggregationType,
    ) -> Result<Self, AggregationError> {
        if bucket_duration == 0 || i64::try_from(bucket_duration).is_err() {
            return Err(AggregationError::InvalidBucket(bucket_duration));
        }
        Ok(Self {
            dest_key: dest_key.into(),
            bucket_duration,
            aggregator: Aggregator::new(kind),
            bucket_start: None,
        })
    }

    /// Key of the series receiving compacted samples
    pub fn dest_key(&self) -> &str {
        &self.dest_key
    }

    /// Bucket width in milliseconds
    pub fn bucket_duration(&self) -> u64 {
        self.bucket_duration
    }

    /// Aggregation applied to each bucket
    pub fn kind(&self) -> AggregationType {
        self.aggregator.kind()
    }

    /// Start of the bucket currently accumulating
    pub fn bucket_start(&self) -> Option<Timestamp> {
        self.bucket_start
    }

    /// Start of the bucket holding `timestamp`
    ///
    /// Buckets below `i64::MIN` saturate to it.
    pub fn bucket_of(&self, timestamp: Timestamp) -> Timestamp {
        let width = self.bucket_duration as i64;
        timestamp.saturating_sub(timestamp.rem_euclid(width))
    }

    /// Feed one source sample
    ///
    /// Returns the compacted sample for the bucket this sample closed, if
    /// that bucket held any data.
    pub fn ingest(&mut self, sample: Sample) -> Option<Sample> {
        let start = self.bucket_of(sample.timestamp);
        let mut emitted = None;

        match self.bucket_start {
            Some(current) if start < current => {
                debug!(
                    dest = %self.dest_key,
                    timestamp = sample.timestamp,
                    bucket_start = current,
                    "Ignoring sample older than the open bucket"
                );
                return None;
            }
            Some(current) if start > current => {
                emitted = self.close_bucket(current);
                self.bucket_start = Some(start);
            }
            Some(_) => {}
            None => self.bucket_start = Some(start),
        }

        self.aggregator.append(sample.value);
        emitted
    }

    /// Close the open bucket without waiting for a later sample
    pub fn flush(&mut self) -> Option<Sample> {
        let current = self.bucket_start.take()?;
        self.close_bucket(current)
    }

    fn close_bucket(&mut self, start: Timestamp) -> Option<Sample> {
        let result = match self.aggregator.finalize() {
            Ok(value) => Some(Sample::new(start, value)),
            Err(_) => {
                metrics::record_empty_bucket(self.aggregator.kind());
                None
            }
        };
        self.aggregator.reset();
        result
    }

    /// Write the rule through the snapshot primitives
    ///
    /// Layout: dest key bytes, bucket duration, aggregator, then a 0/1 marker
    /// followed by the open bucket start when one exists.
    pub fn serialize<W: SnapshotWriter + ?Sized>(&self, writer: &mut W) {
        writer.save_bytes(self.dest_key.as_bytes());
        writer.save_unsigned(self.bucket_duration);
        self.aggregator.serialize(writer);
        match self.bucket_start {
            Some(start) => {
                writer.save_unsigned(1);
                writer.save_signed(start);
            }
            None => writer.save_unsigned(0),
        }
    }

    /// Read a rule written by [`serialize`](Self::serialize)
    pub fn deserialize<R: SnapshotReader + ?Sized>(reader: &mut R) -> Result<Self, PersistenceError> {
        let key = reader.read_bytes()?;
        let dest_key = String::from_utf8(key.to_vec())
            .map_err(|e| PersistenceError::Corrupted(format!("destination key: {}", e)))?;
        let bucket_duration = reader.read_unsigned()?;
        let aggregator = Aggregator::deserialize(reader)?;
        let bucket_start = match reader.read_unsigned()? {
            0 => None,
            1 => Some(reader.read_signed()?),
            other => {
                return Err(PersistenceError::Corrupted(format!(
                    "invalid bucket marker {}",
                    other
                )))
            }
        };

        let mut rule = CompactionRule::new(dest_key, bucket_duration, aggregator.kind())
            .map_err(|e| PersistenceError::Corrupted(e.to_string()))?;
        rule.aggregator = aggregator;
        rule.bucket_start = bucket_start;
        Ok(rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{MemorySnapshot, SnapshotCursor};

    #[test]
    fn test_rejects_zero_bucket() {
        assert_eq!(
            CompactionRule::new("dst", 0, AggregationType::Sum),
            Err(AggregationError::InvalidBucket(0))
        );
        assert!(CompactionRule::new("dst", u64::MAX, AggregationType::Sum).is_err());
    }

    #[test]
    fn test_bucket_alignment() {
        let rule = CompactionRule::new("dst", 60_000, AggregationType::Sum).unwrap();
        assert_eq!(rule.bucket_of(125_000), 120_000);
        assert_eq!(rule.bucket_of(120_000), 120_000);
        assert_eq!(rule.bucket_of(-1), -60_000);
        assert_eq!(rule.bucket_of(i64::MIN), i64::MIN);
    }

    #[test]
    fn test_emits_on_bucket_change() {
        let mut rule = CompactionRule::new("cpu:avg", 10, AggregationType::Avg).unwrap();
        assert_eq!(rule.ingest(Sample::new(1, 1.0)), None);
        assert_eq!(rule.ingest(Sample::new(5, 3.0)), None);
        assert_eq!(rule.ingest(Sample::new(12, 10.0)), Some(Sample::new(0, 2.0)));
        assert_eq!(rule.bucket_start(), Some(10));

        // Skip an entire bucket
        assert_eq!(rule.ingest(Sample::new(35, 0.0)), Some(Sample::new(10, 10.0)));
        assert_eq!(rule.flush(), Some(Sample::new(30, 0.0)));
        assert_eq!(rule.flush(), None);
    }

    #[test]
    fn test_ignores_late_samples() {
        let mut rule = CompactionRule::new("dst", 10, AggregationType::Count).unwrap();
        rule.ingest(Sample::new(20, 1.0));
        assert_eq!(rule.ingest(Sample::new(3, 1.0)), None);
        rule.ingest(Sample::new(25, 1.0));
        assert_eq!(rule.ingest(Sample::new(30, 1.0)), Some(Sample::new(20, 2.0)));
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut rule = CompactionRule::new("temp:max", 1000, AggregationType::Max).unwrap();
        rule.ingest(Sample::new(1500, -4.0));
        rule.ingest(Sample::new(1600, -7.0));

        let mut snapshot = MemorySnapshot::new();
        rule.serialize(&mut snapshot);
        let mut cursor = SnapshotCursor::new(snapshot.finish()).unwrap();
        let mut restored = CompactionRule::deserialize(&mut cursor).unwrap();

        assert_eq!(restored, rule);
        assert_eq!(restored.dest_key(), "temp:max");
        assert_eq!(
            restored.ingest(Sample::new(2000, 1.0)),
            Some(Sample::new(1000, -4.0))
        );
    }
}
