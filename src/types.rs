//! Core data types shared by the chunk engine
//!
//! # Key Types
//!
//! - **`Sample`**: A single measurement (timestamp + value)
//! - **`TimeRange`**: Inclusive time window used by range deletes and statistics
//! - **`DuplicatePolicy`**: Conflict resolution for upserts on an occupied timestamp
//! - **`ChunkPosition`**: Latest or sealed, deciding whether rebuilds keep spare room
//!
//! # Example
//!
//! ```rust
//! use kuba_tscore::types::{DuplicatePolicy, Sample, TimeRange};
//!
//! let sample = Sample::new(1000, 42.5);
//! let range = TimeRange::new(1000, 2000).unwrap();
//! assert!(range.contains(sample.timestamp));
//!
//! assert_eq!(DuplicatePolicy::Sum.resolve(10.0, 20.0), Ok(30.0));
//! ```

use crate::error::ChunkError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sample timestamp (milliseconds, signed)
pub type Timestamp = i64;

/// Bytes taken by one uncompressed sample (timestamp + value)
pub const SAMPLE_SIZE: usize = std::mem::size_of::<Timestamp>() + std::mem::size_of::<f64>();

/// A single time-series measurement
///
/// Samples are plain `Copy` values; chunks store sequences of them as parallel
/// arrays or packed bits, never as individually owned objects.
///
/// # Memory Layout
///
/// ```text
/// |--Timestamp(8)--|--Value(8)--|
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Timestamp in milliseconds; negative values are allowed
    pub timestamp: Timestamp,

    /// IEEE 754 double-precision value, including NaN and infinities
    pub value: f64,
}

impl Sample {
    /// Create a new sample
    pub fn new(timestamp: Timestamp, value: f64) -> Self {
        Self { timestamp, value }
    }

    /// Bit-exact equality (distinguishes `-0.0` from `0.0`, matches NaN payloads)
    pub fn bit_eq(&self, other: &Sample) -> bool {
        self.timestamp == other.timestamp && self.value.to_bits() == other.value.to_bits()
    }
}

/// Time range (inclusive on both ends)
///
/// # Example
///
/// ```rust
/// use kuba_tscore::types::TimeRange;
///
/// let range = TimeRange::new(1000, 2000).unwrap();
/// assert!(range.contains(1000));
/// assert!(range.contains(2000));
/// assert!(!range.contains(2001));
///
/// assert!(TimeRange::new(2000, 1000).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp (inclusive)
    pub start: Timestamp,

    /// End timestamp (inclusive)
    pub end: Timestamp,
}

impl TimeRange {
    /// Create a new time range, rejecting `start > end`
    pub fn new(start: Timestamp, end: Timestamp) -> Result<Self, ChunkError> {
        if start > end {
            return Err(ChunkError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Range covering every representable timestamp
    pub fn all() -> Self {
        Self {
            start: Timestamp::MIN,
            end: Timestamp::MAX,
        }
    }

    /// Check if a timestamp falls within this range (inclusive)
    pub fn contains(&self, timestamp: Timestamp) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::all()
    }
}

/// Where a chunk sits within its series
///
/// The latest chunk still receives appends, so a rebuild keeps its spare
/// room. Any older chunk is sealed and a rebuild shrinks it to the bytes it
/// uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChunkPosition {
    /// Newest chunk of the series
    #[default]
    Latest,
    /// Any chunk before the newest
    Sealed,
}

/// Policy applied when an upsert targets an already occupied timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Reject the incoming sample
    #[default]
    Block,
    /// Keep the stored value
    First,
    /// Overwrite with the incoming value
    Last,
    /// Keep the smaller of the two
    Min,
    /// Keep the larger of the two
    Max,
    /// Store the sum of both
    Sum,
}

/// Rejection produced by [`DuplicatePolicy::resolve`] under `Block`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateConflict;

impl DuplicatePolicy {
    /// Decide the surviving value for a timestamp that already holds `existing`
    ///
    /// `First` returns the stored value unchanged and is a success, not an
    /// error. Both chunk encodings call this function, so upsert semantics do
    /// not depend on the representation.
    pub fn resolve(self, existing: f64, incoming: f64) -> Result<f64, DuplicateConflict> {
        match self {
            DuplicatePolicy::Block => Err(DuplicateConflict),
            DuplicatePolicy::First => Ok(existing),
            DuplicatePolicy::Last => Ok(incoming),
            DuplicatePolicy::Min => Ok(if incoming < existing { incoming } else { existing }),
            DuplicatePolicy::Max => Ok(if incoming > existing { incoming } else { existing }),
            DuplicatePolicy::Sum => Ok(existing + incoming),
        }
    }

    /// Resolve and map a conflict into the chunk error for `timestamp`
    pub(crate) fn resolve_at(
        self,
        timestamp: Timestamp,
        existing: f64,
        incoming: f64,
    ) -> Result<f64, ChunkError> {
        let resolved = self.resolve(existing, incoming).map_err(|_| {
            ChunkError::DuplicateTimestampConflict {
                timestamp,
                existing,
                incoming,
            }
        });
        crate::metrics::record_duplicate_resolution(self, resolved.is_ok());
        resolved
    }

    /// Lower-case policy name
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicatePolicy::Block => "block",
            DuplicatePolicy::First => "first",
            DuplicatePolicy::Last => "last",
            DuplicatePolicy::Min => "min",
            DuplicatePolicy::Max => "max",
            DuplicatePolicy::Sum => "sum",
        }
    }
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "block" => Ok(DuplicatePolicy::Block),
            "first" => Ok(DuplicatePolicy::First),
            "last" => Ok(DuplicatePolicy::Last),
            "min" => Ok(DuplicatePolicy::Min),
            "max" => Ok(DuplicatePolicy::Max),
            "sum" => Ok(DuplicatePolicy::Sum),
            other => Err(format!("unknown duplicate policy '{}'", other)),
        }
    }
}
