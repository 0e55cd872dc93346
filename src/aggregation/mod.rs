//! Streaming aggregation contexts
//!
//! An [`Aggregator`] accumulates values one at a time and produces a single
//! result on [`finalize`](Aggregator::finalize). The same contexts back
//! chunk-level statistics and [`compaction`] rules.
//!
//! # Context shapes
//!
//! ```text
//! sum, count, first, last   -> Single   { value, is_reset }
//! avg                       -> Average  { sum, count }
//! std.p, std.s, var.p, var.s -> Moments { sum, sum_sq, count }
//! range                     -> Range    { min, max, is_reset }
//! min, max                  -> Extremum { value, is_reset }
//! ```
//!
//! Every shape knows whether it has seen a value; finalizing one that has
//! not fails with [`AggregationError::EmptyAccumulator`], which callers treat
//! as "no data for this bucket".
//!
//! # Example
//!
//! ```rust
//! use kuba_tscore::aggregation::{AggregationType, Aggregator};
//!
//! let mut avg = Aggregator::new("AVG".parse::<AggregationType>().unwrap());
//! for v in [1.0, 2.0, 3.0, 4.0] {
//!     avg.append(v);
//! }
//! assert_eq!(avg.finalize().unwrap(), 2.5);
//! ```

pub mod compaction;

pub use compaction::CompactionRule;

use crate::error::{AggregationError, PersistenceError};
use crate::persistence::{SnapshotReader, SnapshotWriter};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Aggregation kinds accepted at the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationType {
    /// Smallest value
    #[serde(rename = "min")]
    Min,
    /// Largest value
    #[serde(rename = "max")]
    Max,
    /// Sum of values
    #[serde(rename = "sum")]
    Sum,
    /// Arithmetic mean
    #[serde(rename = "avg")]
    Avg,
    /// Number of values
    #[serde(rename = "count")]
    Count,
    /// Earliest value
    #[serde(rename = "first")]
    First,
    /// Latest value
    #[serde(rename = "last")]
    Last,
    /// `max - min`
    #[serde(rename = "range")]
    Range,
    /// Population standard deviation
    #[serde(rename = "std.p")]
    StdP,
    /// Sample standard deviation
    #[serde(rename = "std.s")]
    StdS,
    /// Population variance
    #[serde(rename = "var.p")]
    VarP,
    /// Sample variance
    #[serde(rename = "var.s")]
    VarS,
}

impl AggregationType {
    /// Every kind, in id order
    pub const ALL: [AggregationType; 12] = [
        AggregationType::Min,
        AggregationType::Max,
        AggregationType::Sum,
        AggregationType::Avg,
        AggregationType::Count,
        AggregationType::First,
        AggregationType::Last,
        AggregationType::Range,
        AggregationType::StdP,
        AggregationType::StdS,
        AggregationType::VarP,
        AggregationType::VarS,
    ];

    /// Lower-case boundary name
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationType::Min => "min",
            AggregationType::Max => "max",
            AggregationType::Sum => "sum",
            AggregationType::Avg => "avg",
            AggregationType::Count => "count",
            AggregationType::First => "first",
            AggregationType::Last => "last",
            AggregationType::Range => "range",
            AggregationType::StdP => "std.p",
            AggregationType::StdS => "std.s",
            AggregationType::VarP => "var.p",
            AggregationType::VarS => "var.s",
        }
    }

    /// Stable id used in snapshots
    pub fn as_u64(&self) -> u64 {
        match self {
            AggregationType::Min => 0,
            AggregationType::Max => 1,
            AggregationType::Sum => 2,
            AggregationType::Avg => 3,
            AggregationType::Count => 4,
            AggregationType::First => 5,
            AggregationType::Last => 6,
            AggregationType::Range => 7,
            AggregationType::StdP => 8,
            AggregationType::StdS => 9,
            AggregationType::VarP => 10,
            AggregationType::VarS => 11,
        }
    }

    /// Kind for a snapshot id
    pub fn from_u64(id: u64) -> Option<Self> {
        Self::ALL.get(usize::try_from(id).ok()?).copied()
    }
}

impl fmt::Display for AggregationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_ascii_uppercase())
    }
}

impl FromStr for AggregationType {
    type Err = AggregationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .iter()
            .find(|kind| kind.as_str() == lower)
            .copied()
            .ok_or_else(|| AggregationError::UnknownAggregation(s.to_string()))
    }
}

/// Accumulated state, one shape per family of kinds
#[derive(Debug, Clone, Copy, PartialEq)]
enum Context {
    Single { value: f64, is_reset: bool },
    Average { sum: f64, count: u64 },
    Moments { sum: f64, sum_sq: f64, count: u64 },
    Range { min: f64, max: f64, is_reset: bool },
    Extremum { value: f64, is_reset: bool },
}

impl Context {
    fn fresh(kind: AggregationType) -> Self {
        match kind {
            AggregationType::Sum
            | AggregationType::Count
            | AggregationType::First
            | AggregationType::Last => Context::Single {
                value: 0.0,
                is_reset: true,
            },
            AggregationType::Avg => Context::Average { sum: 0.0, count: 0 },
            AggregationType::StdP
            | AggregationType::StdS
            | AggregationType::VarP
            | AggregationType::VarS => Context::Moments {
                sum: 0.0,
                sum_sq: 0.0,
                count: 0,
            },
            AggregationType::Range => Context::Range {
                min: f64::MAX,
                max: f64::MIN,
                is_reset: true,
            },
            AggregationType::Min => Context::Extremum {
                value: f64::MAX,
                is_reset: true,
            },
            AggregationType::Max => Context::Extremum {
                value: f64::MIN,
                is_reset: true,
            },
        }
    }
}

/// Streaming accumulator for one aggregation kind
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregator {
    kind: AggregationType,
    context: Context,
}

impl Aggregator {
    /// Create a context in its just-reset state
    pub fn new(kind: AggregationType) -> Self {
        Self {
            kind,
            context: Context::fresh(kind),
        }
    }

    /// Aggregation kind of this context
    pub fn kind(&self) -> AggregationType {
        self.kind
    }

    /// True until the first value is appended (or after a reset)
    pub fn is_empty(&self) -> bool {
        match self.context {
            Context::Single { is_reset, .. }
            | Context::Range { is_reset, .. }
            | Context::Extremum { is_reset, .. } => is_reset,
            Context::Average { count, .. } | Context::Moments { count, .. } => count == 0,
        }
    }

    /// Fold one value into the context
    pub fn append(&mut self, v: f64) {
        let kind = self.kind;
        match &mut self.context {
            Context::Single { value, is_reset } => {
                match kind {
                    AggregationType::Sum => *value += v,
                    AggregationType::Count => *value += 1.0,
                    AggregationType::First => {
                        if *is_reset {
                            *value = v;
                        }
                    }
                    _ => *value = v,
                }
                *is_reset = false;
            }
            Context::Average { sum, count } => {
                *sum += v;
                *count += 1;
            }
            Context::Moments { sum, sum_sq, count } => {
                *sum += v;
                *sum_sq += v * v;
                *count += 1;
            }
            Context::Range { min, max, is_reset } => {
                if v < *min {
                    *min = v;
                }
                if v > *max {
                    *max = v;
                }
                *is_reset = false;
            }
            Context::Extremum { value, is_reset } => {
                let better = match kind {
                    AggregationType::Min => v < *value,
                    _ => v > *value,
                };
                if better || *is_reset {
                    *value = v;
                }
                *is_reset = false;
            }
        }
    }

    /// Result of everything appended since creation or the last reset
    ///
    /// # Errors
    /// `EmptyAccumulator` if nothing was appended.
    pub fn finalize(&self) -> Result<f64, AggregationError> {
        if self.is_empty() {
            return Err(AggregationError::EmptyAccumulator);
        }
        let result = match self.context {
            Context::Single { value, .. } | Context::Extremum { value, .. } => value,
            Context::Average { sum, count } => sum / count as f64,
            Context::Range { min, max, .. } => max - min,
            Context::Moments { sum, sum_sq, count } => {
                let variance = match self.kind {
                    AggregationType::VarP | AggregationType::StdP => {
                        population_variance(sum, sum_sq, count)
                    }
                    _ => sample_variance(sum, sum_sq, count),
                };
                match self.kind {
                    AggregationType::StdP | AggregationType::StdS => variance.sqrt(),
                    _ => variance,
                }
            }
        };
        Ok(result)
    }

    /// Return to the just-created state
    pub fn reset(&mut self) {
        self.context = Context::fresh(self.kind);
    }

    /// Write kind id and context through the snapshot primitives
    ///
    /// "Was any value appended" flags are stored as a 1-byte string.
    pub fn serialize<W: SnapshotWriter + ?Sized>(&self, writer: &mut W) {
        writer.save_unsigned(self.kind.as_u64());
        match self.context {
            Context::Single { value, is_reset } | Context::Extremum { value, is_reset } => {
                writer.save_double(value);
                writer.save_bytes(&[is_reset as u8]);
            }
            Context::Average { sum, count } => {
                writer.save_double(sum);
                writer.save_unsigned(count);
            }
            Context::Moments { sum, sum_sq, count } => {
                writer.save_double(sum);
                writer.save_double(sum_sq);
                writer.save_unsigned(count);
            }
            Context::Range { min, max, is_reset } => {
                writer.save_double(min);
                writer.save_double(max);
                writer.save_bytes(&[is_reset as u8]);
            }
        }
    }

    /// Read a context written by [`serialize`](Self::serialize)
    pub fn deserialize<R: SnapshotReader + ?Sized>(reader: &mut R) -> Result<Self, PersistenceError> {
        let id = reader.read_unsigned()?;
        let kind = AggregationType::from_u64(id)
            .ok_or_else(|| PersistenceError::Corrupted(format!("unknown aggregation id {}", id)))?;

        let context = match Context::fresh(kind) {
            Context::Single { .. } => Context::Single {
                value: reader.read_double()?,
                is_reset: read_flag(reader)?,
            },
            Context::Extremum { .. } => Context::Extremum {
                value: reader.read_double()?,
                is_reset: read_flag(reader)?,
            },
            Context::Average { .. } => Context::Average {
                sum: reader.read_double()?,
                count: reader.read_unsigned()?,
            },
            Context::Moments { .. } => Context::Moments {
                sum: reader.read_double()?,
                sum_sq: reader.read_double()?,
                count: reader.read_unsigned()?,
            },
            Context::Range { .. } => Context::Range {
                min: reader.read_double()?,
                max: reader.read_double()?,
                is_reset: read_flag(reader)?,
            },
        };
        Ok(Self { kind, context })
    }
}

/// Fold `values` into a fresh context of `kind` and finalize it
pub fn aggregate_values<I>(kind: AggregationType, values: I) -> Result<f64, AggregationError>
where
    I: IntoIterator<Item = f64>,
{
    let mut aggregator = Aggregator::new(kind);
    for v in values {
        aggregator.append(v);
    }
    aggregator.finalize()
}

// Evaluated in this exact order so results match existing stored data
fn population_variance(sum: f64, sum_sq: f64, count: u64) -> f64 {
    let n = count as f64;
    let mean = sum / n;
    (sum_sq - 2.0 * sum * sum / n + mean * mean * n) / n
}

fn sample_variance(sum: f64, sum_sq: f64, count: u64) -> f64 {
    if count == 1 {
        return 0.0;
    }
    let n = count as f64;
    population_variance(sum, sum_sq, count) * n / (n - 1.0)
}

fn read_flag<R: SnapshotReader + ?Sized>(reader: &mut R) -> Result<bool, PersistenceError> {
    match &reader.read_bytes()?[..] {
        [0] => Ok(false),
        [1] => Ok(true),
        other => Err(PersistenceError::Corrupted(format!(
            "invalid context flag {:?}",
            other
        ))),
    }
}
