//! Kuba TSCore - chunk storage engine for a time-series key-value extension
//!
//! This library provides the storage core behind a single time series:
//! - Plain and Kuba-compressed chunks behind one [`Chunk`] interface
//! - Duplicate-timestamp policies for out-of-order upserts
//! - Forward and reverse sample iteration
//! - Twelve streaming aggregations and bucketed compaction rules
//! - Checksummed snapshots of chunks and compaction state
//!
//! # Example
//!
//! ```rust
//! use kuba_tscore::{AggregationType, Chunk, ChunkType, Sample, TimeRange};
//!
//! let mut chunk = Chunk::new(ChunkType::Compressed, 256);
//! for i in 0..10 {
//!     chunk.add(Sample::new(1_000 + i * 10, i as f64)).unwrap();
//! }
//! let sum = chunk.aggregate(AggregationType::Sum, TimeRange::all()).unwrap();
//! assert_eq!(sum, 45.0);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compression;
pub mod error;
pub mod persistence;
pub mod storage;
pub mod types;

/// Streaming aggregations and compaction rules
pub mod aggregation;

/// Configuration management with TOML support
pub mod config;

/// Tracing subscriber setup
pub mod logging;

/// Prometheus metrics and telemetry
pub mod metrics;

// Re-export main types
pub use aggregation::{AggregationType, Aggregator, CompactionRule};
pub use config::Config;
pub use error::{Error, Result};
pub use storage::{Chunk, ChunkIterator, ChunkType, IterDirection};
pub use types::{ChunkPosition, DuplicatePolicy, Sample, TimeRange, Timestamp};
