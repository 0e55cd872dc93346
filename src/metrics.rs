//! Metrics for the chunk engine
//!
//! Prometheus counters for chunk mutations, compressed-chunk rebuilds, codec
//! buffer growth, duplicate resolution and empty compaction buckets. All
//! metrics register with the default registry on first use.

use crate::aggregation::AggregationType;
use crate::config::MonitoringConfig;
use crate::error::ChunkError;
use crate::types::DuplicatePolicy;
use lazy_static::lazy_static;
use prometheus::{register_counter_vec, CounterVec, Encoder, TextEncoder};

lazy_static! {
    /// Chunk operations by encoding, operation and outcome
    pub static ref CHUNK_OPERATIONS_TOTAL: CounterVec = register_counter_vec!(
        "tscore_chunk_operations_total",
        "Total chunk operations",
        &["encoding", "operation", "status"]
    ).unwrap();

    /// Compressed chunks rebuilt by decode-replay
    pub static ref CHUNK_REBUILDS_TOTAL: CounterVec = register_counter_vec!(
        "tscore_chunk_rebuilds_total",
        "Compressed chunk rebuilds",
        &["operation"]
    ).unwrap();

    /// Bytes added to packed buffers on overflow
    pub static ref CODEC_GROWTH_BYTES_TOTAL: CounterVec = register_counter_vec!(
        "tscore_codec_growth_bytes_total",
        "Bytes added to compressed chunk buffers",
        &["reason"]
    ).unwrap();

    /// Duplicate timestamps resolved by policy
    pub static ref DUPLICATE_RESOLUTIONS_TOTAL: CounterVec = register_counter_vec!(
        "tscore_duplicate_resolutions_total",
        "Upserts that hit an existing timestamp",
        &["policy", "outcome"]
    ).unwrap();

    /// Compaction buckets closed without any value
    pub static ref EMPTY_BUCKETS_TOTAL: CounterVec = register_counter_vec!(
        "tscore_empty_buckets_total",
        "Compaction buckets finalized while empty",
        &["aggregation"]
    ).unwrap();
}

/// Get metrics in Prometheus text format
///
/// # Returns
///
/// Result containing the formatted metrics string, or an error if encoding fails
pub fn gather_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

/// Gather metrics when the monitoring config enables them
pub fn export(config: &MonitoringConfig) -> Result<Option<String>, String> {
    if !config.metrics_enabled {
        return Ok(None);
    }
    gather_metrics().map(Some)
}

/// Record a chunk operation outcome
#[inline]
pub fn record_chunk_op<T>(encoding: &str, operation: &str, result: &Result<T, ChunkError>) {
    let status = match result {
        Ok(_) => "ok",
        Err(ChunkError::ChunkFull { .. }) => "full",
        Err(ChunkError::OutOfOrder { .. }) => "out_of_order",
        Err(ChunkError::DuplicateTimestampConflict { .. }) => "conflict",
        Err(ChunkError::DeleteNotFound { .. }) => "not_found",
        Err(ChunkError::CodecOverflow(_)) => "overflow",
        Err(ChunkError::InvalidRange { .. }) => "invalid_range",
    };
    CHUNK_OPERATIONS_TOTAL
        .with_label_values(&[encoding, operation, status])
        .inc();
}

/// Record a compressed chunk rebuild
#[inline]
pub fn record_rebuild(operation: &str) {
    CHUNK_REBUILDS_TOTAL.with_label_values(&[operation]).inc();
}

/// Record packed buffer growth
#[inline]
pub fn record_codec_growth(bytes: usize) {
    CODEC_GROWTH_BYTES_TOTAL
        .with_label_values(&["append"])
        .inc_by(bytes as f64);
}

/// Record a duplicate-timestamp resolution
#[inline]
pub fn record_duplicate_resolution(policy: DuplicatePolicy, accepted: bool) {
    let outcome = if accepted { "accepted" } else { "rejected" };
    DUPLICATE_RESOLUTIONS_TOTAL
        .with_label_values(&[policy.as_str(), outcome])
        .inc();
}

/// Record a compaction bucket that closed with no data
#[inline]
pub fn record_empty_bucket(kind: AggregationType) {
    EMPTY_BUCKETS_TOTAL
        .with_label_values(&[kind.as_str()])
        .inc();
}
