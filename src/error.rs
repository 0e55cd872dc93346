//! Error types for the chunk engine

use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    /// Chunk operation error
    #[error("Chunk error: {0}")]
    Chunk(#[from] ChunkError),

    /// Compression error
    #[error("Compression error: {0}")]
    Compression(#[from] CompressionError),

    /// Aggregation error
    #[error("Aggregation error: {0}")]
    Aggregation(#[from] AggregationError),

    /// Snapshot persistence error
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Chunk errors
///
/// Every variant is returned to the immediate caller; none of them leaves the
/// chunk partially modified.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChunkError {
    /// No room left for another sample; the caller should open a new chunk
    #[error("Chunk full: capacity is {capacity} bytes")]
    ChunkFull {
        /// Byte budget of the chunk
        capacity: usize,
    },

    /// Append with a timestamp that does not follow the last sample
    #[error("Out of order sample: timestamp {timestamp} is not after last timestamp {last}")]
    OutOfOrder {
        /// Rejected timestamp
        timestamp: i64,
        /// Last timestamp stored in the chunk
        last: i64,
    },

    /// Upsert hit an existing timestamp under the `Block` policy
    #[error("Duplicate timestamp {timestamp}: existing value {existing}, new value {incoming}")]
    DuplicateTimestampConflict {
        /// The duplicate timestamp
        timestamp: i64,
        /// Value already stored
        existing: f64,
        /// Value that was rejected
        incoming: f64,
    },

    /// Delete of a timestamp that is not present
    #[error("No sample at timestamp {timestamp}")]
    DeleteNotFound {
        /// Timestamp that was requested
        timestamp: i64,
    },

    /// Packed buffer could not be grown
    #[error("Codec overflow: {0}")]
    CodecOverflow(#[from] CompressionError),

    /// Inverted time range
    #[error("Invalid time range: start {start} > end {end}")]
    InvalidRange {
        /// Start timestamp
        start: i64,
        /// End timestamp
        end: i64,
    },
}

/// Compression errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompressionError {
    /// Not enough bits left in the packed buffer
    #[error("Buffer full: needed {needed} bits, {available} available")]
    BufferFull {
        /// Bits required by the write
        needed: usize,
        /// Bits still free in the buffer
        available: usize,
    },

    /// Data is corrupted
    #[error("Corrupted data: {0}")]
    CorruptedData(String),

    /// Invalid input data
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Buffer growth failed
    #[error("Allocation failed: {0}")]
    AllocationFailed(String),
}

/// Aggregation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregationError {
    /// Finalize on a context that never received a value
    ///
    /// Callers treat this as "no data for this bucket".
    #[error("Empty accumulator")]
    EmptyAccumulator,

    /// Aggregation name not recognised
    #[error("Unknown aggregation type: {0}")]
    UnknownAggregation(String),

    /// Compaction bucket duration must be positive
    #[error("Invalid bucket duration: {0}")]
    InvalidBucket(u64),
}

/// Snapshot persistence errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// Stream ended before the expected item
    #[error("Unexpected end of snapshot")]
    UnexpectedEof,

    /// Next item has a different kind than requested
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Kind the caller asked for
        expected: &'static str,
        /// Kind found in the stream
        found: &'static str,
    },

    /// Checksum verification failed
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Checksum stored in the trailer
        expected: u64,
        /// Checksum computed over the payload
        actual: u64,
    },

    /// Loaded data violates a structural invariant
    #[error("Corrupted snapshot: {0}")]
    Corrupted(String),
}

impl From<CompressionError> for PersistenceError {
    fn from(e: CompressionError) -> Self {
        PersistenceError::Corrupted(e.to_string())
    }
}

/// Validation errors
///
/// Error type for configuration and input validation
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Value is out of allowed range
    #[error("{field} value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        /// Field name being validated
        field: String,
        /// The invalid value
        value: String,
        /// Minimum allowed value
        min: String,
        /// Maximum allowed value
        max: String,
    },

    /// Invalid format
    #[error("Invalid format for {field}: {message}")]
    InvalidFormat {
        /// Field name being validated
        field: String,
        /// Description of the format error
        message: String,
    },

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    Failed(String),
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Error::Configuration(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
