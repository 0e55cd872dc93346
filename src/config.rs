//! Configuration management
//!
//! TOML configuration with serde defaults and environment variable overrides.
//!
//! ```toml
//! [storage]
//! chunk_size_bytes = 4096
//! encoding = "compressed"
//! duplicate_policy = "last"
//!
//! [compaction]
//! default_bucket_ms = 60000
//!
//! [monitoring]
//! log_level = "debug"
//! ```

use crate::aggregation::{AggregationType, CompactionRule};
use crate::error::{AggregationError, ChunkError, Error, Result, ValidationError};
use crate::storage::{Chunk, ChunkType};
use crate::types::{ChunkPosition, DuplicatePolicy, Sample};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Smallest accepted chunk budget (three uncompressed samples)
pub const MIN_CHUNK_SIZE_BYTES: usize = 48;

/// Largest accepted chunk budget
pub const MAX_CHUNK_SIZE_BYTES: usize = 1_048_576;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Config {
    /// Chunk storage settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Compaction defaults
    #[serde(default)]
    pub compaction: CompactionConfig,

    /// Monitoring and observability
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StorageConfig {
    /// Byte budget of a new chunk
    #[serde(default = "default_chunk_size_bytes")]
    pub chunk_size_bytes: usize,

    /// Encoding of new chunks
    #[serde(default)]
    pub encoding: ChunkType,

    /// Policy for upserts on an occupied timestamp
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
}

/// Compaction configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CompactionConfig {
    /// Bucket width used when a rule does not name one
    #[serde(default = "default_bucket_ms")]
    pub default_bucket_ms: u64,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MonitoringConfig {
    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Log level or filter directive (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Include event targets in log lines; compact output otherwise
    #[serde(default = "default_true")]
    pub structured_logging: bool,
}

// Default value functions
fn default_chunk_size_bytes() -> usize { 4096 }
fn default_bucket_ms() -> u64 { 60_000 }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: default_chunk_size_bytes(),
            encoding: ChunkType::default(),
            duplicate_policy: DuplicatePolicy::default(),
        }
    }
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            default_bucket_ms: default_bucket_ms(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            log_level: default_log_level(),
            structured_logging: true,
        }
    }
}

impl StorageConfig {
    /// Empty chunk with the configured encoding and budget
    pub fn new_chunk(&self) -> Chunk {
        Chunk::new(self.encoding, self.chunk_size_bytes)
    }

    /// Upsert `sample` into `chunk` under the configured duplicate policy
    pub fn upsert(
        &self,
        chunk: &mut Chunk,
        sample: Sample,
        position: ChunkPosition,
    ) -> std::result::Result<usize, ChunkError> {
        chunk.upsert_at(sample, self.duplicate_policy, position)
    }
}

impl CompactionConfig {
    /// Compaction rule into `dest_key` using the default bucket width
    pub fn new_rule(
        &self,
        dest_key: impl Into<String>,
        kind: AggregationType,
    ) -> std::result::Result<CompactionRule, AggregationError> {
        CompactionRule::new(dest_key, self.default_bucket_ms, kind)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            Error::Configuration(msg) => {
                Error::Configuration(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(size) = std::env::var("TS_CHUNK_SIZE_BYTES") {
            match size.parse() {
                Ok(bytes) => self.storage.chunk_size_bytes = bytes,
                Err(e) => warn!(value = %size, error = %e, "Ignoring TS_CHUNK_SIZE_BYTES"),
            }
        }
        if let Ok(encoding) = std::env::var("TS_CHUNK_ENCODING") {
            match encoding.parse() {
                Ok(chunk_type) => self.storage.encoding = chunk_type,
                Err(e) => warn!(value = %encoding, error = %e, "Ignoring TS_CHUNK_ENCODING"),
            }
        }
        if let Ok(policy) = std::env::var("TS_DUPLICATE_POLICY") {
            match policy.parse() {
                Ok(p) => self.storage.duplicate_policy = p,
                Err(e) => warn!(value = %policy, error = %e, "Ignoring TS_DUPLICATE_POLICY"),
            }
        }

        // Monitoring
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.monitoring.log_level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        let size = self.storage.chunk_size_bytes;
        if !(MIN_CHUNK_SIZE_BYTES..=MAX_CHUNK_SIZE_BYTES).contains(&size) {
            return Err(ValidationError::OutOfRange {
                field: "storage.chunk_size_bytes".to_string(),
                value: size.to_string(),
                min: MIN_CHUNK_SIZE_BYTES.to_string(),
                max: MAX_CHUNK_SIZE_BYTES.to_string(),
            });
        }
        if size % 8 != 0 {
            return Err(ValidationError::InvalidFormat {
                field: "storage.chunk_size_bytes".to_string(),
                message: format!("{} is not a multiple of 8", size),
            });
        }

        if self.compaction.default_bucket_ms == 0 {
            return Err(ValidationError::Failed(
                "compaction.default_bucket_ms must be > 0".to_string(),
            ));
        }

        if self.monitoring.log_level.trim().is_empty() {
            return Err(ValidationError::InvalidFormat {
                field: "monitoring.log_level".to_string(),
                message: "cannot be empty".to_string(),
            });
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| Error::Configuration(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
