//! Tracing subscriber setup
//!
//! Library code only emits `tracing` events. Hosts that want them on stderr
//! call [`init`] once at startup.

use crate::config::MonitoringConfig;
use crate::error::{Error, Result};
use tracing_subscriber::EnvFilter;

/// Build the filter for `config`
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn env_filter(config: &MonitoringConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.log_level).map_err(|e| {
            Error::Configuration(format!("invalid log level '{}': {}", config.log_level, e))
        }),
    }
}

/// Install the global fmt subscriber
///
/// Fails if the level is not a valid filter directive or a global subscriber
/// is already set.
pub fn init(config: &MonitoringConfig) -> Result<()> {
    let filter = env_filter(config)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let installed = if config.structured_logging {
        builder.with_target(true).try_init()
    } else {
        builder.with_target(false).compact().try_init()
    };
    installed.map_err(|e| Error::Configuration(format!("logging already initialized: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_rejected() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = MonitoringConfig {
            log_level: "tscore=notalevel".to_string(),
            ..MonitoringConfig::default()
        };
        assert!(matches!(env_filter(&config), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_second_init_fails() {
        let config = MonitoringConfig::default();
        let _ = init(&config);
        assert!(init(&config).is_err());
    }
}
