// SPDX-License-Identifier: AGPL-3.0-or-later
//! Subscriber setup
//!
//! The binary installs exactly one subscriber at startup from the loaded
//! configuration. Library code only emits events; it never configures
//! output itself.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{Result, RoostError};

/// Command-line overrides for the configured level
#[derive(Debug, Clone, Copy, Default)]
pub struct Verbosity {
    pub verbose: bool,
    pub debug: bool,
}

/// Filter for the given overrides, falling back to the configured level
pub fn build_filter(config: &LoggingConfig, verbosity: Verbosity) -> EnvFilter {
    if verbosity.debug {
        EnvFilter::new("debug")
    } else if verbosity.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("warn"))
    }
}

/// Install the global subscriber
pub fn init(config: &LoggingConfig, verbosity: Verbosity) -> Result<()> {
    let filter = build_filter(config, verbosity);
    let with_target = config.with_target || verbosity.debug;

    let installed = match config.format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(with_target)
            .with_writer(std::io::stderr)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(with_target)
            .with_writer(std::io::stderr)
            .try_init(),
    };

    installed.map_err(|e| RoostError::InvalidConfig {
        message: format!("logging already initialised: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_flag_wins_over_config() {
        let config = LoggingConfig {
            level: "error".to_string(),
            ..LoggingConfig::default()
        };
        let filter = build_filter(&config, Verbosity { verbose: false, debug: true });
        assert_eq!(filter.to_string(), "debug");
    }

    #[test]
    fn test_config_level_used_without_flags() {
        let config = LoggingConfig {
            level: "warn".to_string(),
            ..LoggingConfig::default()
        };
        let filter = build_filter(&config, Verbosity::default());
        assert_eq!(filter.to_string(), "warn");
    }
}
