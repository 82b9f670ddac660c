// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_PORT: u16 = 3100;
const DEFAULT_LOG_FILE: &str = "relay.log";
const DEFAULT_MAX_LOG_SIZE: usize = 10_000;
// 5MB cap on a single request body
const DEFAULT_MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Collector-side configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen port.
    pub port: u16,
    pub enable_file_logging: bool,
    /// Only used when file logging is enabled.
    pub log_file: PathBuf,
    /// Informational: the served CORS header is the wildcard.
    pub cors_origins: Vec<String>,
    /// Maximum message length in characters; longer messages are
    /// truncated, not rejected.
    pub max_log_size: usize,
    /// Maximum accepted request body size in bytes.
    pub max_body_bytes: usize,
    /// Cap on how long a handler waits for a request body.
    pub body_read_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            enable_file_logging: false,
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            cors_origins: vec!["*".to_string()],
            max_log_size: DEFAULT_MAX_LOG_SIZE,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            body_read_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Create configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let port = env::var("RELAY_PORT")
            .ok()
            .and_then(|port| port.parse::<u16>().ok())
            .unwrap_or(defaults.port);
        let enable_file_logging = env::var("RELAY_FILE_LOGGING")
            .map(|val| val.to_lowercase() == "true")
            .unwrap_or(defaults.enable_file_logging);
        let log_file = env::var("RELAY_LOG_FILE")
            .map(PathBuf::from)
            .unwrap_or(defaults.log_file);
        let cors_origins = env::var("RELAY_CORS_ORIGINS")
            .map(|val| {
                val.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or(defaults.cors_origins);
        let max_log_size = env::var("RELAY_MAX_LOG_SIZE")
            .ok()
            .and_then(|val| val.parse::<usize>().ok())
            .unwrap_or(defaults.max_log_size);

        let config = Self {
            port,
            enable_file_logging,
            log_file,
            cors_origins,
            max_log_size,
            max_body_bytes: defaults.max_body_bytes,
            body_read_timeout: defaults.body_read_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_log_size == 0 {
            return Err(ConfigError::Invalid(
                "max log size must be greater than 0".to_string(),
            ));
        }
        if self.enable_file_logging && self.log_file.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "log file path cannot be empty when file logging is enabled".to_string(),
            ));
        }
        Ok(())
    }
}
