// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;
use std::env;
use std::time::Duration;

use crate::record::LogLevel;

const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3100/log";

/// Deployment profile the producer runs under. Resolved once at
/// startup; the resulting config is immutable apart from explicit
/// `update_config` calls on the interceptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Profile {
    /// Local interactive development: small, fast batches, every level.
    Interactive,
    /// Production: large, slow batches, warn and error only.
    Production,
    /// Test runs: forwarding disabled by default.
    Test,
}

impl Profile {
    pub fn from_env() -> Profile {
        Self::resolve(env::var("RELAY_PROFILE").ok().as_deref())
    }

    fn resolve(val: Option<&str>) -> Profile {
        match val.map(str::to_lowercase).as_deref() {
            Some("production") | Some("prod") => Profile::Production,
            Some("test") => Profile::Test,
            _ => Profile::Interactive,
        }
    }
}

/// Producer-side configuration for capture, batching and delivery.
#[derive(Clone, Debug)]
pub struct ForwarderConfig {
    /// Collector ingestion endpoint.
    pub server_url: String,
    /// Master switch; nothing is buffered or sent when false.
    pub enabled: bool,
    /// Flush immediately once the buffer reaches this many records.
    pub batch_size: usize,
    /// Flush on expiry even if `batch_size` was not reached.
    pub batch_timeout: Duration,
    /// Total delivery attempts per batch before it is dropped.
    pub max_retries: u32,
    /// Base unit for the linear retry backoff (attempt * base).
    pub retry_backoff_base: Duration,
    pub include_user_agent: bool,
    pub include_url: bool,
    /// Levels accepted for capture; others are dropped before buffering.
    pub log_levels: HashSet<LogLevel>,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self::for_profile(Profile::Interactive)
    }
}

impl ForwarderConfig {
    pub fn for_profile(profile: Profile) -> Self {
        let base = ForwarderConfig {
            server_url: DEFAULT_SERVER_URL.to_string(),
            enabled: true,
            batch_size: 10,
            batch_timeout: Duration::from_secs(2),
            max_retries: 3,
            retry_backoff_base: Duration::from_secs(1),
            include_user_agent: true,
            include_url: true,
            log_levels: LogLevel::ALL.into_iter().collect(),
        };
        match profile {
            Profile::Interactive => base,
            Profile::Production => ForwarderConfig {
                batch_size: 50,
                batch_timeout: Duration::from_secs(30),
                log_levels: [LogLevel::Warn, LogLevel::Error].into_iter().collect(),
                ..base
            },
            Profile::Test => ForwarderConfig {
                enabled: false,
                ..base
            },
        }
    }

    /// Profile preset with environment overrides applied on top.
    pub fn from_env(profile: Profile) -> Self {
        let mut config = Self::for_profile(profile);
        if let Ok(url) = env::var("RELAY_SERVER_URL") {
            if !url.trim().is_empty() {
                config.server_url = url;
            }
        }
        if let Ok(enabled) = env::var("RELAY_FORWARDING_ENABLED") {
            config.enabled = enabled.to_lowercase() != "false";
        }
        config
    }

    pub fn accepts(&self, level: LogLevel) -> bool {
        self.enabled && self.log_levels.contains(&level)
    }

    /// Shallow-merges the update into the live config. Affects
    /// subsequent captures only; already-buffered records are untouched.
    pub fn apply(&mut self, update: ConfigUpdate) {
        if let Some(server_url) = update.server_url {
            self.server_url = server_url;
        }
        if let Some(enabled) = update.enabled {
            self.enabled = enabled;
        }
        if let Some(batch_size) = update.batch_size {
            self.batch_size = batch_size;
        }
        if let Some(batch_timeout) = update.batch_timeout {
            self.batch_timeout = batch_timeout;
        }
        if let Some(max_retries) = update.max_retries {
            self.max_retries = max_retries;
        }
        if let Some(include_user_agent) = update.include_user_agent {
            self.include_user_agent = include_user_agent;
        }
        if let Some(include_url) = update.include_url {
            self.include_url = include_url;
        }
        if let Some(log_levels) = update.log_levels {
            self.log_levels = log_levels;
        }
    }
}

/// Partial config for `update_config`; unset fields keep their value.
#[derive(Clone, Debug, Default)]
pub struct ConfigUpdate {
    pub server_url: Option<String>,
    pub enabled: Option<bool>,
    pub batch_size: Option<usize>,
    pub batch_timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub include_user_agent: Option<bool>,
    pub include_url: Option<bool>,
    pub log_levels: Option<HashSet<LogLevel>>,
}
