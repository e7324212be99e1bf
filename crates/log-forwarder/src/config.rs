// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::batch::DEFAULT_MAX_BATCH_SIZE;
use crate::error::ConfigError;
use crate::routing::DestinationRule;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// What the forwarder does with parsed lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Send batches to the sink
    #[default]
    Forward,
    /// Only write the `parsed_<name>.gz` side artifact
    File,
    /// Write the side artifact and send batches
    Both,
}

impl OutputMode {
    #[must_use]
    pub fn forwards(self) -> bool {
        matches!(self, OutputMode::Forward | OutputMode::Both)
    }

    #[must_use]
    pub fn writes_file(self) -> bool {
        matches!(self, OutputMode::File | OutputMode::Both)
    }
}

impl FromStr for OutputMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "forward" => Ok(OutputMode::Forward),
            "file" => Ok(OutputMode::File),
            "both" => Ok(OutputMode::Both),
            other => Err(ConfigError::Invalid {
                name: "FORWARDER_OUTPUT",
                reason: format!("'{other}' is not one of: forward, file, both"),
            }),
        }
    }
}

/// Where storage objects are fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectStoreConfig {
    /// `<root>/<container>/<key>` on the local filesystem
    Local(PathBuf),
    /// `GET <base url>/<container>/<key>`
    Http(String),
}

/// Configuration for the forwarder, read from `FORWARDER_*` variables
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Sink intake URL
    pub endpoint: Option<String>,
    /// Sink API key
    pub api_key: Option<String>,
    /// Batch flush threshold, in bytes
    pub max_batch_size: usize,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
    /// HTTPS proxy URL
    pub https_proxy: Option<String>,
    /// Per-request timeout, in seconds
    pub flush_timeout: u64,
    /// Attempts per batch before a send fails
    pub retry_attempts: u32,
    pub use_compression: bool,
    pub compression_level: i32,
    pub destinations: Vec<DestinationRule>,
    /// Log set used when a destination rule names none
    pub default_log_set: Option<String>,
    pub object_store: Option<ObjectStoreConfig>,
    /// Persistent scratch directory; a temporary one is used when unset
    pub work_dir: Option<PathBuf>,
    pub output: OutputMode,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            log_level: "info".to_string(),
            https_proxy: None,
            flush_timeout: 10,
            retry_attempts: 3,
            use_compression: true,
            compression_level: 3,
            destinations: Vec::new(),
            default_log_set: None,
            object_store: None,
            work_dir: None,
            output: OutputMode::Forward,
        }
    }
}

impl ForwarderConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Create configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let max_batch_size: usize = match var("FORWARDER_MAX_BATCH_SIZE") {
            Some(value) => parse_number("FORWARDER_MAX_BATCH_SIZE", &value)?,
            None => defaults.max_batch_size,
        };
        let flush_timeout: u64 = match var("FORWARDER_FLUSH_TIMEOUT") {
            Some(value) => parse_number("FORWARDER_FLUSH_TIMEOUT", &value)?,
            None => defaults.flush_timeout,
        };
        let retry_attempts: u32 = match var("FORWARDER_RETRY_ATTEMPTS") {
            Some(value) => parse_number("FORWARDER_RETRY_ATTEMPTS", &value)?,
            None => defaults.retry_attempts,
        };
        let compression_level: i32 = match var("FORWARDER_COMPRESSION_LEVEL") {
            Some(value) => parse_number("FORWARDER_COMPRESSION_LEVEL", &value)?,
            None => defaults.compression_level,
        };
        let use_compression = var("FORWARDER_USE_COMPRESSION")
            .map(|value| value.to_lowercase() != "false")
            .unwrap_or(defaults.use_compression);
        let destinations: Vec<DestinationRule> = match var("FORWARDER_DESTINATIONS") {
            Some(value) => {
                serde_json::from_str(&value).map_err(|e| ConfigError::Invalid {
                    name: "FORWARDER_DESTINATIONS",
                    reason: e.to_string(),
                })?
            }
            None => Vec::new(),
        };
        let object_store = match (
            var("FORWARDER_OBJECT_STORE_DIR"),
            var("FORWARDER_OBJECT_STORE_URL"),
        ) {
            (Some(dir), _) => Some(ObjectStoreConfig::Local(PathBuf::from(dir))),
            (None, Some(url)) => Some(ObjectStoreConfig::Http(url)),
            (None, None) => None,
        };
        let output = match var("FORWARDER_OUTPUT") {
            Some(value) => value.parse()?,
            None => defaults.output,
        };

        let config = Self {
            endpoint: var("FORWARDER_ENDPOINT"),
            api_key: var("FORWARDER_API_KEY"),
            max_batch_size,
            log_level: var("FORWARDER_LOG_LEVEL")
                .map(|value| value.to_lowercase())
                .unwrap_or(defaults.log_level),
            https_proxy: var("FORWARDER_HTTPS_PROXY").or_else(|| var("HTTPS_PROXY")),
            flush_timeout,
            retry_attempts,
            use_compression,
            compression_level,
            destinations,
            default_log_set: var("FORWARDER_DEFAULT_LOG_SET"),
            object_store,
            work_dir: var("FORWARDER_WORK_DIR").map(PathBuf::from),
            output,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output.forwards() {
            if self.endpoint.is_none() {
                return Err(ConfigError::Missing("FORWARDER_ENDPOINT"));
            }
            if self.api_key.is_none() {
                return Err(ConfigError::Missing("FORWARDER_API_KEY"));
            }
        }

        // A temporary scratch directory would take the side artifact with it
        if self.output.writes_file() && self.work_dir.is_none() {
            return Err(ConfigError::Missing("FORWARDER_WORK_DIR"));
        }

        if self.max_batch_size == 0 {
            return Err(ConfigError::Invalid {
                name: "FORWARDER_MAX_BATCH_SIZE",
                reason: "must be greater than 0".to_string(),
            });
        }

        if self.retry_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "FORWARDER_RETRY_ATTEMPTS",
                reason: "must be greater than 0".to_string(),
            });
        }

        if !(1..=22).contains(&self.compression_level) {
            return Err(ConfigError::Invalid {
                name: "FORWARDER_COMPRESSION_LEVEL",
                reason: format!("{} is outside 1..=22", self.compression_level),
            });
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid {
                name: "FORWARDER_LOG_LEVEL",
                reason: format!(
                    "'{}' must be one of: trace, debug, info, warn, error",
                    self.log_level
                ),
            });
        }

        Ok(())
    }
}

fn parse_number<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: format!("'{value}': {e}"),
    })
}
