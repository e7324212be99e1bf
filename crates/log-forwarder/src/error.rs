// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

/// Errors raised while loading or validating the forwarder configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Errors raised by a sink while transmitting a batch
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Invalid value for header {name}: {reason}")]
    InvalidHeader { name: &'static str, reason: String },

    #[error("Failed to encode batch {batch_id}: {source}")]
    Encode {
        batch_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Batch {batch_id} was rejected with status {status}: {body}")]
    Rejected {
        batch_id: String,
        status: u16,
        body: String,
    },

    #[error("Failed to send batch {batch_id} after {attempts} attempts: {message}")]
    Transport {
        batch_id: String,
        attempts: u32,
        message: String,
    },
}

/// Hard failures that terminate an invocation
#[derive(Debug, thiserror::Error)]
pub enum ForwarderError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },

    #[error("Failed to fetch object {container}/{key}: {reason}")]
    Fetch {
        container: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ForwarderError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ForwarderError::Io {
            path: path.into(),
            source,
        }
    }
}
