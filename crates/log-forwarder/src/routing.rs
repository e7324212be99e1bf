// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Destination routing.
//!
//! Every fetched item is identified by an opaque string (`bucket/key` for
//! storage objects, the log group name for streamed logs). The resolver maps
//! that identity to the destination log, the format of its lines and the
//! sink credentials. An identity that resolves to no format is abandoned by
//! the forwarder before any line is read.

use serde::Deserialize;
use tracing::debug;

use crate::config::ForwarderConfig;
use crate::format::FormatTag;

/// Endpoint and key used to authenticate against the sink.
#[derive(Clone, PartialEq, Eq)]
pub struct SinkCredentials {
    pub endpoint: String,
    pub api_key: String,
}

impl std::fmt::Debug for SinkCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkCredentials")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Where an item's records go and how its lines are parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingInfo {
    pub log_name: String,
    pub log_set: Option<String>,
    /// `None` abandons the item.
    pub format: Option<FormatTag>,
    pub max_batch_size: usize,
    pub credentials: SinkCredentials,
}

pub trait RoutingResolver: Send + Sync {
    fn resolve(&self, identity: &str) -> RoutingInfo;
}

/// One entry of `FORWARDER_DESTINATIONS`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DestinationRule {
    /// Identities starting with this prefix use the rule.
    pub prefix: String,
    #[serde(default)]
    pub log_name: Option<String>,
    #[serde(default)]
    pub log_set: Option<String>,
    #[serde(default)]
    pub log_type: Option<FormatTag>,
}

/// Static destination table; the longest matching prefix wins.
#[derive(Debug, Clone)]
pub struct DestinationTable {
    rules: Vec<DestinationRule>,
    default_log_set: Option<String>,
    max_batch_size: usize,
    credentials: SinkCredentials,
}

impl DestinationTable {
    #[must_use]
    pub fn new(
        rules: Vec<DestinationRule>,
        default_log_set: Option<String>,
        max_batch_size: usize,
        credentials: SinkCredentials,
    ) -> Self {
        DestinationTable {
            rules,
            default_log_set,
            max_batch_size,
            credentials,
        }
    }

    #[must_use]
    pub fn from_config(config: &ForwarderConfig) -> Self {
        DestinationTable::new(
            config.destinations.clone(),
            config.default_log_set.clone(),
            config.max_batch_size,
            SinkCredentials {
                endpoint: config.endpoint.clone().unwrap_or_default(),
                api_key: config.api_key.clone().unwrap_or_default(),
            },
        )
    }

    fn rule_for(&self, identity: &str) -> Option<&DestinationRule> {
        self.rules
            .iter()
            .filter(|rule| identity.starts_with(rule.prefix.as_str()))
            .max_by_key(|rule| rule.prefix.len())
    }
}

impl RoutingResolver for DestinationTable {
    fn resolve(&self, identity: &str) -> RoutingInfo {
        let rule = self.rule_for(identity);
        debug!(
            "ROUTING | {} matched prefix {:?}",
            identity,
            rule.map(|rule| rule.prefix.as_str())
        );

        let log_name = rule
            .and_then(|rule| rule.log_name.clone())
            .unwrap_or_else(|| identity.to_string());
        let log_set = rule
            .and_then(|rule| rule.log_set.clone())
            .or_else(|| self.default_log_set.clone());

        RoutingInfo {
            log_name,
            log_set,
            format: rule.and_then(|rule| rule.log_type),
            max_batch_size: self.max_batch_size,
            credentials: self.credentials.clone(),
        }
    }
}
