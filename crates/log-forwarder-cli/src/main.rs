// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use anyhow::Context;
use std::env;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info};

use log_forwarder::config::ForwarderConfig;
use log_forwarder::forwarder::Forwarder;
use log_forwarder::http::get_client;
use log_forwarder::{log_build_info, logger};

/// Usage: `log-forwarder-cli [EVENT_FILE]`. The event is read from stdin
/// when no file is given.
#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let log_level = env::var("FORWARDER_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    logger::init(&log_level);
    debug!("Logging subsystem enabled");
    log_build_info();

    let config = match ForwarderConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return Err(e.into());
        }
    };

    let raw = read_event(env::args().nth(1)).await?;
    let event: serde_json::Value =
        serde_json::from_str(&raw).context("event is not valid JSON")?;

    let forwarder = Forwarder::from_config(&config, get_client(&config));
    match forwarder.forward_logs(event).await {
        Ok(summary) => {
            info!(
                "Done: {} items processed, {} abandoned, {} batches sent",
                summary.processed, summary.abandoned, summary.batches
            );
            Ok(())
        }
        Err(e) => {
            error!("Forwarding failed: {}", e);
            Err(e.into())
        }
    }
}

async fn read_event(path: Option<String>) -> anyhow::Result<String> {
    match path {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read event from {path}")),
        None => {
            let mut raw = String::new();
            tokio::io::stdin()
                .read_to_string(&mut raw)
                .await
                .context("failed to read event from stdin")?;
            Ok(raw)
        }
    }
}
