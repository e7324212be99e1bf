// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Log Forwarder
//!
//! Turns cloud log artifacts into structured records and ships them to a
//! log-management endpoint in size-bounded batches.
//!
//! ## Overview
//!
//! One inbound notification (an object-storage change or a streamed
//! log-group delivery) resolves to zero or more items. For every item the
//! forwarder:
//!
//! 1. Fetches the raw artifact ([`retriever`])
//! 2. Resolves where it goes and which format it is in ([`routing`])
//! 3. Opens a lazy line source over it ([`line_source`])
//! 4. Binds the format's grammar to that source ([`parser`], [`grammar`])
//! 5. Accumulates parsed records into batches ([`batch`])
//! 6. Sends each batch to the sink once it grows past the size threshold,
//!    and once more at end of stream ([`sink`], [`forwarder`])
//!
//! Everything runs sequentially inside one invocation: lines are parsed and
//! sent strictly in order and no task is spawned.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]
#![deny(unused_extern_crates)]
#![deny(unreachable_pub)]

/// Size-bounded record batches and the flush policy
pub mod batch;

/// Environment-driven configuration
pub mod config;

/// Error types shared across the pipeline
pub mod error;

/// Inbound notification envelopes
pub mod event;

/// Log format tags
pub mod format;

/// Event-to-sink orchestration
pub mod forwarder;

/// Compiled line grammars, one per structured format
pub mod grammar;

/// HTTP client construction
pub mod http;

/// Lazy line sources over fetched artifacts
pub mod line_source;

/// Tracing formatter and process-wide logging initialisation
pub mod logger;

/// Line parsers and the format dispatcher
pub mod parser;

/// Artifact retrieval for storage objects and streamed log groups
pub mod retriever;

/// Destination routing for item identities
pub mod routing;

/// Gzip side artifact holding parsed lines
pub mod side_artifact;

/// Downstream sink clients
pub mod sink;

/// Forwarder version reported in the `User-Agent` header and at startup.
pub const FORWARDER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Logs the forwarder version at INFO level.
pub fn log_build_info() {
    tracing::info!("log-forwarder version: {}", FORWARDER_VERSION);
}
