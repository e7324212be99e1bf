// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event-to-sink orchestration.
//!
//! # Flow
//!
//! ```text
//!   event ──normalize──> retrievers ──fetch──> identity ──resolve──> RoutingInfo
//!                                                                       │
//!                      ┌──────────── format absent: abandon item ───────┤
//!                      │                                                v
//!                      │                 line source ──> parser ──> accumulator ──> sink
//!                      │                                    │
//!                      │                                    └──> parsed_<name>.gz (file output)
//!                      v
//!                 next item
//! ```
//!
//! # Failure handling
//!
//! - A line that does not match its grammar is forwarded verbatim.
//! - An item without identity or format is abandoned with an `INFO` log;
//!   the remaining items of the event are still processed.
//! - An item of unrecognized type stops the whole event, without error.
//! - Fetch, decode, side-artifact and sink failures are returned to the
//!   caller and end the invocation.
//!
//! Processing is sequential. Downloaded artifacts live in a scratch
//! directory that is removed when the invocation returns, unless a
//! persistent work directory is configured.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, field, info, info_span, Instrument, Span};

use crate::batch::BatchAccumulator;
use crate::config::{ForwarderConfig, OutputMode};
use crate::error::ForwarderError;
use crate::event::normalize;
use crate::line_source;
use crate::parser::{self, LineParser};
use crate::retriever::{DefaultRetrieverFactory, Retriever, RetrieverFactory};
use crate::routing::{DestinationTable, RoutingResolver};
use crate::side_artifact;
use crate::sink::{HttpSinkFactory, Sink, SinkFactory, SinkOptions};

/// Outcome of one artifact's dispatch loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    pub lines: usize,
    pub structured: usize,
    pub batches: usize,
}

/// Outcome of one event.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EventSummary {
    /// Items parsed to completion
    pub processed: usize,
    /// Items skipped for missing identity or format
    pub abandoned: usize,
    /// True when an unrecognized item stopped the event
    pub aborted: bool,
    pub lines: usize,
    pub batches: usize,
}

/// Feeds every parsed line of `parser` through `accumulator` and sends each
/// flushed batch to `sink`, in order.
///
/// A send failure stops the loop and is returned; lines after the failing
/// batch are not read.
pub async fn dispatch(
    parser: &mut LineParser,
    mut accumulator: BatchAccumulator,
    sink: &dyn Sink,
) -> Result<DispatchSummary, ForwarderError> {
    let mut summary = DispatchSummary::default();

    for record in parser.parsed_lines()? {
        let record = record?;
        summary.lines += 1;
        if record.is_structured() {
            summary.structured += 1;
        }
        if let Some(batch) = accumulator.add(record.into_payload()) {
            sink.send(&batch).await?;
            summary.batches += 1;
        }
    }

    if let Some(batch) = accumulator.finish() {
        sink.send(&batch).await?;
        summary.batches += 1;
    }

    Ok(summary)
}

pub struct Forwarder {
    retrievers: Arc<dyn RetrieverFactory>,
    routing: Arc<dyn RoutingResolver>,
    sinks: Arc<dyn SinkFactory>,
    output: OutputMode,
    work_dir: Option<PathBuf>,
}

impl Forwarder {
    #[must_use]
    pub fn new(
        retrievers: Arc<dyn RetrieverFactory>,
        routing: Arc<dyn RoutingResolver>,
        sinks: Arc<dyn SinkFactory>,
    ) -> Self {
        Forwarder {
            retrievers,
            routing,
            sinks,
            output: OutputMode::Forward,
            work_dir: None,
        }
    }

    /// Production collaborators built from `config`, sharing `client`.
    #[must_use]
    pub fn from_config(config: &ForwarderConfig, client: reqwest::Client) -> Self {
        let retrievers = DefaultRetrieverFactory::from_config(config.object_store.as_ref(), &client);
        let routing = DestinationTable::from_config(config);
        let sinks = HttpSinkFactory::new(client, SinkOptions::from_config(config));

        Forwarder::new(Arc::new(retrievers), Arc::new(routing), Arc::new(sinks))
            .with_output(config.output)
            .with_work_dir(config.work_dir.clone())
    }

    #[must_use]
    pub fn with_output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    #[must_use]
    pub fn with_work_dir(mut self, work_dir: Option<PathBuf>) -> Self {
        self.work_dir = work_dir;
        self
    }

    /// Entry point for one inbound notification, direct or bridged.
    pub async fn forward_logs(&self, event: Value) -> Result<EventSummary, ForwarderError> {
        debug!("FORWARDER | Received event: {}", event);
        let event = normalize(event);
        self.process(&event).await
    }

    /// Processes a normalized notification to completion.
    pub async fn process(&self, event: &Value) -> Result<EventSummary, ForwarderError> {
        let scratch = Scratch::new(self.work_dir.as_deref())?;
        let mut summary = EventSummary::default();

        for retriever in self.retrievers.retrievers(event, scratch.path()) {
            let Some(mut retriever) = retriever else {
                info!("FORWARDER | Unknown item type in event, aborting");
                summary.aborted = true;
                break;
            };
            let span = info_span!("item", identity = field::Empty);
            self.process_item(retriever.as_mut(), &mut summary)
                .instrument(span)
                .await?;
        }

        info!(
            "FORWARDER | Event done: {} items processed, {} abandoned, {} lines, {} batches",
            summary.processed, summary.abandoned, summary.lines, summary.batches
        );
        Ok(summary)
    }

    async fn process_item(
        &self,
        retriever: &mut dyn Retriever,
        summary: &mut EventSummary,
    ) -> Result<(), ForwarderError> {
        debug!("FORWARDER | Retriever selected: {}", retriever.name());
        retriever.fetch().await?;

        let (Some(identity), Some(artifact)) = (retriever.identity(), retriever.artifact_path())
        else {
            info!("FORWARDER | Item has no identity, skipping");
            summary.abandoned += 1;
            return Ok(());
        };
        Span::current().record("identity", identity);

        let routing = self.routing.resolve(identity);
        info!(
            "FORWARDER | Destination for {}: log_name={}, log_set={:?}, format={:?}",
            identity, routing.log_name, routing.log_set, routing.format
        );
        let Some(format) = routing.format else {
            info!(
                "FORWARDER | No format could be resolved for {}, skipping",
                identity
            );
            summary.abandoned += 1;
            return Ok(());
        };

        let mut parser = parser::select(format, line_source::open(format, artifact));
        debug!("FORWARDER | {:?}", parser);

        let mut lines = 0;
        if self.output.writes_file() {
            let (path, written) = side_artifact::write_parsed(&mut parser)?;
            info!("FORWARDER | Wrote {} lines to {}", written, path.display());
            lines = written;
        }
        if self.output.forwards() {
            let sink = self.sinks.create(&routing)?;
            let key = match retriever.delivery() {
                Some(delivery) => format!("{identity}@{delivery}"),
                None => identity.to_string(),
            };
            let accumulator = BatchAccumulator::new(key, routing.max_batch_size);
            let dispatched = dispatch(&mut parser, accumulator, sink.as_ref()).await?;
            info!(
                "FORWARDER | Forwarded {}: {} lines ({} structured) in {} batches",
                identity, dispatched.lines, dispatched.structured, dispatched.batches
            );
            lines = dispatched.lines;
            summary.batches += dispatched.batches;
        }

        summary.lines += lines;
        summary.processed += 1;
        Ok(())
    }
}

/// Per-invocation directory for fetched artifacts.
enum Scratch {
    Temporary(TempDir),
    Persistent(PathBuf),
}

impl Scratch {
    fn new(work_dir: Option<&Path>) -> Result<Self, ForwarderError> {
        match work_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(|e| ForwarderError::io(dir, e))?;
                Ok(Scratch::Persistent(dir.to_path_buf()))
            }
            None => tempfile::Builder::new()
                .prefix("log-forwarder-")
                .tempdir()
                .map(Scratch::Temporary)
                .map_err(|e| ForwarderError::io(std::env::temp_dir(), e)),
        }
    }

    fn path(&self) -> &Path {
        match self {
            Scratch::Temporary(dir) => dir.path(),
            Scratch::Persistent(dir) => dir,
        }
    }
}
