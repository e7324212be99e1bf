// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log line formatting and process-wide logging initialisation.
//!
//! Every line is prefixed so forwarder output can be told apart from the
//! application logs it shares a stream with:
//!
//! ```text
//! LOG_FORWARDER | INFO | FORWARDER | Forwarded logs/alb/file.log.gz lines=3
//! LOG_FORWARDER | DEBUG | item{identity="/aws/lambda/checkout"}: BATCH | ...
//! ```

use std::fmt;
use std::sync::Once;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Formats events as `LOG_FORWARDER | LEVEL | spans: message fields`.
#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(&mut writer, "LOG_FORWARDER | {} | ", metadata.level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Installs the global subscriber. Only the first call has an effect.
///
/// An unparseable `level` falls back to `info`.
pub fn init(level: &str) {
    INIT.call_once(|| {
        let env_filter = format!("h2=off,hyper=off,rustls=off,{level}");
        let filter = EnvFilter::try_new(&env_filter).unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = tracing_subscriber::fmt::Subscriber::builder()
            .with_env_filter(filter)
            .without_time()
            .event_format(Formatter)
            .finish();

        if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
            eprintln!("LOG_FORWARDER | WARN | logging already initialised: {e}");
        }
    });
}
