// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Downstream sinks.
//!
//! A sink is created per item from its [`RoutingInfo`] and receives that
//! item's batches in order. [`HttpSink`] POSTs each batch as a
//! newline-delimited body, optionally zstd-compressed.
//!
//! # Retries
//!
//! Network errors and 5xx responses are retried immediately, up to the
//! configured number of attempts. 4xx responses are final. Every request
//! carries the batch identifier in `x-batch-id`, which stays the same across
//! attempts and across re-deliveries of the same content, so the receiver
//! can drop duplicates. Once attempts are exhausted the error is returned to the
//! caller and processing of the item stops.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE, USER_AGENT};
use std::io::Write;
use std::time::Instant;
use tracing::{debug, error, warn};
use zstd::stream::write::Encoder;

use crate::batch::Batch;
use crate::config::ForwarderConfig;
use crate::error::SinkError;
use crate::routing::RoutingInfo;
use crate::FORWARDER_VERSION;

const API_KEY_HEADER: &str = "x-api-key";
const LOG_NAME_HEADER: &str = "x-log-name";
const LOG_SET_HEADER: &str = "x-log-set";
const BATCH_ID_HEADER: &str = "x-batch-id";

#[async_trait]
pub trait Sink: Send + Sync {
    /// Transmits one batch. Returns once the batch is accepted or has failed
    /// for good.
    async fn send(&self, batch: &Batch) -> Result<(), SinkError>;
}

pub trait SinkFactory: Send + Sync {
    fn create(&self, routing: &RoutingInfo) -> Result<Box<dyn Sink>, SinkError>;
}

/// Transport settings shared by every [`HttpSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkOptions {
    pub retry_attempts: u32,
    pub use_compression: bool,
    pub compression_level: i32,
}

impl Default for SinkOptions {
    fn default() -> Self {
        SinkOptions {
            retry_attempts: 3,
            use_compression: true,
            compression_level: 3,
        }
    }
}

impl SinkOptions {
    #[must_use]
    pub fn from_config(config: &ForwarderConfig) -> Self {
        SinkOptions {
            retry_attempts: config.retry_attempts,
            use_compression: config.use_compression,
            compression_level: config.compression_level,
        }
    }
}

/// HTTP intake for one destination log.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    endpoint: String,
    headers: HeaderMap,
    options: SinkOptions,
}

impl HttpSink {
    pub fn new(
        client: reqwest::Client,
        routing: &RoutingInfo,
        options: SinkOptions,
    ) -> Result<Self, SinkError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(API_KEY_HEADER),
            header_value(API_KEY_HEADER, &routing.credentials.api_key)?,
        );
        headers.insert(
            HeaderName::from_static(LOG_NAME_HEADER),
            header_value(LOG_NAME_HEADER, &routing.log_name)?,
        );
        if let Some(log_set) = &routing.log_set {
            headers.insert(
                HeaderName::from_static(LOG_SET_HEADER),
                header_value(LOG_SET_HEADER, log_set)?,
            );
        }
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        headers.insert(
            USER_AGENT,
            header_value("user-agent", &format!("log-forwarder/{FORWARDER_VERSION}"))?,
        );
        if options.use_compression {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("zstd"));
        }

        Ok(HttpSink {
            client,
            endpoint: routing.credentials.endpoint.clone(),
            headers,
            options,
        })
    }

    fn body(&self, batch: &Batch) -> Result<Vec<u8>, SinkError> {
        let payload = batch.payload();
        if !self.options.use_compression {
            return Ok(payload);
        }
        encode(&payload, self.options.compression_level).map_err(|source| SinkError::Encode {
            batch_id: batch.id().to_string(),
            source,
        })
    }
}

#[async_trait]
impl Sink for HttpSink {
    async fn send(&self, batch: &Batch) -> Result<(), SinkError> {
        let body = self.body(batch)?;
        let batch_id = header_value(BATCH_ID_HEADER, batch.id())?;
        let mut attempts = 0;

        loop {
            let time = Instant::now();
            attempts += 1;
            let resp = self
                .client
                .post(&self.endpoint)
                .headers(self.headers.clone())
                .header(BATCH_ID_HEADER, batch_id.clone())
                .body(body.clone())
                .send()
                .await;
            let elapsed = time.elapsed();

            let failure = match resp {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        debug!(
                            "SINK | Sent batch {} ({} records, {} bytes) in {} ms",
                            batch.id(),
                            batch.len(),
                            body.len(),
                            elapsed.as_millis()
                        );
                        return Ok(());
                    }
                    if status.is_client_error() {
                        let body = resp.text().await.unwrap_or_default();
                        error!(
                            "SINK | Batch {} was rejected with status {}",
                            batch.id(),
                            status
                        );
                        return Err(SinkError::Rejected {
                            batch_id: batch.id().to_string(),
                            status: status.as_u16(),
                            body,
                        });
                    }
                    format!("status {status}")
                }
                Err(e) => e.to_string(),
            };

            if attempts >= self.options.retry_attempts {
                error!(
                    "SINK | Failed to send batch {} after {} ms and {} attempts: {}",
                    batch.id(),
                    elapsed.as_millis(),
                    attempts,
                    failure
                );
                return Err(SinkError::Transport {
                    batch_id: batch.id().to_string(),
                    attempts,
                    message: failure,
                });
            }
            warn!(
                "SINK | Attempt {} for batch {} failed: {}, retrying",
                attempts,
                batch.id(),
                failure
            );
        }
    }
}

/// Builds one [`HttpSink`] per item on a shared client.
#[derive(Debug, Clone)]
pub struct HttpSinkFactory {
    client: reqwest::Client,
    options: SinkOptions,
}

impl HttpSinkFactory {
    #[must_use]
    pub fn new(client: reqwest::Client, options: SinkOptions) -> Self {
        HttpSinkFactory { client, options }
    }
}

impl SinkFactory for HttpSinkFactory {
    fn create(&self, routing: &RoutingInfo) -> Result<Box<dyn Sink>, SinkError> {
        Ok(Box::new(HttpSink::new(
            self.client.clone(),
            routing,
            self.options,
        )?))
    }
}

fn header_value(name: &'static str, value: &str) -> Result<HeaderValue, SinkError> {
    HeaderValue::from_bytes(value.as_bytes()).map_err(|e| SinkError::InvalidHeader {
        name,
        reason: e.to_string(),
    })
}

fn encode(data: &[u8], level: i32) -> Result<Vec<u8>, std::io::Error> {
    let mut encoder = Encoder::new(Vec::new(), level)?;
    encoder.write_all(data)?;
    encoder.finish()
}
