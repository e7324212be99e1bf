// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Artifact retrieval.
//!
//! A [`RetrieverFactory`] turns a normalized notification into one retriever
//! per referenced item. Retrievers copy the raw artifact into the
//! invocation's scratch directory; only after [`Retriever::fetch`] completes
//! are the identity, the delivery digest and the artifact path known.
//!
//! The identity names where the logs come from and is stable across
//! deliveries: a log group receives many deliveries, and an object key can be
//! overwritten. The delivery digest is a SHA-256 prefix of the delivered
//! content, so two deliveries under one identity are told apart while a
//! redelivery of the same content is recognized.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::GzDecoder;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::config::ObjectStoreConfig;
use crate::error::{ConfigError, ForwarderError};
use crate::event::{Notification, ObjectLocation};

const LOG_EVENTS_FILE: &str = "log-events";
const CONTROL_MESSAGE: &str = "CONTROL_MESSAGE";
const DELIVERY_DIGEST_LENGTH: usize = 16;

#[async_trait]
pub trait Retriever: Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Copies the artifact into the scratch directory.
    async fn fetch(&mut self) -> Result<(), ForwarderError>;

    /// Stable identifier of the item. `None` until fetched.
    fn identity(&self) -> Option<&str>;

    /// Digest of the delivered content. `None` until fetched.
    fn delivery(&self) -> Option<&str>;

    /// Local copy of the artifact. `None` until fetched.
    fn artifact_path(&self) -> Option<&Path>;
}

pub trait RetrieverFactory: Send + Sync {
    /// One entry per item referenced by `event`. A `None` entry is an item
    /// of unrecognized type and aborts the rest of the event.
    fn retrievers(&self, event: &Value, scratch: &Path) -> Vec<Option<Box<dyn Retriever>>>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn download(
        &self,
        location: &ObjectLocation,
        destination: &Path,
    ) -> Result<(), ForwarderError>;
}

/// Object store rooted at a local directory: `<root>/<container>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalObjectStore { root: root.into() }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn download(
        &self,
        location: &ObjectLocation,
        destination: &Path,
    ) -> Result<(), ForwarderError> {
        let source = self.root.join(relative_object_path(location));
        tokio::fs::copy(&source, destination)
            .await
            .map_err(|e| ForwarderError::Fetch {
                container: location.container.clone(),
                key: location.key.clone(),
                reason: format!("{}: {e}", source.display()),
            })?;
        Ok(())
    }
}

/// Object store served over HTTP: `GET <base>/<container>/<key>`.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpObjectStore {
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        HttpObjectStore {
            client,
            base_url: base_url.into(),
        }
    }

    fn url(&self, location: &ObjectLocation) -> Result<reqwest::Url, String> {
        let mut url = reqwest::Url::parse(&self.base_url).map_err(|e| e.to_string())?;
        url.path_segments_mut()
            .map_err(|()| format!("{} cannot be a base URL", self.base_url))?
            .pop_if_empty()
            .push(&location.container)
            .extend(location.key.split('/'));
        Ok(url)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn download(
        &self,
        location: &ObjectLocation,
        destination: &Path,
    ) -> Result<(), ForwarderError> {
        let fetch_error = |reason: String| ForwarderError::Fetch {
            container: location.container.clone(),
            key: location.key.clone(),
            reason,
        };

        let url = self.url(location).map_err(fetch_error)?;
        let body = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| fetch_error(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        tokio::fs::write(destination, &body)
            .await
            .map_err(|e| ForwarderError::io(destination, e))
    }
}

/// Fetches one storage object.
pub struct ObjectRetriever {
    store: Option<Arc<dyn ObjectStore>>,
    location: ObjectLocation,
    path: PathBuf,
    identity: Option<String>,
    delivery: Option<String>,
}

impl ObjectRetriever {
    #[must_use]
    pub fn new(
        store: Option<Arc<dyn ObjectStore>>,
        location: ObjectLocation,
        scratch: &Path,
    ) -> Self {
        let path = scratch.join(relative_object_path(&location));
        ObjectRetriever {
            store,
            location,
            path,
            identity: None,
            delivery: None,
        }
    }
}

#[async_trait]
impl Retriever for ObjectRetriever {
    fn name(&self) -> &'static str {
        "object"
    }

    async fn fetch(&mut self) -> Result<(), ForwarderError> {
        let Some(store) = &self.store else {
            return Err(ConfigError::Missing("FORWARDER_OBJECT_STORE_DIR").into());
        };
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ForwarderError::io(parent, e))?;
        }
        store.download(&self.location, &self.path).await?;
        let delivery = file_digest(&self.path).map_err(|e| ForwarderError::io(&self.path, e))?;
        debug!(
            "RETRIEVER | Fetched {} into {} (delivery {})",
            self.location.identity(),
            self.path.display(),
            delivery
        );
        self.delivery = Some(delivery);
        self.identity = Some(self.location.identity());
        Ok(())
    }

    fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    fn delivery(&self) -> Option<&str> {
        self.delivery.as_deref()
    }

    fn artifact_path(&self) -> Option<&Path> {
        self.identity.as_ref().map(|_| self.path.as_path())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogGroupPayload {
    message_type: String,
    log_group: String,
    #[serde(default)]
    log_events: Vec<LogEvent>,
}

#[derive(Deserialize)]
struct LogEvent {
    message: String,
}

/// Decodes a streamed log-group delivery into one line per log event.
pub struct StreamedLogRetriever {
    data: String,
    path: PathBuf,
    identity: Option<String>,
    delivery: Option<String>,
}

impl StreamedLogRetriever {
    #[must_use]
    pub fn new(data: String, scratch: &Path) -> Self {
        StreamedLogRetriever {
            data,
            path: scratch.join(LOG_EVENTS_FILE),
            identity: None,
            delivery: None,
        }
    }

    /// Returns the payload and the digest of its JSON form.
    fn decode(&self) -> Result<(LogGroupPayload, String), ForwarderError> {
        let compressed = STANDARD
            .decode(self.data.trim())
            .map_err(|e| ForwarderError::Decode {
                what: "log-group payload encoding",
                reason: e.to_string(),
            })?;
        let mut json = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut json)
            .map_err(|e| ForwarderError::Decode {
                what: "log-group payload compression",
                reason: e.to_string(),
            })?;
        let payload = serde_json::from_slice(&json).map_err(|e| ForwarderError::Decode {
            what: "log-group payload",
            reason: e.to_string(),
        })?;
        Ok((payload, digest(Sha256::digest(&json))))
    }
}

#[async_trait]
impl Retriever for StreamedLogRetriever {
    fn name(&self) -> &'static str {
        "log-group"
    }

    async fn fetch(&mut self) -> Result<(), ForwarderError> {
        let (payload, delivery) = self.decode()?;

        let mut content = String::new();
        if payload.message_type == CONTROL_MESSAGE {
            debug!("RETRIEVER | Control message for {}", payload.log_group);
        } else {
            for event in &payload.log_events {
                content.push_str(event.message.trim_end_matches(['\r', '\n']));
                content.push('\n');
            }
        }

        tokio::fs::write(&self.path, content)
            .await
            .map_err(|e| ForwarderError::io(&self.path, e))?;
        debug!(
            "RETRIEVER | Decoded {} events from {}",
            payload.log_events.len(),
            payload.log_group
        );
        self.delivery = Some(delivery);
        self.identity = Some(payload.log_group);
        Ok(())
    }

    fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    fn delivery(&self) -> Option<&str> {
        self.delivery.as_deref()
    }

    fn artifact_path(&self) -> Option<&Path> {
        self.identity.as_ref().map(|_| self.path.as_path())
    }
}

/// Production factory: storage objects and streamed log groups.
#[derive(Clone, Default)]
pub struct DefaultRetrieverFactory {
    store: Option<Arc<dyn ObjectStore>>,
}

impl DefaultRetrieverFactory {
    #[must_use]
    pub fn new(store: Option<Arc<dyn ObjectStore>>) -> Self {
        DefaultRetrieverFactory { store }
    }

    #[must_use]
    pub fn from_config(config: Option<&ObjectStoreConfig>, client: &reqwest::Client) -> Self {
        let store: Option<Arc<dyn ObjectStore>> = match config {
            Some(ObjectStoreConfig::Local(root)) => Some(Arc::new(LocalObjectStore::new(root))),
            Some(ObjectStoreConfig::Http(url)) => {
                Some(Arc::new(HttpObjectStore::new(client.clone(), url)))
            }
            None => None,
        };
        DefaultRetrieverFactory::new(store)
    }
}

impl RetrieverFactory for DefaultRetrieverFactory {
    fn retrievers(&self, event: &Value, scratch: &Path) -> Vec<Option<Box<dyn Retriever>>> {
        match Notification::from_value(event) {
            Notification::Storage(items) => items
                .into_iter()
                .map(|item| {
                    item.map(|location| {
                        Box::new(ObjectRetriever::new(self.store.clone(), location, scratch))
                            as Box<dyn Retriever>
                    })
                })
                .collect(),
            Notification::LogGroup(data) => {
                let retriever: Box<dyn Retriever> =
                    Box::new(StreamedLogRetriever::new(data, scratch));
                vec![Some(retriever)]
            }
            Notification::Unrecognized => vec![None],
        }
    }
}

fn digest(hash: impl AsRef<[u8]>) -> String {
    let mut encoded = hex::encode(hash);
    encoded.truncate(DELIVERY_DIGEST_LENGTH);
    encoded
}

fn file_digest(path: &Path) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    std::io::copy(&mut std::fs::File::open(path)?, &mut hasher)?;
    Ok(digest(hasher.finalize()))
}

/// `<container>/<key>` restricted to plain path components.
fn relative_object_path(location: &ObjectLocation) -> PathBuf {
    let mut path = PathBuf::new();
    for part in [location.container.as_str(), location.key.as_str()] {
        path.extend(Path::new(part).components().filter_map(|component| {
            match component {
                Component::Normal(name) => Some(name),
                _ => None,
            }
        }));
    }
    if path.file_name().is_none() || path.components().count() < 2 {
        path.push("object");
    }
    path
}
