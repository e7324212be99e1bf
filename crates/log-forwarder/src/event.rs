// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Inbound notification envelopes.
//!
//! Three shapes are understood:
//!
//! ```text
//! direct storage   {"Records": [{"s3": {"bucket": {"name": ..}, "object": {"key": ..}}}]}
//! bridged storage  {"source": "aws.s3", "detail": {"bucket": .., "object": ..}}
//! streamed logs    {"awslogs": {"data": "<base64 gzip JSON>"}}
//! ```
//!
//! Bridged envelopes are rewrapped into the direct shape by [`normalize`].
//! Anything else is left untouched and ends up as
//! [`Notification::Unrecognized`], which is abandoned without error.

use serde_json::{json, Value};

const BRIDGED_STORAGE_SOURCE: &str = "aws.s3";

/// Rewraps a bridged storage notification into the direct shape.
#[must_use]
pub fn normalize(event: Value) -> Value {
    let is_bridged_storage =
        event.get("source").and_then(Value::as_str) == Some(BRIDGED_STORAGE_SOURCE);
    if !is_bridged_storage {
        return event;
    }
    match event.get("detail") {
        Some(detail) if !detail.is_null() => json!({ "Records": [{ "s3": detail }] }),
        _ => event,
    }
}

/// Object within a storage container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub container: String,
    pub key: String,
}

impl ObjectLocation {
    /// `container/key`, used as the item identity.
    #[must_use]
    pub fn identity(&self) -> String {
        format!("{}/{}", self.container, self.key)
    }
}

/// Items referenced by a normalized notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// One entry per record; `None` marks a record that is not a storage
    /// object.
    Storage(Vec<Option<ObjectLocation>>),
    /// Encoded log-group delivery.
    LogGroup(String),
    Unrecognized,
}

impl Notification {
    #[must_use]
    pub fn from_value(event: &Value) -> Self {
        if let Some(records) = event.get("Records").and_then(Value::as_array) {
            return Notification::Storage(records.iter().map(object_location).collect());
        }
        if let Some(data) = event
            .get("awslogs")
            .and_then(|awslogs| awslogs.get("data"))
            .and_then(Value::as_str)
        {
            return Notification::LogGroup(data.to_string());
        }
        Notification::Unrecognized
    }
}

fn object_location(record: &Value) -> Option<ObjectLocation> {
    let s3 = record.get("s3")?;
    let container = s3.get("bucket")?.get("name")?.as_str()?;
    let key = s3.get("object")?.get("key")?.as_str()?;
    Some(ObjectLocation {
        container: container.to_string(),
        key: decode_form(key),
    })
}

/// Decodes an `application/x-www-form-urlencoded` value: `+` is a space and
/// `%XX` an escaped byte. Malformed escapes are kept as they are.
fn decode_form(encoded: &str) -> String {
    let bytes = encoded.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => decoded.push(b' '),
            b'%' => {
                let escaped = bytes
                    .get(i + 1..i + 3)
                    .filter(|hex| hex.iter().all(u8::is_ascii_hexdigit))
                    .and_then(|hex| std::str::from_utf8(hex).ok())
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                match escaped {
                    Some(byte) => {
                        decoded.push(byte);
                        i += 2;
                    }
                    None => decoded.push(b'%'),
                }
            }
            byte => decoded.push(byte),
        }
        i += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}
