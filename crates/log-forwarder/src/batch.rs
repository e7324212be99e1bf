// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Size-bounded batching of serialized records.
//!
//! # Flush Policy
//!
//! A batch is flushed when, immediately after an append, its cumulative
//! size strictly exceeds the configured threshold. A batch whose size equals
//! the threshold is not flushed by that append. When the line source is
//! exhausted, a non-empty residual batch is flushed regardless of size.
//!
//! Sizes are measured in bytes of serialized records, not record counts.
//! Single records larger than the threshold are never split or rejected;
//! they end up flushed on their own.
//!
//! # Lifecycle
//!
//! ```text
//!   Empty ──add──> Accumulating ──(size > max)──> Flushed (handed to sink)
//!     ^                                               │
//!     └─────────────── new batch, next sequence ──────┘
//! ```
//!
//! Every batch carries an identifier `<key>#<sequence>`. The forwarder keys
//! an item by its identity and the digest of the delivered content
//! (`<identity>@<digest>`), so redelivered content reproduces the same
//! identifiers while separate deliveries under one identity never share one.

use tracing::debug;

/// Default threshold: 5MB of serialized records.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 5 * 1_024 * 1_024;

/// An ordered, single-use sequence of serialized records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    id: String,
    records: Vec<String>,
    size: usize,
}

impl Batch {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Batch {
            id: id.into(),
            records: Vec::new(),
            size: 0,
        }
    }

    /// Appends a serialized record and grows the size by its byte length.
    pub fn add(&mut self, record: String) {
        self.size += record.len();
        self.records.push(record);
    }

    /// Cumulative byte size of the records added so far.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn records(&self) -> &[String] {
        &self.records
    }

    /// Newline-delimited body, one record per line.
    #[must_use]
    pub fn payload(&self) -> Vec<u8> {
        let separators = self.records.len();
        let mut buffer = Vec::with_capacity(self.size + separators);
        for record in &self.records {
            buffer.extend(record.as_bytes());
            buffer.push(b'\n');
        }
        buffer
    }
}

/// Builds batches from a stream of records and decides when to flush.
#[derive(Debug)]
pub struct BatchAccumulator {
    key: String,
    sequence: u64,
    max_batch_size: usize,
    current: Batch,
}

impl BatchAccumulator {
    #[must_use]
    pub fn new(key: impl Into<String>, max_batch_size: usize) -> Self {
        let key = key.into();
        let current = Batch::new(format!("{key}#0"));
        BatchAccumulator {
            key,
            sequence: 0,
            max_batch_size,
            current,
        }
    }

    /// Adds a record to the current batch.
    ///
    /// Returns the batch to send when this append pushed its size past the
    /// threshold; a fresh empty batch takes its place.
    pub fn add(&mut self, record: String) -> Option<Batch> {
        self.current.add(record);
        if self.current.size() > self.max_batch_size {
            debug!(
                "BATCH | {} reached {} bytes ({} records), flushing",
                self.current.id(),
                self.current.size(),
                self.current.len()
            );
            return Some(self.rotate());
        }
        None
    }

    /// Size of the batch currently being filled.
    #[must_use]
    pub fn size(&self) -> usize {
        self.current.size()
    }

    /// Ends the stream, returning the residual batch if it holds any bytes.
    #[must_use]
    pub fn finish(self) -> Option<Batch> {
        if self.current.size() > 0 {
            Some(self.current)
        } else {
            None
        }
    }

    fn rotate(&mut self) -> Batch {
        self.sequence += 1;
        let next = Batch::new(format!("{}#{}", self.key, self.sequence));
        std::mem::replace(&mut self.current, next)
    }
}
