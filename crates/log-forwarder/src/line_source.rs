// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Lazy line sources over fetched artifacts.
//!
//! Artifacts are read from local files, decompressing gzip and zstd content
//! transparently (detected from the magic bytes, not the file name). Each
//! call to [`LineSource::lines`] reopens the file, so file-backed sources are
//! restartable; the sequence itself is finite and strictly ordered.

use flate2::read::MultiGzDecoder;
use serde::Deserialize;
use serde_json::value::RawValue;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::ForwarderError;
use crate::format::FormatTag;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

pub type Lines<'a> = Box<dyn Iterator<Item = Result<String, ForwarderError>> + Send + 'a>;

pub trait LineSource: Send {
    /// Location of the artifact backing this source.
    fn path(&self) -> &Path;

    /// Opens the artifact and returns its lines in order.
    fn lines(&mut self) -> Result<Lines<'_>, ForwarderError>;
}

/// Opens the line source matching `tag` over the artifact at `path`.
///
/// Opening is lazy: nothing is read until [`LineSource::lines`] is called.
#[must_use]
pub fn open(tag: FormatTag, path: &Path) -> Box<dyn LineSource> {
    match tag {
        FormatTag::AuditLog => Box::new(AuditLogSource::new(path)),
        // Standard CDN logs open with `#Version` and `#Fields` headers.
        FormatTag::CdnStandardAccess => Box::new(FileSource::new(path).skip_comments(true)),
        _ => Box::new(FileSource::new(path)),
    }
}

/// Plain, gzip or zstd text file, one record per line.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    skip_comments: bool,
}

impl FileSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSource {
            path: path.into(),
            skip_comments: false,
        }
    }

    /// Drops lines starting with `#`.
    #[must_use]
    pub fn skip_comments(mut self, skip: bool) -> Self {
        self.skip_comments = skip;
        self
    }
}

impl LineSource for FileSource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn lines(&mut self) -> Result<Lines<'_>, ForwarderError> {
        let reader = open_decoded(&self.path)?;
        let lines = TextLines {
            reader,
            path: self.path.clone(),
            done: false,
        };
        if self.skip_comments {
            Ok(Box::new(lines.filter(|line| {
                !matches!(line, Ok(text) if text.starts_with('#'))
            })))
        } else {
            Ok(Box::new(lines))
        }
    }
}

/// Audit trail document (`{"Records": [...]}`), one record per line.
///
/// Records are emitted exactly as the producer wrote them. Files that are
/// not record documents, such as digest files, are read as plain lines.
#[derive(Debug, Clone)]
pub struct AuditLogSource {
    path: PathBuf,
}

#[derive(Deserialize)]
struct AuditDocument<'a> {
    #[serde(rename = "Records", borrow)]
    records: Vec<&'a RawValue>,
}

impl AuditLogSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        AuditLogSource { path: path.into() }
    }
}

impl LineSource for AuditLogSource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn lines(&mut self) -> Result<Lines<'_>, ForwarderError> {
        let mut content = String::new();
        open_decoded(&self.path)?
            .read_to_string(&mut content)
            .map_err(|e| ForwarderError::io(&self.path, e))?;

        let records: Vec<String> = match serde_json::from_str::<AuditDocument<'_>>(&content) {
            Ok(document) => document.records.into_iter().map(compact).collect(),
            Err(e) => {
                debug!(
                    "LINES | {} is not an audit record document, reading plain lines: {}",
                    self.path.display(),
                    e
                );
                content.lines().map(str::to_string).collect()
            }
        };
        Ok(Box::new(records.into_iter().map(Ok)))
    }
}

/// Keeps the producer's bytes unless the record spans several lines.
fn compact(record: &RawValue) -> String {
    let raw = record.get();
    if !raw.contains('\n') {
        return raw.to_string();
    }
    serde_json::from_str::<serde_json::Value>(raw)
        .map(|value| value.to_string())
        .unwrap_or_else(|_| raw.replace(['\r', '\n'], ""))
}

fn open_decoded(path: &Path) -> Result<Box<dyn BufRead + Send>, ForwarderError> {
    let file = File::open(path).map_err(|e| ForwarderError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let (is_gzip, is_zstd) = {
        let head = reader.fill_buf().map_err(|e| ForwarderError::io(path, e))?;
        (head.starts_with(&GZIP_MAGIC), head.starts_with(&ZSTD_MAGIC))
    };

    if is_gzip {
        return Ok(Box::new(BufReader::new(MultiGzDecoder::new(reader))));
    }
    if is_zstd {
        let decoder =
            zstd::stream::read::Decoder::with_buffer(reader).map_err(|e| ForwarderError::io(path, e))?;
        return Ok(Box::new(BufReader::new(decoder)));
    }
    Ok(Box::new(reader))
}

/// Line iterator that strips `\n` / `\r\n` and decodes invalid UTF-8 lossily.
struct TextLines {
    reader: Box<dyn BufRead + Send>,
    path: PathBuf,
    done: bool,
}

impl Iterator for TextLines {
    type Item = Result<String, ForwarderError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = Vec::new();
        match self.reader.read_until(b'\n', &mut buf) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                Some(Ok(String::from_utf8_lossy(&buf).into_owned()))
            }
            Err(e) => {
                self.done = true;
                Some(Err(ForwarderError::io(&self.path, e)))
            }
        }
    }
}
