// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Gzip side artifact holding the parsed form of an artifact.
//!
//! `parsed_<file name>.gz` is written next to the artifact, one
//! newline-terminated line per input line, in input order. Structured lines
//! are JSON objects; lines that did not match are copied unchanged.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::ForwarderError;
use crate::parser::LineParser;

/// `<dir>/parsed_<name>.gz` for an artifact at `<dir>/<name>`.
#[must_use]
pub fn parsed_artifact_path(artifact: &Path) -> PathBuf {
    let name = artifact
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    artifact.with_file_name(format!("parsed_{name}.gz"))
}

/// Writes every parsed line of `parser` to the side artifact and returns its
/// path and the number of lines written.
pub fn write_parsed(parser: &mut LineParser) -> Result<(PathBuf, usize), ForwarderError> {
    let path = parsed_artifact_path(parser.source().path());
    let file = File::create(&path).map_err(|e| ForwarderError::io(&path, e))?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());

    let mut lines = 0;
    for record in parser.parsed_lines()? {
        let payload = record?.into_payload();
        encoder
            .write_all(payload.as_bytes())
            .and_then(|()| encoder.write_all(b"\n"))
            .map_err(|e| ForwarderError::io(&path, e))?;
        lines += 1;
    }

    encoder
        .finish()
        .and_then(|mut writer| writer.flush())
        .map_err(|e| ForwarderError::io(&path, e))?;
    debug!("SIDE_ARTIFACT | Wrote {} lines to {}", lines, path.display());
    Ok((path, lines))
}
