// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Line parsing and format dispatch.
//!
//! [`select`] binds the grammar for a [`FormatTag`] to a line source. It is
//! total: every tag, including [`FormatTag::Unknown`], yields a parser, and
//! tags without a grammar simply forward lines verbatim.
//!
//! Parsing never fails. A line that does not match its grammar degrades to
//! passthrough, so one malformed line cannot stop the rest of an artifact.

use crate::error::ForwarderError;
use crate::format::FormatTag;
use crate::grammar::{grammar_for, Grammar, StructuredRecord};
use crate::line_source::LineSource;

/// Outcome of parsing one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedRecord<'g> {
    /// Every field declared by the grammar, in grammar order.
    Structured(StructuredRecord<'g>),
    /// The original line, unchanged.
    Passthrough(String),
}

impl ParsedRecord<'_> {
    /// Serialized form placed in a batch.
    #[must_use]
    pub fn into_payload(self) -> String {
        match self {
            ParsedRecord::Structured(record) => record.to_json(),
            ParsedRecord::Passthrough(line) => line,
        }
    }

    #[must_use]
    pub fn is_structured(&self) -> bool {
        matches!(self, ParsedRecord::Structured(_))
    }
}

/// A grammar bound to a line source.
pub struct LineParser {
    tag: FormatTag,
    grammar: Option<&'static Grammar>,
    source: Box<dyn LineSource>,
}

/// Selects the parser for `tag` over `source`.
#[must_use]
pub fn select(tag: FormatTag, source: Box<dyn LineSource>) -> LineParser {
    LineParser {
        tag,
        grammar: grammar_for(tag),
        source,
    }
}

impl LineParser {
    #[must_use]
    pub fn tag(&self) -> FormatTag {
        self.tag
    }

    #[must_use]
    pub fn grammar(&self) -> Option<&'static Grammar> {
        self.grammar
    }

    #[must_use]
    pub fn source(&self) -> &dyn LineSource {
        self.source.as_ref()
    }

    /// Parses a single line with the bound grammar.
    #[must_use]
    pub fn parse(&self, line: String) -> ParsedRecord<'static> {
        parse_line(self.grammar, line)
    }

    /// Reads the source lazily and parses each line in order.
    ///
    /// Only reading the source can fail; parsing itself cannot.
    pub fn parsed_lines(
        &mut self,
    ) -> Result<
        impl Iterator<Item = Result<ParsedRecord<'static>, ForwarderError>> + Send + '_,
        ForwarderError,
    > {
        let grammar = self.grammar;
        let lines = self.source.lines()?;
        Ok(lines.map(move |line| line.map(|line| parse_line(grammar, line))))
    }
}

/// Structured when `grammar` matches, otherwise the line itself.
fn parse_line(grammar: Option<&'static Grammar>, line: String) -> ParsedRecord<'static> {
    match grammar.and_then(|grammar| grammar.apply(&line)) {
        Some(record) => ParsedRecord::Structured(record),
        None => ParsedRecord::Passthrough(line),
    }
}

impl std::fmt::Debug for LineParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineParser")
            .field("tag", &self.tag)
            .field("grammar", &self.grammar.map(Grammar::name))
            .field("path", &self.source.path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::fixtures::*;
    use crate::line_source::FileSource;

    fn parser(tag: FormatTag) -> LineParser {
        select(tag, Box::new(FileSource::new("/nonexistent/artifact.log")))
    }

    #[test]
    fn test_select_is_total() {
        for tag in FormatTag::ALL {
            let parser = parser(tag);
            assert_eq!(parser.tag(), tag);
            assert_eq!(parser.grammar().is_some(), grammar_for(tag).is_some());
        }
    }

    #[test]
    fn test_select_is_deterministic() {
        for tag in FormatTag::ALL {
            let first = parser(tag).grammar().map(Grammar::name);
            let second = parser(tag).grammar().map(Grammar::name);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_passthrough_formats_return_line_unchanged() {
        for tag in [
            FormatTag::CdnRealtimeAccess,
            FormatTag::AuditLog,
            FormatTag::StreamedLog,
            FormatTag::Unknown,
        ] {
            assert_eq!(
                parser(tag).parse(ALB_ACCESS_LINE.to_string()),
                ParsedRecord::Passthrough(ALB_ACCESS_LINE.to_string())
            );
        }
    }

    #[test]
    fn test_mismatch_is_byte_identical() {
        let line = "  \tnot an access log line \u{1f600}";
        for tag in FormatTag::ALL {
            let parsed = parser(tag).parse(line.to_string());
            assert_eq!(parsed.into_payload(), line);
        }
    }

    #[test]
    fn test_matching_line_has_complete_key_set() {
        let cases = [
            (FormatTag::StorageAccess, STORAGE_ACCESS_LEGACY_LINE),
            (FormatTag::AlbAccess, ALB_ACCESS_LINE_WITHOUT_CLASSIFICATION),
            (FormatTag::NlbAccess, NLB_ACCESS_LINE),
            (FormatTag::ClbAccess, CLB_ACCESS_LINE),
            (FormatTag::CdnStandardAccess, CDN_STANDARD_LEGACY_LINE),
        ];
        for (tag, line) in cases {
            let parser = parser(tag);
            let grammar = parser.grammar().expect("structured format");
            match parser.parse(line.to_string()) {
                ParsedRecord::Structured(record) => {
                    assert!(record.field_names().eq(grammar.field_names()), "{tag}");
                }
                ParsedRecord::Passthrough(_) => panic!("{tag} line fell back to passthrough"),
            }
        }
    }

    #[test]
    fn test_payload_of_structured_record_is_json_object() {
        let payload = parser(FormatTag::ClbAccess)
            .parse(CLB_ACCESS_LINE.to_string())
            .into_payload();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["elb"], "my-loadbalancer");
        assert_eq!(value["http_query"], serde_json::Value::Null);
    }

    #[test]
    fn test_parsed_lines_reads_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alb.log");
        std::fs::write(
            &path,
            format!("{ALB_ACCESS_LINE}\ngarbage\n{ALB_ACCESS_LINE_WITHOUT_CLASSIFICATION}\n"),
        )
        .unwrap();

        let mut parser = select(FormatTag::AlbAccess, Box::new(FileSource::new(&path)));
        let records = parser
            .parsed_lines()
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(records.len(), 3);
        assert!(records[0].is_structured());
        assert_eq!(records[1], ParsedRecord::Passthrough("garbage".to_string()));
        assert!(records[2].is_structured());
    }

    #[test]
    fn test_parsed_lines_agree_with_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixed.log");
        let lines = [CLB_ACCESS_LINE, "garbage", NLB_ACCESS_LINE];
        std::fs::write(&path, format!("{}\n", lines.join("\n"))).unwrap();

        for tag in FormatTag::ALL {
            let mut parser = select(tag, Box::new(FileSource::new(&path)));
            let streamed = parser
                .parsed_lines()
                .unwrap()
                .collect::<Result<Vec<_>, _>>()
                .unwrap();
            let single: Vec<_> = lines
                .iter()
                .map(|line| parser.parse((*line).to_string()))
                .collect();
            assert_eq!(streamed, single, "{tag}");
        }
    }
}
