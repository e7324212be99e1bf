// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Compiled line grammars for the structured log formats.
//!
//! Each grammar is a regular expression with one named capture group per
//! field. Patterns are anchored at the start of the line only, so producers
//! that append columns in newer schema versions still match. Fields that
//! older producers never emit live in optional trailing groups: when they do
//! not participate in a match they are reported with no value instead of
//! causing the whole line to fall back to passthrough.
//!
//! Grammars are compiled once per process and the field-name to
//! capture-position table is computed at compile time, so matching a line
//! never allocates a new pattern.

use regex::Regex;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::sync::OnceLock;

use crate::format::FormatTag;

/// Static description of a grammar before compilation.
struct GrammarDef {
    name: &'static str,
    pattern: &'static str,
    optional: &'static [&'static str],
}

const STORAGE_ACCESS: GrammarDef = GrammarDef {
    name: "storage_access",
    pattern: concat!(
        r"(?P<BucketOwner>[^ ]*) (?P<Bucket>[^ ]*) \[(?P<RequestDateTime>.*?)\] ",
        r"(?P<RemoteIP>[^ ]*) (?P<Requester>[^ ]*) (?P<RequestID>[^ ]*) ",
        r"(?P<Operation>[^ ]*) (?P<Key>[^ ]*) ",
        r#"("(?P<RequestURI_operation>[^ ]*) (?P<RequestURI_key>[^ ]*) (?P<RequestURI_httpProtoversion>- |[^ ]*)"|"-"|-) "#,
        r"(?P<HTTPstatus>-|[0-9]*) (?P<ErrorCode>[^ ]*) (?P<BytesSent>[^ ]*) ",
        r"(?P<ObjectSize>[^ ]*) (?P<TotalTime>[^ ]*) (?P<TurnAroundTime>[^ ]*) ",
        r#"("(?P<Referrer>.*?)"|-) ("(?P<UserAgent>.*?)"|-) (?P<VersionId>[^ ]*)"#,
        r"(?: (?P<HostId>[^ ]*) (?P<SigV>[^ ]*) (?P<CipherSuite>[^ ]*) (?P<AuthType>[^ ]*) ",
        r"(?P<EndPoint>[^ ]*) (?P<TLSVersion>[^ ]*))?",
        r"( (?P<S3AccessPointARN>arn:[^ ]*|-))?",
    ),
    optional: &[
        "HostId",
        "SigV",
        "CipherSuite",
        "AuthType",
        "EndPoint",
        "TLSVersion",
        "S3AccessPointARN",
    ],
};

const ALB_ACCESS: GrammarDef = GrammarDef {
    name: "alb_access",
    pattern: concat!(
        r"(?P<request_type>[^ ]*) (?P<timestamp>[^ ]*) (?P<elb>[^ ]*) ",
        r"(?P<client_ip>[^ ]*):(?P<client_port>[0-9]*) (?P<target_ip>[^ ]*)[:-](?P<target_port>[0-9]*) ",
        r"(?P<request_processing_time>[-.0-9]*) (?P<target_processing_time>[-.0-9]*) ",
        r"(?P<response_processing_time>[-.0-9]*) (?P<elb_status_code>|[-0-9]*) ",
        r"(?P<target_status_code>-|[-0-9]*) (?P<received_bytes>[-0-9]*) (?P<sent_bytes>[-0-9]*) ",
        r#""(?P<request>(-|(?P<http_method>\w+)) "#,
        r"(-|(?P<http_protocol>\w*)://\[?(?P<http_host>[^/]+?)\]?:(?P<http_port>\d+)",
        r"(-|(?P<http_path>/[^?]*?))(\?(?P<http_query>.*?))?) ",
        r#"(-?|\w+/(?P<http_version>[0-9.]*)))" "#,
        r#""(|(?P<useragent>[^"]+))" (?P<ssl_cipher>[()A-Z0-9-]+) (?P<ssl_protocol>[A-Za-z0-9.-]*) "#,
        r#"(?P<target_group_arn>[^ ]*) "(?P<trace_id>[^"]*)" "(?P<domain_name>[^"]*)" "#,
        r#""(?P<chosen_cert_arn>[^"]*)" (?P<matched_rule_priority>[-.0-9]*) "#,
        r#"(?P<request_creation_time>[^ ]*) "(?P<actions_executed>[^"]*)" "#,
        r#""(?P<redirect_url>[^"]*)" "(?P<lambda_error_reason>[^ ]*)" "#,
        r#""(?P<target_port_list>[^\s]+)" "(?P<target_status_code_list>[^\s]+)""#,
        r#"( "(?P<classification>[^\s]+)" "(?P<classification_reason>[^\s]+)")?"#,
    ),
    optional: &["classification", "classification_reason"],
};

const NLB_ACCESS: GrammarDef = GrammarDef {
    name: "nlb_access",
    pattern: concat!(
        r"(?P<listener_type>[^ ]+) (?P<log_entry_version>[^ ]+) (?P<timestamp>[^ ]+) ",
        r"(?P<elb>[^ ]+) (?P<listener>[^ ]+) (?P<client_ip>[0-9a-f.:]+):(?P<client_port>[0-9]+) ",
        r"(?P<destination_ip>[^ ]+):(?P<destination_port>[0-9]+) (?P<connection_time>[0-9]+) ",
        r"(-|(?P<tls_handshake_time>[0-9]+)) (-|(?P<received_bytes>[-0-9]+)) (?P<sent_bytes>[-0-9]+) ",
        r"(-|(?P<incoming_tls_alert>[^ ]+)) (-|(?P<chosen_cert_arn>[^ ]+)) ",
        r"(-|(?P<chosen_cert_serial>[^ ]+)) (-|(?P<tls_cipher>[^ ]+)) ",
        r"(-|(?P<tls_protocol_version>[^ ]+)) (-|(?P<tls_named_group>[^ ]+)) ",
        r"(-|(?P<domain_name>[^ ]+)) (-|(?P<alpn_fe_protocol>[^ ]+)) ",
        r"(-|(?P<alpn_be_protocol>[^ ]+)) (-|(?P<alpn_client_preference_list>[^ ]+))",
        r"( (?P<tls_connection_creation_time>20[0-9T:-]+))?",
    ),
    optional: &["tls_connection_creation_time"],
};

const CLB_ACCESS: GrammarDef = GrammarDef {
    name: "clb_access",
    pattern: concat!(
        r"(?P<timestamp>[^ ]+) (?P<elb>[^ ]+) (?P<client_ip>[0-9a-f.:]+):(?P<client_port>[0-9]+) ",
        r"(-|(?P<backend_ip>[0-9a-f.:]+):(?P<backend_port>[-0-9]+)) ",
        r"(?P<request_processing_time>[0-9.-]+) (?P<backend_processing_time>[0-9.-]+) ",
        r"(?P<response_processing_time>[0-9.-]+) (?P<elb_status_code>[0-9.-]+) ",
        r"(?P<backend_status_code>[0-9.-]+) (?P<received_bytes>[0-9.-]+) (?P<sent_bytes>[0-9.-]+) ",
        r#""(?P<request>(-|(?P<http_method>[\w-]+)) "#,
        r"(-|(?P<http_protocol>\w*)://\[?(?P<http_host>[^\[\]]+?)\]?:(?P<http_port>\d+)",
        r"(-|(?P<http_path>/[^?]*?))(\?(?P<http_query>[^ ]*))?) ",
        r#"(- |-|\w+/(?P<http_version>[0-9.]*)))" "#,
        r#"(-|"(|(?P<useragent>.+))") (?P<ssl_cipher>[^ ]+) (?P<ssl_protocol>[^ ]+)"#,
    ),
    optional: &[],
};

const CDN_STANDARD_ACCESS: GrammarDef = GrammarDef {
    name: "cdn_standard_access",
    pattern: concat!(
        r"(?P<date_time>[0-9:\t-]+)\t(?P<x_edge_location>[0-9A-Z-]+)\t(?P<sc_bytes>[0-9]+)\t",
        r"(?P<c_ip>[0-9a-f.:]+)\t(?P<cs_method>[A-Z]+)\t(?P<cs_host>[0-9A-Za-z.]+)\t",
        r"(?P<cs_uri_stem>[^\t]+)\t(?P<sc_status>[0-9-]+)\t(?P<cs_referer>[^\t]+)\t",
        r"(?P<cs_user_agent>[^\t]+)\t(?P<cs_uri_query>[^\t]+)\t(?P<cs_cookie>[^\t]+)\t",
        r"(?P<x_edge_result_type>[^\t]+)\t(?P<x_edge_request_id>[^\t]+)\t",
        r"(?P<x_host_header>[^\t]+)\t(?P<cs_protocol>[^\t]+)\t(?P<cs_bytes>[^\t]+)\t",
        r"(?P<time_taken>[^\t]+)\t(?P<x_forwarded_for>[^\t]+)\t(?P<ssl_protocol>[^\t]+)\t",
        r"(?P<ssl_cipher>[^\t]+)\t(?P<x_edge_response_result_type>[^\t]+)\t",
        r"(?P<cs_protocol_version>[^\t]+)\t(?P<fle_status>[^\t]+)\t(?P<fle_encrypted_fields>[^\t]+)",
        r"(\t(?P<c_port>[^\t]+)\t(?P<time_to_first_byte>[^\t]+)\t",
        r"(?P<x_edge_detailed_result_type>[^\t]+)\t(?P<sc_content_type>[^\t]+)\t",
        r"(?P<sc_content_len>[^\t]+)\t(?P<sc_range_start>[^\t]+)\t(?P<sc_range_end>[^\t]+))?",
    ),
    optional: &[
        "c_port",
        "time_to_first_byte",
        "x_edge_detailed_result_type",
        "sc_content_type",
        "sc_content_len",
        "sc_range_start",
        "sc_range_end",
    ],
};

/// A compiled line grammar.
#[derive(Debug)]
pub struct Grammar {
    name: &'static str,
    regex: Regex,
    /// Field name and capture position, in declaration order.
    fields: Vec<(String, usize)>,
    optional: &'static [&'static str],
}

impl Grammar {
    fn compile(def: &GrammarDef) -> Self {
        #[allow(clippy::expect_used)]
        let regex = Regex::new(&format!("^(?:{})", def.pattern))
            .expect("built-in grammar patterns are valid");
        let fields = regex
            .capture_names()
            .enumerate()
            .filter_map(|(position, name)| name.map(|name| (name.to_string(), position)))
            .collect();
        Grammar {
            name: def.name,
            regex,
            fields,
            optional: def.optional,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Declared field names, in the order they appear in a record.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    /// Trailing fields that older producer versions do not emit.
    #[must_use]
    pub fn optional_fields(&self) -> &'static [&'static str] {
        self.optional
    }

    /// Matches `line` and extracts every declared field.
    ///
    /// Returns `None` when the line does not match. Fields whose group did
    /// not participate in the match are present with no value.
    #[must_use]
    pub fn apply(&self, line: &str) -> Option<StructuredRecord<'_>> {
        let captures = self.regex.captures(line)?;
        let fields = self
            .fields
            .iter()
            .map(|(name, position)| {
                let value = captures
                    .get(*position)
                    .map(|value| value.as_str().to_string());
                (name.as_str(), value)
            })
            .collect();
        Some(StructuredRecord { fields })
    }
}

/// Field values extracted from one line, in grammar order.
///
/// Serializes as a JSON object whose key set always equals the grammar's
/// declared fields; missing optional values serialize as `null`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredRecord<'g> {
    fields: Vec<(&'g str, Option<String>)>,
}

impl<'g> StructuredRecord<'g> {
    /// Returns `None` when `field` is not declared by the grammar, and
    /// `Some(None)` when it is declared but carried no value on this line.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<Option<&str>> {
        self.fields
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, value)| value.as_deref())
    }

    pub fn field_names(&self) -> impl Iterator<Item = &'g str> + '_ {
        self.fields.iter().map(|(name, _)| *name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[must_use]
    pub fn to_json(&self) -> String {
        // Maps of strings always serialize.
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl Serialize for StructuredRecord<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

static STORAGE_ACCESS_GRAMMAR: OnceLock<Grammar> = OnceLock::new();
static ALB_ACCESS_GRAMMAR: OnceLock<Grammar> = OnceLock::new();
static NLB_ACCESS_GRAMMAR: OnceLock<Grammar> = OnceLock::new();
static CLB_ACCESS_GRAMMAR: OnceLock<Grammar> = OnceLock::new();
static CDN_STANDARD_ACCESS_GRAMMAR: OnceLock<Grammar> = OnceLock::new();

fn compiled(cell: &'static OnceLock<Grammar>, def: &GrammarDef) -> &'static Grammar {
    cell.get_or_init(|| Grammar::compile(def))
}

/// Looks up the grammar bound to `tag`.
///
/// Passthrough formats (CDN realtime, audit, streamed and unknown) have no
/// grammar: their records are forwarded exactly as the producer wrote them.
#[must_use]
pub fn grammar_for(tag: FormatTag) -> Option<&'static Grammar> {
    match tag {
        FormatTag::StorageAccess => Some(compiled(&STORAGE_ACCESS_GRAMMAR, &STORAGE_ACCESS)),
        FormatTag::AlbAccess => Some(compiled(&ALB_ACCESS_GRAMMAR, &ALB_ACCESS)),
        FormatTag::NlbAccess => Some(compiled(&NLB_ACCESS_GRAMMAR, &NLB_ACCESS)),
        FormatTag::ClbAccess => Some(compiled(&CLB_ACCESS_GRAMMAR, &CLB_ACCESS)),
        FormatTag::CdnStandardAccess => Some(compiled(
            &CDN_STANDARD_ACCESS_GRAMMAR,
            &CDN_STANDARD_ACCESS,
        )),
        FormatTag::CdnRealtimeAccess
        | FormatTag::AuditLog
        | FormatTag::StreamedLog
        | FormatTag::Unknown => None,
    }
}
