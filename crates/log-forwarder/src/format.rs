// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Format tags identifying which producer emitted an artifact.
//!
//! Tags are resolved from destination routing, using the wire names found in
//! the routing configuration (`s3_access_log`, `alb_access_log`, ...). Any
//! name outside the closed set maps to [`FormatTag::Unknown`], which is
//! forwarded verbatim.

use serde::{Deserialize, Deserializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatTag {
    /// Object-storage server access logs
    StorageAccess,
    /// Application load balancer access logs
    AlbAccess,
    /// Network load balancer access logs
    NlbAccess,
    /// Classic load balancer access logs
    ClbAccess,
    /// CDN realtime access logs
    CdnRealtimeAccess,
    /// CDN standard access logs
    CdnStandardAccess,
    /// Audit trail records
    AuditLog,
    /// Log-group events delivered through a subscription
    StreamedLog,
    Unknown,
}

impl FormatTag {
    pub const ALL: [FormatTag; 9] = [
        FormatTag::StorageAccess,
        FormatTag::AlbAccess,
        FormatTag::NlbAccess,
        FormatTag::ClbAccess,
        FormatTag::CdnRealtimeAccess,
        FormatTag::CdnStandardAccess,
        FormatTag::AuditLog,
        FormatTag::StreamedLog,
        FormatTag::Unknown,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatTag::StorageAccess => "s3_access_log",
            FormatTag::AlbAccess => "alb_access_log",
            FormatTag::NlbAccess => "nlb_access_log",
            FormatTag::ClbAccess => "clb_access_log",
            FormatTag::CdnRealtimeAccess => "cf_realtime_access_log",
            FormatTag::CdnStandardAccess => "cf_standard_access_log",
            FormatTag::AuditLog => "cloudtrail_log",
            FormatTag::StreamedLog => "cloudwatch_log",
            FormatTag::Unknown => "unknown",
        }
    }
}

impl FromStr for FormatTag {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = match s.trim().to_lowercase().as_str() {
            "s3_access_log" => FormatTag::StorageAccess,
            "alb_access_log" => FormatTag::AlbAccess,
            "nlb_access_log" => FormatTag::NlbAccess,
            "clb_access_log" => FormatTag::ClbAccess,
            "cf_realtime_access_log" => FormatTag::CdnRealtimeAccess,
            "cf_standard_access_log" => FormatTag::CdnStandardAccess,
            "cloudtrail_log" => FormatTag::AuditLog,
            "cloudwatch_log" => FormatTag::StreamedLog,
            _ => FormatTag::Unknown,
        };
        Ok(tag)
    }
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FormatTag {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(value.parse().unwrap_or(FormatTag::Unknown))
    }
}
