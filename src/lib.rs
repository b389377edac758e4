//! Batch TLS certificate expiry checking.
//!
//! A stream of host/URL lines is fanned out over a bounded worker pool. Each
//! worker dials the host, completes a TLS handshake, and reports whether the
//! leaf certificate is still within its validity window. Results are funneled
//! into a single CSV writer that flushes on a fixed cadence.
//!
//! # Trust
//!
//! The checker does **not** verify the certificate chain against any trust
//! store, nor does it match the certificate against the hostname. An `OK`
//! status means "reachable over TLS and the leaf certificate has not expired",
//! not "trusted". Callers that need a trust audit must verify separately.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use strum_macros::{Display, EnumString};

pub mod checker;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod sink;

pub use checker::Checker;
pub use error::{CheckError, PipelineError};
pub use pipeline::{Pipeline, PipelineConfig, RunSummary};
pub use sink::{ResultSink, HEADER};

/// Single host/URL string to validate.
///
/// Only non-blank lines become tasks; surrounding whitespace is trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckTask(String);

impl CheckTask {
    /// Builds a task from one input line.
    ///
    /// ```
    /// # use tlsbatch::CheckTask;
    /// assert!(CheckTask::new("  github.com \n").is_some());
    /// assert!(CheckTask::new("   ").is_none());
    /// ```
    pub fn new(line: &str) -> Option<CheckTask> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(CheckTask(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize)]
pub enum CheckStatus {
    #[strum(serialize = "OK")]
    #[serde(rename = "OK")]
    Ok,
    #[strum(serialize = "BAD")]
    #[serde(rename = "BAD")]
    Bad,
}

/// Outcome of checking one task. Built once by the checker, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    /// The task string exactly as read
    pub url: String,
    /// Host component, empty when the URL could not be parsed
    pub hostname: String,
    /// Explicit port or 443; `None` only when the URL could not be parsed
    pub port: Option<u16>,
    pub status: CheckStatus,
    /// Failure reason, empty for `OK`
    pub description: String,
    /// Leaf certificate notAfter, set whenever a certificate was retrieved
    pub validity_expire: Option<DateTime<Utc>>,
}

impl CheckResult {
    pub fn is_ok(&self) -> bool {
        self.status == CheckStatus::Ok
    }

    /// Expiry as an RFC 3339 string, or empty when unset.
    pub fn validity_expire_rfc3339(&self) -> String {
        self.validity_expire
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_default()
    }

    /// The six output columns, in header order.
    pub fn to_record(&self) -> [String; 6] {
        [
            self.url.clone(),
            self.hostname.clone(),
            self.port.map(|p| p.to_string()).unwrap_or_default(),
            self.status.to_string(),
            self.description.clone(),
            self.validity_expire_rfc3339(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    #[test]
    fn test_task_trims_and_skips_blank() {
        assert_eq!(
            CheckTask::new("\tgithub.com\r\n").unwrap().as_str(),
            "github.com"
        );
        assert_eq!(CheckTask::new(""), None);
        assert_eq!(CheckTask::new(" \r\n"), None);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(CheckStatus::Ok.to_string(), "OK");
        assert_eq!(CheckStatus::Bad.to_string(), "BAD");
        assert_eq!(CheckStatus::from_str("BAD").unwrap(), CheckStatus::Bad);
    }

    #[test]
    fn test_record_columns() {
        let result = CheckResult {
            url: "github.com".to_string(),
            hostname: "github.com".to_string(),
            port: Some(443),
            status: CheckStatus::Ok,
            description: String::new(),
            validity_expire: Some(Utc.with_ymd_and_hms(2030, 2, 5, 23, 59, 59).unwrap()),
        };
        assert_eq!(
            result.to_record(),
            [
                "github.com",
                "github.com",
                "443",
                "OK",
                "",
                "2030-02-05T23:59:59Z"
            ]
        );
    }

    #[test]
    fn test_record_columns_unset_fields() {
        let result = CheckResult {
            url: "https://[::1".to_string(),
            hostname: String::new(),
            port: None,
            status: CheckStatus::Bad,
            description: "Parse URL: invalid IPv6 address".to_string(),
            validity_expire: None,
        };
        let record = result.to_record();
        assert_eq!(record[2], "");
        assert_eq!(record[5], "");
        assert!(!result.is_ok());
    }
}
