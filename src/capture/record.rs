//! Captured exchange record and its line codec

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Result, RetraceError};

/// One fully captured request/response exchange.
///
/// Field names on the wire are camelCase (`requestBody`, `responseBody`) so
/// existing capture logs remain readable. A record is emitted exactly once,
/// after the response has been fully sent to the original client, and is
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedExchange {
    /// Capture time; older logs may omit it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Uppercase HTTP method
    pub method: String,
    /// Path plus query string, no scheme or host
    pub url: String,
    /// Response status code
    pub status: u16,
    /// Request body bytes as UTF-8, may be empty
    #[serde(default)]
    pub request_body: String,
    /// Response body bytes as UTF-8, may be empty
    #[serde(default)]
    pub response_body: String,
}

impl CapturedExchange {
    /// Create a record stamped with the current time
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        url: impl Into<String>,
        status: u16,
        request_body: impl Into<String>,
        response_body: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Some(Utc::now()),
            method: method.into(),
            url: url.into(),
            status,
            request_body: request_body.into(),
            response_body: response_body.into(),
        }
    }

    /// Whether the captured status is in the 2xx range.
    ///
    /// Only successful exchanges are eligible for replay.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Serialize to a single JSON line (no trailing newline).
    ///
    /// serde_json escapes control characters, so the output never contains
    /// an embedded newline.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| RetraceError::InvalidRecord(e.to_string()))
    }

    /// Parse a record from one log line.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRecord` if the line is not a valid record object
    pub fn from_json_line(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|e| RetraceError::InvalidRecord(e.to_string()))
    }
}
