//! Shared error types including RFC7807 Problem Details.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// RFC7807 Problem Details (application/problem+json)
///
/// The backend answers failed REST calls with this envelope. The client only
/// reads it to turn an error body into something a user can understand.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    #[serde(rename = "type", default)]
    pub type_url: String,
    pub title: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

/// Attempt to parse an RFC7807 (or RFC7807-ish) JSON body into a user-facing message.
/// Prefers `detail`, falls back to `title`.
pub fn try_problem_detail(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ProblemDetails>(body).ok()?;
    if let Some(detail) = parsed.detail {
        if !detail.trim().is_empty() {
            return Some(detail);
        }
    }
    if !parsed.title.trim().is_empty() {
        return Some(parsed.title);
    }
    None
}

/// API error type for client-side use
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Deserialization error: {0}")]
    Deserialize(String),
}

/// Errors raised while reading frames or payloads off the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Frame error: {0}")]
    Frame(String),

    #[error("Unknown frame command: {0}")]
    UnknownCommand(String),

    #[error("Payload error: {0}")]
    Payload(String),

    #[error("Unknown event type: {0}")]
    UnknownEvent(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_problem_detail_prefers_detail() {
        let body = r#"{"type":"about:blank","title":"Unauthorized","status":401,"detail":"token expired"}"#;
        assert_eq!(try_problem_detail(body).as_deref(), Some("token expired"));
    }

    #[test]
    fn test_problem_detail_falls_back_to_title() {
        let body = r#"{"title":"Not Found","status":404,"detail":"  "}"#;
        assert_eq!(try_problem_detail(body).as_deref(), Some("Not Found"));
        assert_eq!(try_problem_detail("<html>"), None);
    }
}
