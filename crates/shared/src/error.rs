//! Shared error types including RFC7807 Problem Details.

use serde::{Deserialize, Serialize};

/// Failure to encode or decode a realtime frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("`{kind}` frame needs a non-empty room name, got {payload}")]
    InvalidRoom { kind: String, payload: String },
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}

/// RFC7807 Problem Details (application/problem+json)
///
/// Canonical error body for rejected `/api/*` and `/cable` requests, so
/// clients can show why a socket upgrade was refused.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    /// A URI reference that identifies the problem type.
    #[serde(rename = "type")]
    pub type_url: String,
    /// A short, human-readable summary of the problem type.
    pub title: String,
    /// HTTP status code.
    pub status: u16,
    /// Human-readable explanation specific to this occurrence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProblemDetails {
    fn new(slug: &str, title: &str, status: u16, detail: impl Into<String>) -> Self {
        Self {
            type_url: format!("https://supportdesk.dev/problems/{slug}"),
            title: title.to_string(),
            status,
            detail: Some(detail.into()),
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new("bad-request", "Bad Request", 400, detail)
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new("unauthorized", "Unauthorized", 401, detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new("not-found", "Not Found", 404, detail)
    }

    pub fn service_unavailable(detail: impl Into<String>) -> Self {
        Self::new("unavailable", "Service Unavailable", 503, detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn problem_details_use_rfc7807_field_names() {
        let problem = ProblemDetails::unauthorized("bad token");
        let value = serde_json::to_value(&problem).unwrap();

        assert_eq!(value["type"], "https://supportdesk.dev/problems/unauthorized");
        assert_eq!(value["status"], 401);
        assert_eq!(value["detail"], "bad token");
    }
}
