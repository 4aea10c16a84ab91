use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Why a single stream payload could not be turned into a progress event.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("payload has no string `type` discriminant")]
    MissingDiscriminant,
    #[error("unrecognized event kind '{0}'")]
    UnknownKind(String),
    #[error("invalid '{kind}' payload: {source}")]
    InvalidFields {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

impl DecodeError {
    /// Short label used in log fields and decode-failure notifications.
    pub fn reason(&self) -> &'static str {
        match self {
            DecodeError::Malformed(_) => "malformed",
            DecodeError::NotAnObject => "not_an_object",
            DecodeError::MissingDiscriminant => "missing_discriminant",
            DecodeError::UnknownKind(_) => "unknown_kind",
            DecodeError::InvalidFields { .. } => "invalid_fields",
        }
    }
}

/// Failures reported by the stream transport. Every variant is session-fatal.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open event stream: {0}")]
    Connect(String),
    #[error("event stream rejected with status {status}")]
    Status { status: StatusCode },
    #[error("event stream read failed: {0}")]
    Read(String),
    #[error("event stream idle for {after:?}")]
    IdleTimeout { after: Duration },
}

#[derive(Debug, Error)]
pub enum ApiClientError {
    #[error("invalid research api url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("research api url cannot be used as a base: {0}")]
    NotABaseUrl(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP error! status: {status}{}", format_detail(.detail))]
    Status {
        status: StatusCode,
        detail: Option<String>,
    },
    #[error("No job ID received")]
    MissingJobId,
    #[error("report is empty; nothing to export")]
    EmptyReport,
}

fn format_detail(detail: &Option<String>) -> String {
    detail
        .as_deref()
        .map(|detail| format!(" ({detail})"))
        .unwrap_or_default()
}
