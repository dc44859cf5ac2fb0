//! Error types for the proxy
//!
//! Every variant maps to an HTTP status and a JSON body of the form
//! `{"ok": false, "error": "..."}`, so a failed request is always answered
//! with something the browser client can parse.

use std::io;
use std::time::Duration;

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use thiserror::Error;

/// Result type alias for the proxy
pub type Result<T> = std::result::Result<T, Error>;

/// Maximum number of characters of a non-JSON upstream body echoed back
pub const UPSTREAM_BODY_PREVIEW_CHARS: usize = 2000;

/// Proxy errors
#[derive(Error, Debug)]
pub enum Error {
    /// Request method other than POST (or OPTIONS with CORS)
    #[error("Method Not Allowed")]
    MethodNotAllowed,

    /// A required secret is absent; carries the variable name
    #[error("Missing {0}")]
    MissingConfiguration(&'static str),

    /// Content-Type header does not announce JSON
    #[error("Expected application/json")]
    InvalidContentType,

    /// Request body is not a JSON object
    #[error("Invalid JSON body")]
    InvalidBody,

    /// Upstream exchange exceeded its deadline
    #[error("Upstream timeout")]
    UpstreamTimeout(Duration),

    /// Upstream answered with a body that is not JSON
    #[error("Upstream returned non-JSON")]
    UpstreamNonJson {
        /// Status code reported by the upstream
        status: u16,
        /// Raw upstream body
        body: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status used when this error is returned to the client
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::InvalidContentType | Self::InvalidBody => StatusCode::BAD_REQUEST,
            Self::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamNonJson { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON body sent to the client
    #[must_use]
    pub fn to_body(&self) -> Value {
        match self {
            Self::UpstreamNonJson { status, body } => json!({
                "ok": false,
                "error": self.to_string(),
                "upstreamStatus": status,
                "upstreamBody": truncate_chars(body, UPSTREAM_BODY_PREVIEW_CHARS),
            }),
            _ => json!({ "ok": false, "error": self.to_string() }),
        }
    }

    /// Whether the error was caused by the upstream deadline
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::UpstreamTimeout(_) => true,
            Self::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (
            status,
            [(header::CACHE_CONTROL, "no-store")],
            Json(self.to_body()),
        )
            .into_response()
    }
}

/// Cut `s` down to at most `max` characters without splitting a code point
#[must_use]
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::MethodNotAllowed.status_code(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            Error::MissingConfiguration("API_KEY").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(Error::InvalidContentType.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::InvalidBody.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            Error::UpstreamTimeout(Duration::from_secs(12)).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            Error::UpstreamNonJson { status: 200, body: String::new() }.status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            Error::Internal("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_missing_configuration_names_variable() {
        let body = Error::MissingConfiguration("APPS_SCRIPT_URL").to_body();
        assert_eq!(body, json!({"ok": false, "error": "Missing APPS_SCRIPT_URL"}));
    }

    #[test]
    fn test_timeout_body() {
        let err = Error::UpstreamTimeout(Duration::from_secs(12));
        assert!(err.is_timeout());
        assert_eq!(err.to_body(), json!({"ok": false, "error": "Upstream timeout"}));
    }

    #[test]
    fn test_non_json_body_is_truncated() {
        let err = Error::UpstreamNonJson {
            status: 500,
            body: "x".repeat(5000),
        };
        let body = err.to_body();
        assert_eq!(body["upstreamStatus"], 500);
        assert_eq!(body["upstreamBody"].as_str().unwrap().len(), 2000);
        assert_eq!(body["error"], "Upstream returned non-JSON");
    }

    #[test]
    fn test_truncate_chars_respects_code_points() {
        let s = "ёжик".repeat(1000);
        let cut = truncate_chars(&s, 2000);
        assert_eq!(cut.chars().count(), 2000);
        assert_eq!(truncate_chars("short", 2000), "short");
    }
}
