//! Error types for chatrelay.
//!
//! Every failure on the request path is classified into exactly one [`Error`]
//! variant. Variants raised before the response has started streaming are
//! rendered as a structured JSON body via [`IntoResponse`]. Once the first
//! byte of a stream has been sent there is no way to change the status line,
//! so the relay ends the body instead (see [`crate::proxy::relay`]).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Result type alias for chatrelay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for chatrelay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The server is missing something it needs (usually a provider key).
    #[error("Server is not configured correctly: {0}")]
    Configuration(String),

    /// The client payload is absent, malformed, or incomplete.
    #[error("{0}")]
    BadRequest(String),

    /// The client body exceeded the configured size limit.
    #[error("Request body is too large: {0}")]
    PayloadTooLarge(String),

    /// The upstream answered with a non-success status before streaming.
    #[error("Upstream provider returned {status}")]
    UpstreamRejected { status: u16, body: String },

    /// The upstream could not be reached, timed out, or broke mid-read.
    #[error("Upstream request failed: {0}")]
    Network(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status used when this error is rendered before streaming starts.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Error::UpstreamRejected { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Error::Network(_) => StatusCode::BAD_GATEWAY,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label used in log records.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration",
            Error::BadRequest(_) => "bad_request",
            Error::PayloadTooLarge(_) => "payload_too_large",
            Error::UpstreamRejected { .. } => "upstream_rejected",
            Error::Network(_) => "network",
            Error::Internal(_) => "internal",
        }
    }

    fn body(&self) -> ErrorBody {
        match self {
            Error::Configuration(message) => ErrorBody {
                error: "Server is not configured correctly.".to_string(),
                details: Some(message.clone()),
            },
            Error::BadRequest(message) => ErrorBody {
                error: message.clone(),
                details: None,
            },
            Error::PayloadTooLarge(message) => ErrorBody {
                error: "Request body is too large.".to_string(),
                details: Some(message.clone()),
            },
            Error::UpstreamRejected { body, .. } => ErrorBody {
                error: self.to_string(),
                details: (!body.is_empty()).then(|| body.clone()),
            },
            Error::Network(message) => ErrorBody {
                error: "Failed to reach upstream provider.".to_string(),
                details: Some(message.clone()),
            },
            Error::Internal(message) => ErrorBody {
                error: "Internal Server Error".to_string(),
                details: Some(message.clone()),
            },
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Network(err.to_string())
    }
}

impl From<crate::config::ConfigError> for Error {
    fn from(err: crate::config::ConfigError) -> Self {
        Error::Configuration(err.to_string())
    }
}

/// Client-visible error payload: `{"error": "...", "details": "..."}`.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (self.status_code(), axum::Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn render(err: Error) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn bad_request_is_400_without_details() {
        let (status, json) =
            render(Error::BadRequest("No JSON body received.".to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "No JSON body received.");
        assert!(json.get("details").is_none());
    }

    #[tokio::test]
    async fn payload_too_large_is_413_json() {
        let (status, json) =
            render(Error::PayloadTooLarge("length limit exceeded".to_string())).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json["error"], "Request body is too large.");
        assert_eq!(json["details"], "length limit exceeded");
    }

    #[tokio::test]
    async fn configuration_is_500() {
        let (status, json) =
            render(Error::Configuration("missing key".to_string())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["details"], "missing key");
    }

    #[tokio::test]
    async fn upstream_rejection_mirrors_status_and_body() {
        let (status, json) = render(Error::UpstreamRejected {
            status: 429,
            body: r#"{"error":"slow down"}"#.to_string(),
        })
        .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(json["details"], r#"{"error":"slow down"}"#);
        assert!(json["error"].as_str().unwrap().contains("429"));
    }

    #[tokio::test]
    async fn invalid_upstream_status_falls_back_to_bad_gateway() {
        let err = Error::UpstreamRejected {
            status: 42,
            body: String::new(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        let (_, json) = render(err).await;
        assert!(json.get("details").is_none());
    }

    #[test]
    fn network_is_bad_gateway() {
        let err = Error::Network("connection refused".to_string());
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.kind(), "network");
    }
}
