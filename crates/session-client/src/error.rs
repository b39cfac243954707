//! Error types for the authenticated client.

use reqwest::StatusCode;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors raised by a [`CredentialStore`](crate::CredentialStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Credential store error: {0}")]
    Other(String),
}

/// Errors raised while calling the token-issuing endpoint.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// No refresh identifier in the credential store.
    #[error("Missing refresh identifier - re-login required")]
    MissingRefreshId,

    /// Issuer answered with a non-2xx status.
    #[error("Token endpoint rejected refresh with HTTP {status}")]
    Rejected { status: StatusCode, body: String },

    /// Issuer answered 2xx but no bearer could be found in the body.
    #[error("Token endpoint response did not contain an access token")]
    MissingToken,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Failed to persist refreshed credentials: {0}")]
    Store(#[from] StoreError),

    #[error("Refresh failed: {0}")]
    Other(String),
}

/// Errors surfaced to callers of [`AuthClient`](crate::AuthClient).
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request never produced a response (connect, timeout, body read).
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A non-2xx response that was not eligible for a credential refresh.
    #[error("request failed with HTTP {status}{}", code_suffix(.code))]
    Status {
        status: StatusCode,
        code: Option<String>,
        body: bytes::Bytes,
    },

    /// The credential could not be renewed; the session teardown has already run.
    #[error("session invalid: {reason}")]
    SessionInvalid { reason: String },

    /// The request failed again after being retried with a freshly issued credential.
    #[error("request failed after credential refresh: {0}")]
    AfterRefresh(Box<ClientError>),

    /// Gave up waiting for an in-flight refresh owned by another request.
    #[error("timed out waiting for credential refresh")]
    WaitTimedOut,

    #[error("Credential store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("configuration error: {0}")]
    Config(String),
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref()
        .map(|c| format!(" ({c})"))
        .unwrap_or_default()
}

impl ClientError {
    /// True when the session could not be renewed and the user must sign in again.
    pub fn is_session_invalid(&self) -> bool {
        matches!(self, Self::SessionInvalid { .. })
    }

    /// True when the failure happened on the retry that carried a fresh credential.
    pub fn is_after_refresh(&self) -> bool {
        matches!(self, Self::AfterRefresh(_))
    }

    /// HTTP status of the underlying response, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport(e) => e.status(),
            Self::AfterRefresh(inner) => inner.status(),
            _ => None,
        }
    }

    /// The error with any after-refresh tagging removed.
    pub fn root(&self) -> &ClientError {
        match self {
            Self::AfterRefresh(inner) => inner.root(),
            other => other,
        }
    }

    pub(crate) fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_after_refresh_exposes_inner_status() {
        let inner = ClientError::Status {
            status: StatusCode::UNAUTHORIZED,
            code: Some("UNAUTHORIZED".to_string()),
            body: bytes::Bytes::new(),
        };
        let err = ClientError::AfterRefresh(Box::new(inner));

        assert!(err.is_after_refresh());
        assert!(!err.is_session_invalid());
        assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
        assert!(matches!(err.root(), ClientError::Status { .. }));
    }

    #[test]
    fn test_status_display_includes_code() {
        let err = ClientError::Status {
            status: StatusCode::FORBIDDEN,
            code: Some("ACCESS_DENIED".to_string()),
            body: bytes::Bytes::new(),
        };
        assert_eq!(
            err.to_string(),
            "request failed with HTTP 403 Forbidden (ACCESS_DENIED)"
        );
    }
}
