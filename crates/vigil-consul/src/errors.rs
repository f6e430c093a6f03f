//! Backend error types.

use thiserror::Error;

/// Errors returned by a [`crate::ConsulBackend`].
#[derive(Debug, Error)]
pub enum ConsulError {
    /// The request could not be sent or the response body not read.
    #[error("consul request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Consul answered with a non-success status.
    #[error("consul returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, as text.
        body: String,
    },

    /// The response lacked a usable `X-Consul-Index` header.
    #[error("missing or invalid X-Consul-Index header")]
    MissingIndex,

    /// The response body was not the expected JSON.
    #[error("failed to decode consul response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The backend is unreachable or refused the query.
    #[error("consul unavailable: {0}")]
    Unavailable(String),
}

impl ConsulError {
    /// Whether the error is a 404 from Consul.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}
