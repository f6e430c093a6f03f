//! Server and transport error types.

use thiserror::Error;
use vigil_consul::ConsulError;
use vigil_core::ProtocolError;

/// Errors raised while building or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// Address that was requested.
        address: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// I/O failure while serving.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A region's backend could not be created.
    #[error("region {region}: {source}")]
    Region {
        /// Region name.
        region: String,
        /// Backend error.
        source: ConsulError,
    },

    /// The metrics recorder could not be installed.
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
}

/// Errors on a single client connection's transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Reading from or writing to the socket failed.
    #[error("socket error: {0}")]
    Socket(#[from] axum::Error),

    /// The peer sent a close frame.
    #[error("peer closed the connection")]
    Closed,

    /// A binary frame did not hold UTF-8 text.
    #[error("binary frame is not valid UTF-8")]
    NotUtf8,

    /// An inbound frame was not a valid envelope.
    #[error("failed to decode frame: {0}")]
    Decode(#[source] ProtocolError),

    /// An outbound action could not be encoded.
    #[error("failed to encode action: {0}")]
    Encode(#[source] ProtocolError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_error_names_address() {
        let err = ServerError::Bind {
            address: "127.0.0.1:80".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.to_string(), "failed to bind 127.0.0.1:80: denied");
    }

    #[test]
    fn region_error_names_region() {
        let err = ServerError::Region {
            region: "eu".into(),
            source: ConsulError::Unavailable("bad address".into()),
        };
        assert_eq!(err.to_string(), "region eu: consul unavailable: bad address");
    }

    #[test]
    fn decode_error_wraps_protocol_error() {
        let inner = vigil_core::Action::from_json("not json").unwrap_err();
        let err = TransportError::Decode(inner);
        assert!(err.to_string().starts_with("failed to decode frame"));
    }
}
