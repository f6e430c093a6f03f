//! Protocol error types.

use thiserror::Error;

use crate::action::ActionType;

/// Errors raised while decoding or encoding client messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame is not a valid `{type, payload, index}` envelope.
    #[error("invalid message envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    /// An outbound action could not be serialized.
    #[error("failed to encode action: {0}")]
    Encode(#[source] serde_json::Error),

    /// The `type` tag is not one of the recognized action types.
    #[error("unknown action type: {0}")]
    UnknownType(String),

    /// A server event type was sent by the client.
    #[error("{0} is an event, not a command")]
    NotACommand(ActionType),

    /// The payload does not have the shape the command requires.
    #[error("invalid payload for {action_type}: expected {expected}")]
    InvalidPayload {
        /// Command whose payload was rejected.
        action_type: ActionType,
        /// Description of the expected shape.
        expected: &'static str,
    },
}
