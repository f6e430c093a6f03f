//! Inbound commands decoded from client actions.

use serde_json::Value;

use crate::action::{Action, ActionType};
use crate::errors::ProtocolError;

/// A client request, decoded from an [`Action`] by its type tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Reply with the region directory.
    FetchRegions,
    /// Attach to the shared service list.
    WatchServices,
    /// Detach from the shared service list.
    UnwatchServices,
    /// Start a dedicated watch on one service.
    WatchService(String),
    /// Stop the dedicated watch on one service.
    UnwatchService(String),
    /// Attach to the shared node list.
    WatchNodes,
    /// Detach from the shared node list.
    UnwatchNodes,
    /// Start a dedicated watch on one node.
    WatchNode(String),
    /// Stop the dedicated watch on one node.
    UnwatchNode(String),
}

impl Command {
    /// Decode a command from an inbound action.
    ///
    /// Event types (`fetched*`) are not commands and are rejected with
    /// [`ProtocolError::NotACommand`].
    pub fn decode(action: &Action) -> Result<Self, ProtocolError> {
        let kind: ActionType = action.action_type.parse()?;
        let command = match kind {
            ActionType::FetchRegions => Self::FetchRegions,
            ActionType::WatchServices => Self::WatchServices,
            ActionType::UnwatchServices => Self::UnwatchServices,
            ActionType::WatchService => Self::WatchService(entity_id(kind, &action.payload)?),
            ActionType::UnwatchService => Self::UnwatchService(entity_id(kind, &action.payload)?),
            ActionType::WatchNodes => Self::WatchNodes,
            ActionType::UnwatchNodes => Self::UnwatchNodes,
            ActionType::WatchNode => Self::WatchNode(entity_id(kind, &action.payload)?),
            ActionType::UnwatchNode => Self::UnwatchNode(entity_id(kind, &action.payload)?),
            ActionType::FetchedRegions
            | ActionType::FetchedServices
            | ActionType::FetchedService
            | ActionType::FetchedNodes
            | ActionType::FetchedNode => return Err(ProtocolError::NotACommand(kind)),
        };
        Ok(command)
    }
}

fn entity_id(kind: ActionType, payload: &Value) -> Result<String, ProtocolError> {
    match payload {
        Value::String(id) if !id.is_empty() => Ok(id.clone()),
        _ => Err(ProtocolError::InvalidPayload {
            action_type: kind,
            expected: "non-empty entity id string",
        }),
    }
}
