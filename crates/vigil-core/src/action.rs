//! The `{type, payload, index}` message envelope.
//!
//! Every frame exchanged with a client is an [`Action`]. The `type` field is
//! kept as a plain string on the wire so that unknown types survive decoding
//! and can be logged by the dispatcher instead of tearing the connection down.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ProtocolError;

/// Recognized action types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionType {
    /// Client asks for the region directory.
    FetchRegions,
    /// Region directory (server event).
    FetchedRegions,
    /// Start watching the full service list.
    WatchServices,
    /// Stop watching the full service list.
    UnwatchServices,
    /// Full service list (server event).
    FetchedServices,
    /// Start watching one service.
    WatchService,
    /// Stop watching one service.
    UnwatchService,
    /// Single service health detail (server event).
    FetchedService,
    /// Start watching the full node list.
    WatchNodes,
    /// Stop watching the full node list.
    UnwatchNodes,
    /// Full node list (server event).
    FetchedNodes,
    /// Start watching one node.
    WatchNode,
    /// Stop watching one node.
    UnwatchNode,
    /// Single node health detail (server event).
    FetchedNode,
}

impl ActionType {
    /// All recognized types, in wire-table order.
    pub const ALL: [Self; 14] = [
        Self::FetchRegions,
        Self::FetchedRegions,
        Self::WatchServices,
        Self::UnwatchServices,
        Self::FetchedServices,
        Self::WatchService,
        Self::UnwatchService,
        Self::FetchedService,
        Self::WatchNodes,
        Self::UnwatchNodes,
        Self::FetchedNodes,
        Self::WatchNode,
        Self::UnwatchNode,
        Self::FetchedNode,
    ];

    /// Wire name of this type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FetchRegions => "fetchRegions",
            Self::FetchedRegions => "fetchedRegions",
            Self::WatchServices => "watchServices",
            Self::UnwatchServices => "unwatchServices",
            Self::FetchedServices => "fetchedServices",
            Self::WatchService => "watchService",
            Self::UnwatchService => "unwatchService",
            Self::FetchedService => "fetchedService",
            Self::WatchNodes => "watchNodes",
            Self::UnwatchNodes => "unwatchNodes",
            Self::FetchedNodes => "fetchedNodes",
            Self::WatchNode => "watchNode",
            Self::UnwatchNode => "unwatchNode",
            Self::FetchedNode => "fetchedNode",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownType(s.to_string()))
    }
}

/// Message envelope used for inbound commands and outbound events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Wire type tag. See [`ActionType`] for the recognized values.
    #[serde(rename = "type")]
    pub action_type: String,
    /// Variant data; `null` when absent.
    #[serde(default)]
    pub payload: Value,
    /// Backend version marker, meaningful for `fetched*` events only.
    #[serde(default)]
    pub index: u64,
}

impl Action {
    /// Build an action of a known type.
    pub fn new(action_type: ActionType, payload: Value, index: u64) -> Self {
        Self {
            action_type: action_type.as_str().to_string(),
            payload,
            index,
        }
    }

    /// Decode an action from a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Envelope)
    }

    /// Encode this action as a JSON text frame.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Whether this action carries the given type.
    pub fn is(&self, action_type: ActionType) -> bool {
        self.action_type == action_type.as_str()
    }
}
