//! # vigil-core
//!
//! Shared vocabulary for the Vigil relay crates:
//!
//! - **Envelope**: [`Action`] and [`ActionType`], the `{type, payload, index}` message
//!   used in both directions on a client connection
//! - **Commands**: [`Command`], the explicitly decoded form of an inbound action
//! - **IDs**: [`ConnectionId`] with a short form for log fields
//! - **Errors**: [`ProtocolError`] for envelope/command decoding
//! - **Backoff**: exponential delay math shared by retrying loops
//! - **Logging**: [`logging::init_subscriber`] for the global `tracing` subscriber

#![deny(unsafe_code)]

pub mod action;
pub mod command;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod retry;

pub use action::{Action, ActionType};
pub use command::Command;
pub use errors::ProtocolError;
pub use ids::ConnectionId;
