//! WebSocket connection handling.

pub mod connection;
pub mod dispatch;
pub mod session;
