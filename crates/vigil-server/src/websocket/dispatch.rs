//! Inbound action dispatch.

use metrics::counter;
use tracing::{debug, warn};
use vigil_core::{Action, Command, ProtocolError};

use super::connection::Connection;
use crate::metrics::WS_IGNORED_MESSAGES_TOTAL;
use crate::poller::SharedResource;
use crate::watch::EntityKind;

/// Decode `action` into a [`Command`] and apply it to `conn`.
///
/// Unknown types and malformed payloads are logged and ignored. Watch-set
/// insertion happens here, before any task is spawned, so a watch followed by
/// an unwatch is always applied in order.
pub fn dispatch(conn: &Connection, action: &Action) {
    let command = match Command::decode(action) {
        Ok(command) => command,
        Err(ProtocolError::UnknownType(action_type)) => {
            counter!(WS_IGNORED_MESSAGES_TOTAL, "reason" => "unknown_type").increment(1);
            warn!(%action_type, "unknown action type, ignoring");
            return;
        }
        Err(e) => {
            counter!(WS_IGNORED_MESSAGES_TOTAL, "reason" => "invalid_command").increment(1);
            warn!(error = %e, "invalid command, ignoring");
            return;
        }
    };
    debug!(?command, "dispatching");

    let _ = match command {
        Command::FetchRegions => {
            conn.reply_regions();
            true
        }
        Command::WatchServices => conn.attach(SharedResource::Services),
        Command::UnwatchServices => conn.unwatch(SharedResource::Services.key()),
        Command::WatchNodes => conn.attach(SharedResource::Nodes),
        Command::UnwatchNodes => conn.unwatch(SharedResource::Nodes.key()),
        Command::WatchService(id) => conn.watch_entity(EntityKind::Service, id),
        Command::UnwatchService(id) => conn.unwatch(&EntityKind::Service.watch_key(&id)),
        Command::WatchNode(id) => conn.watch_entity(EntityKind::Node, id),
        Command::UnwatchNode(id) => conn.unwatch(&EntityKind::Node.watch_key(&id)),
    };
}
