//! WebSocket session lifecycle: handles a single connected client from
//! upgrade through disconnect.

use std::fmt::Display;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, instrument, warn};
use vigil_core::{Action, ConnectionId};

use super::connection::{Connection, ConnectionContext};
use super::dispatch::dispatch;
use crate::errors::TransportError;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, WS_WRITE_ERRORS_TOTAL,
};

/// Run a session over an upgraded axum WebSocket.
pub async fn run_ws_session(ws: WebSocket, ctx: ConnectionContext, queue_capacity: usize) {
    let (sink, stream) = ws.split();
    handle(stream, sink, ConnectionId::new(), ctx, queue_capacity).await;
}

/// Run a session until the transport closes, errors, or the connection is
/// destroyed.
///
/// 1. Registers with the registry and starts the outbound delivery loop
/// 2. Reads frames and dispatches them as commands
/// 3. On exit: clears watches, deregisters, cancels and waits for owned tasks
/// 4. Closes the outbound queue; the delivery loop sends a close frame
#[instrument(skip_all, fields(conn = %id.short(), region = %ctx.region.name()))]
pub async fn handle<S, K>(
    mut inbound: S,
    sink: K,
    id: ConnectionId,
    ctx: ConnectionContext,
    queue_capacity: usize,
) where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
    K: Sink<Message> + Unpin + Send + 'static,
    K::Error: Display,
{
    let region = ctx.region.name().to_string();
    let teardown_timeout = ctx.timings.teardown_timeout;
    let (tx, rx) = mpsc::channel::<Action>(queue_capacity.max(1));
    let connection = Connection::new(id, ctx, tx);

    let started = Instant::now();
    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL, "region" => region.clone()).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    connection.register().await;
    let mut outbound = tokio::spawn(deliver(sink, rx).in_current_span());

    let destroy = connection.destroy_token().clone();
    loop {
        let frame = tokio::select! {
            () = destroy.cancelled() => {
                debug!("connection destroyed");
                break;
            }
            frame = inbound.next() => frame,
        };
        let Some(frame) = frame else {
            debug!("transport closed");
            break;
        };
        match decode_frame(frame) {
            Ok(Some(action)) => dispatch(&connection, &action),
            Ok(None) => {}
            Err(e) => {
                info!(error = %e, "closing connection");
                break;
            }
        }
    }

    connection.teardown().await;
    drop(connection);

    if tokio::time::timeout(teardown_timeout, &mut outbound).await.is_err() {
        warn!("delivery loop did not finish, aborting");
        outbound.abort();
    }

    info!("client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL, "region" => region).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}

/// Turn one inbound frame into an action.
///
/// `Ok(None)` means the frame carries nothing to dispatch (ping/pong). A close
/// frame, socket error, non-UTF-8 binary frame, or invalid envelope is an error
/// and ends the session.
pub fn decode_frame(frame: Result<Message, axum::Error>) -> Result<Option<Action>, TransportError> {
    let text = match frame? {
        Message::Text(text) => text.to_string(),
        // binary frames holding UTF-8 JSON are accepted too
        Message::Binary(data) => String::from_utf8(data.to_vec()).map_err(|_| TransportError::NotUtf8)?,
        Message::Ping(_) | Message::Pong(_) => return Ok(None),
        Message::Close(_) => return Err(TransportError::Closed),
    };
    Action::from_json(&text).map(Some).map_err(TransportError::Decode)
}

/// Drain the outbound queue onto the transport in arrival order.
///
/// Write failures are logged and skipped. When the queue closes a close frame
/// is sent and the transport is closed.
async fn deliver<K>(mut sink: K, mut rx: mpsc::Receiver<Action>)
where
    K: Sink<Message> + Unpin,
    K::Error: Display,
{
    while let Some(action) = rx.recv().await {
        let text = match action.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %TransportError::Encode(e), "dropping action");
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(text.into())).await {
            counter!(WS_WRITE_ERRORS_TOTAL).increment(1);
            warn!(error = %e, action_type = %action.action_type, "failed to write frame");
        }
    }

    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
    debug!("delivery loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use futures::channel::mpsc as fmpsc;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use vigil_consul::MockBackend;
    use vigil_core::ActionType;

    use crate::config::WatchTimings;
    use crate::region::Region;
    use crate::registry::Registry;

    struct Client {
        to_server: fmpsc::UnboundedSender<Result<Message, axum::Error>>,
        from_server: fmpsc::UnboundedReceiver<Message>,
        session: tokio::task::JoinHandle<()>,
        registry: Arc<Registry>,
        shutdown: CancellationToken,
    }

    impl Client {
        fn send(&self, text: &str) {
            self.to_server
                .unbounded_send(Ok(Message::Text(text.to_string().into())))
                .unwrap();
        }

        async fn next(&mut self) -> Message {
            tokio::time::timeout(Duration::from_secs(2), self.from_server.next())
                .await
                .unwrap()
                .unwrap()
        }

        async fn next_action(&mut self) -> Action {
            match self.next().await {
                Message::Text(text) => Action::from_json(&text).unwrap(),
                other => panic!("expected text frame, got {other:?}"),
            }
        }
    }

    fn start(backend: Arc<MockBackend>) -> Client {
        let registry = Arc::new(Registry::new());
        let shutdown = CancellationToken::new();
        let ctx = ConnectionContext {
            region: Arc::new(Region::new("local", "local", backend)),
            registry: registry.clone(),
            timings: WatchTimings {
                teardown_timeout: Duration::from_secs(1),
                ..WatchTimings::default()
            },
            shutdown: shutdown.clone(),
        };
        let (to_server, inbound) = fmpsc::unbounded();
        let (sink, from_server) = fmpsc::unbounded();
        let session = tokio::spawn(handle(inbound, sink, ConnectionId::new(), ctx, 16));
        Client {
            to_server,
            from_server,
            session,
            registry,
            shutdown,
        }
    }

    #[test]
    fn decode_text_and_binary_frames() {
        let text = decode_frame(Ok(Message::Text(r#"{"type":"watchNodes"}"#.into()))).unwrap();
        assert!(text.unwrap().is(ActionType::WatchNodes));
        let binary = decode_frame(Ok(Message::Binary(
            br#"{"type":"fetchRegions"}"#.to_vec().into(),
        )))
        .unwrap();
        assert!(binary.unwrap().is(ActionType::FetchRegions));
        assert_matches!(decode_frame(Ok(Message::Ping(Vec::new().into()))), Ok(None));
    }

    #[test]
    fn decode_failures_are_terminal_errors() {
        assert_matches!(
            decode_frame(Ok(Message::Text("not json".into()))),
            Err(TransportError::Decode(_))
        );
        assert_matches!(
            decode_frame(Ok(Message::Binary(vec![0xff, 0xfe].into()))),
            Err(TransportError::NotUtf8)
        );
        assert_matches!(decode_frame(Ok(Message::Close(None))), Err(TransportError::Closed));
        assert_matches!(
            decode_frame(Err(axum::Error::new(std::io::Error::other("reset")))),
            Err(TransportError::Socket(_))
        );
    }

    #[tokio::test]
    async fn watch_services_gets_snapshot_then_updates() {
        let backend = Arc::new(MockBackend::new());
        let mut client = start(backend);
        client.send(r#"{"type":"watchServices"}"#);
        let first = client.next_action().await;
        assert!(first.is(ActionType::FetchedServices));
        assert_eq!(first.index, 0);
        assert_eq!(first.payload, json!({}));
        drop(client.to_server);
        client.session.await.unwrap();
    }

    #[tokio::test]
    async fn bad_envelope_closes_connection() {
        let mut client = start(Arc::new(MockBackend::new()));
        client.send(r#"{"type":"watchNode","payload":"n1"}"#);
        client.send("{{{");
        // session ends and the delivery loop finishes with a close frame
        tokio::time::timeout(Duration::from_secs(3), &mut client.session)
            .await
            .unwrap()
            .unwrap();
        let mut saw_close = false;
        while let Some(msg) = client.from_server.next().await {
            if matches!(msg, Message::Close(_)) {
                saw_close = true;
            }
        }
        assert!(saw_close);
        assert_eq!(client.registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn unknown_type_keeps_connection_open() {
        let mut client = start(Arc::new(MockBackend::new()));
        client.send(r#"{"type":"selfDestruct"}"#);
        client.send(r#"{"type":"watchNodes"}"#);
        let reply = client.next_action().await;
        assert!(reply.is(ActionType::FetchedNodes));
        assert_eq!(client.registry.connection_count().await, 1);
        drop(client.to_server);
        client.session.await.unwrap();
    }

    #[tokio::test]
    async fn process_shutdown_ends_session() {
        let mut client = start(Arc::new(MockBackend::new()));
        client.send(r#"{"type":"watchService","payload":"web"}"#);
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(3), &mut client.session)
            .await
            .unwrap()
            .unwrap();
        assert_matches!(client.next().await, Message::Close(None));
        assert_eq!(client.registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn nothing_is_sent_after_close() {
        let backend = Arc::new(MockBackend::new());
        backend.set_node("n1", json!([]), 4);
        let mut client = start(backend.clone());
        client.send(r#"{"type":"watchNode","payload":"n1"}"#);
        assert_eq!(client.next_action().await.index, 4);

        drop(client.to_server);
        client.session.await.unwrap();
        backend.set_node("n1", json!([{"late": true}]), 9);

        let mut rest = Vec::new();
        while let Some(msg) = client.from_server.next().await {
            rest.push(msg);
        }
        assert_eq!(rest.len(), 1);
        assert_matches!(rest[0], Message::Close(None));
    }
}
