//! Per-connection read loop and the session handle given to handlers.
//!
//! Each connection gets one loop: it reads transport messages under the
//! heartbeat deadline, reassembles frames in order, answers pings and hands
//! data frames to the router. Every exit path converges on the same
//! teardown: unregister, close the write half, report `on_close` once.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use metrics::{counter, gauge};
use serde::Serialize;
use skein_core::{BoxSink, BoxSource, Frame, FrameError, FrameKind, FrameReader, WireMessage, legacy};
use skein_router::{Context, DispatchMode, Router};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::callbacks::Callbacks;
use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionId};
use crate::errors::{CloseReason, PushError, ServerError};
use crate::metrics::{
    DISPATCH_ERRORS_TOTAL, FRAMES_DISPATCHED_TOTAL, FRAMES_RECEIVED_TOTAL, FRAMING_ERRORS_TOTAL,
    WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};
use crate::registry::ConnectionRegistry;

/// Context handed to server-side handlers.
pub type ServerContext = Context<Session>;

/// Handle on one live connection, cloned into every handler call.
#[derive(Clone)]
pub struct Session {
    conn: Arc<Connection>,
    registry: Arc<ConnectionRegistry>,
}

impl Session {
    pub(crate) fn new(conn: Arc<Connection>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { conn, registry }
    }

    /// Connection id.
    pub fn id(&self) -> ConnectionId {
        self.conn.id()
    }

    /// Underlying connection.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Registry this connection lives in.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Push an event to this connection with no correlation id.
    pub async fn emit(&self, event: &str, body: &[u8]) -> Result<(), PushError> {
        self.registry.push_event(self.id(), 0, event, body).await
    }

    /// Answer the frame with correlation id `id`.
    pub async fn reply(&self, id: i64, event: &str, body: &[u8]) -> Result<(), PushError> {
        self.registry.push_event(self.id(), id, event, body).await
    }

    /// Push `value` serialized as JSON.
    pub async fn json_emit<T: Serialize + ?Sized>(
        &self,
        event: &str,
        value: &T,
    ) -> Result<(), PushError> {
        let body = serde_json::to_vec(value)?;
        self.emit(event, &body).await
    }

    /// Push an event to another connection.
    pub async fn push_to(
        &self,
        target: ConnectionId,
        event: &str,
        body: &[u8],
    ) -> Result<(), PushError> {
        self.registry.push_event(target, 0, event, body).await
    }

    /// Push an event to every live connection, this one included.
    pub async fn emit_all(&self, event: &str, body: &[u8]) -> usize {
        self.registry.emit_all(event, body).await
    }

    /// Close this connection. The read loop reports `CloseReason::Server`.
    pub async fn close(&self) {
        self.conn.close().await;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.id()).finish()
    }
}

/// State shared by every connection of one server.
pub(crate) struct Shared {
    pub(crate) config: ServerConfig,
    pub(crate) registry: Arc<ConnectionRegistry>,
    pub(crate) router: Arc<Router<ServerContext>>,
    pub(crate) callbacks: Callbacks,
}

impl Shared {
    pub(crate) fn report(&self, err: &ServerError) {
        debug!(error = %err, "reporting runtime error");
        self.callbacks.error(err);
    }

    /// Route one data frame.
    pub(crate) async fn dispatch(&self, session: Session, frame: Frame) {
        let id = session.id();
        let event = frame.event().into_owned();
        let mut ctx = ServerContext::new(session, frame.id, event.clone(), frame.body);
        counter!(FRAMES_DISPATCHED_TOTAL).increment(1);
        if let Err(source) = self.router.dispatch(&event, &mut ctx).await {
            counter!(DISPATCH_ERRORS_TOTAL, "kind" => source.kind()).increment(1);
            self.report(&ServerError::Dispatch { id, source });
        }
    }

    /// Dispatch per the configured mode: spawned, or awaited in place.
    pub(crate) async fn route_frame(self: &Arc<Self>, session: &Session, frame: Frame) {
        match self.config.dispatch {
            DispatchMode::Concurrent => {
                let shared = Arc::clone(self);
                let session = session.clone();
                let _ = tokio::spawn(async move { shared.dispatch(session, frame).await });
            }
            DispatchMode::Sequential => self.dispatch(session.clone(), frame).await,
        }
    }
}

/// Register a connection, run its read loop and tear it down.
#[instrument(skip_all, fields(conn_id))]
pub(crate) async fn run_session(
    shared: Arc<Shared>,
    sink: BoxSink,
    mut source: BoxSource,
    peer: Option<SocketAddr>,
    shutdown: CancellationToken,
) {
    let conn = match shared.registry.open(sink, peer, shared.config.codec) {
        Ok(conn) => conn,
        Err(e) => {
            shared.report(&ServerError::Registry(e));
            return;
        }
    };
    let id = conn.id();
    let _ = tracing::Span::current().record("conn_id", id);
    counter!(WS_CONNECTIONS_TOTAL, "transport" => "ws").increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    info!(?peer, "connection opened");

    let session = Session::new(Arc::clone(&conn), Arc::clone(&shared.registry));
    shared.callbacks.open(session.clone());

    let mut reason = tokio::select! {
        reason = read_loop(&shared, &session, &mut source) => reason,
        () = shutdown.cancelled() => CloseReason::Server,
    };
    if conn.is_closing() {
        reason = CloseReason::Server;
    }

    let _ = shared.registry.close(id);
    conn.close().await;
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason.label()).increment(1);
    info!(%reason, "connection closed");
    shared.callbacks.close(id, reason);
}

async fn read_loop(shared: &Arc<Shared>, session: &Session, source: &mut BoxSource) -> CloseReason {
    let conn = session.connection();
    let id = conn.id();
    let mut reader = FrameReader::new(shared.config.max_frame_len);

    loop {
        let Ok(next) = tokio::time::timeout(shared.config.heartbeat_timeout, source.recv()).await
        else {
            debug!("read deadline expired");
            return CloseReason::IdleTimeout;
        };
        let message = match next {
            None => return CloseReason::PeerClosed,
            Some(Err(source)) => {
                shared.report(&ServerError::Transport { id, source });
                return CloseReason::ReadFailure;
            }
            Some(Ok(message)) => message,
        };
        conn.touch();

        let (frames, failure) = match message {
            WireMessage::Close => return CloseReason::PeerClosed,
            WireMessage::Ping(_) | WireMessage::Pong(_) => continue,
            WireMessage::Text(text) if legacy::is_legacy(text.as_bytes()) => {
                legacy_frame(Bytes::from(text))
            }
            WireMessage::Binary(bytes) if reader.buffered() == 0 && legacy::is_legacy(&bytes) => {
                legacy_frame(bytes)
            }
            WireMessage::Binary(bytes) => {
                let mut frames = Vec::new();
                let failure = reader.feed(&bytes, |f| frames.push(f)).err();
                (frames, failure)
            }
            raw @ WireMessage::Text(_) => {
                if !shared.callbacks.message(session, &raw) {
                    debug!(len = raw.payload().len(), "text message with no frame, dropped");
                }
                continue;
            }
        };

        for frame in frames {
            if let Some(reason) = handle_frame(shared, session, frame).await {
                return reason;
            }
        }
        if let Some(source) = failure {
            counter!(FRAMING_ERRORS_TOTAL).increment(1);
            warn!(error = %source, "malformed frame, closing connection");
            shared.report(&ServerError::Framing { id, source });
            return CloseReason::Protocol;
        }
    }
}

fn legacy_frame(bytes: Bytes) -> (Vec<Frame>, Option<FrameError>) {
    match legacy::decode(bytes) {
        Ok(frame) => (vec![frame], None),
        Err(e) => (Vec::new(), Some(e)),
    }
}

/// Act on one decoded frame. Returns a close reason when the frame ends the
/// connection.
async fn handle_frame(shared: &Arc<Shared>, session: &Session, frame: Frame) -> Option<CloseReason> {
    let conn = session.connection();
    counter!(FRAMES_RECEIVED_TOTAL, "kind" => kind_label(frame.kind)).increment(1);
    if frame.version != conn.codec().version {
        conn.negotiate(frame.version, frame.format);
    }
    match frame.kind {
        FrameKind::Data => shared.route_frame(session, frame).await,
        FrameKind::Ping => {
            let result = match conn.codec().pong() {
                Ok(pong) => conn.write(pong, shared.registry.write_timeout()).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = result {
                shared.report(&ServerError::Push(e));
            }
        }
        FrameKind::Close => return Some(CloseReason::PeerClosed),
        FrameKind::Pong | FrameKind::Open | FrameKind::Unknown => {}
    }
    None
}

pub(crate) fn kind_label(kind: FrameKind) -> &'static str {
    match kind {
        FrameKind::Data => "data",
        FrameKind::Ping => "ping",
        FrameKind::Pong => "pong",
        FrameKind::Open => "open",
        FrameKind::Close => "close",
        FrameKind::Unknown => "unknown",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use skein_core::transport::memory;
    use skein_core::{FormatType, MessageSink, MessageSource, ProtocolVersion};
    use skein_router::{Handler, HandlerError, Route, from_fn};
    use tokio::sync::mpsc;

    use crate::callbacks::CallbackSlots;

    struct Echo;

    #[async_trait]
    impl Handler<ServerContext> for Echo {
        async fn handle(&self, ctx: &mut ServerContext) -> Result<(), HandlerError> {
            ctx.session.reply(ctx.id, &ctx.event, &ctx.body).await?;
            Ok(())
        }
    }

    struct Harness {
        remote: memory::Endpoint,
        errors: Arc<Mutex<Vec<String>>>,
        closed: mpsc::UnboundedReceiver<(ConnectionId, CloseReason)>,
        messages: Arc<Mutex<Vec<WireMessage>>>,
        shutdown: CancellationToken,
        task: tokio::task::JoinHandle<()>,
    }

    fn router() -> Router<ServerContext> {
        let mut router = Router::new();
        router.route("echo", Echo).unwrap();
        router
            .register(
                "guarded",
                Route::new(Echo).before(from_fn(|_: &mut ServerContext| {
                    Err(HandlerError::rejected("nope"))
                })),
            )
            .unwrap();
        router
    }

    fn start(config: ServerConfig) -> Harness {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let messages = Arc::new(Mutex::new(Vec::new()));
        let (close_tx, closed) = mpsc::unbounded_channel();
        let errs = Arc::clone(&errors);
        let msgs = Arc::clone(&messages);
        let callbacks = CallbackSlots {
            on_open: Some(Arc::new(|_| {})),
            on_close: Some(Arc::new(move |id, reason| {
                let _ = close_tx.send((id, reason));
            })),
            on_error: Some(Arc::new(move |e| errs.lock().push(e.to_string()))),
            on_message: Some(Arc::new(move |_, m| msgs.lock().push(m.clone()))),
        }
        .build()
        .unwrap();
        let shared = Arc::new(Shared {
            registry: Arc::new(ConnectionRegistry::new(config.write_timeout)),
            config,
            router: Arc::new(router()),
            callbacks,
        });
        let (local, remote) = memory::pair(32);
        let (sink, source) = local.boxed();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_session(shared, sink, source, None, shutdown.clone()));
        Harness {
            remote,
            errors,
            closed,
            messages,
            shutdown,
            task,
        }
    }

    fn sequential() -> ServerConfig {
        ServerConfig {
            dispatch: DispatchMode::Sequential,
            ..ServerConfig::default()
        }
    }

    async fn send_frame(h: &mut Harness, frame: &Frame) {
        let bytes = frame.encode().unwrap();
        h.remote.sink.send(WireMessage::Binary(bytes)).await.unwrap();
    }

    async fn recv_frame(h: &mut Harness) -> Frame {
        match h.remote.source.recv().await.unwrap().unwrap() {
            WireMessage::Binary(b) => skein_core::codec::decode(b).unwrap(),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn data_frame_reaches_handler_and_reply_keeps_id() {
        let mut h = start(sequential());
        send_frame(&mut h, &Frame::data(42, "echo", "hi")).await;
        let reply = recv_frame(&mut h).await;
        assert_eq!(reply.id, 42);
        assert_eq!(reply.event(), "echo");
        assert_eq!(&reply.body[..], b"hi");
    }

    #[tokio::test]
    async fn frames_split_across_messages_are_reassembled() {
        let mut h = start(sequential());
        let bytes = Frame::data(1, "echo", "abc").encode().unwrap();
        let (a, b) = bytes.split_at(5);
        h.remote.sink.send(WireMessage::Binary(Bytes::copy_from_slice(a))).await.unwrap();
        h.remote.sink.send(WireMessage::Binary(Bytes::copy_from_slice(b))).await.unwrap();
        assert_eq!(&recv_frame(&mut h).await.body[..], b"abc");
    }

    #[tokio::test]
    async fn unknown_route_is_reported_and_connection_stays() {
        let mut h = start(sequential());
        send_frame(&mut h, &Frame::data(0, "missing", "")).await;
        send_frame(&mut h, &Frame::data(5, "echo", "still here")).await;
        assert_eq!(recv_frame(&mut h).await.id, 5);
        let errors = h.errors.lock().clone();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("missing 404 not found"));
    }

    #[tokio::test]
    async fn rejected_interceptor_is_reported() {
        let mut h = start(sequential());
        send_frame(&mut h, &Frame::data(0, "guarded", "")).await;
        send_frame(&mut h, &Frame::data(6, "echo", "")).await;
        assert_eq!(recv_frame(&mut h).await.id, 6);
        assert!(h.errors.lock()[0].contains("nope"));
    }

    #[tokio::test]
    async fn ping_frame_gets_pong() {
        let mut h = start(sequential());
        send_frame(&mut h, &Frame::control(FrameKind::Ping)).await;
        assert_eq!(recv_frame(&mut h).await.kind, FrameKind::Pong);
    }

    #[tokio::test]
    async fn malformed_header_closes_with_protocol_error() {
        let mut h = start(sequential());
        let mut bad = vec![0xff, 0xff];
        bad.extend_from_slice(&[0; 14]);
        h.remote.sink.send(WireMessage::Binary(Bytes::from(bad))).await.unwrap();
        let (id, reason) = h.closed.recv().await.unwrap();
        assert_eq!(id, 1);
        assert_eq!(reason, CloseReason::Protocol);
        assert!(h.errors.lock()[0].contains("framing error"));
    }

    #[tokio::test]
    async fn close_frame_ends_session() {
        let mut h = start(sequential());
        send_frame(&mut h, &Frame::control(FrameKind::Close)).await;
        assert_matches!(h.closed.recv().await, Some((1, CloseReason::PeerClosed)));
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_peer_is_peer_closed() {
        let mut h = start(sequential());
        h.remote.sink.close().await.unwrap();
        assert_matches!(h.closed.recv().await, Some((_, CloseReason::PeerClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_hits_idle_timeout() {
        let config = ServerConfig {
            heartbeat_interval: Duration::from_secs(1),
            heartbeat_timeout: Duration::from_secs(2),
            ..sequential()
        };
        let mut h = start(config);
        assert_matches!(h.closed.recv().await, Some((_, CloseReason::IdleTimeout)));
    }

    #[tokio::test]
    async fn shutdown_closes_with_server_reason() {
        let mut h = start(sequential());
        h.shutdown.cancel();
        assert_matches!(h.closed.recv().await, Some((_, CloseReason::Server)));
        assert!(h.remote.source.recv().await.is_none());
    }

    #[tokio::test]
    async fn plain_text_goes_to_on_message() {
        let mut h = start(sequential());
        h.remote.sink.send(WireMessage::Text("hello".into())).await.unwrap();
        send_frame(&mut h, &Frame::data(1, "echo", "")).await;
        let _ = recv_frame(&mut h).await;
        assert_eq!(h.messages.lock().as_slice(), &[WireMessage::Text("hello".into())]);
    }

    #[tokio::test]
    async fn legacy_peer_gets_legacy_replies() {
        let mut h = start(sequential());
        let bytes = legacy::encode(b"echo", b"old", FormatType::Json).unwrap();
        h.remote.sink.send(WireMessage::Binary(bytes)).await.unwrap();
        let WireMessage::Binary(reply) = h.remote.source.recv().await.unwrap().unwrap() else {
            panic!("expected binary");
        };
        assert!(legacy::is_legacy(&reply));
        let frame = legacy::decode(reply).unwrap();
        assert_eq!(frame.version, ProtocolVersion::Legacy);
        assert_eq!(frame.event(), "echo");
        assert_eq!(&frame.body[..], b"old");
    }

    #[tokio::test]
    async fn concurrent_dispatch_answers_every_frame() {
        let mut h = start(ServerConfig::default());
        for i in 1..=4 {
            send_frame(&mut h, &Frame::data(i, "echo", "")).await;
        }
        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(recv_frame(&mut h).await.id);
        }
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }
}
