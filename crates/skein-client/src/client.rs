//! Client session state machine.
//!
//! ```text
//! Disconnected ──dial──▶ Connecting ──ok──▶ Open
//!      ▲                     │                │ read error, EOF, idle timeout,
//!      │                     │ dial failed    │ heartbeat failure, close
//!      └─ reconnect_interval ┴────────────────┘
//! ```
//!
//! Every way out of `Open` runs the same teardown: stop the heartbeat,
//! close the transport, mark the client disconnected, call `on_close`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use skein_core::{BoxSink, BoxSource, Codec, Frame, FrameError, FrameKind, FrameReader, WireMessage, legacy};
use skein_router::{Context, DispatchMode, Router};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::connector::{Connector, WsConnector};
use crate::errors::{ClientError, ConfigError, DisconnectReason};
use crate::heartbeat::{Heartbeat, HeartbeatResult, PingHeartbeat, run_heartbeat};
use crate::pending::{PendingKey, PendingReplies};

/// Context handed to client-side handlers.
pub type ClientContext = Context<Client>;

/// Connection state of a client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// No session; pushes fail with [`ClientError::NotConnected`].
    Disconnected,
    /// Dialing.
    Connecting,
    /// Session established.
    Open,
}

/// Called each time a session opens.
pub type OnOpen = Arc<dyn Fn(Client) + Send + Sync>;
/// Called each time a session ends.
pub type OnClose = Arc<dyn Fn(DisconnectReason) + Send + Sync>;
/// Called for failures with no caller to return to.
pub type OnError = Arc<dyn Fn(&ClientError) + Send + Sync>;
/// Called for transport messages that are not frames.
pub type OnMessage = Arc<dyn Fn(&Client, &WireMessage) + Send + Sync>;

struct Callbacks {
    on_open: OnOpen,
    on_close: OnClose,
    on_error: OnError,
    on_success: Option<OnOpen>,
    on_message: Option<OnMessage>,
}

/// Write half of the current session.
struct Link {
    sink: tokio::sync::Mutex<BoxSink>,
    codec: Codec,
    write_timeout: Duration,
}

impl Link {
    async fn write(&self, message: WireMessage) -> Result<(), ClientError> {
        let write = async { self.sink.lock().await.send(message).await };
        match time::timeout(self.write_timeout, write).await {
            Ok(result) => result.map_err(ClientError::Transport),
            Err(_) => Err(ClientError::WriteTimeout(self.write_timeout)),
        }
    }

    async fn close(&self) {
        if let Err(e) = self.sink.lock().await.close().await {
            debug!(error = %e, "closing transport failed");
        }
    }
}

struct Inner {
    config: ClientConfig,
    router: Router<ClientContext>,
    callbacks: Callbacks,
    heartbeat: Arc<dyn Heartbeat>,
    connector: Arc<dyn Connector>,
    status: watch::Sender<Status>,
    link: Mutex<Option<Arc<Link>>>,
    pending: PendingReplies,
    shutdown: CancellationToken,
    running: AtomicBool,
}

impl Inner {
    fn set_status(&self, status: Status) {
        let previous = self.status.send_replace(status);
        if previous != status {
            debug!(?previous, ?status, "client status changed");
        }
    }

    fn report(&self, err: &ClientError) {
        debug!(error = %err, "reporting client error");
        (self.callbacks.on_error)(err);
    }
}

/// A skein client. Cheap to clone; clones drive and observe the same
/// session.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.inner.config.url)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Client`]. `on_open`, `on_close` and `on_error` are required.
pub struct ClientBuilder {
    config: ClientConfig,
    router: Router<ClientContext>,
    on_open: Option<OnOpen>,
    on_close: Option<OnClose>,
    on_error: Option<OnError>,
    on_success: Option<OnOpen>,
    on_message: Option<OnMessage>,
    heartbeat: Option<Arc<dyn Heartbeat>>,
    connector: Option<Arc<dyn Connector>>,
}

impl ClientBuilder {
    /// Replace the configuration.
    #[must_use]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Router for events pushed by the server.
    #[must_use]
    pub fn router(mut self, router: Router<ClientContext>) -> Self {
        self.router = router;
        self
    }

    /// Called each time a session opens.
    #[must_use]
    pub fn on_open(mut self, f: impl Fn(Client) + Send + Sync + 'static) -> Self {
        self.on_open = Some(Arc::new(f));
        self
    }

    /// Called each time a session ends.
    #[must_use]
    pub fn on_close(mut self, f: impl Fn(DisconnectReason) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(f));
        self
    }

    /// Called for failures with no caller to return to.
    #[must_use]
    pub fn on_error(mut self, f: impl Fn(&ClientError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Called once, when the first session opens.
    #[must_use]
    pub fn on_success(mut self, f: impl Fn(Client) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    /// Called for transport messages that are not frames.
    #[must_use]
    pub fn on_message(mut self, f: impl Fn(&Client, &WireMessage) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(f));
        self
    }

    /// Replace the ping heartbeat.
    #[must_use]
    pub fn heartbeat(mut self, heartbeat: impl Heartbeat + 'static) -> Self {
        self.heartbeat = Some(Arc::new(heartbeat));
        self
    }

    /// Replace the WebSocket connector.
    #[must_use]
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Validate and build. The client does not dial until started.
    pub fn build(self) -> Result<Client, ConfigError> {
        self.config.validate()?;
        let callbacks = Callbacks {
            on_open: self.on_open.ok_or(ConfigError::MissingCallback("on_open"))?,
            on_close: self.on_close.ok_or(ConfigError::MissingCallback("on_close"))?,
            on_error: self.on_error.ok_or(ConfigError::MissingCallback("on_error"))?,
            on_success: self.on_success,
            on_message: self.on_message,
        };
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WsConnector::new(self.config.handshake_timeout)));
        let (status, _) = watch::channel(Status::Disconnected);
        Ok(Client {
            inner: Arc::new(Inner {
                config: self.config,
                router: self.router,
                callbacks,
                heartbeat: self.heartbeat.unwrap_or_else(|| Arc::new(PingHeartbeat)),
                connector,
                status,
                link: Mutex::new(None),
                pending: PendingReplies::default(),
                shutdown: CancellationToken::new(),
                running: AtomicBool::new(false),
            }),
        })
    }
}

impl Client {
    /// Start building a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder {
            config: ClientConfig::default(),
            router: Router::new(),
            on_open: None,
            on_close: None,
            on_error: None,
            on_success: None,
            on_message: None,
            heartbeat: None,
            connector: None,
        }
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Current status.
    pub fn status(&self) -> Status {
        *self.inner.status.borrow()
    }

    /// Subscribe to status changes.
    pub fn watch_status(&self) -> watch::Receiver<Status> {
        self.inner.status.subscribe()
    }

    /// Number of `async_emit` calls still waiting for a reply.
    pub fn pending_replies(&self) -> usize {
        self.inner.pending.len()
    }

    /// Spawn [`Client::run`] on the current runtime.
    pub fn start(&self) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move { client.run().await })
    }

    /// Dial, serve the session and reconnect until [`Client::close`] is
    /// called, or until the first session ends when reconnect is off.
    pub async fn run(&self) {
        let inner = &self.inner;
        if inner.running.swap(true, Ordering::AcqRel) {
            warn!("client is already running");
            return;
        }
        let mut connected_once = false;

        loop {
            inner.set_status(Status::Connecting);
            debug!(url = %inner.config.url, "connecting");
            let dialed = tokio::select! {
                result = inner.connector.connect(&inner.config.url) => Some(result),
                () = inner.shutdown.cancelled() => None,
            };
            match dialed {
                None => break,
                Some(Ok((sink, source))) => {
                    let reason = self.session(sink, source, !connected_once).await;
                    connected_once = true;
                    info!(%reason, "session ended");
                }
                Some(Err(e)) => {
                    inner.set_status(Status::Disconnected);
                    warn!(url = %inner.config.url, error = %e, "connect failed");
                    inner.report(&ClientError::Connect(e));
                }
            }
            if !inner.config.reconnect || inner.shutdown.is_cancelled() {
                break;
            }
            tokio::select! {
                () = time::sleep(inner.config.reconnect_interval) => {}
                () = inner.shutdown.cancelled() => break,
            }
        }

        inner.set_status(Status::Disconnected);
        inner.running.store(false, Ordering::Release);
    }

    /// Stop the client: end the current session and do not reconnect.
    /// A closed client cannot be started again.
    pub fn close(&self) {
        self.inner.shutdown.cancel();
    }

    async fn session(&self, sink: BoxSink, mut source: BoxSource, first: bool) -> DisconnectReason {
        let inner = &self.inner;
        let link = Arc::new(Link {
            sink: tokio::sync::Mutex::new(sink),
            codec: inner.config.codec,
            write_timeout: inner.config.heartbeat_timeout,
        });
        *inner.link.lock() = Some(Arc::clone(&link));
        inner.set_status(Status::Open);
        info!(url = %inner.config.url, "session open");
        if first {
            if let Some(on_success) = &inner.callbacks.on_success {
                on_success(self.clone());
            }
        }
        (inner.callbacks.on_open)(self.clone());

        let beat_token = inner.shutdown.child_token();
        let mut heartbeat = tokio::spawn(run_heartbeat(
            self.clone(),
            Arc::clone(&inner.heartbeat),
            inner.config.heartbeat_interval,
            beat_token.clone(),
        ));

        let reason = tokio::select! {
            reason = self.read_loop(&mut source) => reason,
            joined = &mut heartbeat => match joined {
                Ok(HeartbeatResult::Failed(e)) => {
                    warn!(error = %e, "heartbeat failed");
                    inner.report(&ClientError::Heartbeat(Box::new(e)));
                    DisconnectReason::HeartbeatFailed
                }
                Ok(HeartbeatResult::Cancelled) | Err(_) => DisconnectReason::Closed,
            },
            () = inner.shutdown.cancelled() => DisconnectReason::Closed,
        };

        beat_token.cancel();
        let _ = inner.link.lock().take();
        link.close().await;
        inner.set_status(Status::Disconnected);
        inner.pending.clear();
        (inner.callbacks.on_close)(reason);
        reason
    }

    async fn read_loop(&self, source: &mut BoxSource) -> DisconnectReason {
        let inner = &self.inner;
        let mut reader = FrameReader::new(inner.config.max_frame_len);

        loop {
            let Ok(next) = time::timeout(inner.config.heartbeat_timeout, source.recv()).await else {
                debug!("read deadline expired");
                return DisconnectReason::IdleTimeout;
            };
            let message = match next {
                None => return DisconnectReason::PeerClosed,
                Some(Err(e)) => {
                    inner.report(&ClientError::Transport(e));
                    return DisconnectReason::ReadFailure;
                }
                Some(Ok(message)) => message,
            };

            let (frames, failure) = match message {
                WireMessage::Close => return DisconnectReason::PeerClosed,
                WireMessage::Ping(_) | WireMessage::Pong(_) => continue,
                WireMessage::Text(text) if legacy::is_legacy(text.as_bytes()) => {
                    legacy_frame(Bytes::from(text))
                }
                WireMessage::Binary(bytes)
                    if reader.buffered() == 0 && legacy::is_legacy(&bytes) =>
                {
                    legacy_frame(bytes)
                }
                WireMessage::Binary(bytes) => {
                    let mut frames = Vec::new();
                    let failure = reader.feed(&bytes, |f| frames.push(f)).err();
                    (frames, failure)
                }
                raw @ WireMessage::Text(_) => {
                    match &inner.callbacks.on_message {
                        Some(on_message) => on_message(self, &raw),
                        None => debug!(len = raw.payload().len(), "text message with no frame, dropped"),
                    }
                    continue;
                }
            };

            for frame in frames {
                if let Some(reason) = self.handle_frame(frame).await {
                    return reason;
                }
            }
            if let Some(e) = failure {
                warn!(error = %e, "malformed frame from server");
                inner.report(&ClientError::Framing(e));
                return DisconnectReason::Protocol;
            }
        }
    }

    async fn handle_frame(&self, frame: Frame) -> Option<DisconnectReason> {
        match frame.kind {
            FrameKind::Data => {
                if let Err(frame) = self.inner.pending.resolve(frame) {
                    self.route(frame).await;
                }
            }
            FrameKind::Ping => {
                if let Err(e) = self.pong().await {
                    self.inner.report(&e);
                }
            }
            FrameKind::Close => return Some(DisconnectReason::PeerClosed),
            FrameKind::Pong | FrameKind::Open | FrameKind::Unknown => {}
        }
        None
    }

    async fn route(&self, frame: Frame) {
        let client = self.clone();
        let dispatch = async move { client.dispatch(frame).await };
        match self.inner.config.dispatch {
            DispatchMode::Concurrent => {
                let _ = tokio::spawn(dispatch);
            }
            DispatchMode::Sequential => dispatch.await,
        }
    }

    async fn dispatch(&self, frame: Frame) {
        let event = frame.event().into_owned();
        let mut ctx = ClientContext::new(self.clone(), frame.id, event.clone(), frame.body);
        if let Err(e) = self.inner.router.dispatch(&event, &mut ctx).await {
            self.inner.report(&ClientError::Dispatch(e));
        }
    }

    fn link(&self) -> Result<Arc<Link>, ClientError> {
        if self.status() != Status::Open {
            return Err(ClientError::NotConnected);
        }
        self.inner.link.lock().clone().ok_or(ClientError::NotConnected)
    }

    /// Write a raw transport message.
    pub async fn push(&self, message: WireMessage) -> Result<(), ClientError> {
        self.link()?.write(message).await
    }

    /// Send a ping frame.
    pub async fn ping(&self) -> Result<(), ClientError> {
        let link = self.link()?;
        let ping = link.codec.ping()?;
        link.write(ping).await
    }

    async fn pong(&self) -> Result<(), ClientError> {
        let link = self.link()?;
        let pong = link.codec.pong()?;
        link.write(pong).await
    }

    /// Send an event with no correlation id.
    pub async fn emit(&self, event: &str, body: &[u8]) -> Result<(), ClientError> {
        self.reply(0, event, body).await
    }

    /// Send an event under correlation id `id`.
    pub async fn reply(&self, id: i64, event: &str, body: &[u8]) -> Result<(), ClientError> {
        let link = self.link()?;
        let message = link.codec.data(id, event, body)?;
        link.write(message).await
    }

    /// Send `value` serialized as JSON.
    pub async fn json_emit<T: Serialize + ?Sized>(&self, event: &str, value: &T) -> Result<(), ClientError> {
        let body = serde_json::to_vec(value)?;
        self.emit(event, &body).await
    }

    /// Send an event and wait up to `timeout` for the reply.
    ///
    /// The reply is matched by correlation id, or by event name when the
    /// session speaks the legacy protocol. The wait is always removed before
    /// this returns.
    pub async fn async_emit(&self, event: &str, body: &[u8], timeout: Duration) -> Result<Frame, ClientError> {
        let link = self.link()?;
        let (key, id) = if link.codec.is_legacy() {
            (PendingKey::Event(event.to_owned()), 0)
        } else {
            let id = self.inner.pending.next_id();
            (PendingKey::Id(id), id)
        };
        let (_guard, reply) = self.inner.pending.register(key)?;
        link.write(link.codec.data(id, event, body)?).await?;

        match time::timeout(timeout, reply).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(ClientError::Disconnected),
            Err(_) => Err(ClientError::ReplyTimeout {
                event: event.to_owned(),
                after: timeout,
            }),
        }
    }
}

fn legacy_frame(bytes: Bytes) -> (Vec<Frame>, Option<FrameError>) {
    match legacy::decode(bytes) {
        Ok(frame) => (vec![frame], None),
        Err(e) => (Vec::new(), Some(e)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
