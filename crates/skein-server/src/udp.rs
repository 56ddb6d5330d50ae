//! Datagram variant of the server.
//!
//! Every datagram carries exactly one current-version frame. A peer joins by
//! sending `Open` (answered with `Open`), leaves with `Close`, and is swept
//! once it has been silent for the heartbeat timeout. Peers share the
//! WebSocket connections' registry, router and callbacks.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use metrics::{counter, gauge};
use skein_core::{Codec, Frame, FrameKind, MessageSink, TransportError, WireMessage};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{CloseReason, ServerError};
use crate::metrics::{
    FRAMES_RECEIVED_TOTAL, FRAMING_ERRORS_TOTAL, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use crate::session::{Session, Shared, kind_label};

/// Largest datagram read.
const MAX_DATAGRAM: usize = 65_507;

fn control(kind: FrameKind) -> Result<Bytes, TransportError> {
    Frame::control(kind)
        .encode()
        .map_err(|e| TransportError::Io(std::io::Error::other(e)))
}

/// Write half for one datagram peer.
pub struct UdpSink {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    closed: bool,
}

impl UdpSink {
    /// Sink sending to `peer` through the shared socket.
    pub fn new(socket: Arc<UdpSocket>, peer: SocketAddr) -> Self {
        Self {
            socket,
            peer,
            closed: false,
        }
    }

    async fn send_bytes(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let _ = self.socket.send_to(bytes, self.peer).await?;
        Ok(())
    }
}

#[async_trait]
impl MessageSink for UdpSink {
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let bytes = match message {
            WireMessage::Binary(bytes) => bytes,
            WireMessage::Text(text) => Bytes::from(text),
            WireMessage::Ping(_) => control(FrameKind::Ping)?,
            WireMessage::Pong(_) => control(FrameKind::Pong)?,
            WireMessage::Close => control(FrameKind::Close)?,
        };
        self.send_bytes(&bytes).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.send_bytes(&control(FrameKind::Close)?).await
    }
}

/// Receive loop for the datagram listener. Runs until `shutdown` fires.
pub(crate) async fn run_udp(shared: Arc<Shared>, socket: Arc<UdpSocket>, shutdown: CancellationToken) {
    let mut peers: HashMap<SocketAddr, Session> = HashMap::new();
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut sweep = tokio::time::interval(shared.config.heartbeat_interval);
    info!(addr = ?socket.local_addr().ok(), "datagram listener running");

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = sweep.tick() => sweep_idle(&shared, &mut peers).await,
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, peer)) => {
                    let bytes = Bytes::copy_from_slice(&buf[..len]);
                    on_datagram(&shared, &socket, &mut peers, peer, bytes).await;
                }
                Err(e) => warn!(error = %e, "datagram receive failed"),
            },
        }
    }

    for (_, session) in peers.drain() {
        teardown(&shared, &session, CloseReason::Server).await;
    }
    debug!("datagram listener stopped");
}

async fn on_datagram(
    shared: &Arc<Shared>,
    socket: &Arc<UdpSocket>,
    peers: &mut HashMap<SocketAddr, Session>,
    peer: SocketAddr,
    bytes: Bytes,
) {
    let frame = match Frame::decode(bytes) {
        Ok(frame) => frame,
        Err(source) => {
            counter!(FRAMING_ERRORS_TOTAL).increment(1);
            match peers.remove(&peer) {
                Some(session) => {
                    shared.report(&ServerError::Framing {
                        id: session.id(),
                        source,
                    });
                    teardown(shared, &session, CloseReason::Protocol).await;
                }
                None => shared.report(&ServerError::Datagram { peer, source }),
            }
            return;
        }
    };
    counter!(FRAMES_RECEIVED_TOTAL, "kind" => kind_label(frame.kind)).increment(1);

    let Some(session) = peers.get(&peer).cloned() else {
        if frame.kind == FrameKind::Open {
            register(shared, socket, peers, peer).await;
        } else {
            debug!(%peer, kind = kind_label(frame.kind), "datagram from unregistered peer dropped");
        }
        return;
    };
    let conn = session.connection();
    conn.touch();

    match frame.kind {
        FrameKind::Data => shared.route_frame(&session, frame).await,
        FrameKind::Open => ack(shared, &session, FrameKind::Open).await,
        FrameKind::Ping => ack(shared, &session, FrameKind::Pong).await,
        FrameKind::Close => {
            let _ = peers.remove(&peer);
            teardown(shared, &session, CloseReason::PeerClosed).await;
        }
        FrameKind::Pong | FrameKind::Unknown => {}
    }
}

async fn register(
    shared: &Arc<Shared>,
    socket: &Arc<UdpSocket>,
    peers: &mut HashMap<SocketAddr, Session>,
    peer: SocketAddr,
) {
    let sink = Box::new(UdpSink::new(Arc::clone(socket), peer));
    let conn = match shared.registry.open(sink, Some(peer), Codec::current()) {
        Ok(conn) => conn,
        Err(e) => {
            shared.report(&ServerError::Registry(e));
            return;
        }
    };
    counter!(WS_CONNECTIONS_TOTAL, "transport" => "udp").increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    info!(conn_id = conn.id(), %peer, "datagram peer opened");

    let session = Session::new(conn, Arc::clone(&shared.registry));
    let _ = peers.insert(peer, session.clone());
    ack(shared, &session, FrameKind::Open).await;
    shared.callbacks.open(session);
}

async fn ack(shared: &Shared, session: &Session, kind: FrameKind) {
    let result = match Frame::control(kind).encode() {
        Ok(bytes) => {
            session
                .connection()
                .write(WireMessage::Binary(bytes), shared.registry.write_timeout())
                .await
        }
        Err(e) => Err(e.into()),
    };
    if let Err(e) = result {
        shared.report(&ServerError::Push(e));
    }
}

async fn sweep_idle(shared: &Arc<Shared>, peers: &mut HashMap<SocketAddr, Session>) {
    let timeout = shared.config.heartbeat_timeout;
    let expired: Vec<(SocketAddr, CloseReason)> = peers
        .iter()
        .filter_map(|(addr, session)| {
            let conn = session.connection();
            if conn.is_closing() {
                Some((*addr, CloseReason::Server))
            } else if conn.idle() >= timeout {
                Some((*addr, CloseReason::IdleTimeout))
            } else {
                None
            }
        })
        .collect();
    for (addr, reason) in expired {
        if let Some(session) = peers.remove(&addr) {
            teardown(shared, &session, reason).await;
        }
    }
}

async fn teardown(shared: &Shared, session: &Session, reason: CloseReason) {
    let id = session.id();
    let _ = shared.registry.close(id);
    if reason != CloseReason::PeerClosed {
        session.connection().close().await;
    }
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason.label()).increment(1);
    info!(conn_id = id, %reason, "datagram peer closed");
    shared.callbacks.close(id, reason);
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
