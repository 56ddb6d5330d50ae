//! axum WebSocket upgrade and the transport adapters around it.

use std::net::SocketAddr;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use skein_core::{MessageSink, MessageSource, TransportError, WireMessage};

use crate::server::Server;
use crate::session::run_session;

/// Write half of an upgraded axum socket.
pub struct AxumSink(SplitSink<WebSocket, Message>);

/// Read half of an upgraded axum socket.
pub struct AxumSource(SplitStream<WebSocket>);

/// Split an upgraded socket into skein transport halves.
pub fn split(socket: WebSocket) -> (AxumSink, AxumSource) {
    let (sink, stream) = socket.split();
    (AxumSink(sink), AxumSource(stream))
}

fn to_axum(message: WireMessage) -> Message {
    match message {
        WireMessage::Text(text) => Message::Text(text.into()),
        WireMessage::Binary(bytes) => Message::Binary(bytes),
        WireMessage::Ping(bytes) => Message::Ping(bytes),
        WireMessage::Pong(bytes) => Message::Pong(bytes),
        WireMessage::Close => Message::Close(None),
    }
}

fn from_axum(message: Message) -> WireMessage {
    match message {
        Message::Text(text) => WireMessage::Text(text.as_str().to_owned()),
        Message::Binary(bytes) => WireMessage::Binary(bytes),
        Message::Ping(bytes) => WireMessage::Ping(bytes),
        Message::Pong(bytes) => WireMessage::Pong(bytes),
        Message::Close(_) => WireMessage::Close,
    }
}

#[async_trait]
impl MessageSink for AxumSink {
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError> {
        self.0
            .send(to_axum(message))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.0
            .close()
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }
}

#[async_trait]
impl MessageSource for AxumSource {
    async fn recv(&mut self) -> Option<Result<WireMessage, TransportError>> {
        self.0.next().await.map(|next| {
            next.map(from_axum)
                .map_err(|e| TransportError::WebSocket(e.to_string()))
        })
    }
}

/// `GET {path}`: upgrade and hand the socket to a session loop.
pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(server): State<Server>,
) -> impl IntoResponse {
    let max = server.config().max_frame_len;
    ws.max_message_size(max)
        .on_upgrade(move |socket| handle_socket(socket, peer, server))
}

async fn handle_socket(socket: WebSocket, peer: SocketAddr, server: Server) {
    let (sink, source) = split(socket);
    let shutdown = server.shutdown_coordinator();
    let session = run_session(
        server.shared(),
        Box::new(sink),
        Box::new(source),
        Some(peer),
        shutdown.token(),
    );
    shutdown.track_session(session).await;
}
