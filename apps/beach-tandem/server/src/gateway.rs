use std::{sync::Arc, time::Duration};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use beach_tandem_core::{
    ChatPayload, ClientEvent, ConnId, ConnectOutcome, EngineError, ServerEvent, Transport,
    TransportError,
};
use dashmap::DashMap;
use futures_util::{stream::SplitStream, SinkExt, StreamExt};
use metrics::counter;
use thiserror::Error;
use tokio::{sync::mpsc, time::timeout};
use tracing::{debug, info, warn};

use crate::{state::AppState, telemetry};

/// Per-socket outbound channels, keyed by connection id.
#[derive(Debug, Default)]
pub struct SocketTransport {
    sessions: DashMap<ConnId, mpsc::Sender<ServerEvent>>,
}

impl SocketTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, id: ConnId, sender: mpsc::Sender<ServerEvent>) {
        self.sessions.insert(id, sender);
    }

    pub fn detach(&self, id: ConnId) {
        self.sessions.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Transport for SocketTransport {
    fn send(&self, to: ConnId, event: ServerEvent) -> Result<(), TransportError> {
        let Some(sender) = self.sessions.get(&to).map(|entry| entry.value().clone()) else {
            return Err(TransportError::UnknownConnection(to));
        };
        match sender.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                counter!("beach_tandem_flow_control_drops_total", 1);
                Err(TransportError::Full(to))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TransportError::Closed(to)),
        }
    }
}

pub async fn ws_handler(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    let limit = state.config.max_frame_bytes;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

#[derive(Debug, Error)]
enum HandshakeError {
    #[error("handshake timed out")]
    TimedOut,
    #[error("client closed socket before handshake")]
    SocketClosed,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("client sent an invalid frame ({0})")]
    InvalidFrame(&'static str),
    #[error("client sent `{0}` before connecting")]
    UnexpectedEvent(&'static str),
    #[error("connect rejected: {0}")]
    Rejected(EngineError),
}

impl HandshakeError {
    fn metric_label(&self) -> &'static str {
        match self {
            HandshakeError::TimedOut => "timeout",
            HandshakeError::SocketClosed => "socket_closed",
            HandshakeError::Protocol(_) => "protocol_error",
            HandshakeError::InvalidFrame(_) => "invalid_frame",
            HandshakeError::UnexpectedEvent(_) => "unexpected_event",
            HandshakeError::Rejected(_) => "rejected",
        }
    }
}

enum Inbound {
    Event(ClientEvent),
    Close,
    Control,
    Rejected(&'static str),
}

// Size limits are enforced by the websocket reader before a message gets here.
fn decode_frame(message: Message) -> Inbound {
    let bytes = match &message {
        Message::Text(text) => text.as_bytes(),
        Message::Binary(data) => data.as_slice(),
        Message::Close(_) => return Inbound::Close,
        Message::Ping(_) | Message::Pong(_) => return Inbound::Control,
    };
    match serde_json::from_slice::<ClientEvent>(bytes) {
        Ok(event) => Inbound::Event(event),
        Err(err) => {
            debug!(error = %err, "failed to decode client frame");
            Inbound::Rejected("invalid_json")
        }
    }
}

/// Waits for a connect frame carrying a usable public key. Keyless connects do
/// not complete the handshake, so the timeout still applies to them.
async fn perform_handshake(
    state: &AppState,
    conn_id: ConnId,
    ws_rx: &mut SplitStream<WebSocket>,
    handshake_timeout: Duration,
) -> Result<ConnectOutcome, HandshakeError> {
    timeout(handshake_timeout, next_connect(state, conn_id, ws_rx))
        .await
        .map_err(|_| HandshakeError::TimedOut)?
}

async fn next_connect(
    state: &AppState,
    conn_id: ConnId,
    ws_rx: &mut SplitStream<WebSocket>,
) -> Result<ConnectOutcome, HandshakeError> {
    loop {
        let frame = ws_rx
            .next()
            .await
            .ok_or(HandshakeError::SocketClosed)?
            .map_err(|err| HandshakeError::Protocol(err.to_string()))?;
        match decode_frame(frame) {
            Inbound::Event(ClientEvent::Connect(payload)) => {
                match state.engine.on_connect(conn_id, payload) {
                    Ok(outcome) => return Ok(outcome),
                    Err(EngineError::MalformedConnect) => {
                        debug!(conn_id = %conn_id, "connect without public key ignored");
                    }
                    Err(err) => return Err(HandshakeError::Rejected(err)),
                }
            }
            Inbound::Event(ClientEvent::Chat(_)) => {
                return Err(HandshakeError::UnexpectedEvent("chat"))
            }
            Inbound::Close => return Err(HandshakeError::SocketClosed),
            Inbound::Control => continue,
            Inbound::Rejected(reason) => return Err(HandshakeError::InvalidFrame(reason)),
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = ConnId::new();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (tx, mut rx) = mpsc::channel::<ServerEvent>(state.config.per_connection_buffer);
    state.transport().attach(conn_id, tx);
    counter!("beach_tandem_connections_total", 1);

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if ws_tx.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(err) => warn!(conn_id = %conn_id, error = %err, "failed to encode event"),
            }
        }
        debug!(conn_id = %conn_id, "writer task finished");
    });

    match perform_handshake(&state, conn_id, &mut ws_rx, state.config.handshake_timeout).await {
        Ok(outcome) => {
            telemetry::record_connect(&outcome);
            telemetry::record_registry(&state.engine.registry().snapshot());
            info!(conn_id = %conn_id, outcome = ?outcome, "client connected");
            read_events(&state, conn_id, &mut ws_rx).await;
        }
        Err(err) => {
            counter!(
                "beach_tandem_handshakes_failure_total",
                1,
                "reason" => err.metric_label()
            );
            debug!(conn_id = %conn_id, error = %err, "handshake failed");
        }
    }

    let outcome = state.engine.on_disconnect(conn_id);
    telemetry::record_disconnect(&outcome);
    telemetry::record_registry(&state.engine.registry().snapshot());
    state.transport().detach(conn_id);
    writer.abort();

    debug!(conn_id = %conn_id, outcome = ?outcome, "socket closed");
}

fn handle_chat(state: &AppState, conn_id: ConnId, payload: ChatPayload) {
    match state.engine.on_message(conn_id, payload) {
        Ok(outcome) => telemetry::record_message(&outcome),
        Err(EngineError::BadRequest(field)) => {
            telemetry::record_bad_request();
            debug!(conn_id = %conn_id, field, "chat without required field dropped");
        }
        Err(err) => {
            warn!(conn_id = %conn_id, error = %err, "chat dropped");
        }
    }
}

async fn read_events(state: &AppState, conn_id: ConnId, ws_rx: &mut SplitStream<WebSocket>) {
    while let Some(result) = ws_rx.next().await {
        let frame = match result {
            Ok(frame) => frame,
            Err(err) => {
                telemetry::record_rejected_frame("unreadable");
                warn!(conn_id = %conn_id, error = %err, "error receiving frame");
                break;
            }
        };
        match decode_frame(frame) {
            Inbound::Event(ClientEvent::Chat(payload)) => handle_chat(state, conn_id, payload),
            Inbound::Event(ClientEvent::Connect(_)) => {
                debug!(conn_id = %conn_id, "ignoring repeated connect frame");
            }
            Inbound::Close => break,
            Inbound::Control => continue,
            Inbound::Rejected(reason) => {
                telemetry::record_rejected_frame(reason);
                warn!(conn_id = %conn_id, reason, "dropping rejected frame");
            }
        }
    }
}
