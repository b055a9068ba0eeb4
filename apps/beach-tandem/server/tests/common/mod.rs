#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use beach_tandem_server::{
    config::ServerConfig, serve, state::AppState, telemetry::detached_metrics_handle,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub fn test_config() -> ServerConfig {
    ServerConfig {
        handshake_timeout: Duration::from_secs(5),
        per_connection_buffer: 16,
        max_frame_bytes: 4_096,
        index_rate_limit: 2,
        index_rate_window: Duration::from_secs(60),
        shutdown_grace: Duration::from_secs(0),
        ..ServerConfig::default()
    }
}

pub async fn start_server(config: ServerConfig) -> (SocketAddr, Arc<AppState>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(AppState::new(config, detached_metrics_handle()));
    let server_state = Arc::clone(&state);
    tokio::spawn(async move {
        serve(listener, server_state, std::future::pending()).await.unwrap();
    });
    (addr, state)
}

/// Polls `check` until it holds or five seconds pass.
pub async fn wait_for(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    pub async fn open(addr: &SocketAddr) -> Self {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();
        Self { ws }
    }

    pub async fn connect(addr: &SocketAddr, public_key: &str) -> Self {
        let mut client = Self::open(addr).await;
        client
            .send_json(json!({ "type": "connect", "public_key": public_key }))
            .await;
        client
    }

    pub async fn send_json(&mut self, value: Value) {
        self.send_text(value.to_string()).await;
    }

    pub async fn send_text(&mut self, text: String) {
        self.ws.send(Message::text(text)).await.unwrap();
    }

    pub async fn chat(&mut self, message: &str) {
        self.send_json(json!({ "type": "chat", "message": message }))
            .await;
    }

    pub async fn recv_json(&mut self) -> Value {
        loop {
            let frame = tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for frame")
                .expect("socket closed")
                .expect("socket error");
            match frame {
                Message::Text(_) => {
                    return serde_json::from_str(frame.to_text().unwrap()).unwrap();
                }
                Message::Ping(_) | Message::Pong(_) => continue,
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    /// True when nothing but control frames arrives within `window`.
    pub async fn is_silent_for(&mut self, window: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            match tokio::time::timeout_at(deadline, self.ws.next()).await {
                Err(_) => return true,
                Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
                Ok(_) => return false,
            }
        }
    }

    /// Waits for the server to end the socket.
    pub async fn expect_closed(&mut self) {
        loop {
            let next = tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .expect("server kept the socket open");
            match next {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(other)) => panic!("unexpected frame before close: {other:?}"),
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
