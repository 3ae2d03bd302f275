//! Mock quote feed server for integration tests.
//!
//! Provides a WebSocket server that can:
//! - Answer auth requests (accept, reject, stay silent or drop the socket)
//! - Acknowledge subscribe, unsubscribe and data requests
//! - Record received frames per connection
//! - Push frames, pings and close frames, or drop the connection

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// How the server answers auth requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Accept,
    Reject,
    Silent,
    /// Close the socket after reading the auth frame.
    Drop,
}

enum Command {
    Send(String),
    Ping,
    Close(u16),
    Drop,
}

#[derive(Default)]
struct Shared {
    auth_mode: Option<AuthMode>,
    /// Received text frames, one list per connection.
    frames: Vec<Vec<String>>,
    /// Command channel of each connection.
    commands: Vec<mpsc::UnboundedSender<Command>>,
    pongs: u32,
}

/// A mock WebSocket server for testing.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    shared: Arc<Mutex<Shared>>,
}

impl MockWsServer {
    /// Start a new mock server on an available port.
    pub async fn start(auth_mode: AuthMode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Arc::new(Mutex::new(Shared {
            auth_mode: Some(auth_mode),
            ..Shared::default()
        }));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let shared_clone = shared.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        let (tx, rx) = mpsc::unbounded_channel();
                        let index = {
                            let mut shared = shared_clone.lock().await;
                            shared.frames.push(Vec::new());
                            shared.commands.push(tx);
                            shared.frames.len() - 1
                        };
                        tokio::spawn(handle_connection(stream, index, rx, shared_clone.clone()));
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            shared,
        }
    }

    /// Host and port for `SessionConfig::host`.
    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    pub async fn set_auth_mode(&self, mode: AuthMode) {
        self.shared.lock().await.auth_mode = Some(mode);
    }

    /// Number of connections accepted.
    pub async fn connection_count(&self) -> usize {
        self.shared.lock().await.frames.len()
    }

    /// Frames received on connection `index`, parsed as JSON.
    pub async fn frames(&self, index: usize) -> Vec<Value> {
        self.shared
            .lock()
            .await
            .frames
            .get(index)
            .map(|frames| {
                frames
                    .iter()
                    .map(|f| serde_json::from_str(f).unwrap())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `action` of each frame received on connection `index`.
    pub async fn actions(&self, index: usize) -> Vec<String> {
        self.frames(index)
            .await
            .iter()
            .map(|f| f["action"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    /// Every frame with the given action, across all connections.
    pub async fn frames_with_action(&self, action: &str) -> Vec<Value> {
        let count = self.connection_count().await;
        let mut matching = Vec::new();
        for index in 0..count {
            matching.extend(
                self.frames(index)
                    .await
                    .into_iter()
                    .filter(|f| f["action"] == action),
            );
        }
        matching
    }

    pub async fn pong_count(&self) -> u32 {
        self.shared.lock().await.pongs
    }

    /// Send a text frame on the latest connection.
    pub async fn push(&self, text: impl Into<String>) {
        self.command(Command::Send(text.into())).await;
    }

    pub async fn ping(&self) {
        self.command(Command::Ping).await;
    }

    /// Send a close frame on the latest connection.
    pub async fn close(&self, code: u16) {
        self.command(Command::Close(code)).await;
    }

    /// Drop the latest connection without a close frame.
    pub async fn drop_connection(&self) {
        self.command(Command::Drop).await;
    }

    /// Wait until at least `count` connections were accepted.
    pub async fn wait_for_connections(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.connection_count().await < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for connections");
    }

    /// Wait until connection `index` has received at least `count` frames.
    pub async fn wait_for_frames(&self, index: usize, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.frames(index).await.len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for frames");
    }

    /// Shutdown the listener.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }

    async fn command(&self, command: Command) {
        if let Some(tx) = self.shared.lock().await.commands.last() {
            let _ = tx.send(command);
        }
    }
}

fn response(event: &str, status: &str, request: &Value, body: Value) -> String {
    let mut frame = json!({
        "status": status,
        "event": event,
        "request_id": request["request_id"],
    });
    if status == "ok" {
        frame["body"] = body;
    } else {
        frame["error"] = json!({"code": "REJECTED", "message": "rejected by mock"});
    }
    frame.to_string()
}

async fn reply_for(text: &str, shared: &Arc<Mutex<Shared>>) -> Option<String> {
    let request: Value = serde_json::from_str(text).ok()?;
    match request["action"].as_str()? {
        "auth" => match shared.lock().await.auth_mode? {
            AuthMode::Accept => Some(response(
                "auth_response",
                "ok",
                &request,
                json!("Authentication successful"),
            )),
            AuthMode::Reject => Some(response("auth_response", "error", &request, Value::Null)),
            AuthMode::Silent | AuthMode::Drop => None,
        },
        "subscribe" => Some(response("subscribe_response", "ok", &request, json!({}))),
        "unsubscribe" => Some(response("unsubscribe_response", "ok", &request, json!({}))),
        "data_request" => Some(response(
            "data_response",
            "ok",
            &request,
            json!({"max_levels": 10}),
        )),
        _ => None,
    }
}

async fn drops_on(text: &str, shared: &Arc<Mutex<Shared>>) -> bool {
    let is_auth = serde_json::from_str::<Value>(text)
        .map(|request| request["action"] == "auth")
        .unwrap_or(false);
    is_auth && shared.lock().await.auth_mode == Some(AuthMode::Drop)
}

async fn handle_connection(
    stream: TcpStream,
    index: usize,
    mut commands: mpsc::UnboundedReceiver<Command>,
    shared: Arc<Mutex<Shared>>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    shared.lock().await.frames[index].push(text.clone());
                    if drops_on(&text, &shared).await {
                        break;
                    }
                    if let Some(reply) = reply_for(&text, &shared).await {
                        let _ = write.send(Message::Text(reply)).await;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Pong(_))) => {
                    shared.lock().await.pongs += 1;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            },
            command = commands.recv() => match command {
                Some(Command::Send(text)) => {
                    let _ = write.send(Message::Text(text)).await;
                }
                Some(Command::Ping) => {
                    let _ = write.send(Message::Ping(b"hb".to_vec())).await;
                }
                Some(Command::Close(code)) => {
                    let _ = write
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::from(code),
                            reason: "mock close".into(),
                        })))
                        .await;
                    break;
                }
                Some(Command::Drop) | None => break,
            },
        }
    }
}
