//! Transport session: one WebSocket connection.
//!
//! `open` splits the socket into a writer task fed by a channel and a
//! reader half. Every outbound frame is written whole by the writer task,
//! so concurrent senders never interleave partial frames. The reader runs
//! `receive_loop` until the peer closes, a read fails or the connection is
//! closed locally, then reports the cause exactly once.

use crate::error::{WsError, WsResult};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Future, SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Outbound queue depth per connection.
const OUTBOUND_BUFFER: usize = 256;

/// Upper bound on the close handshake when tearing a connection down.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Outbound item consumed by the writer task.
#[derive(Debug)]
pub enum WsOutbound {
    /// Text frame; the write result is reported on `done`.
    Text {
        text: String,
        done: oneshot::Sender<Result<(), String>>,
    },
    /// Reply to a server ping.
    Pong(Vec<u8>),
}

/// Why a receive loop terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseCause {
    /// Closed locally (`close()` or shutdown).
    Local,
    /// Peer sent a close frame.
    ClosedByPeer { code: u16, reason: String },
    /// Stream ended without a close frame.
    StreamEnded,
    /// Read error on the socket.
    ReadError(String),
    /// Receive task went away without reporting.
    ReaderGone,
}

impl CloseCause {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::ClosedByPeer { .. } => "closed_by_peer",
            Self::StreamEnded => "stream_ended",
            Self::ReadError(_) => "read_error",
            Self::ReaderGone => "reader_gone",
        }
    }
}

impl std::fmt::Display for CloseCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "closed locally"),
            Self::ClosedByPeer { code, reason } => {
                write!(f, "closed by peer: code={code}, reason={reason}")
            }
            Self::StreamEnded => write!(f, "stream ended"),
            Self::ReadError(e) => write!(f, "read error: {e}"),
            Self::ReaderGone => write!(f, "receive task ended unexpectedly"),
        }
    }
}

/// Write half of a connection. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionWriter {
    tx: mpsc::Sender<WsOutbound>,
    closed: CancellationToken,
}

impl ConnectionWriter {
    /// Create a writer over an outbound queue.
    ///
    /// `closed` is shared with the reader and the writer task of the same
    /// connection.
    pub fn new(tx: mpsc::Sender<WsOutbound>, closed: CancellationToken) -> Self {
        Self { tx, closed }
    }

    /// Write one text frame and wait for the write result.
    ///
    /// # Errors
    ///
    /// - `WsError::NotConnected`: connection already closed
    /// - `WsError::SendFailed`: the socket write failed or the writer stopped
    pub async fn send_text(&self, text: String) -> WsResult<()> {
        if self.is_closed() {
            return Err(WsError::NotConnected);
        }

        let (done, result) = oneshot::channel();
        self.tx
            .send(WsOutbound::Text { text, done })
            .await
            .map_err(|_| WsError::NotConnected)?;

        match result.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(WsError::SendFailed(e)),
            Err(_) => Err(WsError::SendFailed("writer stopped".to_string())),
        }
    }

    fn send_pong(&self, data: Vec<u8>) {
        if self.tx.try_send(WsOutbound::Pong(data)).is_err() {
            debug!("Dropping pong, outbound queue unavailable");
        }
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }
}

/// Read half of a connection.
pub struct ConnectionReader {
    stream: WsSource,
    writer: ConnectionWriter,
    closed: CancellationToken,
}

impl ConnectionReader {
    /// Run until the connection closes.
    ///
    /// `on_frame` is awaited for each text or binary frame in arrival order.
    /// `on_closed` is invoked exactly once with the termination cause, after
    /// which the function returns. No frame is handed to `on_frame` once the
    /// connection has been closed locally.
    pub async fn receive_loop<F, Fut, C>(mut self, mut on_frame: F, on_closed: C)
    where
        F: FnMut(Vec<u8>) -> Fut,
        Fut: Future<Output = ()>,
        C: FnOnce(CloseCause),
    {
        let cause = loop {
            tokio::select! {
                biased;

                () = self.closed.cancelled() => break CloseCause::Local,

                msg = self.stream.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => on_frame(text.into_bytes()).await,
                        Some(Ok(Message::Binary(data))) => on_frame(data).await,
                        Some(Ok(Message::Ping(data))) => {
                            debug!("Received ping, sending pong");
                            self.writer.send_pong(data);
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            warn!(code, %reason, "WebSocket closed by server");
                            break CloseCause::ClosedByPeer { code, reason };
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket read error");
                            break CloseCause::ReadError(e.to_string());
                        }
                        None => {
                            warn!("WebSocket stream ended");
                            break CloseCause::StreamEnded;
                        }
                    }
                }
            }
        };

        // Stops the writer task as well.
        self.closed.cancel();
        on_closed(cause);
    }
}

/// An open connection: writer, reader and the spawned writer task.
pub struct Connection {
    pub writer: ConnectionWriter,
    pub reader: ConnectionReader,
    pub writer_task: JoinHandle<()>,
}

/// Open a WebSocket connection.
///
/// # Errors
///
/// Returns `WsError::ConnectFailed` if the TCP/TLS/WebSocket handshake fails.
pub async fn open(url: &str) -> WsResult<Connection> {
    info!(%url, "Connecting to WebSocket");

    // TCP_NODELAY for lower latency
    let (ws_stream, _response) = connect_async_tls_with_config(url, None, true, None)
        .await
        .map_err(|e| WsError::ConnectFailed(e.to_string()))?;
    let (sink, stream) = ws_stream.split();

    let closed = CancellationToken::new();
    let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
    let writer = ConnectionWriter::new(tx, closed.clone());
    let writer_task = tokio::spawn(write_loop(sink, rx, closed.clone()));

    info!("WebSocket connected");

    Ok(Connection {
        writer: writer.clone(),
        reader: ConnectionReader {
            stream,
            writer,
            closed,
        },
        writer_task,
    })
}

async fn write_loop(
    mut sink: WsSink,
    mut rx: mpsc::Receiver<WsOutbound>,
    closed: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            () = closed.cancelled() => break,

            outbound = rx.recv() => {
                match outbound {
                    Some(WsOutbound::Text { text, done }) => {
                        let result = sink.send(Message::Text(text)).await.map_err(|e| e.to_string());
                        if let Err(e) = &result {
                            warn!(error = %e, "WebSocket write failed");
                        }
                        let _ = done.send(result);
                    }
                    Some(WsOutbound::Pong(data)) => {
                        if let Err(e) = sink.send(Message::Pong(data)).await {
                            debug!(error = %e, "Failed to send pong");
                        }
                    }
                    None => break,
                }
            }
        }
    }

    // Queued frames are dropped; their senders observe `SendFailed`.
    rx.close();

    let close = async {
        if let Err(e) = sink.send(Message::Close(None)).await {
            debug!(error = %e, "Failed to send Close frame");
        }
        let _ = sink.close().await;
    };
    if tokio::time::timeout(CLOSE_TIMEOUT, close).await.is_err() {
        debug!("Close handshake timed out");
    }
}
