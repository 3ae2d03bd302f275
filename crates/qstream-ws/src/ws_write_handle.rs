//! Write handle for the current connection.
//!
//! The supervisor attaches the writer of each new connection and detaches
//! it when the connection is lost, so holders of a handle never see a
//! stale socket.

use crate::error::{WsError, WsResult};
use crate::message::WsRequest;
use crate::transport::ConnectionWriter;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Reconnect-safe handle for sending request frames.
#[derive(Clone, Default)]
pub struct WsWriteHandle {
    current: Arc<RwLock<Option<ConnectionWriter>>>,
}

impl WsWriteHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route subsequent sends to `writer`.
    pub(crate) fn attach(&self, writer: ConnectionWriter) {
        *self.current.write() = Some(writer);
    }

    /// Stop routing sends; returns the previously attached writer.
    pub(crate) fn detach(&self) -> Option<ConnectionWriter> {
        self.current.write().take()
    }

    /// Close the attached connection without detaching it.
    pub(crate) fn close_current(&self) {
        if let Some(writer) = self.current.read().as_ref() {
            writer.close();
        }
    }

    /// Check if a live connection is attached.
    pub fn is_connected(&self) -> bool {
        self.current
            .read()
            .as_ref()
            .is_some_and(|writer| !writer.is_closed())
    }

    /// Serialize and send one request frame.
    ///
    /// # Errors
    ///
    /// - `WsError::NotConnected`: no live connection
    /// - `WsError::SendFailed`: the write failed
    pub async fn send(&self, request: &WsRequest) -> WsResult<()> {
        let writer = self.current.read().clone().ok_or(WsError::NotConnected)?;
        let text = request.to_json()?;

        writer.send_text(text).await?;
        debug!(
            kind = %request.kind(),
            request_id = %request.request_id(),
            "Sent request"
        );
        Ok(())
    }
}
