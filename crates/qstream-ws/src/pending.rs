//! Request/ack correlation by request id.
//!
//! Subscribe, unsubscribe and data requests register here before their frame
//! is sent. The dispatcher resolves the entry when the matching response
//! arrives. Callers that drop the returned [`PendingAck`] get the plain
//! fire-and-forget behaviour; the ack is still published as a session event.

use crate::error::{WsError, WsResult};
use crate::message::{Ack, RequestKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

struct Entry {
    kind: RequestKind,
    tx: oneshot::Sender<Ack>,
}

/// In-flight requests keyed by request id.
#[derive(Default)]
pub struct PendingRequests {
    entries: Mutex<HashMap<String, Entry>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request before sending it.
    ///
    /// An id whose previous waiter was dropped may be reused.
    ///
    /// # Errors
    ///
    /// Returns `WsError::DuplicateRequestId` if the id is still awaited.
    pub fn register(&self, request_id: &str, kind: RequestKind) -> WsResult<PendingAck> {
        let mut entries = self.entries.lock();
        if entries.get(request_id).is_some_and(|e| !e.tx.is_closed()) {
            return Err(WsError::DuplicateRequestId(request_id.to_string()));
        }

        let (tx, rx) = oneshot::channel();
        entries.insert(request_id.to_string(), Entry { kind, tx });

        Ok(PendingAck {
            request_id: request_id.to_string(),
            kind,
            rx,
        })
    }

    /// Resolve the request matching `ack`. Returns true if a waiter received it.
    pub fn resolve(&self, ack: &Ack) -> bool {
        let mut entries = self.entries.lock();
        let matches = entries
            .get(&ack.request_id)
            .is_some_and(|e| e.kind == ack.kind);
        if !matches {
            return false;
        }

        entries
            .remove(&ack.request_id)
            .is_some_and(|e| e.tx.send(ack.clone()).is_ok())
    }

    /// Forget a request whose frame could not be sent.
    pub fn cancel(&self, request_id: &str) {
        self.entries.lock().remove(request_id);
    }

    /// Drop every entry; waiters observe `WsError::NotConnected`.
    pub fn fail_all(&self) {
        let dropped = {
            let mut entries = self.entries.lock();
            let n = entries.len();
            entries.clear();
            n
        };
        if dropped > 0 {
            debug!(dropped, "Dropped pending requests on connection loss");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Future acknowledgement of one request.
#[derive(Debug)]
pub struct PendingAck {
    request_id: String,
    kind: RequestKind,
    rx: oneshot::Receiver<Ack>,
}

impl PendingAck {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Wait for the server's acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns `WsError::NotConnected` if the connection was lost first.
    pub async fn wait(self) -> WsResult<Ack> {
        self.rx.await.map_err(|_| WsError::NotConnected)
    }

    /// Wait for the acknowledgement with a time limit.
    ///
    /// # Errors
    ///
    /// Returns `WsError::AckTimeout` on timeout, or `WsError::NotConnected`
    /// if the connection was lost first.
    pub async fn wait_timeout(self, limit: Duration) -> WsResult<Ack> {
        let request_id = self.request_id.clone();
        tokio::time::timeout(limit, self.wait())
            .await
            .map_err(|_| WsError::AckTimeout {
                request_id,
                after: limit,
            })?
    }
}
