//! Inbound frame dispatch.
//!
//! Runs inside the receive loop. Each frame is decoded and routed by event
//! tag: auth outcomes go to the rendezvous, acks resolve pending requests,
//! and everything else is published on the session event channel. A frame
//! that fails to decode is logged and skipped; the next frame is handled
//! normally.

use crate::auth::AuthRendezvous;
use crate::error::WsResult;
use crate::event::SessionEvent;
use crate::message::{decode_frame, Ack, InboundEvent};
use crate::pending::PendingRequests;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Routes decoded frames to their consumers.
pub struct Dispatcher {
    rendezvous: Arc<AuthRendezvous>,
    pending: Arc<PendingRequests>,
    event_tx: mpsc::Sender<SessionEvent>,
    shutdown: CancellationToken,
    log_streams: bool,
}

impl Dispatcher {
    pub fn new(
        rendezvous: Arc<AuthRendezvous>,
        pending: Arc<PendingRequests>,
        event_tx: mpsc::Sender<SessionEvent>,
        shutdown: CancellationToken,
        log_streams: bool,
    ) -> Self {
        Self {
            rendezvous,
            pending,
            event_tx,
            shutdown,
            log_streams,
        }
    }

    /// Handle one raw inbound frame.
    ///
    /// # Errors
    ///
    /// Returns `WsError::Decode` or `WsError::UnknownEvent` for a frame that
    /// was skipped. Both are frame-local; the caller keeps reading.
    pub async fn on_frame(&self, raw: &[u8]) -> WsResult<()> {
        let event = match decode_frame(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, len = raw.len(), "Skipping inbound frame");
                self.emit(SessionEvent::FrameRejected {
                    reason: e.to_string(),
                })
                .await;
                return Err(e);
            }
        };

        self.route(event).await;
        Ok(())
    }

    async fn route(&self, event: InboundEvent) {
        match event {
            InboundEvent::AuthResponse {
                ok,
                request_id,
                error,
            } => {
                debug!(ok, %request_id, ?error, "Auth response received");
                if !self.rendezvous.deliver(ok) {
                    debug!(%request_id, "Ignoring auth response with no pending authentication");
                }
            }
            InboundEvent::SubscribeResponse(ack) => {
                self.log_ack(&ack);
                self.pending.resolve(&ack);
                self.emit(SessionEvent::SubscribeAck(ack)).await;
            }
            InboundEvent::UnsubscribeResponse(ack) => {
                self.log_ack(&ack);
                self.pending.resolve(&ack);
                self.emit(SessionEvent::UnsubscribeAck(ack)).await;
            }
            InboundEvent::DataResponse(ack) => {
                self.log_ack(&ack);
                self.pending.resolve(&ack);
                self.emit(SessionEvent::DataResponse(ack)).await;
            }
            InboundEvent::Stream {
                request_id,
                updates,
            } => {
                if self.log_streams {
                    info!(%request_id, count = updates.len(), ?updates, "Stream update");
                } else {
                    trace!(%request_id, count = updates.len(), "Stream update");
                }
                self.emit(SessionEvent::Stream {
                    request_id,
                    updates,
                })
                .await;
            }
            InboundEvent::ErrorResponse(err) => {
                warn!(
                    event = err.event.as_str(),
                    request_id = %err.request_id,
                    error = ?err.error,
                    "Server reported error"
                );
                self.emit(SessionEvent::ServerError(err)).await;
            }
        }
    }

    fn log_ack(&self, ack: &Ack) {
        if ack.ok {
            info!(kind = %ack.kind, request_id = %ack.request_id, body = ?ack.body, "Request acknowledged");
        } else {
            warn!(kind = %ack.kind, request_id = %ack.request_id, error = ?ack.error, "Request rejected");
        }
    }

    async fn emit(&self, event: SessionEvent) {
        tokio::select! {
            result = self.event_tx.send(event) => {
                if result.is_err() {
                    trace!("Event receiver dropped");
                }
            }
            () = self.shutdown.cancelled() => {}
        }
    }
}
