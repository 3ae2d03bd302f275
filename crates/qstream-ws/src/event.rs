//! Events published by a running session.

use crate::message::{Ack, ServerError};
use crate::transport::CloseCause;
use qstream_core::PriceUpdate;
use std::time::Duration;

/// Session lifecycle and data events, delivered in order on one channel.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Transport connected (not yet authenticated).
    Connected { url: String },
    /// Auth handshake succeeded.
    Authenticated,
    /// Desired subscriptions re-sent after authentication.
    Resubscribed { count: usize },
    /// Auth handshake failed, timed out or could not be sent.
    AuthFailed { reason: String },
    /// Live connection lost.
    Disconnected { cause: CloseCause },
    /// Next connect or auth attempt scheduled after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// Retries exhausted; the session has stopped.
    Failed { reason: String },
    /// `stop()` completed.
    Stopped,

    /// Price updates in arrival order.
    Stream {
        request_id: String,
        updates: Vec<PriceUpdate>,
    },
    SubscribeAck(Ack),
    UnsubscribeAck(Ack),
    DataResponse(Ack),
    ServerError(ServerError),
    /// Inbound frame skipped (malformed or unknown event).
    FrameRejected { reason: String },
}

impl SessionEvent {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Authenticated => "authenticated",
            Self::Resubscribed { .. } => "resubscribed",
            Self::AuthFailed { .. } => "auth_failed",
            Self::Disconnected { .. } => "disconnected",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Failed { .. } => "failed",
            Self::Stopped => "stopped",
            Self::Stream { .. } => "stream",
            Self::SubscribeAck(_) => "subscribe_response",
            Self::UnsubscribeAck(_) => "unsubscribe_response",
            Self::DataResponse(_) => "data_response",
            Self::ServerError(_) => "error_response",
            Self::FrameRejected { .. } => "frame_rejected",
        }
    }

    /// Check if this event was decoded from an inbound frame.
    pub fn is_data(&self) -> bool {
        matches!(
            self,
            Self::Stream { .. }
                | Self::SubscribeAck(_)
                | Self::UnsubscribeAck(_)
                | Self::DataResponse(_)
                | Self::ServerError(_)
        )
    }
}
