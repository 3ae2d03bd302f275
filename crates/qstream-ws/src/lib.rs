//! WebSocket session client for the qstream quote feed.
//!
//! Provides:
//! - Connection retry and reconnect-on-failure with a fixed-delay retry policy
//! - Signed auth handshake with a single-slot rendezvous per attempt
//! - Desired-set subscription tracking, re-sent after every re-authentication
//! - Typed decode and dispatch of inbound frames onto a session event channel
//! - Optional per-request ack correlation

pub mod auth;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod message;
pub mod pending;
pub mod subscription;
pub mod transport;
pub mod ws_write_handle;

pub use auth::{AuthRendezvous, Authenticator};
pub use config::{RetryPolicy, RetryState, SessionConfig};
pub use connection::{new_request_id, SessionHandle, SessionState, SessionSupervisor};
pub use dispatcher::Dispatcher;
pub use error::{WsError, WsResult};
pub use event::SessionEvent;
pub use message::{
    decode_frame, Ack, AuthRequest, DataRequest, EventKind, InboundEnvelope, InboundEvent,
    RequestKind, ServerError, SubscribeRequest, UnsubscribeRequest, WsRequest, AUTH_REQUEST_ID,
};
pub use pending::{PendingAck, PendingRequests};
pub use subscription::{DesiredSet, SubscriptionManager};
pub use transport::{CloseCause, ConnectionWriter, WsOutbound};
pub use ws_write_handle::WsWriteHandle;
