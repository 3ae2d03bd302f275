//! WebSocket message types.
//!
//! One JSON object per text frame. Outbound requests carry an `action` tag;
//! inbound frames share a common envelope whose `body` is decoded according
//! to the `event` tag.

use crate::error::{WsError, WsResult};
use qstream_core::{PriceUpdate, QuantityLevels, Subscription};
use serde::{Deserialize, Serialize};

/// Request id used for every auth frame.
///
/// A fixed id is only sound because at most one authentication is in
/// flight per session (see `AuthRendezvous`).
pub const AUTH_REQUEST_ID: &str = "qstream_auth";

// ============================================================================
// Outgoing requests
// ============================================================================

/// Kind of a client request, used for ack correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Auth,
    Subscribe,
    Unsubscribe,
    DataRequest,
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auth => write!(f, "auth"),
            Self::Subscribe => write!(f, "subscribe"),
            Self::Unsubscribe => write!(f, "unsubscribe"),
            Self::DataRequest => write!(f, "data_request"),
        }
    }
}

/// Outgoing request frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WsRequest {
    Auth(AuthRequest),
    Subscribe(SubscribeRequest),
    Unsubscribe(UnsubscribeRequest),
    DataRequest(DataRequest),
}

impl WsRequest {
    /// Request id carried by this frame.
    pub fn request_id(&self) -> &str {
        match self {
            Self::Auth(r) => &r.request_id,
            Self::Subscribe(r) => &r.request_id,
            Self::Unsubscribe(r) => &r.request_id,
            Self::DataRequest(r) => &r.request_id,
        }
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Auth(_) => RequestKind::Auth,
            Self::Subscribe(_) => RequestKind::Subscribe,
            Self::Unsubscribe(_) => RequestKind::Unsubscribe,
            Self::DataRequest(_) => RequestKind::DataRequest,
        }
    }

    /// Build a subscribe frame for a desired subscription.
    pub fn subscribe(sub: &Subscription) -> Self {
        Self::Subscribe(SubscribeRequest {
            request_id: sub.request_id.clone(),
            base_token: sub.base_token.clone(),
            quote_token: sub.quote_token.clone(),
            quantity: sub.quantity.clone(),
        })
    }

    pub fn unsubscribe(
        base_token: impl Into<String>,
        quote_token: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Self::Unsubscribe(UnsubscribeRequest {
            request_id: request_id.into(),
            base_token: base_token.into(),
            quote_token: quote_token.into(),
        })
    }

    pub fn data_request(request_type: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self::DataRequest(DataRequest {
            request_id: request_id.into(),
            request_type: request_type.into(),
        })
    }

    /// Serialize to the wire encoding.
    pub fn to_json(&self) -> WsResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Signed auth frame. The raw secret is never sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthRequest {
    pub api_key: String,
    pub passphrase: String,
    pub signature: String,
    /// Unix seconds used in the signature prehash.
    pub timestamp: i64,
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub request_id: String,
    pub base_token: String,
    pub quote_token: String,
    pub quantity: QuantityLevels,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsubscribeRequest {
    pub request_id: String,
    pub base_token: String,
    pub quote_token: String,
}

/// Metadata request (e.g. `max_levels`, `allowed_markets`, `max_connections`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRequest {
    pub request_id: String,
    pub request_type: String,
}

// ============================================================================
// Incoming envelope
// ============================================================================

/// Event tag of an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    AuthResponse,
    SubscribeResponse,
    UnsubscribeResponse,
    DataResponse,
    Stream,
    ErrorResponse,
}

impl EventKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "auth_response" => Some(Self::AuthResponse),
            "subscribe_response" => Some(Self::SubscribeResponse),
            "unsubscribe_response" => Some(Self::UnsubscribeResponse),
            "data_response" => Some(Self::DataResponse),
            "stream" => Some(Self::Stream),
            "error_response" => Some(Self::ErrorResponse),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthResponse => "auth_response",
            Self::SubscribeResponse => "subscribe_response",
            Self::UnsubscribeResponse => "unsubscribe_response",
            Self::DataResponse => "data_response",
            Self::Stream => "stream",
            Self::ErrorResponse => "error_response",
        }
    }
}

/// Common fields of every inbound frame.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEnvelope {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
    pub event: String,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

impl InboundEnvelope {
    /// Decode the common envelope from raw frame bytes.
    pub fn decode(raw: &[u8]) -> WsResult<Self> {
        serde_json::from_slice(raw).map_err(|e| WsError::Decode(e.to_string()))
    }

    /// Whether the server reported success (`"ok"`, or `"success"` from older servers).
    pub fn is_ok(&self) -> bool {
        self.status.eq_ignore_ascii_case("ok") || self.status.eq_ignore_ascii_case("success")
    }

    fn request_id_or_empty(&self) -> String {
        self.request_id.clone().unwrap_or_default()
    }

    fn ack(self, kind: RequestKind) -> Ack {
        Ack {
            kind,
            request_id: self.request_id_or_empty(),
            ok: self.is_ok(),
            body: self.body,
            error: self.error,
        }
    }

    /// Decode `body` according to the event tag.
    pub fn into_event(self) -> WsResult<InboundEvent> {
        let Some(kind) = EventKind::from_tag(&self.event) else {
            return Err(WsError::UnknownEvent(self.event));
        };

        let event = match kind {
            EventKind::AuthResponse => InboundEvent::AuthResponse {
                ok: self.is_ok(),
                request_id: self.request_id_or_empty(),
                error: self.error,
            },
            EventKind::SubscribeResponse => {
                InboundEvent::SubscribeResponse(self.ack(RequestKind::Subscribe))
            }
            EventKind::UnsubscribeResponse => {
                InboundEvent::UnsubscribeResponse(self.ack(RequestKind::Unsubscribe))
            }
            EventKind::DataResponse => {
                InboundEvent::DataResponse(self.ack(RequestKind::DataRequest))
            }
            EventKind::Stream if self.is_ok() => {
                let request_id = self.request_id_or_empty();
                let updates = match self.body {
                    Some(body) => serde_json::from_value::<Vec<PriceUpdate>>(body)
                        .map_err(|e| WsError::Decode(format!("stream body: {e}")))?,
                    None => Vec::new(),
                };
                InboundEvent::Stream {
                    request_id,
                    updates,
                }
            }
            EventKind::Stream | EventKind::ErrorResponse => {
                InboundEvent::ErrorResponse(ServerError {
                    event: kind,
                    request_id: self.request_id_or_empty(),
                    error: self.error,
                    body: self.body,
                })
            }
        };

        Ok(event)
    }
}

/// Acknowledgement of a subscribe, unsubscribe or data request.
#[derive(Debug, Clone, PartialEq)]
pub struct Ack {
    pub kind: RequestKind,
    pub request_id: String,
    pub ok: bool,
    pub body: Option<serde_json::Value>,
    pub error: Option<serde_json::Value>,
}

/// Error reported by the server (`error_response`, or a failed `stream`).
#[derive(Debug, Clone, PartialEq)]
pub struct ServerError {
    pub event: EventKind,
    pub request_id: String,
    pub error: Option<serde_json::Value>,
    pub body: Option<serde_json::Value>,
}

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    AuthResponse {
        ok: bool,
        request_id: String,
        error: Option<serde_json::Value>,
    },
    SubscribeResponse(Ack),
    UnsubscribeResponse(Ack),
    DataResponse(Ack),
    Stream {
        request_id: String,
        updates: Vec<PriceUpdate>,
    },
    ErrorResponse(ServerError),
}

/// Decode a raw frame into a typed event.
pub fn decode_frame(raw: &[u8]) -> WsResult<InboundEvent> {
    InboundEnvelope::decode(raw)?.into_event()
}
