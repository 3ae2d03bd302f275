//! Subscription management.
//!
//! The desired-set records what the caller wants to be subscribed to and
//! survives reconnects. It is re-sent in insertion order after every
//! successful (re)authentication.

use crate::error::{WsError, WsResult};
use crate::message::{RequestKind, WsRequest};
use crate::pending::{PendingAck, PendingRequests};
use crate::ws_write_handle::WsWriteHandle;
use parking_lot::RwLock;
use qstream_core::{PairKey, Subscription};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Desired subscriptions keyed by (base, quote), in insertion order.
#[derive(Debug, Default)]
pub struct DesiredSet {
    entries: RwLock<Vec<Subscription>>,
}

impl DesiredSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for the subscription's pair.
    ///
    /// A replaced entry keeps its original position. Returns true if the
    /// pair was not present before.
    pub fn upsert(&self, sub: Subscription) -> bool {
        let key = sub.key();
        let mut entries = self.entries.write();
        match entries.iter_mut().find(|e| e.key() == key) {
            Some(existing) => {
                *existing = sub;
                false
            }
            None => {
                entries.push(sub);
                true
            }
        }
    }

    /// Remove the entry for a pair.
    pub fn remove(&self, key: &PairKey) -> Option<Subscription> {
        let mut entries = self.entries.write();
        let index = entries.iter().position(|e| &e.key() == key)?;
        Some(entries.remove(index))
    }

    pub fn contains(&self, key: &PairKey) -> bool {
        self.entries.read().iter().any(|e| &e.key() == key)
    }

    /// Copy of the current entries in insertion order.
    pub fn snapshot(&self) -> Vec<Subscription> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Subscription manager.
///
/// Subscribes made before the session is authenticated are recorded and
/// sent by the next `resubscribe_all`.
pub struct SubscriptionManager {
    desired: DesiredSet,
    writer: WsWriteHandle,
    pending: Arc<PendingRequests>,
    authenticated: Arc<AtomicBool>,
}

impl SubscriptionManager {
    pub fn new(
        writer: WsWriteHandle,
        pending: Arc<PendingRequests>,
        authenticated: Arc<AtomicBool>,
    ) -> Self {
        Self {
            desired: DesiredSet::new(),
            writer,
            pending,
            authenticated,
        }
    }

    /// Record a subscription and send the subscribe frame.
    ///
    /// The pending ack is registered before the desired-set changes, so a
    /// `DuplicateRequestId` failure leaves the desired-set untouched. Once
    /// recorded, the entry stays even if the send fails; it is re-sent after
    /// the next reconnect.
    ///
    /// # Errors
    ///
    /// - `WsError::DuplicateRequestId`: `request_id` is already awaited
    /// - `WsError::SendFailed` / `WsError::NotConnected`: the frame was not sent
    pub async fn subscribe(
        &self,
        base_token: &str,
        quote_token: &str,
        request_id: &str,
        levels: Vec<f64>,
        quantity_token: &str,
    ) -> WsResult<PendingAck> {
        let sub = Subscription::new(base_token, quote_token, quantity_token, levels, request_id);
        let key = sub.key();
        let request = WsRequest::subscribe(&sub);

        let ack = self.pending.register(request_id, RequestKind::Subscribe)?;
        let added = self.desired.upsert(sub);
        debug!(pair = %key, request_id, added, "Subscription recorded");

        if !self.authenticated.load(Ordering::SeqCst) {
            debug!(pair = %key, "Not authenticated, subscribe deferred until resubscribe");
            return Ok(ack);
        }

        if let Err(e) = self.writer.send(&request).await {
            self.pending.cancel(request_id);
            warn!(pair = %key, error = %e, "Failed to send subscribe");
            return Err(e);
        }
        info!(pair = %key, request_id, "Subscribe sent");
        Ok(ack)
    }

    /// Remove a subscription and send the unsubscribe frame.
    ///
    /// The pending ack is registered before the desired-set changes, so a
    /// `DuplicateRequestId` failure leaves the desired-set untouched. After
    /// that the pair is removed whatever the send outcome. The frame is sent
    /// even for a pair that was never subscribed.
    ///
    /// # Errors
    ///
    /// - `WsError::DuplicateRequestId`: `request_id` is already awaited
    /// - `WsError::SendFailed` / `WsError::NotConnected`: the frame was not sent
    pub async fn unsubscribe(
        &self,
        base_token: &str,
        quote_token: &str,
        request_id: &str,
    ) -> WsResult<PendingAck> {
        let key = PairKey::new(base_token, quote_token);
        let ack = self.pending.register(request_id, RequestKind::Unsubscribe)?;

        let removed = self.desired.remove(&key).is_some();
        debug!(pair = %key, removed, "Subscription removed from desired set");

        let request = WsRequest::unsubscribe(base_token, quote_token, request_id);
        if let Err(e) = self.writer.send(&request).await {
            self.pending.cancel(request_id);
            warn!(pair = %key, error = %e, "Failed to send unsubscribe");
            return Err(e);
        }
        info!(pair = %key, request_id, "Unsubscribe sent");
        Ok(ack)
    }

    /// Issue a metadata request (`max_levels`, `allowed_markets`, ...).
    ///
    /// # Errors
    ///
    /// - `WsError::NotConnected`: the session is not authenticated
    /// - `WsError::DuplicateRequestId` / `WsError::SendFailed`
    pub async fn data_request(&self, request_type: &str, request_id: &str) -> WsResult<PendingAck> {
        if !self.authenticated.load(Ordering::SeqCst) {
            return Err(WsError::NotConnected);
        }

        let ack = self.pending.register(request_id, RequestKind::DataRequest)?;
        let request = WsRequest::data_request(request_type, request_id);
        if let Err(e) = self.writer.send(&request).await {
            self.pending.cancel(request_id);
            return Err(e);
        }
        debug!(request_type, request_id, "Data request sent");
        Ok(ack)
    }

    /// Re-send every desired subscription in insertion order.
    ///
    /// Returns the number of subscribe frames sent.
    ///
    /// # Errors
    ///
    /// Stops at the first failed send; the connection is then assumed lost
    /// and the next reconnect re-sends the whole set.
    pub async fn resubscribe_all(&self) -> WsResult<usize> {
        let subs = self.desired.snapshot();
        for sub in &subs {
            self.writer.send(&WsRequest::subscribe(sub)).await?;
            debug!(pair = %sub.key(), request_id = %sub.request_id, "Resubscribed");
        }

        if !subs.is_empty() {
            info!(count = subs.len(), "Restored subscriptions");
        }
        Ok(subs.len())
    }

    /// Current desired subscriptions in insertion order.
    pub fn desired(&self) -> Vec<Subscription> {
        self.desired.snapshot()
    }

    pub fn is_desired(&self, base_token: &str, quote_token: &str) -> bool {
        self.desired.contains(&PairKey::new(base_token, quote_token))
    }

    pub fn len(&self) -> usize {
        self.desired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.desired.is_empty()
    }
}
