//! Authentication handshake.
//!
//! The write path sends a signed auth frame and then waits on a single-slot
//! rendezvous that the dispatcher fills when the `auth_response` arrives.
//! Each attempt arms a fresh slot, so an outcome meant for an abandoned
//! attempt can never reach a later one.

use crate::error::{WsError, WsResult};
use crate::message::{AuthRequest, WsRequest, AUTH_REQUEST_ID};
use crate::ws_write_handle::WsWriteHandle;
use parking_lot::Mutex;
use qstream_core::{sign, unix_timestamp, Credentials};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct Slot {
    attempt: u64,
    tx: oneshot::Sender<bool>,
}

/// Single-slot handoff of the auth outcome from the read path to the
/// waiting authenticator.
#[derive(Default)]
pub struct AuthRendezvous {
    slot: Mutex<Option<Slot>>,
    next_attempt: AtomicU64,
}

impl AuthRendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a fresh slot for one authentication attempt.
    ///
    /// # Errors
    ///
    /// Returns `WsError::AuthInProgress` if another attempt is still waiting.
    pub fn arm(self: &Arc<Self>) -> WsResult<AuthWaiter> {
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|s| !s.tx.is_closed()) {
            return Err(WsError::AuthInProgress);
        }

        let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        *slot = Some(Slot { attempt, tx });

        Ok(AuthWaiter {
            attempt,
            rx,
            rendezvous: Arc::clone(self),
        })
    }

    /// Deliver an outcome to the waiting attempt, if any.
    ///
    /// Returns false when nobody is waiting; late or duplicate responses
    /// are dropped.
    pub fn deliver(&self, outcome: bool) -> bool {
        match self.slot.lock().take() {
            Some(slot) => slot.tx.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Check if an attempt is waiting for its outcome.
    pub fn is_waiting(&self) -> bool {
        self.slot.lock().as_ref().is_some_and(|s| !s.tx.is_closed())
    }

    fn disarm(&self, attempt: u64) {
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|s| s.attempt == attempt) {
            *slot = None;
        }
    }
}

/// Receiving end of one armed attempt. Disarms the slot on drop.
pub struct AuthWaiter {
    attempt: u64,
    rx: oneshot::Receiver<bool>,
    rendezvous: Arc<AuthRendezvous>,
}

impl AuthWaiter {
    async fn wait(&mut self) -> WsResult<bool> {
        (&mut self.rx)
            .await
            .map_err(|_| WsError::AuthFailed("auth slot was discarded".to_string()))
    }
}

impl Drop for AuthWaiter {
    fn drop(&mut self) {
        self.rendezvous.disarm(self.attempt);
    }
}

/// Drives the auth handshake over the current connection.
pub struct Authenticator {
    writer: WsWriteHandle,
    rendezvous: Arc<AuthRendezvous>,
    authenticated: Arc<AtomicBool>,
    timeout: Option<Duration>,
}

impl Authenticator {
    pub fn new(
        writer: WsWriteHandle,
        rendezvous: Arc<AuthRendezvous>,
        authenticated: Arc<AtomicBool>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            writer,
            rendezvous,
            authenticated,
            timeout,
        }
    }

    /// Sign and send the auth frame, then wait for the server's outcome.
    ///
    /// Sets the session's authenticated flag to the outcome and returns it.
    ///
    /// # Errors
    ///
    /// - `WsError::AuthInProgress`: another attempt is outstanding
    /// - `WsError::Config`: the secret is not valid base64
    /// - `WsError::NotConnected` / `WsError::SendFailed`: the frame was not sent
    /// - `WsError::AuthTimeout`: no outcome within the timeout
    /// - `WsError::Shutdown`: `shutdown` was cancelled while waiting
    pub async fn authenticate(
        &self,
        credentials: &Credentials,
        path: &str,
        shutdown: &CancellationToken,
    ) -> WsResult<bool> {
        // Armed before sending so a fast response is never missed
        let mut waiter = self.rendezvous.arm()?;

        let timestamp = unix_timestamp();
        let signature = sign(timestamp, credentials.secret(), path)?;
        let request = WsRequest::Auth(AuthRequest {
            api_key: credentials.api_key().to_string(),
            passphrase: credentials.passphrase().to_string(),
            signature,
            timestamp,
            request_id: AUTH_REQUEST_ID.to_string(),
        });

        self.writer.send(&request).await?;
        debug!(timestamp, "Auth request sent, waiting for response");

        let outcome = tokio::select! {
            result = wait_with_timeout(&mut waiter, self.timeout) => result?,
            () = shutdown.cancelled() => return Err(WsError::Shutdown),
        };

        self.authenticated.store(outcome, Ordering::SeqCst);
        if outcome {
            info!("Authenticated");
        } else {
            warn!("Authentication rejected by server");
        }
        Ok(outcome)
    }
}

async fn wait_with_timeout(waiter: &mut AuthWaiter, timeout: Option<Duration>) -> WsResult<bool> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, waiter.wait())
            .await
            .map_err(|_| WsError::AuthTimeout(limit))?,
        None => waiter.wait().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::test_support::RecordingWriter;
    use qstream_core::SIGN_METHOD;

    const PATH: &str = "/price.tickers";

    fn credentials() -> Credentials {
        Credentials::new("key", "c2VjcmV0", "pass").unwrap()
    }

    struct Fixture {
        recording: RecordingWriter,
        rendezvous: Arc<AuthRendezvous>,
        authenticated: Arc<AtomicBool>,
        authenticator: Authenticator,
    }

    fn fixture(timeout: Option<Duration>) -> Fixture {
        let recording = RecordingWriter::new();
        let writer = WsWriteHandle::new();
        writer.attach(recording.writer.clone());
        let rendezvous = Arc::new(AuthRendezvous::new());
        let authenticated = Arc::new(AtomicBool::new(false));
        let authenticator = Authenticator::new(
            writer,
            rendezvous.clone(),
            authenticated.clone(),
            timeout,
        );
        Fixture {
            recording,
            rendezvous,
            authenticated,
            authenticator,
        }
    }

    /// Deliver `outcome` once the waiter is armed.
    fn respond(rendezvous: Arc<AuthRendezvous>, outcome: bool) {
        tokio::spawn(async move {
            while !rendezvous.is_waiting() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            rendezvous.deliver(outcome);
        });
    }

    #[test]
    fn test_deliver_without_waiter_is_dropped() {
        let rendezvous = AuthRendezvous::new();
        assert!(!rendezvous.deliver(true));
        assert!(!rendezvous.is_waiting());
    }

    #[tokio::test]
    async fn test_second_arm_is_rejected() {
        let rendezvous = Arc::new(AuthRendezvous::new());
        let _first = rendezvous.arm().unwrap();
        assert!(matches!(rendezvous.arm(), Err(WsError::AuthInProgress)));
    }

    #[tokio::test]
    async fn test_stale_outcome_never_reaches_new_attempt() {
        let rendezvous = Arc::new(AuthRendezvous::new());

        let abandoned = rendezvous.arm().unwrap();
        drop(abandoned);
        // Response for the abandoned attempt arrives late
        assert!(!rendezvous.deliver(true));

        let mut fresh = rendezvous.arm().unwrap();
        let pending = tokio::time::timeout(Duration::from_millis(20), fresh.wait()).await;
        assert!(pending.is_err(), "fresh attempt must not see a stale outcome");

        assert!(rendezvous.deliver(false));
        assert!(!fresh.wait().await.unwrap());
    }

    #[tokio::test]
    async fn test_authenticate_success_sends_signed_frame() {
        let f = fixture(Some(Duration::from_secs(1)));
        respond(f.rendezvous.clone(), true);

        let ok = f
            .authenticator
            .authenticate(&credentials(), PATH, &CancellationToken::new())
            .await
            .unwrap();
        assert!(ok);
        assert!(f.authenticated.load(Ordering::SeqCst));

        let frames = f.recording.json_frames();
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(frame["action"], "auth");
        assert_eq!(frame["api_key"], "key");
        assert_eq!(frame["passphrase"], "pass");
        assert_eq!(frame["request_id"], AUTH_REQUEST_ID);
        assert!(frame.get("secret").is_none());

        let timestamp = frame["timestamp"].as_i64().unwrap();
        let expected = sign(timestamp, "c2VjcmV0", PATH).unwrap();
        assert_eq!(frame["signature"], expected.as_str());
        assert_eq!(SIGN_METHOD, "GET");
    }

    #[tokio::test]
    async fn test_authenticate_rejected() {
        let f = fixture(Some(Duration::from_secs(1)));
        f.authenticated.store(true, Ordering::SeqCst);
        respond(f.rendezvous.clone(), false);

        let ok = f
            .authenticator
            .authenticate(&credentials(), PATH, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!ok);
        assert!(!f.authenticated.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_authenticate_timeout_disarms_slot() {
        let f = fixture(Some(Duration::from_millis(30)));

        let result = f
            .authenticator
            .authenticate(&credentials(), PATH, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(WsError::AuthTimeout(_))));
        assert!(!f.rendezvous.is_waiting());
        assert!(!f.rendezvous.deliver(true));
    }

    #[tokio::test]
    async fn test_authenticate_cancelled() {
        let f = fixture(None);
        let shutdown = CancellationToken::new();
        let cancel = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            f.authenticator.authenticate(&credentials(), PATH, &shutdown),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(WsError::Shutdown)));
    }

    #[tokio::test]
    async fn test_authenticate_not_connected() {
        let authenticator = Authenticator::new(
            WsWriteHandle::new(),
            Arc::new(AuthRendezvous::new()),
            Arc::new(AtomicBool::new(false)),
            None,
        );
        let result = authenticator
            .authenticate(&credentials(), PATH, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(WsError::NotConnected)));
    }
}
