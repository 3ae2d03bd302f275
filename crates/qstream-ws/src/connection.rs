//! Session supervisor.
//!
//! Drives the session lifecycle:
//! `Disconnected -> Connecting -> ConnectedUnauthenticated -> Authenticating -> Subscribed`.
//! Connect failures and auth failures are retried per [`RetryPolicy`]; a
//! lost connection re-enters `Connecting` immediately. Exhausted retries end
//! the session in `Failed` and are reported to the caller, never by
//! terminating the process. A connection lost during authentication counts
//! as a failed auth attempt.
//!
//! [`RetryPolicy`]: crate::config::RetryPolicy

use crate::auth::{AuthRendezvous, Authenticator};
use crate::config::{RetryState, SessionConfig};
use crate::dispatcher::Dispatcher;
use crate::error::{WsError, WsResult};
use crate::event::SessionEvent;
use crate::pending::{PendingAck, PendingRequests};
use crate::subscription::SubscriptionManager;
use crate::transport::{self, CloseCause, Connection, ConnectionWriter};
use crate::ws_write_handle::WsWriteHandle;
use parking_lot::RwLock;
use qstream_core::Subscription;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Bound on waiting for a connection's tasks to finish.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    ConnectedUnauthenticated,
    Authenticating,
    Subscribed,
    /// Terminal: retries exhausted.
    Failed,
}

impl SessionState {
    pub const ALL: [SessionState; 6] = [
        Self::Disconnected,
        Self::Connecting,
        Self::ConnectedUnauthenticated,
        Self::Authenticating,
        Self::Subscribed,
        Self::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::ConnectedUnauthenticated => "connected_unauthenticated",
            Self::Authenticating => "authenticating",
            Self::Subscribed => "subscribed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generate a unique request id.
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Tasks and close signal of the live connection.
struct LiveConnection {
    writer: ConnectionWriter,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
    closed_rx: oneshot::Receiver<CloseCause>,
}

impl LiveConnection {
    /// Resolve once the receive loop has reported its close cause.
    ///
    /// Must be awaited to completion at most once.
    async fn wait_closed(&mut self) -> CloseCause {
        (&mut self.closed_rx)
            .await
            .unwrap_or(CloseCause::ReaderGone)
    }
}

enum AuthStep {
    Authenticated,
    Rejected(String),
    Lost(CloseCause),
    Shutdown,
}

/// Session supervisor.
///
/// Owns the connection handle, the authenticated flag and the retry
/// counters. Use [`SessionSupervisor::handle`] to subscribe or stop from
/// other tasks.
pub struct SessionSupervisor {
    config: SessionConfig,
    state: Arc<RwLock<SessionState>>,
    authenticated: Arc<AtomicBool>,
    writer: WsWriteHandle,
    pending: Arc<PendingRequests>,
    subscriptions: Arc<SubscriptionManager>,
    authenticator: Authenticator,
    dispatcher: Arc<Dispatcher>,
    event_tx: mpsc::Sender<SessionEvent>,
    shutdown_token: CancellationToken,
    running: AtomicBool,
}

impl SessionSupervisor {
    /// Create a supervisor publishing events on `event_tx`.
    ///
    /// # Errors
    ///
    /// Returns `WsError::Config` if the configuration is invalid; no
    /// connection is attempted.
    pub fn new(config: SessionConfig, event_tx: mpsc::Sender<SessionEvent>) -> WsResult<Self> {
        config.validate()?;

        let shutdown_token = CancellationToken::new();
        let authenticated = Arc::new(AtomicBool::new(false));
        let writer = WsWriteHandle::new();
        let rendezvous = Arc::new(AuthRendezvous::new());
        let pending = Arc::new(PendingRequests::new());

        let subscriptions = Arc::new(SubscriptionManager::new(
            writer.clone(),
            pending.clone(),
            authenticated.clone(),
        ));
        let authenticator = Authenticator::new(
            writer.clone(),
            rendezvous.clone(),
            authenticated.clone(),
            config.auth_timeout,
        );
        let dispatcher = Arc::new(Dispatcher::new(
            rendezvous,
            pending.clone(),
            event_tx.clone(),
            shutdown_token.clone(),
            config.log_streams,
        ));

        Ok(Self {
            config,
            state: Arc::new(RwLock::new(SessionState::Disconnected)),
            authenticated,
            writer,
            pending,
            subscriptions,
            authenticator,
            dispatcher,
            event_tx,
            shutdown_token,
            running: AtomicBool::new(false),
        })
    }

    /// Create a supervisor together with its event channel.
    pub fn with_channel(
        config: SessionConfig,
    ) -> WsResult<(Self, mpsc::Receiver<SessionEvent>)> {
        let (tx, rx) = mpsc::channel(config.event_buffer.max(1));
        Ok((Self::new(config, tx)?, rx))
    }

    /// Cloneable handle for subscribing and stopping from other tasks.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            subscriptions: self.subscriptions.clone(),
            state: self.state.clone(),
            authenticated: self.authenticated.clone(),
            writer: self.writer.clone(),
            shutdown_token: self.shutdown_token.clone(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    /// Request shutdown. See [`SessionHandle::stop`].
    pub fn stop(&self) {
        self.handle().stop();
    }

    /// Run the session until `stop()` or until retries are exhausted.
    ///
    /// Returns `Ok(())` after a requested stop.
    ///
    /// # Errors
    ///
    /// - `WsError::ConnectExhausted`: connect retries exhausted
    /// - `WsError::AuthExhausted`: auth retries exhausted
    /// - `WsError::Config`: the session is already running
    pub async fn run(&self) -> WsResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(WsError::Config("session is already running".to_string()));
        }

        info!(url = %self.config.url(), "Session starting");
        let result = self.run_loop().await;

        self.authenticated.store(false, Ordering::SeqCst);
        self.writer.detach();
        self.pending.fail_all();

        match &result {
            Ok(()) => {
                self.set_state(SessionState::Disconnected);
                info!("Session stopped");
                let _ = self.event_tx.try_send(SessionEvent::Stopped);
            }
            Err(e) => {
                self.set_state(SessionState::Failed);
                error!(error = %e, "Session failed");
                let _ = self.event_tx.try_send(SessionEvent::Failed {
                    reason: e.to_string(),
                });
            }
        }
        result
    }

    async fn run_loop(&self) -> WsResult<()> {
        let mut connect_retry = RetryState::new(self.config.retry.clone());
        let mut auth_retry = RetryState::new(self.config.retry.clone());

        loop {
            let Some(mut live) = self.connect_with_retry(&mut connect_retry).await? else {
                return Ok(());
            };

            match self.authenticate(&mut live).await {
                AuthStep::Authenticated => auth_retry.reset(),
                AuthStep::Shutdown => {
                    self.teardown(live).await;
                    return Ok(());
                }
                AuthStep::Lost(cause) => {
                    let reason = format!("connection lost during authentication: {cause}");
                    warn!(%reason, "Authentication failed");
                    self.emit(SessionEvent::AuthFailed { reason }).await;
                    self.on_connection_lost(live, cause).await;
                    if !self.auth_backoff(&mut auth_retry).await? {
                        return Ok(());
                    }
                    continue;
                }
                AuthStep::Rejected(reason) => {
                    warn!(%reason, "Authentication failed");
                    self.emit(SessionEvent::AuthFailed { reason }).await;
                    self.teardown(live).await;
                    self.set_state(SessionState::Disconnected);
                    if !self.auth_backoff(&mut auth_retry).await? {
                        return Ok(());
                    }
                    continue;
                }
            }

            let count = match self.subscriptions.resubscribe_all().await {
                Ok(count) => count,
                Err(e) => {
                    warn!(error = %e, "Resubscribe interrupted");
                    0
                }
            };
            connect_retry.reset();
            self.set_state(SessionState::Subscribed);
            self.emit(SessionEvent::Resubscribed { count }).await;

            let lost = tokio::select! {
                cause = live.wait_closed() => Some(cause),
                () = self.shutdown_token.cancelled() => None,
            };
            match lost {
                Some(cause) => self.on_connection_lost(live, cause).await,
                None => {
                    self.teardown(live).await;
                    return Ok(());
                }
            }
        }
    }

    /// Open a connection, retrying per policy. `None` means shutdown.
    ///
    /// A successful open does not reset `retry`; the counter is reset once
    /// the session reaches `Subscribed`.
    async fn connect_with_retry(
        &self,
        retry: &mut RetryState,
    ) -> WsResult<Option<LiveConnection>> {
        let url = self.config.url();

        loop {
            if self.shutdown_token.is_cancelled() {
                info!("Shutdown requested, exiting connect loop");
                return Ok(None);
            }

            self.set_state(SessionState::Connecting);
            let result = tokio::select! {
                result = transport::open(&url) => result,
                () = self.shutdown_token.cancelled() => return Ok(None),
            };

            match result {
                Ok(connection) => {
                    return Ok(Some(self.start_connection(connection, &url).await));
                }
                Err(e) => {
                    warn!(error = %e, attempt = retry.total_attempts(), "Connection attempt failed");
                    let Some(delay) = retry.next_delay() else {
                        error!(
                            attempts = retry.total_attempts(),
                            "Connection retries exhausted"
                        );
                        return Err(WsError::ConnectExhausted {
                            attempts: retry.total_attempts(),
                        });
                    };
                    if !self.backoff(retry.attempts(), delay).await {
                        return Ok(None);
                    }
                }
            }
        }
    }

    async fn start_connection(&self, connection: Connection, url: &str) -> LiveConnection {
        let Connection {
            writer,
            reader,
            writer_task,
        } = connection;

        self.authenticated.store(false, Ordering::SeqCst);
        self.writer.attach(writer.clone());

        let (closed_tx, closed_rx) = oneshot::channel();
        let dispatcher = self.dispatcher.clone();
        let reader_task = tokio::spawn(reader.receive_loop(
            move |raw| {
                let dispatcher = dispatcher.clone();
                async move {
                    // Frame-local errors are logged by the dispatcher
                    let _ = dispatcher.on_frame(&raw).await;
                }
            },
            move |cause| {
                let _ = closed_tx.send(cause);
            },
        ));

        self.set_state(SessionState::ConnectedUnauthenticated);
        self.emit(SessionEvent::Connected {
            url: url.to_string(),
        })
        .await;

        LiveConnection {
            writer,
            reader_task,
            writer_task,
            closed_rx,
        }
    }

    async fn authenticate(&self, live: &mut LiveConnection) -> AuthStep {
        self.set_state(SessionState::Authenticating);

        let result = tokio::select! {
            result = self.authenticator.authenticate(
                &self.config.credentials,
                &self.config.path,
                &self.shutdown_token,
            ) => result,
            cause = live.wait_closed() => return AuthStep::Lost(cause),
        };

        match result {
            Ok(true) => {
                self.emit(SessionEvent::Authenticated).await;
                AuthStep::Authenticated
            }
            Ok(false) => AuthStep::Rejected("rejected by server".to_string()),
            Err(WsError::Shutdown) => AuthStep::Shutdown,
            Err(e) => AuthStep::Rejected(e.to_string()),
        }
    }

    async fn on_connection_lost(&self, live: LiveConnection, cause: CloseCause) {
        self.authenticated.store(false, Ordering::SeqCst);
        self.writer.detach();
        self.pending.fail_all();
        self.set_state(SessionState::Disconnected);

        warn!(cause = %cause, "Connection lost, reconnecting");
        self.emit(SessionEvent::Disconnected { cause }).await;
        self.teardown(live).await;
    }

    /// Close the connection and wait for its receive loop to finish.
    async fn teardown(&self, live: LiveConnection) {
        self.authenticated.store(false, Ordering::SeqCst);
        self.writer.detach();

        let LiveConnection {
            writer,
            mut reader_task,
            writer_task,
            ..
        } = live;
        writer.close();

        if tokio::time::timeout(TEARDOWN_TIMEOUT, &mut reader_task)
            .await
            .is_err()
        {
            warn!("Receive task did not stop in time, aborting");
            reader_task.abort();
            let _ = reader_task.await;
        }
        if tokio::time::timeout(TEARDOWN_TIMEOUT, writer_task)
            .await
            .is_err()
        {
            debug!("Writer task did not stop in time");
        }
    }

    /// Count a failed auth attempt and sleep before the next one.
    ///
    /// Returns `Ok(false)` on shutdown and `AuthExhausted` when no retries
    /// remain.
    async fn auth_backoff(&self, retry: &mut RetryState) -> WsResult<bool> {
        let Some(delay) = retry.next_delay() else {
            error!(
                attempts = retry.total_attempts(),
                "Authentication retries exhausted"
            );
            return Err(WsError::AuthExhausted {
                attempts: retry.total_attempts(),
            });
        };
        Ok(self.backoff(retry.attempts(), delay).await)
    }

    /// Cancellation-aware retry sleep. Returns false on shutdown.
    async fn backoff(&self, attempt: u32, delay: Duration) -> bool {
        warn!(attempt, delay_ms = delay.as_millis() as u64, "Retrying");
        self.emit(SessionEvent::Reconnecting { attempt, delay })
            .await;

        tokio::select! {
            () = tokio::time::sleep(delay) => true,
            () = self.shutdown_token.cancelled() => {
                info!("Shutdown requested during backoff");
                false
            }
        }
    }

    fn set_state(&self, state: SessionState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            debug!(from = %previous, to = %state, "Session state changed");
        }
    }

    async fn emit(&self, event: SessionEvent) {
        tokio::select! {
            result = self.event_tx.send(event) => {
                if result.is_err() {
                    debug!("Event receiver dropped");
                }
            }
            () = self.shutdown_token.cancelled() => {}
        }
    }
}

/// Cloneable handle to a session.
#[derive(Clone)]
pub struct SessionHandle {
    subscriptions: Arc<SubscriptionManager>,
    state: Arc<RwLock<SessionState>>,
    authenticated: Arc<AtomicBool>,
    writer: WsWriteHandle,
    shutdown_token: CancellationToken,
}

impl SessionHandle {
    /// Subscribe to a pair. See [`SubscriptionManager::subscribe`].
    pub async fn subscribe(
        &self,
        base_token: &str,
        quote_token: &str,
        request_id: &str,
        levels: Vec<f64>,
        quantity_token: &str,
    ) -> WsResult<PendingAck> {
        self.subscriptions
            .subscribe(base_token, quote_token, request_id, levels, quantity_token)
            .await
    }

    /// Unsubscribe from a pair. See [`SubscriptionManager::unsubscribe`].
    pub async fn unsubscribe(
        &self,
        base_token: &str,
        quote_token: &str,
        request_id: &str,
    ) -> WsResult<PendingAck> {
        self.subscriptions
            .unsubscribe(base_token, quote_token, request_id)
            .await
    }

    /// Issue a metadata request. See [`SubscriptionManager::data_request`].
    pub async fn data_request(&self, request_type: &str, request_id: &str) -> WsResult<PendingAck> {
        self.subscriptions
            .data_request(request_type, request_id)
            .await
    }

    pub fn desired_subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.desired()
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    /// Stop the session.
    ///
    /// Closes the active connection, aborts a pending retry sleep or auth
    /// wait, and makes `run()` return `Ok(())`.
    pub fn stop(&self) {
        info!("Session stop requested");
        self.shutdown_token.cancel();
        self.writer.close_current();
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }
}
