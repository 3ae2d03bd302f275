//! Main application: drives the session and consumes its events.

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use qstream_core::PriceUpdate;
use qstream_telemetry::Metrics;
use qstream_ws::{new_request_id, SessionEvent, SessionHandle, SessionSupervisor};
use std::collections::HashMap;
use std::future::Future;
use tracing::{debug, error, info, warn};

/// Counters kept for the shutdown summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub connections: u64,
    pub authentications: u64,
    pub auth_failures: u64,
    pub disconnects: u64,
    pub stream_batches: u64,
    pub price_updates: u64,
    pub acks: u64,
    pub server_errors: u64,
    pub rejected_frames: u64,
}

impl RunStats {
    /// Update counters and metrics for one event.
    ///
    /// `now_ms` is the arrival time used for the update-age histogram.
    pub fn observe(&mut self, event: &SessionEvent, now_ms: i64) {
        if event.is_data() {
            Metrics::frame_dispatched(event.label());
        }

        match event {
            SessionEvent::Connected { .. } => {
                self.connections += 1;
                Metrics::ws_connected();
            }
            SessionEvent::Authenticated => {
                self.authentications += 1;
                Metrics::auth_outcome(true);
            }
            SessionEvent::AuthFailed { .. } => {
                self.auth_failures += 1;
                Metrics::auth_outcome(false);
            }
            SessionEvent::Disconnected { cause } => {
                self.disconnects += 1;
                Metrics::ws_disconnected();
                Metrics::ws_reconnect(cause.label());
            }
            SessionEvent::Stream { updates, .. } => {
                self.stream_batches += 1;
                self.price_updates += updates.len() as u64;
                record_updates(updates, now_ms);
            }
            SessionEvent::SubscribeAck(ack)
            | SessionEvent::UnsubscribeAck(ack)
            | SessionEvent::DataResponse(ack) => {
                self.acks += 1;
                Metrics::ack(&ack.kind.to_string(), ack.ok);
            }
            SessionEvent::ServerError(_) => {
                self.server_errors += 1;
                Metrics::server_error();
            }
            SessionEvent::FrameRejected { .. } => {
                self.rejected_frames += 1;
                Metrics::frame_rejected();
            }
            SessionEvent::Resubscribed { .. }
            | SessionEvent::Reconnecting { .. }
            | SessionEvent::Failed { .. }
            | SessionEvent::Stopped => {}
        }
    }
}

fn record_updates(updates: &[PriceUpdate], now_ms: i64) {
    let mut per_pair: HashMap<String, usize> = HashMap::new();
    for update in updates {
        let pair = update.pair().to_string();
        Metrics::update_age(&pair, (now_ms - update.t_create) as f64);
        *per_pair.entry(pair).or_default() += 1;
    }
    for (pair, count) in per_pair {
        Metrics::price_updates(&pair, count);
    }
}

/// Main application state.
pub struct Application {
    config: AppConfig,
    stats: RunStats,
    data_requests_sent: bool,
}

impl Application {
    /// Create a new application. Fails early on an unusable configuration.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;
        config.session_config()?;
        Ok(Self {
            config,
            stats: RunStats::default(),
            data_requests_sent: false,
        })
    }

    /// Run until Ctrl-C or until the session fails.
    pub async fn run(self) -> AppResult<RunStats> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(?e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run until `shutdown` resolves or the session fails.
    pub async fn run_until<S>(mut self, shutdown: S) -> AppResult<RunStats>
    where
        S: Future<Output = ()>,
    {
        let session_config = self.config.session_config()?;
        info!(url = %session_config.url(), "Starting session");

        let (supervisor, mut events) = SessionSupervisor::with_channel(session_config)?;
        let handle = supervisor.handle();

        // Recorded now, sent after the first authentication
        for sub in &self.config.subscriptions {
            let request_id = sub.request_id.clone().unwrap_or_else(new_request_id);
            handle
                .subscribe(
                    &sub.base_token,
                    &sub.quote_token,
                    &request_id,
                    sub.levels.clone(),
                    sub.quantity_token(),
                )
                .await?;
        }
        Metrics::desired_subscriptions(handle.desired_subscriptions().len());

        let mut runner = tokio::spawn(async move { supervisor.run().await });
        tokio::pin!(shutdown);
        let mut shutdown_requested = false;

        let outcome = loop {
            tokio::select! {
                Some(event) = events.recv() => {
                    self.handle_event(&handle, event).await;
                }
                result = &mut runner => break result,
                _ = &mut shutdown, if !shutdown_requested => {
                    info!("Shutdown signal received");
                    shutdown_requested = true;
                    handle.stop();
                }
            }
        };

        while let Ok(event) = events.try_recv() {
            self.handle_event(&handle, event).await;
        }

        info!(stats = ?self.stats, "Session ended");
        if let Ok(text) = Metrics::gather_text() {
            debug!(metrics = %text, "Final metrics");
        }

        match outcome {
            Ok(Ok(())) => Ok(self.stats),
            Ok(Err(e)) => Err(e.into()),
            Err(e) => Err(AppError::Task(e.to_string())),
        }
    }

    async fn handle_event(&mut self, handle: &SessionHandle, event: SessionEvent) {
        self.stats
            .observe(&event, chrono::Utc::now().timestamp_millis());
        Metrics::session_state_set(handle.state().as_str());

        match event {
            SessionEvent::Connected { url } => info!(url = %url, "Connected"),
            SessionEvent::Authenticated => info!("Authenticated"),
            SessionEvent::Resubscribed { count } => {
                info!(count, "Subscriptions sent");
                Metrics::desired_subscriptions(handle.desired_subscriptions().len());
                if !self.data_requests_sent {
                    self.data_requests_sent = true;
                    self.send_data_requests(handle).await;
                }
            }
            SessionEvent::AuthFailed { reason } => warn!(reason = %reason, "Authentication failed"),
            SessionEvent::Disconnected { cause } => warn!(cause = %cause, "Disconnected"),
            SessionEvent::Reconnecting { attempt, delay } => info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying"
            ),
            SessionEvent::Failed { reason } => error!(reason = %reason, "Session failed"),
            SessionEvent::Stopped => info!("Session stopped"),
            SessionEvent::Stream { request_id, updates } => {
                for update in &updates {
                    debug!(
                        request_id = %request_id,
                        pair = %update.pair(),
                        quantity = update.quantity,
                        quantity_token = %update.quantity_token,
                        buy = ?update.buy_price,
                        sell = ?update.sell_price,
                        t_create = update.t_create,
                        "Price update"
                    );
                }
            }
            SessionEvent::SubscribeAck(ack) | SessionEvent::UnsubscribeAck(ack) => {
                if !ack.ok {
                    warn!(request_id = %ack.request_id, kind = %ack.kind, error = ?ack.error, "Request rejected");
                }
            }
            SessionEvent::DataResponse(ack) => {
                if ack.ok {
                    info!(request_id = %ack.request_id, body = ?ack.body, "Data response");
                } else {
                    warn!(request_id = %ack.request_id, error = ?ack.error, "Data request rejected");
                }
            }
            SessionEvent::ServerError(err) => {
                warn!(request_id = %err.request_id, event = ?err.event, error = ?err.error, "Server error")
            }
            SessionEvent::FrameRejected { reason } => debug!(reason = %reason, "Frame rejected"),
        }
    }

    async fn send_data_requests(&self, handle: &SessionHandle) {
        for req in &self.config.data_requests {
            let request_id = req.request_id.clone().unwrap_or_else(new_request_id);
            if let Err(e) = handle.data_request(&req.request_type, &request_id).await {
                warn!(?e, request_type = %req.request_type, "Data request failed");
            }
        }
    }
}
