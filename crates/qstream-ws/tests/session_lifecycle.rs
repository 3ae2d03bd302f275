//! Session lifecycle tests against a mock quote feed server.

mod common;

use common::mock_ws::{AuthMode, MockWsServer};
use qstream_core::Credentials;
use qstream_ws::{
    CloseCause, RetryPolicy, SessionConfig, SessionEvent, SessionState, SessionSupervisor,
    WsError, WsResult,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(5);

struct Session {
    supervisor: Arc<SessionSupervisor>,
    events: mpsc::Receiver<SessionEvent>,
    runner: Option<JoinHandle<WsResult<()>>>,
}

impl Session {
    fn new(server: &MockWsServer, configure: impl FnOnce(&mut SessionConfig)) -> Self {
        let mut config = SessionConfig::new(
            server.host(),
            "/price.tickers",
            Credentials::new("key", "c2VjcmV0", "pass").unwrap(),
        );
        config.use_tls = false;
        config.retry = RetryPolicy::new(Duration::from_millis(20), Some(5));
        configure(&mut config);

        let (supervisor, events) = SessionSupervisor::with_channel(config).unwrap();
        Self {
            supervisor: Arc::new(supervisor),
            events,
            runner: None,
        }
    }

    fn start(&mut self) {
        let supervisor = self.supervisor.clone();
        self.runner = Some(tokio::spawn(async move { supervisor.run().await }));
    }

    /// Wait for the first event matching `pred`, skipping others.
    async fn expect(&mut self, what: &str, pred: impl Fn(&SessionEvent) -> bool) -> SessionEvent {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Ok(Some(event)) if pred(&event) => return event,
                Ok(Some(_)) => continue,
                Ok(None) => panic!("event channel closed while waiting for {what}"),
                Err(_) => panic!("timed out waiting for {what}"),
            }
        }
    }

    async fn finish(&mut self) -> WsResult<()> {
        let runner = self.runner.take().expect("session not started");
        tokio::time::timeout(WAIT, runner)
            .await
            .expect("session did not finish")
            .expect("session task panicked")
    }
}

fn stream_frame(t_create: i64) -> String {
    serde_json::json!({
        "status": "ok",
        "event": "stream",
        "request_id": "s-eth",
        "body": [{
            "t_create": t_create,
            "quantity": 1.0,
            "quantity_token": "ETH",
            "sell_price": 1999.5,
            "buy_price": 2000.5,
            "base_token": "ETH",
            "quote_token": "USD"
        }]
    })
    .to_string()
}

#[tokio::test]
async fn test_authenticates_before_resubscribing() {
    let server = MockWsServer::start(AuthMode::Accept).await;
    let mut session = Session::new(&server, |_| {});
    let handle = session.supervisor.handle();

    let eth = handle
        .subscribe("ETH", "USD", "s-eth", vec![0.1, 1.0], "ETH")
        .await
        .unwrap();
    let btc = handle
        .subscribe("BTC", "USD", "s-btc", vec![0.01], "BTC")
        .await
        .unwrap();

    session.start();
    session
        .expect("Resubscribed", |e| {
            matches!(e, SessionEvent::Resubscribed { count: 2 })
        })
        .await;

    assert!(handle.is_authenticated());
    assert_eq!(handle.state(), SessionState::Subscribed);
    assert!(eth.wait_timeout(WAIT).await.unwrap().ok);
    assert!(btc.wait_timeout(WAIT).await.unwrap().ok);

    assert_eq!(
        server.actions(0).await,
        vec!["auth", "subscribe", "subscribe"]
    );
    let auth = &server.frames(0).await[0];
    assert_eq!(auth["api_key"], "key");
    assert_eq!(auth["passphrase"], "pass");
    assert!(auth["signature"].as_str().is_some_and(|s| !s.is_empty()));
    assert!(auth.get("secret").is_none());

    handle.stop();
    session.finish().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_resubscribes_desired_set() {
    let server = MockWsServer::start(AuthMode::Accept).await;
    let mut session = Session::new(&server, |_| {});
    let handle = session.supervisor.handle();

    for (base, id) in [("ETH", "s-eth"), ("BTC", "s-btc"), ("SOL", "s-sol")] {
        handle
            .subscribe(base, "USD", id, vec![1.0], base)
            .await
            .unwrap();
    }

    session.start();
    session
        .expect("initial Resubscribed", |e| {
            matches!(e, SessionEvent::Resubscribed { count: 3 })
        })
        .await;

    handle
        .unsubscribe("BTC", "USD", "u-btc")
        .await
        .unwrap()
        .wait_timeout(WAIT)
        .await
        .unwrap();

    server.drop_connection().await;
    session
        .expect("Disconnected", |e| matches!(e, SessionEvent::Disconnected { .. }))
        .await;
    session
        .expect("Resubscribed after reconnect", |e| {
            matches!(e, SessionEvent::Resubscribed { .. })
        })
        .await;

    assert_eq!(server.connection_count().await, 2);
    server.wait_for_frames(1, 3).await;
    let resent: Vec<_> = server
        .frames(1)
        .await
        .iter()
        .filter(|f| f["action"] == "subscribe")
        .map(|f| f["base_token"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(resent, vec!["ETH", "SOL"]);
    assert_eq!(server.actions(1).await[0], "auth");

    handle.stop();
    session.finish().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_malformed_frame_does_not_stop_dispatch() {
    let server = MockWsServer::start(AuthMode::Accept).await;
    let mut session = Session::new(&server, |_| {});
    session.start();
    session
        .expect("Resubscribed", |e| matches!(e, SessionEvent::Resubscribed { .. }))
        .await;

    server.push("{this is not json").await;
    server
        .push(r#"{"status":"ok","event":"heartbeat","request_id":"x"}"#)
        .await;
    server.push(stream_frame(42)).await;

    session
        .expect("FrameRejected", |e| {
            matches!(e, SessionEvent::FrameRejected { .. })
        })
        .await;
    match session
        .expect("Stream", |e| matches!(e, SessionEvent::Stream { .. }))
        .await
    {
        SessionEvent::Stream { updates, .. } => {
            assert_eq!(updates.len(), 1);
            assert_eq!(updates[0].t_create, 42);
            assert_eq!(updates[0].buy_price, Some(2000.5));
        }
        other => panic!("expected Stream, got {other:?}"),
    }
    assert_eq!(session.supervisor.state(), SessionState::Subscribed);

    session.supervisor.stop();
    session.finish().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_unsubscribe_unknown_pair_sends_frame() {
    let server = MockWsServer::start(AuthMode::Accept).await;
    let mut session = Session::new(&server, |_| {});
    let handle = session.supervisor.handle();
    session.start();
    session
        .expect("Resubscribed", |e| matches!(e, SessionEvent::Resubscribed { .. }))
        .await;

    let ack = handle
        .unsubscribe("DOGE", "USD", "u-doge")
        .await
        .unwrap()
        .wait_timeout(WAIT)
        .await
        .unwrap();
    assert!(ack.ok);
    assert!(handle.desired_subscriptions().is_empty());

    let unsubscribes = server.frames_with_action("unsubscribe").await;
    assert_eq!(unsubscribes.len(), 1);
    assert_eq!(unsubscribes[0]["base_token"], "DOGE");

    handle.stop();
    session.finish().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_data_request_ack() {
    let server = MockWsServer::start(AuthMode::Accept).await;
    let mut session = Session::new(&server, |_| {});
    let handle = session.supervisor.handle();
    session.start();
    session
        .expect("Authenticated", |e| matches!(e, SessionEvent::Authenticated))
        .await;

    let ack = handle
        .data_request("max_levels", "d-1")
        .await
        .unwrap()
        .wait_timeout(WAIT)
        .await
        .unwrap();
    assert_eq!(ack.body.unwrap()["max_levels"], 10);
    session
        .expect("DataResponse", |e| matches!(e, SessionEvent::DataResponse(_)))
        .await;

    handle.stop();
    session.finish().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_auth_rejected_exhausts_retries() {
    let server = MockWsServer::start(AuthMode::Reject).await;
    let mut session = Session::new(&server, |config| {
        config.retry = RetryPolicy::new(Duration::from_millis(10), Some(2));
    });
    session.start();

    let result = session.finish().await;
    assert!(matches!(result, Err(WsError::AuthExhausted { attempts: 3 })));
    assert_eq!(session.supervisor.state(), SessionState::Failed);
    assert!(!session.supervisor.is_authenticated());
    assert_eq!(server.frames_with_action("auth").await.len(), 3);
    assert!(server.frames_with_action("subscribe").await.is_empty());

    let mut auth_failures = 0;
    while let Ok(event) = session.events.try_recv() {
        if matches!(event, SessionEvent::AuthFailed { .. }) {
            auth_failures += 1;
        }
    }
    assert_eq!(auth_failures, 3);
    server.shutdown().await;
}

#[tokio::test]
async fn test_socket_dropped_during_auth_exhausts_retries() {
    let server = MockWsServer::start(AuthMode::Drop).await;
    let mut session = Session::new(&server, |config| {
        config.retry = RetryPolicy::new(Duration::from_millis(50), Some(2));
    });
    session.start();

    let result = session.finish().await;
    assert!(matches!(result, Err(WsError::AuthExhausted { attempts: 3 })));
    assert_eq!(session.supervisor.state(), SessionState::Failed);
    assert_eq!(server.connection_count().await, 3);
    assert_eq!(server.frames_with_action("auth").await.len(), 3);

    let mut auth_failures = 0;
    let mut retries = 0;
    while let Ok(event) = session.events.try_recv() {
        match event {
            SessionEvent::AuthFailed { .. } => auth_failures += 1,
            SessionEvent::Reconnecting { delay, .. } => {
                assert_eq!(delay, Duration::from_millis(50));
                retries += 1;
            }
            _ => {}
        }
    }
    assert_eq!(auth_failures, 3);
    assert_eq!(retries, 2);
    server.shutdown().await;
}

#[tokio::test]
async fn test_auth_recovers_after_rejection() {
    let server = MockWsServer::start(AuthMode::Reject).await;
    let mut session = Session::new(&server, |config| {
        config.retry = RetryPolicy::new(Duration::from_millis(50), None);
    });
    session.start();

    session
        .expect("AuthFailed", |e| matches!(e, SessionEvent::AuthFailed { .. }))
        .await;
    server.set_auth_mode(AuthMode::Accept).await;
    session
        .expect("Authenticated", |e| matches!(e, SessionEvent::Authenticated))
        .await;
    assert!(session.supervisor.is_authenticated());

    session.supervisor.stop();
    session.finish().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_auth_timeout() {
    let server = MockWsServer::start(AuthMode::Silent).await;
    let mut session = Session::new(&server, |config| {
        config.retry = RetryPolicy::disabled();
        config.auth_timeout = Some(Duration::from_millis(100));
    });
    session.start();

    match session
        .expect("AuthFailed", |e| matches!(e, SessionEvent::AuthFailed { .. }))
        .await
    {
        SessionEvent::AuthFailed { reason } => assert!(reason.contains("timed out")),
        other => panic!("expected AuthFailed, got {other:?}"),
    }
    let result = session.finish().await;
    assert!(matches!(result, Err(WsError::AuthExhausted { attempts: 1 })));
    server.shutdown().await;
}

#[tokio::test]
async fn test_stop_while_authenticating() {
    let server = MockWsServer::start(AuthMode::Silent).await;
    let mut session = Session::new(&server, |config| config.auth_timeout = None);
    session.start();
    session
        .expect("Connected", |e| matches!(e, SessionEvent::Connected { .. }))
        .await;

    session.supervisor.stop();
    session.finish().await.unwrap();
    assert_eq!(session.supervisor.state(), SessionState::Disconnected);
    server.shutdown().await;
}

#[tokio::test]
async fn test_stop_while_connected_ends_dispatch() {
    let server = MockWsServer::start(AuthMode::Accept).await;
    let mut session = Session::new(&server, |_| {});
    session.start();
    session
        .expect("Resubscribed", |e| matches!(e, SessionEvent::Resubscribed { .. }))
        .await;

    session.supervisor.stop();
    tokio::time::timeout(Duration::from_secs(1), session.finish())
        .await
        .expect("stop was not bounded")
        .unwrap();
    session
        .expect("Stopped", |e| matches!(e, SessionEvent::Stopped))
        .await;

    server.push(stream_frame(1)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    while let Ok(event) = session.events.try_recv() {
        assert!(
            !matches!(event, SessionEvent::Stream { .. }),
            "stream dispatched after stop"
        );
    }
    assert!(!session.supervisor.is_authenticated());
    server.shutdown().await;
}

#[tokio::test]
async fn test_server_close_frame_triggers_reconnect() {
    let server = MockWsServer::start(AuthMode::Accept).await;
    let mut session = Session::new(&server, |_| {});
    session.start();
    session
        .expect("Resubscribed", |e| matches!(e, SessionEvent::Resubscribed { .. }))
        .await;

    server.close(1001).await;
    match session
        .expect("Disconnected", |e| matches!(e, SessionEvent::Disconnected { .. }))
        .await
    {
        SessionEvent::Disconnected { cause } => {
            assert!(matches!(cause, CloseCause::ClosedByPeer { code: 1001, .. }));
        }
        other => panic!("expected Disconnected, got {other:?}"),
    }
    session
        .expect("re-Authenticated", |e| matches!(e, SessionEvent::Authenticated))
        .await;
    server.wait_for_connections(2).await;

    session.supervisor.stop();
    session.finish().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_ping_answered_with_pong() {
    let server = MockWsServer::start(AuthMode::Accept).await;
    let mut session = Session::new(&server, |_| {});
    session.start();
    session
        .expect("Resubscribed", |e| matches!(e, SessionEvent::Resubscribed { .. }))
        .await;

    server.ping().await;
    tokio::time::timeout(WAIT, async {
        while server.pong_count().await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("no pong received");

    session.supervisor.stop();
    session.finish().await.unwrap();
    server.shutdown().await;
}
