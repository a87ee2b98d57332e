//! Subscriber against a real hub server on an ephemeral port.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use pulseboard_hub::{HubServer, ServerConfig};
use pulseboard_protocol::Envelope;
use pulseboard_protocol::events;
use pulseboard_subscriber::{
    FallbackGenerator, FallbackTicker, SharedDashboard, Subscriber, SubscriberError,
};
use serde_json::json;
use tokio::sync::mpsc;

async fn start_server() -> (Arc<HubServer>, tokio::task::JoinHandle<()>, String) {
    let server = HubServer::new(ServerConfig {
        bind: Ipv4Addr::LOCALHOST.into(),
        port: 0,
    });
    let runner = Arc::clone(&server);
    let handle = tokio::spawn(async move {
        runner.run().await.unwrap();
    });

    for _ in 0..100 {
        if server.port().await > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let url = format!("ws://127.0.0.1:{}/ws", server.port().await);
    (server, handle, url)
}

async fn wait_for_clients(server: &HubServer, n: usize) {
    for _ in 0..300 {
        if server.registry().len() == n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {n} clients, have {}", server.registry().len());
}

#[tokio::test]
async fn broadcast_reaches_every_subscriber() {
    let (server, handle, url) = start_server().await;

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let mut subs = Vec::new();
    for i in 0..3 {
        let sub = Subscriber::connect(&url).unwrap();
        let tx = seen_tx.clone();
        let _ = sub.subscribe(events::METRICS_UPDATED, move |data| {
            let _ = tx.send((i, data.clone()));
        });
        subs.push(sub);
    }
    wait_for_clients(&server, 3).await;

    let report = server
        .hub()
        .emit(events::METRICS_UPDATED, json!({"accuracy": 0.95}));
    assert_eq!(report.delivered, 3);

    let mut who = Vec::new();
    for _ in 0..3 {
        let (i, data) = tokio::time::timeout(Duration::from_secs(2), seen_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(data, json!({"accuracy": 0.95}));
        who.push(i);
    }
    who.sort();
    assert_eq!(who, vec![0, 1, 2]);

    for sub in &subs {
        sub.shutdown().await;
    }
    server.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn subscriber_shutdown_evicts_server_entry() {
    let (server, handle, url) = start_server().await;

    let sub = Subscriber::connect(&url).unwrap();
    sub.connected_watch().wait_for(|c| *c).await.unwrap();
    wait_for_clients(&server, 1).await;
    assert!(sub.is_connected());

    sub.shutdown().await;
    wait_for_clients(&server, 0).await;

    // Broadcasting to nobody is fine.
    let report = server.hub().emit(events::MODEL_CREATED, json!({"id": 1}));
    assert_eq!(report.delivered, 0);

    server.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn subscriber_reconnects_after_server_restart() {
    let (server, handle, url) = start_server().await;
    let port = server.port().await;

    let sub = Subscriber::connect(&url).unwrap();
    let mut connected = sub.connected_watch();
    connected.wait_for(|c| *c).await.unwrap();

    server.shutdown();
    handle.await.unwrap();
    connected.wait_for(|c| !*c).await.unwrap();
    assert!(sub.last_error().is_some() || !sub.is_connected());

    // Same port, new server.
    let server2 = HubServer::new(ServerConfig {
        bind: Ipv4Addr::LOCALHOST.into(),
        port,
    });
    let runner = Arc::clone(&server2);
    let handle2 = tokio::spawn(async move {
        runner.run().await.unwrap();
    });

    tokio::time::timeout(Duration::from_secs(10), connected.wait_for(|c| *c))
        .await
        .expect("reconnect within one delay")
        .unwrap();
    wait_for_clients(&server2, 1).await;

    sub.shutdown().await;
    server2.shutdown();
    handle2.await.unwrap();
}

#[tokio::test]
async fn client_messages_are_tolerated_by_the_hub() {
    let (server, handle, url) = start_server().await;

    let sub = Subscriber::connect(&url).unwrap();
    sub.connected_watch().wait_for(|c| *c).await.unwrap();
    wait_for_clients(&server, 1).await;

    sub.try_send(&Envelope::new("ping", json!({"from": "monitor"})))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.registry().len(), 1);

    sub.shutdown().await;
    server.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn dashboard_follows_live_events_and_fallback_is_idle() {
    let (server, handle, url) = start_server().await;

    let sub = Subscriber::connect(&url).unwrap();
    let dashboard = SharedDashboard::default();
    let subscriptions = dashboard.bind(&sub);
    let ticker = FallbackTicker::spawn_with_period(
        sub.connected_watch(),
        FallbackGenerator::default(),
        dashboard.clone(),
        Duration::from_millis(50),
    );

    sub.connected_watch().wait_for(|c| *c).await.unwrap();
    wait_for_clients(&server, 1).await;

    server.hub().emit(
        events::TRAINING_UPDATED,
        json!({"sessionId": 1, "updates": {"currentAccuracy": 0.9, "currentLoss": 0.2}}),
    );
    server
        .hub()
        .emit(events::INSIGHT_CREATED, json!({"title": "drift detected"}));

    for _ in 0..200 {
        if !dashboard.snapshot().insights.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let snap = dashboard.snapshot();
    assert_eq!(snap.performance.latest().unwrap().accuracy, 0.9);
    assert_eq!(snap.insights[0]["title"], "drift detected");

    // Connected: the fallback ticker adds nothing.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(dashboard.snapshot().performance.len(), snap.performance.len());

    for s in subscriptions {
        assert!(s.unsubscribe());
    }
    ticker.shutdown().await;
    sub.shutdown().await;
    server.shutdown();
    handle.await.unwrap();
}

#[test]
fn connect_rejects_http_urls() {
    let err = Subscriber::connect("http://127.0.0.1/ws").err().unwrap();
    assert!(matches!(err, SubscriberError::InvalidUrl(_)));
}
