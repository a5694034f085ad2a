//! Integration tests for the real-time subscription client.
//!
//! WebSocket behaviour is driven through the mock connector under paused
//! time. The SSE test serves a real event stream from a local axum server.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::{Event, Sse};
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use market_realtime::subscription::{ChannelRegistry, SharedRegistry};
use market_realtime::transport::{MockConnector, ReconnectConfig, SseSource};
use market_realtime::{ConnectionState, LifecycleEvent, MessageSource, RealtimeClient, SourceKind};

fn mock_client() -> (RealtimeClient, MockConnector) {
    let connector = MockConnector::new();
    let client = RealtimeClient::with_connector(
        "ws://mock",
        ReconnectConfig {
            jitter_ms: 0,
            ..Default::default()
        },
        Arc::new(connector.clone()),
    );
    (client, connector)
}

fn drain_events(rx: &mut broadcast::Receiver<LifecycleEvent>) -> Vec<LifecycleEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return events,
        }
    }
}

#[tokio::test(start_paused = true)]
async fn two_listeners_on_one_topic() {
    let (client, connector) = mock_client();
    let mut server = connector.accept().await;
    let seen: Arc<Mutex<Vec<(&str, Value)>>> = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&seen);
    let a = client.subscribe("odds.7", move |data| log.lock().push(("A", data.clone())));
    let log = Arc::clone(&seen);
    let b = client.subscribe("odds.7", move |data| log.lock().push(("B", data.clone())));

    let frames = server.settle_and_drain().await;
    assert_eq!(MockConnector::control_topics(&frames, "subscribe"), vec!["odds.7"]);

    server.push_text(r#"{"type":"data","channel":"odds.7","data":{"x":1}}"#);
    server.settle_and_drain().await;
    assert_eq!(
        *seen.lock(),
        vec![("A", json!({"x": 1})), ("B", json!({"x": 1}))]
    );

    a.unsubscribe();
    seen.lock().clear();
    server.push_data("odds.7", json!({"x": 2}));
    let frames = server.settle_and_drain().await;
    assert_eq!(*seen.lock(), vec![("B", json!({"x": 2}))]);
    assert!(MockConnector::control_topics(&frames, "unsubscribe").is_empty());

    b.unsubscribe();
    b.unsubscribe();
    let frames = server.settle_and_drain().await;
    assert_eq!(MockConnector::control_topics(&frames, "unsubscribe"), vec!["odds.7"]);
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_ten_failures() {
    let (client, connector) = mock_client();
    connector.fail_always();
    let mut events = client.events();

    // Long enough for eleven attempts if nothing stopped them.
    tokio::time::sleep(Duration::from_secs(600)).await;

    assert_eq!(connector.attempts(), 10);
    assert_eq!(client.state(), ConnectionState::Disconnected);

    let events = drain_events(&mut events);
    let exhausted: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, LifecycleEvent::ReconnectsExhausted { .. }))
        .collect();
    assert_eq!(exhausted, vec![&LifecycleEvent::ReconnectsExhausted { attempts: 10 }]);

    let delays: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            LifecycleEvent::ReconnectScheduled { delay, .. } => Some(delay.as_millis() as u64),
            _ => None,
        })
        .collect();
    assert_eq!(
        delays,
        vec![1000, 2000, 4000, 8000, 16000, 30000, 30000, 30000, 30000]
    );

    client.shutdown();
}

#[tokio::test(start_paused = true)]
async fn reconnect_resubscribes_each_topic_once() {
    let (client, connector) = mock_client();
    let mut first = connector.accept().await;

    let _odds = client.subscribe("odds.7", |_| {});
    let _odds_again = client.subscribe("odds.7", |_| {});
    let _status = client.subscribe("status.7", |_| {});
    let gone = client.subscribe("market.7", |_| {});
    gone.unsubscribe();
    first.settle_and_drain().await;

    first.disconnect();
    let mut second = connector.accept().await;
    let frames = second.settle_and_drain().await;

    let mut topics = MockConnector::control_topics(&frames, "subscribe");
    topics.sort();
    assert_eq!(topics, vec!["odds.7", "status.7"]);
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn control_frames_match_listener_transitions() {
    let (client, connector) = mock_client();
    let mut server = connector.accept().await;

    let a = client.subscribe("liquidity.3", |_| {});
    let b = client.subscribe("liquidity.3", |_| {});
    b.unsubscribe();
    a.unsubscribe();
    let c = client.subscribe("liquidity.3", |_| {});
    let d = client.subscribe("liquidity.3", |_| {});
    c.unsubscribe();

    let frames = server.settle_and_drain().await;
    assert_eq!(MockConnector::control_topics(&frames, "subscribe").len(), 2);
    assert_eq!(MockConnector::control_topics(&frames, "unsubscribe").len(), 1);

    d.unsubscribe();
    let frames = server.settle_and_drain().await;
    assert_eq!(MockConnector::control_topics(&frames, "unsubscribe").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_do_not_disturb_delivery() {
    let (client, connector) = mock_client();
    let mut server = connector.accept().await;
    let count = Arc::new(Mutex::new(0));

    let counter = Arc::clone(&count);
    let _h = client.subscribe("status.9", move |_| *counter.lock() += 1);
    let _bad = client.subscribe("status.9", |_| panic!("listener bug"));

    server.push_text("not json");
    server.push_text(r#"{"type":"pong"}"#);
    server.push_data("status.9", json!("live"));
    server.push_data("status.9", json!("settled"));
    server.settle_and_drain().await;

    assert_eq!(*count.lock(), 2);
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn sse_source_feeds_the_same_dispatch_path() {
    let app = Router::new().route(
        "/sse",
        get(|| async {
            let events = vec![
                Ok::<_, Infallible>(Event::default().retry(Duration::from_millis(50))),
                Ok(Event::default().data(r#"{"type":"data","channel":"odds.7","data":{"x":1}}"#)),
                Ok(Event::default()
                    .event("noise")
                    .data(r#"{"type":"data","channel":"odds.7","data":{"x":99}}"#)),
                Ok(Event::default().data(r#"{"type":"pong"}"#)),
            ];
            Sse::new(futures::stream::iter(events))
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });

    let registry: SharedRegistry = Arc::new(Mutex::new(ChannelRegistry::new()));
    let source = Arc::new(SseSource::new(format!("http://{}/sse", addr), Arc::clone(&registry)).unwrap());
    let mut events = source.events();
    let client = RealtimeClient::with_source(registry, source as Arc<dyn MessageSource>);
    assert_eq!(client.mode(), SourceKind::Sse);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let _h = client.subscribe("odds.7", move |data| log.lock().push(data.clone()));

    // Each response ends after its events, so the source reconnects every
    // 50 ms and the payload arrives again.
    let delivered_twice = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if seen.lock().len() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(delivered_twice.is_ok(), "SSE payload was not delivered twice");
    assert!(seen.lock().iter().all(|v| *v == json!({"x": 1})));

    client.shutdown();
    let events = drain_events(&mut events);
    assert!(events.contains(&LifecycleEvent::Connected));
    assert!(events
        .iter()
        .any(|e| matches!(e, LifecycleEvent::ReconnectScheduled { delay, .. } if *delay == Duration::from_millis(50))));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}
