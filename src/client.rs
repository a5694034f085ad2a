//! The shared real-time client.
//!
//! One [`RealtimeClient`] is built at start-up and cloned into whatever needs
//! push updates. It owns the registry, the active [`MessageSource`] and the
//! [`Subscriptions`] facade over them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::subscription::{ChannelRegistry, SharedRegistry, SubscriptionHandle, Subscriptions};
use crate::transport::{
    ConnectionState, Connector, LifecycleEvent, MessageSource, ReconnectConfig, SourceKind,
    SseSource, WebSocketSource,
};

/// Handle to the process-wide subscription client. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RealtimeClient {
    subscriptions: Subscriptions,
    shut_down: Arc<AtomicBool>,
}

impl RealtimeClient {
    /// Build the client selected by `config` and start connecting.
    ///
    /// With `use_sse` set, an SSE source is tried first; if it cannot be
    /// initialised the WebSocket transport is used instead. Must be called
    /// inside a tokio runtime.
    pub fn from_config(config: &Config) -> Self {
        let registry = new_registry();
        let source = select_source(config, &registry);
        Self::with_source(registry, source)
    }

    /// WebSocket client over a custom connector.
    pub fn with_connector(
        url: impl Into<String>,
        reconnect: ReconnectConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let registry = new_registry();
        let source = WebSocketSource::with_connector(url, reconnect, Arc::clone(&registry), connector);
        Self::with_source(registry, Arc::new(source))
    }

    /// Wrap an already-built source and start it.
    pub fn with_source(registry: SharedRegistry, source: Arc<dyn MessageSource>) -> Self {
        source.start();
        Self {
            subscriptions: Subscriptions::new(registry, source),
            shut_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register `listener` for `topic`. See [`Subscriptions::subscribe`].
    ///
    /// After [`shutdown`](Self::shutdown) the listener is still recorded but
    /// never called, since the transport is stopped for good.
    pub fn subscribe<F>(&self, topic: &str, listener: F) -> SubscriptionHandle
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.note_if_shut_down(topic);
        self.subscriptions.subscribe(topic, listener)
    }

    /// Register a listener that receives payloads decoded as `T`.
    ///
    /// Same shutdown caveat as [`subscribe`](Self::subscribe).
    pub fn subscribe_typed<T, F>(&self, topic: &str, listener: F) -> SubscriptionHandle
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.note_if_shut_down(topic);
        self.subscriptions.subscribe_typed(topic, listener)
    }

    fn note_if_shut_down(&self, topic: &str) {
        if self.is_shut_down() {
            debug!(channel = %topic, "Subscribing after shutdown; listener will not be called");
        }
    }

    /// The facade, for callers that want to hand it around on its own.
    pub fn subscriptions(&self) -> &Subscriptions {
        &self.subscriptions
    }

    /// Which transport is active.
    pub fn mode(&self) -> SourceKind {
        self.subscriptions.source().kind()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.subscriptions.source().state()
    }

    /// Watch the connection state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.subscriptions.source().watch_state()
    }

    /// Subscribe to transport lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.subscriptions.source().events()
    }

    /// Subscribed topics with their listener counts, sorted by topic.
    pub fn topics(&self) -> Vec<(String, usize)> {
        let registry = self.subscriptions.registry().lock();
        registry
            .all_topics()
            .into_iter()
            .map(|topic| {
                let count = registry.listener_count(&topic);
                (topic, count)
            })
            .collect()
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stop the transport and forget every listener. Runs once.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        info!(mode = %self.mode(), "Shutting down real-time client");
        self.subscriptions.source().stop();
        self.subscriptions.registry().lock().clear();
    }
}

fn new_registry() -> SharedRegistry {
    Arc::new(Mutex::new(ChannelRegistry::new()))
}

fn select_source(config: &Config, registry: &SharedRegistry) -> Arc<dyn MessageSource> {
    if config.use_sse {
        let url = config.sse_url();
        match SseSource::new(url.as_str(), Arc::clone(registry)) {
            Ok(source) => {
                info!(url = %url, "Using SSE transport");
                return Arc::new(source);
            }
            Err(e) => {
                warn!(url = %url, error = %e, "SSE transport unavailable, falling back to WebSocket");
            }
        }
    }

    info!(url = %config.realtime_ws_url, "Using WebSocket transport");
    Arc::new(WebSocketSource::new(
        config.realtime_ws_url.clone(),
        ReconnectConfig::from_config(config),
        Arc::clone(registry),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::transport::MockConnector;
    use pretty_assertions::assert_eq;

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

    #[tokio::test(start_paused = true)]
    async fn selects_websocket_by_default() {
        let config = Config::default();
        let client = RealtimeClient::from_config(&config);
        assert_eq!(client.mode(), SourceKind::WebSocket);
        client.shutdown();
    }

    #[tokio::test]
    async fn selects_sse_when_enabled() {
        let config = Config {
            use_sse: true,
            realtime_sse_url: Some("http://127.0.0.1:9/sse".to_string()),
            ..Config::default()
        };
        let client = RealtimeClient::from_config(&config);
        assert_eq!(client.mode(), SourceKind::Sse);
        client.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn falls_back_to_websocket_when_sse_fails() {
        let config = Config {
            use_sse: true,
            realtime_sse_url: Some("ftp://example.com/sse".to_string()),
            ..Config::default()
        };
        let client = RealtimeClient::from_config(&config);
        assert_eq!(client.mode(), SourceKind::WebSocket);
        client.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn clones_share_one_transport() {
        let (client, connector) = mock_client();
        let other = client.clone();
        let mut server = connector.accept().await;

        let _a = client.subscribe("odds.7", |_| {});
        let _b = other.subscribe("odds.7", |_| {});

        let frames = server.settle_and_drain().await;
        assert_eq!(MockConnector::control_topics(&frames, "subscribe"), vec!["odds.7"]);
        assert_eq!(connector.attempts(), 1);
        assert_eq!(client.topics(), vec![("odds.7".to_string(), 2)]);
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_is_idempotent_and_clears_listeners() {
        let (client, connector) = mock_client();
        let mut server = connector.accept().await;
        let handle = client.subscribe("status.7", |_| {});

        client.shutdown();
        client.shutdown();

        assert!(client.is_shut_down());
        assert!(client.topics().is_empty());
        assert!(server.wait_closed().await);
        assert_eq!(client.state(), ConnectionState::Disconnected);

        handle.unsubscribe();
        assert!(client.topics().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_after_shutdown_never_delivers() {
        let (client, connector) = mock_client();
        let mut server = connector.accept().await;
        client.shutdown();
        assert!(server.wait_closed().await);

        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let late = client.subscribe("odds.7", move |_| *counter.lock() += 1);
        let typed = client.subscribe_typed("status.7", |_: String| {});

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(*calls.lock(), 0);
        assert_eq!(connector.attempts(), 1);
        assert_eq!(client.state(), ConnectionState::Disconnected);

        late.unsubscribe();
        typed.unsubscribe();
        assert!(client.topics().is_empty());
    }
}
