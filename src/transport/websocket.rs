//! WebSocket transport for the real-time feed.
//!
//! Features:
//! - Automatic reconnection with exponential backoff and jitter
//! - Attempt ceiling after which the transport gives up for good
//! - Heartbeat pings while connected
//! - Re-subscription of every registered topic after each connect
//!
//! The connection is owned by a single actor task. The public handle only
//! enqueues commands, so nothing here blocks the caller.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::backoff::{Backoff, ReconnectConfig, ReconnectDecision};
use super::protocol::ControlMessage;
use super::{ConnectionState, Lifecycle, LifecycleEvent, MessageSource, SourceKind};
use crate::error::WsError;
use crate::metrics;
use crate::subscription::dispatch::{Dispatcher, SharedRegistry};

/// One open connection, seen from the transport as a pair of queues.
///
/// Dropping it closes the underlying socket.
#[derive(Debug)]
pub struct Connection {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<Result<String, WsError>>,
}

impl Connection {
    /// Wrap the queues of an established connection.
    ///
    /// `outbound` carries text frames to the server; `inbound` yields text
    /// frames from it and ends (or yields an error) when the connection drops.
    pub fn new(
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<Result<String, WsError>>,
    ) -> Self {
        Self { outbound, inbound }
    }

    fn send(&self, message: &ControlMessage) -> Result<(), WsError> {
        let text = message.to_text()?;
        self.outbound
            .send(text)
            .map_err(|_| WsError::SendFailed("connection writer has stopped".to_string()))
    }
}

/// Opens connections. Abstracted so the transport can run without a socket.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug + 'static {
    /// Open a connection to `url`.
    async fn open(&self, url: &str) -> Result<Connection, WsError>;
}

/// [`Connector`] backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn open(&self, url: &str) -> Result<Connection, WsError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| WsError::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = outbound_rx.recv() => match outbound {
                        Some(text) => {
                            if let Err(e) = write.send(Message::Text(text)).await {
                                let _ = inbound_tx.send(Err(WsError::from(e)));
                                break;
                            }
                        }
                        None => {
                            // Transport dropped the connection: close politely.
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        }
                    },
                    incoming = read.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            if inbound_tx.send(Ok(text)).is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                            Ok(text) => {
                                if inbound_tx.send(Ok(text)).is_err() {
                                    break;
                                }
                            }
                            Err(_) => {
                                metrics::inc_messages_dropped();
                                warn!("Dropping non UTF-8 binary frame");
                            }
                        },
                        Some(Ok(Message::Ping(_))) => {
                            // Note: tungstenite auto-responds to pings
                            debug!("Received ping");
                        }
                        Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (Some(u16::from(f.code)), f.reason.to_string()))
                                .unwrap_or((None, String::new()));
                            let _ = inbound_tx.send(Err(WsError::ConnectionClosed { code, reason }));
                            break;
                        }
                        Some(Err(e)) => {
                            let _ = inbound_tx.send(Err(WsError::from(e)));
                            break;
                        }
                        None => break,
                    },
                }
            }
        });

        Ok(Connection::new(outbound_tx, inbound_rx))
    }
}

#[derive(Debug)]
enum Command {
    Control { topic: String, subscribing: bool },
    Shutdown,
}

enum Slot {
    Idle(Box<Actor>),
    Running(JoinHandle<()>),
    Stopped,
}

/// Bidirectional transport: subscribe/unsubscribe frames, heartbeat,
/// reconnect with backoff.
pub struct WebSocketSource {
    url: String,
    lifecycle: Lifecycle,
    cmd_tx: mpsc::UnboundedSender<Command>,
    slot: Mutex<Slot>,
}

impl fmt::Debug for WebSocketSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketSource")
            .field("url", &self.url)
            .field("state", &self.lifecycle.state())
            .finish()
    }
}

impl WebSocketSource {
    /// Create a transport for `url` using a real socket.
    pub fn new(url: impl Into<String>, reconnect: ReconnectConfig, registry: SharedRegistry) -> Self {
        Self::with_connector(url, reconnect, registry, Arc::new(TungsteniteConnector))
    }

    /// Create a transport with a custom connector.
    pub fn with_connector(
        url: impl Into<String>,
        reconnect: ReconnectConfig,
        registry: SharedRegistry,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let url = url.into();
        let lifecycle = Lifecycle::new();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let actor = Actor {
            url: url.clone(),
            connector,
            dispatcher: Dispatcher::new(Arc::clone(&registry), "websocket"),
            registry,
            backoff: Backoff::new(reconnect),
            cmd_rx,
            lifecycle: lifecycle.clone(),
        };

        Self {
            url,
            lifecycle,
            cmd_tx,
            slot: Mutex::new(Slot::Idle(Box::new(actor))),
        }
    }

    /// Endpoint this transport connects to.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl MessageSource for WebSocketSource {
    fn kind(&self) -> SourceKind {
        SourceKind::WebSocket
    }

    fn start(&self) {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Stopped) {
            Slot::Idle(actor) => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    info!(url = %self.url, "Starting WebSocket transport");
                    *slot = Slot::Running(handle.spawn(actor.run()));
                }
                Err(_) => {
                    error!("WebSocket transport must be started inside a tokio runtime");
                    *slot = Slot::Idle(actor);
                }
            },
            Slot::Running(task) => {
                debug!("WebSocket transport already started");
                *slot = Slot::Running(task);
            }
            Slot::Stopped => {
                debug!("WebSocket transport was stopped; not restarting");
            }
        }
    }

    fn stop(&self) {
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Stopped) {
            return;
        }
        *slot = Slot::Stopped;
        let _ = self.cmd_tx.send(Command::Shutdown);
        self.lifecycle.set_state(ConnectionState::Disconnected);
        self.lifecycle.emit(LifecycleEvent::Stopped);
        info!(url = %self.url, "WebSocket transport stopped");
    }

    fn send_control(&self, topic: &str, subscribing: bool) {
        let _ = self.cmd_tx.send(Command::Control {
            topic: topic.to_string(),
            subscribing,
        });
    }

    fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.lifecycle.watch()
    }

    fn events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.subscribe()
    }
}

impl Drop for WebSocketSource {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }
}

/// How a connection round ended.
enum Round {
    Dropped,
    Shutdown,
}

struct Actor {
    url: String,
    connector: Arc<dyn Connector>,
    registry: SharedRegistry,
    dispatcher: Dispatcher,
    backoff: Backoff,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    lifecycle: Lifecycle,
}

impl Actor {
    async fn run(mut self: Box<Self>) {
        loop {
            if let Round::Shutdown = self.connect_once().await {
                break;
            }

            match self.backoff.on_failure() {
                ReconnectDecision::Retry { attempt, delay } => {
                    let delay = delay + self.backoff.config().jitter();
                    metrics::inc_reconnects();
                    warn!(
                        attempt = attempt,
                        max_attempts = self.backoff.config().max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Reconnecting after delay"
                    );
                    self.lifecycle
                        .emit(LifecycleEvent::ReconnectScheduled { attempt, delay });

                    if self.sleep_or_shutdown(delay).await {
                        break;
                    }
                }
                ReconnectDecision::GiveUp { attempts } => {
                    metrics::inc_reconnects_exhausted();
                    error!(
                        url = %self.url,
                        attempts = attempts,
                        "Max reconnection attempts reached, giving up"
                    );
                    self.lifecycle
                        .emit(LifecycleEvent::ReconnectsExhausted { attempts });
                    self.idle_until_shutdown().await;
                    break;
                }
                ReconnectDecision::Exhausted => {
                    self.idle_until_shutdown().await;
                    break;
                }
            }
        }

        self.lifecycle.set_state(ConnectionState::Disconnected);
        debug!(url = %self.url, "WebSocket actor exited");
    }

    /// One connect attempt plus, on success, the connected message loop.
    async fn connect_once(&mut self) -> Round {
        let attempt = self.backoff.failures() + 1;
        self.lifecycle.set_state(ConnectionState::Connecting);
        self.lifecycle.emit(LifecycleEvent::Connecting { attempt });
        info!(url = %self.url, attempt = attempt, "Connecting to WebSocket");

        let opened = {
            let open = self.connector.open(&self.url);
            tokio::pin!(open);
            loop {
                tokio::select! {
                    result = &mut open => break result,
                    cmd = self.cmd_rx.recv() => match cmd {
                        Some(Command::Control { topic, .. }) => {
                            debug!(channel = %topic, "Not connected; topic will be sent on connect");
                        }
                        Some(Command::Shutdown) | None => return Round::Shutdown,
                    },
                }
            }
        };

        let connection = match opened {
            Ok(connection) => connection,
            Err(e) => {
                warn!(url = %self.url, error = %e, "WebSocket connection failed");
                self.lifecycle.set_state(ConnectionState::Disconnected);
                self.lifecycle.emit(LifecycleEvent::Disconnected {
                    reason: e.to_string(),
                });
                return Round::Dropped;
            }
        };

        self.backoff.reset();
        self.lifecycle.set_state(ConnectionState::Connected);
        self.lifecycle.emit(LifecycleEvent::Connected);
        info!(url = %self.url, "WebSocket connected");

        self.connected_loop(connection).await
    }

    async fn connected_loop(&mut self, mut connection: Connection) -> Round {
        // Topics subscribed on this connection.
        let mut subscribed = HashSet::new();

        let reason = match self.resubscribe_all(&connection, &mut subscribed) {
            Ok(()) => self.pump(&mut connection, &mut subscribed).await,
            Err(e) => Err(e.to_string()),
        };

        match reason {
            Ok(()) => {
                // Dropping the connection closes the socket; heartbeat ends
                // with this scope.
                drop(connection);
                Round::Shutdown
            }
            Err(reason) => {
                warn!(url = %self.url, reason = %reason, "WebSocket disconnected");
                self.lifecycle.set_state(ConnectionState::Disconnected);
                self.lifecycle
                    .emit(LifecycleEvent::Disconnected { reason });
                Round::Dropped
            }
        }
    }

    /// Serve commands, heartbeat and inbound frames until the connection
    /// drops (`Err`) or a shutdown is requested (`Ok`).
    async fn pump(
        &mut self,
        connection: &mut Connection,
        subscribed: &mut HashSet<String>,
    ) -> Result<(), String> {
        let period = self.backoff.config().heartbeat_period();
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Control { topic, subscribing }) => {
                        send_control(connection, subscribed, topic, subscribing)
                            .map_err(|e| e.to_string())?;
                    }
                    Some(Command::Shutdown) | None => return Ok(()),
                },
                _ = heartbeat.tick() => {
                    debug!("Sending heartbeat ping");
                    connection.send(&ControlMessage::Ping).map_err(|e| e.to_string())?;
                }
                frame = connection.inbound.recv() => match frame {
                    Some(Ok(text)) => {
                        self.dispatcher.dispatch_text(&text);
                    }
                    Some(Err(e)) => return Err(e.to_string()),
                    None => return Err("connection closed".to_string()),
                },
            }
        }
    }

    /// Send a subscribe frame for every registered topic.
    fn resubscribe_all(
        &self,
        connection: &Connection,
        subscribed: &mut HashSet<String>,
    ) -> Result<(), WsError> {
        subscribed.clear();
        let topics = self.registry.lock().all_topics();

        for topic in topics {
            send_control(connection, subscribed, topic, true)?;
        }

        info!(topics = subscribed.len(), "Resubscribed to topics");
        self.lifecycle.emit(LifecycleEvent::Resubscribed {
            topics: subscribed.len(),
        });
        Ok(())
    }

    /// Wait out a backoff delay. Returns `true` if shutdown was requested.
    async fn sleep_or_shutdown(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return false,
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Control { .. }) => {}
                    Some(Command::Shutdown) | None => return true,
                },
            }
        }
    }

    async fn idle_until_shutdown(&mut self) {
        while let Some(cmd) = self.cmd_rx.recv().await {
            if let Command::Shutdown = cmd {
                break;
            }
        }
    }
}

/// Send one control frame unless the connection already reflects it.
fn send_control(
    connection: &Connection,
    subscribed: &mut HashSet<String>,
    topic: String,
    subscribing: bool,
) -> Result<(), WsError> {
    let needed = if subscribing {
        !subscribed.contains(&topic)
    } else {
        subscribed.contains(&topic)
    };
    if !needed {
        debug!(channel = %topic, subscribing = subscribing, "Control frame already reflected");
        return Ok(());
    }

    let message = ControlMessage::for_topic(&topic, subscribing);
    connection.send(&message)?;
    metrics::inc_control_sent(message.kind());
    debug!(channel = %topic, kind = message.kind(), "Sent control frame");

    if subscribing {
        subscribed.insert(topic);
    } else {
        subscribed.remove(&topic);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::registry::ChannelRegistry;
    use crate::transport::mock::MockConnector;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    fn registry() -> SharedRegistry {
        Arc::new(parking_lot::Mutex::new(ChannelRegistry::new()))
    }

    fn fast_reconnect() -> ReconnectConfig {
        ReconnectConfig {
            jitter_ms: 0,
            ..Default::default()
        }
    }

    fn add_topic(registry: &SharedRegistry, topic: &str) {
        registry.lock().add_listener(topic, Arc::new(|_: &Value| {}));
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribes_registered_topics_on_connect() {
        let registry = registry();
        add_topic(&registry, "odds.7");
        add_topic(&registry, "market.7");

        let connector = MockConnector::new();
        let source = WebSocketSource::with_connector(
            "ws://mock",
            fast_reconnect(),
            Arc::clone(&registry),
            Arc::new(connector.clone()),
        );
        source.start();

        let mut server = connector.accept().await;
        let frames = server.settle_and_drain().await;

        assert_eq!(
            MockConnector::control_topics(&frames, "subscribe"),
            vec!["market.7", "odds.7"]
        );
        assert_eq!(source.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_subscribe_requests_send_one_frame() {
        let registry = registry();
        let connector = MockConnector::new();
        let source = WebSocketSource::with_connector(
            "ws://mock",
            fast_reconnect(),
            Arc::clone(&registry),
            Arc::new(connector.clone()),
        );
        source.start();
        let mut server = connector.accept().await;
        server.settle_and_drain().await;

        add_topic(&registry, "odds.7");
        source.send_control("odds.7", true);
        source.send_control("odds.7", true);
        source.send_control("liquidity.7", false);

        let frames = server.settle_and_drain().await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "subscribe");
        assert_eq!(frames[0]["channel"], "odds.7");
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_pings_every_interval() {
        let connector = MockConnector::new();
        let source = WebSocketSource::with_connector(
            "ws://mock",
            fast_reconnect(),
            registry(),
            Arc::new(connector.clone()),
        );
        source.start();
        let mut server = connector.accept().await;
        server.settle_and_drain().await;

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(server.settle_and_drain().await.is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let frames = server.settle_and_drain().await;
        assert_eq!(frames, vec![json!({"type": "ping"})]);

        tokio::time::sleep(Duration::from_secs(30)).await;
        let frames = server.settle_and_drain().await;
        assert_eq!(frames, vec![json!({"type": "ping"})]);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_heartbeat_keeps_the_actor_alive() {
        let registry = registry();
        let connector = MockConnector::new();
        let source = WebSocketSource::with_connector(
            "ws://mock",
            ReconnectConfig {
                jitter_ms: 0,
                heartbeat_interval: Duration::ZERO,
                ..Default::default()
            },
            Arc::clone(&registry),
            Arc::new(connector.clone()),
        );
        source.start();
        let mut server = connector.accept().await;
        server.settle_and_drain().await;

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let frames = server.settle_and_drain().await;
        assert_eq!(frames, vec![json!({"type": "ping"})]);

        add_topic(&registry, "odds.7");
        source.send_control("odds.7", true);
        let frames = server.settle_and_drain().await;
        assert_eq!(MockConnector::control_topics(&frames, "subscribe"), vec!["odds.7"]);
        assert_eq!(source.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_and_resubscribes_after_drop() {
        let registry = registry();
        add_topic(&registry, "odds.7");
        add_topic(&registry, "status.7");

        let connector = MockConnector::new();
        let source = WebSocketSource::with_connector(
            "ws://mock",
            fast_reconnect(),
            Arc::clone(&registry),
            Arc::new(connector.clone()),
        );
        let mut events = source.events();
        source.start();

        let mut first = connector.accept().await;
        first.settle_and_drain().await;
        first.disconnect();

        let mut second = connector.accept().await;
        let frames = second.settle_and_drain().await;

        assert_eq!(
            MockConnector::control_topics(&frames, "subscribe"),
            vec!["odds.7", "status.7"]
        );
        assert_eq!(connector.attempts(), 2);

        let mut scheduled = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let LifecycleEvent::ReconnectScheduled { attempt, delay } = event {
                scheduled.push((attempt, delay));
            }
        }
        assert_eq!(scheduled, vec![(1, Duration::from_millis(1000))]);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let connector = MockConnector::new();
        connector.fail_always();

        let source = WebSocketSource::with_connector(
            "ws://mock",
            fast_reconnect(),
            registry(),
            Arc::new(connector.clone()),
        );
        let mut events = source.events();
        source.start();

        // Far beyond the whole backoff schedule.
        tokio::time::sleep(Duration::from_secs(3600)).await;

        assert_eq!(connector.attempts(), 10);

        let mut delays = Vec::new();
        let mut exhausted = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                LifecycleEvent::ReconnectScheduled { delay, .. } => {
                    delays.push(delay.as_millis() as u64)
                }
                LifecycleEvent::ReconnectsExhausted { attempts } => {
                    assert_eq!(attempts, 10);
                    exhausted += 1;
                }
                _ => {}
            }
        }

        assert_eq!(
            delays,
            vec![1000, 2000, 4000, 8000, 16000, 30000, 30000, 30000, 30000]
        );
        assert_eq!(exhausted, 1);
        assert_eq!(source.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn control_while_disconnected_is_not_replayed() {
        let registry = registry();
        let connector = MockConnector::new();
        connector.fail_next(1);

        let source = WebSocketSource::with_connector(
            "ws://mock",
            fast_reconnect(),
            Arc::clone(&registry),
            Arc::new(connector.clone()),
        );
        source.start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(source.state(), ConnectionState::Disconnected);

        // Subscribed and unsubscribed again before the reconnect.
        source.send_control("odds.7", true);
        source.send_control("odds.7", false);
        add_topic(&registry, "market.7");
        source.send_control("market.7", true);

        let mut server = connector.accept().await;
        let frames = server.settle_and_drain().await;

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "subscribe");
        assert_eq!(frames[0]["channel"], "market.7");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_closes_connection_and_is_terminal() {
        let connector = MockConnector::new();
        let source = WebSocketSource::with_connector(
            "ws://mock",
            fast_reconnect(),
            registry(),
            Arc::new(connector.clone()),
        );
        source.start();
        let mut server = connector.accept().await;

        source.stop();
        assert_eq!(source.state(), ConnectionState::Disconnected);
        assert!(server.wait_closed().await);

        source.start();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent() {
        let connector = MockConnector::new();
        let source = WebSocketSource::with_connector(
            "ws://mock",
            fast_reconnect(),
            registry(),
            Arc::new(connector.clone()),
        );
        source.start();
        source.start();
        let _server = connector.accept().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_frames_reach_listeners() {
        let registry = registry();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry.lock().add_listener(
            "odds.7",
            Arc::new(move |data: &Value| sink.lock().push(data.clone())),
        );

        let connector = MockConnector::new();
        let source = WebSocketSource::with_connector(
            "ws://mock",
            fast_reconnect(),
            Arc::clone(&registry),
            Arc::new(connector.clone()),
        );
        source.start();
        let mut server = connector.accept().await;

        server.push_text("garbage");
        server.push_text(r#"{"type":"pong"}"#);
        server.push_data("odds.7", json!({"x": 1}));
        server.push_data("odds.8", json!({"x": 2}));
        server.settle_and_drain().await;

        assert_eq!(*seen.lock(), vec![json!({"x": 1})]);
        assert_eq!(source.state(), ConnectionState::Connected);
    }
}
