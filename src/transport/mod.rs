//! Transports that deliver inbound messages to the dispatcher.
//!
//! This module handles:
//! - The [`MessageSource`] capability shared by both transports
//! - Bidirectional WebSocket transport with reconnect and heartbeat
//! - Receive-only Server-Sent Events transport
//! - Wire envelopes and the reconnect policy
//! - Mock connector for testing

use std::fmt;
use std::time::Duration;

use strum::{Display, EnumString};
use tokio::sync::{broadcast, watch};

pub mod backoff;
pub mod mock;
pub mod protocol;
pub mod sse;
pub mod websocket;

pub use backoff::{Backoff, ReconnectConfig, ReconnectDecision};
pub use mock::{MockConnection, MockConnector};
pub use protocol::{ControlMessage, InboundMessage};
pub use sse::SseSource;
pub use websocket::{Connection, Connector, TungsteniteConnector, WebSocketSource};

/// Capacity of the lifecycle event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Connection state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected.
    Disconnected,
    /// Attempting to connect.
    Connecting,
    /// Connected and subscribed.
    Connected,
}

/// Which transport variant is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum SourceKind {
    /// Bidirectional WebSocket.
    #[strum(serialize = "websocket")]
    WebSocket,
    /// Receive-only Server-Sent Events.
    #[strum(serialize = "sse")]
    Sse,
}

/// Lifecycle notifications emitted by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Opening a connection; `attempt` is 1 for the first try after a
    /// success or at start-up.
    Connecting {
        /// Attempt number since the last successful connect.
        attempt: u32,
    },
    /// Connection is open.
    Connected,
    /// Subscriptions were re-sent after a connect.
    Resubscribed {
        /// Number of topics re-sent.
        topics: usize,
    },
    /// Connection closed or failed to open.
    Disconnected {
        /// Human-readable cause.
        reason: String,
    },
    /// A reconnect will be attempted after `delay` (jitter included).
    ReconnectScheduled {
        /// Consecutive failures so far.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// The attempt budget ran out; no further reconnects.
    ReconnectsExhausted {
        /// Consecutive failures that exhausted the budget.
        attempts: u32,
    },
    /// The transport was stopped explicitly.
    Stopped,
}

/// A source of inbound messages for the dispatcher.
///
/// `start`, `stop` and `send_control` never block; outcomes are reported
/// through [`MessageSource::state`] and [`MessageSource::events`].
pub trait MessageSource: Send + Sync + fmt::Debug {
    /// Which variant this is.
    fn kind(&self) -> SourceKind;

    /// Begin connecting. No-op if already started or stopped.
    fn start(&self);

    /// Tear down the connection. Terminal: a stopped source never restarts.
    fn stop(&self);

    /// Ask the server to start (`true`) or stop sending `topic`.
    /// Receive-only sources ignore this.
    fn send_control(&self, topic: &str, subscribing: bool);

    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Watch channel tracking the connection state.
    fn watch_state(&self) -> watch::Receiver<ConnectionState>;

    /// Subscribe to lifecycle events.
    fn events(&self) -> broadcast::Receiver<LifecycleEvent>;
}

/// State and event channels shared between a source handle and its task.
#[derive(Debug, Clone)]
pub(crate) struct Lifecycle {
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<LifecycleEvent>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { state, events }
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub(crate) fn emit(&self, event: LifecycleEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn state_and_kind_render_lowercase() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(
            ConnectionState::from_str("connecting").unwrap(),
            ConnectionState::Connecting
        );
        assert_eq!(SourceKind::WebSocket.to_string(), "websocket");
        assert_eq!(SourceKind::from_str("sse").unwrap(), SourceKind::Sse);
    }

    #[test]
    fn lifecycle_tracks_latest_state() {
        let lifecycle = Lifecycle::new();
        let watch = lifecycle.watch();
        assert_eq!(lifecycle.state(), ConnectionState::Disconnected);

        lifecycle.set_state(ConnectionState::Connected);
        assert_eq!(lifecycle.state(), ConnectionState::Connected);
        assert_eq!(*watch.borrow(), ConnectionState::Connected);
    }

    #[test]
    fn emit_without_receivers_is_harmless() {
        let lifecycle = Lifecycle::new();
        lifecycle.emit(LifecycleEvent::Connected);

        let mut rx = lifecycle.subscribe();
        lifecycle.emit(LifecycleEvent::Stopped);
        assert_eq!(rx.try_recv().unwrap(), LifecycleEvent::Stopped);
    }
}
