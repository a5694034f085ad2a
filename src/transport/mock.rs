//! Mock connector for unit testing.
//!
//! This module provides a [`Connector`] that hands out in-memory
//! connections, so the WebSocket transport can be driven without a server.
//! Each accepted connection surfaces as a [`MockConnection`]: the server's
//! end, which can push frames and inspect what the client sent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::websocket::{Connection, Connector};
use crate::error::WsError;
use crate::utils::now_ms;

/// Configuration for mock connector behavior.
#[derive(Debug, Default)]
struct MockState {
    /// Number of `open` calls so far.
    attempts: usize,
    /// Fail this many upcoming attempts.
    fail_next: usize,
    /// Fail every attempt.
    fail_always: bool,
}

/// Mock connector for testing.
#[derive(Debug, Clone)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
    accepted_tx: mpsc::UnboundedSender<MockConnection>,
    accepted_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<MockConnection>>>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    /// Create a connector that accepts every attempt.
    pub fn new() -> Self {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            accepted_tx,
            accepted_rx: Arc::new(tokio::sync::Mutex::new(accepted_rx)),
        }
    }

    /// Refuse the next `n` attempts.
    pub fn fail_next(&self, n: usize) {
        self.state.lock().fail_next = n;
    }

    /// Refuse every attempt from now on.
    pub fn fail_always(&self) {
        self.state.lock().fail_always = true;
    }

    /// Accept attempts again.
    pub fn recover(&self) {
        let mut state = self.state.lock();
        state.fail_always = false;
        state.fail_next = 0;
    }

    /// Number of connection attempts made so far.
    pub fn attempts(&self) -> usize {
        self.state.lock().attempts
    }

    /// Wait for the next accepted connection.
    ///
    /// # Panics
    ///
    /// Panics if the accept queue is closed, which cannot happen while this
    /// connector is alive.
    pub async fn accept(&self) -> MockConnection {
        self.accepted_rx
            .lock()
            .await
            .recv()
            .await
            .expect("mock accept queue closed")
    }

    /// Channels of the control frames of type `kind` in `frames`, in order.
    pub fn control_topics(frames: &[Value], kind: &str) -> Vec<String> {
        frames
            .iter()
            .filter(|f| f["type"] == kind)
            .filter_map(|f| f["channel"].as_str().map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, _url: &str) -> Result<Connection, WsError> {
        {
            let mut state = self.state.lock();
            state.attempts += 1;

            if state.fail_always {
                return Err(WsError::ConnectionFailed("mock connection refused".to_string()));
            }
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(WsError::ConnectionFailed("mock connection refused".to_string()));
            }
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let _ = self.accepted_tx.send(MockConnection {
            sent: outbound_rx,
            inbound: inbound_tx,
        });

        Ok(Connection::new(outbound_tx, inbound_rx))
    }
}

/// Server side of a mock connection.
#[derive(Debug)]
pub struct MockConnection {
    sent: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<Result<String, WsError>>,
}

impl MockConnection {
    /// Deliver a raw text frame to the client.
    pub fn push_text(&self, text: &str) {
        let _ = self.inbound.send(Ok(text.to_string()));
    }

    /// Deliver a data envelope for `channel`.
    pub fn push_data(&self, channel: &str, data: Value) {
        let frame = json!({
            "type": "data",
            "channel": channel,
            "data": data,
            "timestamp": now_ms(),
        });
        self.push_text(&frame.to_string());
    }

    /// Report a transport error to the client, ending the connection.
    pub fn push_error(&self, error: WsError) {
        let _ = self.inbound.send(Err(error));
    }

    /// Drop the connection from the server side.
    pub fn disconnect(self) {
        drop(self);
    }

    /// Let the client catch up, then return every frame it sent, decoded.
    pub async fn settle_and_drain(&mut self) -> Vec<Value> {
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut frames = Vec::new();
        while let Ok(text) = self.sent.try_recv() {
            if let Ok(value) = serde_json::from_str(&text) {
                frames.push(value);
            }
        }
        frames
    }

    /// Wait until the client closes its end. `false` on timeout.
    pub async fn wait_closed(&mut self) -> bool {
        let closed = async {
            while self.sent.recv().await.is_some() {}
        };
        tokio::time::timeout(Duration::from_secs(5), closed)
            .await
            .is_ok()
    }
}
