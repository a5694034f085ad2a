//! Fan-out of inbound messages to registered listeners.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, trace};

use super::registry::ChannelRegistry;
use crate::metrics;
use crate::transport::protocol::{decode_inbound, InboundMessage};

/// Shared handle to the registry.
pub type SharedRegistry = Arc<Mutex<ChannelRegistry>>;

/// Routes decoded envelopes to every listener on their channel.
///
/// Both transports feed the same dispatcher, so delivery semantics do not
/// depend on which one is active.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: SharedRegistry,
    source: &'static str,
}

impl Dispatcher {
    /// Create a dispatcher over `registry`, labelled with the transport name.
    pub fn new(registry: SharedRegistry, source: &'static str) -> Self {
        Self { registry, source }
    }

    /// Decode and dispatch one raw text frame.
    ///
    /// Undecodable frames are logged and dropped. Returns the number of
    /// listeners invoked.
    pub fn dispatch_text(&self, text: &str) -> usize {
        match decode_inbound(text) {
            Ok(message) => self.dispatch(&message),
            Err(e) => {
                metrics::inc_messages_dropped();
                error!(source = self.source, error = %e, "Failed to parse inbound message");
                0
            }
        }
    }

    /// Dispatch a decoded envelope. Heartbeat replies are ignored.
    pub fn dispatch(&self, message: &InboundMessage) -> usize {
        if message.is_pong() {
            trace!(source = self.source, "Received pong");
            return 0;
        }

        metrics::inc_messages_received(self.source);
        let _timer = metrics::timer_dispatch();

        // Snapshot so listeners may (un)subscribe without deadlocking.
        let listeners = self.registry.lock().listeners_for(&message.channel);
        if listeners.is_empty() {
            debug!(source = self.source, channel = %message.channel, "No listeners for channel");
            return 0;
        }

        let mut delivered = 0;
        for listener in &listeners {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener(&message.data)));
            match outcome {
                Ok(()) => delivered += 1,
                Err(cause) => {
                    metrics::inc_listener_panics();
                    error!(
                        source = self.source,
                        channel = %message.channel,
                        panic = %panic_message(&*cause),
                        "Subscription listener panicked"
                    );
                }
            }
        }

        delivered
    }
}

fn panic_message(cause: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = cause.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = cause.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
