//! Public subscribe/unsubscribe API.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::dispatch::SharedRegistry;
use super::registry::{ListenerId, Removal};
use crate::transport::MessageSource;

struct Inner {
    registry: SharedRegistry,
    source: Arc<dyn MessageSource>,
}

/// Maps listeners onto server-side topic subscriptions.
///
/// Any number of listeners may share a topic; the source is asked for a
/// subscribe frame only on the first and an unsubscribe frame only when the
/// last one leaves.
#[derive(Clone)]
pub struct Subscriptions {
    inner: Arc<Inner>,
}

impl fmt::Debug for Subscriptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriptions")
            .field("registry", &*self.inner.registry.lock())
            .field("source", &self.inner.source.kind())
            .finish()
    }
}

impl Subscriptions {
    /// Bind a registry to the source that serves it.
    pub fn new(registry: SharedRegistry, source: Arc<dyn MessageSource>) -> Self {
        Self {
            inner: Arc::new(Inner { registry, source }),
        }
    }

    /// Register `listener` for every message on `topic`.
    ///
    /// Never blocks on the network. The returned handle removes exactly this
    /// listener.
    pub fn subscribe<F>(&self, topic: &str, listener: F) -> SubscriptionHandle
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        // Hold the lock across the control request so frames are queued in
        // the same order as registry transitions.
        let mut registry = self.inner.registry.lock();
        let (id, first) = registry.add_listener(topic, Arc::new(listener));
        if first {
            debug!(channel = %topic, "First listener, subscribing");
            self.inner.source.send_control(topic, true);
        }
        drop(registry);

        SubscriptionHandle {
            topic: topic.to_string(),
            id,
            inner: Arc::clone(&self.inner),
            active: AtomicBool::new(true),
        }
    }

    /// Like [`subscribe`](Self::subscribe), but decodes each payload into `T`.
    ///
    /// Payloads that do not decode are logged and skipped for this listener
    /// only.
    pub fn subscribe_typed<T, F>(&self, topic: &str, listener: F) -> SubscriptionHandle
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        let channel = topic.to_string();
        self.subscribe(topic, move |data| match T::deserialize(data) {
            Ok(payload) => listener(payload),
            Err(e) => warn!(
                channel = %channel,
                error = %e,
                payload_type = std::any::type_name::<T>(),
                "Dropping payload that failed to decode"
            ),
        })
    }

    /// Topics with at least one listener, sorted.
    pub fn topics(&self) -> Vec<String> {
        self.inner.registry.lock().all_topics()
    }

    /// Listeners currently attached to `topic`.
    pub fn listener_count(&self, topic: &str) -> usize {
        self.inner.registry.lock().listener_count(topic)
    }

    /// The source control requests go to.
    pub fn source(&self) -> &Arc<dyn MessageSource> {
        &self.inner.source
    }

    pub(crate) fn registry(&self) -> &SharedRegistry {
        &self.inner.registry
    }
}

/// Revocable registration returned by [`Subscriptions::subscribe`].
///
/// Dropping the handle does not unsubscribe; call
/// [`unsubscribe`](Self::unsubscribe).
#[must_use = "keep the handle to be able to unsubscribe"]
pub struct SubscriptionHandle {
    topic: String,
    id: ListenerId,
    inner: Arc<Inner>,
    active: AtomicBool,
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl SubscriptionHandle {
    /// Topic this handle listens on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Listener id within the registry.
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Whether `unsubscribe` has not been called yet.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Remove this listener. Safe to call any number of times.
    ///
    /// When this was the topic's last listener the source is asked to stop
    /// sending it.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }

        let mut registry = self.inner.registry.lock();
        match registry.remove_listener(&self.topic, self.id) {
            Removal::TopicEmptied => {
                debug!(channel = %self.topic, "Last listener left, unsubscribing");
                self.inner.source.send_control(&self.topic, false);
            }
            Removal::Removed => {}
            // Registry was cleared by shutdown.
            Removal::NotFound => {
                debug!(channel = %self.topic, listener = %self.id, "Listener already gone");
            }
        }
    }
}

/// Typed payloads pushed on the market topics.
pub mod payloads {
    use super::*;
    use rust_decimal::Decimal;
    use strum::{Display, EnumString};

    /// Topic carrying full market snapshots.
    pub fn market_topic(market_id: &str) -> String {
        format!("market.{}", market_id)
    }

    /// Topic carrying outcome odds changes.
    pub fn odds_topic(market_id: &str) -> String {
        format!("odds.{}", market_id)
    }

    /// Topic carrying status transitions.
    pub fn status_topic(market_id: &str) -> String {
        format!("status.{}", market_id)
    }

    /// Topic carrying pool liquidity.
    pub fn liquidity_topic(market_id: &str) -> String {
        format!("liquidity.{}", market_id)
    }

    /// Market lifecycle status.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Display, EnumString)]
    #[serde(rename_all = "lowercase")]
    #[strum(serialize_all = "lowercase")]
    pub enum MarketStatus {
        Scheduled,
        Live,
        Settled,
        Suspended,
    }

    /// New odds for one outcome. `odds.<id>` carries a list of these.
    #[derive(Debug, Clone, PartialEq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct OddsUpdate {
        pub outcome_id: String,
        pub odds: Decimal,
        pub timestamp: i64,
    }

    /// One price level of the liquidity book.
    #[derive(Debug, Clone, PartialEq, Deserialize)]
    pub struct DepthLevel {
        pub price: Decimal,
        pub size: Decimal,
    }

    /// Pool liquidity for a market.
    #[derive(Debug, Clone, PartialEq, Deserialize)]
    pub struct LiquidityData {
        pub total: Decimal,
        #[serde(default)]
        pub depth: Option<Vec<DepthLevel>>,
    }

    /// Outcome within a market snapshot.
    #[derive(Debug, Clone, PartialEq, Deserialize)]
    pub struct MarketOutcome {
        pub id: String,
        pub label: String,
        pub odds: Decimal,
    }

    /// Market snapshot pushed on `market.<id>`.
    #[derive(Debug, Clone, PartialEq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MarketUpdate {
        pub id: String,
        #[serde(default)]
        pub title: Option<String>,
        pub status: MarketStatus,
        #[serde(default)]
        pub top_odds: Option<Decimal>,
        #[serde(default)]
        pub liquidity: Option<Decimal>,
        #[serde(default)]
        pub outcomes: Vec<MarketOutcome>,
    }
}
