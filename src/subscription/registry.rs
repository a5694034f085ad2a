//! Topic -> listener bookkeeping.
//!
//! Pure in-memory state: no I/O, no locking. Callers share it behind a
//! mutex and decide what to send based on the transitions reported here.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use smallvec::SmallVec;

/// Callback invoked with the `data` field of every message on its topic.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Opaque identifier returned by [`ChannelRegistry::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

impl ListenerId {
    fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Outcome of [`ChannelRegistry::remove_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// No listener with that id on that topic.
    NotFound,
    /// Listener removed; the topic still has listeners.
    Removed,
    /// Listener removed and it was the last one; the topic is gone.
    TopicEmptied,
}

struct Entry {
    id: ListenerId,
    listener: Listener,
}

/// Most topics have one or two listeners (a page and a widget).
type Entries = SmallVec<[Entry; 2]>;

/// Maps topics to their registered listeners.
///
/// Invariant: a topic is present iff it has at least one listener.
#[derive(Default)]
pub struct ChannelRegistry {
    topics: BTreeMap<String, Entries>,
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.topics.iter().map(|(t, e)| (t, e.len())))
            .finish()
    }
}

impl ChannelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener to `topic`, creating the topic if needed.
    ///
    /// Returns the new id and whether this was the topic's first listener.
    pub fn add_listener(&mut self, topic: &str, listener: Listener) -> (ListenerId, bool) {
        let id = ListenerId::next();
        let entries = self.topics.entry(topic.to_string()).or_default();
        let first = entries.is_empty();
        entries.push(Entry { id, listener });
        (id, first)
    }

    /// Remove one listener. Drops the topic when it was the last one.
    pub fn remove_listener(&mut self, topic: &str, id: ListenerId) -> Removal {
        let Some(entries) = self.topics.get_mut(topic) else {
            return Removal::NotFound;
        };

        let Some(index) = entries.iter().position(|e| e.id == id) else {
            return Removal::NotFound;
        };

        entries.remove(index);

        if entries.is_empty() {
            self.topics.remove(topic);
            Removal::TopicEmptied
        } else {
            Removal::Removed
        }
    }

    /// Snapshot of the listeners for `topic`, in registration order.
    pub fn listeners_for(&self, topic: &str) -> Vec<Listener> {
        self.topics
            .get(topic)
            .map(|entries| entries.iter().map(|e| Arc::clone(&e.listener)).collect())
            .unwrap_or_default()
    }

    /// Every topic with at least one listener, sorted.
    pub fn all_topics(&self) -> Vec<String> {
        self.topics.keys().cloned().collect()
    }

    /// Whether `topic` currently has listeners.
    pub fn contains(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    /// Number of topics with listeners.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Number of listeners on `topic`.
    pub fn listener_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|e| e.len()).unwrap_or(0)
    }

    /// Drop every topic and listener.
    pub fn clear(&mut self) {
        self.topics.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn noop() -> Listener {
        Arc::new(|_: &Value| {})
    }

    #[test]
    fn first_listener_is_reported() {
        let mut registry = ChannelRegistry::new();

        let (_, first) = registry.add_listener("odds.7", noop());
        assert!(first);

        let (_, first) = registry.add_listener("odds.7", noop());
        assert!(!first);

        let (_, first) = registry.add_listener("market.7", noop());
        assert!(first);

        assert_eq!(registry.topic_count(), 2);
        assert_eq!(registry.listener_count("odds.7"), 2);
    }

    #[test]
    fn removing_last_listener_drops_topic() {
        let mut registry = ChannelRegistry::new();
        let (a, _) = registry.add_listener("odds.7", noop());
        let (b, _) = registry.add_listener("odds.7", noop());

        assert_eq!(registry.remove_listener("odds.7", a), Removal::Removed);
        assert!(registry.contains("odds.7"));

        assert_eq!(registry.remove_listener("odds.7", b), Removal::TopicEmptied);
        assert!(!registry.contains("odds.7"));
        assert!(registry.all_topics().is_empty());
    }

    #[test]
    fn removing_unknown_listener_is_not_found() {
        let mut registry = ChannelRegistry::new();
        let (a, _) = registry.add_listener("odds.7", noop());

        assert_eq!(registry.remove_listener("market.7", a), Removal::NotFound);
        assert_eq!(registry.remove_listener("odds.7", a), Removal::TopicEmptied);
        assert_eq!(registry.remove_listener("odds.7", a), Removal::NotFound);
    }

    #[test]
    fn listeners_are_returned_in_registration_order() {
        let mut registry = ChannelRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for label in ["a", "b", "c"] {
            let seen = Arc::clone(&seen);
            registry.add_listener(
                "odds.7",
                Arc::new(move |_: &Value| seen.lock().push(label)),
            );
        }

        for listener in registry.listeners_for("odds.7") {
            listener(&Value::Null);
        }

        assert_eq!(*seen.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn unknown_topic_has_no_listeners() {
        let registry = ChannelRegistry::new();
        assert!(registry.listeners_for("status.1").is_empty());
        assert_eq!(registry.listener_count("status.1"), 0);
    }

    #[test]
    fn all_topics_lists_each_topic_once() {
        let mut registry = ChannelRegistry::new();
        registry.add_listener("odds.7", noop());
        registry.add_listener("odds.7", noop());
        registry.add_listener("liquidity.7", noop());

        assert_eq!(registry.all_topics(), vec!["liquidity.7", "odds.7"]);

        registry.clear();
        assert_eq!(registry.topic_count(), 0);
    }
}
