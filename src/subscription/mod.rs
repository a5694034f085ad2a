//! Topic subscriptions.
//!
//! This module handles:
//! - Topic -> listener bookkeeping
//! - Fan-out of inbound messages with per-listener panic isolation
//! - The subscribe/unsubscribe API and its revocable handles
//! - Typed payloads for the market topics

pub mod dispatch;
pub mod facade;
pub mod registry;

pub use dispatch::{Dispatcher, SharedRegistry};
pub use facade::{payloads, SubscriptionHandle, Subscriptions};
pub use registry::{ChannelRegistry, Listener, ListenerId, Removal};
