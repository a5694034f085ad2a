//! Real-time market subscription client.
//!
//! Keeps previously fetched market data fresh by listening to push updates
//! on topics such as `odds.<marketId>` or `status.<marketId>`.
//!
//! ```text
//! subscribe(topic, f) ──► registry ──(first listener)──► subscribe frame
//!                             ▲
//! socket / event stream ──► dispatcher ──► every listener on `channel`
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Unified error types
//! - [`client`]: The shared client context
//! - [`subscription`]: Registry, dispatch and the subscribe API
//! - [`transport`]: WebSocket and SSE message sources
//! - [`api`]: HTTP API for health/status/metrics
//! - [`metrics`]: Prometheus metrics
//! - [`utils`]: Utility functions

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod subscription;
pub mod transport;
pub mod utils;

pub use client::RealtimeClient;
pub use config::Config;
pub use error::{RealtimeError, Result};
pub use subscription::{SubscriptionHandle, Subscriptions};
pub use transport::{ConnectionState, LifecycleEvent, MessageSource, SourceKind};
