//! Reconnect policy: exponential backoff with jitter and an attempt ceiling.

use std::time::Duration;

use rand::Rng;

use crate::config::Config;

/// Shortest heartbeat period the transport will run with.
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Reconnection configuration for the WebSocket transport.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial backoff delay in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum backoff delay in milliseconds (before jitter).
    pub max_delay_ms: u64,
    /// Backoff multiplier (e.g., 2.0 for exponential).
    pub backoff_multiplier: f64,
    /// Upper bound of the random jitter in milliseconds.
    pub jitter_ms: u64,
    /// Consecutive failures after which reconnection stops.
    pub max_attempts: u32,
    /// Heartbeat interval.
    pub heartbeat_interval: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_ms: 1000,
            max_attempts: 10,
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

impl ReconnectConfig {
    /// Create from config values.
    pub fn from_config(config: &Config) -> Self {
        Self {
            initial_delay_ms: config.ws_reconnect_base_delay_ms,
            max_delay_ms: config.ws_reconnect_max_delay_ms,
            jitter_ms: config.ws_reconnect_jitter_ms,
            max_attempts: config.ws_reconnect_max_attempts,
            heartbeat_interval: Duration::from_secs(config.ws_heartbeat_interval_s)
                .max(MIN_HEARTBEAT_INTERVAL),
            ..Default::default()
        }
    }

    /// Heartbeat period, never shorter than [`MIN_HEARTBEAT_INTERVAL`].
    pub fn heartbeat_period(&self) -> Duration {
        self.heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL)
    }

    /// Pre-jitter delay for the given zero-based attempt.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let clamped_ms = delay_ms.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(clamped_ms)
    }

    /// Random jitter in `[0, jitter_ms]`.
    pub fn jitter(&self) -> Duration {
        if self.jitter_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=self.jitter_ms))
    }
}

/// What to do after a failed or dropped connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Try again after this (pre-jitter) delay.
    Retry {
        /// Consecutive failures so far.
        attempt: u32,
        /// Delay before the next attempt.
        delay: Duration,
    },
    /// Budget just ran out. Reported once.
    GiveUp {
        /// Consecutive failures that exhausted the budget.
        attempts: u32,
    },
    /// Budget already exhausted earlier.
    Exhausted,
}

/// Consecutive-failure counter driving [`ReconnectConfig::next_delay`].
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    failures: u32,
    exhausted: bool,
}

impl Backoff {
    /// Create a fresh counter.
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            failures: 0,
            exhausted: false,
        }
    }

    /// Record a failure and decide whether to retry.
    pub fn on_failure(&mut self) -> ReconnectDecision {
        if self.exhausted {
            return ReconnectDecision::Exhausted;
        }

        self.failures = self.failures.saturating_add(1);

        if self.failures >= self.config.max_attempts {
            self.exhausted = true;
            return ReconnectDecision::GiveUp {
                attempts: self.failures,
            };
        }

        ReconnectDecision::Retry {
            attempt: self.failures,
            delay: self.config.next_delay(self.failures - 1),
        }
    }

    /// Successful connect: back to the base delay.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Consecutive failures since the last successful connect.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Whether the attempt budget has run out.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// The policy this counter follows.
    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }
}
