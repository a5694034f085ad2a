//! Application configuration loaded from environment variables.

use serde::{Deserialize, Deserializer};
use url::Url;

use crate::error::RealtimeError;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Endpoints ===
    /// WebSocket endpoint for the bidirectional transport.
    #[serde(default = "default_ws_url")]
    pub realtime_ws_url: String,

    /// Server-Sent Events endpoint for the receive-only transport.
    #[serde(default)]
    pub realtime_sse_url: Option<String>,

    /// Origin used to derive the SSE endpoint when none is configured.
    #[serde(default = "default_app_origin")]
    pub app_origin: String,

    /// Select the SSE transport. Any casing of "true" enables it.
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub use_sse: bool,

    // === Reconnection ===
    /// Delay before the first reconnect attempt.
    #[serde(default = "default_base_delay_ms")]
    pub ws_reconnect_base_delay_ms: u64,

    /// Upper bound for the backoff delay (before jitter).
    #[serde(default = "default_max_delay_ms")]
    pub ws_reconnect_max_delay_ms: u64,

    /// Upper bound of the random jitter added to every delay.
    #[serde(default = "default_jitter_ms")]
    pub ws_reconnect_jitter_ms: u64,

    /// Consecutive failures after which reconnection stops for good.
    #[serde(default = "default_max_attempts")]
    pub ws_reconnect_max_attempts: u32,

    /// Interval between ping frames while connected.
    #[serde(default = "default_heartbeat_s")]
    pub ws_heartbeat_interval_s: u64,

    // === Server Configuration ===
    /// HTTP server port for health/metrics endpoints.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub rust_log: String,

    /// Enable verbose logging.
    #[serde(default)]
    pub verbose: bool,
}

fn default_ws_url() -> String {
    "wss://api.azuro.org/ws".to_string()
}

fn default_app_origin() -> String {
    "http://localhost:8080".to_string()
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter_ms() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    10
}

fn default_heartbeat_s() -> u64 {
    30
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Lenient boolean: only a case-insensitive "true" counts.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(raw.trim().eq_ignore_ascii_case("true"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            realtime_ws_url: default_ws_url(),
            realtime_sse_url: None,
            app_origin: default_app_origin(),
            use_sse: false,
            ws_reconnect_base_delay_ms: default_base_delay_ms(),
            ws_reconnect_max_delay_ms: default_max_delay_ms(),
            ws_reconnect_jitter_ms: default_jitter_ms(),
            ws_reconnect_max_attempts: default_max_attempts(),
            ws_heartbeat_interval_s: default_heartbeat_s(),
            port: default_port(),
            rust_log: default_log_level(),
            verbose: false,
        }
    }
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Load and validate in one step.
    pub fn load_validated() -> crate::Result<Self> {
        let config = Self::load()?;
        config.validate().map_err(RealtimeError::InvalidConfig)?;
        Ok(config)
    }

    /// Check if the configuration is valid.
    pub fn validate(&self) -> Result<(), String> {
        let ws = Url::parse(&self.realtime_ws_url)
            .map_err(|e| format!("REALTIME_WS_URL is not a valid URL: {}", e))?;
        if ws.scheme() != "ws" && ws.scheme() != "wss" {
            return Err("REALTIME_WS_URL must use ws:// or wss://".to_string());
        }

        // Only checked when it will actually be used; a bad SSE URL in
        // WebSocket mode is harmless.
        if self.use_sse {
            let sse = Url::parse(&self.sse_url())
                .map_err(|e| format!("SSE endpoint is not a valid URL: {}", e))?;
            if sse.scheme() != "http" && sse.scheme() != "https" {
                return Err("SSE endpoint must use http:// or https://".to_string());
            }
        }

        if self.ws_reconnect_max_attempts == 0 {
            return Err("WS_RECONNECT_MAX_ATTEMPTS must be at least 1".to_string());
        }

        if self.ws_reconnect_base_delay_ms > self.ws_reconnect_max_delay_ms {
            return Err(
                "WS_RECONNECT_BASE_DELAY_MS must not exceed WS_RECONNECT_MAX_DELAY_MS".to_string(),
            );
        }

        if self.ws_heartbeat_interval_s == 0 {
            return Err("WS_HEARTBEAT_INTERVAL_S must be at least 1".to_string());
        }

        Ok(())
    }

    /// Effective SSE endpoint: the configured one, or `<origin>/sse`.
    pub fn sse_url(&self) -> String {
        match &self.realtime_sse_url {
            Some(url) if !url.trim().is_empty() => url.clone(),
            _ => format!("{}/sse", self.app_origin.trim_end_matches('/')),
        }
    }
}
