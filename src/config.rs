//! Configuration for the realtime client

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// WebSocket endpoint URL
    #[serde(default = "default_url")]
    pub url: String,

    /// Protocol/client version string appended to the connection URL
    #[serde(default = "default_version")]
    pub version: String,

    /// Access token presented at connect time
    #[serde(default)]
    pub token: Option<String>,

    /// Shared secret for HMAC-SHA256 URL signatures.
    /// When absent, a deterministic non-cryptographic fallback is used.
    #[serde(default)]
    pub signing_secret: Option<String>,

    /// Encrypt message payloads with the per-session key
    #[serde(default)]
    pub encryption_enabled: bool,

    /// Batch outgoing messages instead of writing each immediately
    #[serde(default = "default_true")]
    pub batching_enabled: bool,

    /// Compress batched payloads when beneficial
    #[serde(default)]
    pub compression_enabled: bool,

    /// Rename known payload keys to short forms on the wire
    #[serde(default)]
    pub minify_keys: bool,

    /// Maximum automatic reconnect attempts before giving up
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Initial reconnect delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Reconnect delay cap in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Ceiling on a single connection attempt, in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Interval between heartbeat pings, in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// How long to wait for a heartbeat ack before declaring the link dead
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,

    /// Smallest allowed batch size
    #[serde(default = "default_batch_min")]
    pub batch_min: usize,

    /// Largest allowed batch size
    #[serde(default = "default_batch_max")]
    pub batch_max: usize,

    /// Quiescence window before a partial batch is flushed, in milliseconds
    #[serde(default = "default_batch_window_ms")]
    pub batch_window_ms: u64,

    /// Inbound messages older than this are rejected (anti-replay)
    #[serde(default = "default_freshness_window_ms")]
    pub freshness_window_ms: u64,

    /// Tolerated clock skew for timestamps from the future, in milliseconds
    #[serde(default = "default_clock_skew_ms")]
    pub clock_skew_ms: u64,

    /// Token refresh endpoint; refresh is disabled when absent
    #[serde(default)]
    pub token_refresh_url: Option<String>,

    /// Refresh token exchanged for new access tokens
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Interval between token refreshes, in milliseconds
    #[serde(default = "default_token_refresh_interval_ms")]
    pub token_refresh_interval_ms: u64,
}

fn default_url() -> String {
    "ws://localhost:8080/realtime".to_string()
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    5_000
}

fn default_batch_min() -> usize {
    2
}

fn default_batch_max() -> usize {
    50
}

fn default_batch_window_ms() -> u64 {
    100
}

fn default_freshness_window_ms() -> u64 {
    300_000
}

fn default_clock_skew_ms() -> u64 {
    1_000
}

fn default_token_refresh_interval_ms() -> u64 {
    25 * 60 * 1_000
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            version: default_version(),
            token: None,
            signing_secret: None,
            encryption_enabled: false,
            batching_enabled: true,
            compression_enabled: false,
            minify_keys: false,
            max_reconnect_attempts: default_max_reconnect_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            batch_min: default_batch_min(),
            batch_max: default_batch_max(),
            batch_window_ms: default_batch_window_ms(),
            freshness_window_ms: default_freshness_window_ms(),
            clock_skew_ms: default_clock_skew_ms(),
            token_refresh_url: None,
            refresh_token: None,
            token_refresh_interval_ms: default_token_refresh_interval_ms(),
        }
    }
}

impl RealtimeConfig {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    pub fn token_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.token_refresh_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = RealtimeConfig::default();
        assert_eq!(config.max_reconnect_attempts, 10);
        assert_eq!(config.initial_backoff_ms, 1_000);
        assert_eq!(config.max_backoff_ms, 30_000);
        assert!(config.batching_enabled);
        assert!(!config.encryption_enabled);
        assert!(config.batch_min <= config.batch_max);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: RealtimeConfig =
            toml::from_str("url = \"wss://realtime.paddock.example/ws\"").unwrap();
        assert_eq!(config.url, "wss://realtime.paddock.example/ws");
        assert_eq!(config.heartbeat_interval_ms, 30_000);
        assert_eq!(config.freshness_window_ms, 300_000);
    }

    #[test]
    fn toml_round_trip() {
        let mut config = RealtimeConfig::default();
        config.token = Some("abc".into());
        config.max_reconnect_attempts = 3;
        let text = toml::to_string_pretty(&config).unwrap();
        let back: RealtimeConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.token.as_deref(), Some("abc"));
        assert_eq!(back.max_reconnect_attempts, 3);
    }
}
