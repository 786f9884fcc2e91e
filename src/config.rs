use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level client configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base url of the http api, e.g. `http://localhost:1619/`.
    pub server_url: String,
    /// Websocket endpoint.
    pub ws_url: String,
    /// Sent as `X-AuthKey` on fetches and in the watch message on connect.
    pub auth_key: Option<String>,
    pub client_id: Option<String>,
    /// Upper bound for a full-reload fetch. The engine sets none by default.
    pub fetch_timeout_ms: Option<u64>,
    pub transport: TransportConfig,
    pub terminal: TerminalConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:1619/".to_string(),
            ws_url: "ws://localhost:1623/ws".to_string(),
            auth_key: None,
            client_id: None,
            fetch_timeout_ms: None,
            transport: TransportConfig::default(),
            terminal: TerminalConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading {}: {}", path.display(), e))?;
        let config = Self::from_json(&text)
            .map_err(|e| anyhow::anyhow!("parsing {}: {}", path.display(), e))?;
        Ok(config)
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_ms.map(Duration::from_millis)
    }
}

/// Reconnect, pacing and heartbeat settings for the duplex transport.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Delay before attempt `n` is entry `n - 1`, clamped to the last entry.
    pub reconnect_schedule_secs: Vec<u64>,
    /// Failures tolerated before the transport gives up.
    pub max_reconnect_attempts: u32,
    /// One queued message is sent per tick after (re)connecting.
    pub pacing_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub connect_timeout_ms: u64,
    /// Fail outstanding requests when the connection drops instead of
    /// carrying them over to the next connection.
    pub fail_pending_on_disconnect: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reconnect_schedule_secs: vec![0, 0, 2, 5, 10, 10, 30, 60],
            max_reconnect_attempts: 20,
            pacing_interval_ms: 100,
            heartbeat_interval_ms: 5000,
            connect_timeout_ms: 10_000,
            fail_pending_on_disconnect: true,
        }
    }
}

impl TransportConfig {
    pub fn pacing_interval(&self) -> Duration {
        Duration::from_millis(self.pacing_interval_ms.max(1))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Per-session terminal settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    pub cols: u16,
    pub rows: u16,
    pub scrollback: usize,
    /// Pause between a reload fetch completing and its payload being applied.
    pub settle_delay_ms: u64,
    pub initial_buffer_capacity: usize,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            cols: 80,
            rows: 25,
            scrollback: crate::terminal::emulator::DEFAULT_SCROLLBACK,
            settle_delay_ms: 0,
            initial_buffer_capacity: crate::buffer::DEFAULT_INITIAL_CAPACITY,
        }
    }
}

impl TerminalConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.transport.reconnect_schedule_secs, vec![0, 0, 2, 5, 10, 10, 30, 60]);
        assert_eq!(config.transport.max_reconnect_attempts, 20);
        assert!(config.transport.fail_pending_on_disconnect);
        assert!(config.fetch_timeout().is_none());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ClientConfig::from_json(
            r#"{"auth_key":"k","transport":{"max_reconnect_attempts":3},"terminal":{"rows":10}}"#,
        )
        .unwrap();
        assert_eq!(config.auth_key.as_deref(), Some("k"));
        assert_eq!(config.transport.max_reconnect_attempts, 3);
        assert_eq!(config.transport.pacing_interval_ms, 100);
        assert_eq!(config.terminal.rows, 10);
        assert_eq!(config.terminal.cols, 80);
    }

    #[test]
    fn test_load_missing_file() {
        let err = ClientConfig::load("/nonexistent/ptysync.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/ptysync.json"));
    }
}
