use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables shared by all adapters
///
/// Every field has a default matching what the devices tolerate in practice,
/// so a partial JSON document deserializes into a usable configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdapterConfig {
    /// Timeout of a single HTTP request
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Timeout of the detection request
    #[serde(default = "default_detect_timeout_ms")]
    pub detect_timeout_ms: u64,

    /// How long a vendor login stays valid
    #[serde(default = "default_session_ttl_ms")]
    pub session_ttl_ms: u64,

    /// Minimum spacing between JSON-config requests
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    /// Requests allowed back to back before spacing kicks in
    #[serde(default = "default_rate_burst")]
    pub rate_burst: u32,

    /// WebSocket-RPC port
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,

    #[serde(default = "default_ws_connect_timeout_ms")]
    pub ws_connect_timeout_ms: u64,

    /// Read deadline for each WebSocket reply
    #[serde(default = "default_ws_read_timeout_ms")]
    pub ws_read_timeout_ms: u64,

    /// Requests that may wait in the multiplexer queue
    #[serde(default = "default_ws_queue_depth")]
    pub ws_queue_depth: usize,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_detect_timeout_ms() -> u64 {
    5_000
}

fn default_session_ttl_ms() -> u64 {
    120_000
}

fn default_request_delay_ms() -> u64 {
    250
}

fn default_rate_burst() -> u32 {
    1
}

fn default_ws_port() -> u16 {
    543
}

fn default_ws_connect_timeout_ms() -> u64 {
    3_000
}

fn default_ws_read_timeout_ms() -> u64 {
    5_000
}

fn default_ws_queue_depth() -> usize {
    32
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            detect_timeout_ms: default_detect_timeout_ms(),
            session_ttl_ms: default_session_ttl_ms(),
            request_delay_ms: default_request_delay_ms(),
            rate_burst: default_rate_burst(),
            ws_port: default_ws_port(),
            ws_connect_timeout_ms: default_ws_connect_timeout_ms(),
            ws_read_timeout_ms: default_ws_read_timeout_ms(),
            ws_queue_depth: default_ws_queue_depth(),
        }
    }
}

impl AdapterConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn detect_timeout(&self) -> Duration {
        Duration::from_millis(self.detect_timeout_ms)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_millis(self.session_ttl_ms)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn ws_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.ws_connect_timeout_ms)
    }

    pub fn ws_read_timeout(&self) -> Duration {
        Duration::from_millis(self.ws_read_timeout_ms)
    }
}
