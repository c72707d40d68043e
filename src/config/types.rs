use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::EventKind;

/// Root configuration container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

/// HTTP endpoint and session lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (host:port). Busy ports fall back to the next free one.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Path of the single exchange endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Cookie carrying the session token.
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,
    /// Idle sessions older than this are expired (default: 1800).
    #[serde(default = "default_session_ttl")]
    pub session_ttl_seconds: u64,
    /// How often the expiry sweeper runs (default: 60).
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    /// Grace period for in-flight exchanges on shutdown (default: 10).
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

/// Per-session task scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on the pending-wait hint while an external wait is
    /// outstanding (default: 1000).
    #[serde(default = "default_polling_timeout")]
    pub polling_timeout_ms: u64,
}

/// Remote client connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Transport timeout for one exchange (default: 30).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Delay before the next cycle after a transport error (default: 500).
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    /// Debounce window for keystrokes (default: 300).
    #[serde(default = "default_text_throttle")]
    pub text_throttle_ms: u64,
    /// Debounce window for resize events (default: 200).
    #[serde(default = "default_resize_throttle")]
    pub resize_throttle_ms: u64,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8090".to_string()
}

fn default_endpoint() -> String {
    "/ui".to_string()
}

fn default_session_cookie() -> String {
    "LWSESSION".to_string()
}

fn default_session_ttl() -> u64 {
    1800
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_shutdown_grace() -> u64 {
    10
}

fn default_polling_timeout() -> u64 {
    1000
}

fn default_request_timeout() -> u64 {
    30
}

fn default_retry_delay() -> u64 {
    500
}

fn default_text_throttle() -> u64 {
    300
}

fn default_resize_throttle() -> u64 {
    200
}

impl ServerConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

impl SchedulerConfig {
    pub fn polling_timeout(&self) -> Duration {
        Duration::from_millis(self.polling_timeout_ms)
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Debounce window before captured input of `kind` is sent.
    pub fn throttle_for(&self, kind: EventKind) -> Duration {
        match kind {
            EventKind::Text => Duration::from_millis(self.text_throttle_ms),
            EventKind::Resize => Duration::from_millis(self.resize_throttle_ms),
            EventKind::Select | EventKind::Upload | EventKind::HistoryPop => Duration::ZERO,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            endpoint: default_endpoint(),
            session_cookie: default_session_cookie(),
            session_ttl_seconds: default_session_ttl(),
            sweep_interval_seconds: default_sweep_interval(),
            shutdown_grace_seconds: default_shutdown_grace(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            polling_timeout_ms: default_polling_timeout(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: default_request_timeout(),
            retry_delay_ms: default_retry_delay(),
            text_throttle_ms: default_text_throttle(),
            resize_throttle_ms: default_resize_throttle(),
        }
    }
}
