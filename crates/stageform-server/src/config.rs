//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the stageform server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `2222`, `0` auto-assigns).
    pub port: u16,
    /// Admission ceiling: live sessions allowed at once.
    pub max_sessions: usize,
    /// Envelopes queued per session before the read loop waits.
    pub mailbox_capacity: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// How long shutdown waits for sessions to drain.
    pub shutdown_timeout_secs: u64,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 2222,
            max_sessions: 2,
            mailbox_capacity: 64,
            max_message_size: 1024 * 1024, // 1 MiB
            shutdown_timeout_secs: 10,
            log_level: "info".into(),
            log_json: false,
        }
    }
}

impl ServerConfig {
    /// `host:port` suitable for `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_host() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
    }

    #[test]
    fn default_port() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.port, 2222);
    }

    #[test]
    fn default_admission_ceiling_is_two() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.max_sessions, 2);
    }

    #[test]
    fn default_mailbox_capacity() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.mailbox_capacity, 64);
    }

    #[test]
    fn default_max_message_size() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.max_message_size, 1024 * 1024);
    }

    #[test]
    fn default_shutdown_timeout() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.shutdown_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn bind_addr_joins_host_and_port() {
        let cfg = ServerConfig {
            host: "0.0.0.0".into(),
            port: 9000,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.bind_addr(), "0.0.0.0:9000");
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = ServerConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: ServerConfig = serde_json::from_str(r#"{"port": 8080}"#).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.max_sessions, 2);
        assert_eq!(cfg.log_level, "info");
    }
}
