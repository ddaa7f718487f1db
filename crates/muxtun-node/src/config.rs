//! Configuration structures for the two roles.
//!
//! Initiator config defines the web/relay listener, the local SOCKS5
//! proxy, and how to reach the Acceptor. Acceptor config defines the
//! web/tunnel listener and outbound dialing behavior.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use muxtun_core::defaults::{
    DEFAULT_DIAL_TIMEOUT_SECS, DEFAULT_HOST, DEFAULT_MAX_HEADER_BYTES, DEFAULT_PROXY_PORT,
    DEFAULT_RELAY_BUFFER_SIZE, DEFAULT_SESSION_WAIT_SECS, DEFAULT_WEB_PORT,
    DEFAULT_WS_MAX_FRAME_BYTES,
};

// ── Initiator ──

/// Top-level Initiator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiatorConfig {
    /// Web listener (relay page + local WebSocket leg).
    #[serde(default)]
    pub web: WebConfig,

    /// Local SOCKS5 proxy listener.
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// How to reach the Acceptor.
    pub tunnel: TunnelConfig,
}

/// Local SOCKS5 proxy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Listen address for the SOCKS5 proxy.
    #[serde(default = "default_proxy_listen")]
    pub listen: SocketAddr,

    /// Relay buffer size per direction (bytes).
    #[serde(default = "default_relay_buffer_size")]
    pub relay_buffer_size: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: default_proxy_listen(),
            relay_buffer_size: default_relay_buffer_size(),
        }
    }
}

/// Tunnel settings: where the relay page should connect on the far side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Acceptor base URL handed to the relay page, e.g. `wss://host:8080`.
    /// The page appends the WebSocket path itself.
    pub server_url: String,

    /// How long a stream opener waits for a tunnel session (seconds).
    #[serde(default = "default_session_wait")]
    pub session_wait_secs: u64,
}

// ── Acceptor ──

/// Top-level Acceptor configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AcceptorConfig {
    /// Web listener (health line + tunnel WebSocket leg).
    #[serde(default)]
    pub web: WebConfig,

    /// Outbound dialing behavior.
    #[serde(default)]
    pub outbound: OutboundConfig,
}

/// Outbound connection settings for the Acceptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundConfig {
    /// Timeout for dialing a target (seconds).
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout_secs: u64,

    /// Relay buffer size per direction (bytes).
    #[serde(default = "default_relay_buffer_size")]
    pub relay_buffer_size: usize,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            dial_timeout_secs: default_dial_timeout(),
            relay_buffer_size: default_relay_buffer_size(),
        }
    }
}

// ── Shared ──

/// Web listener settings shared by both roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Listen address (ip:port).
    #[serde(default = "default_web_listen")]
    pub listen: SocketAddr,

    /// Maximum WebSocket frame/message size (bytes). 0 means unlimited.
    #[serde(default = "default_ws_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Maximum buffered HTTP request head (bytes).
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: default_web_listen(),
            max_frame_bytes: default_ws_max_frame_bytes(),
            max_header_bytes: default_max_header_bytes(),
        }
    }
}

fn default_web_listen() -> SocketAddr {
    format!("{DEFAULT_HOST}:{DEFAULT_WEB_PORT}")
        .parse()
        .expect("default web listen address")
}
fn default_proxy_listen() -> SocketAddr {
    format!("127.0.0.1:{DEFAULT_PROXY_PORT}")
        .parse()
        .expect("default proxy listen address")
}
fn default_session_wait() -> u64 {
    DEFAULT_SESSION_WAIT_SECS
}
fn default_dial_timeout() -> u64 {
    DEFAULT_DIAL_TIMEOUT_SECS
}
fn default_relay_buffer_size() -> usize {
    DEFAULT_RELAY_BUFFER_SIZE
}
fn default_ws_max_frame_bytes() -> usize {
    DEFAULT_WS_MAX_FRAME_BYTES
}
fn default_max_header_bytes() -> usize {
    DEFAULT_MAX_HEADER_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_initiator_config() {
        let toml_str = r#"
[web]
listen = "127.0.0.1:9000"

[proxy]
listen = "127.0.0.1:1081"

[tunnel]
server_url = "wss://relay.example.net:8443"
session_wait_secs = 10
"#;
        let config: InitiatorConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.web.listen.port(), 9000);
        assert_eq!(config.proxy.listen.port(), 1081);
        assert_eq!(config.tunnel.server_url, "wss://relay.example.net:8443");
        assert_eq!(config.tunnel.session_wait_secs, 10);
        // defaults
        assert_eq!(config.web.max_frame_bytes, DEFAULT_WS_MAX_FRAME_BYTES);
        assert_eq!(config.proxy.relay_buffer_size, DEFAULT_RELAY_BUFFER_SIZE);
    }

    #[test]
    fn initiator_requires_server_url() {
        let toml_str = r#"
[tunnel]
session_wait_secs = 5
"#;
        assert!(toml::from_str::<InitiatorConfig>(toml_str).is_err());
    }

    #[test]
    fn parse_minimal_initiator_config() {
        let toml_str = r#"
[tunnel]
server_url = "ws://127.0.0.1:8080"
"#;
        let config: InitiatorConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.web.listen.port(), DEFAULT_WEB_PORT);
        assert_eq!(config.proxy.listen.port(), DEFAULT_PROXY_PORT);
        assert_eq!(config.tunnel.session_wait_secs, DEFAULT_SESSION_WAIT_SECS);
    }

    #[test]
    fn parse_acceptor_config() {
        let toml_str = r#"
[web]
listen = "0.0.0.0:8443"

[outbound]
dial_timeout_secs = 5
"#;
        let config: AcceptorConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.web.listen.port(), 8443);
        assert_eq!(config.outbound.dial_timeout_secs, 5);
        assert_eq!(config.outbound.relay_buffer_size, DEFAULT_RELAY_BUFFER_SIZE);
    }

    #[test]
    fn empty_acceptor_config_uses_defaults() {
        let config: AcceptorConfig = toml::from_str("").unwrap();
        assert_eq!(config.web.listen.port(), DEFAULT_WEB_PORT);
        assert_eq!(config.outbound.dial_timeout_secs, DEFAULT_DIAL_TIMEOUT_SECS);
    }
}
