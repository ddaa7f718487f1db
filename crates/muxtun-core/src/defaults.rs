//! Default configuration values.
//!
//! Centralized default constants for use across all crates.

// ============================================================================
// Listener Defaults
// ============================================================================

/// Default bind host for the web/WebSocket listener.
pub const DEFAULT_HOST: &str = "0.0.0.0";
/// Default port for the web interface (Initiator) or WebSocket endpoint (Acceptor).
pub const DEFAULT_WEB_PORT: u16 = 8080;
/// Default SOCKS5 proxy port (Initiator only).
pub const DEFAULT_PROXY_PORT: u16 = 1080;

// ============================================================================
// WebSocket Defaults
// ============================================================================

/// Upgrade path the relay page uses on the Initiator.
pub const INITIATOR_WS_PATH: &str = "/ws/local";
/// Upgrade path the relay page uses on the Acceptor.
pub const ACCEPTOR_WS_PATH: &str = "/ws";
/// Default max WebSocket frame/message size.
pub const DEFAULT_WS_MAX_FRAME_BYTES: usize = 1 << 20;
/// Default maximum HTTP header bytes accepted before upgrade.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 8192;

// ============================================================================
// Timeout Defaults
// ============================================================================

/// Outbound dial timeout on the Acceptor in seconds.
pub const DEFAULT_DIAL_TIMEOUT_SECS: u64 = 10;
/// How long an Initiator dial waits for a session to attach, in seconds.
pub const DEFAULT_SESSION_WAIT_SECS: u64 = 30;

// ============================================================================
// Buffer Defaults
// ============================================================================

/// Default relay buffer size per direction (32 KiB).
pub const DEFAULT_RELAY_BUFFER_SIZE: usize = 32768;
