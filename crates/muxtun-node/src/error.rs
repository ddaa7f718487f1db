//! Node error types.

use std::fmt;

use muxtun_proto::ProtoError;
use muxtun_session::SessionError;

/// Errors that can occur while running either role.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("SOCKS5 error: {0}")]
    Socks5(Socks5Error),

    #[error("tunnel protocol error: {0}")]
    Proto(#[from] ProtoError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

/// SOCKS5 protocol errors.
#[derive(Debug)]
pub enum Socks5Error {
    InvalidVersion(u8),
    NoAcceptableMethods,
    UnsupportedCommand(u8),
    UnsupportedAddressType(u8),
}

impl fmt::Display for Socks5Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidVersion(v) => write!(f, "invalid SOCKS version: 0x{v:02x}"),
            Self::NoAcceptableMethods => write!(f, "no acceptable authentication methods"),
            Self::UnsupportedCommand(c) => write!(f, "unsupported command: 0x{c:02x}"),
            Self::UnsupportedAddressType(a) => write!(f, "unsupported address type: 0x{a:02x}"),
        }
    }
}

impl std::error::Error for Socks5Error {}

impl From<Socks5Error> for NodeError {
    fn from(e: Socks5Error) -> Self {
        Self::Socks5(e)
    }
}
