//! Dialing targets through the tunnel.
//!
//! A dial opens one logical stream on the active session, sends the
//! control request carrying the target, and waits for the far side's
//! status byte. On success the stream is handed back as a ready byte pipe;
//! on any failure the stream is dropped so the far side sees it close.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tokio_yamux::stream::StreamHandle;
use tracing::debug;

use muxtun_proto::{read_status, write_request, ProtoError, TunnelRequest, STATUS_OK};
use muxtun_session::{SessionError, SessionManager};

use crate::socks5;

/// Errors from a tunnel dial.
#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("target address too long: {0} bytes")]
    AddressTooLong(usize),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("control exchange failed: {0}")]
    Exchange(ProtoError),

    #[error("remote could not connect to {0}")]
    RemoteConnectFailed(String),
}

impl DialError {
    /// The SOCKS5 reply code this failure maps to.
    pub fn socks_reply(&self) -> u8 {
        match self {
            Self::AddressTooLong(_) => socks5::REPLY_ADDRESS_TYPE_NOT_SUPPORTED,
            Self::RemoteConnectFailed(_) => socks5::REPLY_HOST_UNREACHABLE,
            Self::Session(SessionError::TunnelUnavailable(_)) => socks5::REPLY_TTL_EXPIRED,
            Self::Session(_) | Self::Exchange(_) => socks5::REPLY_GENERAL_FAILURE,
        }
    }
}

/// Opens tunnel streams to arbitrary `host:port` targets.
#[derive(Clone)]
pub struct TunnelDialer {
    manager: Arc<SessionManager>,
}

impl TunnelDialer {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    /// Open a stream to `target` through the active tunnel session.
    pub async fn dial(
        &self,
        target: &str,
        cancel: &CancellationToken,
    ) -> Result<StreamHandle, DialError> {
        let request = TunnelRequest::new(target).map_err(|e| match e {
            ProtoError::AddressTooLong(n) => DialError::AddressTooLong(n),
            other => DialError::Exchange(other),
        })?;

        let mut stream = self.manager.open_stream(cancel).await?;

        if let Err(e) = write_request(&mut stream, &request).await {
            let _ = stream.shutdown().await;
            return Err(DialError::Exchange(e));
        }

        let status = match read_status(&mut stream).await {
            Ok(status) => status,
            Err(e) => {
                let _ = stream.shutdown().await;
                return Err(DialError::Exchange(e));
            }
        };

        if status != STATUS_OK {
            let _ = stream.shutdown().await;
            return Err(DialError::RemoteConnectFailed(target.to_string()));
        }

        debug!(target, "tunnel dial succeeded");
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muxtun_proto::MAX_TARGET_LEN;

    #[test]
    fn socks_reply_mapping() {
        assert_eq!(
            DialError::AddressTooLong(300).socks_reply(),
            socks5::REPLY_ADDRESS_TYPE_NOT_SUPPORTED
        );
        assert_eq!(
            DialError::RemoteConnectFailed("x:1".into()).socks_reply(),
            socks5::REPLY_HOST_UNREACHABLE
        );
        assert_eq!(
            DialError::Session(SessionError::TunnelUnavailable(
                std::time::Duration::from_secs(30)
            ))
            .socks_reply(),
            socks5::REPLY_TTL_EXPIRED
        );
        assert_eq!(
            DialError::Session(SessionError::Cancelled).socks_reply(),
            socks5::REPLY_GENERAL_FAILURE
        );
    }

    #[tokio::test]
    async fn oversized_target_fails_before_opening_a_stream() {
        // No session attached; an early validation failure must not wait
        // for one.
        let dialer = TunnelDialer::new(Arc::new(SessionManager::new()));
        let cancel = CancellationToken::new();
        let target = format!("{}:443", "a".repeat(MAX_TARGET_LEN));

        match dialer.dial(&target, &cancel).await {
            Err(DialError::AddressTooLong(n)) => assert_eq!(n, target.len()),
            Err(other) => panic!("expected AddressTooLong, got {other}"),
            Ok(_) => panic!("expected AddressTooLong, got a stream"),
        }
    }
}
