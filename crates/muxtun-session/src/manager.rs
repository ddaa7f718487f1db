//! Single-slot registry for the active multiplexing session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_yamux::{config::Config, session::Session, stream::StreamHandle, Control};
use tracing::{debug, info, warn};

use muxtun_core::defaults::DEFAULT_SESSION_WAIT_SECS;

use crate::SessionError;

/// Which side of the multiplexing protocol this process plays.
///
/// The stream-opening side runs the client role, the stream-accepting side
/// the server role. The two ends of one tunnel must pick opposite roles or
/// their stream-id spaces collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Opens logical streams (client role).
    Initiator,
    /// Accepts logical streams (server role).
    Acceptor,
}

/// A session handed back from [`SessionManager::attach`].
///
/// The caller owns the session future and must drive it (poll it for
/// inbound streams) until `token` is cancelled or the session ends. When
/// the driver exits it should call [`SessionManager::clear_if`] with `id`
/// so a replacement session is not accidentally evicted.
pub struct AttachedSession<T> {
    /// Identity of this attachment in the slot.
    pub id: u64,
    /// Cancelled when a newer channel replaces this one or on shutdown.
    pub token: CancellationToken,
    /// The session itself; yields inbound streams when polled.
    pub session: Session<T>,
}

struct ActiveSession {
    id: u64,
    control: Control,
    token: CancellationToken,
}

/// Registry holding at most one active session.
///
/// `attach` fills the slot (cancelling any previous occupant) and wakes
/// waiting openers; `open_stream` takes the current occupant or waits for
/// the next one, up to a fixed ceiling.
pub struct SessionManager {
    slot: Mutex<Option<ActiveSession>>,
    attached: Notify,
    next_id: AtomicU64,
    wait_ceiling: Duration,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::with_wait_ceiling(Duration::from_secs(DEFAULT_SESSION_WAIT_SECS))
    }

    /// Registry with a custom opener wait ceiling.
    pub fn with_wait_ceiling(wait_ceiling: Duration) -> Self {
        Self {
            slot: Mutex::new(None),
            attached: Notify::new(),
            next_id: AtomicU64::new(1),
            wait_ceiling,
        }
    }

    /// Start a session over `io` and install it as the active one.
    ///
    /// Any previous occupant is cancelled: last writer wins, and the old
    /// channel's driver tears itself down via its token.
    pub fn attach<T>(&self, io: T, mode: SessionMode) -> AttachedSession<T>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let session = match mode {
            SessionMode::Initiator => Session::new_client(io, Config::default()),
            SessionMode::Acceptor => Session::new_server(io, Config::default()),
        };
        let control = session.control();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        let previous = {
            let mut slot = self.slot.lock().expect("session slot poisoned");
            slot.replace(ActiveSession {
                id,
                control,
                token: token.clone(),
            })
        };
        if let Some(old) = previous {
            info!(old_id = old.id, new_id = id, "replacing active tunnel session");
            old.token.cancel();
        } else {
            debug!(id, ?mode, "tunnel session attached");
        }
        self.attached.notify_waiters();

        AttachedSession { id, token, session }
    }

    /// Clear the slot if `id` is still the occupant.
    ///
    /// Returns true when the slot was cleared. Drivers call this on exit;
    /// the compare guards against evicting a replacement that attached in
    /// the meantime.
    pub fn clear_if(&self, id: u64) -> bool {
        let mut slot = self.slot.lock().expect("session slot poisoned");
        match slot.as_ref() {
            Some(active) if active.id == id => {
                slot.take();
                debug!(id, "tunnel session detached");
                true
            }
            _ => false,
        }
    }

    /// Cancel and clear whatever session currently occupies the slot.
    pub fn close_current(&self) {
        let previous = self.slot.lock().expect("session slot poisoned").take();
        if let Some(active) = previous {
            info!(id = active.id, "closing active tunnel session");
            active.token.cancel();
        }
    }

    /// Whether a session currently occupies the slot.
    pub fn is_attached(&self) -> bool {
        self.slot.lock().expect("session slot poisoned").is_some()
    }

    /// Open a logical stream on the active session.
    ///
    /// When the slot is empty the call waits for the next attachment, up to
    /// the configured ceiling. A session error while opening is surfaced to
    /// the caller as-is; the driver notices the broken session and clears
    /// the slot on its own.
    pub async fn open_stream(
        &self,
        cancel: &CancellationToken,
    ) -> Result<StreamHandle, SessionError> {
        let deadline = Instant::now() + self.wait_ceiling;

        let mut control = loop {
            // Arm the notification before inspecting the slot so an attach
            // that lands between the check and the await is not lost.
            let attached = self.attached.notified();

            if let Some(active) = self.slot.lock().expect("session slot poisoned").as_ref() {
                break active.control.clone();
            }

            tokio::select! {
                _ = attached => {}
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(ceiling = ?self.wait_ceiling, "no tunnel session attached in time");
                    return Err(SessionError::TunnelUnavailable(self.wait_ceiling));
                }
                _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            }
        };

        control
            .open_stream()
            .await
            .map_err(|e| SessionError::Mux(format!("{e:?}")))
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::sync::Arc;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    /// Drive a session's I/O, echoing every inbound stream.
    fn spawn_echo_acceptor(mut session: Session<DuplexStream>) {
        tokio::spawn(async move {
            while let Some(Ok(mut stream)) = session.next().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    loop {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                if stream.write_all(&buf[..n]).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                });
            }
        });
    }

    /// Drive the initiator-side session so opened streams make progress.
    fn spawn_driver(attached: AttachedSession<DuplexStream>) -> (u64, CancellationToken) {
        let AttachedSession { id, token, mut session } = attached;
        let driver_token = token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = driver_token.cancelled() => break,
                    next = session.next() => {
                        if next.is_none() {
                            break;
                        }
                    }
                }
            }
        });
        (id, token)
    }

    #[tokio::test]
    async fn open_stream_through_attached_session() {
        let manager = SessionManager::new();
        let (a, b) = duplex(64 * 1024);

        spawn_echo_acceptor(Session::new_server(b, Config::default()));
        let attached = manager.attach(a, SessionMode::Initiator);
        spawn_driver(attached);

        let cancel = CancellationToken::new();
        let mut stream = manager.open_stream(&cancel).await.unwrap();

        stream.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn attach_replaces_and_cancels_previous() {
        let manager = SessionManager::new();

        let (a1, _b1) = duplex(4096);
        let first = manager.attach(a1, SessionMode::Initiator);
        let first_token = first.token.clone();
        let first_id = first.id;
        assert!(!first_token.is_cancelled());

        let (a2, _b2) = duplex(4096);
        let second = manager.attach(a2, SessionMode::Initiator);

        assert!(first_token.is_cancelled());
        assert!(!second.token.is_cancelled());
        assert_ne!(first_id, second.id);

        // The evicted driver's cleanup must not remove the replacement.
        assert!(!manager.clear_if(first_id));
        assert!(manager.is_attached());
        assert!(manager.clear_if(second.id));
        assert!(!manager.is_attached());
    }

    #[tokio::test]
    async fn opener_waits_for_late_attachment() {
        let manager = Arc::new(SessionManager::new());

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move {
                let cancel = CancellationToken::new();
                manager.open_stream(&cancel).await
            })
        };

        // Let the waiter park on the empty slot first.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (a, b) = duplex(64 * 1024);
        spawn_echo_acceptor(Session::new_server(b, Config::default()));
        let attached = manager.attach(a, SessionMode::Initiator);
        spawn_driver(attached);

        let mut stream = waiter.await.unwrap().unwrap();
        stream.write_all(b"late").await.unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"late");
    }

    #[tokio::test(start_paused = true)]
    async fn opener_times_out_when_nothing_attaches() {
        let manager = SessionManager::new();
        let cancel = CancellationToken::new();

        match manager.open_stream(&cancel).await {
            Err(SessionError::TunnelUnavailable(ceiling)) => {
                assert_eq!(ceiling, Duration::from_secs(DEFAULT_SESSION_WAIT_SECS));
            }
            Err(other) => panic!("expected TunnelUnavailable, got {other}"),
            Ok(_) => panic!("expected TunnelUnavailable, got a stream"),
        }
    }

    #[tokio::test]
    async fn opener_observes_cancellation() {
        let manager = SessionManager::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(
            manager.open_stream(&cancel).await,
            Err(SessionError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn close_current_cancels_occupant() {
        let manager = SessionManager::new();
        let (a, _b) = duplex(4096);
        let attached = manager.attach(a, SessionMode::Acceptor);
        let token = attached.token.clone();

        manager.close_current();
        assert!(token.is_cancelled());
        assert!(!manager.is_attached());
    }
}
