//! Acceptor role.
//!
//! One listener serves a health line and the tunnel WebSocket leg. The
//! WebSocket becomes the transport for the multiplexing session; every
//! inbound logical stream carries one control request, gets dialed, and is
//! then relayed against the outbound TCP connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use muxtun_core::defaults::ACCEPTOR_WS_PATH;
use muxtun_core::io::{relay_bidirectional, RelayMetrics};
use muxtun_core::transport::{
    accept_ws, read_request_head, send_not_found, send_reject, send_text, WsByteStream,
};
use muxtun_core::{PROJECT_NAME, VERSION};
use muxtun_proto::{read_request, write_status, STATUS_CONNECT_FAILED, STATUS_OK};
use muxtun_session::{SessionManager, SessionMode};

use crate::config::{AcceptorConfig, OutboundConfig};
use crate::error::NodeError;

/// Run the Acceptor until `shutdown` fires.
pub async fn run(config: AcceptorConfig, shutdown: CancellationToken) -> Result<(), NodeError> {
    let manager = Arc::new(SessionManager::new());
    let listener = TcpListener::bind(config.web.listen).await?;
    info!(listen = %config.web.listen, "acceptor ready");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("acceptor shutting down");
                manager.close_current();
                return Ok(());
            }
            accept_result = listener.accept() => {
                let (stream, peer_addr) = accept_result?;
                let local_addr = stream.local_addr().unwrap_or(config.web.listen);
                let config = config.clone();
                let manager = manager.clone();
                let shutdown = shutdown.clone();

                tokio::spawn(
                    async move {
                        if let Err(e) =
                            handle_connection(stream, local_addr, peer_addr, config, manager, shutdown)
                                .await
                        {
                            debug!(error = %e, "connection error");
                        }
                    }
                    .instrument(info_span!("acceptor", peer = %peer_addr)),
                );
            }
        }
    }
}

/// Route one connection: health line, tunnel WebSocket leg, or 404.
async fn handle_connection<S>(
    mut stream: S,
    local_addr: std::net::SocketAddr,
    peer_addr: std::net::SocketAddr,
    config: AcceptorConfig,
    manager: Arc<SessionManager>,
    shutdown: CancellationToken,
) -> Result<(), NodeError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (head, raw) = match read_request_head(&mut stream, config.web.max_header_bytes).await? {
        Some(parsed) => parsed,
        None => {
            let _ = send_reject(stream, "malformed request").await;
            return Ok(());
        }
    };

    if head.websocket && head.path == ACCEPTOR_WS_PATH {
        let ws = accept_ws(stream, raw, config.web.max_frame_bytes).await?;
        let channel = WsByteStream::with_addrs(ws, local_addr, peer_addr);
        info!("relay page connected");

        run_session(channel, &config.outbound, manager, shutdown).await;
        info!("relay page disconnected");
        return Ok(());
    }

    match head.path.as_str() {
        "/" => send_text(stream, &format!("{PROJECT_NAME} acceptor {VERSION}\n")).await?,
        _ => send_not_found(stream).await?,
    }
    Ok(())
}

/// Byte totals for one tunnel session, aggregated across its streams.
#[derive(Debug, Default)]
struct SessionTotals {
    forward: AtomicU64,
    backward: AtomicU64,
}

impl RelayMetrics for SessionTotals {
    fn record_forward(&self, bytes: u64) {
        self.forward.fetch_add(bytes, Ordering::Relaxed);
    }
    fn record_backward(&self, bytes: u64) {
        self.backward.fetch_add(bytes, Ordering::Relaxed);
    }
}

/// Drive one tunnel session, spawning a handler per inbound stream.
pub async fn run_session<T>(
    channel: T,
    outbound: &OutboundConfig,
    manager: Arc<SessionManager>,
    shutdown: CancellationToken,
) where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let attached = manager.attach(channel, SessionMode::Acceptor);
    let id = attached.id;
    let token = attached.token;
    let mut session = attached.session;

    let dial_timeout = Duration::from_secs(outbound.dial_timeout_secs);
    let buffer_size = outbound.relay_buffer_size;
    let totals = Arc::new(SessionTotals::default());

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = shutdown.cancelled() => break,
            next = session.next() => match next {
                Some(Ok(stream)) => {
                    let stream_id = stream.id();
                    let totals = totals.clone();
                    tokio::spawn(
                        async move {
                            handle_stream(stream, dial_timeout, buffer_size, totals).await;
                        }
                        .instrument(info_span!("stream", id = stream_id)),
                    );
                }
                Some(Err(e)) => {
                    debug!(error = ?e, "tunnel session error");
                    break;
                }
                None => break,
            },
        }
    }
    manager.clear_if(id);
    info!(
        forward = totals.forward.load(Ordering::Relaxed),
        backward = totals.backward.load(Ordering::Relaxed),
        "session totals"
    );
}

/// Serve one logical stream: control exchange, dial, relay.
async fn handle_stream<S>(
    mut stream: S,
    dial_timeout: Duration,
    buffer_size: usize,
    totals: Arc<SessionTotals>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let request = match read_request(&mut stream).await {
        Ok(request) => request,
        Err(e) => {
            // A stream that cannot state its target is dropped without a
            // status byte; closing it is the answer.
            warn!(error = %e, "bad tunnel request");
            return;
        }
    };
    let target = request.target();

    let conn = match tokio::time::timeout(dial_timeout, TcpStream::connect(target)).await {
        Ok(Ok(conn)) => conn,
        Ok(Err(e)) => {
            warn!(target = %target, error = %e, "outbound connect failed");
            let _ = write_status(&mut stream, STATUS_CONNECT_FAILED).await;
            return;
        }
        Err(_) => {
            warn!(target = %target, timeout = ?dial_timeout, "outbound connect timed out");
            let _ = write_status(&mut stream, STATUS_CONNECT_FAILED).await;
            return;
        }
    };

    if let Err(e) = write_status(&mut stream, STATUS_OK).await {
        debug!(target = %target, error = %e, "status write failed");
        return;
    }
    info!(target = %target, "proxying");

    match relay_bidirectional(stream, conn, buffer_size, &*totals).await {
        Ok((sent, received)) => {
            debug!(target = %target, sent, received, "connection closed");
        }
        Err(e) => {
            debug!(target = %target, error = %e, "relay ended with error");
        }
    }
}
