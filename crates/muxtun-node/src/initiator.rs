//! Initiator role.
//!
//! Serves the relay page and the local WebSocket leg on one listener, and
//! a SOCKS5 proxy on another. The relay page's WebSocket becomes the
//! transport for the multiplexing session; each SOCKS5 CONNECT becomes a
//! logical stream opened through the session manager.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use muxtun_core::defaults::INITIATOR_WS_PATH;
use muxtun_core::io::{relay_bidirectional, NoOpMetrics};
use muxtun_core::transport::{
    accept_ws, read_request_head, send_html, send_not_found, send_reject, WsByteStream,
};
use muxtun_session::{SessionManager, SessionMode};

use crate::config::InitiatorConfig;
use crate::dialer::TunnelDialer;
use crate::error::{NodeError, Socks5Error};
use crate::page;
use crate::socks5;

/// Run the Initiator until `shutdown` fires.
pub async fn run(config: InitiatorConfig, shutdown: CancellationToken) -> Result<(), NodeError> {
    let manager = Arc::new(SessionManager::with_wait_ceiling(
        std::time::Duration::from_secs(config.tunnel.session_wait_secs),
    ));

    let server_url = config.tunnel.server_url.trim_end_matches('/').to_string();
    let page = Arc::new(page::render(&server_url, config.proxy.listen.port()));

    let web_listener = TcpListener::bind(config.web.listen).await?;
    info!(listen = %config.web.listen, "web interface ready");
    let proxy_listener = TcpListener::bind(config.proxy.listen).await?;
    info!(listen = %config.proxy.listen, "SOCKS5 proxy ready");

    let web = tokio::spawn(run_web_listener(
        web_listener,
        config.clone(),
        page,
        manager.clone(),
        shutdown.clone(),
    ));
    let proxy = tokio::spawn(run_proxy_listener(
        proxy_listener,
        config,
        manager.clone(),
        shutdown,
    ));

    let (web_res, proxy_res) = tokio::join!(web, proxy);
    manager.close_current();
    for res in [web_res, proxy_res] {
        match res {
            Ok(inner) => inner?,
            Err(e) => error!(error = %e, "listener task panicked"),
        }
    }
    Ok(())
}

async fn run_web_listener(
    listener: TcpListener,
    config: InitiatorConfig,
    page: Arc<String>,
    manager: Arc<SessionManager>,
    shutdown: CancellationToken,
) -> Result<(), NodeError> {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("web listener shutting down");
                return Ok(());
            }
            accept_result = listener.accept() => {
                let (stream, peer_addr) = accept_result?;
                let local_addr = stream.local_addr().unwrap_or(config.web.listen);
                let config = config.clone();
                let page = page.clone();
                let manager = manager.clone();
                let shutdown = shutdown.clone();

                tokio::spawn(
                    async move {
                        if let Err(e) = handle_web_connection(
                            stream, local_addr, peer_addr, config, &page, manager, shutdown,
                        )
                        .await
                        {
                            debug!(error = %e, "web connection error");
                        }
                    }
                    .instrument(info_span!("web", peer = %peer_addr)),
                );
            }
        }
    }
}

/// Route one web connection: relay page, local WebSocket leg, or 404.
async fn handle_web_connection<S>(
    mut stream: S,
    local_addr: std::net::SocketAddr,
    peer_addr: std::net::SocketAddr,
    config: InitiatorConfig,
    page: &str,
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

    if head.websocket && head.path == INITIATOR_WS_PATH {
        let ws = accept_ws(stream, raw, config.web.max_frame_bytes).await?;
        let channel = WsByteStream::with_addrs(ws, local_addr, peer_addr);
        info!("relay page connected");

        let attached = manager.attach(channel, SessionMode::Initiator);
        let id = attached.id;
        let token = attached.token;
        let mut session = attached.session;

        // Drive the session until it ends, a newer page replaces it, or
        // the process shuts down. The stream-opening side expects no
        // inbound streams; any that arrive are dropped.
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = shutdown.cancelled() => break,
                next = session.next() => match next {
                    Some(Ok(_unexpected)) => {
                        warn!("dropping unexpected inbound stream");
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
        info!("relay page disconnected");
        return Ok(());
    }

    match head.path.as_str() {
        "/" => send_html(stream, page).await?,
        _ => send_not_found(stream).await?,
    }
    Ok(())
}

async fn run_proxy_listener(
    listener: TcpListener,
    config: InitiatorConfig,
    manager: Arc<SessionManager>,
    shutdown: CancellationToken,
) -> Result<(), NodeError> {
    let dialer = TunnelDialer::new(manager);
    let buffer_size = config.proxy.relay_buffer_size;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("SOCKS5 listener shutting down");
                return Ok(());
            }
            accept_result = listener.accept() => {
                let (stream, peer_addr) = accept_result?;
                let dialer = dialer.clone();
                let shutdown = shutdown.clone();

                tokio::spawn(
                    async move {
                        if let Err(e) =
                            handle_proxy_connection(stream, dialer, buffer_size, shutdown).await
                        {
                            debug!(error = %e, "proxy connection error");
                        }
                    }
                    .instrument(info_span!("socks5", peer = %peer_addr)),
                );
            }
        }
    }
}

/// Serve one SOCKS5 client: negotiate, dial through the tunnel, relay.
async fn handle_proxy_connection(
    mut stream: TcpStream,
    dialer: TunnelDialer,
    buffer_size: usize,
    shutdown: CancellationToken,
) -> Result<(), NodeError> {
    socks5::negotiate_method(&mut stream).await?;

    let target = match socks5::read_connect_target(&mut stream).await {
        Ok(target) => target,
        Err(e) => {
            let reply = match &e {
                Socks5Error::UnsupportedCommand(_) => socks5::REPLY_COMMAND_NOT_SUPPORTED,
                Socks5Error::UnsupportedAddressType(_) => {
                    socks5::REPLY_ADDRESS_TYPE_NOT_SUPPORTED
                }
                _ => socks5::REPLY_GENERAL_FAILURE,
            };
            let _ = socks5::send_reply(&mut stream, reply).await;
            return Err(e.into());
        }
    };

    let tunnel_stream = match dialer.dial(&target, &shutdown).await {
        Ok(tunnel_stream) => tunnel_stream,
        Err(e) => {
            warn!(target = %target, error = %e, "tunnel dial failed");
            let _ = socks5::send_reply(&mut stream, e.socks_reply()).await;
            return Ok(());
        }
    };

    socks5::send_reply(&mut stream, socks5::REPLY_SUCCEEDED).await?;
    info!(target = %target, "connected");

    let (sent, received) =
        relay_bidirectional(stream, tunnel_stream, buffer_size, &NoOpMetrics).await?;
    debug!(target = %target, sent, received, "connection closed");
    Ok(())
}
