//! End-to-end tunnel tests: a dialer on one side of an in-memory WebSocket
//! channel, an accepting session on the other, real TCP targets behind it.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, client_async};
use tokio_util::sync::CancellationToken;

use muxtun_core::transport::WsByteStream;
use muxtun_node::acceptor;
use muxtun_node::config::OutboundConfig;
use muxtun_node::dialer::{DialError, TunnelDialer};
use muxtun_session::{SessionManager, SessionMode};

/// Echo server on an ephemeral port; returns its address.
async fn spawn_echo_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut conn, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match conn.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if conn.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    addr.to_string()
}

/// The accepting side of the tunnel: the acceptor's own session loop.
fn spawn_accepting_session(channel: WsByteStream<DuplexStream>, outbound: OutboundConfig) {
    tokio::spawn(async move {
        acceptor::run_session(
            channel,
            &outbound,
            Arc::new(SessionManager::new()),
            CancellationToken::new(),
        )
        .await;
    });
}

/// Attach a fresh in-memory WebSocket channel to `manager`, with the real
/// accepting session on the far end.
async fn attach_channel_with(manager: &Arc<SessionManager>, outbound: OutboundConfig) {
    let (a, b) = duplex(256 * 1024);
    let (client_res, server_res) = tokio::join!(client_async("ws://localhost/", a), accept_async(b));
    let (client_ws, _resp) = client_res.unwrap();
    let server_ws = server_res.unwrap();

    spawn_accepting_session(WsByteStream::new(server_ws), outbound);

    let attached = manager.attach(WsByteStream::new(client_ws), SessionMode::Initiator);
    let id = attached.id;
    let token = attached.token.clone();
    let mut session = attached.session;
    let manager = manager.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                next = session.next() => {
                    if next.is_none() {
                        break;
                    }
                }
            }
        }
        manager.clear_if(id);
    });
}

async fn attach_channel(manager: &Arc<SessionManager>) {
    attach_channel_with(manager, OutboundConfig::default()).await;
}

/// Build the full initiator-side stack over an in-memory WebSocket pair and
/// return a ready dialer.
async fn tunnel_fixture() -> TunnelDialer {
    let manager = Arc::new(SessionManager::new());
    attach_channel(&manager).await;
    TunnelDialer::new(manager)
}

#[tokio::test]
async fn dial_and_echo_through_tunnel() {
    let echo_addr = spawn_echo_server().await;
    let dialer = tunnel_fixture().await;
    let cancel = CancellationToken::new();

    let mut stream = dialer.dial(&echo_addr, &cancel).await.unwrap();

    stream.write_all(b"through the tunnel").await.unwrap();
    stream.flush().await.unwrap();
    let mut buf = [0u8; 18];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"through the tunnel");
}

#[tokio::test]
async fn concurrent_streams_are_independent() {
    let echo_addr = spawn_echo_server().await;
    let dialer = tunnel_fixture().await;
    let cancel = CancellationToken::new();

    let mut tasks = Vec::new();
    for i in 0u8..5 {
        let dialer = dialer.clone();
        let echo_addr = echo_addr.clone();
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            let mut stream = dialer.dial(&echo_addr, &cancel).await.unwrap();
            let payload = vec![i; 2048];
            stream.write_all(&payload).await.unwrap();
            stream.flush().await.unwrap();
            let mut buf = vec![0u8; 2048];
            stream.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, payload);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn refused_target_reports_remote_failure() {
    // Grab a port nobody is listening on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let dialer = tunnel_fixture().await;
    let cancel = CancellationToken::new();

    match dialer.dial(&dead_addr, &cancel).await {
        Err(DialError::RemoteConnectFailed(target)) => assert_eq!(target, dead_addr),
        Err(other) => panic!("expected RemoteConnectFailed, got {other}"),
        Ok(_) => panic!("expected RemoteConnectFailed, got a stream"),
    }
}

#[tokio::test]
async fn unresponsive_target_reports_remote_failure() {
    // A TEST-NET blackhole address never answers the handshake; with a zero
    // dial budget the accepting side's connect attempt expires before it
    // can complete.
    let stuck_addr = "192.0.2.1:81".to_string();

    let manager = Arc::new(SessionManager::new());
    attach_channel_with(
        &manager,
        OutboundConfig {
            dial_timeout_secs: 0,
            ..OutboundConfig::default()
        },
    )
    .await;
    let dialer = TunnelDialer::new(manager);
    let cancel = CancellationToken::new();

    match dialer.dial(&stuck_addr, &cancel).await {
        Err(DialError::RemoteConnectFailed(target)) => assert_eq!(target, stuck_addr),
        Err(other) => panic!("expected RemoteConnectFailed, got {other}"),
        Ok(_) => panic!("expected RemoteConnectFailed, got a stream"),
    }
}

#[tokio::test]
async fn reattach_supersedes_in_flight_streams() {
    let echo_addr = spawn_echo_server().await;
    let manager = Arc::new(SessionManager::new());
    attach_channel(&manager).await;
    let dialer = TunnelDialer::new(manager.clone());
    let cancel = CancellationToken::new();

    let mut old_stream = dialer.dial(&echo_addr, &cancel).await.unwrap();
    old_stream.write_all(b"before").await.unwrap();
    old_stream.flush().await.unwrap();
    let mut buf = [0u8; 6];
    old_stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"before");

    // A second channel takes the slot; the old session's driver drops it
    // and the in-flight stream dies with it.
    attach_channel(&manager).await;

    let mut scratch = [0u8; 6];
    let dead = match old_stream.read(&mut scratch).await {
        Ok(0) | Err(_) => true,
        Ok(_) => false,
    };
    assert!(dead, "superseded stream should not deliver more data");

    // The replacement session carries new dials.
    let mut new_stream = dialer.dial(&echo_addr, &cancel).await.unwrap();
    new_stream.write_all(b"after").await.unwrap();
    new_stream.flush().await.unwrap();
    let mut buf = [0u8; 5];
    new_stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"after");
}

#[tokio::test]
async fn dial_without_session_times_out() {
    let manager = Arc::new(SessionManager::with_wait_ceiling(Duration::from_millis(50)));
    let dialer = TunnelDialer::new(manager);
    let cancel = CancellationToken::new();

    match dialer.dial("127.0.0.1:80", &cancel).await {
        Err(DialError::Session(_)) => {}
        Err(other) => panic!("expected a session error, got {other}"),
        Ok(_) => panic!("expected a session error, got a stream"),
    }
}
