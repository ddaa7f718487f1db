//! CLI module for the Initiator and Acceptor nodes.
//!
//! Configuration comes from an optional toml file; individual flags
//! override whatever the file says. A missing file falls back to defaults,
//! so an Initiator can run with nothing but `--server-url`.

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{AcceptorConfig, InitiatorConfig, ProxyConfig, TunnelConfig, WebConfig};
use crate::error::NodeError;

/// CLI arguments for the Initiator node.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "muxtun-initiator",
    version,
    about = "Tunnel initiator — SOCKS5 proxy plus the relay page that carries the tunnel"
)]
pub struct InitiatorArgs {
    /// Config file path (toml).
    #[arg(short, long, default_value = "initiator.toml")]
    pub config: PathBuf,

    /// Web listener address override (ip:port).
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// SOCKS5 proxy listener address override (ip:port).
    #[arg(long)]
    pub proxy_listen: Option<SocketAddr>,

    /// Acceptor base URL override, e.g. "wss://relay.example.net:8443".
    #[arg(long)]
    pub server_url: Option<String>,

    /// Log level override (e.g. "info", "debug", "trace").
    #[arg(long)]
    pub log_level: Option<String>,
}

/// CLI arguments for the Acceptor node.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "muxtun-acceptor",
    version,
    about = "Tunnel acceptor — dials targets on behalf of tunneled streams"
)]
pub struct AcceptorArgs {
    /// Config file path (toml).
    #[arg(short, long, default_value = "acceptor.toml")]
    pub config: PathBuf,

    /// Listener address override (ip:port).
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// Log level override (e.g. "info", "debug", "trace").
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Run the Initiator node with the given CLI arguments.
pub async fn run_initiator(args: InitiatorArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_initiator_config(&args.config)?;
    if let Some(listen) = args.listen {
        config.web.listen = listen;
    }
    if let Some(proxy_listen) = args.proxy_listen {
        config.proxy.listen = proxy_listen;
    }
    if let Some(server_url) = args.server_url {
        config.tunnel.server_url = server_url;
    }
    if config.tunnel.server_url.is_empty() {
        return Err(Box::new(NodeError::Config(
            "server URL is required (config [tunnel].server_url or --server-url)".into(),
        )));
    }

    init_tracing(args.log_level.as_deref());

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();

    tokio::spawn(async move {
        shutdown_signal_handler().await;
        info!("shutdown signal received");
        shutdown_signal.cancel();
    });

    crate::initiator::run(config, shutdown)
        .await
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error>)
}

/// Run the Acceptor node with the given CLI arguments.
pub async fn run_acceptor(args: AcceptorArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_acceptor_config(&args.config)?;
    if let Some(listen) = args.listen {
        config.web.listen = listen;
    }

    init_tracing(args.log_level.as_deref());

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();

    tokio::spawn(async move {
        shutdown_signal_handler().await;
        info!("shutdown signal received");
        shutdown_signal.cancel();
    });

    crate::acceptor::run(config, shutdown)
        .await
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error>)
}

fn load_initiator_config(path: &Path) -> Result<InitiatorConfig, Box<dyn std::error::Error>> {
    match std::fs::read_to_string(path) {
        Ok(config_str) => toml::from_str(&config_str)
            .map_err(|e| format!("failed to parse initiator config: {e}").into()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(InitiatorConfig {
            web: WebConfig::default(),
            proxy: ProxyConfig::default(),
            tunnel: TunnelConfig {
                server_url: String::new(),
                session_wait_secs: muxtun_core::defaults::DEFAULT_SESSION_WAIT_SECS,
            },
        }),
        Err(e) => Err(format!("failed to read config file {path:?}: {e}").into()),
    }
}

fn load_acceptor_config(path: &Path) -> Result<AcceptorConfig, Box<dyn std::error::Error>> {
    match std::fs::read_to_string(path) {
        Ok(config_str) => toml::from_str(&config_str)
            .map_err(|e| format!("failed to parse acceptor config: {e}").into()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(AcceptorConfig::default()),
        Err(e) => Err(format!("failed to read config file {path:?}: {e}").into()),
    }
}

async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn init_tracing(level: Option<&str>) {
    let level = level.unwrap_or("info");
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}
