//! Unified muxtun CLI.
//!
//! This binary runs either role of the tunnel:
//! - `muxtun initiator` - SOCKS5 proxy plus the relay page
//! - `muxtun acceptor` - far side that dials targets

use std::process::ExitCode;

use clap::{Parser, Subcommand};

/// Muxtun unified CLI.
#[derive(Parser)]
#[command(
    name = "muxtun",
    version,
    about = "TCP tunneling through a browser-relayed WebSocket channel",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Initiator node.
    #[command(name = "initiator", alias = "client")]
    Initiator(muxtun_node::InitiatorArgs),

    /// Run the Acceptor node.
    #[command(name = "acceptor", alias = "server")]
    Acceptor(muxtun_node::AcceptorArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Initiator(args) => muxtun_node::run_initiator(args).await,
        Commands::Acceptor(args) => muxtun_node::run_acceptor(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
