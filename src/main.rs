//! Secretchat - peer-to-peer terminal chat over DES and RSA.
//!
//! One peer runs `serve` and waits; the other runs `connect <host>`.

mod commands;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};

use commands::{CommandExecutor, ConnectCommand, ServeCommand};

/// Secretchat - peer-to-peer terminal chat
///
/// Messages are encrypted with a DES session key agreed over a small RSA
/// handshake. For study only: none of it resists a real attacker.
#[derive(Parser)]
#[command(name = "secretchat")]
#[command(version)]
#[command(about = "Peer-to-peer terminal chat over DES and RSA")]
struct Cli {
    /// More log output (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait for a peer to connect (responder)
    Serve(ServeCommand),

    /// Connect to a waiting peer (initiator)
    Connect(ConnectCommand),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Serve(cmd) => cmd.execute(),
        Commands::Connect(cmd) => cmd.execute(),
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "secretchat=info",
        1 => "secretchat=debug",
        _ => "secretchat=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}
