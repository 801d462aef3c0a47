//! Command module - Strategy pattern for CLI commands.
//!
//! Each command is a separate module implementing the `CommandExecutor` trait.

mod connect;
mod serve;

pub use connect::ConnectCommand;
pub use serve::ServeCommand;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tokio::io::BufReader;
use tokio::runtime::Runtime;

use secretchat::chat::transport::{FrameSink, FrameSource};
use secretchat::chat::{ChatConfig, ChatSession, Role, SessionKey, TracingSink, QUIT_COMMAND};

/// Trait for command execution - Strategy pattern.
///
/// Each command struct holds its parsed arguments and implements
/// this trait to define its execution logic.
pub trait CommandExecutor {
    /// Executes the command with its parsed arguments.
    fn execute(&self) -> Result<()>;
}

/// Options shared by both ends of a connection.
#[derive(Args, Debug)]
pub struct SessionArgs {
    /// TCP port (default 8888)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Pre-shared 8-byte DES key; skips the RSA handshake
    #[arg(short, long, env = "SECRETCHAT_KEY", hide_env_values = true)]
    pub key: Option<String>,

    /// Path to a TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl SessionArgs {
    /// Loads the config file and applies command-line overrides.
    fn load_config(&self) -> Result<ChatConfig> {
        let mut config = ChatConfig::load_or_default(self.config.as_deref())?;
        if let Some(port) = self.port {
            config.port = port;
        }
        Ok(config)
    }

    /// The pre-shared session key, if one was given.
    fn pre_shared_key(&self) -> Result<Option<SessionKey>> {
        self.key
            .as_deref()
            .map(|key| SessionKey::from_slice(key.as_bytes()).context("Invalid pre-shared key"))
            .transpose()
    }
}

/// Builds a runtime, runs `future` to completion and shuts the runtime down
/// without waiting on a stdin read that may still be blocked.
fn block_on<F: std::future::Future<Output = Result<()>>>(future: F) -> Result<()> {
    let runtime = Runtime::new().context("Failed to create tokio runtime")?;
    let result = runtime.block_on(future);
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}

/// Runs the duplex chat over stdin until the connection closes.
async fn chat<R, W>(
    key: SessionKey,
    role: Role,
    peer: String,
    config: ChatConfig,
    source: R,
    sink: W,
) -> Result<()>
where
    R: FrameSource,
    W: FrameSink + 'static,
{
    println!(
        "Connected to {}. Type a message and press Enter; '{}' to leave.",
        peer, QUIT_COMMAND
    );

    let session = ChatSession::new(key, role, peer, config, Arc::new(TracingSink));
    let summary = session
        .run(source, sink, BufReader::new(tokio::io::stdin()))
        .await
        .context("Chat session failed")?;

    tracing::info!(
        sent = ?summary.frames_sent,
        received = summary.messages_delivered,
        "Session closed"
    );
    Ok(())
}
