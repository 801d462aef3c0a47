//! Responder: listen for one peer, publish an RSA key, then chat.

use anyhow::{Context, Result};
use clap::Args;
use rand::rngs::OsRng;

use secretchat::chat::transport::TcpListener;
use secretchat::chat::{establish_as_responder, ChatConfig, Role, TracingSink};

use super::{block_on, chat, CommandExecutor, SessionArgs};

/// Wait for a peer to connect and chat with it.
#[derive(Args, Debug)]
pub struct ServeCommand {
    #[command(flatten)]
    pub session: SessionArgs,

    /// Address to listen on (default 0.0.0.0)
    #[arg(long)]
    pub bind: Option<String>,

    /// Size of each RSA prime in bits, 4 to 32 (default 16)
    #[arg(short, long)]
    pub bits: Option<u32>,
}

impl ServeCommand {
    fn config(&self) -> Result<ChatConfig> {
        let mut config = self.session.load_config()?;
        if let Some(bind) = &self.bind {
            config.bind_addr = bind.clone();
        }
        if let Some(bits) = self.bits {
            config.prime_bits = bits;
        }
        config.validate()?;
        Ok(config)
    }

    async fn run(&self, config: ChatConfig) -> Result<()> {
        let pre_shared = self.session.pre_shared_key()?;

        let addr = format!("{}:{}", config.bind_addr, config.port);
        let listener = TcpListener::bind(addr.as_str()).await?;
        tracing::info!(addr = %listener.local_addr()?, "Waiting for a peer");

        let connection = listener.accept().await?;
        let peer = connection.peer_addr().to_string();
        tracing::info!(%peer, "Peer connected");
        let (mut source, mut sink) = connection.into_split();

        let key = match pre_shared {
            Some(key) => key,
            None => establish_as_responder(
                &mut source,
                &mut sink,
                &config,
                &mut OsRng,
                &TracingSink,
            )
            .await
            .context("Handshake failed")?,
        };

        chat(key, Role::Responder, peer, config, source, sink).await
    }
}

impl CommandExecutor for ServeCommand {
    fn execute(&self) -> Result<()> {
        let config = self.config()?;
        block_on(self.run(config))
    }
}
