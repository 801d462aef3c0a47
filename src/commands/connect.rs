//! Initiator: connect to a listening peer, send it a session key, then chat.

use anyhow::{Context, Result};
use clap::Args;
use rand::rngs::OsRng;

use secretchat::chat::transport::TcpConnection;
use secretchat::chat::{establish_as_initiator, ChatConfig, Role, TracingSink};

use super::{block_on, chat, CommandExecutor, SessionArgs};

/// Connect to a waiting peer and chat with it.
#[derive(Args, Debug)]
pub struct ConnectCommand {
    /// Host name or IP address of the peer
    pub host: String,

    #[command(flatten)]
    pub session: SessionArgs,
}

impl ConnectCommand {
    async fn run(&self, config: ChatConfig) -> Result<()> {
        let pre_shared = self.session.pre_shared_key()?;

        let connection = TcpConnection::connect((self.host.as_str(), config.port))
            .await
            .with_context(|| format!("Could not reach {}:{}", self.host, config.port))?;
        let peer = connection.peer_addr().to_string();
        tracing::info!(%peer, "Connected");
        let (mut source, mut sink) = connection.into_split();

        let key = match pre_shared {
            Some(key) => key,
            None => establish_as_initiator(&mut source, &mut sink, &mut OsRng, &TracingSink)
                .await
                .context("Handshake failed")?,
        };

        chat(key, Role::Initiator, peer, config, source, sink).await
    }
}

impl CommandExecutor for ConnectCommand {
    fn execute(&self) -> Result<()> {
        let config = self.session.load_config()?;
        block_on(self.run(config))
    }
}
