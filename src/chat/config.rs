//! Chat configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::chat::error::ChatError;
use crate::crypto::des::{padded_len, BLOCK_SIZE};
use crate::crypto::rsa::{DEFAULT_PRIME_BITS, MAX_PRIME_BITS, MIN_PRIME_BITS};

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 8888;

/// Default listen address for the responder.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";

/// Default plaintext capacity of one chat message in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024;

/// Size of the checksum that prefixes every chat frame.
pub const CHECKSUM_SIZE: usize = 4;

/// Configuration for a chat connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChatConfig {
    /// TCP port to listen on or connect to.
    pub port: u16,

    /// Address the responder binds to.
    pub bind_addr: String,

    /// Size of each RSA prime in bits.
    pub prime_bits: u32,

    /// Maximum plaintext bytes per message.
    pub max_message_size: usize,

    /// Retry failed decryptions with a byte-reversed key to diagnose a
    /// misordered handshake. The retry result is never delivered.
    pub probe_reversed_key: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            prime_bits: DEFAULT_PRIME_BITS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            probe_reversed_key: true,
        }
    }
}

impl ChatConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ChatError> {
        let content = fs::read_to_string(path).map_err(|e| {
            ChatError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
            .map_err(|e| ChatError::Config(format!("{} ({})", e, path.display())))
    }

    /// Parse configuration from TOML text. Missing keys take defaults.
    pub fn from_toml(content: &str) -> Result<Self, ChatError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ChatError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, else from the default location if that
    /// file exists, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ChatError> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// `<config_dir>/secretchat/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
            .map(|dir| dir.join("secretchat").join("config.toml"))
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ChatError> {
        if !(MIN_PRIME_BITS..=MAX_PRIME_BITS).contains(&self.prime_bits) {
            return Err(ChatError::Config(format!(
                "prime_bits must be between {} and {}, got {}",
                MIN_PRIME_BITS, MAX_PRIME_BITS, self.prime_bits
            )));
        }
        if self.max_message_size < BLOCK_SIZE {
            return Err(ChatError::Config(format!(
                "max_message_size must be at least {}, got {}",
                BLOCK_SIZE, self.max_message_size
            )));
        }
        Ok(())
    }

    /// Largest chat frame the receiver accepts: checksum plus the
    /// ciphertext of a maximum-size message.
    pub fn max_frame_len(&self) -> usize {
        CHECKSUM_SIZE + padded_len(self.max_message_size)
    }
}
