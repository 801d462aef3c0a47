//! Chat error types.

use thiserror::Error;

use crate::crypto::{DesError, RsaError};

/// Errors that can occur during a chat connection.
///
/// Handshake-phase errors end the connection. Frame-level errors drop one
/// frame and the session carries on; see [`ChatError::is_fatal`].
#[derive(Error, Debug)]
pub enum ChatError {
    /// Invalid configuration or key material, detected before any I/O.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The peer sent something the handshake cannot accept.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Frame too short to hold a checksum and one cipher block.
    #[error("Malformed frame: {len} bytes")]
    MalformedFrame {
        /// Total frame length in bytes.
        len: usize,
    },

    /// Checksum carried by the frame does not match its payload.
    #[error("Checksum mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// Value carried in the frame.
        expected: u32,
        /// Value computed over the received payload.
        computed: u32,
    },

    /// DES engine misuse (bad key or ciphertext length).
    #[error("Cipher usage error: {0}")]
    CryptoUsage(#[from] DesError),

    /// RSA key generation failed.
    #[error("RSA error: {0}")]
    Rsa(#[from] RsaError),

    /// Outgoing message exceeds the configured capacity.
    #[error("Message too long: {len} > {max} bytes")]
    MessageTooLong {
        /// Message length in bytes.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Transport error.
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// Whether this error must tear the connection down.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ChatError::MalformedFrame { .. }
                | ChatError::ChecksumMismatch { .. }
                | ChatError::CryptoUsage(DesError::InvalidCiphertextLength(_))
                | ChatError::MessageTooLong { .. }
        )
    }
}
