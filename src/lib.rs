//! # Secretchat - peer-to-peer chat over DES and RSA
//!
//! Secretchat connects two terminals over TCP and exchanges typed lines
//! encrypted with a DES session key. The session key is agreed with a small
//! RSA handshake. Both ciphers are implemented from scratch in [`crypto`].
//!
//! ## Overview
//!
//! - **DES**: 16-round Feistel cipher over 64-bit blocks, used in ECB mode
//!   with zero fill
//! - **RSA**: Miller-Rabin prime generation, overflow-safe modular
//!   arithmetic, keys of up to 64 bits
//! - **Handshake**: responder sends (e, n); initiator sends the 8-byte DES
//!   key as four encrypted 16-bit words
//! - **Frames**: `[checksum: u32 BE][ciphertext]`, one per typed line
//!
//! This is a teaching toy. Nothing here resists a real attacker.
//!
//! ## Example Usage
//!
//! ```rust
//! use secretchat::crypto::des::{decrypt, encrypt};
//! use secretchat::crypto::DesKey;
//!
//! let key = DesKey::new(*b"benbemmi");
//! let ciphertext = encrypt(b"HELLO", &key);
//! assert_eq!(ciphertext.len(), 8);
//!
//! let plaintext = decrypt(&ciphertext, &key).unwrap();
//! assert_eq!(&plaintext, b"HELLO\0\0\0");
//! ```

pub mod chat;
pub mod crypto;

pub use chat::{ChatConfig, ChatError, ChatSession, SessionKey};
pub use crypto::{DesKey, PublicKey, RsaKeyMaterial};
