//! Chat protocol types and operations.
//!
//! - **Handshake**: RSA transport of a random 8-byte DES session key
//! - **Frames**: checksummed DES-ECB ciphertext, one per typed line

mod frame;
mod handshake;

pub use frame::{checksum, display_text, Frame, MALFORMED_FRAME_LEN};
pub use handshake::{
    ClampedWord, HandshakeState, Initiator, PublicKeyMessage, Responder, Role, SessionKey,
    SessionKeyMessage, PUBLIC_KEY_MESSAGE_LEN, SESSION_KEY_MESSAGE_LEN, SESSION_KEY_WORDS,
};
