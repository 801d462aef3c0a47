//! # Secretchat Chat Module
//!
//! Two-party chat over one TCP connection.
//!
//! ## Flow
//!
//! 1. The responder listens, the initiator connects
//! 2. RSA handshake: the responder publishes (e, n), the initiator returns a
//!    random DES key as four RSA-encrypted 16-bit words
//! 3. Each side runs a send worker (typed lines to frames) and a receive
//!    worker (frames to displayed messages) until the connection closes
//!
//! ## Security Model
//!
//! None worth the name. DES in ECB mode with zero fill, textbook RSA with
//! primes of at most 32 bits, and an additive checksum that any attacker can
//! recompute. The handshake is not authenticated.

mod config;
mod error;
pub mod events;
pub mod protocol;
pub mod session;
pub mod transport;

pub use config::{
    ChatConfig, CHECKSUM_SIZE, DEFAULT_BIND_ADDR, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_PORT,
};
pub use error::ChatError;
pub use events::{ChatEvent, DiagnosticSink, MemorySink, TracingSink};
pub use protocol::{Frame, HandshakeState, Role, SessionKey};
pub use session::{
    establish_as_initiator, establish_as_responder, ChatSession, SessionSummary, QUIT_COMMAND,
};
