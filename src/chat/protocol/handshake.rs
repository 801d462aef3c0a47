//! RSA key exchange that establishes the DES session key.
//!
//! ## Flow
//!
//! 1. Responder generates RSA key material and sends `PublicKeyMessage` (e, n)
//! 2. Initiator checks e and n are non-zero, generates a random 8-byte session
//!    key, and sends its four 16-bit words RSA-encrypted as `SessionKeyMessage`
//! 3. Responder decrypts the four words and reassembles the key
//! 4. Both sides reject an all-zero key
//!
//! The state machines here do no I/O; the async drivers live in
//! [`crate::chat::session`].

use rand::{Rng, RngCore};

use crate::chat::error::ChatError;
use crate::crypto::rsa::{self, PublicKey, RsaKeyMaterial};
use crate::crypto::DesKey;

/// Encoded size of [`PublicKeyMessage`].
pub const PUBLIC_KEY_MESSAGE_LEN: usize = 16;

/// Encoded size of [`SessionKeyMessage`].
pub const SESSION_KEY_MESSAGE_LEN: usize = 32;

/// Number of 16-bit words in a session key.
pub const SESSION_KEY_WORDS: usize = 4;

/// Role in the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Connected to the peer and generates the session key.
    Initiator,
    /// Accepted the connection and generates the RSA keypair.
    Responder,
}

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    /// Responder has sent its public key.
    KeysSent,
    /// Initiator is waiting for the public key.
    AwaitingKeys,
    /// Session key words have been sent or received.
    KeyMaterialExchanged,
    Established,
    Aborted,
}

/// The symmetric key agreed for one connection.
///
/// Never all-zero. Copied by value into each worker.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SessionKey(DesKey);

impl SessionKey {
    /// Wraps a DES key, rejecting the all-zero key.
    pub fn new(key: DesKey) -> Result<Self, ChatError> {
        if key.is_zero() {
            return Err(ChatError::Config("session key is all zeros".to_string()));
        }
        Ok(Self(key))
    }

    /// Builds a key from the first 8 bytes of `bytes`.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ChatError> {
        let key = DesKey::from_slice(bytes).map_err(|e| ChatError::Config(e.to_string()))?;
        Self::new(key)
    }

    /// Reassembles a key from words in transmission order.
    pub fn from_words(words: [u16; SESSION_KEY_WORDS]) -> Result<Self, ChatError> {
        let mut bytes = [0u8; 8];
        for (chunk, word) in bytes.chunks_exact_mut(2).zip(words) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }
        Self::new(DesKey::new(bytes))
    }

    /// The key as four big-endian 16-bit words.
    pub fn words(&self) -> [u16; SESSION_KEY_WORDS] {
        let bytes = self.0.as_bytes();
        let mut words = [0u16; SESSION_KEY_WORDS];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(2)) {
            *word = u16::from_be_bytes([chunk[0], chunk[1]]);
        }
        words
    }

    pub fn des_key(&self) -> &DesKey {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Responder -> Initiator: the RSA public key.
///
/// Wire format: e then n, each a big-endian u64.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKeyMessage {
    pub e: u64,
    pub n: u64,
}

impl PublicKeyMessage {
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_MESSAGE_LEN] {
        let mut bytes = [0u8; PUBLIC_KEY_MESSAGE_LEN];
        bytes[..8].copy_from_slice(&self.e.to_be_bytes());
        bytes[8..].copy_from_slice(&self.n.to_be_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ChatError> {
        let words = read_u64s::<2>(bytes, "public key")?;
        Ok(Self {
            e: words[0],
            n: words[1],
        })
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            e: self.e,
            n: self.n,
        }
    }
}

impl From<PublicKey> for PublicKeyMessage {
    fn from(key: PublicKey) -> Self {
        Self { e: key.e, n: key.n }
    }
}

/// Initiator -> Responder: the RSA-encrypted session key words.
///
/// Wire format: four big-endian u64 ciphertexts in key word order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionKeyMessage {
    pub ciphertexts: [u64; SESSION_KEY_WORDS],
}

impl SessionKeyMessage {
    pub fn to_bytes(&self) -> [u8; SESSION_KEY_MESSAGE_LEN] {
        let mut bytes = [0u8; SESSION_KEY_MESSAGE_LEN];
        for (chunk, c) in bytes.chunks_exact_mut(8).zip(self.ciphertexts) {
            chunk.copy_from_slice(&c.to_be_bytes());
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ChatError> {
        Ok(Self {
            ciphertexts: read_u64s::<SESSION_KEY_WORDS>(bytes, "session key")?,
        })
    }
}

fn read_u64s<const N: usize>(bytes: &[u8], what: &str) -> Result<[u64; N], ChatError> {
    if bytes.len() != N * 8 {
        return Err(ChatError::Protocol(format!(
            "{} message must be {} bytes, got {}",
            what,
            N * 8,
            bytes.len()
        )));
    }

    let mut words = [0u64; N];
    for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(8)) {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(chunk);
        *word = u64::from_be_bytes(buf);
    }
    Ok(words)
}

/// A session key word that had to be reduced modulo n before encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClampedWord {
    pub index: usize,
    pub value: u64,
    pub modulus: u64,
}

/// Responder side of the key exchange.
#[derive(Debug)]
pub struct Responder {
    state: HandshakeState,
    material: Option<RsaKeyMaterial>,
}

impl Responder {
    pub fn new() -> Self {
        Self {
            state: HandshakeState::Idle,
            material: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Key material generated by [`start`](Self::start).
    pub fn material(&self) -> Option<&RsaKeyMaterial> {
        self.material.as_ref()
    }

    /// Generates key material from two `bits`-bit primes and returns the
    /// public key to send.
    pub fn start<R: Rng + ?Sized>(
        &mut self,
        bits: u32,
        rng: &mut R,
    ) -> Result<PublicKeyMessage, ChatError> {
        self.expect(HandshakeState::Idle)?;
        match RsaKeyMaterial::generate(bits, rng) {
            Ok(material) => self.start_with(material),
            Err(e) => Err(self.abort(e.into())),
        }
    }

    /// Like [`start`](Self::start) with caller-provided key material.
    pub fn start_with(&mut self, material: RsaKeyMaterial) -> Result<PublicKeyMessage, ChatError> {
        self.expect(HandshakeState::Idle)?;
        let message = PublicKeyMessage::from(material.public_key());
        self.material = Some(material);
        self.state = HandshakeState::KeysSent;
        Ok(message)
    }

    /// Decrypts the session key words and returns the agreed key.
    ///
    /// Also returns the ciphertexts that were reduced modulo n before
    /// decryption.
    pub fn finish(
        &mut self,
        message: &SessionKeyMessage,
    ) -> Result<(SessionKey, Vec<ClampedWord>), ChatError> {
        self.expect(HandshakeState::KeysSent)?;
        let private = match &self.material {
            Some(material) => material.private_key(),
            None => return Err(self.abort(ChatError::Protocol("no key material".to_string()))),
        };

        let mut clamped = Vec::new();
        let mut words = [0u16; SESSION_KEY_WORDS];
        for (index, (word, &c)) in words.iter_mut().zip(&message.ciphertexts).enumerate() {
            let mut c = c;
            if c >= private.n {
                clamped.push(ClampedWord {
                    index,
                    value: c,
                    modulus: private.n,
                });
                c %= private.n;
            }
            // Only the low 16 bits carry key material.
            *word = rsa::decrypt(c, &private) as u16;
        }
        self.state = HandshakeState::KeyMaterialExchanged;

        match SessionKey::from_words(words) {
            Ok(key) => {
                self.state = HandshakeState::Established;
                Ok((key, clamped))
            }
            Err(e) => Err(self.abort(e)),
        }
    }

    fn expect(&mut self, state: HandshakeState) -> Result<(), ChatError> {
        if self.state != state {
            let err = ChatError::Protocol(format!(
                "responder expected state {:?}, was {:?}",
                state, self.state
            ));
            return Err(self.abort(err));
        }
        Ok(())
    }

    fn abort(&mut self, err: ChatError) -> ChatError {
        self.state = HandshakeState::Aborted;
        err
    }
}

impl Default for Responder {
    fn default() -> Self {
        Self::new()
    }
}

/// Initiator side of the key exchange.
#[derive(Debug)]
pub struct Initiator {
    state: HandshakeState,
    pending: Option<DesKey>,
}

impl Initiator {
    pub fn new() -> Self {
        Self {
            state: HandshakeState::Idle,
            pending: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Marks the initiator as waiting for the responder's public key.
    pub fn await_keys(&mut self) -> Result<(), ChatError> {
        self.expect(HandshakeState::Idle)?;
        self.state = HandshakeState::AwaitingKeys;
        Ok(())
    }

    /// Validates the public key, generates a random session key and encrypts
    /// its words.
    pub fn receive_public_key<R: RngCore + ?Sized>(
        &mut self,
        message: &PublicKeyMessage,
        rng: &mut R,
    ) -> Result<(SessionKeyMessage, Vec<ClampedWord>), ChatError> {
        let public = self.accept_public_key(message)?;
        let mut bytes = [0u8; 8];
        rng.fill_bytes(&mut bytes);
        Ok(self.encrypt_key_words(&public, DesKey::new(bytes)))
    }

    /// Like [`receive_public_key`](Self::receive_public_key) with a
    /// caller-chosen key.
    ///
    /// Words not below n are reduced modulo n before encryption, and the
    /// reduced words become the session key, so both sides still agree.
    pub fn receive_public_key_with(
        &mut self,
        message: &PublicKeyMessage,
        key: DesKey,
    ) -> Result<(SessionKeyMessage, Vec<ClampedWord>), ChatError> {
        let public = self.accept_public_key(message)?;
        Ok(self.encrypt_key_words(&public, key))
    }

    /// Checks state and key before any session key material exists.
    fn accept_public_key(&mut self, message: &PublicKeyMessage) -> Result<PublicKey, ChatError> {
        self.expect(HandshakeState::AwaitingKeys)?;
        if message.e == 0 || message.n == 0 {
            return Err(self.abort(ChatError::Protocol(format!(
                "received invalid public key (e={}, n={})",
                message.e, message.n
            ))));
        }
        Ok(message.public_key())
    }

    fn encrypt_key_words(
        &mut self,
        public: &PublicKey,
        key: DesKey,
    ) -> (SessionKeyMessage, Vec<ClampedWord>) {
        let mut bytes = *key.as_bytes();
        let mut clamped = Vec::new();
        let mut ciphertexts = [0u64; SESSION_KEY_WORDS];

        for (index, (chunk, c)) in bytes
            .chunks_exact_mut(2)
            .zip(ciphertexts.iter_mut())
            .enumerate()
        {
            let mut word = u64::from(u16::from_be_bytes([chunk[0], chunk[1]]));
            if word >= public.n {
                clamped.push(ClampedWord {
                    index,
                    value: word,
                    modulus: public.n,
                });
                word %= public.n;
                chunk.copy_from_slice(&(word as u16).to_be_bytes());
            }
            *c = rsa::encrypt(word, public);
        }

        self.pending = Some(DesKey::new(bytes));
        self.state = HandshakeState::KeyMaterialExchanged;
        (SessionKeyMessage { ciphertexts }, clamped)
    }

    /// Checks the exchanged key and completes the handshake.
    pub fn establish(&mut self) -> Result<SessionKey, ChatError> {
        self.expect(HandshakeState::KeyMaterialExchanged)?;
        let Some(key) = self.pending.take() else {
            return Err(self.abort(ChatError::Protocol("no session key".to_string())));
        };
        match SessionKey::new(key) {
            Ok(key) => {
                self.state = HandshakeState::Established;
                Ok(key)
            }
            Err(e) => Err(self.abort(e)),
        }
    }

    fn expect(&mut self, state: HandshakeState) -> Result<(), ChatError> {
        if self.state != state {
            let err = ChatError::Protocol(format!(
                "initiator expected state {:?}, was {:?}",
                state, self.state
            ));
            return Err(self.abort(err));
        }
        Ok(())
    }

    fn abort(&mut self, err: ChatError) -> ChatError {
        self.state = HandshakeState::Aborted;
        err
    }
}

impl Default for Initiator {
    fn default() -> Self {
        Self::new()
    }
}
