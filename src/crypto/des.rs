//! DES block cipher.
//!
//! A straight implementation of the 16-round Feistel network: the key
//! schedule is a pure function of the key ([`derive_schedule`]) and the
//! block transforms take the schedule explicitly, so there is no cipher
//! object carrying state between calls.
//!
//! Buffers are processed as independent 8-byte blocks (ECB). The final
//! partial block is zero-filled and no padding marker is written, so
//! [`decrypt`] returns the plaintext followed by the zero fill. Callers that
//! need the exact length must carry it themselves.

use std::fmt;

use thiserror::Error;
use zeroize::Zeroize;

use super::des_tables::{E, IP, IP_INV, P, PC1, PC2, ROTATIONS, S_BOXES};
use super::permute::{permute, rotate_left_28};

/// Cipher block size in bytes.
pub const BLOCK_SIZE: usize = 8;

/// Number of Feistel rounds.
pub const ROUNDS: usize = 16;

/// One 8-byte cipher block.
pub type Block = [u8; BLOCK_SIZE];

/// Errors that can occur when using the DES engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DesError {
    #[error("DES key must be at least 8 bytes, got {0}")]
    KeyTooShort(usize),

    #[error("Ciphertext length must be a positive multiple of 8, got {0}")]
    InvalidCiphertextLength(usize),
}

/// An 8-byte DES key.
///
/// Parity bits are not checked; any 8 bytes are accepted.
#[derive(Clone, Copy, PartialEq, Eq, Zeroize)]
pub struct DesKey([u8; 8]);

impl DesKey {
    /// Wraps 8 key bytes.
    pub fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Builds a key from the first 8 bytes of `bytes`.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DesError> {
        let head: [u8; 8] = bytes
            .get(..8)
            .and_then(|head| head.try_into().ok())
            .ok_or(DesError::KeyTooShort(bytes.len()))?;
        Ok(Self(head))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// True if every key byte is zero.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// The same key with its byte order reversed.
    pub fn reversed(&self) -> Self {
        let mut bytes = self.0;
        bytes.reverse();
        Self(bytes)
    }

    /// Key bytes as lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for DesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DesKey(..)")
    }
}

/// A 48-bit round subkey, stored as two 24-bit halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoundKey {
    pub left: u32,
    pub right: u32,
}

impl RoundKey {
    fn as_u64(self) -> u64 {
        (u64::from(self.left) << 24) | u64::from(self.right)
    }
}

/// The 16 round subkeys derived from one [`DesKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundKeySchedule([RoundKey; ROUNDS]);

impl RoundKeySchedule {
    /// Subkey for round `round` (0-based).
    pub fn round(&self, round: usize) -> RoundKey {
        self.0[round]
    }

    /// Subkeys in round order.
    pub fn keys(&self) -> &[RoundKey; ROUNDS] {
        &self.0
    }
}

/// Derives the round subkeys for `key`.
///
/// PC1 splits the key into the 28-bit halves C0 and D0. Each round rotates
/// both halves left by the round's amount and PC2 compresses the 56-bit
/// result into the round subkey.
pub fn derive_schedule(key: &DesKey) -> RoundKeySchedule {
    let reduced = permute(u64::from_be_bytes(key.0), 64, &PC1);
    let mut c = (reduced >> 28) as u32 & 0x0FFF_FFFF;
    let mut d = reduced as u32 & 0x0FFF_FFFF;

    let mut keys = [RoundKey::default(); ROUNDS];
    for (round_key, &shift) in keys.iter_mut().zip(ROTATIONS.iter()) {
        c = rotate_left_28(c, shift);
        d = rotate_left_28(d, shift);
        let compressed = permute((u64::from(c) << 28) | u64::from(d), 56, &PC2);
        *round_key = RoundKey {
            left: (compressed >> 24) as u32 & 0x00FF_FFFF,
            right: compressed as u32 & 0x00FF_FFFF,
        };
    }

    RoundKeySchedule(keys)
}

/// The round function F(R, K).
fn feistel(right: u32, key: RoundKey) -> u32 {
    let mixed = permute(u64::from(right), 32, &E) ^ key.as_u64();

    let substituted = S_BOXES.iter().enumerate().fold(0u32, |acc, (i, sbox)| {
        let group = ((mixed >> (42 - 6 * i)) & 0x3F) as usize;
        let row = ((group & 0x20) >> 4) | (group & 0x01);
        let column = (group >> 1) & 0x0F;
        (acc << 4) | u32::from(sbox[row * 16 + column])
    });

    permute(u64::from(substituted), 32, &P) as u32
}

fn crypt_block<'a>(block: Block, keys: impl Iterator<Item = &'a RoundKey>) -> Block {
    let permuted = permute(u64::from_be_bytes(block), 64, &IP);
    let mut left = (permuted >> 32) as u32;
    let mut right = permuted as u32;

    for &key in keys {
        let next = left ^ feistel(right, key);
        left = right;
        right = next;
    }

    // The halves are swapped before the final permutation.
    let preoutput = (u64::from(right) << 32) | u64::from(left);
    permute(preoutput, 64, &IP_INV).to_be_bytes()
}

/// Encrypts one block.
pub fn encrypt_block(block: Block, schedule: &RoundKeySchedule) -> Block {
    crypt_block(block, schedule.keys().iter())
}

/// Decrypts one block; subkeys are applied from round 16 down to round 1.
pub fn decrypt_block(block: Block, schedule: &RoundKeySchedule) -> Block {
    crypt_block(block, schedule.keys().iter().rev())
}

/// Encrypts `plaintext` under `key`.
///
/// The output is `plaintext.len()` rounded up to a multiple of 8; the last
/// block is zero-filled. Empty input yields empty output.
pub fn encrypt(plaintext: &[u8], key: &DesKey) -> Vec<u8> {
    let schedule = derive_schedule(key);
    let mut ciphertext = Vec::with_capacity(padded_len(plaintext.len()));

    for chunk in plaintext.chunks(BLOCK_SIZE) {
        let mut block = [0u8; BLOCK_SIZE];
        block[..chunk.len()].copy_from_slice(chunk);
        ciphertext.extend_from_slice(&encrypt_block(block, &schedule));
    }

    ciphertext
}

/// Decrypts `ciphertext` under `key`.
///
/// Returns every decrypted byte, including any zero fill added by
/// [`encrypt`].
pub fn decrypt(ciphertext: &[u8], key: &DesKey) -> Result<Vec<u8>, DesError> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(DesError::InvalidCiphertextLength(ciphertext.len()));
    }

    let schedule = derive_schedule(key);
    let mut plaintext = Vec::with_capacity(ciphertext.len());

    for chunk in ciphertext.chunks_exact(BLOCK_SIZE) {
        let mut block = [0u8; BLOCK_SIZE];
        block.copy_from_slice(chunk);
        plaintext.extend_from_slice(&decrypt_block(block, &schedule));
    }

    Ok(plaintext)
}

/// Length of the ciphertext produced for `len` plaintext bytes.
pub fn padded_len(len: usize) -> usize {
    len.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}
