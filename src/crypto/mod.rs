//! Cryptographic engines for secretchat.
//!
//! This module provides:
//! - Bit-table permutation shared by every DES stage
//! - DES block cipher (key schedule, Feistel rounds, ECB buffers)
//! - Textbook RSA (Miller-Rabin primes, keypairs, modular exponentiation)
//!
//! Both ciphers are written from scratch and reproduce their textbook
//! weaknesses on purpose: DES runs without chaining or padding, RSA without
//! padding.

pub mod des;
pub mod des_tables;
pub mod permute;
pub mod rsa;

pub use des::{
    decrypt_block, derive_schedule, encrypt_block, Block, DesError, DesKey, RoundKey,
    RoundKeySchedule, BLOCK_SIZE,
};
pub use rsa::{
    generate_keypair, is_probable_prime, PrivateKey, PublicKey, RsaError, RsaKeyMaterial,
    DEFAULT_PRIME_BITS,
};
