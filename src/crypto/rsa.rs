//! Textbook RSA over 64-bit words.
//!
//! Primes are drawn with Miller-Rabin, the modulus fits in a `u64`, and
//! encryption is bare modular exponentiation with no padding. Every product
//! goes through [`mul_mod`], which never forms a value wider than the
//! modulus, so moduli close to 2^64 stay correct.

use rand::Rng;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Prime size used for session handshakes.
pub const DEFAULT_PRIME_BITS: u32 = 16;

/// Smallest accepted prime size.
pub const MIN_PRIME_BITS: u32 = 4;

/// Largest accepted prime size; two such primes keep `n` within 64 bits.
pub const MAX_PRIME_BITS: u32 = 32;

/// Public exponent tried first.
pub const PREFERRED_EXPONENT: u64 = 65537;

/// Random Miller-Rabin witnesses per candidate.
pub const MILLER_RABIN_ROUNDS: usize = 5;

/// Bases checked before the random rounds. Together they decide primality
/// exactly for every n below 1,373,653.
const FIXED_WITNESSES: [u64; 2] = [2, 3];

/// Errors that can occur during RSA key generation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RsaError {
    #[error("Prime size must be between 4 and 32 bits, got {0}")]
    InvalidBitLength(u32),
}

/// RSA public key (e, n).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    pub e: u64,
    pub n: u64,
}

/// RSA private key (d, n).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Zeroize)]
pub struct PrivateKey {
    pub d: u64,
    pub n: u64,
}

/// Everything derived while building a keypair.
///
/// Held by the responder for the lifetime of one connection.
#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub struct RsaKeyMaterial {
    pub p: u64,
    pub q: u64,
    pub n: u64,
    pub phi: u64,
    pub e: u64,
    pub d: u64,
}

impl RsaKeyMaterial {
    /// Generates fresh key material from two random `bits`-bit primes.
    ///
    /// The two draws are independent; `p == q` is possible and yields a
    /// broken keypair rather than an error.
    pub fn generate<R: Rng + ?Sized>(bits: u32, rng: &mut R) -> Result<Self, RsaError> {
        let p = generate_prime(bits, rng)?;
        let q = generate_prime(bits, rng)?;
        Ok(Self::from_primes(p, q))
    }

    /// Derives n, φ, e and d from the given primes.
    ///
    /// `d` is 0 when e has no inverse modulo φ.
    pub fn from_primes(p: u64, q: u64) -> Self {
        let n = p.wrapping_mul(q);
        let phi = (p - 1).wrapping_mul(q - 1);
        let e = choose_exponent(phi);
        let d = mod_inverse(e, phi);
        Self { p, q, n, phi, e, d }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            e: self.e,
            n: self.n,
        }
    }

    pub fn private_key(&self) -> PrivateKey {
        PrivateKey {
            d: self.d,
            n: self.n,
        }
    }

    /// Encrypts then decrypts `m` with this keypair and reports whether the
    /// value survived. Only meaningful for `m < n`.
    pub fn self_check(&self, m: u64) -> bool {
        decrypt(encrypt(m, &self.public_key()), &self.private_key()) == m
    }
}

/// Generates a keypair from two random `bits`-bit primes.
pub fn generate_keypair<R: Rng + ?Sized>(
    bits: u32,
    rng: &mut R,
) -> Result<(PublicKey, PrivateKey), RsaError> {
    let material = RsaKeyMaterial::generate(bits, rng)?;
    Ok((material.public_key(), material.private_key()))
}

/// Computes `m^e mod n`.
///
/// Values of `m` at or above `n` are reduced first; no padding is applied.
/// `key.n` must be non-zero.
pub fn encrypt(m: u64, key: &PublicKey) -> u64 {
    pow_mod(m, key.e, key.n)
}

/// Computes `c^d mod n`. `key.n` must be non-zero.
pub fn decrypt(c: u64, key: &PrivateKey) -> u64 {
    pow_mod(c, key.d, key.n)
}

/// `(a + b) mod m` for `a, b < m` without overflowing.
fn add_mod(a: u64, b: u64, m: u64) -> u64 {
    if a >= m - b {
        a - (m - b)
    } else {
        a + b
    }
}

/// `(a * b) mod m` by binary long multiplication.
///
/// The running sum and the doubled addend are reduced after every step, so
/// no intermediate exceeds `m`. `m` must be non-zero.
pub fn mul_mod(a: u64, b: u64, m: u64) -> u64 {
    let mut addend = a % m;
    let mut multiplier = b % m;
    let mut result = 0;

    while multiplier > 0 {
        if multiplier & 1 == 1 {
            result = add_mod(result, addend, m);
        }
        addend = add_mod(addend, addend, m);
        multiplier >>= 1;
    }

    result
}

/// `base^exp mod m` by square-and-multiply. `m` must be non-zero.
pub fn pow_mod(base: u64, exp: u64, m: u64) -> u64 {
    let mut result = 1 % m;
    let mut base = base % m;
    let mut exp = exp;

    while exp > 0 {
        if exp & 1 == 1 {
            result = mul_mod(result, base, m);
        }
        base = mul_mod(base, base, m);
        exp >>= 1;
    }

    result
}

pub fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

/// Inverse of `a` modulo `m` via the extended Euclidean algorithm.
///
/// Returns 0 when no inverse exists. That value is also what a degenerate
/// but valid inverse would look like; callers cannot tell the two apart.
pub fn mod_inverse(a: u64, m: u64) -> u64 {
    let (mut old_r, mut r) = (i128::from(a), i128::from(m));
    let (mut old_s, mut s) = (1i128, 0i128);

    while r != 0 {
        let quotient = old_r / r;
        (old_r, r) = (r, old_r - quotient * r);
        (old_s, s) = (s, old_s - quotient * s);
    }

    if old_r > 1 {
        return 0;
    }
    if old_s < 0 {
        old_s += i128::from(m);
    }
    old_s as u64
}

/// Picks the public exponent for a given φ.
///
/// 65537 when it is smaller than φ and coprime with it; otherwise the
/// smallest odd e ≥ 3 coprime with φ, searched below min(φ, 2^32 - 1).
/// Falls back to 3 if the search finds nothing, even though 3 may then share
/// a factor with φ.
pub fn choose_exponent(phi: u64) -> u64 {
    if phi > PREFERRED_EXPONENT && gcd(PREFERRED_EXPONENT, phi) == 1 {
        return PREFERRED_EXPONENT;
    }

    let ceiling = phi.min(u64::from(u32::MAX));
    (3..ceiling)
        .step_by(2)
        .find(|&e| gcd(e, phi) == 1)
        .unwrap_or(3)
}

/// Strong probable-prime test of odd `n` to base `a`, with `n - 1 = d·2^s`.
fn passes_witness(n: u64, a: u64, d: u64, s: u32) -> bool {
    let mut x = pow_mod(a, d, n);
    if x == 1 || x == n - 1 {
        return true;
    }

    for _ in 1..s {
        x = mul_mod(x, x, n);
        if x == n - 1 {
            return true;
        }
    }

    false
}

/// Miller-Rabin primality test with `rounds` random witnesses in [2, n-2].
///
/// The fixed bases 2 and 3 are tried first, which only ever rejects
/// composites.
pub fn is_probable_prime<R: Rng + ?Sized>(n: u64, rounds: usize, rng: &mut R) -> bool {
    if n < 2 {
        return false;
    }
    if n < 4 {
        return true;
    }
    if n % 2 == 0 {
        return false;
    }

    let s = (n - 1).trailing_zeros();
    let d = (n - 1) >> s;

    if !FIXED_WITNESSES.iter().all(|&a| passes_witness(n, a, d, s)) {
        return false;
    }

    (0..rounds).all(|_| {
        let a = rng.gen_range(2..=n - 2);
        passes_witness(n, a, d, s)
    })
}

/// Draws odd integers in [2^(bits-1), 2^bits - 1] until one is a probable
/// prime.
pub fn generate_prime<R: Rng + ?Sized>(bits: u32, rng: &mut R) -> Result<u64, RsaError> {
    if !(MIN_PRIME_BITS..=MAX_PRIME_BITS).contains(&bits) {
        return Err(RsaError::InvalidBitLength(bits));
    }

    let low = 1u64 << (bits - 1);
    let high = (1u64 << bits) - 1;

    loop {
        let candidate = rng.gen_range(low..=high) | 1;
        if is_probable_prime(candidate, MILLER_RABIN_ROUNDS, rng) {
            return Ok(candidate);
        }
    }
}
