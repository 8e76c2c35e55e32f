//! Commitment and entropy-combination primitives
//!
//! The scheme only needs three operations: hash a secret into a binding
//! commitment, XOR all revealed secrets into shared entropy, and map that
//! entropy onto a dice range. XOR is commutative, so network arrival order
//! never changes the outcome once every contribution is fixed by its
//! commitment.

use crate::SECRET_LEN;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Fresh cryptographically secure secret
pub fn generate_secret() -> [u8; SECRET_LEN] {
    let mut secret = [0u8; SECRET_LEN];
    OsRng.fill_bytes(&mut secret);
    secret
}

/// Hex-encoded SHA-256 commitment of a secret
pub fn commit_of(secret: &[u8]) -> String {
    hex::encode(Sha256::digest(secret))
}

/// Bytewise XOR of all buffers, zero-extended to the longest one
pub fn combine<'a, I>(secrets: I) -> Vec<u8>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut combined: Vec<u8> = Vec::new();
    for secret in secrets {
        if secret.len() > combined.len() {
            combined.resize(secret.len(), 0);
        }
        for (i, byte) in secret.iter().enumerate() {
            combined[i] ^= byte;
        }
    }
    combined
}

/// Map combined entropy to a roll in `[1, sides]`
///
/// The first 4 bytes are read as an unsigned big-endian 32-bit integer
/// (zero-extended if the buffer is shorter) and reduced modulo `sides`.
/// Modulo bias is negligible for sides <= 100 against a 32-bit domain.
pub fn map_to_range(bytes: &[u8], sides: u16) -> u32 {
    let mut word = [0u8; 4];
    for (i, byte) in bytes.iter().take(4).enumerate() {
        word[i] = *byte;
    }
    (u32::from_be_bytes(word) % u32::from(sides)) + 1
}
