//! Pure outcome derivation.
//!
//! Anyone holding the revealed seed and the beacon string can recompute every
//! number here and check it against the published commitment.

use crate::common::types::Money;
use sha2::{Digest, Sha256};

/// `hex(sha256(seed))`, published before any bet is taken
pub fn commitment_hash(seed: &str) -> String {
    hex::encode(Sha256::digest(seed.as_bytes()))
}

/// The string that is hashed to produce the outcome
pub fn combined_input(seed: &str, external: &str) -> String {
    format!("{}-{}", seed, external)
}

pub fn outcome_digest(seed: &str, external: &str) -> [u8; 32] {
    Sha256::digest(combined_input(seed, external).as_bytes()).into()
}

/// First 8 digest bytes, big-endian
pub fn raw_value(digest: &[u8; 32]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Uniform fraction in [0, 1) from the top 53 bits, exact in an f64
pub fn fraction(raw: u64) -> f64 {
    (raw >> 11) as f64 / (1u64 << 53) as f64
}

/// Ticket in [0, pot). Exact integer scaling, no float rounding.
pub fn ticket(raw: u64, pot: Money) -> Money {
    if pot <= 0 {
        return 0;
    }
    ((raw as u128 * pot as u128) >> 64) as Money
}

/// Wheel slot from the first 13 hex digits (52 bits) of the digest
pub fn roll(raw: u64, slots: u32) -> u32 {
    if slots == 0 {
        return 0;
    }
    ((raw >> 12) % slots as u64) as u32
}
