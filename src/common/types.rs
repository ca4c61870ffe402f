//! Shared type definitions for the settlement engine
//!
//! Canonical identifiers, money and ledger parties used by every component.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Amount in minor currency units (cents). Never a float.
pub type Money = i64;

/// Basis points, 1/10_000.
pub type BasisPoints = u32;

pub const BPS_DENOMINATOR: i64 = 10_000;

/// Platform user identifier
pub type UserId = String;

/// Inventory item identifier
pub type ItemId = String;

/// `amount * bps / 10_000`, truncated toward zero.
pub fn apply_bps(amount: Money, bps: BasisPoints) -> Money {
    ((amount as i128 * bps as i128) / BPS_DENOMINATOR as i128) as Money
}

/// Unique round identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(pub Uuid);

impl RoundId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RoundId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique bet identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BetId(pub Uuid);

impl BetId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The three supported game shapes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameKind {
    Coinflip,
    Wheel,
    Pot,
}

impl GameKind {
    pub const ALL: [GameKind; 3] = [GameKind::Coinflip, GameKind::Wheel, GameKind::Pot];

    pub fn as_str(&self) -> &'static str {
        match self {
            GameKind::Coinflip => "coinflip",
            GameKind::Wheel => "wheel",
            GameKind::Pot => "pot",
        }
    }
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner of balances and items in the ledger
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Party {
    User(UserId),
    /// House-held pseudo-account holding reserved stakes
    Escrow,
    House,
}

impl Party {
    pub fn user(id: impl Into<UserId>) -> Self {
        Party::User(id.into())
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Party::User(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Party::User(id) => write!(f, "user:{}", id),
            Party::Escrow => f.write_str("escrow"),
            Party::House => f.write_str("house"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_bps_truncates() {
        assert_eq!(apply_bps(20_500, 500), 1_025);
        assert_eq!(apply_bps(999, 500), 49);
        assert_eq!(apply_bps(0, 500), 0);
        assert_eq!(apply_bps(5_000, 300_000), 150_000);
    }

    #[test]
    fn test_party_serialization() {
        let json = serde_json::to_string(&Party::user("alice")).unwrap();
        assert_eq!(json, r#"{"kind":"user","id":"alice"}"#);
        let back: Party = serde_json::from_str(r#"{"kind":"escrow"}"#).unwrap();
        assert_eq!(back, Party::Escrow);
    }
}
