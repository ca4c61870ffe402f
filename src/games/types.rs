use crate::common::types::{BetId, ItemId, Money, RoundId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coin side. Heads is side A of the flip.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CoinSide {
    Heads,
    Tails,
}

impl CoinSide {
    pub fn opposite(&self) -> Self {
        match self {
            CoinSide::Heads => CoinSide::Tails,
            CoinSide::Tails => CoinSide::Heads,
        }
    }
}

impl fmt::Display for CoinSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoinSide::Heads => write!(f, "heads"),
            CoinSide::Tails => write!(f, "tails"),
        }
    }
}

/// Wheel segment colour
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WheelSegment {
    Black,
    Purple,
    Pink,
    Gold,
}

impl fmt::Display for WheelSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WheelSegment::Black => write!(f, "black"),
            WheelSegment::Purple => write!(f, "purple"),
            WheelSegment::Pink => write!(f, "pink"),
            WheelSegment::Gold => write!(f, "gold"),
        }
    }
}

/// Game-specific part of a bet
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "game", rename_all = "lowercase")]
pub enum Selector {
    Coinflip { side: CoinSide },
    Wheel { segment: WheelSegment },
    /// Pot bets carry no choice; the ticket range comes from placement order
    Pot,
}

/// An item as it was priced when the bet was placed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemSnapshot {
    pub id: ItemId,
    pub name: String,
    pub price: Money,
}

/// What a bettor put at risk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Stake {
    Balance { amount: Money },
    Items { items: Vec<ItemSnapshot> },
}

impl Stake {
    pub fn value(&self) -> Money {
        match self {
            Stake::Balance { amount } => *amount,
            Stake::Items { items } => items.iter().map(|i| i.price).sum(),
        }
    }

    pub fn item_count(&self) -> u32 {
        match self {
            Stake::Balance { .. } => 0,
            Stake::Items { items } => items.len() as u32,
        }
    }

    pub fn items(&self) -> &[ItemSnapshot] {
        match self {
            Stake::Balance { .. } => &[],
            Stake::Items { items } => items,
        }
    }
}

/// Stake as requested by a bettor, before prices are snapshotted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum StakeSpec {
    Balance(Money),
    Items(Vec<ItemId>),
}

impl StakeSpec {
    pub fn is_empty(&self) -> bool {
        match self {
            StakeSpec::Balance(amount) => *amount <= 0,
            StakeSpec::Items(ids) => ids.is_empty(),
        }
    }
}

/// An accepted, immutable wager
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bet {
    pub id: BetId,
    pub round_id: RoundId,
    /// Placement order within the round, starting at 0
    pub seq: u32,
    pub bettor: UserId,
    pub stake: Stake,
    pub selector: Selector,
    pub placed_at: DateTime<Utc>,
}

impl Bet {
    pub fn value(&self) -> Money {
        self.stake.value()
    }
}

/// Resolved result of a round. Written once, never changed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "game", rename_all = "lowercase")]
pub enum Outcome {
    Coinflip {
        ticket: Money,
        winning_side: CoinSide,
        winner: UserId,
    },
    Wheel {
        roll: u32,
        segment: WheelSegment,
        multiplier_bps: u32,
    },
    Pot {
        ticket: Money,
        winning_bet: BetId,
        winner: UserId,
    },
}

impl Outcome {
    pub fn winner(&self) -> Option<&str> {
        match self {
            Outcome::Coinflip { winner, .. } | Outcome::Pot { winner, .. } => Some(winner),
            Outcome::Wheel { .. } => None,
        }
    }
}
