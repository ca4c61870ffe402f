//! Round lifecycle states and the transitions allowed between them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a single wagering round.
///
/// `Waiting -> Open -> Locked -> Resolving -> Settled`, with `Cancelled`
/// reachable only while bets are still being taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundState {
    /// Below the participant threshold; bets accepted, no timer running
    Waiting,
    /// Accepting bets with a lock deadline
    Open,
    /// No further bets; outcome not yet obtained
    Locked,
    /// Outcome persisted, payout in flight
    Resolving,
    Settled,
    Cancelled,
}

impl RoundState {
    pub const ALL: [RoundState; 6] = [
        RoundState::Waiting,
        RoundState::Open,
        RoundState::Locked,
        RoundState::Resolving,
        RoundState::Settled,
        RoundState::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoundState::Waiting => "waiting",
            RoundState::Open => "open",
            RoundState::Locked => "locked",
            RoundState::Resolving => "resolving",
            RoundState::Settled => "settled",
            RoundState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RoundState::Settled | RoundState::Cancelled)
    }

    pub fn accepts_bets(&self) -> bool {
        matches!(self, RoundState::Waiting | RoundState::Open)
    }

    pub fn can_transition_to(&self, next: RoundState) -> bool {
        use RoundState::*;
        matches!(
            (self, next),
            (Waiting, Open)
                | (Waiting, Cancelled)
                | (Open, Locked)
                | (Open, Cancelled)
                | (Locked, Resolving)
                | (Resolving, Settled)
        )
    }
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
