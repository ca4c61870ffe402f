//! Round lifecycle events
//!
//! Fire-and-forget notifications for whatever transport sits in front of the
//! engine. Emitting never fails and never blocks settlement.

use crate::common::types::{GameKind, Money, RoundId};
use crate::games::types::{Bet, Outcome};
use crate::round::{CancelReason, SettlementSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum RoundEvent {
    #[serde(rename = "round.open")]
    RoundOpened {
        round_id: RoundId,
        game: GameKind,
        commitment_hash: String,
        lock_deadline: Option<DateTime<Utc>>,
    },

    #[serde(rename = "round.locked")]
    RoundLocked {
        round_id: RoundId,
        game: GameKind,
        pot_total: Money,
    },

    /// Outcome fixed; the seed is public from here on
    #[serde(rename = "round.resolved")]
    RoundResolved {
        round_id: RoundId,
        game: GameKind,
        outcome: Outcome,
        server_seed: String,
        external_randomness: String,
        external_signature: String,
    },

    #[serde(rename = "round.settled")]
    RoundSettled {
        round_id: RoundId,
        game: GameKind,
        summary: SettlementSummary,
    },

    #[serde(rename = "round.cancelled")]
    RoundCancelled {
        round_id: RoundId,
        game: GameKind,
        reason: CancelReason,
    },

    /// Needs an operator before it can move again
    #[serde(rename = "round.held")]
    RoundHeld {
        round_id: RoundId,
        game: GameKind,
        code: String,
        reason: String,
    },

    #[serde(rename = "round.alert")]
    RoundAlert {
        round_id: RoundId,
        game: GameKind,
        attempts: u32,
        last_error: String,
    },

    #[serde(rename = "bet.placed")]
    BetPlaced {
        round_id: RoundId,
        game: GameKind,
        bet: Bet,
        pot_total: Money,
    },
}

impl RoundEvent {
    pub fn round_id(&self) -> RoundId {
        match self {
            RoundEvent::RoundOpened { round_id, .. }
            | RoundEvent::RoundLocked { round_id, .. }
            | RoundEvent::RoundResolved { round_id, .. }
            | RoundEvent::RoundSettled { round_id, .. }
            | RoundEvent::RoundCancelled { round_id, .. }
            | RoundEvent::RoundHeld { round_id, .. }
            | RoundEvent::RoundAlert { round_id, .. }
            | RoundEvent::BetPlaced { round_id, .. } => *round_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RoundEvent::RoundOpened { .. } => "round.open",
            RoundEvent::RoundLocked { .. } => "round.locked",
            RoundEvent::RoundResolved { .. } => "round.resolved",
            RoundEvent::RoundSettled { .. } => "round.settled",
            RoundEvent::RoundCancelled { .. } => "round.cancelled",
            RoundEvent::RoundHeld { .. } => "round.held",
            RoundEvent::RoundAlert { .. } => "round.alert",
            RoundEvent::BetPlaced { .. } => "bet.placed",
        }
    }
}

/// Destination for lifecycle events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RoundEvent);
}

/// Broadcasts events to every live subscriber
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<RoundEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoundEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: RoundEvent) {
        let name = event.name();
        if let Err(e) = self.tx.send(event) {
            debug!(event = name, "No subscribers for round event: {}", e);
        }
    }
}
