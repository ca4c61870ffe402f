use crate::common::types::{GameKind, Money, RoundId, UserId};
use crate::config::GameConfig;
use crate::errors::{ConfigurationError, TransitionError, WagerResult};
use crate::fairness::{CommitmentToken, ResolutionResult};
use crate::games::types::{Bet, CoinSide, Outcome};
use crate::round::RoundState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a round ended without settling
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum CancelReason {
    CreatorCancelled,
    InsufficientParticipants,
    Expired,
    Operator(String),
}

/// Terms of a coinflip set by its creator
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlipTerms {
    pub creator: UserId,
    pub creator_side: CoinSide,
    pub creator_stake: Money,
    /// Inclusive range the joiner's stake must fall in
    pub join_low: Money,
    pub join_high: Money,
}

/// Backoff bookkeeping for the resolve/settle stages
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryState {
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub alerted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl RetryState {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.map_or(true, |at| now >= at)
    }
}

/// Manual-intervention marker. Held rounds are never advanced automatically.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hold {
    pub code: String,
    pub reason: String,
    pub since: DateTime<Utc>,
}

/// Money movement totals written at settlement
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SettlementSummary {
    pub paid_to_winners: Money,
    pub rake: Money,
    pub house_retained: Money,
    pub house_cover: Money,
    pub affiliate_paid: Money,
    pub transfer_count: u32,
}

/// Persistent round record
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Round {
    pub id: RoundId,
    pub kind: GameKind,
    pub state: RoundState,
    /// Bumped on every write
    pub version: u64,
    /// Secret until the round resolves; never exposed through views before then
    pub server_seed: String,
    pub commitment_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ResolutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    pub pot_total: Money,
    pub item_count: u32,
    pub bet_count: u32,
    pub participants: Vec<UserId>,
    /// Settings snapshot taken at creation
    pub config: GameConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flip: Option<FlipTerms>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub opened_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub lock_deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub locked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub settled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<CancelReason>,
    #[serde(default)]
    pub retry: RetryState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold: Option<Hold>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement: Option<SettlementSummary>,
    pub next_transfer_seq: u32,
}

impl Round {
    pub fn new(
        kind: GameKind,
        config: GameConfig,
        server_seed: String,
        commitment_hash: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RoundId::new(),
            kind,
            state: RoundState::Waiting,
            version: 0,
            server_seed,
            commitment_hash,
            resolution: None,
            outcome: None,
            pot_total: 0,
            item_count: 0,
            bet_count: 0,
            participants: Vec::new(),
            config,
            flip: None,
            created_at: now,
            opened_at: None,
            lock_deadline: None,
            locked_at: None,
            resolved_at: None,
            settled_at: None,
            cancelled_at: None,
            cancel_reason: None,
            retry: RetryState::default(),
            hold: None,
            settlement: None,
            next_transfer_seq: 0,
        }
    }

    pub fn token(&self) -> CommitmentToken {
        CommitmentToken::restore(self.server_seed.clone())
    }

    /// Accepting bets and not past the lock deadline
    pub fn accepts_bets_at(&self, now: DateTime<Utc>) -> bool {
        self.state.accepts_bets() && self.lock_deadline.map_or(true, |d| now < d)
    }

    pub fn is_held(&self) -> bool {
        self.hold.is_some()
    }

    pub fn take_transfer_seq(&mut self) -> u32 {
        let seq = self.next_transfer_seq;
        self.next_transfer_seq += 1;
        seq
    }

    /// Move to `to`, stamping the matching timestamp
    pub fn transition(&mut self, to: RoundState, now: DateTime<Utc>) -> WagerResult<()> {
        if !self.state.can_transition_to(to) {
            return Err(TransitionError::Illegal {
                from: self.state,
                to,
            }
            .into());
        }
        match to {
            RoundState::Open => {
                if self.config.round_duration_secs > 0 {
                    let deadline = now.checked_add_signed(self.config.round_duration()).ok_or_else(|| {
                        ConfigurationError::InvalidValue {
                            field: format!("games.{}.round_duration_secs", self.kind),
                            value: self.config.round_duration_secs.to_string(),
                            reason: "lock deadline out of range".to_string(),
                        }
                    })?;
                    self.lock_deadline = Some(deadline);
                }
                self.opened_at = Some(now);
            }
            RoundState::Locked => self.locked_at = Some(now),
            RoundState::Resolving => self.resolved_at = Some(now),
            RoundState::Settled => self.settled_at = Some(now),
            RoundState::Cancelled => self.cancelled_at = Some(now),
            RoundState::Waiting => {}
        }
        self.state = to;
        self.retry = RetryState::default();
        Ok(())
    }

    /// Public projection. The seed only appears once the outcome is fixed.
    pub fn view(&self, bets: Vec<Bet>, now: DateTime<Utc>) -> RoundView {
        let revealed = self.resolution.as_ref();
        RoundView {
            id: self.id,
            kind: self.kind,
            state: self.state,
            version: self.version,
            commitment_hash: self.commitment_hash.clone(),
            server_seed: revealed.map(|r| r.revealed_seed.clone()),
            external_randomness: revealed.map(|r| r.draw.randomness.clone()),
            external_signature: revealed.map(|r| r.draw.signature.clone()),
            outcome: self.outcome.clone(),
            pot_total: self.pot_total,
            item_count: self.item_count,
            participants: self.participants.len() as u32,
            flip: self.flip.clone(),
            seconds_until_lock: self
                .lock_deadline
                .filter(|_| self.state.accepts_bets())
                .map(|d| (d - now).num_seconds().max(0)),
            created_at: self.created_at,
            settled_at: self.settled_at,
            cancel_reason: self.cancel_reason.clone(),
            pending_manual_review: self.is_held(),
            bets,
        }
    }
}

/// What clients are allowed to see of a round
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RoundView {
    pub id: RoundId,
    pub kind: GameKind,
    pub state: RoundState,
    pub version: u64,
    pub commitment_hash: String,
    pub server_seed: Option<String>,
    pub external_randomness: Option<String>,
    pub external_signature: Option<String>,
    pub outcome: Option<Outcome>,
    pub pot_total: Money,
    pub item_count: u32,
    pub participants: u32,
    pub flip: Option<FlipTerms>,
    pub seconds_until_lock: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<CancelReason>,
    pub pending_manual_review: bool,
    pub bets: Vec<Bet>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fairness::outcome::commitment_hash;

    fn round() -> Round {
        let seed = "very-secret-seed".to_string();
        let hash = commitment_hash(&seed);
        Round::new(GameKind::Wheel, GameConfig::wheel(), seed, hash, Utc::now())
    }

    #[test]
    fn test_open_sets_deadline() {
        let mut round = round();
        let now = Utc::now();
        round.transition(RoundState::Open, now).unwrap();
        assert_eq!(round.lock_deadline, Some(now + chrono::Duration::seconds(20)));
        assert!(round.accepts_bets_at(now));
        assert!(!round.accepts_bets_at(now + chrono::Duration::seconds(20)));
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let mut round = round();
        let err = round.transition(RoundState::Settled, Utc::now()).unwrap_err();
        assert_eq!(err.code(), "ILLEGAL_TRANSITION");
        assert_eq!(round.state, RoundState::Waiting);
    }

    #[test]
    fn test_out_of_range_deadline_is_an_error() {
        let mut round = round();
        round.config.round_duration_secs = i64::MAX as u64;
        let err = round.transition(RoundState::Open, Utc::now()).unwrap_err();
        assert_eq!(err.code(), "INVALID_CONFIGURATION");
        assert_eq!(round.state, RoundState::Waiting);
        assert_eq!(round.lock_deadline, None);
    }

    #[test]
    fn test_view_hides_seed_until_resolved() {
        let mut round = round();
        round.transition(RoundState::Open, Utc::now()).unwrap();
        let view = round.view(vec![], Utc::now());
        assert_eq!(view.server_seed, None);
        assert!(!serde_json::to_string(&view).unwrap().contains("very-secret-seed"));
        assert_eq!(view.commitment_hash, round.commitment_hash);
    }
}
