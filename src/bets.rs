//! Bet intake
//!
//! A bet is validated, reserved and recorded in a single ledger transaction
//! together with the round's pot totals and any state change the bet triggers
//! (enough players to open, participant or item cap reached to lock). The
//! round is re-read inside that transaction, so a bet racing a lock either
//! lands before it or is refused.

use crate::common::traits::Clock;
use crate::common::types::{BetId, GameKind, Party, RoundId, UserId};
use crate::errors::{BetRejection, LedgerError, WagerError, WagerResult};
use crate::events::{EventSink, RoundEvent};
use crate::games::logic_for;
use crate::games::types::{Bet, ItemSnapshot, Selector, Stake, StakeSpec};
use crate::ledger::{LedgerGateway, LedgerTxn, Transfer, TransferReason};
use crate::metrics::EngineMetrics;
use crate::round::{Round, RoundState};
use crate::round_store;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// What a committed bet changed
#[derive(Clone, Debug)]
pub struct PlacedBet {
    pub bet: Bet,
    pub round: Round,
    /// States entered because of this bet, in order
    pub transitions: Vec<RoundState>,
}

pub struct BetLedger {
    gateway: Arc<LedgerGateway>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    metrics: Arc<EngineMetrics>,
    /// Last attempt per (game, user). Anti-abuse only; the commit lock is
    /// what keeps the ledger consistent.
    last_attempt: DashMap<(GameKind, UserId), DateTime<Utc>>,
}

impl BetLedger {
    pub fn new(
        gateway: Arc<LedgerGateway>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            gateway,
            clock,
            events,
            metrics,
            last_attempt: DashMap::new(),
        }
    }

    /// Place a bet on an existing round
    pub fn place_bet(
        &self,
        round_id: &RoundId,
        bettor: &str,
        stake: StakeSpec,
        selector: Selector,
    ) -> WagerResult<PlacedBet> {
        let now = self.clock.now();
        let snapshot = round_store::require_round(self.gateway.store().as_ref(), round_id)?;
        let kind = snapshot.kind;

        let result = self.debounce(kind, bettor, snapshot.config.bet_cooldown_ms, now).and_then(|_| {
            self.gateway.with_transaction(|txn| {
                let mut round = round_store::require_round(txn, round_id)?;
                let previous = round.state;
                let bets = round_store::load_bets(txn, round_id)?;
                let (bet, transitions) = accept_bet(txn, &mut round, &bets, bettor, stake, selector, now)?;
                round_store::update_round(txn, previous, &mut round)?;
                Ok(PlacedBet {
                    bet,
                    round,
                    transitions,
                })
            })
        });

        self.finish(kind, bettor, result)
    }

    /// Persist a brand new round together with its creator's bet
    pub fn open_round_with_bet(
        &self,
        mut round: Round,
        bettor: &str,
        stake: StakeSpec,
        selector: Selector,
    ) -> WagerResult<PlacedBet> {
        let now = self.clock.now();
        let kind = round.kind;

        let result = self.debounce(kind, bettor, round.config.bet_cooldown_ms, now).and_then(|_| {
            self.gateway.with_transaction(|txn| {
                logic_for(kind).check_creation(txn, &round, bettor)?;
                round_store::insert_round(txn, &mut round)?;
                let previous = round.state;
                let (bet, transitions) = accept_bet(txn, &mut round, &[], bettor, stake, selector, now)?;
                round_store::update_round(txn, previous, &mut round)?;
                Ok(PlacedBet {
                    bet,
                    round,
                    transitions,
                })
            })
        });

        let placed = self.finish(kind, bettor, result)?;
        if placed.round.state == RoundState::Open && !placed.transitions.contains(&RoundState::Open) {
            self.events.emit(RoundEvent::RoundOpened {
                round_id: placed.round.id,
                game: kind,
                commitment_hash: placed.round.commitment_hash.clone(),
                lock_deadline: placed.round.lock_deadline,
            });
        }
        Ok(placed)
    }

    fn debounce(&self, kind: GameKind, bettor: &str, cooldown_ms: u64, now: DateTime<Utc>) -> WagerResult<()> {
        if cooldown_ms == 0 {
            return Ok(());
        }
        let key = (kind, bettor.to_string());
        if let Some(last) = self.last_attempt.get(&key) {
            let elapsed = (now - *last).num_milliseconds().max(0) as u64;
            if elapsed < cooldown_ms {
                return Err(BetRejection::TooFast {
                    retry_after_ms: cooldown_ms - elapsed,
                }
                .into());
            }
        }
        self.last_attempt.insert(key, now);
        Ok(())
    }

    /// Metrics, logs and events once the transaction outcome is known
    fn finish(&self, kind: GameKind, bettor: &str, result: WagerResult<PlacedBet>) -> WagerResult<PlacedBet> {
        let placed = match result {
            Ok(placed) => placed,
            Err(e) => {
                self.metrics.bet_rejected(kind, e.code());
                debug!(game = %kind, bettor = bettor, code = e.code(), "Bet rejected: {}", e);
                return Err(e);
            }
        };

        self.metrics.bet_placed(kind);
        info!(
            game = %kind,
            round_id = %placed.round.id,
            bettor = bettor,
            value = placed.bet.value(),
            pot_total = placed.round.pot_total,
            "Bet placed"
        );

        self.events.emit(RoundEvent::BetPlaced {
            round_id: placed.round.id,
            game: kind,
            bet: placed.bet.clone(),
            pot_total: placed.round.pot_total,
        });
        for state in &placed.transitions {
            match state {
                RoundState::Open => self.events.emit(RoundEvent::RoundOpened {
                    round_id: placed.round.id,
                    game: kind,
                    commitment_hash: placed.round.commitment_hash.clone(),
                    lock_deadline: placed.round.lock_deadline,
                }),
                RoundState::Locked => self.events.emit(RoundEvent::RoundLocked {
                    round_id: placed.round.id,
                    game: kind,
                    pot_total: placed.round.pot_total,
                }),
                _ => {}
            }
        }
        Ok(placed)
    }
}

/// Validate, reserve and record one bet against `round` inside `txn`.
///
/// `bets` are the round's existing bets. The round is mutated in place; the
/// caller persists it.
fn accept_bet(
    txn: &mut LedgerTxn<'_>,
    round: &mut Round,
    bets: &[Bet],
    bettor: &str,
    spec: StakeSpec,
    selector: Selector,
    now: DateTime<Utc>,
) -> WagerResult<(Bet, Vec<RoundState>)> {
    let logic = logic_for(round.kind);
    let config = &round.config;

    if !round.accepts_bets_at(now) {
        return Err(BetRejection::RoundNotAcceptingBets { state: round.state }.into());
    }
    if !config.enabled {
        return Err(BetRejection::GameDisabled.into());
    }
    if !logic.accepts_stake(&spec) {
        return Err(BetRejection::UnsupportedStake(format!("{} does not take this stake type", round.kind)).into());
    }
    if spec.is_empty() {
        return Err(BetRejection::EmptyStake.into());
    }

    let stake = snapshot_stake(txn, bettor, spec)?;
    let value = stake.value();
    if value < config.min_bet {
        return Err(BetRejection::BelowMinBet {
            min: config.min_bet,
            actual: value,
        }
        .into());
    }

    let own_bets = bets.iter().filter(|b| b.bettor == bettor);
    let (own_value, own_items) = own_bets.fold((0, 0), |(v, n), b| (v + b.value(), n + b.stake.item_count()));
    if config.max_bet > 0 && own_value + value > config.max_bet {
        return Err(BetRejection::ExceedsMaxBet {
            max: config.max_bet,
            total: own_value + value,
        }
        .into());
    }
    if config.max_items_per_player > 0 && own_items + stake.item_count() > config.max_items_per_player {
        return Err(BetRejection::MaxItemsExceeded {
            max: config.max_items_per_player,
        }
        .into());
    }
    if config.max_total_items > 0 && round.item_count + stake.item_count() > config.max_total_items {
        return Err(BetRejection::MaxItemsExceeded {
            max: config.max_total_items,
        }
        .into());
    }
    let new_participant = !round.participants.iter().any(|p| p == bettor);
    if new_participant && config.max_participants > 0 && round.participants.len() as u32 >= config.max_participants {
        return Err(BetRejection::MaxParticipantsReached {
            max: config.max_participants,
        }
        .into());
    }
    logic.validate_bet(round, bets, bettor, &stake, &selector)?;

    // Reserve
    let transfer = Transfer {
        id: Uuid::new_v4(),
        round_id: round.id,
        seq: round.take_transfer_seq(),
        from: Party::user(bettor),
        to: Party::Escrow,
        amount: value,
        items: stake.items().iter().map(|i| i.id.clone()).collect(),
        reason: TransferReason::Stake,
        created_at: now,
    };
    txn.post_transfer(transfer)?;

    let bet = Bet {
        id: BetId::new(),
        round_id: round.id,
        seq: round.bet_count,
        bettor: bettor.to_string(),
        stake,
        selector,
        placed_at: now,
    };
    round_store::put_bet(txn, &bet)?;

    round.pot_total += value;
    round.item_count += bet.stake.item_count();
    round.bet_count += 1;
    if new_participant {
        round.participants.push(bettor.to_string());
    }
    logic.on_bet_accepted(round, &bet);

    let transitions = apply_cap_transitions(round, now)?;
    Ok((bet, transitions))
}

/// Resolve the requested stake into priced items or a balance amount
fn snapshot_stake(txn: &LedgerTxn<'_>, bettor: &str, spec: StakeSpec) -> WagerResult<Stake> {
    match spec {
        StakeSpec::Balance(amount) => Ok(Stake::Balance { amount }),
        StakeSpec::Items(ids) => {
            let mut seen = HashSet::new();
            let mut items = Vec::with_capacity(ids.len());
            for id in ids {
                if !seen.insert(id.clone()) {
                    return Err(BetRejection::UnsupportedStake(format!("item {} listed twice", id)).into());
                }
                let item = txn.item(&id)?;
                if item.owner != Party::user(bettor) {
                    return Err(WagerError::from(LedgerError::ItemNotOwned { item: id }));
                }
                items.push(ItemSnapshot {
                    id: item.id,
                    name: item.name,
                    price: item.price,
                });
            }
            Ok(Stake::Items { items })
        }
    }
}

/// Waiting -> Open once enough players joined; Open -> Locked at a cap
fn apply_cap_transitions(round: &mut Round, now: DateTime<Utc>) -> WagerResult<Vec<RoundState>> {
    let mut fired = Vec::new();
    let config = round.config.clone();
    let players = round.participants.len() as u32;
    let items_full = config.max_total_items > 0 && round.item_count >= config.max_total_items;
    let players_full = config.max_participants > 0 && players >= config.max_participants;

    if round.state == RoundState::Waiting && (players >= config.min_participants().max(1) || items_full) {
        round.transition(RoundState::Open, now)?;
        fired.push(RoundState::Open);
    }
    if round.state == RoundState::Open && (items_full || players_full) {
        round.transition(RoundState::Locked, now)?;
        fired.push(RoundState::Locked);
    }
    Ok(fired)
}
