//! Round lifecycle driver
//!
//! `tick` is the single entry point that moves a round forward on time:
//!
//! ```text
//! Waiting -> Open -> Locked -> Resolving -> Settled
//!     \        \
//!      `--------`--> Cancelled
//! ```
//!
//! Every write re-reads the round inside its transaction and checks the state
//! it expects, so concurrent ticks and bets cannot both win. Settlement posts
//! every transfer and the `Resolving -> Settled` flip in one transaction; a
//! replay finds the round settled and does nothing.
//!
//! Infrastructure failures in the resolve/settle stages are retried with
//! exponential backoff and escalated to an operator after a configured number
//! of attempts. Anything else puts the round on hold until an operator
//! releases it.

use crate::common::traits::Clock;
use crate::common::types::{GameKind, Money, Party, RoundId};
use crate::config::{GameConfig, RetryConfig};
use crate::errors::{InvariantViolation, TransitionError, WagerError, WagerResult};
use crate::events::{EventSink, RoundEvent};
use crate::fairness::{FairnessOracle, PublicInput};
use crate::games::logic_for;
use crate::games::types::Bet;
use crate::ledger::{LedgerGateway, LedgerTxn, TransferReason};
use crate::metrics::EngineMetrics;
use crate::payout::affiliate::{affiliate_shares, AffiliatePolicy, Wagered, WinnerAffiliation};
use crate::payout::{refund_plan, PayoutPlan, PlannedTransfer};
use crate::round::{CancelReason, Hold, Round, RoundState};
use crate::round_store;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Resolve,
    Settle,
}

impl Stage {
    fn as_str(&self) -> &'static str {
        match self {
            Stage::Resolve => "resolve",
            Stage::Settle => "settle",
        }
    }
}

fn is_due(since: Option<DateTime<Utc>>, delay: Duration, now: DateTime<Utc>) -> bool {
    since.map_or(true, |at| at.checked_add_signed(delay).map_or(false, |due| now >= due))
}

fn is_conflict(err: &WagerError) -> bool {
    matches!(err, WagerError::Transition(TransitionError::StateConflict { .. }))
}

pub struct RoundStateMachine {
    gateway: Arc<LedgerGateway>,
    oracle: Arc<FairnessOracle>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    metrics: Arc<EngineMetrics>,
    retry: RetryConfig,
    affiliates: AffiliatePolicy,
}

impl RoundStateMachine {
    pub fn new(
        gateway: Arc<LedgerGateway>,
        oracle: Arc<FairnessOracle>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
        metrics: Arc<EngineMetrics>,
        retry: RetryConfig,
        affiliates: AffiliatePolicy,
    ) -> Self {
        Self {
            gateway,
            oracle,
            clock,
            events,
            metrics,
            retry,
            affiliates,
        }
    }

    /// Build a committed round without persisting it.
    ///
    /// Pots wait for players; wheels and flips open immediately.
    pub fn new_round(&self, kind: GameKind, config: GameConfig) -> WagerResult<Round> {
        let now = self.clock.now();
        let commitment = self.oracle.commit();
        let mut round = Round::new(kind, config, commitment.token.seed().to_string(), commitment.hash, now);
        if kind != GameKind::Pot {
            round.transition(RoundState::Open, now)?;
        }
        Ok(round)
    }

    /// Create and persist a round. Wheel and pot rounds become their game's
    /// current round.
    pub fn create_round(&self, kind: GameKind, config: GameConfig) -> WagerResult<Round> {
        let mut round = self.new_round(kind, config)?;
        self.gateway.with_transaction(|txn| {
            round_store::insert_round(txn, &mut round)?;
            if kind != GameKind::Coinflip {
                round_store::set_current(txn, kind, &round.id)?;
            }
            Ok(())
        })?;

        info!(
            round_id = %round.id,
            game = %kind,
            state = %round.state,
            commitment = %round.commitment_hash,
            "Round created"
        );
        if round.state == RoundState::Open {
            self.emit_opened(&round);
        }
        Ok(round)
    }

    /// Advance one round as far as its timers allow. Returns the state it
    /// ends in.
    pub async fn tick(&self, round_id: &RoundId) -> WagerResult<RoundState> {
        loop {
            let round = round_store::require_round(self.gateway.store().as_ref(), round_id)?;
            if round.state.is_terminal() || round.is_held() {
                return Ok(round.state);
            }
            let now = self.clock.now();
            if !round.retry.is_due(now) {
                return Ok(round.state);
            }

            let progressed = match round.state {
                RoundState::Open => self.tick_open(&round, now)?,
                RoundState::Locked if is_due(round.locked_at, round.config.resolve_delay(), now) => {
                    self.run_stage(&round, Stage::Resolve).await?
                }
                RoundState::Resolving if is_due(round.resolved_at, round.config.settle_delay(), now) => {
                    self.run_stage(&round, Stage::Settle).await?
                }
                _ => false,
            };
            if !progressed {
                return Ok(round.state);
            }
        }
    }

    fn tick_open(&self, round: &Round, now: DateTime<Utc>) -> WagerResult<bool> {
        let expired = round
            .config
            .open_expiry()
            .map_or(false, |expiry| is_due(round.opened_at, expiry, now));
        let result = if expired {
            self.cancel(&round.id, CancelReason::Expired).map(|_| ())
        } else {
            match round.lock_deadline {
                Some(deadline) if now >= deadline => {
                    if (round.participants.len() as u32) < round.config.min_participants() {
                        self.cancel(&round.id, CancelReason::InsufficientParticipants).map(|_| ())
                    } else {
                        self.lock(&round.id).map(|_| ())
                    }
                }
                _ => return Ok(false),
            }
        };

        match result {
            Ok(()) => Ok(true),
            Err(e) if is_conflict(&e) => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// Stop taking bets
    pub fn lock(&self, round_id: &RoundId) -> WagerResult<Round> {
        let now = self.clock.now();
        let round = self.gateway.with_transaction(|txn| {
            let mut round = round_store::load_for_update(txn, round_id, RoundState::Open)?;
            round.transition(RoundState::Locked, now)?;
            round_store::update_round(txn, RoundState::Open, &mut round)?;
            Ok(round)
        })?;

        info!(round_id = %round.id, game = %round.kind, pot_total = round.pot_total, "Round locked");
        self.events.emit(RoundEvent::RoundLocked {
            round_id: round.id,
            game: round.kind,
            pot_total: round.pot_total,
        });
        Ok(round)
    }

    /// Fetch external randomness and fix the outcome
    pub async fn resolve(&self, round_id: &RoundId) -> WagerResult<Round> {
        let store = self.gateway.store().as_ref();
        let round = round_store::require_round(store, round_id)?;
        if round.state != RoundState::Locked {
            return Err(TransitionError::StateConflict {
                expected: RoundState::Locked,
                actual: round.state,
            }
            .into());
        }
        let bets = round_store::load_bets(store, round_id)?;

        let input = PublicInput {
            round_id: round.id,
            commitment_hash: round.commitment_hash.clone(),
            pot_total: round.pot_total,
        };
        let resolution = self.oracle.resolve(&round.token(), &input).await?;
        let outcome = logic_for(round.kind).resolve_outcome(&round, &bets, &resolution)?;

        let now = self.clock.now();
        let round = self.gateway.with_transaction(|txn| {
            let mut round = round_store::load_for_update(txn, round_id, RoundState::Locked)?;
            round.resolution = Some(resolution.clone());
            round.outcome = Some(outcome.clone());
            round.transition(RoundState::Resolving, now)?;
            round_store::update_round(txn, RoundState::Locked, &mut round)?;
            Ok(round)
        })?;

        info!(round_id = %round.id, game = %round.kind, outcome = ?outcome, "Round resolved");
        self.events.emit(RoundEvent::RoundResolved {
            round_id: round.id,
            game: round.kind,
            outcome,
            server_seed: resolution.revealed_seed,
            external_randomness: resolution.draw.randomness,
            external_signature: resolution.draw.signature,
        });
        Ok(round)
    }

    /// Pay out a resolved round. Settling an already settled round is a no-op.
    pub fn settle(&self, round_id: &RoundId) -> WagerResult<Round> {
        let now = self.clock.now();
        let settled = self.gateway.with_transaction(|txn| {
            let mut round = round_store::require_round(txn, round_id)?;
            match round.state {
                RoundState::Settled => return Ok((round, false)),
                RoundState::Resolving => {}
                actual => {
                    return Err(TransitionError::StateConflict {
                        expected: RoundState::Resolving,
                        actual,
                    }
                    .into())
                }
            }

            let bets = round_store::load_bets(txn, round_id)?;
            let outcome = round
                .outcome
                .clone()
                .ok_or_else(|| InvariantViolation::NoWinner("resolved round has no outcome".to_string()))?;
            let plan = logic_for(round.kind).payout(&round, &bets, &outcome)?;
            plan.validate()?;

            let first_seq = round.next_transfer_seq;
            post_plan(txn, &mut round, &plan, now)?;
            record_activity(txn, &bets, &plan)?;
            let affiliate_paid = self.pay_affiliates(txn, &mut round, &bets, &plan, outcome.winner(), now)?;

            round.settlement = Some(plan.summary(affiliate_paid, round.next_transfer_seq - first_seq));
            round.transition(RoundState::Settled, now)?;
            round_store::update_round(txn, RoundState::Resolving, &mut round)?;
            Ok((round, true))
        })?;

        let (round, changed) = settled;
        if !changed {
            debug!(round_id = %round.id, "Round already settled");
            return Ok(round);
        }

        let summary = round.settlement.clone().unwrap_or_default();
        self.metrics.round_settled(round.kind, summary.rake);
        info!(
            round_id = %round.id,
            game = %round.kind,
            paid = summary.paid_to_winners,
            rake = summary.rake,
            house_cover = summary.house_cover,
            transfers = summary.transfer_count,
            "Round settled"
        );
        self.events.emit(RoundEvent::RoundSettled {
            round_id: round.id,
            game: round.kind,
            summary,
        });
        Ok(round)
    }

    /// Cancel a round that has not locked and refund every stake
    pub fn cancel(&self, round_id: &RoundId, reason: CancelReason) -> WagerResult<Round> {
        let now = self.clock.now();
        let round = self.gateway.with_transaction(|txn| {
            let mut round = round_store::require_round(txn, round_id)?;
            let previous = round.state;
            if !matches!(previous, RoundState::Waiting | RoundState::Open) {
                return Err(TransitionError::StateConflict {
                    expected: RoundState::Open,
                    actual: previous,
                }
                .into());
            }
            round.transition(RoundState::Cancelled, now)?;

            let bets = round_store::load_bets(txn, round_id)?;
            let plan = refund_plan(&bets);
            plan.validate()?;
            post_plan(txn, &mut round, &plan, now)?;

            round.cancel_reason = Some(reason.clone());
            round_store::update_round(txn, previous, &mut round)?;
            Ok(round)
        })?;

        self.metrics.round_cancelled(round.kind);
        info!(round_id = %round.id, game = %round.kind, reason = ?reason, bets = round.bet_count, "Round cancelled");
        self.events.emit(RoundEvent::RoundCancelled {
            round_id: round.id,
            game: round.kind,
            reason,
        });
        Ok(round)
    }

    /// Operator action: clear a hold so the round resumes on the next tick
    pub fn release_hold(&self, round_id: &RoundId) -> WagerResult<Round> {
        let round = self.gateway.with_transaction(|txn| {
            let mut round = round_store::require_round(txn, round_id)?;
            if round.hold.is_none() && round.retry.attempts == 0 {
                return Ok(round);
            }
            round.hold = None;
            round.retry = Default::default();
            round_store::update_round(txn, round.state, &mut round)?;
            Ok(round)
        })?;
        info!(round_id = %round.id, game = %round.kind, state = %round.state, "Hold released");
        Ok(round)
    }

    /// Resume every unfinished round after a restart
    pub async fn recover(&self) -> WagerResult<usize> {
        let ids = round_store::active_rounds(self.gateway.store().as_ref(), None)?;
        for id in &ids {
            match self.tick(id).await {
                Ok(state) => debug!(round_id = %id, state = %state, "Recovered round"),
                Err(e) => warn!(round_id = %id, code = e.code(), "Recovery tick failed: {}", e),
            }
        }
        info!("Recovery pass over {} active rounds", ids.len());
        Ok(ids.len())
    }

    /// Run a resolve/settle stage. `Ok(false)` means the failure was recorded
    /// on the round and it should not be advanced further this tick.
    async fn run_stage(&self, round: &Round, stage: Stage) -> WagerResult<bool> {
        let result = match stage {
            Stage::Resolve => self.resolve(&round.id).await.map(|_| ()),
            Stage::Settle => self.settle(&round.id).map(|_| ()),
        };
        match result {
            Ok(()) => Ok(true),
            Err(e) if is_conflict(&e) => {
                debug!(round_id = %round.id, stage = stage.as_str(), "Round moved on concurrently");
                Ok(true)
            }
            Err(e) if e.is_retryable() => {
                self.record_retry(&round.id, stage, &e)?;
                Ok(false)
            }
            Err(e) => {
                self.place_hold(&round.id, &e)?;
                Ok(false)
            }
        }
    }

    fn record_retry(&self, round_id: &RoundId, stage: Stage, err: &WagerError) -> WagerResult<()> {
        let now = self.clock.now();
        let (round, alert) = self.gateway.with_transaction(|txn| {
            let mut round = round_store::require_round(txn, round_id)?;
            round.retry.attempts += 1;
            let delay = Duration::from_std(self.retry.backoff(round.retry.attempts))
                .unwrap_or(Duration::MAX);
            round.retry.next_attempt_at = Some(now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC));
            round.retry.last_error = Some(err.to_string());

            let alert = round.retry.attempts >= self.retry.alert_after_attempts && !round.retry.alerted;
            if alert {
                round.retry.alerted = true;
            }
            round_store::update_round(txn, round.state, &mut round)?;
            Ok((round, alert))
        })?;

        self.metrics.stage_retry(round.kind, stage.as_str());
        warn!(
            round_id = %round.id,
            game = %round.kind,
            stage = stage.as_str(),
            attempts = round.retry.attempts,
            code = err.code(),
            "Stage failed, retry scheduled: {}",
            err
        );

        if alert {
            self.metrics.alert();
            error!(
                round_id = %round.id,
                game = %round.kind,
                stage = stage.as_str(),
                attempts = round.retry.attempts,
                "Round stuck, operator attention needed: {}",
                err
            );
            self.events.emit(RoundEvent::RoundAlert {
                round_id: round.id,
                game: round.kind,
                attempts: round.retry.attempts,
                last_error: err.to_string(),
            });
        }
        Ok(())
    }

    fn place_hold(&self, round_id: &RoundId, err: &WagerError) -> WagerResult<()> {
        let now = self.clock.now();
        let round = self.gateway.with_transaction(|txn| {
            let mut round = round_store::require_round(txn, round_id)?;
            round.hold = Some(Hold {
                code: err.code().to_string(),
                reason: err.to_string(),
                since: now,
            });
            round_store::update_round(txn, round.state, &mut round)?;
            Ok(round)
        })?;

        self.metrics.round_held(round.kind);
        error!(
            round_id = %round.id,
            game = %round.kind,
            state = %round.state,
            code = err.code(),
            "Round held for manual review: {}",
            err
        );
        self.events.emit(RoundEvent::RoundHeld {
            round_id: round.id,
            game: round.kind,
            code: err.code().to_string(),
            reason: err.to_string(),
        });
        Ok(())
    }

    /// Revenue share out of the house take. Returns the amount paid.
    fn pay_affiliates(
        &self,
        txn: &mut LedgerTxn<'_>,
        round: &mut Round,
        bets: &[Bet],
        plan: &PayoutPlan,
        winner: Option<&str>,
        now: DateTime<Utc>,
    ) -> WagerResult<Money> {
        if !self.affiliates.enabled {
            return Ok(0);
        }

        let mut wagered: BTreeMap<&str, Money> = BTreeMap::new();
        for bet in bets {
            *wagered.entry(bet.bettor.as_str()).or_default() += bet.value();
        }
        let mut wagers = Vec::with_capacity(wagered.len());
        for (bettor, amount) in wagered {
            wagers.push(Wagered {
                bettor: bettor.to_string(),
                amount,
                link: txn.account(bettor)?.affiliate,
            });
        }
        let winner = match winner {
            Some(user) => {
                let account = txn.account(user)?;
                account.affiliate.map(|link| WinnerAffiliation {
                    link,
                    winner_is_elite: account.is_elite,
                })
            }
            None => None,
        };

        let shares = affiliate_shares(
            &wagers,
            &self.affiliates,
            plan.house_take(),
            plan.rake(),
            plan.staked,
            winner.as_ref(),
        );
        let mut paid = 0;
        for share in shares {
            let planned = PlannedTransfer {
                from: Party::House,
                to: Party::user(share.affiliate.clone()),
                amount: share.amount,
                items: Vec::new(),
                reason: TransferReason::AffiliateShare,
            };
            let seq = round.take_transfer_seq();
            txn.post_transfer(planned.into_transfer(round.id, seq, now))?;
            paid += share.amount;
            debug!(round_id = %round.id, affiliate = %share.affiliate, amount = share.amount, elite = share.elite, "Affiliate share paid");
        }
        Ok(paid)
    }

    fn emit_opened(&self, round: &Round) {
        self.events.emit(RoundEvent::RoundOpened {
            round_id: round.id,
            game: round.kind,
            commitment_hash: round.commitment_hash.clone(),
            lock_deadline: round.lock_deadline,
        });
    }
}

/// Number and post every transfer of a plan
fn post_plan(txn: &mut LedgerTxn<'_>, round: &mut Round, plan: &PayoutPlan, now: DateTime<Utc>) -> WagerResult<()> {
    for planned in &plan.transfers {
        let seq = round.take_transfer_seq();
        txn.post_transfer(planned.clone().into_transfer(round.id, seq, now))?;
    }
    Ok(())
}

/// Lifetime wagered/won counters on each bettor's account
fn record_activity(txn: &mut LedgerTxn<'_>, bets: &[Bet], plan: &PayoutPlan) -> WagerResult<()> {
    let mut totals: BTreeMap<&str, (Money, Money)> = BTreeMap::new();
    for bet in bets {
        totals.entry(bet.bettor.as_str()).or_default().0 += bet.value();
    }
    for transfer in plan.transfers.iter().filter(|t| t.reason == TransferReason::Winnings) {
        if let Some(user) = transfer.to.user_id() {
            totals.entry(user).or_default().1 += transfer.amount;
        }
    }
    for (user, (wagered, won)) in totals {
        txn.record_activity(user, wagered, won)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bets::BetLedger;
    use crate::common::traits::ManualClock;
    use crate::config::{FairnessMode, GameRules};
    use crate::errors::FairnessError;
    use crate::events::BroadcastSink;
    use crate::fairness::beacon::{BeaconDraw, BeaconSource, RandomBeacon};
    use crate::fairness::local::LocalBeacon;
    use crate::games::types::{CoinSide, Selector, StakeSpec, WheelSegment};
    use crate::ledger::Item;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;

    struct DownBeacon;

    #[async_trait]
    impl RandomBeacon for DownBeacon {
        fn source(&self) -> BeaconSource {
            BeaconSource::RandomOrg
        }

        async fn draw(&self, _user_data: &str) -> Result<BeaconDraw, FairnessError> {
            Err(FairnessError::RandomnessUnavailable("connection refused".into()))
        }
    }

    struct Fixture {
        gateway: Arc<LedgerGateway>,
        clock: Arc<ManualClock>,
        sink: Arc<BroadcastSink>,
        metrics: Arc<EngineMetrics>,
        machine: RoundStateMachine,
        bets: BetLedger,
    }

    fn fixture_with(beacon: Arc<dyn RandomBeacon>) -> Fixture {
        let gateway = Arc::new(LedgerGateway::new(Arc::new(MemoryStorage::new())));
        let clock = Arc::new(ManualClock::default());
        let sink = Arc::new(BroadcastSink::new(256));
        let metrics = Arc::new(EngineMetrics::new().unwrap());
        let oracle = Arc::new(FairnessOracle::new(beacon, FairnessMode::Development).unwrap());
        let retry = RetryConfig {
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            alert_after_attempts: 2,
        };
        let machine = RoundStateMachine::new(
            gateway.clone(),
            oracle,
            clock.clone(),
            sink.clone(),
            metrics.clone(),
            retry,
            AffiliatePolicy::default(),
        );
        let bets = BetLedger::new(gateway.clone(), clock.clone(), sink.clone(), metrics.clone());
        Fixture {
            gateway,
            clock,
            sink,
            metrics,
            machine,
            bets,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(LocalBeacon::new_random()))
    }

    impl Fixture {
        fn mint(&self, id: &str, owner: &str, price: Money) {
            self.gateway
                .with_transaction(|txn| {
                    txn.put_item(&Item {
                        id: id.into(),
                        name: id.into(),
                        price,
                        owner: Party::user(owner),
                        reserved_in: None,
                    })
                })
                .unwrap();
        }

        /// Drive a default wheel round through its timers
        async fn run_wheel(&self, round_id: &RoundId) -> RoundState {
            for secs in [20, 3, 8] {
                self.clock.advance_secs(secs);
                self.machine.tick(round_id).await.unwrap();
            }
            round_store::require_round(self.gateway.store().as_ref(), round_id).unwrap().state
        }

        fn escrow_net(&self, round_id: &RoundId) -> Money {
            self.gateway
                .transfers_for_round(round_id)
                .unwrap()
                .iter()
                .map(|t| match (&t.from, &t.to) {
                    (_, Party::Escrow) => t.amount,
                    (Party::Escrow, _) => -t.amount,
                    _ => 0,
                })
                .sum()
        }
    }

    #[tokio::test]
    async fn test_wheel_round_walks_every_stage() {
        let f = fixture();
        f.gateway.with_transaction(|txn| txn.adjust_balance("alice", 1_000)).unwrap();
        let round = f.machine.create_round(GameKind::Wheel, GameConfig::wheel()).unwrap();
        assert_eq!(round.state, RoundState::Open);
        f.bets
            .place_bet(
                &round.id,
                "alice",
                StakeSpec::Balance(200),
                Selector::Wheel {
                    segment: WheelSegment::Black,
                },
            )
            .unwrap();

        assert_eq!(f.machine.tick(&round.id).await.unwrap(), RoundState::Open);
        f.clock.advance_secs(20);
        assert_eq!(f.machine.tick(&round.id).await.unwrap(), RoundState::Locked);
        f.clock.advance_secs(3);
        assert_eq!(f.machine.tick(&round.id).await.unwrap(), RoundState::Resolving);
        f.clock.advance_secs(8);
        assert_eq!(f.machine.tick(&round.id).await.unwrap(), RoundState::Settled);

        let stored = round_store::require_round(f.gateway.store().as_ref(), &round.id).unwrap();
        let summary = stored.settlement.unwrap();
        assert_eq!(f.escrow_net(&round.id), 0);
        let account = f.gateway.account("alice").unwrap();
        assert_eq!(account.balance, 800 + summary.paid_to_winners);
        assert_eq!(account.wagered, 200);
        assert!(stored.resolution.is_some());
    }

    #[tokio::test]
    async fn test_settle_replay_is_noop() {
        let f = fixture();
        let round = f.machine.create_round(GameKind::Wheel, GameConfig::wheel()).unwrap();
        assert_eq!(f.run_wheel(&round.id).await, RoundState::Settled);

        let before = f.gateway.transfers_for_round(&round.id).unwrap().len();
        let again = f.machine.settle(&round.id).unwrap();
        assert_eq!(again.state, RoundState::Settled);
        assert_eq!(f.gateway.transfers_for_round(&round.id).unwrap().len(), before);
    }

    #[tokio::test]
    async fn test_expired_flip_refunds_creator() {
        let f = fixture();
        f.mint("knife", "alice", 5_000);
        let mut config = GameConfig::coinflip();
        if let GameRules::Coinflip { open_expiry_secs, .. } = &mut config.rules {
            *open_expiry_secs = Some(60);
        }
        let round = f.machine.new_round(GameKind::Coinflip, config).unwrap();
        let placed = f
            .bets
            .open_round_with_bet(
                round,
                "alice",
                StakeSpec::Items(vec!["knife".into()]),
                Selector::Coinflip { side: CoinSide::Heads },
            )
            .unwrap();
        assert_eq!(f.gateway.item("knife").unwrap().unwrap().owner, Party::Escrow);

        f.clock.advance_secs(59);
        assert_eq!(f.machine.tick(&placed.round.id).await.unwrap(), RoundState::Open);
        f.clock.advance_secs(1);
        assert_eq!(f.machine.tick(&placed.round.id).await.unwrap(), RoundState::Cancelled);

        let stored = round_store::require_round(f.gateway.store().as_ref(), &placed.round.id).unwrap();
        assert_eq!(stored.cancel_reason, Some(CancelReason::Expired));
        assert_eq!(f.gateway.item("knife").unwrap().unwrap().owner, Party::user("alice"));
        assert_eq!(f.escrow_net(&placed.round.id), 0);
    }

    #[tokio::test]
    async fn test_cancel_after_lock_conflicts() {
        let f = fixture();
        let round = f.machine.create_round(GameKind::Wheel, GameConfig::wheel()).unwrap();
        f.machine.lock(&round.id).unwrap();
        let err = f.machine.cancel(&round.id, CancelReason::Operator("test".into())).unwrap_err();
        assert_eq!(err.code(), "STATE_CONFLICT");
    }

    #[tokio::test]
    async fn test_beacon_outage_retries_and_alerts_once() {
        let f = fixture_with(Arc::new(DownBeacon));
        let mut events = f.sink.subscribe();
        let round = f.machine.create_round(GameKind::Wheel, GameConfig::wheel()).unwrap();
        f.clock.advance_secs(20);
        assert_eq!(f.machine.tick(&round.id).await.unwrap(), RoundState::Locked);
        f.clock.advance_secs(3);
        assert_eq!(f.machine.tick(&round.id).await.unwrap(), RoundState::Locked);
        let stored = round_store::require_round(f.gateway.store().as_ref(), &round.id).unwrap();
        assert_eq!(stored.retry.attempts, 1);
        assert!(stored.hold.is_none());

        // Backoff not elapsed
        f.machine.tick(&round.id).await.unwrap();
        let stored = round_store::require_round(f.gateway.store().as_ref(), &round.id).unwrap();
        assert_eq!(stored.retry.attempts, 1);

        f.clock.advance_secs(1);
        f.machine.tick(&round.id).await.unwrap();
        f.clock.advance_secs(2);
        f.machine.tick(&round.id).await.unwrap();
        let stored = round_store::require_round(f.gateway.store().as_ref(), &round.id).unwrap();
        assert_eq!(stored.retry.attempts, 3);
        assert!(stored.retry.alerted);
        assert_eq!(stored.state, RoundState::Locked);
        assert_eq!(f.metrics.alert_count(), 1);

        let mut alerts = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, RoundEvent::RoundAlert { .. }) {
                alerts += 1;
            }
        }
        assert_eq!(alerts, 1);
    }

    #[tokio::test]
    async fn test_hold_stops_progress_until_released() {
        let f = fixture();
        let round = f.machine.create_round(GameKind::Wheel, GameConfig::wheel()).unwrap();
        f.clock.advance_secs(20);

        let err: WagerError = InvariantViolation::NegativeRake(-1).into();
        f.machine.place_hold(&round.id, &err).unwrap();
        assert_eq!(f.machine.tick(&round.id).await.unwrap(), RoundState::Open);
        let stored = round_store::require_round(f.gateway.store().as_ref(), &round.id).unwrap();
        assert_eq!(stored.hold.as_ref().map(|h| h.code.as_str()), Some("INVARIANT_VIOLATION"));

        f.machine.release_hold(&round.id).unwrap();
        assert_eq!(f.machine.tick(&round.id).await.unwrap(), RoundState::Locked);
    }

    #[tokio::test]
    async fn test_recover_resumes_overdue_rounds() {
        let f = fixture();
        let first = f.machine.create_round(GameKind::Wheel, GameConfig::wheel()).unwrap();
        let second = f.machine.create_round(GameKind::Pot, GameConfig::pot()).unwrap();
        f.clock.advance_secs(120);

        assert_eq!(f.machine.recover().await.unwrap(), 2);
        f.clock.advance_secs(10);
        assert_eq!(f.machine.recover().await.unwrap(), 2);
        let store = f.gateway.store().as_ref();
        assert_eq!(round_store::require_round(store, &first.id).unwrap().state, RoundState::Resolving);
        assert_eq!(round_store::require_round(store, &second.id).unwrap().state, RoundState::Waiting);
    }
}
