//! Coinflip: two players, items on either side, the bigger stake has the
//! proportionally bigger chance.
//!
//! The creator picks a side and stakes items; a joiner takes the free side with
//! a stake inside the creator's join range. The second bet locks the round.

use crate::common::config::GameConfigHandle;
use crate::common::types::{apply_bps, GameKind, ItemId, RoundId};
use crate::config::GameRules;
use crate::errors::{BetRejection, InvariantViolation, WagerResult};
use crate::fairness::ResolutionResult;
use crate::games::types::{Bet, CoinSide, Outcome, Selector, Stake, StakeSpec};
use crate::games::{GameContext, GameLogic, GameOrchestrator};
use crate::ledger::LedgerTxn;
use crate::payout::{flip_payout, flip_winning_side, PayoutPlan};
use crate::round::{CancelReason, FlipTerms, Round, RoundState, RoundView};
use crate::round_store;
use async_trait::async_trait;
use futures::future::join_all;
use tracing::{info, warn};

pub struct CoinflipLogic;

fn bet_side(bet: &Bet) -> Option<CoinSide> {
    match bet.selector {
        Selector::Coinflip { side } => Some(side),
        _ => None,
    }
}

impl GameLogic for CoinflipLogic {
    fn kind(&self) -> GameKind {
        GameKind::Coinflip
    }

    fn accepts_stake(&self, stake: &StakeSpec) -> bool {
        matches!(stake, StakeSpec::Items(_))
    }

    fn validate_bet(
        &self,
        round: &Round,
        _bets: &[Bet],
        bettor: &str,
        stake: &Stake,
        selector: &Selector,
    ) -> Result<(), BetRejection> {
        let Selector::Coinflip { side } = selector else {
            return Err(BetRejection::InvalidSelector("coinflip bets pick a side".to_string()));
        };
        let Some(terms) = &round.flip else {
            return Ok(());
        };

        if terms.creator == bettor {
            return Err(BetRejection::CannotJoinOwnRound);
        }
        if *side != terms.creator_side.opposite() {
            return Err(BetRejection::InvalidSelector(format!("{} is already taken", side)));
        }
        let value = stake.value();
        if value < terms.join_low || value > terms.join_high {
            return Err(BetRejection::OutsideJoinRange {
                low: terms.join_low,
                high: terms.join_high,
                actual: value,
            });
        }
        Ok(())
    }

    fn check_creation(&self, txn: &LedgerTxn<'_>, round: &Round, creator: &str) -> WagerResult<()> {
        let GameRules::Coinflip {
            max_open_rounds_per_player,
            ..
        } = round.config.rules
        else {
            return Ok(());
        };
        if max_open_rounds_per_player == 0 {
            return Ok(());
        }

        let mut open = 0;
        for id in round_store::rounds_in_state(txn, RoundState::Open, Some(GameKind::Coinflip))? {
            let created_by_user = round_store::load_round(txn, &id)?
                .and_then(|r| r.flip)
                .map_or(false, |terms| terms.creator == creator);
            if created_by_user {
                open += 1;
            }
        }
        if open >= max_open_rounds_per_player {
            return Err(BetRejection::TooManyOpenRounds {
                max: max_open_rounds_per_player,
            }
            .into());
        }
        Ok(())
    }

    fn on_bet_accepted(&self, round: &mut Round, bet: &Bet) {
        if round.flip.is_some() {
            return;
        }
        let (Some(side), GameRules::Coinflip { join_range_bps, .. }) = (bet_side(bet), &round.config.rules) else {
            return;
        };
        let stake = bet.value();
        let spread = apply_bps(stake, *join_range_bps);
        round.flip = Some(FlipTerms {
            creator: bet.bettor.clone(),
            creator_side: side,
            creator_stake: stake,
            join_low: stake - spread,
            join_high: stake + spread,
        });
    }

    fn resolve_outcome(
        &self,
        round: &Round,
        bets: &[Bet],
        resolution: &ResolutionResult,
    ) -> Result<Outcome, InvariantViolation> {
        let heads_stake = bets
            .iter()
            .filter(|b| bet_side(b) == Some(CoinSide::Heads))
            .map(Bet::value)
            .sum();
        let ticket = resolution.ticket(round.pot_total);
        let winning_side = flip_winning_side(ticket, heads_stake);
        let winner = bets
            .iter()
            .find(|b| bet_side(b) == Some(winning_side))
            .ok_or_else(|| InvariantViolation::NoWinner(format!("no bet on {}", winning_side)))?;

        Ok(Outcome::Coinflip {
            ticket,
            winning_side,
            winner: winner.bettor.clone(),
        })
    }

    fn payout(&self, round: &Round, bets: &[Bet], outcome: &Outcome) -> Result<PayoutPlan, InvariantViolation> {
        let Outcome::Coinflip { winning_side, .. } = outcome else {
            return Err(InvariantViolation::NoWinner("outcome is not a coinflip".to_string()));
        };
        let (winners, losers): (Vec<Bet>, Vec<Bet>) = bets
            .iter()
            .cloned()
            .partition(|b| bet_side(b) == Some(*winning_side));
        flip_payout(&winners, &losers, round.config.rake_bps)
    }
}

pub struct CoinflipGame {
    ctx: GameContext,
    config: GameConfigHandle,
}

impl CoinflipGame {
    pub fn new(ctx: GameContext, config: GameConfigHandle) -> Self {
        Self { ctx, config }
    }

    /// Open a new flip with the creator's items on `side`
    pub fn create_game(&self, creator: &str, items: Vec<ItemId>, side: CoinSide) -> WagerResult<RoundView> {
        let config = self.config.current();
        if !config.enabled {
            return Err(BetRejection::GameDisabled.into());
        }
        let round = self.ctx.machine.new_round(GameKind::Coinflip, config)?;
        let placed = self.ctx.bets.open_round_with_bet(
            round,
            creator,
            StakeSpec::Items(items),
            Selector::Coinflip { side },
        )?;
        info!(round_id = %placed.round.id, creator = creator, side = %side, "Coinflip created");
        self.ctx.round_view(&placed.round)
    }

    /// Take the free side of an open flip
    pub fn join_game(&self, round_id: &RoundId, joiner: &str, items: Vec<ItemId>) -> WagerResult<RoundView> {
        let round = round_store::require_round(self.ctx.gateway.store().as_ref(), round_id)?;
        let terms = round.flip.as_ref().ok_or(BetRejection::RoundNotAcceptingBets { state: round.state })?;
        let side = terms.creator_side.opposite();

        let placed = self.ctx.bets.place_bet(
            round_id,
            joiner,
            StakeSpec::Items(items),
            Selector::Coinflip { side },
        )?;
        self.ctx.round_view(&placed.round)
    }

    /// Creator withdraws an unjoined flip; items are returned
    pub fn cancel_game(&self, user: &str, round_id: &RoundId) -> WagerResult<RoundView> {
        let round = round_store::require_round(self.ctx.gateway.store().as_ref(), round_id)?;
        let is_creator = round.flip.as_ref().map_or(false, |t| t.creator == user);
        if !is_creator {
            return Err(BetRejection::NotRoundCreator.into());
        }
        if round.state != RoundState::Open {
            return Err(BetRejection::RoundNotAcceptingBets { state: round.state }.into());
        }
        let round = self.ctx.machine.cancel(round_id, CancelReason::CreatorCancelled)?;
        self.ctx.round_view(&round)
    }

    /// Flips waiting for a joiner
    pub fn open_games(&self) -> WagerResult<Vec<RoundView>> {
        let store = self.ctx.gateway.store().as_ref();
        let mut views = Vec::new();
        for id in round_store::rounds_in_state(store, RoundState::Open, Some(GameKind::Coinflip))? {
            if let Some(round) = round_store::load_round(store, &id)? {
                views.push(self.ctx.round_view(&round)?);
            }
        }
        views.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(views)
    }
}

#[async_trait]
impl GameOrchestrator for CoinflipGame {
    fn kind(&self) -> GameKind {
        GameKind::Coinflip
    }

    /// Flips advance concurrently so one slow beacon call holds up no other flip
    async fn tick(&self) -> WagerResult<()> {
        let ids = round_store::active_rounds(self.ctx.gateway.store().as_ref(), Some(GameKind::Coinflip))?;
        let ticks = ids.iter().map(|id| self.ctx.machine.tick(id));
        for (id, result) in ids.iter().zip(join_all(ticks).await) {
            if let Err(e) = result {
                warn!(round_id = %id, game = "coinflip", code = e.code(), "Tick failed: {}", e);
            }
        }
        Ok(())
    }

    /// Flips run side by side; the most recent open one is reported
    fn current_round_view(&self) -> WagerResult<Option<RoundView>> {
        Ok(self.open_games()?.into_iter().next())
    }

    fn history(&self, limit: usize) -> WagerResult<Vec<RoundView>> {
        self.ctx.history(GameKind::Coinflip, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{BetId, Money};
    use crate::config::GameConfig;
    use crate::fairness::beacon::{BeaconDraw, BeaconSource};
    use crate::fairness::outcome::commitment_hash;
    use crate::games::types::ItemSnapshot;
    use chrono::Utc;

    fn bet(seq: u32, bettor: &str, side: CoinSide, price: Money) -> Bet {
        Bet {
            id: BetId::new(),
            round_id: RoundId::default(),
            seq,
            bettor: bettor.into(),
            stake: Stake::Items {
                items: vec![ItemSnapshot {
                    id: format!("{}-item", bettor),
                    name: "Skin".into(),
                    price,
                }],
            },
            selector: Selector::Coinflip { side },
            placed_at: Utc::now(),
        }
    }

    fn resolution(raw: u64) -> ResolutionResult {
        ResolutionResult {
            raw_outcome_value: raw,
            outcome_hash: String::new(),
            revealed_seed: "seed".into(),
            draw: BeaconDraw {
                source: BeaconSource::Local,
                randomness: "r".into(),
                signature: String::new(),
                payload: String::new(),
                signer: String::new(),
            },
        }
    }

    fn round_with(bets: &[Bet]) -> Round {
        let mut round = Round::new(
            GameKind::Coinflip,
            GameConfig::coinflip(),
            "seed".into(),
            commitment_hash("seed"),
            Utc::now(),
        );
        for b in bets {
            round.pot_total += b.value();
            CoinflipLogic.on_bet_accepted(&mut round, b);
        }
        round
    }

    #[test]
    fn test_join_rules() {
        let creator = bet(0, "alice", CoinSide::Heads, 10_000);
        let round = round_with(&[creator.clone()]);
        let logic = CoinflipLogic;

        let own = bet(1, "alice", CoinSide::Tails, 10_000);
        assert_eq!(
            logic.validate_bet(&round, &[creator.clone()], "alice", &own.stake, &own.selector),
            Err(BetRejection::CannotJoinOwnRound)
        );

        let same_side = bet(1, "bob", CoinSide::Heads, 10_000);
        assert!(matches!(
            logic.validate_bet(&round, &[creator.clone()], "bob", &same_side.stake, &same_side.selector),
            Err(BetRejection::InvalidSelector(_))
        ));

        let too_big = bet(1, "bob", CoinSide::Tails, 11_001);
        assert!(matches!(
            logic.validate_bet(&round, &[creator.clone()], "bob", &too_big.stake, &too_big.selector),
            Err(BetRejection::OutsideJoinRange { low: 9_000, high: 11_000, actual: 11_001 })
        ));

        let ok = bet(1, "bob", CoinSide::Tails, 10_500);
        assert!(logic
            .validate_bet(&round, &[creator], "bob", &ok.stake, &ok.selector)
            .is_ok());
    }

    #[test]
    fn test_outcome_weighted_by_stake() {
        let bets = [
            bet(0, "alice", CoinSide::Heads, 10_000),
            bet(1, "bob", CoinSide::Tails, 10_500),
        ];
        let round = round_with(&bets);

        // raw 0 gives ticket 0, inside heads' [0, 10000)
        let outcome = CoinflipLogic.resolve_outcome(&round, &bets, &resolution(0)).unwrap();
        assert_eq!(outcome.winner(), Some("alice"));

        // raw near 2^64 gives the last ticket, on tails
        let outcome = CoinflipLogic.resolve_outcome(&round, &bets, &resolution(u64::MAX)).unwrap();
        assert!(matches!(outcome, Outcome::Coinflip { ticket: 20_499, winning_side: CoinSide::Tails, .. }));

        let plan = CoinflipLogic.payout(&round, &bets, &outcome).unwrap();
        plan.validate().unwrap();
        assert_eq!(plan.rake() + plan.paid_to_winners(), 20_500);
    }
}
