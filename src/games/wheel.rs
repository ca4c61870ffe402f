//! Wheel: balance bets on a colour, one spin per round, fixed multipliers
//! from the configured table.

use crate::common::config::GameConfigHandle;
use crate::common::types::{GameKind, Money};
use crate::config::GameRules;
use crate::errors::{BetRejection, InvariantViolation, WagerResult};
use crate::fairness::ResolutionResult;
use crate::games::types::{Bet, Outcome, Selector, Stake, StakeSpec, WheelSegment};
use crate::games::{GameContext, GameLogic, GameOrchestrator, SingleRoundRotation};
use crate::payout::{wheel_payout, PayoutPlan};
use crate::round::{Round, RoundView};
use async_trait::async_trait;

pub struct WheelLogic;

impl GameLogic for WheelLogic {
    fn kind(&self) -> GameKind {
        GameKind::Wheel
    }

    fn accepts_stake(&self, stake: &StakeSpec) -> bool {
        matches!(stake, StakeSpec::Balance(_))
    }

    fn validate_bet(
        &self,
        round: &Round,
        bets: &[Bet],
        bettor: &str,
        _stake: &Stake,
        selector: &Selector,
    ) -> Result<(), BetRejection> {
        let Selector::Wheel { segment } = selector else {
            return Err(BetRejection::InvalidSelector("wheel bets pick a segment".to_string()));
        };
        let GameRules::Wheel {
            table,
            max_bets_per_player,
        } = &round.config.rules
        else {
            return Err(BetRejection::GameDisabled);
        };

        if table.multiplier_for(*segment).is_none() {
            return Err(BetRejection::InvalidSelector(format!("{} is not on this wheel", segment)));
        }
        if *max_bets_per_player > 0 {
            let placed = bets.iter().filter(|b| b.bettor == bettor).count() as u32;
            if placed >= *max_bets_per_player {
                return Err(BetRejection::MaxBetsExceeded {
                    max: *max_bets_per_player,
                });
            }
        }
        Ok(())
    }

    fn resolve_outcome(
        &self,
        round: &Round,
        _bets: &[Bet],
        resolution: &ResolutionResult,
    ) -> Result<Outcome, InvariantViolation> {
        let table = round
            .config
            .wheel_table()
            .ok_or_else(|| InvariantViolation::NoWinner("round has no wheel table".to_string()))?;
        let roll = resolution.roll(table.slots);
        let slot = table
            .segment_for(roll)
            .ok_or_else(|| InvariantViolation::NoWinner(format!("roll {} maps to no segment", roll)))?;

        Ok(Outcome::Wheel {
            roll,
            segment: slot.segment,
            multiplier_bps: slot.multiplier_bps,
        })
    }

    fn payout(&self, round: &Round, bets: &[Bet], outcome: &Outcome) -> Result<PayoutPlan, InvariantViolation> {
        let Outcome::Wheel {
            segment,
            multiplier_bps,
            ..
        } = outcome
        else {
            return Err(InvariantViolation::NoWinner("outcome is not a wheel spin".to_string()));
        };
        Ok(wheel_payout(bets, *segment, *multiplier_bps, round.config.rake_bps))
    }
}

pub struct WheelGame {
    rotation: SingleRoundRotation,
}

impl WheelGame {
    pub fn new(ctx: GameContext, config: GameConfigHandle) -> Self {
        Self {
            rotation: SingleRoundRotation { ctx, config },
        }
    }

    /// Bet `amount` from the user's balance on `segment` in the current round
    pub fn place_bet(&self, user: &str, amount: Money, segment: WheelSegment) -> WagerResult<RoundView> {
        if !self.rotation.config.current().enabled {
            return Err(BetRejection::GameDisabled.into());
        }
        let round = self.rotation.ensure_round()?;
        let placed = self.rotation.ctx.bets.place_bet(
            &round.id,
            user,
            StakeSpec::Balance(amount),
            Selector::Wheel { segment },
        )?;
        self.rotation.ctx.round_view(&placed.round)
    }
}

#[async_trait]
impl GameOrchestrator for WheelGame {
    fn kind(&self) -> GameKind {
        GameKind::Wheel
    }

    async fn tick(&self) -> WagerResult<()> {
        self.rotation.tick().await
    }

    fn current_round_view(&self) -> WagerResult<Option<RoundView>> {
        self.rotation.current_round_view()
    }

    fn history(&self, limit: usize) -> WagerResult<Vec<RoundView>> {
        self.rotation.ctx.history(GameKind::Wheel, limit)
    }
}
