//! Pot (jackpot): players throw items into a shared pot and one ticket drawn
//! over the pot's value picks the winner. Each bet owns the ticket range
//! `[value before it, value before it + stake)` in placement order.

use crate::common::config::GameConfigHandle;
use crate::common::types::{GameKind, ItemId};
use crate::errors::{BetRejection, InvariantViolation, WagerResult};
use crate::fairness::ResolutionResult;
use crate::games::types::{Bet, Outcome, Selector, Stake, StakeSpec};
use crate::games::{GameContext, GameLogic, GameOrchestrator, SingleRoundRotation};
use crate::payout::{pot_payout, pot_winner, PayoutPlan};
use crate::round::{Round, RoundView};
use async_trait::async_trait;

pub struct PotLogic;

impl GameLogic for PotLogic {
    fn kind(&self) -> GameKind {
        GameKind::Pot
    }

    fn accepts_stake(&self, stake: &StakeSpec) -> bool {
        matches!(stake, StakeSpec::Items(_))
    }

    fn validate_bet(
        &self,
        _round: &Round,
        _bets: &[Bet],
        _bettor: &str,
        _stake: &Stake,
        selector: &Selector,
    ) -> Result<(), BetRejection> {
        match selector {
            Selector::Pot => Ok(()),
            _ => Err(BetRejection::InvalidSelector("pot bets carry no choice".to_string())),
        }
    }

    fn resolve_outcome(
        &self,
        round: &Round,
        bets: &[Bet],
        resolution: &ResolutionResult,
    ) -> Result<Outcome, InvariantViolation> {
        let ticket = resolution.ticket(round.pot_total);
        let bet = pot_winner(bets, ticket).ok_or_else(|| {
            InvariantViolation::NoWinner(format!("ticket {} outside pot of {}", ticket, round.pot_total))
        })?;
        Ok(Outcome::Pot {
            ticket,
            winning_bet: bet.id,
            winner: bet.bettor.clone(),
        })
    }

    fn payout(&self, round: &Round, bets: &[Bet], outcome: &Outcome) -> Result<PayoutPlan, InvariantViolation> {
        let Outcome::Pot { ticket, .. } = outcome else {
            return Err(InvariantViolation::NoWinner("outcome is not a pot draw".to_string()));
        };
        pot_payout(bets, *ticket, round.config.rake_bps)
    }
}

pub struct PotGame {
    rotation: SingleRoundRotation,
}

impl PotGame {
    pub fn new(ctx: GameContext, config: GameConfigHandle) -> Self {
        Self {
            rotation: SingleRoundRotation { ctx, config },
        }
    }

    /// Add the user's items to the current pot
    pub fn place_bet(&self, user: &str, items: Vec<ItemId>) -> WagerResult<RoundView> {
        if !self.rotation.config.current().enabled {
            return Err(BetRejection::GameDisabled.into());
        }
        let round = self.rotation.ensure_round()?;
        let placed = self
            .rotation
            .ctx
            .bets
            .place_bet(&round.id, user, StakeSpec::Items(items), Selector::Pot)?;
        self.rotation.ctx.round_view(&placed.round)
    }
}

#[async_trait]
impl GameOrchestrator for PotGame {
    fn kind(&self) -> GameKind {
        GameKind::Pot
    }

    async fn tick(&self) -> WagerResult<()> {
        self.rotation.tick().await
    }

    fn current_round_view(&self) -> WagerResult<Option<RoundView>> {
        self.rotation.current_round_view()
    }

    fn history(&self, limit: usize) -> WagerResult<Vec<RoundView>> {
        self.rotation.ctx.history(GameKind::Pot, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{BetId, Money, RoundId};
    use crate::config::GameConfig;
    use crate::fairness::beacon::{BeaconDraw, BeaconSource};
    use crate::fairness::outcome::commitment_hash;
    use crate::games::types::ItemSnapshot;
    use chrono::Utc;

    fn bet(seq: u32, bettor: &str, price: Money) -> Bet {
        Bet {
            id: BetId::new(),
            round_id: RoundId::default(),
            seq,
            bettor: bettor.into(),
            stake: Stake::Items {
                items: vec![ItemSnapshot {
                    id: format!("{}-{}", bettor, seq),
                    name: "Skin".into(),
                    price,
                }],
            },
            selector: Selector::Pot,
            placed_at: Utc::now(),
        }
    }

    #[test]
    fn test_outcome_and_payout_agree() {
        let bets = [bet(0, "a", 100), bet(1, "b", 250), bet(2, "c", 50)];
        let mut round = Round::new(
            GameKind::Pot,
            GameConfig::pot(),
            "seed".into(),
            commitment_hash("seed"),
            Utc::now(),
        );
        round.pot_total = 400;

        // ticket = raw * 400 / 2^64 = 120 when raw = 120 * 2^64 / 400
        let raw = ((120u128 << 64) / 400) as u64 + 1;
        let resolution = ResolutionResult {
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
        };

        let outcome = PotLogic.resolve_outcome(&round, &bets, &resolution).unwrap();
        assert!(matches!(&outcome, Outcome::Pot { ticket: 120, winner, .. } if winner == "b"));

        let plan = PotLogic.payout(&round, &bets, &outcome).unwrap();
        plan.validate().unwrap();
        let won = plan.transfers.iter().find(|t| t.to.user_id() == Some("b")).unwrap();
        assert_eq!(won.amount, 400 - plan.rake());
    }
}
