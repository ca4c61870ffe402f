//! Game rules and orchestrators
//!
//! Each game contributes a [`GameLogic`] (bet validation, outcome and payout
//! rules, all pure) and an orchestrator that owns the round rotation for that
//! game and exposes its public operations.

pub mod coinflip;
pub mod pot;
pub mod types;
pub mod wheel;

use crate::bets::BetLedger;
use crate::cache::ViewCache;
use crate::common::config::GameConfigHandle;
use crate::common::traits::Clock;
use crate::common::types::GameKind;
use crate::errors::{BetRejection, InvariantViolation, WagerResult};
use crate::fairness::ResolutionResult;
use crate::ledger::{LedgerGateway, LedgerTxn};
use crate::payout::PayoutPlan;
use crate::round::{Round, RoundStateMachine, RoundView};
use crate::round_store;
use async_trait::async_trait;
use std::sync::Arc;
use types::{Bet, Outcome, Selector, Stake, StakeSpec};

pub use coinflip::{CoinflipGame, CoinflipLogic};
pub use pot::{PotGame, PotLogic};
pub use wheel::{WheelGame, WheelLogic};

/// Per-game rules consulted by the bet ledger and the state machine
pub trait GameLogic: Send + Sync {
    fn kind(&self) -> GameKind;

    fn accepts_stake(&self, stake: &StakeSpec) -> bool;

    /// Game-specific checks on a bet, after the shared limits passed
    fn validate_bet(
        &self,
        round: &Round,
        bets: &[Bet],
        bettor: &str,
        stake: &Stake,
        selector: &Selector,
    ) -> Result<(), BetRejection>;

    /// Checks on a brand new round before its first bet is written
    fn check_creation(&self, _txn: &LedgerTxn<'_>, _round: &Round, _creator: &str) -> WagerResult<()> {
        Ok(())
    }

    /// Hook after a bet is accepted, before cap transitions are applied
    fn on_bet_accepted(&self, _round: &mut Round, _bet: &Bet) {}

    fn resolve_outcome(
        &self,
        round: &Round,
        bets: &[Bet],
        resolution: &ResolutionResult,
    ) -> Result<Outcome, InvariantViolation>;

    fn payout(&self, round: &Round, bets: &[Bet], outcome: &Outcome) -> Result<PayoutPlan, InvariantViolation>;
}

pub fn logic_for(kind: GameKind) -> &'static dyn GameLogic {
    match kind {
        GameKind::Coinflip => &CoinflipLogic,
        GameKind::Wheel => &WheelLogic,
        GameKind::Pot => &PotLogic,
    }
}

/// Shared handles every orchestrator needs
#[derive(Clone)]
pub struct GameContext {
    pub gateway: Arc<LedgerGateway>,
    pub machine: Arc<RoundStateMachine>,
    pub bets: Arc<BetLedger>,
    pub views: Arc<ViewCache>,
    pub clock: Arc<dyn Clock>,
}

impl GameContext {
    pub fn round_view(&self, round: &Round) -> WagerResult<RoundView> {
        let store = self.gateway.store().as_ref();
        self.views
            .view(round, self.clock.now(), || round_store::load_bets(store, &round.id))
    }

    /// Terminal rounds, newest first
    pub fn history(&self, kind: GameKind, limit: usize) -> WagerResult<Vec<RoundView>> {
        let store = self.gateway.store().as_ref();
        round_store::load_history(store, kind, limit)?
            .iter()
            .map(|round| self.round_view(round))
            .collect()
    }
}

/// Common surface the scheduler drives
#[async_trait]
pub trait GameOrchestrator: Send + Sync {
    fn kind(&self) -> GameKind;

    /// Advance timers for every live round of this game
    async fn tick(&self) -> WagerResult<()>;

    fn current_round_view(&self) -> WagerResult<Option<RoundView>>;

    fn history(&self, limit: usize) -> WagerResult<Vec<RoundView>>;
}

/// Rotation shared by games that always run exactly one live round.
///
/// A round that reaches a terminal state, or is held for review, is replaced
/// by a fresh one built from the latest config.
pub(crate) struct SingleRoundRotation {
    pub ctx: GameContext,
    pub config: GameConfigHandle,
}

impl SingleRoundRotation {
    pub fn current_round(&self) -> WagerResult<Option<Round>> {
        let store = self.ctx.gateway.store().as_ref();
        match round_store::current_round_id(store, self.config.kind())? {
            Some(id) => round_store::load_round(store, &id),
            None => Ok(None),
        }
    }

    /// Current round, starting a new one if there is none to bet on
    pub fn ensure_round(&self) -> WagerResult<Round> {
        match self.current_round()? {
            Some(round) if !round.state.is_terminal() && !round.is_held() => Ok(round),
            _ => self.ctx.machine.create_round(self.config.kind(), self.config.current()),
        }
    }

    pub async fn tick(&self) -> WagerResult<()> {
        let round = self.ensure_round()?;
        let state = self.ctx.machine.tick(&round.id).await?;
        if state.is_terminal() {
            let next = self.ensure_round()?;
            tracing::debug!(game = %self.config.kind(), round_id = %next.id, "Next round ready");
        }

        // Rounds displaced by a hold still finish once released
        let displaced = round_store::active_rounds(self.ctx.gateway.store().as_ref(), Some(self.config.kind()))?;
        for id in displaced.into_iter().filter(|id| *id != round.id) {
            if let Err(e) = self.ctx.machine.tick(&id).await {
                tracing::warn!(game = %self.config.kind(), round_id = %id, "Tick failed: {}", e);
            }
        }
        Ok(())
    }

    pub fn current_round_view(&self) -> WagerResult<Option<RoundView>> {
        match self.current_round()? {
            Some(round) => Ok(Some(self.ctx.round_view(&round)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logic_lookup_matches_kind() {
        for kind in GameKind::ALL {
            assert_eq!(logic_for(kind).kind(), kind);
        }
    }

    #[test]
    fn test_stake_kinds() {
        let items = StakeSpec::Items(vec!["i1".into()]);
        let balance = StakeSpec::Balance(100);
        assert!(logic_for(GameKind::Coinflip).accepts_stake(&items));
        assert!(!logic_for(GameKind::Coinflip).accepts_stake(&balance));
        assert!(logic_for(GameKind::Pot).accepts_stake(&items));
        assert!(logic_for(GameKind::Wheel).accepts_stake(&balance));
        assert!(!logic_for(GameKind::Wheel).accepts_stake(&items));
    }
}
