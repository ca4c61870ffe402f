//! Engine assembly
//!
//! Builds the component graph from an `EngineConfig`:
//! storage -> ledger gateway -> beacon/oracle -> state machine + bet ledger
//! -> game orchestrators -> scheduler.

use crate::bets::BetLedger;
use crate::cache::ViewCache;
use crate::common::config::GameConfigSource;
use crate::common::traits::{Clock, SystemClock};
use crate::common::types::GameKind;
use crate::config::{EngineConfig, FairnessMode, GameConfig};
use crate::errors::{ConfigurationError, WagerResult};
use crate::events::{BroadcastSink, RoundEvent};
use crate::fairness::beacon::{RandomBeacon, RandomOrgBeacon};
use crate::fairness::local::LocalBeacon;
use crate::fairness::FairnessOracle;
use crate::games::{CoinflipGame, GameContext, GameOrchestrator, PotGame, WheelGame};
use crate::ledger::LedgerGateway;
use crate::metrics::EngineMetrics;
use crate::round::RoundStateMachine;
use crate::scheduler::RoundScheduler;
use crate::storage::{KvBackend, MemoryStorage, RocksStorage};
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct WagerEngine {
    config: EngineConfig,
    gateway: Arc<LedgerGateway>,
    machine: Arc<RoundStateMachine>,
    metrics: Arc<EngineMetrics>,
    events: Arc<BroadcastSink>,
    game_configs: GameConfigSource,
    coinflip: Arc<CoinflipGame>,
    wheel: Arc<WheelGame>,
    pot: Arc<PotGame>,
}

impl WagerEngine {
    /// Open storage and the beacon described by `config`
    pub fn build(config: EngineConfig) -> WagerResult<Self> {
        config.validate()?;

        let store: Arc<dyn KvBackend> = if config.storage.in_memory {
            tracing::warn!("Using in-memory storage; nothing survives a restart");
            Arc::new(MemoryStorage::new())
        } else {
            std::fs::create_dir_all(&config.storage.data_directory).map_err(ConfigurationError::from)?;
            Arc::new(RocksStorage::open_with(
                &config.storage.data_directory,
                config.storage.write_buffer_size_mb,
                config.storage.max_write_buffer_number,
            )?)
        };

        let beacon: Arc<dyn RandomBeacon> = match config.fairness.mode {
            FairnessMode::Production => {
                let api_key = config.fairness.random_org_api_key.clone().ok_or_else(|| {
                    ConfigurationError::MissingRequired("fairness.random_org_api_key".to_string())
                })?;
                Arc::new(RandomOrgBeacon::new(
                    config.fairness.random_org_url.clone(),
                    api_key,
                    config.request_timeout(),
                )?)
            }
            FairnessMode::Development => {
                let local = LocalBeacon::load_or_create(store.as_ref())?;
                tracing::info!(public_key = %local.public_key_hex(), "Local beacon ready");
                Arc::new(local)
            }
        };

        Self::with_parts(config, store, beacon, Arc::new(SystemClock))
    }

    /// Assemble around caller-supplied storage, beacon and clock
    pub fn with_parts(
        config: EngineConfig,
        store: Arc<dyn KvBackend>,
        beacon: Arc<dyn RandomBeacon>,
        clock: Arc<dyn Clock>,
    ) -> WagerResult<Self> {
        config.validate()?;

        let gateway = Arc::new(LedgerGateway::new(store));
        let oracle = Arc::new(FairnessOracle::new(beacon, config.fairness.mode)?);
        let metrics = Arc::new(EngineMetrics::new()?);
        let events = Arc::new(BroadcastSink::new(config.monitoring.event_channel_capacity));
        let views = Arc::new(ViewCache::new(config.monitoring.view_cache_capacity));
        let game_configs = GameConfigSource::new(&config.games);

        let machine = Arc::new(RoundStateMachine::new(
            gateway.clone(),
            oracle,
            clock.clone(),
            events.clone(),
            metrics.clone(),
            config.retry.clone(),
            config.affiliates.clone(),
        ));
        let bets = Arc::new(BetLedger::new(
            gateway.clone(),
            clock.clone(),
            events.clone(),
            metrics.clone(),
        ));

        let ctx = GameContext {
            gateway: gateway.clone(),
            machine: machine.clone(),
            bets,
            views,
            clock,
        };
        let coinflip = Arc::new(CoinflipGame::new(ctx.clone(), game_configs.subscribe(GameKind::Coinflip)));
        let wheel = Arc::new(WheelGame::new(ctx.clone(), game_configs.subscribe(GameKind::Wheel)));
        let pot = Arc::new(PotGame::new(ctx, game_configs.subscribe(GameKind::Pot)));

        tracing::info!(
            fairness = ?config.fairness.mode,
            in_memory = config.storage.in_memory,
            "Engine assembled"
        );

        Ok(Self {
            config,
            gateway,
            machine,
            metrics,
            events,
            game_configs,
            coinflip,
            wheel,
            pot,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn gateway(&self) -> &Arc<LedgerGateway> {
        &self.gateway
    }

    pub fn machine(&self) -> &Arc<RoundStateMachine> {
        &self.machine
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    pub fn coinflip(&self) -> &Arc<CoinflipGame> {
        &self.coinflip
    }

    pub fn wheel(&self) -> &Arc<WheelGame> {
        &self.wheel
    }

    pub fn pot(&self) -> &Arc<PotGame> {
        &self.pot
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RoundEvent> {
        self.events.subscribe()
    }

    /// Change a game's settings. Applies from the next round onward.
    pub fn update_game_config(&self, kind: GameKind, config: GameConfig) -> Result<(), ConfigurationError> {
        self.game_configs.update(kind, config)
    }

    pub fn orchestrators(&self) -> Vec<Arc<dyn GameOrchestrator>> {
        vec![self.coinflip.clone(), self.wheel.clone(), self.pot.clone()]
    }

    /// Resume rounds left unfinished by a previous process
    pub async fn recover(&self) -> WagerResult<usize> {
        self.machine.recover().await
    }

    pub fn scheduler(&self) -> RoundScheduler {
        RoundScheduler::new(self.orchestrators(), self.config.tick_interval())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::traits::ManualClock;
    use crate::round::RoundState;

    fn engine() -> WagerEngine {
        WagerEngine::with_parts(
            EngineConfig::development(),
            Arc::new(MemoryStorage::new()),
            Arc::new(LocalBeacon::new_random()),
            Arc::new(ManualClock::default()),
        )
        .unwrap()
    }

    #[test]
    fn test_production_requires_remote_beacon() {
        let mut config = EngineConfig::production("key");
        config.storage.in_memory = true;
        let result = WagerEngine::with_parts(
            config,
            Arc::new(MemoryStorage::new()),
            Arc::new(LocalBeacon::new_random()),
            Arc::new(ManualClock::default()),
        );
        assert!(matches!(result, Err(e) if e.code() == "INVALID_CONFIGURATION"));
    }

    #[tokio::test]
    async fn test_first_tick_creates_rotating_rounds() {
        let engine = engine();
        assert!(engine.wheel().current_round_view().unwrap().is_none());

        engine.scheduler().tick_once().await;

        let wheel = engine.wheel().current_round_view().unwrap().unwrap();
        assert_eq!(wheel.state, RoundState::Open);
        let pot = engine.pot().current_round_view().unwrap().unwrap();
        assert_eq!(pot.state, RoundState::Waiting);
        assert!(engine.coinflip().current_round_view().unwrap().is_none());
        assert_eq!(engine.orchestrators().len(), 3);
    }

    #[test]
    fn test_config_update_rejects_wrong_kind() {
        let engine = engine();
        assert!(engine.update_game_config(GameKind::Wheel, GameConfig::pot()).is_err());
        let mut wheel = GameConfig::wheel();
        wheel.rake_bps = 100;
        assert!(engine.update_game_config(GameKind::Wheel, wheel).is_ok());
    }

    #[tokio::test]
    async fn test_config_update_rejects_overflowing_window() {
        let engine = engine();
        let mut wheel = GameConfig::wheel();
        wheel.round_duration_secs = i64::MAX as u64;
        assert!(engine.update_game_config(GameKind::Wheel, wheel).is_err());

        // Rotation keeps working on the previous snapshot
        engine.wheel().tick().await.unwrap();
        let view = engine.wheel().current_round_view().unwrap().unwrap();
        let window = engine.config().games.get(GameKind::Wheel).round_duration_secs;
        assert_eq!(view.seconds_until_lock, Some(window as i64));
    }
}
