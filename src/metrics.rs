//! Settlement metrics
//!
//! Prometheus counters for bets, round outcomes and the retry pipeline. Every
//! engine owns its own registry so tests never share global state.

use crate::common::types::{GameKind, Money};
use crate::errors::ConfigurationError;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

pub struct EngineMetrics {
    registry: Registry,
    bets_placed: IntCounterVec,
    bets_rejected: IntCounterVec,
    rounds_settled: IntCounterVec,
    rounds_cancelled: IntCounterVec,
    rounds_held: IntCounterVec,
    stage_retries: IntCounterVec,
    alerts: IntCounter,
    rake_collected: IntCounterVec,
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> Result<IntCounterVec, ConfigurationError> {
    let counter = IntCounterVec::new(Opts::new(name, help).namespace("wagerline"), labels)
        .map_err(|e| ConfigurationError::ValidationFailed(format!("metric {}: {}", name, e)))?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(|e| ConfigurationError::ValidationFailed(format!("metric {}: {}", name, e)))?;
    Ok(counter)
}

impl EngineMetrics {
    pub fn new() -> Result<Self, ConfigurationError> {
        let registry = Registry::new();

        let alerts = IntCounter::with_opts(
            Opts::new("operator_alerts_total", "Rounds escalated to an operator").namespace("wagerline"),
        )
        .map_err(|e| ConfigurationError::ValidationFailed(e.to_string()))?;
        registry
            .register(Box::new(alerts.clone()))
            .map_err(|e| ConfigurationError::ValidationFailed(e.to_string()))?;

        Ok(Self {
            bets_placed: counter_vec(&registry, "bets_placed_total", "Accepted bets", &["game"])?,
            bets_rejected: counter_vec(&registry, "bets_rejected_total", "Rejected bets", &["game", "code"])?,
            rounds_settled: counter_vec(&registry, "rounds_settled_total", "Settled rounds", &["game"])?,
            rounds_cancelled: counter_vec(&registry, "rounds_cancelled_total", "Cancelled rounds", &["game"])?,
            rounds_held: counter_vec(&registry, "rounds_held_total", "Rounds held for manual review", &["game"])?,
            stage_retries: counter_vec(
                &registry,
                "stage_retries_total",
                "Failed resolve/settle attempts scheduled for retry",
                &["game", "stage"],
            )?,
            rake_collected: counter_vec(&registry, "rake_collected_total", "Rake in minor units", &["game"])?,
            alerts,
            registry,
        })
    }

    pub fn bet_placed(&self, game: GameKind) {
        self.bets_placed.with_label_values(&[game.as_str()]).inc();
    }

    pub fn bet_rejected(&self, game: GameKind, code: &str) {
        self.bets_rejected.with_label_values(&[game.as_str(), code]).inc();
    }

    pub fn round_settled(&self, game: GameKind, rake: Money) {
        self.rounds_settled.with_label_values(&[game.as_str()]).inc();
        if rake > 0 {
            self.rake_collected
                .with_label_values(&[game.as_str()])
                .inc_by(rake as u64);
        }
    }

    pub fn round_cancelled(&self, game: GameKind) {
        self.rounds_cancelled.with_label_values(&[game.as_str()]).inc();
    }

    pub fn round_held(&self, game: GameKind) {
        self.rounds_held.with_label_values(&[game.as_str()]).inc();
    }

    pub fn stage_retry(&self, game: GameKind, stage: &str) {
        self.stage_retries.with_label_values(&[game.as_str(), stage]).inc();
    }

    pub fn alert(&self) {
        self.alerts.inc();
    }

    pub fn bets_placed_count(&self, game: GameKind) -> u64 {
        self.bets_placed.with_label_values(&[game.as_str()]).get()
    }

    pub fn alert_count(&self) -> u64 {
        self.alerts.get()
    }

    /// Text exposition format
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
