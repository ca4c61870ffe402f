//! Configuration management with validation and defaults
//!
//! Engine-wide settings plus one `GameConfig` per game. Rounds snapshot their
//! game's config at creation, so edits only ever apply to the next round.

use crate::common::types::{BasisPoints, GameKind, Money, BPS_DENOMINATOR};
use crate::errors::ConfigurationError;
use crate::games::types::WheelSegment;
use crate::payout::affiliate::AffiliatePolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest betting window, stage delay or flip expiry a game may configure
pub const MAX_STAGE_SECS: u64 = 7 * 24 * 60 * 60;

/// Complete engine configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub fairness: FairnessConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub games: GamesConfig,
    #[serde(default)]
    pub affiliates: AffiliatePolicy,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    pub data_directory: String,
    /// Keep everything in memory (tests and local development)
    pub in_memory: bool,
    pub write_buffer_size_mb: usize,
    pub max_write_buffer_number: i32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_directory: "./DB/wagerline".to_string(),
            in_memory: false,
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
        }
    }
}

/// Where external randomness comes from
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FairnessMode {
    /// Signed strings from random.org. No local fallback.
    Production,
    /// Locally generated strings signed with the engine's schnorrkel key
    Development,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FairnessConfig {
    pub mode: FairnessMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_org_api_key: Option<String>,
    pub random_org_url: String,
    pub request_timeout_ms: u64,
}

impl Default for FairnessConfig {
    fn default() -> Self {
        Self {
            mode: FairnessMode::Development,
            random_org_api_key: None,
            random_org_url: "https://api.random.org/json-rpc/4/invoke".to_string(),
            request_timeout_ms: 3_000,
        }
    }
}

/// Backoff for the resolve and settle stages
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Attempts before an operator alert is raised. Retries continue afterwards.
    pub alert_after_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            alert_after_attempts: 5,
        }
    }
}

impl RetryConfig {
    /// Delay before attempt `attempts + 1`, doubling from the base and capped.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(20);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    pub tick_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 250,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MonitoringConfig {
    pub enable_metrics: bool,
    pub log_level: LogLevel,
    pub event_channel_capacity: usize,
    pub view_cache_capacity: usize,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_metrics: true,
            log_level: LogLevel::Info,
            event_channel_capacity: 1_024,
            view_cache_capacity: 256,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GamesConfig {
    pub coinflip: GameConfig,
    pub wheel: GameConfig,
    pub pot: GameConfig,
}

impl Default for GamesConfig {
    fn default() -> Self {
        Self {
            coinflip: GameConfig::coinflip(),
            wheel: GameConfig::wheel(),
            pot: GameConfig::pot(),
        }
    }
}

impl GamesConfig {
    pub fn get(&self, kind: GameKind) -> &GameConfig {
        match kind {
            GameKind::Coinflip => &self.coinflip,
            GameKind::Wheel => &self.wheel,
            GameKind::Pot => &self.pot,
        }
    }

    pub fn get_mut(&mut self, kind: GameKind) -> &mut GameConfig {
        match kind {
            GameKind::Coinflip => &mut self.coinflip,
            GameKind::Wheel => &mut self.wheel,
            GameKind::Pot => &mut self.pot,
        }
    }
}

/// Per-game tunables. Snapshotted into every round.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GameConfig {
    pub enabled: bool,
    pub min_bet: Money,
    /// Upper bound on one player's total stake in a round
    pub max_bet: Money,
    pub rake_bps: BasisPoints,
    /// How long a round stays Open before it locks
    pub round_duration_secs: u64,
    /// Delay between lock and fetching the outcome
    pub resolve_delay_secs: u64,
    /// Delay between outcome and payout (client animation)
    pub settle_delay_secs: u64,
    /// 0 means unlimited
    pub max_participants: u32,
    /// 0 means unlimited
    pub max_items_per_player: u32,
    /// 0 means unlimited; reaching it locks the round
    pub max_total_items: u32,
    pub bet_cooldown_ms: u64,
    pub rules: GameRules,
}

/// Settings that only make sense for one game
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum GameRules {
    Coinflip {
        /// Joiner stake must be within this fraction of the creator's
        join_range_bps: BasisPoints,
        max_open_rounds_per_player: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        open_expiry_secs: Option<u64>,
    },
    Wheel {
        table: WheelTable,
        /// 0 means unlimited
        max_bets_per_player: u32,
    },
    Pot {
        min_participants: u32,
    },
}

impl GameRules {
    pub fn kind(&self) -> GameKind {
        match self {
            GameRules::Coinflip { .. } => GameKind::Coinflip,
            GameRules::Wheel { .. } => GameKind::Wheel,
            GameRules::Pot { .. } => GameKind::Pot,
        }
    }
}

/// Slot ranges of the wheel and what each pays
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WheelTable {
    pub slots: u32,
    pub segments: Vec<WheelSegmentSpec>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WheelSegmentSpec {
    pub segment: WheelSegment,
    /// Inclusive slot range
    pub from: u32,
    pub to: u32,
    /// Total return on a winning stake, stake included
    pub multiplier_bps: BasisPoints,
}

impl Default for WheelTable {
    fn default() -> Self {
        let spec = |segment, from, to, multiplier_bps| WheelSegmentSpec {
            segment,
            from,
            to,
            multiplier_bps,
        };
        Self {
            slots: 32,
            segments: vec![
                spec(WheelSegment::Gold, 0, 0, 300_000),
                spec(WheelSegment::Pink, 1, 6, 50_000),
                spec(WheelSegment::Purple, 7, 16, 30_000),
                spec(WheelSegment::Black, 17, 31, 20_000),
            ],
        }
    }
}

impl WheelTable {
    pub fn segment_for(&self, roll: u32) -> Option<&WheelSegmentSpec> {
        self.segments
            .iter()
            .find(|s| roll >= s.from && roll <= s.to)
    }

    pub fn multiplier_for(&self, segment: WheelSegment) -> Option<BasisPoints> {
        self.segments
            .iter()
            .find(|s| s.segment == segment)
            .map(|s| s.multiplier_bps)
    }

    /// Every slot covered exactly once, every segment listed once
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.slots == 0 {
            return Err(ConfigurationError::ValidationFailed(
                "wheel table must have at least one slot".to_string(),
            ));
        }
        let mut covered = vec![false; self.slots as usize];
        let mut seen = Vec::new();
        for spec in &self.segments {
            if seen.contains(&spec.segment) {
                return Err(ConfigurationError::ValidationFailed(format!(
                    "wheel segment {} listed twice",
                    spec.segment
                )));
            }
            seen.push(spec.segment);
            if spec.from > spec.to || spec.to >= self.slots {
                return Err(ConfigurationError::InvalidValue {
                    field: format!("wheel.{}", spec.segment),
                    value: format!("{}..={}", spec.from, spec.to),
                    reason: format!("range must lie within 0..{}", self.slots),
                });
            }
            if spec.multiplier_bps == 0 {
                return Err(ConfigurationError::InvalidValue {
                    field: format!("wheel.{}.multiplier_bps", spec.segment),
                    value: "0".to_string(),
                    reason: "multiplier must be positive".to_string(),
                });
            }
            for slot in spec.from..=spec.to {
                if covered[slot as usize] {
                    return Err(ConfigurationError::ValidationFailed(format!(
                        "wheel slot {} covered twice",
                        slot
                    )));
                }
                covered[slot as usize] = true;
            }
        }
        if let Some(slot) = covered.iter().position(|c| !c) {
            return Err(ConfigurationError::ValidationFailed(format!(
                "wheel slot {} not covered",
                slot
            )));
        }
        Ok(())
    }
}

impl GameConfig {
    pub fn coinflip() -> Self {
        Self {
            enabled: true,
            min_bet: 50,
            max_bet: 1_000_000,
            rake_bps: 500,
            round_duration_secs: 0,
            resolve_delay_secs: 10,
            settle_delay_secs: 0,
            max_participants: 2,
            max_items_per_player: 20,
            max_total_items: 0,
            bet_cooldown_ms: 2_000,
            rules: GameRules::Coinflip {
                join_range_bps: 1_000,
                max_open_rounds_per_player: 5,
                open_expiry_secs: None,
            },
        }
    }

    pub fn wheel() -> Self {
        Self {
            enabled: true,
            min_bet: 10,
            max_bet: 500_000,
            rake_bps: 0,
            round_duration_secs: 20,
            resolve_delay_secs: 3,
            settle_delay_secs: 8,
            max_participants: 0,
            max_items_per_player: 0,
            max_total_items: 0,
            bet_cooldown_ms: 1_000,
            rules: GameRules::Wheel {
                table: WheelTable::default(),
                max_bets_per_player: 5,
            },
        }
    }

    pub fn pot() -> Self {
        Self {
            enabled: true,
            min_bet: 10,
            max_bet: 1_000_000,
            rake_bps: 500,
            round_duration_secs: 60,
            resolve_delay_secs: 3,
            settle_delay_secs: 10,
            max_participants: 20,
            max_items_per_player: 20,
            max_total_items: 100,
            bet_cooldown_ms: 2_000,
            rules: GameRules::Pot {
                min_participants: 2,
            },
        }
    }

    pub fn default_for(kind: GameKind) -> Self {
        match kind {
            GameKind::Coinflip => Self::coinflip(),
            GameKind::Wheel => Self::wheel(),
            GameKind::Pot => Self::pot(),
        }
    }

    pub fn kind(&self) -> GameKind {
        self.rules.kind()
    }

    pub fn round_duration(&self) -> chrono::Duration {
        stage_window(self.round_duration_secs)
    }

    pub fn resolve_delay(&self) -> chrono::Duration {
        stage_window(self.resolve_delay_secs)
    }

    pub fn settle_delay(&self) -> chrono::Duration {
        stage_window(self.settle_delay_secs)
    }

    pub fn open_expiry(&self) -> Option<chrono::Duration> {
        match &self.rules {
            GameRules::Coinflip {
                open_expiry_secs: Some(secs),
                ..
            } => Some(stage_window(*secs)),
            _ => None,
        }
    }

    pub fn min_participants(&self) -> u32 {
        match &self.rules {
            GameRules::Pot { min_participants } => *min_participants,
            GameRules::Coinflip { .. } => 2,
            GameRules::Wheel { .. } => 0,
        }
    }

    pub fn wheel_table(&self) -> Option<&WheelTable> {
        match &self.rules {
            GameRules::Wheel { table, .. } => Some(table),
            _ => None,
        }
    }

    /// Validate one game's settings against the game they are meant for
    pub fn validate(&self, kind: GameKind) -> Result<(), ConfigurationError> {
        if self.rules.kind() != kind {
            return Err(ConfigurationError::InvalidValue {
                field: format!("games.{}.rules.kind", kind),
                value: self.rules.kind().to_string(),
                reason: "rules do not match the game".to_string(),
            });
        }
        if self.min_bet <= 0 {
            return Err(ConfigurationError::InvalidValue {
                field: format!("games.{}.min_bet", kind),
                value: self.min_bet.to_string(),
                reason: "must be > 0".to_string(),
            });
        }
        if self.max_bet < self.min_bet {
            return Err(ConfigurationError::InvalidValue {
                field: format!("games.{}.max_bet", kind),
                value: self.max_bet.to_string(),
                reason: "must be >= min_bet".to_string(),
            });
        }
        if self.rake_bps as i64 >= BPS_DENOMINATOR {
            return Err(ConfigurationError::InvalidValue {
                field: format!("games.{}.rake_bps", kind),
                value: self.rake_bps.to_string(),
                reason: "rake must be below 100%".to_string(),
            });
        }

        let mut windows = vec![
            ("round_duration_secs", self.round_duration_secs),
            ("resolve_delay_secs", self.resolve_delay_secs),
            ("settle_delay_secs", self.settle_delay_secs),
        ];
        if let GameRules::Coinflip {
            open_expiry_secs: Some(secs),
            ..
        } = &self.rules
        {
            windows.push(("rules.open_expiry_secs", *secs));
        }
        for (field, secs) in windows {
            if secs > MAX_STAGE_SECS {
                return Err(ConfigurationError::InvalidValue {
                    field: format!("games.{}.{}", kind, field),
                    value: secs.to_string(),
                    reason: format!("must be <= {}", MAX_STAGE_SECS),
                });
            }
        }

        match &self.rules {
            GameRules::Coinflip {
                join_range_bps,
                max_open_rounds_per_player,
                ..
            } => {
                if self.max_participants != 2 {
                    return Err(ConfigurationError::ValidationFailed(
                        "coinflip rounds have exactly two participants".to_string(),
                    ));
                }
                if *join_range_bps as i64 >= BPS_DENOMINATOR {
                    return Err(ConfigurationError::InvalidValue {
                        field: "games.coinflip.rules.join_range_bps".to_string(),
                        value: join_range_bps.to_string(),
                        reason: "must be below 100%".to_string(),
                    });
                }
                if *max_open_rounds_per_player == 0 {
                    return Err(ConfigurationError::InvalidValue {
                        field: "games.coinflip.rules.max_open_rounds_per_player".to_string(),
                        value: "0".to_string(),
                        reason: "must be > 0".to_string(),
                    });
                }
            }
            GameRules::Wheel { table, .. } => table.validate()?,
            GameRules::Pot { min_participants } => {
                if *min_participants == 0 {
                    return Err(ConfigurationError::InvalidValue {
                        field: "games.pot.rules.min_participants".to_string(),
                        value: "0".to_string(),
                        reason: "must be > 0".to_string(),
                    });
                }
                if self.round_duration_secs == 0 {
                    return Err(ConfigurationError::InvalidValue {
                        field: "games.pot.round_duration_secs".to_string(),
                        value: "0".to_string(),
                        reason: "pot rounds need a betting window".to_string(),
                    });
                }
            }
        }

        if kind == GameKind::Wheel && self.round_duration_secs == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "games.wheel.round_duration_secs".to_string(),
                value: "0".to_string(),
                reason: "wheel rounds need a betting window".to_string(),
            });
        }

        Ok(())
    }
}

/// Seconds as a signed duration, saturating instead of panicking on overflow
fn stage_window(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

impl EngineConfig {
    /// Local development: in-memory storage, locally signed randomness, short rounds
    pub fn development() -> Self {
        let mut config = Self {
            storage: StorageConfig {
                in_memory: true,
                ..Default::default()
            },
            monitoring: MonitoringConfig {
                log_level: LogLevel::Debug,
                ..Default::default()
            },
            ..Default::default()
        };
        config.games.wheel.round_duration_secs = 10;
        config.games.pot.round_duration_secs = 20;
        config
    }

    /// Production deployment: RocksDB persistence and random.org randomness
    pub fn production(random_org_api_key: impl Into<String>) -> Self {
        Self {
            storage: StorageConfig {
                data_directory: "./DB/wagerline".to_string(),
                write_buffer_size_mb: 128,
                max_write_buffer_number: 6,
                in_memory: false,
            },
            fairness: FairnessConfig {
                mode: FairnessMode::Production,
                random_org_api_key: Some(random_org_api_key.into()),
                ..Default::default()
            },
            retry: RetryConfig {
                base_delay_ms: 2_000,
                max_delay_ms: 120_000,
                alert_after_attempts: 3,
            },
            ..Default::default()
        }
    }

    /// Validate configuration for logical consistency
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.fairness.mode == FairnessMode::Production
            && self
                .fairness
                .random_org_api_key
                .as_deref()
                .map_or(true, str::is_empty)
        {
            return Err(ConfigurationError::MissingRequired(
                "fairness.random_org_api_key (required in production mode)".to_string(),
            ));
        }
        if self.fairness.request_timeout_ms == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "fairness.request_timeout_ms".to_string(),
                value: "0".to_string(),
                reason: "must be > 0".to_string(),
            });
        }
        if self.retry.base_delay_ms == 0 || self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigurationError::ValidationFailed(
                "retry delays must satisfy 0 < base_delay_ms <= max_delay_ms".to_string(),
            ));
        }
        if self.retry.alert_after_attempts == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "retry.alert_after_attempts".to_string(),
                value: "0".to_string(),
                reason: "must be > 0".to_string(),
            });
        }
        if self.scheduler.tick_interval_ms == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "scheduler.tick_interval_ms".to_string(),
                value: "0".to_string(),
                reason: "must be > 0".to_string(),
            });
        }
        if self.monitoring.event_channel_capacity == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "monitoring.event_channel_capacity".to_string(),
                value: "0".to_string(),
                reason: "must be > 0".to_string(),
            });
        }
        for kind in GameKind::ALL {
            self.games.get(kind).validate(kind)?;
        }
        self.affiliates.validate()?;
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler.tick_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.fairness.request_timeout_ms)
    }
}
