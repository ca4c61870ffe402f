//! Configuration loading and per-game configuration subscriptions
//!
//! `ConfigLoader` reads TOML, applies `WAGER_*` environment overrides and
//! validates the result. `GameConfigSource` hands each orchestrator a typed,
//! read-only view of its own game's settings plus change notifications.

use crate::config::{EngineConfig, FairnessMode, GameConfig, GamesConfig};
use crate::common::types::GameKind;
use crate::errors::{ConfigurationError, WagerResult};
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

/// Configuration loader with environment variable support
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> WagerResult<EngineConfig> {
        let mut config = match self.config_path {
            Some(ref path) => self.load_from_file(path)?,
            None => EngineConfig::default(),
        };

        apply_overrides(&mut config, |key| env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> Result<EngineConfig, ConfigurationError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;
        Ok(toml::from_str(&content)?)
    }

    /// Save configuration to file
    pub fn save(&self, config: &EngineConfig, path: &str) -> WagerResult<()> {
        let toml_string = toml::to_string_pretty(config).map_err(ConfigurationError::from)?;
        std::fs::write(path, toml_string).map_err(|e| {
            ConfigurationError::SaveFailed(format!("Failed to write to {}: {}", path, e))
        })?;
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigurationError> {
    value.parse().map_err(|_| ConfigurationError::InvalidValue {
        field: key.to_string(),
        value,
        reason: "could not be parsed".to_string(),
    })
}

/// Apply `WAGER_*` overrides using `lookup` as the variable source.
pub(crate) fn apply_overrides<F>(config: &mut EngineConfig, lookup: F) -> Result<(), ConfigurationError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(dir) = lookup("WAGER_DATA_DIR") {
        config.storage.data_directory = dir;
    }
    if let Some(v) = lookup("WAGER_IN_MEMORY") {
        config.storage.in_memory = parse_env("WAGER_IN_MEMORY", v)?;
    }
    if let Some(mode) = lookup("WAGER_FAIRNESS_MODE") {
        config.fairness.mode = match mode.to_ascii_lowercase().as_str() {
            "production" => FairnessMode::Production,
            "development" => FairnessMode::Development,
            _ => {
                return Err(ConfigurationError::InvalidValue {
                    field: "WAGER_FAIRNESS_MODE".to_string(),
                    value: mode,
                    reason: "expected production or development".to_string(),
                })
            }
        };
    }
    if let Some(key) = lookup("WAGER_RANDOM_ORG_API_KEY") {
        config.fairness.random_org_api_key = Some(key);
    }
    if let Some(v) = lookup("WAGER_BEACON_TIMEOUT_MS") {
        config.fairness.request_timeout_ms = parse_env("WAGER_BEACON_TIMEOUT_MS", v)?;
    }
    if let Some(v) = lookup("WAGER_TICK_INTERVAL_MS") {
        config.scheduler.tick_interval_ms = parse_env("WAGER_TICK_INTERVAL_MS", v)?;
    }
    for kind in GameKind::ALL {
        let key = format!("WAGER_{}_ENABLED", kind.as_str().to_ascii_uppercase());
        if let Some(v) = lookup(&key) {
            config.games.get_mut(kind).enabled = parse_env(&key, v)?;
        }
        let key = format!("WAGER_{}_RAKE_BPS", kind.as_str().to_ascii_uppercase());
        if let Some(v) = lookup(&key) {
            config.games.get_mut(kind).rake_bps = parse_env(&key, v)?;
        }
    }
    Ok(())
}

/// Generate a sample configuration file
pub fn generate_sample_config(path: &str) -> WagerResult<()> {
    ConfigLoader::new().save(&EngineConfig::default(), path)
}

/// Live per-game configuration.
///
/// Orchestrators read a snapshot when they create a round; updates never touch
/// rounds that already exist.
#[derive(Clone)]
pub struct GameConfigSource {
    channels: Arc<HashMap<GameKind, watch::Sender<GameConfig>>>,
}

impl GameConfigSource {
    pub fn new(games: &GamesConfig) -> Self {
        let channels = GameKind::ALL
            .iter()
            .map(|kind| (*kind, watch::channel(games.get(*kind).clone()).0))
            .collect();
        Self {
            channels: Arc::new(channels),
        }
    }

    pub fn snapshot(&self, kind: GameKind) -> GameConfig {
        match self.channels.get(&kind) {
            Some(tx) => tx.borrow().clone(),
            None => GameConfig::default_for(kind),
        }
    }

    /// Typed handle scoped to a single game
    pub fn subscribe(&self, kind: GameKind) -> GameConfigHandle {
        let rx = match self.channels.get(&kind) {
            Some(tx) => tx.subscribe(),
            None => watch::channel(GameConfig::default_for(kind)).1,
        };
        GameConfigHandle { kind, rx }
    }

    /// Replace a game's settings. Applies from the next round on.
    pub fn update(&self, kind: GameKind, config: GameConfig) -> Result<(), ConfigurationError> {
        config.validate(kind)?;
        let tx = self.channels.get(&kind).ok_or_else(|| {
            ConfigurationError::MissingRequired(format!("games.{}", kind))
        })?;
        tx.send_replace(config);
        tracing::info!(game = %kind, "Game configuration updated; applies to the next round");
        Ok(())
    }
}

/// Read-only subscription to one game's configuration
pub struct GameConfigHandle {
    kind: GameKind,
    rx: watch::Receiver<GameConfig>,
}

impl GameConfigHandle {
    pub fn kind(&self) -> GameKind {
        self.kind
    }

    pub fn current(&self) -> GameConfig {
        self.rx.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_save_and_load_config() -> WagerResult<()> {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();

        let original = EngineConfig::default();
        ConfigLoader::new().save(&original, path)?;

        let loaded = ConfigLoader::new().with_path(path).load_from_file(path)?;
        assert_eq!(loaded, original);
        Ok(())
    }

    #[test]
    fn test_env_overrides() {
        let mut config = EngineConfig::default();
        let vars: HashMap<&str, &str> = [
            ("WAGER_DATA_DIR", "/tmp/wager"),
            ("WAGER_FAIRNESS_MODE", "production"),
            ("WAGER_RANDOM_ORG_API_KEY", "abc"),
            ("WAGER_POT_RAKE_BPS", "700"),
            ("WAGER_WHEEL_ENABLED", "false"),
        ]
        .into_iter()
        .collect();

        apply_overrides(&mut config, |k| vars.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.storage.data_directory, "/tmp/wager");
        assert_eq!(config.fairness.mode, FairnessMode::Production);
        assert_eq!(config.fairness.random_org_api_key.as_deref(), Some("abc"));
        assert_eq!(config.games.pot.rake_bps, 700);
        assert!(!config.games.wheel.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_env_value_rejected() {
        let mut config = EngineConfig::default();
        let result = apply_overrides(&mut config, |k| {
            (k == "WAGER_TICK_INTERVAL_MS").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(ConfigurationError::InvalidValue { .. })));
    }

    #[test]
    fn test_game_config_updates_are_scoped() {
        let source = GameConfigSource::new(&GamesConfig::default());
        let pot = source.subscribe(GameKind::Pot);
        let wheel = source.subscribe(GameKind::Wheel);

        let mut updated = source.snapshot(GameKind::Pot);
        updated.rake_bps = 300;
        source.update(GameKind::Pot, updated).unwrap();

        assert_eq!(pot.current().rake_bps, 300);
        assert_eq!(source.snapshot(GameKind::Pot).rake_bps, 300);
        assert_eq!(wheel.current().rake_bps, 0);
    }

    #[test]
    fn test_invalid_update_rejected() {
        let source = GameConfigSource::new(&GamesConfig::default());
        let mut bad = source.snapshot(GameKind::Wheel);
        bad.min_bet = 0;
        assert!(source.update(GameKind::Wheel, bad).is_err());
        assert_eq!(source.snapshot(GameKind::Wheel).min_bet, 10);
    }
}
