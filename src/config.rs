//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (wallet key, Telegram credentials) are referenced by env-var
//! name in the config and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs;

use crate::types::{Settings, SideMode};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub chain: ChainConfig,
    pub strategy: StrategyConfig,
    pub prediction: PredictionConfig,
    pub telegram: TelegramConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BotConfig {
    pub name: String,
    /// Fixed tick interval driving the engine (seconds).
    pub tick_interval_secs: u64,
    /// Start wagering immediately without waiting for /start.
    #[serde(default)]
    pub auto_start: bool,
    /// Spot-price symbol for the underlying asset (e.g. "BNBUSDT").
    pub asset_symbol: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChainConfig {
    pub rpc_endpoint: String,
    /// Address of the round-based prediction contract.
    pub contract_address: String,
    /// Env var holding the wallet private key (hex).
    pub private_key_env: String,
    /// Bounded wait for transaction confirmation (seconds). A stalled
    /// confirmation surfaces as a transient tick error.
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,
}

fn default_confirmation_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct StrategyConfig {
    pub base_stake: Decimal,
    /// Loss-doubling budget before the stake is capped (1–15).
    pub max_double_downs: u32,
    pub side: SideMode,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PredictionConfig {
    pub enabled: bool,
    /// Noise band: price moves below this are classified uncertain.
    pub threshold: Decimal,
    /// Ceiling for a stake sized from an assumed loss.
    pub max_early_stake: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub bot_token_env: Option<String>,
    pub chat_id_env: Option<String>,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse configuration from a TOML string.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// The operator-tunable settings derived from the static config.
    pub fn settings(&self) -> Settings {
        Settings {
            base_stake: self.strategy.base_stake,
            max_double_downs: self.strategy.max_double_downs,
            side: self.strategy.side,
            prediction_enabled: self.prediction.enabled,
            prediction_threshold: self.prediction.threshold,
            max_early_stake: self.prediction.max_early_stake,
        }
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.strategy.base_stake > Decimal::ZERO,
            "strategy.base_stake must be positive"
        );
        anyhow::ensure!(
            (1..=15).contains(&self.strategy.max_double_downs),
            "strategy.max_double_downs must be in 1..=15"
        );
        anyhow::ensure!(
            self.prediction.threshold > Decimal::ZERO,
            "prediction.threshold must be positive"
        );
        anyhow::ensure!(
            self.prediction.max_early_stake > Decimal::ZERO,
            "prediction.max_early_stake must be positive"
        );
        anyhow::ensure!(
            self.bot.tick_interval_secs > 0,
            "bot.tick_interval_secs must be positive"
        );
        Ok(())
    }
}
