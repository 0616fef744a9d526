//! Application configuration.

use crate::error::{AppError, AppResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use surebet_executor::{DispatcherConfig, PlacerConfig};
use surebet_registry::{RawAccount, RawBalance, RawMarket};

/// Audit trail settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Write the audit trail to disk. When off, records are kept in memory.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Directory for `audit_YYYY-MM-DD.jsonl` files.
    #[serde(default = "default_data_dir")]
    pub dir: String,
    /// Records buffered before a write.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_enabled() -> bool {
    true
}

fn default_data_dir() -> String {
    "data/audit".to_string()
}

fn default_buffer_size() -> usize {
    100
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            dir: default_data_dir(),
            buffer_size: default_buffer_size(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Prometheus text snapshot written on shutdown.
    #[serde(default)]
    pub metrics_file: Option<String>,
}

/// Paper venue seed state.
///
/// Entries use the venue's wire field names (`priceIncrement`, `usdValue`,
/// `takerFee`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    pub account: RawAccount,
    /// Share of an IOC order that fills.
    #[serde(default = "default_fill_ratio")]
    pub fill_ratio: Decimal,
    pub markets: Vec<RawMarket>,
    #[serde(default)]
    pub balances: Vec<RawBalance>,
}

fn default_fill_ratio() -> Decimal {
    Decimal::ONE
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub placer: PlacerConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    pub paper: PaperConfig,
}

impl AppConfig {
    /// Load and validate configuration from a TOML file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        self.placer.validate().map_err(AppError::Config)?;
        self.dispatcher.validate().map_err(AppError::Config)?;

        if self.persistence.buffer_size == 0 {
            return Err(AppError::Config(
                "persistence.buffer_size must be at least 1".to_string(),
            ));
        }
        if self.paper.fill_ratio < Decimal::ZERO || self.paper.fill_ratio > Decimal::ONE {
            return Err(AppError::Config(format!(
                "paper.fill_ratio ({}) must be within [0, 1]",
                self.paper.fill_ratio
            )));
        }
        if self.paper.markets.is_empty() {
            return Err(AppError::Config(
                "paper.markets must list at least one market".to_string(),
            ));
        }
        Ok(())
    }
}
