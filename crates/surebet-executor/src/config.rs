//! Placer and dispatcher configuration.
//!
//! Percent-valued fields are in percent units (`target_profit = 0.05` is
//! 0.05%). Durations are milliseconds.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Evaluation and healing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacerConfig {
    /// Minimum profit after fees and adjustments, percent.
    #[serde(default = "default_target_profit")]
    pub target_profit: Decimal,
    /// Divisor of the base total when sizing a hedge.
    #[serde(default = "default_target_amount")]
    pub target_amount: Decimal,
    /// Quote amount cap per hedge.
    #[serde(default = "default_max_stake")]
    pub max_stake: Decimal,
    /// Hedges with a smaller (floored) notional are skipped.
    #[serde(default = "default_min_volume")]
    pub min_volume: Decimal,
    /// Share of the taker fee returned as referral rebate (0.2 = 20%).
    #[serde(default)]
    pub referral_rate: Decimal,
    /// Share of the profit surplus given away in the limit price.
    #[serde(default = "default_ratio")]
    pub profit_diff_ratio: Decimal,
    #[serde(default = "default_ratio")]
    pub avg_price_diff_ratio: Decimal,
    /// Weight of pending exposure in the required profit.
    #[serde(default = "default_profit_inc_ratio")]
    pub profit_inc_ratio: Decimal,
    /// Divisor of the reference venue's top-of-book quantity.
    #[serde(default = "default_ratio")]
    pub bin_ftx_volume_ratio: Decimal,
    #[serde(default = "default_max_lock_time_ms")]
    pub max_lock_time_ms: u64,
    /// Signals older than this on arrival are dropped.
    #[serde(default = "default_send_receive_max_delay_ms")]
    pub send_receive_max_delay_ms: u64,
    /// Open heal orders older than this are cancelled and re-placed.
    #[serde(default = "default_re_heal_period_ms")]
    pub re_heal_period_ms: u64,
    /// After this, heal escalation moves toward the market instead of away.
    #[serde(default = "default_heal_stale_period_ms")]
    pub heal_stale_period_ms: u64,
    /// Placement attempts per heal child.
    #[serde(default = "default_max_heal_place_attempts")]
    pub max_heal_place_attempts: u32,
    /// Escalations per heal record.
    #[serde(default = "default_max_heal_retries")]
    pub max_heal_retries: u32,
    /// Evaluate and log without placing.
    #[serde(default)]
    pub demo_mode: bool,
}

fn default_target_profit() -> Decimal {
    Decimal::new(5, 2)
}

fn default_target_amount() -> Decimal {
    Decimal::from(10)
}

fn default_max_stake() -> Decimal {
    Decimal::from(100)
}

fn default_min_volume() -> Decimal {
    Decimal::from(10)
}

fn default_ratio() -> Decimal {
    Decimal::TWO
}

fn default_profit_inc_ratio() -> Decimal {
    Decimal::ONE
}

fn default_max_lock_time_ms() -> u64 {
    50
}

fn default_send_receive_max_delay_ms() -> u64 {
    200
}

fn default_re_heal_period_ms() -> u64 {
    60_000
}

fn default_heal_stale_period_ms() -> u64 {
    300_000
}

fn default_max_heal_place_attempts() -> u32 {
    10
}

fn default_max_heal_retries() -> u32 {
    10
}

impl Default for PlacerConfig {
    fn default() -> Self {
        Self {
            target_profit: default_target_profit(),
            target_amount: default_target_amount(),
            max_stake: default_max_stake(),
            min_volume: default_min_volume(),
            referral_rate: Decimal::ZERO,
            profit_diff_ratio: default_ratio(),
            avg_price_diff_ratio: default_ratio(),
            profit_inc_ratio: default_profit_inc_ratio(),
            bin_ftx_volume_ratio: default_ratio(),
            max_lock_time_ms: default_max_lock_time_ms(),
            send_receive_max_delay_ms: default_send_receive_max_delay_ms(),
            re_heal_period_ms: default_re_heal_period_ms(),
            heal_stale_period_ms: default_heal_stale_period_ms(),
            max_heal_place_attempts: default_max_heal_place_attempts(),
            max_heal_retries: default_max_heal_retries(),
            demo_mode: false,
        }
    }
}

impl PlacerConfig {
    /// Validate configuration values.
    ///
    /// Divisors must be positive, `referral_rate` within [0, 1], and the
    /// heal placement loop must be allowed at least one attempt.
    pub fn validate(&self) -> Result<(), String> {
        let divisors = [
            ("target_amount", self.target_amount),
            ("max_stake", self.max_stake),
            ("profit_diff_ratio", self.profit_diff_ratio),
            ("avg_price_diff_ratio", self.avg_price_diff_ratio),
            ("bin_ftx_volume_ratio", self.bin_ftx_volume_ratio),
        ];
        for (name, value) in divisors {
            if value <= Decimal::ZERO {
                return Err(format!("{name} ({value}) must be positive"));
            }
        }

        if self.target_profit.is_sign_negative() {
            return Err(format!(
                "target_profit ({}) must be non-negative",
                self.target_profit
            ));
        }

        if self.min_volume.is_sign_negative() {
            return Err(format!(
                "min_volume ({}) must be non-negative",
                self.min_volume
            ));
        }

        if self.referral_rate < Decimal::ZERO || self.referral_rate > Decimal::ONE {
            return Err(format!(
                "referral_rate ({}) must be within [0, 1]",
                self.referral_rate
            ));
        }

        if self.max_heal_place_attempts == 0 {
            return Err("max_heal_place_attempts must be at least 1".to_string());
        }

        Ok(())
    }

    pub fn max_lock_time(&self) -> Duration {
        Duration::from_millis(self.max_lock_time_ms)
    }

    pub fn send_receive_max_delay(&self) -> Duration {
        Duration::from_millis(self.send_receive_max_delay_ms)
    }

    pub fn re_heal_period(&self) -> Duration {
        Duration::from_millis(self.re_heal_period_ms)
    }

    pub fn heal_stale_period(&self) -> Duration {
        Duration::from_millis(self.heal_stale_period_ms)
    }
}

/// Dispatcher timers and channel sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_market_resync_ms")]
    pub market_resync_ms: u64,
    /// Balance refresh requests closer together than this are coalesced.
    #[serde(default = "default_balance_check_min_interval_ms")]
    pub balance_check_min_interval_ms: u64,
    #[serde(default = "default_status_report_ms")]
    pub status_report_ms: u64,
    /// Closed-order history recovery period.
    #[serde(default = "default_order_history_ms")]
    pub order_history_ms: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_market_resync_ms() -> u64 {
    300_000
}

fn default_balance_check_min_interval_ms() -> u64 {
    150
}

fn default_status_report_ms() -> u64 {
    300_000
}

fn default_order_history_ms() -> u64 {
    600_000
}

fn default_channel_capacity() -> usize {
    200
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            market_resync_ms: default_market_resync_ms(),
            balance_check_min_interval_ms: default_balance_check_min_interval_ms(),
            status_report_ms: default_status_report_ms(),
            order_history_ms: default_order_history_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.channel_capacity == 0 {
            return Err("channel_capacity must be at least 1".to_string());
        }
        if self.market_resync_ms == 0 || self.status_report_ms == 0 || self.order_history_ms == 0 {
            return Err("timer periods must be positive".to_string());
        }
        Ok(())
    }

    pub fn market_resync(&self) -> Duration {
        Duration::from_millis(self.market_resync_ms)
    }

    pub fn balance_check_min_interval(&self) -> Duration {
        Duration::from_millis(self.balance_check_min_interval_ms)
    }

    pub fn status_report(&self) -> Duration {
        Duration::from_millis(self.status_report_ms)
    }

    pub fn order_history(&self) -> Duration {
        Duration::from_millis(self.order_history_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = PlacerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.target_profit, dec!(0.05));
        assert_eq!(config.max_lock_time(), Duration::from_millis(50));
        assert!(DispatcherConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_zero_divisor() {
        let config = PlacerConfig {
            profit_diff_ratio: dec!(0),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.contains("profit_diff_ratio"));
    }

    #[test]
    fn test_validate_referral_range() {
        let config = PlacerConfig {
            referral_rate: dec!(1.5),
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().contains("referral_rate"));
    }

    #[test]
    fn test_validate_heal_attempts() {
        let config = PlacerConfig {
            max_heal_place_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let config: PlacerConfig = serde_json::from_str(r#"{"max_stake": "250"}"#).unwrap();
        assert_eq!(config.max_stake, dec!(250));
        assert_eq!(config.target_amount, dec!(10));
        assert_eq!(config.re_heal_period_ms, 60_000);
        assert!(!config.demo_mode);
    }

    #[test]
    fn test_dispatcher_order_history_period() {
        let config = DispatcherConfig::default();
        assert_eq!(config.order_history(), Duration::from_secs(600));
        let config = DispatcherConfig {
            order_history_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
