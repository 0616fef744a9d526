//! Market constraints cache.
//!
//! Holds the trading constraints of every symbol on the trading venue and
//! detects tick/lot changes between resyncs.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use surebet_core::MarketInfo;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct MarketSnapshot {
    markets: HashMap<String, MarketInfo>,
    version: u64,
    last_update: Option<DateTime<Utc>>,
}

/// Market cache keyed by symbol name.
#[derive(Debug, Default)]
pub struct MarketCache {
    snapshot: RwLock<MarketSnapshot>,
}

impl MarketCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get market info for a symbol.
    pub fn get(&self, symbol: &str) -> Option<MarketInfo> {
        self.snapshot.read().markets.get(symbol).cloned()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.snapshot.read().markets.contains_key(symbol)
    }

    /// Replace the whole cache with a fresh venue listing.
    ///
    /// Material changes (tick, lot or min size) are logged at warn and
    /// counted; the new values win either way. Returns the change count.
    pub fn replace<I>(&self, markets: I) -> usize
    where
        I: IntoIterator<Item = MarketInfo>,
    {
        let fresh: HashMap<String, MarketInfo> =
            markets.into_iter().map(|m| (m.name.clone(), m)).collect();

        let mut snapshot = self.snapshot.write();
        let mut changes = 0usize;
        for (name, new) in &fresh {
            if let Some(old) = snapshot.markets.get(name) {
                if old.has_material_change(new) {
                    changes += 1;
                    warn!(
                        market = %name,
                        tick_before = %old.price_increment,
                        tick_after = %new.price_increment,
                        lot_before = %old.size_increment,
                        lot_after = %new.size_increment,
                        min_before = %old.min_order_size,
                        min_after = %new.min_order_size,
                        "Market parameter change detected"
                    );
                }
            }
        }

        snapshot.markets = fresh;
        snapshot.version += 1;
        snapshot.last_update = Some(Utc::now());
        debug!(
            count = snapshot.markets.len(),
            version = snapshot.version,
            changes,
            "markets replaced"
        );
        changes
    }

    pub fn symbols(&self) -> Vec<String> {
        self.snapshot.read().markets.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of completed replacements.
    pub fn version(&self) -> u64 {
        self.snapshot.read().version
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.snapshot.read().last_update
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use surebet_core::{Price, Size};

    fn market(name: &str, tick: rust_decimal::Decimal) -> MarketInfo {
        MarketInfo {
            name: name.to_string(),
            base_currency: surebet_core::base_from_market(name).to_string(),
            quote_currency: "USDT".to_string(),
            price_increment: Price::new(tick),
            size_increment: Size::new(dec!(0.001)),
            min_order_size: Size::new(dec!(0.001)),
        }
    }

    #[test]
    fn test_replace_and_get() {
        let cache = MarketCache::new();
        assert!(cache.get("BTC/USDT").is_none());

        cache.replace([market("BTC/USDT", dec!(1)), market("ETH/USDT", dec!(0.1))]);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.version(), 1);
        assert_eq!(
            cache.get("ETH/USDT").unwrap().price_increment,
            Price::new(dec!(0.1))
        );
    }

    #[test]
    fn test_replace_is_wholesale() {
        let cache = MarketCache::new();
        cache.replace([market("BTC/USDT", dec!(1)), market("ETH/USDT", dec!(0.1))]);
        cache.replace([market("BTC/USDT", dec!(1))]);

        assert!(cache.contains("BTC/USDT"));
        assert!(!cache.contains("ETH/USDT"));
        assert_eq!(cache.version(), 2);
    }

    #[test]
    fn test_material_change_counted_and_applied() {
        let cache = MarketCache::new();
        cache.replace([market("BTC/USDT", dec!(1))]);
        let changes = cache.replace([market("BTC/USDT", dec!(0.5))]);

        assert_eq!(changes, 1);
        assert_eq!(
            cache.get("BTC/USDT").unwrap().price_increment,
            Price::new(dec!(0.5))
        );
    }

    #[test]
    fn test_unchanged_replace_reports_nothing() {
        let cache = MarketCache::new();
        cache.replace([market("BTC/USDT", dec!(1))]);
        assert_eq!(cache.replace([market("BTC/USDT", dec!(1))]), 0);
        assert!(cache.last_update().is_some());
    }
}
