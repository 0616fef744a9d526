//! Market identification and trading constraints.

use crate::{Price, Size};
use serde::{Deserialize, Serialize};

/// Currency the reference venue settles in; symbols quoted in anything else
/// need a conversion price before profits are comparable.
pub const SETTLEMENT_CURRENCY: &str = "USDT";

/// Base asset of a `BASE/QUOTE` market name.
///
/// Symbol locks and balance lookups are keyed by this value.
pub fn base_from_market(market: &str) -> &str {
    market.split('/').next().unwrap_or(market)
}

/// Trading constraints of a symbol on the trading venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketInfo {
    /// Market name (e.g., "BTC/USDT").
    pub name: String,
    pub base_currency: String,
    pub quote_currency: String,
    /// Minimum price increment.
    pub price_increment: Price,
    /// Minimum size increment.
    pub size_increment: Size,
    /// Minimum order size.
    pub min_order_size: Size,
}

impl MarketInfo {
    /// Returns true if tick, lot or minimum size changed.
    pub fn has_material_change(&self, other: &Self) -> bool {
        self.price_increment != other.price_increment
            || self.size_increment != other.size_increment
            || self.min_order_size != other.min_order_size
    }

    /// Whether the market is quoted directly in the settlement currency.
    pub fn is_settlement_quoted(&self) -> bool {
        self.name.contains(SETTLEMENT_CURRENCY)
    }
}
