//! Inbound cross-venue opportunity signal.

use crate::{Price, Size};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Current wall-clock time in Unix nanoseconds.
///
/// Signal ids are emission timestamps in the same unit, so signal age is
/// `now_ns() - signal.id`.
pub fn now_ns() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// Best bid/ask of one venue at signal time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub bid_price: Price,
    pub bid_qty: Size,
    pub ask_price: Price,
    pub ask_qty: Size,
    /// Venue timestamp (Unix ns).
    #[serde(default)]
    pub server_time: i64,
    /// Local receive timestamp (Unix ns).
    #[serde(default)]
    pub receive_time: i64,
}

impl Quote {
    /// A quote with any zero side cannot be priced.
    pub fn is_blank(&self) -> bool {
        !self.bid_price.is_positive()
            || !self.ask_price.is_positive()
            || !self.bid_qty.is_positive()
            || !self.ask_qty.is_positive()
    }
}

/// Opportunity signal ("surebet") between the trading venue and the
/// reference venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Surebet {
    /// Unique, monotonically increasing; also the emission time in Unix ns.
    pub id: i64,
    /// Quote on the venue orders are placed on.
    pub trade: Quote,
    /// Quote on the reference venue.
    pub reference: Quote,
    /// Settlement-currency price of the trade venue's quote currency.
    #[serde(default)]
    pub usdt_price: Option<Decimal>,
    /// Trailing average price diff between the venues, computed upstream.
    #[serde(default)]
    pub avg_price_diff: Decimal,
}

impl Surebet {
    pub fn symbol(&self) -> &str {
        &self.trade.symbol
    }

    /// Age of the signal at `now` (Unix ns).
    pub fn age_ns(&self, now: i64) -> i64 {
        now.saturating_sub(self.id)
    }
}
