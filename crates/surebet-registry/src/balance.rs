//! Per-coin balance cache.
//!
//! Every mutation (delta or refresh) goes through one mutex so that a
//! refresh can never interleave with the two legs of a hedge delta.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use surebet_core::{OrderSide, Price, Size};
use tracing::{debug, trace};

/// Balance of a single coin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceEntry {
    pub free: Decimal,
    pub total: Decimal,
    pub usd_value: Decimal,
}

#[derive(Debug, Default)]
struct BalanceState {
    coins: HashMap<String, BalanceEntry>,
    last_refresh: Option<DateTime<Utc>>,
}

/// Balance cache keyed by coin.
#[derive(Debug, Default)]
pub struct BalanceCache {
    state: Mutex<BalanceState>,
}

impl BalanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a coin's balance. Unknown coins read as zero.
    pub fn get(&self, coin: &str) -> BalanceEntry {
        self.state
            .lock()
            .coins
            .get(coin)
            .copied()
            .unwrap_or_default()
    }

    /// Snapshot of two coins taken under a single lock acquisition.
    pub fn get_pair(&self, base: &str, quote: &str) -> (BalanceEntry, BalanceEntry) {
        let state = self.state.lock();
        let read = |coin: &str| state.coins.get(coin).copied().unwrap_or_default();
        (read(base), read(quote))
    }

    /// Increase a coin's free and usd value. No-op for unknown coins.
    pub fn add(&self, coin: &str, usd_diff: Decimal, coin_diff: Decimal) {
        let mut state = self.state.lock();
        Self::shift(&mut state, coin, usd_diff, coin_diff);
    }

    /// Decrease a coin's free and usd value. No-op for unknown coins.
    pub fn sub(&self, coin: &str, usd_diff: Decimal, coin_diff: Decimal) {
        let mut state = self.state.lock();
        Self::shift(&mut state, coin, -usd_diff, -coin_diff);
    }

    /// Apply the anticipatory deltas of an accepted hedge.
    ///
    /// Buy: base +size, quote -size*price. Sell: the reverse. Both legs are
    /// applied under the same lock acquisition.
    pub fn apply_hedge(&self, base: &str, quote: &str, side: OrderSide, size: Size, price: Price) {
        let notional = size.notional(price);
        let sign = Decimal::from(side.sign());
        let mut state = self.state.lock();
        Self::shift(&mut state, base, notional * sign, size.inner() * sign);
        Self::shift(&mut state, quote, -notional * sign, -notional * sign);
        trace!(base, quote, %side, %size, %price, "hedge deltas applied");
    }

    fn shift(state: &mut BalanceState, coin: &str, usd_diff: Decimal, coin_diff: Decimal) {
        if let Some(entry) = state.coins.get_mut(coin) {
            entry.usd_value += usd_diff;
            entry.free += coin_diff;
        }
    }

    /// Overwrite balances with a venue snapshot.
    ///
    /// Coins missing from the snapshot keep their last known value.
    pub fn refresh<I>(&self, balances: I)
    where
        I: IntoIterator<Item = (String, BalanceEntry)>,
    {
        let mut state = self.state.lock();
        let mut count = 0usize;
        for (coin, entry) in balances {
            state.coins.insert(coin, entry);
            count += 1;
        }
        state.last_refresh = Some(Utc::now());
        debug!(count, "balances refreshed");
    }

    /// Sum of usd value across all coins.
    pub fn total_usd(&self) -> Decimal {
        self.state.lock().coins.values().map(|b| b.usd_value).sum()
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_refresh
    }

    pub fn len(&self) -> usize {
        self.state.lock().coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
