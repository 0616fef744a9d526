//! Heal (flattening) records.
//!
//! A filled hedge leaves the account with exposure on one side. The heal
//! record tracks the opposing post-only order(s) that close it out at a price
//! recovering the taker fee plus the target profit, and the escalation that
//! follows when a heal child closes short of the hedge fill.
//!
//! All percent inputs are in percent units: `target_profit = 0.05` is 0.05%.

use crate::error::{PositionError, PositionResult};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use surebet_core::{MarketInfo, Order, OrderSide, PlaceParams, Price, Size};

/// Lifecycle of a heal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealStatus {
    /// A heal child is resting (or about to be placed).
    InProgress,
    /// Children filled the hedge down to below the market minimum.
    Completed,
    /// Nothing placed: the fill was below the market minimum.
    Abandoned,
    /// Placement or retries exhausted; left for an operator.
    Unresolved,
}

impl HealStatus {
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

/// Pricing inputs for a heal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealParams {
    /// Effective taker fee paid on the hedge, percent.
    pub real_fee: Decimal,
    /// Target profit, percent.
    pub target_profit: Decimal,
}

/// Result of folding a closed heal child into its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing meaningful left outstanding.
    Completed,
    /// Re-place `place` with the new price/size/retry.
    Escalated { increment: Price, outstanding: Size },
    /// Retry bound exceeded.
    Unresolved,
    /// Close of a child already folded in; nothing changed.
    Duplicate,
}

/// Flattening state of one filled hedge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealRecord {
    /// Originating signal id.
    pub id: i64,
    /// Venue id of the hedge order.
    pub hedge_order_id: i64,
    pub filled_size: Size,
    pub avg_fill_price: Price,
    /// Quote amount reserved for the taker fee.
    pub fee_part: Decimal,
    /// Quote amount targeted as profit.
    pub profit_part: Decimal,
    /// Parameters of the current (or next) heal attempt.
    pub place: PlaceParams,
    /// One entry per placed heal child, latest snapshot.
    pub orders: Vec<Order>,
    pub error_trail: Vec<String>,
    pub status: HealStatus,
    pub params: HealParams,
    /// Constraints the heal was planned with.
    pub market: MarketInfo,
    pub started_at: DateTime<Utc>,
    pub done_at: Option<DateTime<Utc>>,
}

impl HealRecord {
    /// Build the heal for a closed hedge.
    ///
    /// The heal sells what a buy hedge bought (and vice versa) at
    /// `(avg * filled ± fee_part ± profit_part) / filled`, quantized so the
    /// sell never goes below and the buy never above that price. A fill
    /// below the market minimum yields an `Abandoned` record with zero
    /// profit part.
    pub fn plan(
        id: i64,
        hedge: &Order,
        market: &MarketInfo,
        params: HealParams,
    ) -> PositionResult<Self> {
        let filled = hedge.filled_size;
        if !filled.is_positive() {
            return Err(PositionError::ZeroFill(hedge.id));
        }
        let avg = hedge
            .avg_fill_price
            .filter(|p| p.is_positive())
            .ok_or(PositionError::MissingFillPrice(hedge.id))?;

        let cost = filled.notional(avg);
        let fee_part = cost * params.real_fee / Decimal::ONE_HUNDRED;
        let profit_part = cost * params.target_profit / Decimal::ONE_HUNDRED;

        let side = hedge.side.opposite();
        let gross = match side {
            OrderSide::Sell => cost + fee_part + profit_part,
            OrderSide::Buy => cost - fee_part - profit_part,
        };
        let target = gross / filled.inner();
        let price = Price::new(target).quantize(market.price_increment, side);

        let mut record = Self {
            id,
            hedge_order_id: hedge.id,
            filled_size: filled,
            avg_fill_price: avg,
            fee_part,
            profit_part,
            place: PlaceParams::heal(id, &hedge.market, side, price, filled),
            orders: Vec::new(),
            error_trail: Vec::new(),
            status: HealStatus::InProgress,
            params,
            market: market.clone(),
            started_at: Utc::now(),
            done_at: None,
        };

        if filled < market.min_order_size {
            record.push_error(format!(
                "size:{} below min_order_size:{}",
                filled, market.min_order_size
            ));
            record.profit_part = Decimal::ZERO;
            record.finish(HealStatus::Abandoned);
        }
        Ok(record)
    }

    /// Record for a filled hedge that could not be planned.
    ///
    /// Nothing is placed; the record exists so the exposure is persisted
    /// and reported as unresolved.
    pub fn unresolved(
        id: i64,
        hedge: &Order,
        market: &MarketInfo,
        params: HealParams,
        reason: impl Into<String>,
    ) -> Self {
        let side = hedge.side.opposite();
        let avg = hedge.avg_fill_price.unwrap_or(hedge.price);
        let mut record = Self {
            id,
            hedge_order_id: hedge.id,
            filled_size: hedge.filled_size,
            avg_fill_price: avg,
            fee_part: Decimal::ZERO,
            profit_part: Decimal::ZERO,
            place: PlaceParams::heal(id, &hedge.market, side, hedge.price, hedge.filled_size),
            orders: Vec::new(),
            error_trail: vec![reason.into()],
            status: HealStatus::InProgress,
            params,
            market: market.clone(),
            started_at: Utc::now(),
            done_at: None,
        };
        record.finish(HealStatus::Unresolved);
        record
    }

    /// Append to the diagnostic trail.
    pub fn push_error(&mut self, msg: impl Into<String>) {
        self.error_trail.push(msg.into());
    }

    /// Record a successfully placed child.
    pub fn push_child(&mut self, order: Order) {
        self.orders.push(order);
    }

    pub fn finish(&mut self, status: HealStatus) {
        self.status = status;
        self.done_at = Some(Utc::now());
    }

    /// Total size filled by heal children.
    pub fn children_filled(&self) -> Size {
        self.orders.iter().map(|o| o.filled_size).sum()
    }

    /// Hedge fill not yet flattened.
    pub fn outstanding(&self) -> Size {
        self.filled_size - self.children_filled()
    }

    /// Whether the heal has been running longer than `period` at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, period: Duration) -> bool {
        (now - self.started_at)
            .to_std()
            .map(|elapsed| elapsed > period)
            .unwrap_or(false)
    }

    /// Update a child from its latest venue snapshot.
    ///
    /// Filled size only moves up; a late or duplicate snapshot cannot shrink
    /// it. Unknown children (placed but never acknowledged) are appended.
    pub fn record_child(&mut self, snapshot: &Order) {
        match self.orders.iter_mut().find(|o| o.id == snapshot.id) {
            Some(child) => {
                let filled = child.filled_size.max(snapshot.filled_size);
                *child = snapshot.clone();
                child.filled_size = filled;
            }
            None => self.orders.push(snapshot.clone()),
        }
    }

    /// Fold a closed child into the record and decide what happens next.
    ///
    /// When outstanding size remains, `place` is updated in place: next
    /// retry, price moved by `max(price * 2 * target / 100, tick)` away from
    /// the market while the heal is fresh and towards it once `stale`, size
    /// set to the outstanding amount floored to the lot.
    pub fn reconcile(
        &mut self,
        child: &Order,
        market: &MarketInfo,
        stale: bool,
        max_retries: u32,
    ) -> ReconcileOutcome {
        let seen = self
            .orders
            .iter()
            .any(|o| o.id == child.id && o.is_terminal());
        if seen {
            return ReconcileOutcome::Duplicate;
        }
        self.record_child(child);

        let outstanding = self.outstanding();
        let next_size = outstanding.round_to_lot(market.size_increment);
        if !outstanding.is_positive()
            || outstanding < market.min_order_size
            || !next_size.is_positive()
        {
            self.finish(HealStatus::Completed);
            return ReconcileOutcome::Completed;
        }

        let cid = self.place.client_id.next_retry();
        if cid.retry > max_retries {
            self.place.client_id = cid;
            self.push_error(format!("retry:{} exceeds max:{}", cid.retry, max_retries));
            self.finish(HealStatus::Unresolved);
            return ReconcileOutcome::Unresolved;
        }

        let price = self.place.price;
        let scaled = price.inner() * Decimal::TWO * self.params.target_profit / Decimal::ONE_HUNDRED;
        let increment = Price::new(scaled.max(market.price_increment.inner()));

        // sell away from the market is up, buy away is down
        let away = match self.place.side {
            OrderSide::Sell => price + increment,
            OrderSide::Buy => price - increment,
        };
        let toward = match self.place.side {
            OrderSide::Sell => price - increment,
            OrderSide::Buy => price + increment,
        };
        let moved = if stale { toward } else { away };

        self.place.client_id = cid;
        self.place.price = moved.quantize(market.price_increment, self.place.side);
        self.place.size = next_size;
        self.push_error(format!(
            "retry:{} price_inc:{} stale:{} outstanding:{}",
            cid.retry, increment, stale, outstanding
        ));

        ReconcileOutcome::Escalated {
            increment,
            outstanding,
        }
    }
}
