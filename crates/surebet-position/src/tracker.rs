//! Open-order tracking.
//!
//! Keeps every non-terminal order the venue reported, keyed by venue order
//! id. The evaluator reads it to size new hedges against pending exposure;
//! the dispatcher reads it to find heal orders that have rested too long.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use surebet_core::{ClientId, Order, OrderSide, Role, Size};
use tracing::{debug, trace};

/// Where an order event goes after the open-order set is updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderRoute {
    /// No decodable client id: snapshot persisted, nothing else.
    Untracked,
    /// Still live on the venue.
    Open,
    /// Hedge reached `closed`: start healing.
    HedgeClosed(ClientId),
    /// Heal child reached `closed`: reconcile its record.
    HealClosed(ClientId),
}

/// Open-order set.
#[derive(Debug, Default)]
pub struct OrderTracker {
    open: DashMap<i64, Order>,
}

impl OrderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold an order event into the open set and classify it.
    ///
    /// Terminal orders are removed and stamped with `closed_at`; everything
    /// else is upserted. Orders without a client id are still tracked so
    /// that manual orders count towards pending exposure.
    pub fn apply(&self, order: &mut Order) -> OrderRoute {
        if order.is_terminal() {
            self.open.remove(&order.id);
            order.closed_at.get_or_insert_with(Utc::now);
            trace!(order_id = order.id, market = %order.market, "order closed");
            return match order.client_id {
                Some(cid) if cid.role == Role::Hedge => OrderRoute::HedgeClosed(cid),
                Some(cid) => OrderRoute::HealClosed(cid),
                None => OrderRoute::Untracked,
            };
        }

        self.open.insert(order.id, order.clone());
        if order.client_id.is_some() {
            OrderRoute::Open
        } else {
            OrderRoute::Untracked
        }
    }

    /// Replace the open set with a venue snapshot.
    pub fn sync(&self, orders: Vec<Order>) {
        self.open.clear();
        for order in orders.into_iter().filter(|o| !o.is_terminal()) {
            self.open.insert(order.id, order);
        }
        debug!(count = self.open.len(), "open orders synced");
    }

    /// Unfilled buy and sell size of open orders on a base asset.
    pub fn open_buy_sell(&self, base: &str) -> (Size, Size) {
        let mut buy = Size::ZERO;
        let mut sell = Size::ZERO;
        for entry in self.open.iter() {
            let order = entry.value();
            if order.base_asset() != base {
                continue;
            }
            let unfilled = order.size - order.filled_size;
            match order.side {
                OrderSide::Buy => buy = buy + unfilled,
                OrderSide::Sell => sell = sell + unfilled,
            }
        }
        (buy, sell)
    }

    /// Open heal orders created before `now - max_age`.
    pub fn stale_heal_orders(&self, now: DateTime<Utc>, max_age: Duration) -> Vec<Order> {
        let cutoff = now - max_age;
        self.open
            .iter()
            .filter(|e| {
                let order = e.value();
                matches!(order.client_id, Some(cid) if cid.role == Role::Heal)
                    && order.created_at < cutoff
            })
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn get(&self, order_id: i64) -> Option<Order> {
        self.open.get(&order_id).map(|e| e.value().clone())
    }

    pub fn open_orders(&self) -> Vec<Order> {
        self.open.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}
