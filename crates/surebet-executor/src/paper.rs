//! In-process paper venue.
//!
//! Fills IOC orders immediately at their limit price (scaled by a
//! configurable fill ratio), rests post-only orders until they are closed
//! explicitly or cancelled, and reports every close on the event channel the
//! way a venue's private stream would.

use crate::error::{ExecutorError, ExecutorResult};
use crate::venue::{BoxFuture, Venue, VenueEvent};
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::time::Duration;
use surebet_core::{base_from_market, OrderStatus, PlaceParams};
use surebet_registry::{RawAccount, RawBalance, RawFill, RawMarket, RawOrder};
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Debug)]
struct PaperState {
    account: RawAccount,
    markets: Vec<RawMarket>,
    balances: HashMap<String, RawBalance>,
    open: HashMap<i64, RawOrder>,
    history: Vec<RawOrder>,
    seen_client_ids: HashSet<String>,
    placed: Vec<PlaceParams>,
}

/// Simulated venue for dry runs and tests.
#[derive(Debug)]
pub struct PaperVenue {
    state: Mutex<PaperState>,
    next_id: AtomicI64,
    fill_ratio: Mutex<Decimal>,
    fail_next: AtomicU32,
    latency: Mutex<Duration>,
    events: Option<mpsc::Sender<VenueEvent>>,
}

impl PaperVenue {
    pub fn new(account: RawAccount, markets: Vec<RawMarket>, balances: Vec<RawBalance>) -> Self {
        let balances = balances.into_iter().map(|b| (b.coin.clone(), b)).collect();
        Self {
            state: Mutex::new(PaperState {
                account,
                markets,
                balances,
                open: HashMap::new(),
                history: Vec::new(),
                seen_client_ids: HashSet::new(),
                placed: Vec::new(),
            }),
            next_id: AtomicI64::new(1),
            fill_ratio: Mutex::new(Decimal::ONE),
            fail_next: AtomicU32::new(0),
            latency: Mutex::new(Duration::ZERO),
            events: None,
        }
    }

    /// Report order and fill events on `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<VenueEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Share of an IOC order that fills, in [0, 1].
    pub fn set_fill_ratio(&self, ratio: Decimal) {
        *self.fill_ratio.lock() = ratio.clamp(Decimal::ZERO, Decimal::ONE);
    }

    /// Fail the next `n` placements with a transport error.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Delay every placement by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Every accepted placement, in order.
    pub fn placed(&self) -> Vec<PlaceParams> {
        self.state.lock().placed.clone()
    }

    pub fn resting(&self) -> Vec<RawOrder> {
        self.state.lock().open.values().cloned().collect()
    }

    /// Close a resting order with `filled` executed.
    pub async fn close_order(&self, order_id: i64, filled: Decimal) -> ExecutorResult<RawOrder> {
        let (order, fill) = {
            let mut state = self.state.lock();
            let order = state
                .open
                .remove(&order_id)
                .ok_or_else(|| ExecutorError::Venue(format!("order {order_id} not open")))?;
            Self::settle(&mut state, order, filled)
        };
        self.emit(fill, order.clone()).await;
        Ok(order)
    }

    fn take_failure(&self) -> bool {
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Mark `order` closed with `filled` executed and move balances.
    fn settle(state: &mut PaperState, mut order: RawOrder, filled: Decimal) -> (RawOrder, Option<RawFill>) {
        let filled = filled.clamp(Decimal::ZERO, order.size);
        let price = order.price.unwrap_or_default();
        order.status = OrderStatus::Closed;
        order.filled_size = filled;
        order.remaining_size = order.size - filled;
        if filled.is_zero() {
            state.history.push(order.clone());
            return (order, None);
        }
        order.avg_fill_price = Some(price);
        state.history.push(order.clone());

        let notional = filled * price;
        let sign = Decimal::from(order.side.sign());
        let base = base_from_market(&order.market).to_string();
        let quote = order
            .market
            .split('/')
            .nth(1)
            .unwrap_or_default()
            .to_string();
        for (coin, coin_diff, usd_diff) in [
            (base, filled * sign, notional * sign),
            (quote, -notional * sign, -notional * sign),
        ] {
            if let Some(b) = state.balances.get_mut(&coin) {
                b.free += coin_diff;
                b.total += coin_diff;
                b.usd_value += usd_diff;
            }
        }

        let fee_rate = state.account.taker_fee;
        let fill = RawFill {
            id: order.id,
            order_id: order.id,
            trade_id: None,
            market: order.market.clone(),
            side: order.side,
            price,
            size: filled,
            fee: notional * fee_rate,
            fee_currency: "USDT".to_string(),
            fee_rate,
            liquidity: if order.post_only { "maker" } else { "taker" }.to_string(),
            time: Utc::now(),
        };
        (order, Some(fill))
    }

    async fn emit(&self, fill: Option<RawFill>, order: RawOrder) {
        let Some(tx) = &self.events else {
            return;
        };
        if let Some(fill) = fill {
            if tx.send(VenueEvent::Fill(fill)).await.is_err() {
                debug!("paper event receiver dropped");
                return;
            }
        }
        if tx.send(VenueEvent::Order(order)).await.is_err() {
            debug!("paper event receiver dropped");
        }
    }
}

impl Venue for PaperVenue {
    fn place_order<'a>(&'a self, params: &'a PlaceParams) -> BoxFuture<'a, ExecutorResult<RawOrder>> {
        Box::pin(async move {
            let latency = *self.latency.lock();
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            if self.take_failure() {
                return Err(ExecutorError::Venue("injected failure".to_string()));
            }

            let client_id = params.client_id.to_string();
            let ratio = *self.fill_ratio.lock();
            let (ack, closed) = {
                let mut state = self.state.lock();
                if !state.markets.iter().any(|m| m.name == params.market) {
                    return Err(ExecutorError::OrderRejected(format!(
                        "No such market: {}",
                        params.market
                    )));
                }
                if !state.seen_client_ids.insert(client_id.clone()) {
                    return Err(ExecutorError::OrderRejected(format!(
                        "Duplicate client order ID: {client_id}"
                    )));
                }

                let order = RawOrder {
                    id: self.next_id.fetch_add(1, Ordering::SeqCst),
                    market: params.market.clone(),
                    side: params.side,
                    status: OrderStatus::New,
                    order_type: params.order_type,
                    price: Some(params.price.inner()),
                    avg_fill_price: None,
                    size: params.size.inner(),
                    filled_size: Decimal::ZERO,
                    remaining_size: params.size.inner(),
                    ioc: params.ioc,
                    post_only: params.post_only,
                    client_id: Some(client_id),
                    created_at: Utc::now(),
                };
                state.placed.push(params.clone());

                if params.ioc {
                    let filled = params.size.inner() * ratio;
                    let closed = Self::settle(&mut state, order.clone(), filled);
                    (order, Some(closed))
                } else {
                    state.open.insert(order.id, order.clone());
                    (order, None)
                }
            };

            info!(
                order_id = ack.id,
                market = %ack.market,
                side = %ack.side,
                price = %params.price,
                size = %params.size,
                client_id = %params.client_id,
                "paper order accepted"
            );
            if let Some((order, fill)) = closed {
                self.emit(fill, order).await;
            }
            Ok(ack)
        })
    }

    fn cancel_order(&self, order_id: i64) -> BoxFuture<'_, ExecutorResult<()>> {
        Box::pin(async move {
            let filled = {
                let state = self.state.lock();
                state
                    .open
                    .get(&order_id)
                    .map(|o| o.filled_size)
                    .ok_or_else(|| ExecutorError::Venue(format!("order {order_id} not open")))?
            };
            self.close_order(order_id, filled).await.map(|_| ())
        })
    }

    fn open_orders(&self) -> BoxFuture<'_, ExecutorResult<Vec<RawOrder>>> {
        Box::pin(async move { Ok(self.resting()) })
    }

    fn order_history(&self) -> BoxFuture<'_, ExecutorResult<Vec<RawOrder>>> {
        Box::pin(async move { Ok(self.state.lock().history.clone()) })
    }

    fn balances(&self) -> BoxFuture<'_, ExecutorResult<Vec<RawBalance>>> {
        Box::pin(async move { Ok(self.state.lock().balances.values().cloned().collect()) })
    }

    fn markets(&self) -> BoxFuture<'_, ExecutorResult<Vec<RawMarket>>> {
        Box::pin(async move { Ok(self.state.lock().markets.clone()) })
    }

    fn account_info(&self) -> BoxFuture<'_, ExecutorResult<RawAccount>> {
        Box::pin(async move { Ok(self.state.lock().account.clone()) })
    }
}
