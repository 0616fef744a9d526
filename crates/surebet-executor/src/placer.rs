//! Signal, order and fill entry points.
//!
//! The `Placer` owns the shared state every task reads: caches, the
//! open-order tracker, the symbol lock table and the two correlation maps
//! (pending hedge decisions and live heal records). All outbound side
//! effects other than venue calls go through the dispatch channel.

use crate::config::PlacerConfig;
use crate::dispatch::DispatchMsg;
use crate::error::{ExecutorError, ExecutorResult};
use crate::evaluator::{evaluate, DecisionRecord, EvalInput, Rejection};
use crate::symbol_lock::SymbolLockTable;
use crate::venue::DynVenue;
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::sync::Arc;
use surebet_core::{now_ns, Surebet};
use surebet_position::{HealRecord, HealStatus, OrderRoute, OrderTracker};
use surebet_registry::{
    AccountFees, BalanceCache, MarketCache, RawFill, RawOrder, RegistryError,
};
use surebet_telemetry::Metrics;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of handling one signal.
#[derive(Debug)]
pub enum SignalOutcome {
    /// Hedge accepted by the venue.
    Placed { order_id: i64 },
    /// Demo mode: decided, not placed.
    Demo(Box<DecisionRecord>),
    Rejected(Rejection),
}

/// Surebet placer.
pub struct Placer {
    pub(crate) config: PlacerConfig,
    pub(crate) venue: DynVenue,
    balances: Arc<BalanceCache>,
    markets: Arc<MarketCache>,
    tracker: Arc<OrderTracker>,
    pub(crate) locks: SymbolLockTable,
    /// Accepted hedges waiting for their close event, by signal id.
    pub(crate) pending: DashMap<i64, DecisionRecord>,
    /// Live heal records, by signal id.
    pub(crate) heals: DashMap<i64, Arc<Mutex<HealRecord>>>,
    fees: RwLock<AccountFees>,
    dispatch_tx: mpsc::Sender<DispatchMsg>,
    pub(crate) shutdown: CancellationToken,
}

impl Placer {
    pub fn new(
        config: PlacerConfig,
        venue: DynVenue,
        dispatch_tx: mpsc::Sender<DispatchMsg>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            venue,
            balances: Arc::new(BalanceCache::new()),
            markets: Arc::new(MarketCache::new()),
            tracker: Arc::new(OrderTracker::new()),
            locks: SymbolLockTable::new(),
            pending: DashMap::new(),
            heals: DashMap::new(),
            fees: RwLock::new(AccountFees::default()),
            dispatch_tx,
            shutdown,
        }
    }

    pub fn config(&self) -> &PlacerConfig {
        &self.config
    }

    pub fn venue(&self) -> &DynVenue {
        &self.venue
    }

    pub fn balances(&self) -> &Arc<BalanceCache> {
        &self.balances
    }

    pub fn markets(&self) -> &Arc<MarketCache> {
        &self.markets
    }

    pub fn tracker(&self) -> &Arc<OrderTracker> {
        &self.tracker
    }

    pub fn locks(&self) -> &SymbolLockTable {
        &self.locks
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn fees(&self) -> AccountFees {
        *self.fees.read()
    }

    /// Effective taker fee in percent.
    pub fn real_fee(&self) -> Decimal {
        self.fees().effective_taker_pct(self.config.referral_rate)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn heals_len(&self) -> usize {
        self.heals.len()
    }

    /// Snapshot of a live heal record.
    pub async fn heal(&self, id: i64) -> Option<HealRecord> {
        let slot = self.heals.get(&id).map(|e| e.value().clone())?;
        let record = slot.lock().await;
        Some(record.clone())
    }

    /// Heal records left for an operator.
    pub async fn unresolved_heals(&self) -> Vec<HealRecord> {
        let slots: Vec<_> = self.heals.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for slot in slots {
            let record = slot.lock().await;
            if record.status == HealStatus::Unresolved {
                out.push(record.clone());
            }
        }
        out
    }

    /// Queue a side effect. Waits when the dispatcher is behind.
    pub(crate) async fn dispatch(&self, msg: DispatchMsg) {
        let kind = msg.kind();
        if self.dispatch_tx.send(msg).await.is_err() {
            warn!(kind, "Dispatch channel closed, dropping message");
        }
    }

    // ------------------------------------------------------------------
    // Startup / resync
    // ------------------------------------------------------------------

    /// Fetch the fee schedule.
    pub async fn load_account_info(&self) -> ExecutorResult<()> {
        let account = self.venue.account_info().await?;
        let fees = account.fees();
        *self.fees.write() = fees;
        info!(
            username = %account.username,
            taker_fee = %fees.taker_fee,
            maker_fee = %fees.maker_fee,
            real_fee = %self.real_fee(),
            "account_info_done"
        );
        self.dispatch(DispatchMsg::SaveAccount(Box::new(account))).await;
        Ok(())
    }

    /// Overwrite the balance cache and persist the snapshot.
    pub async fn refresh_balances(&self) -> ExecutorResult<()> {
        let balances = self.venue.balances().await?;
        self.balances
            .refresh(balances.iter().cloned().map(|b| b.into_entry()));
        self.dispatch(DispatchMsg::SaveBalances(balances)).await;
        Ok(())
    }

    /// Persist the venue's recent closed orders.
    ///
    /// Picks up closes the event stream never delivered. Returns the number
    /// of orders queued.
    pub async fn recover_order_history(&self) -> ExecutorResult<usize> {
        let orders = self.venue.order_history().await?;
        if orders.is_empty() {
            debug!("order_list_empty");
            return Ok(0);
        }
        let count = orders.len();
        for raw in orders {
            self.dispatch(DispatchMsg::SaveOrder(Box::new(raw.into_order())))
                .await;
        }
        debug!(count, "get_orders_done");
        Ok(count)
    }

    /// Replace the open-order set with the venue's view.
    pub async fn sync_open_orders(&self) -> ExecutorResult<()> {
        let orders = self.venue.open_orders().await?;
        self.tracker
            .sync(orders.into_iter().map(RawOrder::into_order).collect());
        Metrics::open_orders_set(self.tracker.len() as i64);
        Ok(())
    }

    /// Replace the market cache. Unmappable or disabled markets are skipped.
    pub async fn refresh_markets(&self) -> ExecutorResult<()> {
        let raw = self.venue.markets().await?;
        let mut markets = Vec::with_capacity(raw.len());
        for m in raw.into_iter().filter(|m| m.enabled) {
            match m.into_market() {
                Ok(market) => markets.push(market),
                Err(e) => warn!(error = %e, "Skipping market"),
            }
        }
        if markets.is_empty() {
            return Err(RegistryError::EmptyResponse("markets").into());
        }
        let count = self.markets.replace(markets);
        debug!(count, "markets refreshed");
        Ok(())
    }

    /// Account info, balances, open orders, markets, in that order, then
    /// order history.
    ///
    /// Snapshots go through the dispatch channel, so its consumer must be
    /// running.
    pub async fn bootstrap(&self) -> ExecutorResult<()> {
        self.load_account_info().await?;
        self.refresh_balances().await?;
        self.sync_open_orders().await?;
        self.refresh_markets().await?;
        let history = self.recover_order_history().await?;
        info!(
            coins = self.balances.len(),
            open_orders = self.tracker.len(),
            markets = self.markets.len(),
            history,
            "Bootstrap complete"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Signals
    // ------------------------------------------------------------------

    /// Evaluate a signal and, if it clears every check, place its hedge.
    pub async fn on_signal(&self, sb: Surebet) -> SignalOutcome {
        Metrics::signal_received();
        let started_at = now_ns();
        match self.evaluate_and_place(&sb, started_at).await {
            Ok(outcome) => outcome,
            Err(rejection) => {
                Metrics::rejected(rejection.reason());
                match &rejection {
                    Rejection::Stale { age_ms } => info!(
                        id = sb.id,
                        symbol = %sb.symbol(),
                        age_ms,
                        max_ms = self.config.send_receive_max_delay_ms,
                        "signal_too_old"
                    ),
                    Rejection::BelowMinVolume { volume, max_by } => info!(
                        id = sb.id,
                        symbol = %sb.symbol(),
                        %volume,
                        %max_by,
                        min_volume = %self.config.min_volume,
                        "vol_low"
                    ),
                    Rejection::PlaceFailed(error) => warn!(
                        id = sb.id,
                        symbol = %sb.symbol(),
                        %error,
                        "bet_error"
                    ),
                    other => debug!(id = sb.id, symbol = %sb.symbol(), reason = %other, "signal rejected"),
                }
                SignalOutcome::Rejected(rejection)
            }
        }
    }

    async fn evaluate_and_place(
        &self,
        sb: &Surebet,
        started_at: i64,
    ) -> Result<SignalOutcome, Rejection> {
        let market = self
            .markets
            .get(sb.symbol())
            .ok_or_else(|| Rejection::NoMarket(sb.symbol().to_string()))?;

        let age_ns = sb.age_ns(started_at);
        let max_ns = i64::try_from(self.config.send_receive_max_delay().as_nanos()).unwrap_or(i64::MAX);
        if age_ns > max_ns {
            return Err(Rejection::Stale {
                age_ms: age_ns / 1_000_000,
            });
        }

        let guard = match self
            .locks
            .acquire(&market.base_currency, self.config.max_lock_time(), &self.shutdown)
            .await
        {
            Ok(guard) => guard,
            Err(ExecutorError::Cancelled) => return Err(Rejection::Cancelled),
            Err(_) => return Err(Rejection::LockTimeout),
        };

        let (base, quote) = self
            .balances
            .get_pair(&market.base_currency, &market.quote_currency);
        let (open_buy, open_sell) = self.tracker.open_buy_sell(&market.base_currency);
        let input = EvalInput {
            signal: sb,
            market: &market,
            base,
            quote,
            open_buy,
            open_sell,
            real_fee: self.real_fee(),
            started_at,
        };

        let mut decision = match evaluate(&input, &self.config) {
            Ok(decision) => decision,
            Err(rejection @ Rejection::BelowMinVolume { .. }) => {
                self.dispatch(DispatchMsg::CheckBalance).await;
                return Err(rejection);
            }
            Err(rejection) => return Err(rejection),
        };

        if self.config.demo_mode {
            info!(
                id = decision.id,
                market = %decision.place.market,
                side = %decision.place.side,
                price = %decision.place.price,
                size = %decision.place.size,
                required = %decision.required_profit,
                profit_sub_avg = %decision.profit_sub_avg,
                max_by = %decision.max_by,
                "demo_mode"
            );
            return Ok(SignalOutcome::Demo(Box::new(decision)));
        }

        // registered before placement so an early close event finds it
        self.pending.insert(decision.id, decision.clone());
        let placed = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(ExecutorError::Cancelled),
            res = self.venue.place_order(&decision.place) => res,
        };
        let ack = match placed {
            Ok(ack) => ack,
            Err(e) => {
                self.pending.remove(&decision.id);
                return Err(Rejection::PlaceFailed(e.to_string()));
            }
        };

        decision.order_id = Some(ack.id);
        decision.placed_at = Some(now_ns());
        if let Some(mut entry) = self.pending.get_mut(&decision.id) {
            entry.order_id = decision.order_id;
            entry.placed_at = decision.placed_at;
        }

        let place = &decision.place;
        self.balances.apply_hedge(
            &market.base_currency,
            &market.quote_currency,
            place.side,
            place.size,
            place.price,
        );
        Metrics::hedge_placed(&place.side.to_string());
        info!(
            id = decision.id,
            order_id = ack.id,
            market = %place.market,
            side = %place.side,
            price = %place.price,
            size = %place.size,
            volume = %decision.volume,
            profit_sub_avg = %decision.profit_sub_avg,
            required = %decision.required_profit,
            max_by = %decision.max_by,
            elapsed_ms = (now_ns() - started_at) / 1_000_000,
            "bet"
        );

        let order_id = ack.id;
        self.dispatch(DispatchMsg::SaveSurebet(Box::new(decision)))
            .await;
        self.dispatch(DispatchMsg::CheckBalance).await;
        drop(guard);
        Ok(SignalOutcome::Placed { order_id })
    }

    // ------------------------------------------------------------------
    // Venue events
    // ------------------------------------------------------------------

    /// Fold an order event into the tracker and route terminal events.
    ///
    /// Hedge and heal closes are handled on their own task; the handle is
    /// returned so callers can await it.
    pub async fn on_order_event(self: &Arc<Self>, raw: RawOrder) -> Option<JoinHandle<()>> {
        let mut order = raw.into_order();
        let route = self.tracker.apply(&mut order);
        Metrics::open_orders_set(self.tracker.len() as i64);
        self.dispatch(DispatchMsg::SaveOrder(Box::new(order.clone())))
            .await;

        match route {
            OrderRoute::Open => None,
            OrderRoute::Untracked => {
                debug!(order_id = order.id, market = %order.market, status = %order.status, "order_client_id_null");
                None
            }
            OrderRoute::HedgeClosed(cid) => {
                let this = Arc::clone(self);
                Some(tokio::spawn(async move { this.heal_hedge(cid, order).await }))
            }
            OrderRoute::HealClosed(cid) => {
                let this = Arc::clone(self);
                Some(tokio::spawn(async move { this.reconcile_heal(cid, order).await }))
            }
        }
    }

    pub async fn on_fill(&self, raw: RawFill) {
        let fill = raw.into_fill();
        debug!(
            fill_id = fill.id,
            order_id = fill.order_id,
            market = %fill.market,
            side = %fill.side,
            price = %fill.price,
            size = %fill.size,
            "fill"
        );
        self.dispatch(DispatchMsg::SaveFill(Box::new(fill))).await;
    }
}
