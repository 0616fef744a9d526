//! Heal placement and reconciliation.
//!
//! A closed hedge with a positive fill gets a heal record and a post-only
//! child on the opposite side. Each heal child close is folded back into its
//! record; outstanding size is re-placed at an escalated price until the
//! record completes or runs out of retries.
//!
//! Heal records sit behind per-record async mutexes. The lock is taken
//! before the record becomes visible in the map, so a child that closes
//! before its placement call returns waits for the placement to be recorded.

use crate::dispatch::DispatchMsg;
use crate::error::ExecutorError;
use crate::placer::Placer;
use chrono::Utc;
use std::sync::Arc;
use surebet_core::{ClientId, Order};
use surebet_position::{HealParams, HealRecord, HealStatus, ReconcileOutcome};
use surebet_telemetry::Metrics;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

impl Placer {
    /// Start healing a closed hedge.
    pub(crate) async fn heal_hedge(self: Arc<Self>, cid: ClientId, mut hedge: Order) {
        let Some((_, decision)) = self.pending.remove(&cid.id) else {
            warn!(id = cid.id, order_id = hedge.id, "not_found_surebet_in_map");
            return;
        };

        // released by the signal task only after its decision is queued
        let guard = match self
            .locks
            .acquire(hedge.base_asset(), self.config.re_heal_period(), &self.shutdown)
            .await
        {
            Ok(guard) => Some(guard),
            Err(ExecutorError::Cancelled) => return,
            Err(e) => {
                warn!(id = cid.id, error = %e, "Healing without symbol lock");
                None
            }
        };

        if !hedge.filled_size.is_positive() {
            debug!(id = cid.id, order_id = hedge.id, "hedge closed unfilled");
            self.dispatch(DispatchMsg::DeleteByOrderId(hedge.id)).await;
            return;
        }
        // only the tombstone has to follow the decision record
        drop(guard);

        if !hedge.avg_fill_price.is_some_and(|p| p.is_positive()) {
            let fallback = if hedge.price.is_positive() {
                hedge.price
            } else {
                decision.place.price
            };
            warn!(id = cid.id, order_id = hedge.id, price = %fallback, "heal_fill_price_fallback");
            hedge.avg_fill_price = Some(fallback);
        }

        let market = self
            .markets()
            .get(&hedge.market)
            .unwrap_or_else(|| decision.market.clone());
        let params = HealParams {
            real_fee: decision.real_fee,
            target_profit: decision.target_profit,
        };
        let record = match HealRecord::plan(cid.id, &hedge, &market, params) {
            Ok(record) => record,
            Err(e) => {
                error!(id = cid.id, order_id = hedge.id, error = %e, "heal_plan_error");
                Metrics::heal_outcome("unresolved");
                let record = HealRecord::unresolved(cid.id, &hedge, &market, params, e.to_string());
                self.heals.insert(cid.id, Arc::new(Mutex::new(record.clone())));
                self.dispatch(DispatchMsg::SaveHeal(Box::new(record))).await;
                return;
            }
        };

        if record.status == HealStatus::Abandoned {
            warn!(
                id = record.id,
                size = %record.filled_size,
                min_size = %market.min_order_size,
                "size_too_small_to_heal"
            );
            Metrics::heal_outcome("abandoned");
            self.dispatch(DispatchMsg::SaveHeal(Box::new(record))).await;
            return;
        }

        self.place_heal(record).await;
    }

    /// Register a planned record and place its first child.
    async fn place_heal(&self, record: HealRecord) {
        let id = record.id;
        let slot = Arc::new(Mutex::new(record));
        let mut rec = Arc::clone(&slot).lock_owned().await;
        self.heals.insert(id, slot);

        self.place_attempts(&mut rec).await;
        if rec.status == HealStatus::Unresolved {
            Metrics::heal_outcome("unresolved");
        }
        self.dispatch(DispatchMsg::SaveHeal(Box::new(rec.clone())))
            .await;
    }

    /// Submit `rec.place`, retrying on error with the same client id.
    ///
    /// Exhausting the attempts marks the record unresolved.
    async fn place_attempts(&self, rec: &mut HealRecord) {
        for attempt in 0..self.config.max_heal_place_attempts {
            let res = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => Err(ExecutorError::Cancelled),
                res = self.venue.place_order(&rec.place) => res,
            };
            match res {
                Ok(raw) => {
                    Metrics::heal_attempt(true);
                    let order = raw.into_order();
                    info!(
                        id = rec.id,
                        order_id = order.id,
                        market = %rec.place.market,
                        side = %rec.place.side,
                        price = %rec.place.price,
                        size = %rec.place.size,
                        profit_part = %rec.profit_part,
                        client_id = %rec.place.client_id,
                        "heal"
                    );
                    rec.push_child(order);
                    return;
                }
                Err(ExecutorError::Cancelled) => {
                    rec.push_error(format!("try:{attempt} cancelled"));
                    break;
                }
                Err(e) => {
                    Metrics::heal_attempt(false);
                    error!(id = rec.id, attempt, error = %e, "heal_place_error");
                    rec.push_error(format!("try:{attempt} err:{e}"));
                }
            }
        }
        warn!(id = rec.id, client_id = %rec.place.client_id, "Heal placement exhausted");
        rec.finish(HealStatus::Unresolved);
    }

    /// Fold a closed heal child into its record.
    pub(crate) async fn reconcile_heal(self: Arc<Self>, cid: ClientId, child: Order) {
        let Some(slot) = self.heals.get(&cid.id).map(|e| Arc::clone(e.value())) else {
            warn!(id = cid.id, order_id = child.id, "not_found_heal_in_map");
            return;
        };
        let mut rec = slot.lock().await;
        if rec.status.is_final() {
            debug!(id = rec.id, order_id = child.id, status = ?rec.status, "Heal already final");
            return;
        }
        let market = match self.markets().get(&child.market) {
            Some(market) => market,
            None => {
                warn!(id = rec.id, market = %child.market, "Heal market missing, using planned constraints");
                rec.market.clone()
            }
        };

        let stale = rec.is_stale(Utc::now(), self.config.heal_stale_period());
        let outcome = rec.reconcile(&child, &market, stale, self.config.max_heal_retries);
        match outcome {
            ReconcileOutcome::Duplicate => {
                debug!(id = rec.id, order_id = child.id, "Duplicate heal close ignored");
            }
            ReconcileOutcome::Completed => {
                info!(
                    id = rec.id,
                    filled = %rec.children_filled(),
                    children = rec.orders.len(),
                    "heal_completed"
                );
                Metrics::heal_outcome("completed");
                self.dispatch(DispatchMsg::SaveHeal(Box::new(rec.clone())))
                    .await;
                drop(rec);
                self.heals.remove(&cid.id);
            }
            ReconcileOutcome::Unresolved => {
                warn!(
                    id = rec.id,
                    retry = rec.place.client_id.retry,
                    outstanding = %rec.outstanding(),
                    "heal_retries_exhausted"
                );
                Metrics::heal_outcome("unresolved");
                self.dispatch(DispatchMsg::SaveHeal(Box::new(rec.clone())))
                    .await;
            }
            ReconcileOutcome::Escalated {
                increment,
                outstanding,
            } => {
                info!(
                    id = rec.id,
                    retry = rec.place.client_id.retry,
                    %increment,
                    %outstanding,
                    stale,
                    price = %rec.place.price,
                    "heal_escalated"
                );
                self.place_attempts(&mut rec).await;
                if rec.status == HealStatus::Unresolved {
                    Metrics::heal_outcome("unresolved");
                }
                self.dispatch(DispatchMsg::SaveHeal(Box::new(rec.clone())))
                    .await;
            }
        }
    }

    /// Cancel heal children resting longer than the re-heal period.
    ///
    /// Each cancel produces a close event, which reconciles the record and
    /// re-places the outstanding size. Returns the number of cancels sent.
    pub async fn cancel_stale_heals(&self) -> usize {
        let max_age = chrono::Duration::milliseconds(
            i64::try_from(self.config.re_heal_period_ms).unwrap_or(i64::MAX),
        );
        let stale = self.tracker().stale_heal_orders(Utc::now(), max_age);
        let mut sent = 0;
        for order in stale {
            info!(
                order_id = order.id,
                market = %order.market,
                created_at = %order.created_at,
                "re_heal_cancel"
            );
            match self.venue.cancel_order(order.id).await {
                Ok(()) => sent += 1,
                Err(e) => warn!(order_id = order.id, error = %e, "re_heal_cancel_error"),
            }
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use crate::dispatch::DispatchMsg;
    use crate::placer::tests::{config, drain, harness, signal};
    use crate::placer::SignalOutcome;
    use crate::venue::VenueEvent;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use surebet_core::{OrderSide, Price, Role, Size};
    use surebet_position::HealStatus;

    #[tokio::test]
    async fn test_partial_hedge_fill_places_sell_heal() {
        let mut h = harness(config()).await;
        // 1.5 placed, 0.75 filled
        h.venue.set_fill_ratio(dec!(0.5));
        let sb = signal();
        let id = sb.id;
        assert!(matches!(h.placer.on_signal(sb).await, SignalOutcome::Placed { .. }));

        let Some(VenueEvent::Fill(_)) = h.events_rx.recv().await else {
            panic!("expected fill");
        };
        let Some(VenueEvent::Order(closed)) = h.events_rx.recv().await else {
            panic!("expected order");
        };
        h.placer.on_order_event(closed).await.unwrap().await.unwrap();

        assert_eq!(h.placer.pending_len(), 0);
        let record = h.placer.heal(id).await.unwrap();
        assert_eq!(record.status, HealStatus::InProgress);
        assert_eq!(record.filled_size, Size::new(dec!(0.75)));
        assert_eq!(record.orders.len(), 1);
        assert_eq!(record.place.side, OrderSide::Sell);
        assert_eq!(record.place.client_id.role, Role::Heal);
        // (75.15 + 0.01503 + 0.037575) / 0.75 = 100.27014 ceiled
        assert_eq!(record.place.price, Price::new(dec!(100.28)));

        let heal = h.venue.placed().pop().unwrap();
        assert!(heal.post_only && !heal.ioc);
        assert_eq!(heal.size, Size::new(dec!(0.75)));

        let msgs = drain(&mut h.dispatch_rx);
        assert!(msgs.iter().any(|m| matches!(m, DispatchMsg::SaveHeal(r) if r.status == HealStatus::InProgress)));
    }

    #[tokio::test]
    async fn test_unfilled_hedge_is_cleaned_up() {
        let mut h = harness(config()).await;
        h.venue.set_fill_ratio(dec!(0));
        h.placer.on_signal(signal()).await;

        let Some(VenueEvent::Order(closed)) = h.events_rx.recv().await else {
            panic!("expected order");
        };
        let order_id = closed.id;
        drain(&mut h.dispatch_rx);
        h.placer.on_order_event(closed).await.unwrap().await.unwrap();

        assert_eq!(h.placer.pending_len(), 0);
        assert_eq!(h.placer.heals_len(), 0);
        let msgs = drain(&mut h.dispatch_rx);
        assert!(msgs
            .iter()
            .any(|m| matches!(m, DispatchMsg::DeleteByOrderId(id) if *id == order_id)));
    }

    #[tokio::test]
    async fn test_duplicate_hedge_close_heals_once() {
        let mut h = harness(config()).await;
        h.placer.on_signal(signal()).await;
        let Some(VenueEvent::Fill(_)) = h.events_rx.recv().await else {
            panic!("expected fill");
        };
        let Some(VenueEvent::Order(closed)) = h.events_rx.recv().await else {
            panic!("expected order");
        };

        h.placer.on_order_event(closed.clone()).await.unwrap().await.unwrap();
        h.placer.on_order_event(closed).await.unwrap().await.unwrap();

        let heals = h
            .venue
            .placed()
            .into_iter()
            .filter(|p| p.client_id.role == Role::Heal)
            .count();
        assert_eq!(heals, 1);
    }

    #[tokio::test]
    async fn test_rejected_heal_child_escalates() {
        let mut h = harness(config()).await;
        let sb = signal();
        let id = sb.id;
        h.placer.on_signal(sb).await;
        let Some(VenueEvent::Fill(_)) = h.events_rx.recv().await else {
            panic!("expected fill");
        };
        let Some(VenueEvent::Order(closed)) = h.events_rx.recv().await else {
            panic!("expected order");
        };
        h.placer.on_order_event(closed).await.unwrap().await.unwrap();
        let first = h.placer.heal(id).await.unwrap();
        let child_id = first.orders[0].id;

        // post-only child closes with nothing filled
        h.venue.close_order(child_id, dec!(0)).await.unwrap();
        let Some(VenueEvent::Order(child)) = h.events_rx.recv().await else {
            panic!("expected order");
        };
        h.placer.on_order_event(child).await.unwrap().await.unwrap();

        let record = h.placer.heal(id).await.unwrap();
        assert_eq!(record.place.client_id.retry, 1);
        assert!(record.place.price > first.place.price);
        assert_eq!(record.orders.len(), 2);
        assert_eq!(record.status, HealStatus::InProgress);

        let last = h.venue.placed().pop().unwrap();
        assert_eq!(last.client_id.retry, 1);
        assert_eq!(last.size, first.place.size);
    }

    #[tokio::test]
    async fn test_heal_completes_and_leaves_map() {
        let mut h = harness(config()).await;
        let sb = signal();
        let id = sb.id;
        h.placer.on_signal(sb).await;
        let Some(VenueEvent::Fill(_)) = h.events_rx.recv().await else {
            panic!("expected fill");
        };
        let Some(VenueEvent::Order(closed)) = h.events_rx.recv().await else {
            panic!("expected order");
        };
        h.placer.on_order_event(closed).await.unwrap().await.unwrap();
        let child_id = h.placer.heal(id).await.unwrap().orders[0].id;

        h.venue.close_order(child_id, dec!(1.5)).await.unwrap();
        let Some(VenueEvent::Fill(_)) = h.events_rx.recv().await else {
            panic!("expected fill");
        };
        let Some(VenueEvent::Order(child)) = h.events_rx.recv().await else {
            panic!("expected order");
        };
        drain(&mut h.dispatch_rx);
        h.placer.on_order_event(child).await.unwrap().await.unwrap();

        assert!(h.placer.heal(id).await.is_none());
        let msgs = drain(&mut h.dispatch_rx);
        assert!(msgs.iter().any(|m| matches!(m, DispatchMsg::SaveHeal(r) if r.status == HealStatus::Completed)));
    }

    #[tokio::test]
    async fn test_heal_placement_exhaustion_is_unresolved() {
        let mut cfg = config();
        cfg.max_heal_place_attempts = 3;
        let mut h = harness(cfg).await;
        let sb = signal();
        let id = sb.id;
        h.placer.on_signal(sb).await;
        let Some(VenueEvent::Fill(_)) = h.events_rx.recv().await else {
            panic!("expected fill");
        };
        let Some(VenueEvent::Order(closed)) = h.events_rx.recv().await else {
            panic!("expected order");
        };

        h.venue.fail_next(3);
        h.placer.on_order_event(closed).await.unwrap().await.unwrap();

        let record = h.placer.heal(id).await.unwrap();
        assert_eq!(record.status, HealStatus::Unresolved);
        assert_eq!(record.error_trail.len(), 3);
        assert!(record.orders.is_empty());
        assert_eq!(h.placer.unresolved_heals().await.len(), 1);
    }

    #[tokio::test]
    async fn test_heal_recovers_after_transient_errors() {
        let mut h = harness(config()).await;
        let sb = signal();
        let id = sb.id;
        h.placer.on_signal(sb).await;
        let Some(VenueEvent::Fill(_)) = h.events_rx.recv().await else {
            panic!("expected fill");
        };
        let Some(VenueEvent::Order(closed)) = h.events_rx.recv().await else {
            panic!("expected order");
        };

        h.venue.fail_next(2);
        h.placer.on_order_event(closed).await.unwrap().await.unwrap();

        let record = h.placer.heal(id).await.unwrap();
        assert_eq!(record.status, HealStatus::InProgress);
        assert_eq!(record.error_trail.len(), 2);
        assert_eq!(record.orders.len(), 1);
        // retries of one attempt share the client id
        assert_eq!(record.place.client_id.retry, 0);
    }

    #[tokio::test]
    async fn test_missing_fill_price_heals_at_limit_price() {
        let mut h = harness(config()).await;
        h.venue.set_fill_ratio(dec!(0.5));
        let sb = signal();
        let id = sb.id;
        h.placer.on_signal(sb).await;
        let Some(VenueEvent::Fill(_)) = h.events_rx.recv().await else {
            panic!("expected fill");
        };
        let Some(VenueEvent::Order(mut closed)) = h.events_rx.recv().await else {
            panic!("expected order");
        };
        closed.avg_fill_price = None;
        drain(&mut h.dispatch_rx);
        h.placer.on_order_event(closed).await.unwrap().await.unwrap();

        let record = h.placer.heal(id).await.unwrap();
        assert_eq!(record.status, HealStatus::InProgress);
        assert_eq!(record.avg_fill_price, Price::new(dec!(100.20)));
        assert_eq!(record.place.price, Price::new(dec!(100.28)));
        assert_eq!(record.orders.len(), 1);
        let msgs = drain(&mut h.dispatch_rx);
        assert!(msgs.iter().any(|m| matches!(m, DispatchMsg::SaveHeal(r) if r.id == id)));
    }

    #[tokio::test]
    async fn test_unplannable_hedge_is_recorded_unresolved() {
        let mut h = harness(config()).await;
        h.venue.set_fill_ratio(dec!(0.5));
        let sb = signal();
        let id = sb.id;
        h.placer.on_signal(sb).await;
        let Some(VenueEvent::Fill(_)) = h.events_rx.recv().await else {
            panic!("expected fill");
        };
        let Some(VenueEvent::Order(mut closed)) = h.events_rx.recv().await else {
            panic!("expected order");
        };
        // no usable price anywhere on the order
        closed.avg_fill_price = None;
        closed.price = None;
        let mut decision = h.placer.pending.get_mut(&id).unwrap();
        decision.place.price = Price::new(dec!(0));
        drop(decision);
        drain(&mut h.dispatch_rx);
        h.placer.on_order_event(closed).await.unwrap().await.unwrap();

        let record = h.placer.heal(id).await.unwrap();
        assert_eq!(record.status, HealStatus::Unresolved);
        assert_eq!(record.filled_size, Size::new(dec!(0.75)));
        assert!(record.orders.is_empty());
        assert_eq!(h.placer.unresolved_heals().await.len(), 1);
        let msgs = drain(&mut h.dispatch_rx);
        assert!(msgs
            .iter()
            .any(|m| matches!(m, DispatchMsg::SaveHeal(r) if r.status == HealStatus::Unresolved)));
    }

    #[tokio::test]
    async fn test_heal_child_close_without_cached_market_escalates() {
        let mut h = harness(config()).await;
        let sb = signal();
        let id = sb.id;
        h.placer.on_signal(sb).await;
        let Some(VenueEvent::Fill(_)) = h.events_rx.recv().await else {
            panic!("expected fill");
        };
        let Some(VenueEvent::Order(closed)) = h.events_rx.recv().await else {
            panic!("expected order");
        };
        h.placer.on_order_event(closed).await.unwrap().await.unwrap();
        let first = h.placer.heal(id).await.unwrap();

        h.placer.markets().replace(std::iter::empty::<surebet_core::MarketInfo>());
        h.venue.close_order(first.orders[0].id, dec!(0)).await.unwrap();
        let Some(VenueEvent::Order(child)) = h.events_rx.recv().await else {
            panic!("expected order");
        };
        h.placer.on_order_event(child).await.unwrap().await.unwrap();

        let record = h.placer.heal(id).await.unwrap();
        assert_eq!(record.status, HealStatus::InProgress);
        assert_eq!(record.place.client_id.retry, 1);
        assert_eq!(record.orders.len(), 2);
    }

    #[tokio::test]
    async fn test_symbol_lock_free_during_heal_placement() {
        let mut h = harness(config()).await;
        h.placer.on_signal(signal()).await;
        let Some(VenueEvent::Fill(_)) = h.events_rx.recv().await else {
            panic!("expected fill");
        };
        let Some(VenueEvent::Order(closed)) = h.events_rx.recv().await else {
            panic!("expected order");
        };

        h.venue.set_latency(Duration::from_millis(300));
        let task = h.placer.on_order_event(closed).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());

        let guard = h
            .placer
            .locks()
            .acquire("BTC", Duration::from_millis(20), h.placer.shutdown_token())
            .await;
        assert!(guard.is_ok());
        drop(guard);

        task.await.unwrap();
        assert_eq!(h.placer.heals_len(), 1);
    }

    #[tokio::test]
    async fn test_stale_heal_child_is_cancelled() {
        let mut cfg = config();
        cfg.re_heal_period_ms = 1;
        let mut h = harness(cfg).await;
        h.placer.on_signal(signal()).await;
        let Some(VenueEvent::Fill(_)) = h.events_rx.recv().await else {
            panic!("expected fill");
        };
        let Some(VenueEvent::Order(closed)) = h.events_rx.recv().await else {
            panic!("expected order");
        };
        h.placer.on_order_event(closed).await.unwrap().await.unwrap();
        assert_eq!(h.venue.resting().len(), 1);

        h.placer.sync_open_orders().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(h.placer.cancel_stale_heals().await, 1);
        assert!(h.venue.resting().is_empty());
    }
}
