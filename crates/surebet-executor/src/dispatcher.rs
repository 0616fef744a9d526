//! Dispatcher task.
//!
//! Single consumer of the dispatch channel. Owns the audit store, throttles
//! balance refreshes and drives the periodic timers: market resync, stale
//! heal sweep, order history recovery and the status report. Refreshes run
//! on their own tasks so a slow venue call never holds up persistence.
//!
//! Store calls are blocking. Each batch of writes runs on the blocking pool
//! with the store moved in and back out, so writes stay in channel order
//! and a slow disk never parks a runtime worker.

use crate::config::DispatcherConfig;
use crate::dispatch::DispatchMsg;
use crate::error::{ExecutorError, ExecutorResult};
use crate::placer::Placer;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use surebet_persistence::{AuditKind, AuditRecord, AuditStore, PersistenceResult};
use surebet_telemetry::Metrics;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Upper bound on records written per blocking call.
const WRITE_BATCH: usize = 64;

/// Clears the in-flight flag when the guarded task ends.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Spawn `fut` unless a task under the same flag is still running.
fn spawn_guarded<F>(flag: &Arc<AtomicBool>, name: &'static str, fut: F) -> bool
where
    F: Future<Output = ()> + Send + 'static,
{
    if flag.swap(true, Ordering::AcqRel) {
        debug!(task = name, "still running, skipped");
        return false;
    }
    let guard = InFlight(Arc::clone(flag));
    tokio::spawn(async move {
        let _guard = guard;
        fut.await;
    });
    true
}

pub struct Dispatcher<S: AuditStore> {
    config: DispatcherConfig,
    placer: Arc<Placer>,
    /// Absent only while a blocking write holds it.
    store: Option<S>,
    rx: mpsc::Receiver<DispatchMsg>,
    last_balance_check: Option<Instant>,
    balance_refresh: Arc<AtomicBool>,
    market_resync: Arc<AtomicBool>,
    heal_sweep: Arc<AtomicBool>,
    history_sync: Arc<AtomicBool>,
}

impl<S: AuditStore + 'static> Dispatcher<S> {
    pub fn new(
        config: DispatcherConfig,
        placer: Arc<Placer>,
        store: S,
        rx: mpsc::Receiver<DispatchMsg>,
    ) -> Self {
        Self {
            config,
            placer,
            store: Some(store),
            rx,
            last_balance_check: None,
            balance_refresh: Arc::new(AtomicBool::new(false)),
            market_resync: Arc::new(AtomicBool::new(false)),
            heal_sweep: Arc::new(AtomicBool::new(false)),
            history_sync: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run until the placer's shutdown token fires.
    ///
    /// Messages still queued at shutdown are written before the store is
    /// flushed and handed back. Fails only if a blocking write panicked and
    /// took the store with it.
    pub async fn run(mut self) -> ExecutorResult<S> {
        let shutdown = self.placer.shutdown_token().clone();
        let market_period = self.config.market_resync();
        let sweep_period = self.placer.config().re_heal_period() + Duration::from_secs(1);
        let history_period = self.config.order_history();
        let report_period = self.config.status_report();

        let start = Instant::now();
        let mut market_timer = interval_at(start + market_period, market_period);
        let mut sweep_timer = interval_at(start + sweep_period, sweep_period);
        let mut history_timer = interval_at(start + history_period, history_period);
        let mut report_timer = interval_at(start + report_period, report_period);
        for timer in [
            &mut market_timer,
            &mut sweep_timer,
            &mut history_timer,
            &mut report_timer,
        ] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        info!(
            market_resync_ms = self.config.market_resync_ms,
            heal_sweep_ms = sweep_period.as_millis() as u64,
            order_history_ms = self.config.order_history_ms,
            status_report_ms = self.config.status_report_ms,
            "Dispatcher started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                msg = self.rx.recv() => match msg {
                    Some(msg) => self.handle(msg).await,
                    None => {
                        warn!("Dispatch channel closed");
                        break;
                    }
                },

                _ = market_timer.tick() => self.spawn_market_resync(),

                _ = sweep_timer.tick() => self.spawn_heal_sweep(),

                _ = history_timer.tick() => self.spawn_history_sync(),

                _ = report_timer.tick() => self.status_report(),
            }
        }

        let mut drained = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            if !matches!(msg, DispatchMsg::CheckBalance) {
                drained.push(msg);
            }
        }
        let count = drained.len();
        self.write(drained, true).await;
        info!(drained = count, "Dispatcher stopped");
        self.store
            .take()
            .ok_or_else(|| ExecutorError::StoreLost("writer panicked".to_string()))
    }

    /// Write `msg` plus whatever else is already queued, up to a batch.
    async fn handle(&mut self, msg: DispatchMsg) {
        let mut batch = Vec::new();
        let mut next = Some(msg);
        while let Some(msg) = next.take() {
            match msg {
                DispatchMsg::CheckBalance => self.check_balance(),
                other => batch.push(other),
            }
            if batch.len() < WRITE_BATCH {
                next = self.rx.try_recv().ok();
            }
        }
        if !batch.is_empty() {
            self.write(batch, false).await;
        }
    }

    /// Apply `batch` on the blocking pool, flushing afterwards if asked.
    async fn write(&mut self, batch: Vec<DispatchMsg>, flush: bool) {
        let Some(mut store) = self.store.take() else {
            error!(dropped = batch.len(), "Audit store lost, records dropped");
            return;
        };
        let joined = tokio::task::spawn_blocking(move || {
            for msg in batch {
                write_one(&mut store, msg);
            }
            if flush {
                if let Err(e) = store.flush() {
                    error!(error = %e, "Audit flush failed");
                }
            }
            store
        })
        .await;
        match joined {
            Ok(store) => self.store = Some(store),
            Err(e) => error!(error = %e, "Audit writer panicked"),
        }
    }

    /// Refresh balances, at most once per `balance_check_min_interval`.
    fn check_balance(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.last_balance_check {
            if now.duration_since(last) < self.config.balance_check_min_interval() {
                return;
            }
        }
        let placer = Arc::clone(&self.placer);
        let spawned = spawn_guarded(&self.balance_refresh, "balance_refresh", async move {
            if let Err(e) = placer.refresh_balances().await {
                warn!(error = %e, "get_balances_error");
            }
        });
        if spawned {
            self.last_balance_check = Some(now);
        }
    }

    fn spawn_market_resync(&self) {
        let placer = Arc::clone(&self.placer);
        spawn_guarded(&self.market_resync, "market_resync", async move {
            if let Err(e) = placer.refresh_markets().await {
                warn!(error = %e, "get_markets_error");
            }
        });
    }

    /// Resync open orders, then cancel heal children resting too long.
    fn spawn_heal_sweep(&self) {
        let placer = Arc::clone(&self.placer);
        spawn_guarded(&self.heal_sweep, "heal_sweep", async move {
            if let Err(e) = placer.sync_open_orders().await {
                warn!(error = %e, "get_open_orders_error");
                return;
            }
            let cancelled = placer.cancel_stale_heals().await;
            if cancelled > 0 {
                info!(cancelled, "Stale heal orders cancelled");
            }
        });
    }

    fn spawn_history_sync(&self) {
        let placer = Arc::clone(&self.placer);
        spawn_guarded(&self.history_sync, "history_sync", async move {
            if let Err(e) = placer.recover_order_history().await {
                warn!(error = %e, "get_orders_history_error");
            }
        });
    }

    fn status_report(&self) {
        let locks = self.placer.locks().active_locks();
        let open_orders = self.placer.tracker().len();
        Metrics::locks_held_set(locks.len() as i64);
        Metrics::open_orders_set(open_orders as i64);
        info!(
            ?locks,
            pending = self.placer.pending_len(),
            heals = self.placer.heals_len(),
            open_orders,
            total_usd = %self.placer.balances().total_usd(),
            "active_locks"
        );
    }
}

fn write_one<S: AuditStore>(store: &mut S, msg: DispatchMsg) {
    let kind = msg.kind();
    let result = match msg {
        DispatchMsg::CheckBalance => return,
        DispatchMsg::DeleteByOrderId(order_id) => store.delete_by_order_id(order_id),
        DispatchMsg::SaveSurebet(d) => save(store, AuditKind::Surebet, d.id, d.order_id, &*d),
        DispatchMsg::SaveHeal(h) => save(store, AuditKind::Heal, h.id, Some(h.hedge_order_id), &*h),
        DispatchMsg::SaveOrder(o) => save(store, AuditKind::Order, o.id, Some(o.id), &*o),
        DispatchMsg::SaveFill(f) => save(store, AuditKind::Fill, f.id, Some(f.order_id), &*f),
        DispatchMsg::SaveAccount(a) => save(store, AuditKind::Account, 0, None, &*a),
        DispatchMsg::SaveBalances(b) => save(store, AuditKind::Balances, 0, None, &b),
    };
    if let Err(e) = result {
        warn!(kind, error = %e, "Audit write failed");
    }
}

fn save<S, T>(
    store: &mut S,
    kind: AuditKind,
    id: i64,
    order_id: Option<i64>,
    payload: &T,
) -> PersistenceResult<()>
where
    S: AuditStore,
    T: serde::Serialize,
{
    store.save(AuditRecord::new(kind, id, order_id, payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placer::tests::{config, harness, signal, Harness};
    use crate::placer::SignalOutcome;
    use crate::venue::VenueEvent;
    use rust_decimal_macros::dec;
    use surebet_persistence::MemoryStore;

    /// Feed queued venue events to the placer and wait for close handling.
    async fn pump(placer: &Arc<Placer>, events_rx: &mut mpsc::Receiver<VenueEvent>) {
        while let Ok(event) = events_rx.try_recv() {
            match event {
                VenueEvent::Order(raw) => {
                    if let Some(task) = placer.on_order_event(raw).await {
                        task.await.unwrap();
                    }
                }
                VenueEvent::Fill(raw) => placer.on_fill(raw).await,
            }
        }
    }

    fn dispatcher_config() -> DispatcherConfig {
        DispatcherConfig {
            balance_check_min_interval_ms: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_decision_and_order_persisted() {
        let Harness {
            placer,
            venue,
            dispatch_rx,
            mut events_rx,
        } = harness(config()).await;
        venue.set_fill_ratio(dec!(1));

        let sb = signal();
        let id = sb.id;
        let outcome = placer.on_signal(sb).await;
        let SignalOutcome::Placed { order_id } = outcome else {
            panic!("expected placement, got {outcome:?}");
        };
        pump(&placer, &mut events_rx).await;

        let dispatcher = Dispatcher::new(
            dispatcher_config(),
            placer.clone(),
            MemoryStore::new(),
            dispatch_rx,
        );
        placer.shutdown_token().cancel();
        let mut store = dispatcher.run().await.unwrap();

        let surebet = store.find_by_id(AuditKind::Surebet, id).unwrap().unwrap();
        assert_eq!(surebet.order_id, Some(order_id));
        let order = store.find_by_id(AuditKind::Order, order_id).unwrap().unwrap();
        assert_eq!(order.payload["status"], "closed");
        // filled hedge is healed, not cleaned up
        assert!(store.find_by_id(AuditKind::Heal, id).unwrap().is_some());
        assert!(store.records().iter().all(|r| r.kind != AuditKind::Tombstone));
        assert!(store
            .records()
            .iter()
            .any(|r| r.kind == AuditKind::Fill && r.order_id == Some(order_id)));
    }

    #[tokio::test]
    async fn test_unfilled_hedge_leaves_only_tombstoned_records() {
        let Harness {
            placer,
            venue,
            dispatch_rx,
            mut events_rx,
        } = harness(config()).await;
        venue.set_fill_ratio(dec!(0));

        let sb = signal();
        let id = sb.id;
        assert!(matches!(
            placer.on_signal(sb).await,
            SignalOutcome::Placed { .. }
        ));
        pump(&placer, &mut events_rx).await;

        let dispatcher = Dispatcher::new(
            dispatcher_config(),
            placer.clone(),
            MemoryStore::new(),
            dispatch_rx,
        );
        placer.shutdown_token().cancel();
        let mut store = dispatcher.run().await.unwrap();

        assert!(store.find_by_id(AuditKind::Surebet, id).unwrap().is_none());
        assert!(store
            .records()
            .iter()
            .any(|r| r.kind == AuditKind::Tombstone));
    }

    #[tokio::test]
    async fn test_check_balance_refreshes_cache() {
        let Harness {
            placer,
            venue,
            dispatch_rx,
            ..
        } = harness(config()).await;
        // venue balances stay put when nothing fills; the cache moved
        venue.set_fill_ratio(dec!(0));
        assert!(matches!(
            placer.on_signal(signal()).await,
            SignalOutcome::Placed { .. }
        ));
        assert_eq!(placer.balances().get("BTC").free, dec!(51.5));

        let dispatcher = Dispatcher::new(
            dispatcher_config(),
            placer.clone(),
            MemoryStore::new(),
            dispatch_rx,
        );
        let task = tokio::spawn(dispatcher.run());

        let mut refreshed = false;
        for _ in 0..100 {
            if placer.balances().get("BTC").free == dec!(50) {
                refreshed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        placer.shutdown_token().cancel();
        task.await.unwrap().unwrap();
        assert!(refreshed);
    }

    #[tokio::test]
    async fn test_history_timer_persists_missed_closes() {
        let Harness {
            placer,
            dispatch_rx,
            ..
        } = harness(config()).await;
        let outcome = placer.on_signal(signal()).await;
        let SignalOutcome::Placed { order_id } = outcome else {
            panic!("expected placement, got {outcome:?}");
        };
        // the close event is never routed; only the history has it

        let cfg = DispatcherConfig {
            order_history_ms: 20,
            ..dispatcher_config()
        };
        let task = tokio::spawn(Dispatcher::new(cfg, placer.clone(), MemoryStore::new(), dispatch_rx).run());
        tokio::time::sleep(Duration::from_millis(100)).await;
        placer.shutdown_token().cancel();
        let mut store = task.await.unwrap().unwrap();

        let order = store.find_by_id(AuditKind::Order, order_id).unwrap().unwrap();
        assert_eq!(order.payload["status"], "closed");
    }

    /// Store whose every save blocks the calling thread.
    struct SlowStore {
        inner: MemoryStore,
        delay: Duration,
    }

    impl AuditStore for SlowStore {
        fn save(&mut self, record: AuditRecord) -> PersistenceResult<()> {
            std::thread::sleep(self.delay);
            self.inner.save(record)
        }

        fn delete_by_order_id(&mut self, order_id: i64) -> PersistenceResult<()> {
            self.inner.delete_by_order_id(order_id)
        }

        fn find_by_id(&mut self, kind: AuditKind, id: i64) -> PersistenceResult<Option<AuditRecord>> {
            self.inner.find_by_id(kind, id)
        }
    }

    #[tokio::test]
    async fn test_slow_store_does_not_stall_runtime() {
        let Harness {
            placer,
            dispatch_rx,
            ..
        } = harness(config()).await;
        let store = SlowStore {
            inner: MemoryStore::new(),
            delay: Duration::from_millis(300),
        };
        let task = tokio::spawn(Dispatcher::new(dispatcher_config(), placer.clone(), store, dispatch_rx).run());

        let started = std::time::Instant::now();
        placer.dispatch(DispatchMsg::SaveBalances(Vec::new())).await;
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        // single-threaded runtime: an inline write would hold this task too
        assert!(started.elapsed() < Duration::from_millis(200));

        placer.shutdown_token().cancel();
        let mut store = task.await.unwrap().unwrap();
        assert!(store.find_by_id(AuditKind::Balances, 0).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_spawn_guarded_skips_overlap() {
        let flag = Arc::new(AtomicBool::new(false));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        assert!(spawn_guarded(&flag, "test", async move {
            let _ = rx.await;
        }));
        assert!(!spawn_guarded(&flag, "test", async {}));

        tx.send(()).unwrap();
        for _ in 0..100 {
            if !flag.load(Ordering::Acquire) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(spawn_guarded(&flag, "test", async {}));
    }
}
