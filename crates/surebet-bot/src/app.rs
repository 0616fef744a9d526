//! Main application logic.

use crate::config::AppConfig;
use crate::error::AppResult;
use crate::signal_feed::SignalFeed;
use std::sync::Arc;
use surebet_executor::{
    Dispatcher, PaperVenue, Placer, SignalOutcome, VenueEvent,
};
use surebet_persistence::{AuditStore, JsonLinesStore, MemoryStore};
use surebet_telemetry::Metrics;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Counters reported when the run ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub signals: u64,
    pub placed: u64,
    pub demo: u64,
    pub rejected: u64,
    pub malformed: u64,
    pub venue_events: u64,
    pub unresolved_heals: usize,
}

impl RunSummary {
    fn tally(&mut self, joined: Result<SignalOutcome, JoinError>) {
        match joined {
            Ok(SignalOutcome::Placed { .. }) => self.placed += 1,
            Ok(SignalOutcome::Demo(_)) => self.demo += 1,
            Ok(SignalOutcome::Rejected(_)) => self.rejected += 1,
            Err(e) => error!(error = %e, "Signal task failed"),
        }
    }
}

/// Main application.
pub struct Application {
    config: AppConfig,
    shutdown: CancellationToken,
}

impl Application {
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            shutdown: CancellationToken::new(),
        })
    }

    /// Cancelling this token stops the run.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn paper_venue(&self) -> PaperVenue {
        let paper = &self.config.paper;
        let venue = PaperVenue::new(
            paper.account.clone(),
            paper.markets.clone(),
            paper.balances.clone(),
        );
        venue.set_fill_ratio(paper.fill_ratio);
        venue
    }

    fn open_store(&self) -> AppResult<Box<dyn AuditStore>> {
        let persistence = &self.config.persistence;
        if !persistence.enabled {
            warn!("Persistence disabled, audit trail kept in memory only");
            return Ok(Box::new(MemoryStore::new()));
        }
        info!(dir = %persistence.dir, "Opening audit store");
        Ok(Box::new(JsonLinesStore::new(
            &persistence.dir,
            persistence.buffer_size,
        )?))
    }

    /// Bootstrap, then consume signals from `input` until it ends or a
    /// shutdown is requested.
    ///
    /// At end of input, in-flight signals and the order events they caused
    /// are handled before the dispatcher is stopped.
    pub async fn run<R>(&mut self, input: R) -> AppResult<RunSummary>
    where
        R: AsyncRead + Unpin,
    {
        let capacity = self.config.dispatcher.channel_capacity;
        let (dispatch_tx, dispatch_rx) = mpsc::channel(capacity);
        let (events_tx, events_rx) = mpsc::channel(capacity);

        let venue = Arc::new(self.paper_venue().with_events(events_tx));
        let placer = Arc::new(Placer::new(
            self.config.placer.clone(),
            venue,
            dispatch_tx,
            self.shutdown.clone(),
        ));

        // bootstrap snapshots are persisted, so the dispatcher starts first
        let store = self.open_store()?;
        let dispatcher = tokio::spawn(
            Dispatcher::new(
                self.config.dispatcher.clone(),
                Arc::clone(&placer),
                store,
                dispatch_rx,
            )
            .run(),
        );

        info!(demo_mode = self.config.placer.demo_mode, "Running bootstrap...");
        if let Err(e) = placer.bootstrap().await {
            self.shutdown.cancel();
            dispatcher.await??;
            return Err(e.into());
        }

        let intake_done = CancellationToken::new();
        let pump = tokio::spawn(pump_events(
            Arc::clone(&placer),
            events_rx,
            intake_done.clone(),
        ));

        let mut feed = SignalFeed::new(input);
        let mut tasks: JoinSet<SignalOutcome> = JoinSet::new();
        let mut summary = RunSummary::default();
        let os_signal = shutdown_signal();
        tokio::pin!(os_signal);

        info!("Entering main event loop");
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                _ = &mut os_signal => {
                    info!("Shutdown signal received");
                    self.shutdown.cancel();
                    break;
                }

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => summary.tally(joined),

                next = feed.next_signal() => match next? {
                    Some(sb) => {
                        summary.signals += 1;
                        let placer = Arc::clone(&placer);
                        tasks.spawn(async move { placer.on_signal(sb).await });
                    }
                    None => {
                        info!("Signal feed closed");
                        break;
                    }
                },
            }
        }

        // Cleanup
        while let Some(joined) = tasks.join_next().await {
            summary.tally(joined);
        }
        intake_done.cancel();
        summary.venue_events = pump.await?;
        summary.malformed = feed.skipped();
        summary.unresolved_heals = placer.unresolved_heals().await.len();

        self.shutdown.cancel();
        dispatcher.await??;

        self.write_metrics();
        info!(
            signals = summary.signals,
            placed = summary.placed,
            demo = summary.demo,
            rejected = summary.rejected,
            malformed = summary.malformed,
            venue_events = summary.venue_events,
            pending = placer.pending_len(),
            heals = placer.heals_len(),
            unresolved_heals = summary.unresolved_heals,
            "Shutting down"
        );
        Ok(summary)
    }

    fn write_metrics(&self) {
        let Some(path) = &self.config.telemetry.metrics_file else {
            return;
        };
        let written = Metrics::render()
            .map_err(|e| e.to_string())
            .and_then(|text| std::fs::write(path, text).map_err(|e| e.to_string()));
        match written {
            Ok(()) => info!(path = %path, "Metrics snapshot written"),
            Err(e) => warn!(path = %path, error = %e, "Failed to write metrics snapshot"),
        }
    }
}

/// Route venue events to the placer until shutdown, or until intake is done
/// and every queued event (including ones raised by close handling) has
/// been handled. Returns the number of events handled.
async fn pump_events(
    placer: Arc<Placer>,
    mut rx: mpsc::Receiver<VenueEvent>,
    intake_done: CancellationToken,
) -> u64 {
    let shutdown = placer.shutdown_token().clone();
    let mut handled = 0u64;
    let mut inflight: Vec<JoinHandle<()>> = Vec::new();

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => return handled,

            _ = intake_done.cancelled() => break,

            event = rx.recv() => {
                let Some(event) = event else {
                    return handled;
                };
                handled += 1;
                if let Some(task) = route_event(&placer, event).await {
                    inflight.push(task);
                }
                inflight.retain(|task| !task.is_finished());
            }
        }
    }

    loop {
        for task in inflight.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "Order task failed");
            }
        }
        match rx.try_recv() {
            Ok(event) => {
                handled += 1;
                if let Some(task) = route_event(&placer, event).await {
                    inflight.push(task);
                }
            }
            Err(_) => break,
        }
    }
    handled
}

async fn route_event(placer: &Arc<Placer>, event: VenueEvent) -> Option<JoinHandle<()>> {
    match event {
        VenueEvent::Order(raw) => placer.on_order_event(raw).await,
        VenueEvent::Fill(raw) => {
            placer.on_fill(raw).await;
            None
        }
    }
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
