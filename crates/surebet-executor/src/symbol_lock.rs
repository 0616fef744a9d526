//! Per-asset mutual exclusion.
//!
//! At most one signal evaluation or placement runs per base asset. Slots are
//! created on first use and never removed; the number of assets is bounded
//! by the market list.

use crate::error::{ExecutorError, ExecutorResult};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use surebet_telemetry::Metrics;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Held slot. Dropping it releases the asset.
#[derive(Debug)]
pub struct SymbolGuard {
    asset: String,
    _guard: OwnedMutexGuard<()>,
}

impl SymbolGuard {
    pub fn asset(&self) -> &str {
        &self.asset
    }
}

/// Lazily populated table of per-asset slots.
#[derive(Debug, Default)]
pub struct SymbolLockTable {
    slots: DashMap<String, Arc<Mutex<()>>>,
}

impl SymbolLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, asset: &str) -> Arc<Mutex<()>> {
        if let Some(slot) = self.slots.get(asset) {
            return slot.value().clone();
        }
        self.slots
            .entry(asset.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Wait up to `timeout` for the asset's slot.
    ///
    /// Returns `LockTimeout` when the wait expires and `Cancelled` when
    /// `cancel` fires first. Neither leaves anything held.
    pub async fn acquire(
        &self,
        asset: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ExecutorResult<SymbolGuard> {
        let slot = self.slot(asset);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ExecutorError::Cancelled),
            res = tokio::time::timeout(timeout, slot.lock_owned()) => match res {
                Ok(guard) => Ok(SymbolGuard {
                    asset: asset.to_string(),
                    _guard: guard,
                }),
                Err(_) => {
                    Metrics::lock_timeout();
                    debug!(asset, timeout_ms = timeout.as_millis() as u64, "lock_too_long");
                    Err(ExecutorError::LockTimeout(asset.to_string()))
                }
            },
        }
    }

    /// Assets whose slot is currently held, sorted.
    pub fn active_locks(&self) -> Vec<String> {
        let mut held: Vec<String> = self
            .slots
            .iter()
            .filter(|e| e.value().try_lock().is_err())
            .map(|e| e.key().clone())
            .collect();
        held.sort();
        held
    }

    /// Number of slots ever created.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
