//! Order lifecycle and heal bookkeeping.
//!
//! # Key Components
//!
//! - [`OrderTracker`]: open-order set fed by venue order events and resyncs
//! - [`OrderRoute`]: what a terminal (or non-terminal) order event means for its lineage
//! - [`HealRecord`]: the flattening state of one filled hedge
//! - [`HealStatus`]: InProgress / Completed / Abandoned / Unresolved
//! - [`ReconcileOutcome`]: result of folding a closed heal child into its record

pub mod error;
pub mod heal;
pub mod tracker;

pub use error::{PositionError, PositionResult};
pub use heal::{HealParams, HealRecord, HealStatus, ReconcileOutcome};
pub use tracker::{OrderRoute, OrderTracker};
