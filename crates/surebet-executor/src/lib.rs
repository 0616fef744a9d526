//! Signal evaluation and order placement for the surebet placer.
//!
//! # Key Components
//!
//! - [`SymbolLockTable`]: one mutual-exclusion slot per base asset
//! - [`evaluate`]: signal + balances + market constraints -> hedge decision
//! - [`Placer`]: signal, order and fill entry points; hedge and heal placement
//! - [`Dispatcher`]: single task owning persistence, balance-refresh throttling
//!   and the periodic resync/sweep timers
//! - [`Venue`]: trading venue interface, with [`PaperVenue`] for dry runs and tests

pub mod config;
pub mod dispatch;
pub mod dispatcher;
pub mod error;
pub mod evaluator;
pub mod healer;
pub mod paper;
pub mod placer;
pub mod symbol_lock;
pub mod venue;

pub use config::{DispatcherConfig, PlacerConfig};
pub use dispatch::DispatchMsg;
pub use dispatcher::Dispatcher;
pub use error::{ExecutorError, ExecutorResult};
pub use evaluator::{evaluate, DecisionRecord, EvalInput, Rejection, SizeCap};
pub use paper::PaperVenue;
pub use placer::{Placer, SignalOutcome};
pub use symbol_lock::{SymbolGuard, SymbolLockTable};
pub use venue::{BoxFuture, DynVenue, Venue, VenueEvent};
