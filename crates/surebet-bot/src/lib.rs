//! Cross-venue surebet placer.
//!
//! Main application that wires the components together:
//! - Paper venue seeded from configuration
//! - Placer (evaluation, hedge and heal placement)
//! - Dispatcher (audit trail, balance refresh throttling, resync timers)
//! - Line-delimited JSON signal feed

pub mod app;
pub mod config;
pub mod error;
pub mod signal_feed;

pub use app::{Application, RunSummary};
pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use signal_feed::SignalFeed;
