//! Core domain types for the surebet placer.
//!
//! This crate provides fundamental types used throughout the system:
//! - `Price`, `Size`: Precision-safe numeric types with directional quantization
//! - `ClientId`: Structured correlation key `{id, role, retry}`
//! - `PlaceParams`, `Order`, `Fill`: Order intent and exchange-confirmed state
//! - `MarketInfo`: Trading constraints of a symbol
//! - `Surebet`: Inbound cross-venue opportunity signal

pub mod decimal;
pub mod error;
pub mod market;
pub mod order;
pub mod signal;

pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use market::{base_from_market, MarketInfo, SETTLEMENT_CURRENCY};
pub use order::{
    ClientId, Fill, Order, OrderSide, OrderStatus, OrderType, PlaceParams, Role,
};
pub use signal::{now_ns, Quote, Surebet};
