//! Shared account and market state for the surebet placer.
//!
//! Holds the two caches every signal evaluation reads from:
//! - `BalanceCache`: per-coin free/total/usd value, mutated by anticipatory
//!   deltas after each hedge and corrected by periodic venue refreshes
//! - `MarketCache`: per-symbol trading constraints, replaced wholesale on
//!   every market resync
//!
//! Also defines the venue wire DTOs and their explicit mapping into the
//! domain types of `surebet-core`.

pub mod balance;
pub mod error;
pub mod market_cache;
pub mod wire;

pub use balance::{BalanceCache, BalanceEntry};
pub use error::{RegistryError, RegistryResult};
pub use market_cache::MarketCache;
pub use wire::{AccountFees, RawAccount, RawBalance, RawFill, RawMarket, RawOrder};
