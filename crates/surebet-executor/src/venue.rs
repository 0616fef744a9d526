//! Trading venue interface.
//!
//! The engine only talks to the venue through this trait. Implementations
//! return wire DTOs; mapping into domain types happens in
//! `surebet_registry::wire`.

use crate::error::ExecutorResult;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use surebet_core::PlaceParams;
use surebet_registry::{RawAccount, RawBalance, RawFill, RawMarket, RawOrder};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Shared handle to a venue.
pub type DynVenue = Arc<dyn Venue>;

/// Push notification from the venue's private stream.
#[derive(Debug, Clone)]
pub enum VenueEvent {
    Order(RawOrder),
    Fill(RawFill),
}

/// Request/response side of a trading venue.
///
/// The venue rejects a client id it has already seen; placement retries of
/// the same attempt rely on that to stay idempotent.
pub trait Venue: Send + Sync {
    /// Submit an order. Returns the venue's initial snapshot.
    fn place_order<'a>(&'a self, params: &'a PlaceParams) -> BoxFuture<'a, ExecutorResult<RawOrder>>;

    fn cancel_order(&self, order_id: i64) -> BoxFuture<'_, ExecutorResult<()>>;

    fn open_orders(&self) -> BoxFuture<'_, ExecutorResult<Vec<RawOrder>>>;

    /// Recently closed orders, newest last.
    fn order_history(&self) -> BoxFuture<'_, ExecutorResult<Vec<RawOrder>>>;

    fn balances(&self) -> BoxFuture<'_, ExecutorResult<Vec<RawBalance>>>;

    fn markets(&self) -> BoxFuture<'_, ExecutorResult<Vec<RawMarket>>>;

    fn account_info(&self) -> BoxFuture<'_, ExecutorResult<RawAccount>>;
}
