//! Executor error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Venue request failed: {0}")]
    Venue(String),

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("Lock wait for {0} timed out")]
    LockTimeout(String),

    #[error("Shutdown in progress")]
    Cancelled,

    #[error("Dispatch channel closed")]
    ChannelClosed,

    #[error("Audit store lost: {0}")]
    StoreLost(String),

    #[error(transparent)]
    Registry(#[from] surebet_registry::RegistryError),

    #[error(transparent)]
    Persistence(#[from] surebet_persistence::PersistenceError),

    #[error(transparent)]
    Position(#[from] surebet_position::PositionError),
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;
