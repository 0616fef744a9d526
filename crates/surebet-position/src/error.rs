//! Position error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PositionError {
    #[error("Order {0} closed without fill")]
    ZeroFill(i64),

    #[error("Order {0} has no average fill price")]
    MissingFillPrice(i64),

    #[error("Invalid heal state: {0}")]
    InvalidState(String),
}

pub type PositionResult<T> = Result<T, PositionError>;
