//! Registry error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Invalid {field}: {value}")]
    InvalidField { field: &'static str, value: String },

    #[error("Venue returned empty {0} list")]
    EmptyResponse(&'static str),
}

pub type RegistryResult<T> = Result<T, RegistryError>;
