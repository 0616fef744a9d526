//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Executor error: {0}")]
    Executor(#[from] surebet_executor::ExecutorError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] surebet_persistence::PersistenceError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] surebet_telemetry::TelemetryError),

    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
