use sqlx::migrate::MigrateError;
use thiserror::Error;
use uuid::Uuid;

/// Top-level error type for the settlement worker
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrateError),

    #[error("Settlement error: {0}")]
    Settlement(#[from] SettlementError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Store-level failures that mean the backing database is unreachable,
    /// as opposed to a problem with one game's rows.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Database(
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            )
        )
    }
}

/// Per-leg grading problems. These never leave the grading module as errors:
/// the resolver turns each one into a VOID leg and keeps the message as the
/// leg's result reason.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GradingError {
    #[error("missing scores")]
    MissingScores,

    #[error("missing line")]
    MissingLine,

    #[error("unmatched selection")]
    UnmatchedSelection,

    #[error("ambiguous selection")]
    AmbiguousSelection,

    #[error("selection missing over/under direction")]
    MissingDirection,

    #[error("unsupported market: {0}")]
    UnsupportedMarket(String),

    #[error("score arithmetic out of range")]
    OutOfRange,
}

/// Write conflicts while committing a game
#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("Leg {leg_id} changed status concurrently (expected {expected})")]
    StaleLeg { leg_id: Uuid, expected: String },
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
