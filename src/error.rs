use thiserror::Error;

/// Errors surfaced by the memory engine.
///
/// `Store` failures never leave the index out of step with the record
/// store: writes hit the store first and the index is only touched on
/// success. `Corrupt` is recovered locally (skip with a warning) during
/// load and search; every other kind propagates to the caller unchanged.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("duplicate id: {0}")]
    Duplicate(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
