use thiserror::Error;

/// Errors surfaced by the ratelimit engine and its tooling.
#[derive(Debug, Error)]
pub enum RatelimitError {
    /// A route produced a key longer than the configured capacity.
    #[error("Route key overflow: {attempted} bytes exceeds capacity of {capacity}")]
    RouteKeyOverflow { capacity: usize, attempted: usize },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Replay script error: {0}")]
    Script(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Query(#[from] QueryError),
}

impl From<validator::ValidationErrors> for RatelimitError {
    fn from(err: validator::ValidationErrors) -> Self {
        RatelimitError::Validation(err.to_string())
    }
}

pub type RatelimitResult<T> = Result<T, RatelimitError>;

/// Returned by the query encoder when a pair does not fit its buffer.
///
/// The encoder is left exactly as it was before the failed call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("Query buffer out of space: need {needed} bytes, {available} available")]
    OutOfSpace { needed: usize, available: usize },
}
