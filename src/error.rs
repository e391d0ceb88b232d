use thiserror::Error;

/// Error kinds surfaced by every fallible engine operation. Nothing is
/// swallowed: every fallible call in this crate returns `Result` and
/// propagates with `?`.
///
/// The HTTP layer (out of scope here) maps these to status codes:
/// `NotFound` -> 404, `AlreadyExists`/`Duplicate` -> 409,
/// `BadRequest`/`UnsupportedStage`/`UnsupportedOperator` -> 400, else 500.
#[derive(Error, Debug)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("duplicate identifier: {0}")]
    Duplicate(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unsupported stage: {0}")]
    UnsupportedStage(String),

    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Internal(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
