use std::fmt;

use thiserror::Error;

/// Failure categories shared by every store call and every coordinated mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unauthorized,
    NotFound,
    Validation,
    Transport,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::NotFound => "not found",
            ErrorKind::Validation => "validation",
            ErrorKind::Transport => "transport",
        };
        f.write_str(label)
    }
}

/// Not-found and not-owned are the same variant so callers cannot tell
/// a foreign entity from a missing one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Store unavailable: {0}")]
    Transport(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Unauthorized(_) => ErrorKind::Unauthorized,
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::Validation(_) => ErrorKind::Validation,
            StoreError::Transport(_) => ErrorKind::Transport,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            StoreError::Unauthorized(m)
            | StoreError::NotFound(m)
            | StoreError::Validation(m)
            | StoreError::Transport(m) => m,
        }
    }

    pub fn not_found(resource: &str, id: impl fmt::Display) -> Self {
        StoreError::NotFound(format!("{} {} not found or access denied", resource, id))
    }

    pub fn unauthenticated() -> Self {
        StoreError::Unauthorized("no authenticated session".to_string())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Transport(err.to_string())
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Transport(err.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
