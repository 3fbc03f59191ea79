//! Error taxonomy shared by every store and engine in the crate.
//!
//! The kinds mirror the ones callers actually need to branch on (map to a
//! transport status code, decide whether to retry, decide whether to
//! refund a bet) rather than the Rust types that produced them.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LutError>;

#[derive(Debug, Error)]
pub enum LutError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(String),

    #[error("overflow: {0}")]
    Overflow(String),

    #[error("state: {0}")]
    State(String),

    #[error("transient: {0}")]
    Transient(String),
}

impl LutError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    pub fn overflow(msg: impl Into<String>) -> Self {
        Self::Overflow(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Whether the caller's retry budget (loader reload, watcher retry) should keep going.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<std::io::Error> for LutError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<csv::Error> for LutError {
    fn from(e: csv::Error) -> Self {
        Self::Validation(e.to_string())
    }
}

impl From<serde_json::Error> for LutError {
    fn from(e: serde_json::Error) -> Self {
        Self::Validation(e.to_string())
    }
}
