use std::time::Duration;

use thiserror::Error;

/// Failure taxonomy of a collection cycle.
///
/// Only `Transport`, `Timeout`, `Resolution` and `Persistence` end a cycle.
/// The others are per-instrument or per-message and the cycle keeps going.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// Bad price/depth combination. The instrument is skipped.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Response id not present in the pending table.
    #[error("no pending request with id {0}")]
    CorrelationMiss(u64),

    /// The venue answered a request with an error payload.
    #[error("venue error for request {id}: {message}")]
    VenueError { id: u64, message: String },

    /// Inbound frame that could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Connection-level failure. The cycle is abandoned without a commit.
    #[error("transport error: {0}")]
    Transport(String),

    /// The batch did not complete within the configured bound.
    #[error("cycle timed out after {0:?} with {1} request(s) outstanding")]
    Timeout(Duration, usize),

    /// Instrument lookup over HTTP failed.
    #[error("instrument resolution failed: {0}")]
    Resolution(String),

    /// Sink write failure.
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl SnapshotError {
    /// True for errors that abandon the whole cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SnapshotError::Transport(_)
                | SnapshotError::Timeout(..)
                | SnapshotError::Resolution(_)
                | SnapshotError::Persistence(_)
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SnapshotError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SnapshotError::Transport(err.to_string())
    }
}

impl From<reqwest::Error> for SnapshotError {
    fn from(err: reqwest::Error) -> Self {
        SnapshotError::Resolution(err.to_string())
    }
}

impl From<std::io::Error> for SnapshotError {
    fn from(err: std::io::Error) -> Self {
        SnapshotError::Persistence(err.to_string())
    }
}

pub type SnapshotResult<T> = Result<T, SnapshotError>;
