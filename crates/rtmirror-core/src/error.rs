//! Error types for remote sources

use thiserror::Error;

/// Errors raised by a [`RemoteSource`](crate::RemoteSource)
///
/// All of these are transient from the replicator's point of view: they
/// abort the current backfill run or end the current subscription, and
/// are never fatal to the process.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Transport-level failure (connect, TLS, timeout, body read)
    #[error("HTTP error: {0}")]
    Http(String),

    /// The remote answered with a non-success status
    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// The remote answered with a body we could not interpret
    #[error("Decode error: {0}")]
    Decode(String),

    /// The live stream broke mid-way
    #[error("Stream error: {0}")]
    Stream(String),

    /// The remote cancelled the subscription (rules change, revoked auth)
    #[error("Subscription cancelled: {0}")]
    Cancelled(String),
}

impl SourceError {
    /// Create a new Decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Create a new Stream error
    pub fn stream(message: impl Into<String>) -> Self {
        Self::Stream(message.into())
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Decode(err.to_string())
    }
}
