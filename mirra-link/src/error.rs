//! Error types for the link layer.

use mirra_types::SourceId;
use thiserror::Error;

/// Result type for link operations.
pub type LinkResult<T> = Result<T, LinkError>;

/// Errors that can occur at the link boundary.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The remote counterpart record no longer exists (terminal).
    #[error("source {0} is missing")]
    EntityMissing(SourceId),

    /// A handler is already registered for this (entity, requester) pair.
    #[error("a handler is already registered")]
    AlreadySubscribed,

    /// Transient backend failure; the operation may be retried.
    #[error("backend error: {0}")]
    Backend(String),

    /// A field mutation was malformed (terminal). A ticket carrying one
    /// is dropped, never requeued.
    #[error("invalid field value: {0}")]
    InvalidField(String),

    /// A flush did not complete within the configured deadline.
    #[error("operation timed out")]
    Timeout,

    /// The push channel to a subscriber was closed.
    #[error("channel closed")]
    ChannelClosed,
}
