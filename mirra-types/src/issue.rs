//! The entity error slot.
//!
//! Guard failures never abort the caller's control flow: they are recorded
//! on the nearest owning model and the call returns normally. Consumers
//! observe them by reading the slot, not by catching errors across the
//! async boundary.

use crate::SourceId;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use thiserror::Error;

/// A condition recorded on a model's error slot.
///
/// The first five variants are the known, enumerable family: expected
/// outcomes the consumer is meant to render. `Unknown` wraps any
/// lower-layer failure opaquely, preserving the cause text for diagnostics.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum Issue {
    /// The owning entity was deleted while an operation was in flight.
    #[error("entity was deleted")]
    EntityDeleted,

    /// A second subscription was attempted without removing the first.
    #[error("a handler is already registered for this entity")]
    AlreadySubscribed,

    /// A child-added event named a child that already exists locally.
    #[error("child {0} was already added")]
    AlreadyAdded(SourceId),

    /// A child-removed event named a child that does not exist locally.
    #[error("child {0} was already removed")]
    AlreadyRemoved(SourceId),

    /// Staged input failed validation before it could be pushed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Any lower-layer failure, wrapped with the context it occurred in.
    #[error("{context}: {detail}")]
    Unknown { context: String, detail: String },
}

impl Issue {
    /// Wraps an arbitrary lower-layer failure.
    #[must_use]
    pub fn unknown(context: impl Into<String>, cause: impl Display) -> Self {
        Self::Unknown {
            context: context.into(),
            detail: cause.to_string(),
        }
    }

    /// Whether this is one of the known, enumerable conditions.
    #[must_use]
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown { .. })
    }
}
