//! Error types for the engine.
//!
//! These are infrastructure errors only. Entity-level conditions
//! (deleted mid-flight, duplicate subscription, guard failures) are not
//! errors here; they are recorded on the owning model's issue slot.

use mirra_link::LinkError;
use mirra_types::ModelId;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur in engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A model with this id is already registered.
    #[error("model {0} is already registered")]
    DuplicateId(ModelId),

    /// Link-layer failure during a setup action.
    #[error(transparent)]
    Link(#[from] LinkError),
}
