//! The identity registry.
//!
//! A side table mapping random model ids to live instances. Ids are
//! handles, never references: nothing outside the registry keeps a model
//! alive, so "does this still exist" is a plain lookup, the safe aliveness
//! check every resumption path performs after a suspension.
//!
//! After `unregister`, every later `resolve` returns `None`. Callers treat
//! that as an expected outcome (deleted mid-flight), never a defect.

use crate::error::{EngineError, EngineResult};
use crate::model::Model;
use mirra_types::ModelId;
use std::collections::HashMap;

/// Process-wide table of live models.
#[derive(Default)]
pub struct Registry {
    models: HashMap<ModelId, Model>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a model under the id it was constructed with.
    pub fn register(&mut self, model: Model) -> EngineResult<ModelId> {
        let id = model.id();
        if self.models.contains_key(&id) {
            return Err(EngineError::DuplicateId(id));
        }
        self.models.insert(id, model);
        Ok(id)
    }

    /// Unregisters a model. Idempotent; deletion is immediate and
    /// irreversible; no tombstone remains.
    pub fn unregister(&mut self, id: ModelId) -> Option<Model> {
        self.models.remove(&id)
    }

    /// Whether the model is still alive.
    #[must_use]
    pub fn exists(&self, id: ModelId) -> bool {
        self.models.contains_key(&id)
    }

    /// Resolves an id to the live model, or `None` if it was deleted.
    #[must_use]
    pub fn resolve(&self, id: ModelId) -> Option<&Model> {
        self.models.get(&id)
    }

    /// Mutable variant of [`Registry::resolve`].
    pub fn resolve_mut(&mut self, id: ModelId) -> Option<&mut Model> {
        self.models.get_mut(&id)
    }

    /// Number of live models.
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// All live ids, in no particular order.
    #[must_use]
    pub fn ids(&self) -> Vec<ModelId> {
        self.models.keys().copied().collect()
    }
}
