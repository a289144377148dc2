//! The local replica.
//!
//! A [`Model`] mirrors one remote source: its id, ownership chain, mirrored
//! fields, staged input fields, ordered child collection, error slot and
//! post-update callback. All concrete entity kinds flow through this one
//! type; kind-specific payload lives under `fields.data`.

use mirra_link::{Backend, BackendMode};
use mirra_types::{Issue, Location, ModelId, SourceDiff, SourceId};
use std::fmt;
use std::sync::Arc;

/// Callback invoked once per completed drain of a model's updater.
pub type UpdateCallback = Arc<dyn Fn(ModelId) + Send + Sync>;

/// The ownership chain a model is created with: its parent (if any), the
/// backend mode it inherited, and the shared backend handle. Children copy
/// the config with `parent` rebound; the backend choice never varies
/// within one tree.
pub struct ModelConfig {
    /// The parent model, `None` for roots.
    pub parent: Option<ModelId>,
    /// Which backend the tree was constructed against.
    pub mode: BackendMode,
    /// The injected backend handle, shared by the whole tree.
    pub backend: Arc<dyn Backend>,
}

impl ModelConfig {
    /// Config for a root model.
    #[must_use]
    pub fn root(backend: Arc<dyn Backend>) -> Self {
        Self {
            parent: None,
            mode: backend.mode(),
            backend,
        }
    }

    /// Config for a child, inheriting everything but the parent.
    #[must_use]
    pub fn child_of(&self, parent: ModelId) -> Self {
        Self {
            parent: Some(parent),
            mode: self.mode,
            backend: self.backend.clone(),
        }
    }
}

impl Clone for ModelConfig {
    fn clone(&self) -> Self {
        Self {
            parent: self.parent,
            mode: self.mode,
            backend: self.backend.clone(),
        }
    }
}

impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("parent", &self.parent)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// Fields mirrored from the remote source. Overwritten wholesale by
/// `Added`/`Modified` events; never written by the consumer directly.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelFields {
    pub kind: String,
    pub name: String,
    pub order: u32,
    pub created_at: i64,
    pub updated_at: i64,
    pub location: Location,
    pub data: serde_json::Value,
}

impl ModelFields {
    /// Builds the mirror from a snapshot.
    #[must_use]
    pub fn from_diff(diff: &SourceDiff) -> Self {
        Self {
            kind: diff.kind.clone(),
            name: diff.name.clone(),
            order: diff.order,
            created_at: diff.created_at,
            updated_at: diff.updated_at,
            location: diff.location,
            data: diff.data.clone(),
        }
    }

    /// Overwrites every mirrored field from a snapshot. Staged input is
    /// never written here; local edits survive remote refreshes.
    pub fn apply_diff(&mut self, diff: &SourceDiff) {
        self.kind = diff.kind.clone();
        self.name = diff.name.clone();
        self.order = diff.order;
        self.created_at = diff.created_at;
        self.updated_at = diff.updated_at;
        self.location = diff.location;
        self.data = diff.data.clone();
    }
}

/// Staged local edits, not yet pushed. `None` means nothing staged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelInput {
    pub name: Option<String>,
    pub location: Option<Location>,
    pub data: Option<serde_json::Value>,
}

impl ModelInput {
    /// Whether anything is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.location.is_none() && self.data.is_none()
    }
}

/// An observable local replica of one remote source.
pub struct Model {
    id: ModelId,
    pub(crate) config: ModelConfig,
    source_id: SourceId,
    pub(crate) fields: ModelFields,
    pub(crate) input: ModelInput,
    /// Ordered child collection: source identity -> local model id.
    pub(crate) children: Vec<(SourceId, ModelId)>,
    pub(crate) issue: Option<Issue>,
    pub(crate) callback: Option<UpdateCallback>,
}

impl Model {
    /// Constructs a model from its ownership chain and an initial snapshot.
    /// The model id is generated here, once, and never changes.
    #[must_use]
    pub fn new(config: ModelConfig, diff: &SourceDiff) -> Self {
        Self {
            id: ModelId::new(),
            config,
            source_id: diff.source_id,
            fields: ModelFields::from_diff(diff),
            input: ModelInput::default(),
            children: Vec::new(),
            issue: None,
            callback: None,
        }
    }

    /// The local handle.
    #[must_use]
    pub fn id(&self) -> ModelId {
        self.id
    }

    /// Identity of the mirrored remote source.
    #[must_use]
    pub fn source_id(&self) -> SourceId {
        self.source_id
    }

    /// The ownership chain.
    #[must_use]
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Rebuilds a snapshot from the mirrored state, for events that must
    /// be echoed locally when no backend push will arrive.
    pub(crate) fn snapshot(&self) -> SourceDiff {
        SourceDiff {
            source_id: self.source_id,
            kind: self.fields.kind.clone(),
            name: self.fields.name.clone(),
            order: self.fields.order,
            created_at: self.fields.created_at,
            updated_at: self.fields.updated_at,
            location: self.fields.location,
            data: self.fields.data.clone(),
        }
    }

    /// The mirrored fields.
    #[must_use]
    pub fn fields(&self) -> &ModelFields {
        &self.fields
    }

    /// The staged input fields.
    #[must_use]
    pub fn input(&self) -> &ModelInput {
        &self.input
    }

    // ── Children ───────────────────────────────────────────────────

    /// Looks up the local model mirroring a child source.
    #[must_use]
    pub fn child_by_source(&self, source_id: SourceId) -> Option<ModelId> {
        self.children
            .iter()
            .find(|(sid, _)| *sid == source_id)
            .map(|(_, mid)| *mid)
    }

    /// Appends a child to the ordered collection.
    pub(crate) fn insert_child(&mut self, source_id: SourceId, model_id: ModelId) {
        self.children.push((source_id, model_id));
    }

    /// Removes a child entry, returning its model id.
    pub(crate) fn remove_child(&mut self, source_id: SourceId) -> Option<ModelId> {
        let pos = self.children.iter().position(|(sid, _)| *sid == source_id)?;
        Some(self.children.remove(pos).1)
    }

    /// Ordered child model ids.
    #[must_use]
    pub fn children(&self) -> Vec<ModelId> {
        self.children.iter().map(|(_, mid)| *mid).collect()
    }

    /// Number of children.
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    // ── Error slot ─────────────────────────────────────────────────

    /// Records a condition on the error slot, overwriting the previous one.
    pub(crate) fn set_issue(&mut self, issue: Issue) {
        self.issue = Some(issue);
    }

    /// The currently recorded condition, if any.
    #[must_use]
    pub fn issue(&self) -> Option<&Issue> {
        self.issue.as_ref()
    }

    /// Takes the recorded condition, clearing the slot.
    pub fn take_issue(&mut self) -> Option<Issue> {
        self.issue.take()
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("id", &self.id)
            .field("source_id", &self.source_id)
            .field("kind", &self.fields.kind)
            .field("name", &self.fields.name)
            .field("children", &self.children.len())
            .field("issue", &self.issue)
            .finish_non_exhaustive()
    }
}
