//! The engine: consumer surface and apply loop.
//!
//! All model state lives behind one async lock: a single cooperative
//! scheduling domain. Drains never suspend, so every synchronous mutation
//! section between suspension points is atomic. Every method that resumes
//! after an `.await` into the link re-acquires the lock and re-checks
//! existence before mutating; concurrent deletion during the suspension
//! is an expected outcome, not a defect.
//!
//! Consumer-facing actions are uniformly non-failing: guard and backend
//! failures are recorded on the owning model's issue slot and the call
//! returns normally. Only setup actions (which have no owning model yet)
//! return an error.

use crate::error::EngineResult;
use crate::model::{Model, ModelConfig, ModelFields, ModelInput, UpdateCallback};
use crate::registry::Registry;
use crate::updater::{UpdateReport, Updater};
use mirra_link::{Backend, BackendMode, LinkError, SourceLink};
use mirra_types::{Issue, Location, ModelId, SourceDiff, SourceEvent, SourceId, Ticket};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Engine-level policy knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on pushed names; longer staged names fail validation.
    pub max_name_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_name_len: 120 }
    }
}

/// Mutable engine state, guarded by one lock.
struct EngineInner {
    registry: Registry,
    updaters: HashMap<ModelId, Updater>,
    /// Links are created lazily, once per model, and cached.
    links: HashMap<ModelId, Arc<dyn SourceLink>>,
}

/// The replica engine. One instance per backend connection; all entity
/// kinds share it.
pub struct Engine {
    backend: Arc<dyn Backend>,
    config: EngineConfig,
    inner: Arc<RwLock<EngineInner>>,
}

impl Engine {
    /// Creates an engine over an injected backend.
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, config: EngineConfig) -> Self {
        Self {
            backend,
            config,
            inner: Arc::new(RwLock::new(EngineInner {
                registry: Registry::new(),
                updaters: HashMap::new(),
                links: HashMap::new(),
            })),
        }
    }

    /// Which backend this engine was constructed against.
    #[must_use]
    pub fn mode(&self) -> BackendMode {
        self.backend.mode()
    }

    // ── Setup actions ──────────────────────────────────────────────

    /// Creates a new root source remotely and its local model.
    pub async fn create_root(&self, diff: SourceDiff) -> EngineResult<ModelId> {
        self.backend.create_source(None, diff.clone()).await?;

        let mut inner = self.inner.write().await;
        let model = Model::new(ModelConfig::root(self.backend.clone()), &diff);
        let id = inner.install(model)?;
        debug!(model = %id, source = %diff.source_id, "created root model");
        Ok(id)
    }

    /// Creates a new child source under the given parent.
    ///
    /// The local child model always materializes through the parent's
    /// updater applying `ChildAdded`: when the parent holds a live
    /// subscription the backend pushes the event; otherwise it is echoed
    /// into the queue here. Either way the caller drives `update(parent)`
    /// to observe the child. Failures land on the parent's issue slot.
    pub async fn create_child(&self, parent: ModelId, diff: SourceDiff) {
        let Some(link) = self.link_for(parent).await else {
            debug!(model = %parent, "create_child on unknown parent");
            return;
        };

        let result = self
            .backend
            .create_source(Some(link.source_id()), diff.clone())
            .await;
        let subscribed = link.has_handler(parent).await;

        // Deletion may have raced the create; re-check before mutating.
        let mut inner = self.inner.write().await;
        if !inner.registry.exists(parent) {
            debug!(model = %parent, "parent deleted mid-flight");
            return;
        }
        match result {
            Ok(()) => {
                if !subscribed {
                    if let Some(updater) = inner.updaters.get(&parent) {
                        updater.enqueue(SourceEvent::ChildAdded(diff));
                    }
                }
            }
            Err(e) => {
                warn!(model = %parent, "create_child failed: {e}");
                if let Some(model) = inner.registry.resolve_mut(parent) {
                    model.set_issue(Issue::unknown("create child", e));
                }
            }
        }
    }

    // ── Subscription ───────────────────────────────────────────────

    /// Subscribes the model to its source's events. The handler enqueues
    /// onto the model's updater; the initial `Added` snapshot is queued
    /// immediately, so a following `update()` refreshes the mirror.
    pub async fn start_updating(&self, id: ModelId) {
        let Some(link) = self.link_for(id).await else {
            debug!(model = %id, "start_updating on unknown model");
            return;
        };
        let handler = {
            let inner = self.inner.read().await;
            match inner.updaters.get(&id) {
                Some(updater) => updater.handler(),
                None => return,
            }
        };

        let result = link.set_handler(id, handler).await;

        let mut inner = self.inner.write().await;
        let Some(model) = inner.registry.resolve_mut(id) else {
            debug!(model = %id, "model deleted mid-flight during subscribe");
            return;
        };
        match result {
            Ok(()) => debug!(model = %id, "subscription established"),
            Err(LinkError::AlreadySubscribed) => model.set_issue(Issue::AlreadySubscribed),
            Err(LinkError::EntityMissing(_)) => model.set_issue(Issue::EntityDeleted),
            Err(e) => model.set_issue(Issue::unknown("subscribe", e)),
        }
    }

    /// Drops the model's subscription. Idempotent.
    pub async fn stop_updating(&self, id: ModelId) {
        if let Some(link) = self.link_for(id).await {
            let _ = link.remove_handler(id).await;
        }
    }

    // ── Staged input ───────────────────────────────────────────────

    /// Stages a name edit. Local only; nothing is pushed yet.
    pub async fn set_name_input(&self, id: ModelId, name: impl Into<String>) {
        let mut inner = self.inner.write().await;
        if let Some(model) = inner.registry.resolve_mut(id) {
            model.input.name = Some(name.into());
        }
    }

    /// Stages a location edit.
    pub async fn set_location_input(&self, id: ModelId, location: Location) {
        let mut inner = self.inner.write().await;
        if let Some(model) = inner.registry.resolve_mut(id) {
            model.input.location = Some(location);
        }
    }

    /// Stages a kind-specific payload edit.
    pub async fn set_data_input(&self, id: ModelId, data: Value) {
        let mut inner = self.inner.write().await;
        if let Some(model) = inner.registry.resolve_mut(id) {
            model.input.data = Some(data);
        }
    }

    // ── Push actions (ticket protocol) ─────────────────────────────

    /// Pushes the staged name: validate, queue a rename ticket, flush.
    /// The staged field clears on success; the mirror refreshes only when
    /// the matching `Modified` event is drained.
    pub async fn push_name(&self, id: ModelId) {
        let ticket = {
            let mut inner = self.inner.write().await;
            let Some(model) = inner.registry.resolve_mut(id) else {
                return;
            };
            match model.input.name.as_deref() {
                None => {
                    model.set_issue(Issue::Validation("no name staged".into()));
                    return;
                }
                Some(name) if name.trim().is_empty() => {
                    model.set_issue(Issue::Validation("name must not be empty".into()));
                    return;
                }
                Some(name) if name.len() > self.config.max_name_len => {
                    model.set_issue(Issue::Validation(format!(
                        "name exceeds {} characters",
                        self.config.max_name_len
                    )));
                    return;
                }
                Some(name) => Ticket::rename(model.source_id(), name),
            }
        };
        self.flush_ticket(id, ticket, "push name", |input| input.name = None)
            .await;
    }

    /// Pushes the staged location.
    pub async fn push_location(&self, id: ModelId) {
        let ticket = {
            let inner = self.inner.read().await;
            let Some(model) = inner.registry.resolve(id) else {
                return;
            };
            match model.input.location {
                None => {
                    drop(inner);
                    let mut inner = self.inner.write().await;
                    if let Some(model) = inner.registry.resolve_mut(id) {
                        model.set_issue(Issue::Validation("no location staged".into()));
                    }
                    return;
                }
                Some(location) => Ticket::relocate(model.source_id(), location),
            }
        };
        self.flush_ticket(id, ticket, "push location", |input| input.location = None)
            .await;
    }

    /// Pushes the staged kind-specific payload.
    pub async fn push_data(&self, id: ModelId) {
        let ticket = {
            let inner = self.inner.read().await;
            let Some(model) = inner.registry.resolve(id) else {
                return;
            };
            match model.input.data.clone() {
                None => {
                    drop(inner);
                    let mut inner = self.inner.write().await;
                    if let Some(model) = inner.registry.resolve_mut(id) {
                        model.set_issue(Issue::Validation("no data staged".into()));
                    }
                    return;
                }
                Some(data) => Ticket::set_field(model.source_id(), "data", data),
            }
        };
        self.flush_ticket(id, ticket, "push data", |input| input.data = None)
            .await;
    }

    /// Queues one ticket and flushes the link. Shared tail of the push
    /// actions: record failure on the issue slot, clear the staged field
    /// on success, always after re-checking existence.
    async fn flush_ticket(
        &self,
        id: ModelId,
        ticket: Ticket,
        context: &str,
        clear: impl FnOnce(&mut ModelInput),
    ) {
        let Some(link) = self.link_for(id).await else {
            return;
        };
        let result = async {
            link.insert_ticket(ticket).await?;
            link.process_tickets().await
        }
        .await;

        let mut inner = self.inner.write().await;
        let Some(model) = inner.registry.resolve_mut(id) else {
            debug!(model = %id, "model deleted mid-flight during {context}");
            return;
        };
        match result {
            Ok(applied) => {
                debug!(model = %id, applied, "{context} flushed");
                clear(&mut model.input);
            }
            Err(e) => {
                warn!(model = %id, "{context} failed: {e}");
                model.set_issue(Issue::unknown(context, e));
            }
        }
    }

    // ── Removal ────────────────────────────────────────────────────

    /// Deletes the remote record, then drains the resulting `Removed`
    /// event, cascading deletion of the model and all its descendants.
    /// Deterministic on both backends: if no pushed `Removed` is queued
    /// yet, one is echoed locally before the final drain. The backend
    /// notifies the parent's subscribers; when the parent holds no live
    /// subscription the `ChildRemoved` is echoed into its updater here,
    /// mirroring `create_child`; the parent's entry goes away on its
    /// next `update()`.
    pub async fn remove(&self, id: ModelId) {
        let Some(link) = self.link_for(id).await else {
            return;
        };
        let parent = {
            let inner = self.inner.read().await;
            inner.registry.resolve(id).and_then(|m| m.config().parent)
        };
        let result = link.remove().await;

        let parent_subscribed = match parent {
            Some(pid) => match self.link_for(pid).await {
                Some(parent_link) => parent_link.has_handler(pid).await,
                None => false,
            },
            None => false,
        };

        {
            let mut inner = self.inner.write().await;
            if !inner.registry.exists(id) {
                return;
            }
            match result {
                // Already gone remotely still means gone.
                Ok(()) | Err(LinkError::EntityMissing(_)) => {
                    if let Some(pid) = parent {
                        if !parent_subscribed && inner.registry.exists(pid) {
                            let diff = inner.registry.resolve(id).map(Model::snapshot);
                            if let (Some(diff), Some(updater)) = (diff, inner.updaters.get(&pid)) {
                                updater.enqueue(SourceEvent::ChildRemoved(diff));
                            }
                        }
                    }
                    if let Some(updater) = inner.updaters.get(&id) {
                        if !updater.has_removed_queued() {
                            updater.enqueue(SourceEvent::Removed);
                        }
                    }
                }
                Err(e) => {
                    warn!(model = %id, "remove failed: {e}");
                    if let Some(model) = inner.registry.resolve_mut(id) {
                        model.set_issue(Issue::unknown("remove", e));
                    }
                    return;
                }
            }
        }
        self.update(id).await;
    }

    // ── Apply loop ─────────────────────────────────────────────────

    /// Drains the model's queue FIFO, then fires the post-update callback
    /// once. Non-failing; the report says what happened.
    pub async fn update(&self, id: ModelId) -> UpdateReport {
        let (report, callback) = {
            let mut inner = self.inner.write().await;
            inner.drain(id)
        };
        debug!(
            model = %id,
            applied = report.applied,
            halted = ?report.halted,
            "update"
        );
        if let Some(cb) = callback {
            cb(id);
        }
        report
    }

    // ── Observation ────────────────────────────────────────────────

    /// Whether a model is still registered.
    pub async fn exists(&self, id: ModelId) -> bool {
        self.inner.read().await.registry.exists(id)
    }

    /// Snapshot of the mirrored fields.
    pub async fn fields(&self, id: ModelId) -> Option<ModelFields> {
        let inner = self.inner.read().await;
        inner.registry.resolve(id).map(|m| m.fields().clone())
    }

    /// Snapshot of the staged input.
    pub async fn input(&self, id: ModelId) -> Option<ModelInput> {
        let inner = self.inner.read().await;
        inner.registry.resolve(id).map(|m| m.input().clone())
    }

    /// The source identity a model mirrors.
    pub async fn source_id(&self, id: ModelId) -> Option<SourceId> {
        let inner = self.inner.read().await;
        inner.registry.resolve(id).map(Model::source_id)
    }

    /// Ordered child model ids.
    pub async fn children(&self, id: ModelId) -> Vec<ModelId> {
        let inner = self.inner.read().await;
        inner
            .registry
            .resolve(id)
            .map(|m| m.children())
            .unwrap_or_default()
    }

    /// Number of children.
    pub async fn child_count(&self, id: ModelId) -> usize {
        let inner = self.inner.read().await;
        inner.registry.resolve(id).map(Model::child_count).unwrap_or(0)
    }

    /// The condition recorded on the error slot, if any.
    pub async fn issue(&self, id: ModelId) -> Option<Issue> {
        let inner = self.inner.read().await;
        inner.registry.resolve(id).and_then(|m| m.issue().cloned())
    }

    /// Takes and clears the recorded condition.
    pub async fn take_issue(&self, id: ModelId) -> Option<Issue> {
        let mut inner = self.inner.write().await;
        inner.registry.resolve_mut(id).and_then(Model::take_issue)
    }

    /// Registers the post-update callback, replacing any previous one.
    pub async fn set_callback(&self, id: ModelId, callback: UpdateCallback) {
        let mut inner = self.inner.write().await;
        if let Some(model) = inner.registry.resolve_mut(id) {
            model.callback = Some(callback);
        }
    }

    /// Number of live models across all kinds.
    pub async fn model_count(&self) -> usize {
        self.inner.read().await.registry.len()
    }

    /// Returns (and caches) the link bound to a model's source.
    async fn link_for(&self, id: ModelId) -> Option<Arc<dyn SourceLink>> {
        let mut inner = self.inner.write().await;
        if let Some(link) = inner.links.get(&id) {
            return Some(link.clone());
        }
        let model = inner.registry.resolve(id)?;
        let link = model.config().backend.link(model.source_id());
        inner.links.insert(id, link.clone());
        Some(link)
    }
}

impl EngineInner {
    /// Registers a model and wires up its updater.
    fn install(&mut self, model: Model) -> EngineResult<ModelId> {
        let id = self.registry.register(model)?;
        self.updaters.insert(id, Updater::new(id));
        Ok(id)
    }

    /// One `update()` call: drain FIFO until the queue empties, the owner
    /// disappears, or a guard fails fast.
    fn drain(&mut self, id: ModelId) -> (UpdateReport, Option<UpdateCallback>) {
        let mut applied = 0usize;
        loop {
            // Deletion may have happened before this call or between
            // events of this drain; either way stop here and discard the
            // rest. The next externally delivered event starts a fresh
            // drain.
            if !self.registry.exists(id) {
                if let Some(updater) = self.updaters.get(&id) {
                    updater.clear();
                }
                return (UpdateReport::halted(applied, Issue::EntityDeleted), None);
            }
            let Some(event) = self.updaters.get(&id).and_then(|u| u.pop()) else {
                break;
            };
            match event {
                SourceEvent::Added(diff) | SourceEvent::Modified(diff) => {
                    if let Some(model) = self.registry.resolve_mut(id) {
                        model.fields.apply_diff(&diff);
                    }
                    applied += 1;
                }
                SourceEvent::Removed => {
                    let leftover = self.updaters.get(&id).map(Updater::len).unwrap_or(0);
                    self.cascade_delete(id);
                    applied += 1;
                    // Self-deletion ends the drain; anything still queued
                    // is discarded.
                    let report = if leftover > 0 {
                        UpdateReport::halted(applied, Issue::EntityDeleted)
                    } else {
                        UpdateReport::done(applied)
                    };
                    return (report, None);
                }
                SourceEvent::ChildAdded(diff) => {
                    let duplicate = self
                        .registry
                        .resolve(id)
                        .is_some_and(|m| m.child_by_source(diff.source_id).is_some());
                    if duplicate {
                        // Fail fast rather than silently deduplicate: a
                        // duplicate child points at a backend bug.
                        return (self.halt(id, applied, Issue::AlreadyAdded(diff.source_id)), None);
                    }
                    let Some(config) = self.registry.resolve(id).map(|m| m.config().child_of(id))
                    else {
                        continue;
                    };
                    let child = Model::new(config, &diff);
                    let child_id = child.id();
                    match self.registry.register(child) {
                        Ok(_) => {
                            self.updaters.insert(child_id, Updater::new(child_id));
                            if let Some(model) = self.registry.resolve_mut(id) {
                                model.insert_child(diff.source_id, child_id);
                            }
                            applied += 1;
                        }
                        Err(e) => {
                            let issue = Issue::unknown("install child", e);
                            return (self.halt(id, applied, issue), None);
                        }
                    }
                }
                SourceEvent::ChildRemoved(diff) => {
                    let child_id = self
                        .registry
                        .resolve(id)
                        .and_then(|m| m.child_by_source(diff.source_id));
                    match child_id {
                        None => {
                            let issue = Issue::AlreadyRemoved(diff.source_id);
                            return (self.halt(id, applied, issue), None);
                        }
                        Some(child_id) => {
                            if let Some(model) = self.registry.resolve_mut(id) {
                                model.remove_child(diff.source_id);
                            }
                            self.cascade_delete(child_id);
                            applied += 1;
                        }
                    }
                }
            }
        }
        // Normal completion: the callback fires exactly once, coalescing
        // however many events this drain applied.
        let callback = self.registry.resolve(id).and_then(|m| m.callback.clone());
        (UpdateReport::done(applied), callback)
    }

    /// Records a guard failure on the owner, discards the rest of the
    /// drain, and builds the halt report.
    fn halt(&mut self, id: ModelId, applied: usize, issue: Issue) -> UpdateReport {
        warn!(model = %id, %issue, "drain halted");
        if let Some(model) = self.registry.resolve_mut(id) {
            model.set_issue(issue.clone());
        }
        if let Some(updater) = self.updaters.get(&id) {
            updater.clear();
        }
        UpdateReport::halted(applied, issue)
    }

    /// Pre-order deletion of a model and all its descendants, dropping
    /// their updaters and cached links. No tombstones remain.
    fn cascade_delete(&mut self, id: ModelId) {
        let mut order = Vec::new();
        self.collect_subtree(id, &mut order);
        for model_id in order {
            self.updaters.remove(&model_id);
            self.links.remove(&model_id);
            self.registry.unregister(model_id);
        }
        debug!(model = %id, "cascade delete complete");
    }

    fn collect_subtree(&self, id: ModelId, out: &mut Vec<ModelId>) {
        out.push(id);
        if let Some(model) = self.registry.resolve(id) {
            for child_id in model.children() {
                self.collect_subtree(child_id, out);
            }
        }
    }
}
