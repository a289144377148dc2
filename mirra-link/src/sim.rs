//! In-memory simulation backend.
//!
//! [`SimStore`] keeps the full source graph in a single mutex-protected
//! map and invokes subscriber handlers synchronously, inline with the
//! mutating call. This is the backend the test suites run against; it must
//! be observably equivalent to the remote store for any consumer that only
//! speaks the [`SourceLink`] contract.

use crate::error::{LinkError, LinkResult};
use crate::fields::apply_field;
use crate::link::{Backend, BackendMode, EventHandler, SourceLink};
use async_trait::async_trait;
use mirra_types::{ModelId, SourceDiff, SourceEvent, SourceId, Ticket, TicketOp};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// One simulated source record.
struct SimRecord {
    diff: SourceDiff,
    parent: Option<SourceId>,
    /// Ordered child identities, insertion order.
    children: Vec<SourceId>,
    /// Active subscriptions, at most one per requester.
    handlers: Vec<(ModelId, EventHandler)>,
    /// Pending mutations, FIFO.
    tickets: VecDeque<Ticket>,
}

impl SimRecord {
    fn new(diff: SourceDiff, parent: Option<SourceId>) -> Self {
        Self {
            diff,
            parent,
            children: Vec::new(),
            handlers: Vec::new(),
            tickets: VecDeque::new(),
        }
    }
}

/// Deferred notifications, fired only after the store lock is released so
/// a handler can safely call back into the store.
type Pending = Vec<(EventHandler, SourceEvent)>;

fn fire(pending: Pending) {
    for (handler, event) in pending {
        handler(event);
    }
}

/// The in-memory source graph.
pub struct SimStore {
    records: Mutex<HashMap<SourceId, SimRecord>>,
    /// Remaining injected transient faults; consumed by mutating calls.
    faults: AtomicU32,
}

impl SimStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            faults: AtomicU32::new(0),
        }
    }

    /// Arms the next `n` mutating calls to fail with a transient
    /// [`LinkError::Backend`]. Test hook for retry paths.
    pub fn fail_next_writes(&self, n: u32) {
        self.faults.store(n, Ordering::SeqCst);
    }

    fn take_fault(&self) -> bool {
        self.faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SourceId, SimRecord>> {
        self.records.lock().expect("sim store lock poisoned")
    }

    // ── Inspection (used by tests and by the engine's own suites) ──

    /// Whether a record exists.
    pub fn exists(&self, id: SourceId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Snapshot of a record's current fields.
    pub fn diff_of(&self, id: SourceId) -> Option<SourceDiff> {
        self.lock().get(&id).map(|r| r.diff.clone())
    }

    /// Ordered child identities of a record.
    pub fn children_of(&self, id: SourceId) -> Vec<SourceId> {
        self.lock()
            .get(&id)
            .map(|r| r.children.clone())
            .unwrap_or_default()
    }

    /// Number of tickets still queued on a record.
    pub fn queued_tickets(&self, id: SourceId) -> usize {
        self.lock().get(&id).map(|r| r.tickets.len()).unwrap_or(0)
    }

    // ── Mutations ──────────────────────────────────────────────────

    fn create(&self, parent: Option<SourceId>, diff: SourceDiff) -> LinkResult<()> {
        if self.take_fault() {
            return Err(LinkError::Backend("injected fault".into()));
        }
        let mut pending = Pending::new();
        {
            let mut records = self.lock();
            if let Some(pid) = parent {
                let Some(p) = records.get_mut(&pid) else {
                    return Err(LinkError::EntityMissing(pid));
                };
                p.children.push(diff.source_id);
                for (_, h) in &p.handlers {
                    pending.push((h.clone(), SourceEvent::ChildAdded(diff.clone())));
                }
            }
            debug!(source = %diff.source_id, kind = %diff.kind, "sim: create source");
            records.insert(diff.source_id, SimRecord::new(diff, parent));
        }
        fire(pending);
        Ok(())
    }

    fn set_field(&self, id: SourceId, field: &str, value: Value) -> LinkResult<()> {
        if self.take_fault() {
            return Err(LinkError::Backend("injected fault".into()));
        }
        let mut pending = Pending::new();
        {
            let mut records = self.lock();
            let Some(rec) = records.get_mut(&id) else {
                return Err(LinkError::EntityMissing(id));
            };
            apply_field(&mut rec.diff, field, value).map_err(LinkError::InvalidField)?;
            for (_, h) in &rec.handlers {
                pending.push((h.clone(), SourceEvent::Modified(rec.diff.clone())));
            }
        }
        fire(pending);
        Ok(())
    }

    fn has_handler(&self, id: SourceId, requester: ModelId) -> bool {
        self.lock()
            .get(&id)
            .is_some_and(|r| r.handlers.iter().any(|(m, _)| *m == requester))
    }

    fn set_handler(
        &self,
        id: SourceId,
        requester: ModelId,
        handler: EventHandler,
    ) -> LinkResult<()> {
        if self.take_fault() {
            return Err(LinkError::Backend("injected fault".into()));
        }
        let mut pending = Pending::new();
        {
            let mut records = self.lock();
            let Some(rec) = records.get_mut(&id) else {
                return Err(LinkError::EntityMissing(id));
            };
            if rec.handlers.iter().any(|(m, _)| *m == requester) {
                return Err(LinkError::AlreadySubscribed);
            }
            // Initial snapshot for the new subscriber only.
            pending.push((handler.clone(), SourceEvent::Added(rec.diff.clone())));
            rec.handlers.push((requester, handler));
        }
        fire(pending);
        Ok(())
    }

    fn remove_handler(&self, id: SourceId, requester: ModelId) {
        if let Some(rec) = self.lock().get_mut(&id) {
            rec.handlers.retain(|(m, _)| *m != requester);
        }
    }

    fn insert_ticket(&self, id: SourceId, ticket: Ticket) -> LinkResult<()> {
        let mut records = self.lock();
        let Some(rec) = records.get_mut(&id) else {
            return Err(LinkError::EntityMissing(id));
        };
        rec.tickets.push_back(ticket);
        Ok(())
    }

    fn process_tickets(&self, id: SourceId) -> LinkResult<usize> {
        let mut pending = Pending::new();
        let mut applied = 0;
        let result = (|| {
            let mut records = self.lock();
            loop {
                let Some(rec) = records.get_mut(&id) else {
                    return Err(LinkError::EntityMissing(id));
                };
                let Some(ticket) = rec.tickets.pop_front() else {
                    return Ok(applied);
                };
                if self.take_fault() {
                    // Transient: the ticket stays queued for the next flush.
                    if let Some(rec) = records.get_mut(&id) {
                        rec.tickets.push_front(ticket);
                    }
                    return Err(LinkError::Backend("injected fault".into()));
                }
                let target = ticket.source_id;
                let Some(target_rec) = records.get_mut(&target) else {
                    // Terminal: the target is gone, the ticket dies with it.
                    debug!(ticket = %ticket.id, %target, "sim: dropping ticket for missing target");
                    return Err(LinkError::EntityMissing(target));
                };
                let TicketOp::SetField { field, value } = ticket.op;
                apply_field(&mut target_rec.diff, &field, value).map_err(LinkError::InvalidField)?;
                for (_, h) in &target_rec.handlers {
                    pending.push((h.clone(), SourceEvent::Modified(target_rec.diff.clone())));
                }
                applied += 1;
            }
        })();
        fire(pending);
        result
    }

    fn remove(&self, id: SourceId) -> LinkResult<()> {
        if self.take_fault() {
            return Err(LinkError::Backend("injected fault".into()));
        }
        let mut pending = Pending::new();
        {
            let mut records = self.lock();
            if !records.contains_key(&id) {
                return Err(LinkError::EntityMissing(id));
            }

            // Detach from the parent and notify its subscribers.
            let parent = records.get(&id).and_then(|r| r.parent);
            let removed_diff = records.get(&id).map(|r| r.diff.clone());
            if let (Some(pid), Some(diff)) = (parent, removed_diff) {
                if let Some(p) = records.get_mut(&pid) {
                    p.children.retain(|c| *c != id);
                    for (_, h) in &p.handlers {
                        pending.push((h.clone(), SourceEvent::ChildRemoved(diff.clone())));
                    }
                }
            }

            // Pre-order deletion of the whole subtree; every record's own
            // subscribers observe `Removed`.
            let mut order = Vec::new();
            collect_subtree(&records, id, &mut order);
            for rid in order {
                if let Some(rec) = records.remove(&rid) {
                    for (_, h) in rec.handlers {
                        pending.push((h, SourceEvent::Removed));
                    }
                }
            }
            debug!(source = %id, "sim: removed source subtree");
        }
        fire(pending);
        Ok(())
    }
}

impl Default for SimStore {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_subtree(records: &HashMap<SourceId, SimRecord>, id: SourceId, out: &mut Vec<SourceId>) {
    out.push(id);
    if let Some(rec) = records.get(&id) {
        for child in &rec.children {
            collect_subtree(records, *child, out);
        }
    }
}

/// A link bound to one record of a [`SimStore`].
pub struct SimLink {
    store: Arc<SimStore>,
    source_id: SourceId,
}

impl SimLink {
    /// Creates a link to the given record.
    #[must_use]
    pub fn new(store: Arc<SimStore>, source_id: SourceId) -> Self {
        Self { store, source_id }
    }
}

#[async_trait]
impl SourceLink for SimLink {
    fn source_id(&self) -> SourceId {
        self.source_id
    }

    async fn set_field(&self, field: &str, value: Value) -> LinkResult<()> {
        self.store.set_field(self.source_id, field, value)
    }

    async fn has_handler(&self, requester: ModelId) -> bool {
        self.store.has_handler(self.source_id, requester)
    }

    async fn set_handler(&self, requester: ModelId, handler: EventHandler) -> LinkResult<()> {
        self.store.set_handler(self.source_id, requester, handler)
    }

    async fn remove_handler(&self, requester: ModelId) -> LinkResult<()> {
        self.store.remove_handler(self.source_id, requester);
        Ok(())
    }

    async fn insert_ticket(&self, ticket: Ticket) -> LinkResult<()> {
        self.store.insert_ticket(self.source_id, ticket)
    }

    async fn process_tickets(&self) -> LinkResult<usize> {
        self.store.process_tickets(self.source_id)
    }

    async fn remove(&self) -> LinkResult<()> {
        self.store.remove(self.source_id)
    }
}

/// Backend factory over a shared [`SimStore`].
pub struct SimBackend {
    store: Arc<SimStore>,
}

impl SimBackend {
    /// Wraps a store.
    #[must_use]
    pub fn new(store: Arc<SimStore>) -> Self {
        Self { store }
    }

    /// The underlying store, for test inspection.
    #[must_use]
    pub fn store(&self) -> &Arc<SimStore> {
        &self.store
    }
}

#[async_trait]
impl Backend for SimBackend {
    fn mode(&self) -> BackendMode {
        BackendMode::Simulated
    }

    async fn create_source(&self, parent: Option<SourceId>, diff: SourceDiff) -> LinkResult<()> {
        self.store.create(parent, diff)
    }

    fn link(&self, source_id: SourceId) -> Arc<dyn SourceLink> {
        Arc::new(SimLink::new(self.store.clone(), source_id))
    }
}
