//! Remote document-store backend.
//!
//! [`RemoteStore`] is the client-facing surface of the real backend: a
//! document-style store whose change notifications arrive as server pushes,
//! scoped per record. Each subscription owns an unbounded channel and a
//! pump task that forwards events to the handler, preserving per-record
//! order. Transport and persistence behind this surface are out of scope.
//!
//! [`RemoteLink`] layers the bounded retry/deadline policy from
//! [`LinkConfig`] on top: subscription setup retries transient failures,
//! and ticket flushes run under a timeout instead of hanging on a stalled
//! store.

use crate::config::LinkConfig;
use crate::error::{LinkError, LinkResult};
use crate::fields::apply_field;
use crate::link::{Backend, BackendMode, EventHandler, SourceLink};
use async_trait::async_trait;
use mirra_types::{ModelId, SourceDiff, SourceEvent, SourceId, Ticket, TicketOp};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One record as seen by the client.
struct RemoteRecord {
    diff: SourceDiff,
    parent: Option<SourceId>,
    children: Vec<SourceId>,
    /// Push channels, at most one per requester.
    subscribers: Vec<(ModelId, mpsc::UnboundedSender<SourceEvent>)>,
    tickets: VecDeque<Ticket>,
}

impl RemoteRecord {
    fn new(diff: SourceDiff, parent: Option<SourceId>) -> Self {
        Self {
            diff,
            parent,
            children: Vec::new(),
            subscribers: Vec::new(),
            tickets: VecDeque::new(),
        }
    }

    /// Pushes an event to every live subscriber, pruning closed channels.
    fn notify(&mut self, event: &SourceEvent) {
        self.subscribers
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }
}

/// Client surface of the remote document store.
pub struct RemoteStore {
    records: Mutex<HashMap<SourceId, RemoteRecord>>,
    /// Remaining injected transient faults; consumed by mutating calls.
    faults: AtomicU32,
}

impl RemoteStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            faults: AtomicU32::new(0),
        }
    }

    /// Arms the next `n` mutating calls to fail transiently. Test hook.
    pub fn fail_next_writes(&self, n: u32) {
        self.faults.store(n, Ordering::SeqCst);
    }

    fn take_fault(&self) -> bool {
        self.faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SourceId, RemoteRecord>> {
        self.records.lock().expect("remote store lock poisoned")
    }

    // ── Inspection ─────────────────────────────────────────────────

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
        let mut records = self.lock();
        if let Some(pid) = parent {
            let Some(p) = records.get_mut(&pid) else {
                return Err(LinkError::EntityMissing(pid));
            };
            p.children.push(diff.source_id);
            p.notify(&SourceEvent::ChildAdded(diff.clone()));
        }
        debug!(source = %diff.source_id, kind = %diff.kind, "remote: create source");
        records.insert(diff.source_id, RemoteRecord::new(diff, parent));
        Ok(())
    }

    fn set_field(&self, id: SourceId, field: &str, value: Value) -> LinkResult<()> {
        if self.take_fault() {
            return Err(LinkError::Backend("injected fault".into()));
        }
        let mut records = self.lock();
        let Some(rec) = records.get_mut(&id) else {
            return Err(LinkError::EntityMissing(id));
        };
        apply_field(&mut rec.diff, field, value).map_err(LinkError::InvalidField)?;
        let event = SourceEvent::Modified(rec.diff.clone());
        rec.notify(&event);
        Ok(())
    }

    fn has_handler(&self, id: SourceId, requester: ModelId) -> bool {
        self.lock()
            .get(&id)
            .is_some_and(|r| r.subscribers.iter().any(|(m, _)| *m == requester))
    }

    fn subscribe(&self, id: SourceId, requester: ModelId, handler: EventHandler) -> LinkResult<()> {
        if self.take_fault() {
            return Err(LinkError::Backend("injected fault".into()));
        }
        let mut records = self.lock();
        let Some(rec) = records.get_mut(&id) else {
            return Err(LinkError::EntityMissing(id));
        };
        if rec.subscribers.iter().any(|(m, _)| *m == requester) {
            return Err(LinkError::AlreadySubscribed);
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<SourceEvent>();
        // Initial snapshot, then the live stream, all through one channel
        // so per-record order is preserved.
        tx.send(SourceEvent::Added(rec.diff.clone()))
            .map_err(|_| LinkError::ChannelClosed)?;
        rec.subscribers.push((requester, tx));

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handler(event);
            }
            debug!(source = %id, %requester, "remote: push channel drained");
        });
        Ok(())
    }

    fn remove_handler(&self, id: SourceId, requester: ModelId) {
        if let Some(rec) = self.lock().get_mut(&id) {
            // Dropping the sender lets the pump finish delivering what was
            // already pushed, then exit.
            rec.subscribers.retain(|(m, _)| *m != requester);
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
        let mut records = self.lock();
        let mut applied = 0;
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
                warn!(ticket = %ticket.id, %target, "remote: dropping ticket for missing target");
                return Err(LinkError::EntityMissing(target));
            };
            let TicketOp::SetField { field, value } = ticket.op;
            apply_field(&mut target_rec.diff, &field, value).map_err(LinkError::InvalidField)?;
            let event = SourceEvent::Modified(target_rec.diff.clone());
            target_rec.notify(&event);
            applied += 1;
        }
    }

    fn remove(&self, id: SourceId) -> LinkResult<()> {
        if self.take_fault() {
            return Err(LinkError::Backend("injected fault".into()));
        }
        let mut records = self.lock();
        if !records.contains_key(&id) {
            return Err(LinkError::EntityMissing(id));
        }

        let parent = records.get(&id).and_then(|r| r.parent);
        let removed_diff = records.get(&id).map(|r| r.diff.clone());
        if let (Some(pid), Some(diff)) = (parent, removed_diff) {
            if let Some(p) = records.get_mut(&pid) {
                p.children.retain(|c| *c != id);
                p.notify(&SourceEvent::ChildRemoved(diff));
            }
        }

        let mut order = Vec::new();
        collect_subtree(&records, id, &mut order);
        for rid in order {
            if let Some(mut rec) = records.remove(&rid) {
                rec.notify(&SourceEvent::Removed);
            }
        }
        debug!(source = %id, "remote: removed source subtree");
        Ok(())
    }
}

impl Default for RemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_subtree(
    records: &HashMap<SourceId, RemoteRecord>,
    id: SourceId,
    out: &mut Vec<SourceId>,
) {
    out.push(id);
    if let Some(rec) = records.get(&id) {
        for child in &rec.children {
            collect_subtree(records, *child, out);
        }
    }
}

/// A link bound to one record of a [`RemoteStore`].
pub struct RemoteLink {
    store: Arc<RemoteStore>,
    source_id: SourceId,
    config: LinkConfig,
}

impl RemoteLink {
    /// Creates a link to the given record.
    #[must_use]
    pub fn new(store: Arc<RemoteStore>, source_id: SourceId, config: LinkConfig) -> Self {
        Self {
            store,
            source_id,
            config,
        }
    }
}

#[async_trait]
impl SourceLink for RemoteLink {
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
        let mut attempt = 0;
        loop {
            match self
                .store
                .subscribe(self.source_id, requester, handler.clone())
            {
                Err(LinkError::Backend(e)) if attempt < self.config.subscribe_retries => {
                    attempt += 1;
                    warn!(
                        source = %self.source_id,
                        attempt, "transient subscribe failure, retrying: {e}"
                    );
                    tokio::time::sleep(Duration::from_millis(
                        self.config.retry_backoff_ms * u64::from(attempt),
                    ))
                    .await;
                }
                other => return other,
            }
        }
    }

    async fn remove_handler(&self, requester: ModelId) -> LinkResult<()> {
        self.store.remove_handler(self.source_id, requester);
        Ok(())
    }

    async fn insert_ticket(&self, ticket: Ticket) -> LinkResult<()> {
        self.store.insert_ticket(self.source_id, ticket)
    }

    async fn process_tickets(&self) -> LinkResult<usize> {
        let store = self.store.clone();
        let id = self.source_id;
        let deadline = Duration::from_millis(self.config.flush_timeout_ms);
        match tokio::time::timeout(deadline, async move { store.process_tickets(id) }).await {
            Ok(result) => result,
            Err(_) => Err(LinkError::Timeout),
        }
    }

    async fn remove(&self) -> LinkResult<()> {
        self.store.remove(self.source_id)
    }
}

/// Backend factory over a shared [`RemoteStore`].
pub struct RemoteBackend {
    store: Arc<RemoteStore>,
    config: LinkConfig,
}

impl RemoteBackend {
    /// Wraps a store with the given link policy.
    #[must_use]
    pub fn new(store: Arc<RemoteStore>, config: LinkConfig) -> Self {
        Self { store, config }
    }

    /// The underlying store, for test inspection.
    #[must_use]
    pub fn store(&self) -> &Arc<RemoteStore> {
        &self.store
    }
}

#[async_trait]
impl Backend for RemoteBackend {
    fn mode(&self) -> BackendMode {
        BackendMode::Remote
    }

    async fn create_source(&self, parent: Option<SourceId>, diff: SourceDiff) -> LinkResult<()> {
        self.store.create(parent, diff)
    }

    fn link(&self, source_id: SourceId) -> Arc<dyn SourceLink> {
        Arc::new(RemoteLink::new(
            self.store.clone(),
            source_id,
            self.config.clone(),
        ))
    }
}
