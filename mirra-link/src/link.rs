//! The source link contract.
//!
//! A link is the only way a model reaches its remote counterpart. The same
//! contract is satisfied by the real document store ([`crate::RemoteLink`])
//! and the in-memory simulation ([`crate::SimLink`]); a consumer cannot
//! tell them apart by observable behavior. The backend is chosen once at
//! construction and injected; there is no per-call-site dispatch.

use crate::error::LinkResult;
use async_trait::async_trait;
use mirra_types::{ModelId, SourceDiff, SourceEvent, SourceId, Ticket};
use serde_json::Value;
use std::sync::Arc;

/// Callback invoked for every event pushed to a subscriber.
///
/// Handlers must be cheap and non-blocking: both backends call them from
/// their notification path (inline for the simulation, from a pump task
/// for the remote store). The engine's handlers only enqueue.
pub type EventHandler = Arc<dyn Fn(SourceEvent) + Send + Sync>;

/// Uniform async facade over one source record, regardless of backend.
#[async_trait]
pub trait SourceLink: Send + Sync {
    /// The identity of the record this link is bound to.
    fn source_id(&self) -> SourceId;

    /// Overwrites a single field on the remote record. Subscribers observe
    /// a matching `Modified` event.
    async fn set_field(&self, field: &str, value: Value) -> LinkResult<()>;

    /// Whether `requester` currently holds a subscription on this record.
    async fn has_handler(&self, requester: ModelId) -> bool;

    /// Registers a handler for this record's events.
    ///
    /// Fails with [`crate::LinkError::EntityMissing`] if the record is
    /// gone, and with [`crate::LinkError::AlreadySubscribed`] if the
    /// requester already holds a handler. The existing handler stays
    /// active, the second one is rejected, never merged. On success the
    /// handler immediately receives an `Added` snapshot of the record.
    async fn set_handler(&self, requester: ModelId, handler: EventHandler) -> LinkResult<()>;

    /// Removes the requester's subscription. Idempotent.
    async fn remove_handler(&self, requester: ModelId) -> LinkResult<()>;

    /// Queues a pending mutation. No remote write happens until the next
    /// flush; fails only if the record itself is already gone.
    async fn insert_ticket(&self, ticket: Ticket) -> LinkResult<()>;

    /// Flushes queued tickets FIFO, returning the number applied.
    ///
    /// A ticket leaves the queue only once its remote write completes,
    /// either successfully or terminally (the record is gone). A transient
    /// failure stops the flush and leaves the remainder queued for the
    /// next call.
    async fn process_tickets(&self) -> LinkResult<usize>;

    /// Deletes the remote record and all its descendants, notifying every
    /// subscriber of every removed record.
    async fn remove(&self) -> LinkResult<()>;
}

/// Which backend a link chain was constructed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendMode {
    /// The real document store with server-push notifications.
    Remote,
    /// The in-memory simulation with inline notifications.
    Simulated,
}

/// Factory for links, selected once at construction and injected into the
/// engine. Models inherit the handle through their ownership chain and
/// never learn which implementation is behind it.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Which backend this is. Carried on model configs for observability.
    fn mode(&self) -> BackendMode;

    /// Creates a new source record, optionally under a parent. The
    /// parent's subscribers observe a matching `ChildAdded` event.
    async fn create_source(&self, parent: Option<SourceId>, diff: SourceDiff) -> LinkResult<()>;

    /// Returns a link bound to the given source.
    fn link(&self, source_id: SourceId) -> Arc<dyn SourceLink>;
}
