//! Core type definitions for Mirra.
//!
//! This crate defines the fundamental, kind-agnostic types shared by the
//! link layer and the replica engine:
//! - Model, source and ticket identifiers (random UUID v4 tokens)
//! - [`SourceDiff`]: the immutable field snapshot carried by events
//! - [`SourceEvent`]: the change events pushed to subscribers
//! - [`Ticket`]: queued, not-yet-applied remote mutations
//! - [`Issue`]: the error-slot type recorded on models
//!
//! Domain-specific semantics (naming rules, per-kind validation, workflow
//! editing) live with the consumers, not here.

mod diff;
mod event;
mod ids;
mod issue;
mod ticket;

pub use diff::{now_ms, Location, SourceDiff};
pub use event::SourceEvent;
pub use ids::{ModelId, SourceId, TicketId};
pub use issue::Issue;
pub use ticket::{Ticket, TicketOp};
