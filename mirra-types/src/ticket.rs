//! Mutation tickets.
//!
//! A ticket is a queued, not-yet-applied remote mutation. Inserting one is
//! always a local operation; the actual remote write happens when the link
//! flushes its queue, so local edits never block on the backend.

use crate::{Location, SourceId, TicketId};
use serde::{Deserialize, Serialize};

/// The mutation a ticket performs when flushed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum TicketOp {
    /// Overwrite a single named field with a JSON value.
    SetField {
        field: String,
        value: serde_json::Value,
    },
}

/// A queued pending mutation against one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    /// Correlation id, stamped at creation.
    pub id: TicketId,
    /// The source the mutation targets.
    pub source_id: SourceId,
    /// What to do when flushed.
    pub op: TicketOp,
}

impl Ticket {
    /// Creates a ticket overwriting an arbitrary field.
    #[must_use]
    pub fn set_field(
        source_id: SourceId,
        field: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        Self {
            id: TicketId::new(),
            source_id,
            op: TicketOp::SetField {
                field: field.into(),
                value,
            },
        }
    }

    /// Creates a rename ticket.
    #[must_use]
    pub fn rename(source_id: SourceId, name: impl Into<String>) -> Self {
        Self::set_field(source_id, "name", serde_json::Value::String(name.into()))
    }

    /// Creates a relocation ticket.
    #[must_use]
    pub fn relocate(source_id: SourceId, location: Location) -> Self {
        let value = serde_json::to_value(location).unwrap_or(serde_json::Value::Null);
        Self::set_field(source_id, "location", value)
    }
}
