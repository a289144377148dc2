//! Change events pushed from a source to its subscribers.
//!
//! Events are the unit of replication: each one describes what changed
//! remotely and carries the snapshot needed to apply that change locally.
//! Per-source delivery order is preserved by both backends; an updater
//! drains them strictly FIFO.

use crate::SourceDiff;
use serde::{Deserialize, Serialize};

/// A change observed on a subscribed source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "diff")]
pub enum SourceEvent {
    /// Initial snapshot, delivered once right after a subscription is
    /// established. Applied like [`SourceEvent::Modified`].
    Added(SourceDiff),
    /// The source's own fields changed.
    Modified(SourceDiff),
    /// The source was deleted. Carries no diff; there is nothing left to
    /// snapshot.
    Removed,
    /// A child record was created under this source.
    ChildAdded(SourceDiff),
    /// A child record was deleted from under this source.
    ChildRemoved(SourceDiff),
}

impl SourceEvent {
    /// The snapshot carried by this event, if any.
    #[must_use]
    pub fn diff(&self) -> Option<&SourceDiff> {
        match self {
            Self::Added(d) | Self::Modified(d) | Self::ChildAdded(d) | Self::ChildRemoved(d) => {
                Some(d)
            }
            Self::Removed => None,
        }
    }

    /// Short tag for logging.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Added(_) => "added",
            Self::Modified(_) => "modified",
            Self::Removed => "removed",
            Self::ChildAdded(_) => "child-added",
            Self::ChildRemoved(_) => "child-removed",
        }
    }
}
