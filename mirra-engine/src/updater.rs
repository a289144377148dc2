//! Per-model event queues.
//!
//! Each model owns exactly one [`Updater`]: a FIFO queue its link handler
//! appends to, drained by the engine's apply loop. The handler side only
//! enqueues; it is cheap and lock-scoped, safe to call from the
//! simulation's inline notification path or the remote store's pump task.

use mirra_link::EventHandler;
use mirra_types::{Issue, ModelId, SourceEvent};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::trace;

/// Whether an updater currently has work queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    /// Queue empty.
    Idle,
    /// Queue non-empty; the next `update()` call will drain it.
    Draining,
}

/// The FIFO event queue feeding one model.
pub struct Updater {
    model_id: ModelId,
    queue: Arc<Mutex<VecDeque<SourceEvent>>>,
}

impl Updater {
    /// Creates an empty queue for the given model.
    #[must_use]
    pub fn new(model_id: ModelId) -> Self {
        Self {
            model_id,
            queue: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// The model this queue feeds.
    #[must_use]
    pub fn model_id(&self) -> ModelId {
        self.model_id
    }

    /// Appends an event, preserving arrival order.
    pub fn enqueue(&self, event: SourceEvent) {
        trace!(model = %self.model_id, event = event.label(), "enqueue");
        self.lock().push_back(event);
    }

    /// Pops the earliest queued event.
    pub fn pop(&self) -> Option<SourceEvent> {
        self.lock().pop_front()
    }

    /// Discards everything still queued. Used by the fail-fast halts.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of queued events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Current drain state, derived from queue occupancy.
    #[must_use]
    pub fn state(&self) -> DrainState {
        if self.is_empty() {
            DrainState::Idle
        } else {
            DrainState::Draining
        }
    }

    /// Whether a `Removed` event is already queued. The remove action uses
    /// this to avoid echoing a duplicate alongside a pushed one.
    #[must_use]
    pub fn has_removed_queued(&self) -> bool {
        self.lock().iter().any(|e| matches!(e, SourceEvent::Removed))
    }

    /// A handler that appends every delivered event to this queue. Safe to
    /// hand to either backend; it holds only the queue, not the model.
    #[must_use]
    pub fn handler(&self) -> EventHandler {
        let queue = self.queue.clone();
        let model_id = self.model_id;
        Arc::new(move |event: SourceEvent| {
            trace!(model = %model_id, event = event.label(), "push");
            queue
                .lock()
                .expect("updater queue lock poisoned")
                .push_back(event);
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<SourceEvent>> {
        self.queue.lock().expect("updater queue lock poisoned")
    }
}

/// Outcome of one `update()` call. Non-failing: a halted drain is reported,
/// not thrown, mirroring how guard failures land on the issue slot.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateReport {
    /// Events applied during this drain.
    pub applied: usize,
    /// The guard failure that halted the drain, if any.
    pub halted: Option<Issue>,
}

impl UpdateReport {
    pub(crate) fn done(applied: usize) -> Self {
        Self {
            applied,
            halted: None,
        }
    }

    pub(crate) fn halted(applied: usize, issue: Issue) -> Self {
        Self {
            applied,
            halted: Some(issue),
        }
    }

    /// Whether the drain completed without a guard failure.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.halted.is_none()
    }
}
