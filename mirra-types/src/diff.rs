//! Source snapshots ("diffs").
//!
//! A [`SourceDiff`] is an immutable snapshot of a source's fields at the
//! moment an event was raised. It carries enough data to construct or
//! refresh a model without a further round trip to the backend.

use crate::SourceId;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A 2D position on the consumer's canvas.
///
/// The engine never interprets this; it is mirrored and pushed like any
/// other field.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub x: f64,
    pub y: f64,
}

impl Location {
    /// Creates a location from coordinates.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Immutable snapshot of a source's current fields.
///
/// The `kind` tag is the generic-engine parameter: every concrete entity
/// kind (project, system, object, state, value, ...) flows through the same
/// diff shape, with kind-specific payload under `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDiff {
    /// Identity of the source this snapshot was taken from.
    pub source_id: SourceId,
    /// Entity-kind tag (e.g. "project", "state").
    pub kind: String,
    /// Display name.
    pub name: String,
    /// Ordering index among siblings.
    pub order: u32,
    /// Creation time (unix millis).
    pub created_at: i64,
    /// Last modification time (unix millis).
    pub updated_at: i64,
    /// Canvas position.
    pub location: Location,
    /// Kind-specific payload; opaque to the engine.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl SourceDiff {
    /// Creates a fresh snapshot for a new source of the given kind,
    /// stamping a random identity and the current time.
    #[must_use]
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            source_id: SourceId::new(),
            kind: kind.into(),
            name: name.into(),
            order: 0,
            created_at: now,
            updated_at: now,
            location: Location::default(),
            data: serde_json::Value::Null,
        }
    }

    /// Rebinds the snapshot to an existing source identity.
    #[must_use]
    pub fn with_source_id(mut self, source_id: SourceId) -> Self {
        self.source_id = source_id;
        self
    }

    /// Sets the sibling ordering index.
    #[must_use]
    pub fn with_order(mut self, order: u32) -> Self {
        self.order = order;
        self
    }

    /// Sets the canvas position.
    #[must_use]
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    /// Sets the kind-specific payload.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}
