//! Generic replica engine for Mirra.
//!
//! Local, observable replicas ("models") mirror entities owned by an
//! authoritative remote store, kept consistent by an event-sourced
//! diff/update protocol. One parameterized engine serves every concrete
//! entity kind; the kind tag and its payload travel inside the diffs.
//!
//! # Components
//!
//! - [`Registry`]: process-wide table from random ids to live models;
//!   the safe "is this still alive" check across suspension points
//! - [`Model`]: the replica holding mirrored fields, staged input, ordered
//!   children, error slot, post-update callback
//! - [`Updater`]: one FIFO event queue per model, drained by the apply
//!   loop
//! - [`Engine`]: the consumer surface with setup actions, subscription
//!   management, the `push_*` ticket protocol, removal and `update()`
//!
//! # Flow
//!
//! A model subscribes through its link; the backend pushes events; the
//! handler appends them to the model's updater; `update()` drains FIFO,
//! mutating the model and cascading child creation/deletion; the model's
//! callback fires once per drain.
//!
//! # Example
//!
//! ```
//! use mirra_engine::{Engine, EngineConfig};
//! use mirra_link::{SimBackend, SimStore};
//! use mirra_types::SourceDiff;
//! use std::sync::Arc;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let backend = Arc::new(SimBackend::new(Arc::new(SimStore::new())));
//! let engine = Engine::new(backend, EngineConfig::default());
//!
//! let root = engine.create_root(SourceDiff::new("project", "demo")).await.unwrap();
//! engine.start_updating(root).await;
//! engine.update(root).await;
//! assert_eq!(engine.fields(root).await.unwrap().name, "demo");
//! # });
//! ```

mod engine;
mod error;
mod model;
mod registry;
mod updater;

pub use engine::{Engine, EngineConfig};
pub use error::{EngineError, EngineResult};
pub use model::{Model, ModelConfig, ModelFields, ModelInput, UpdateCallback};
pub use registry::Registry;
pub use updater::{DrainState, UpdateReport, Updater};
