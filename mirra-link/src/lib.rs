//! Source link abstraction for Mirra.
//!
//! A model never touches its remote counterpart directly; it goes through
//! a [`SourceLink`], one async contract implemented by two interchangeable
//! backends:
//! - [`RemoteStore`]/[`RemoteLink`]: the document store with server-push
//!   change notifications
//! - [`SimStore`]/[`SimLink`]: the in-memory simulation with inline
//!   notifications, used by every test suite
//!
//! Both satisfy identical event-ordering and delivery guarantees; the
//! backend is picked once, wrapped in a [`Backend`] factory, and injected
//! into the engine.
//!
//! # Example
//!
//! ```
//! use mirra_link::{Backend, SimBackend, SimStore};
//! use mirra_types::SourceDiff;
//! use std::sync::Arc;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let backend = SimBackend::new(Arc::new(SimStore::new()));
//! let diff = SourceDiff::new("project", "demo");
//! let id = diff.source_id;
//! backend.create_source(None, diff).await.unwrap();
//! let link = backend.link(id);
//! assert_eq!(link.source_id(), id);
//! # });
//! ```

mod config;
mod error;
mod fields;
mod link;
mod remote;
mod sim;

pub use config::LinkConfig;
pub use error::{LinkError, LinkResult};
pub use link::{Backend, BackendMode, EventHandler, SourceLink};
pub use remote::{RemoteBackend, RemoteLink, RemoteStore};
pub use sim::{SimBackend, SimLink, SimStore};
