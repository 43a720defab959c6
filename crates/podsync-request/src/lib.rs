//! Request subsystem. Requests are change notifications queued for delivery to
//! remote pods; this crate creates them atomically, groups pending ones into
//! per-pod batches for a dispatch cycle, and purges those fully delivered.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod batch;
pub mod memory;
pub mod scheduler;
pub mod settings;

mod prelude;

pub use batch::{BatchKey, RequestBatch, RequestBatches, build_request_objects};
pub use memory::InMemoryRequestAdapter;
pub use scheduler::{CreateRequestOptions, RequestKind, RequestScheduler};
pub use settings::RequestLimits;

// vim: ts=4
