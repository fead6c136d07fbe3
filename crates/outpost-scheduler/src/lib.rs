//! Outpost Scheduler -- admission, the periodic tick, and cancellation.
//!
//! # Wiring
//!
//! ```rust,ignore
//! let ctx = Arc::new(
//!     SchedulerContext::new(catalog, store, ledger, world.clone(), world)
//!         .with_config(config),
//! );
//! let service = QueueService::new(ctx.clone());
//! let runner = TickRunner::spawn(Arc::new(TickProcessor::new(ctx)), interval)?;
//! ```
//!
//! [`service::QueueService`] exposes `submit`, `list`, `list_by_owner`,
//! `get` and `cancel`. [`tick::TickProcessor`] owns the scheduler state and
//! never overlaps itself; [`runner::TickRunner`] drives it on a thread.

pub mod activation;
pub mod admission;
pub mod cancel;
pub mod config;
pub mod context;
pub mod runner;
pub mod service;
pub mod tick;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use admission::{Admission, AdmissionController, AdmissionError, SubmitRequest};
pub use cancel::{CancelError, CancelOutcome, cancel_item};
pub use config::{RefundPolicy, SchedulerConfig};
pub use context::SchedulerContext;
pub use runner::TickRunner;
pub use service::{ApiResponse, ErrorCode, QueueService};
pub use tick::{TickError, TickOutcome, TickProcessor, TickReport};
