// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # kwharvest Queue
//!
//! Durable work scheduling on top of the record store.
//!
//! - **Scheduler**: enqueue with batch splitting, atomic claims, a
//!   cooperative run loop, exponential reschedule backoff
//! - **Handlers**: the closed set `{FetchRelated, CountDocs}`, dispatched by
//!   job kind
//! - **Collector**: the collection trigger and seed registration
//! - **Stats**: in-process processing figures per job kind
//!
//! ## Usage
//!
//! ```ignore
//! use kwharvest_queue::{Handlers, Scheduler, SchedulerSettings};
//!
//! let scheduler = Arc::new(Scheduler::new(store, handlers, clock, SchedulerSettings::default()));
//! scheduler.enqueue_batch(JobKind::FetchRelated, &ids, None).await?;
//!
//! let runner = Arc::clone(&scheduler);
//! tokio::spawn(async move { runner.run_loop().await });
//! // ...
//! scheduler.stop();
//! ```

pub mod collect;
pub mod error;
pub mod handlers;
pub mod scheduler;
pub mod stats;

pub use collect::{CollectReport, Collector, DEFAULT_DOCS_LIMIT, DEFAULT_RELATED_LIMIT};
pub use error::QueueError;
pub use handlers::{
    CountDocsHandler, FetchRelatedHandler, HandlerContext, Handlers, JobHandler, JobOutcome,
};
pub use scheduler::{ProcessOutcome, Scheduler, SchedulerSettings};
pub use stats::{KindStats, ProcessingStats};
