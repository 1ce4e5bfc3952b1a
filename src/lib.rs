//! # Backpressure-aware producer/consumer pipelines
//!
//! This crate moves a finite stream of items from a fast producer to a slow,
//! externally paced consumer through a bounded mediator that decides what
//! happens when production outpaces consumption.
//!
//! ## Core Concepts
//!
//! - **Producer**: Emits items as fast as it can, pulled from a [`Source`](traits::Source)
//!   or pushed through an [`Emitter`](sources::Emitter)
//! - **Mediator**: Applies a [`BackpressurePolicy`](policy::BackpressurePolicy):
//!   buffer everything, drop while busy, or keep only the latest
//! - **Consumer**: Receives items at its own pace and reports progress
//! - **Pipeline**: Starts and cancels runs, at most one at a time
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use backflow::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let pipeline = Pipeline::new().frame_interval(Duration::from_millis(1));
//!     let consumer = CollectConsumer::new();
//!
//!     let run = pipeline.start(100_000, BackpressurePolicy::Latest, consumer.clone())?;
//!     let outcome = run.wait().await;
//!
//!     let summary = outcome.summary().unwrap();
//!     assert_eq!(summary.delivered + summary.dropped, 100_000);
//!     assert_eq!(consumer.collected().await.last(), Some(&99_999));
//!     Ok(())
//! }
//! ```

pub mod consumers;
pub mod error;
pub mod mediator;
pub mod pipeline;
pub mod policy;
pub mod progress;
pub mod sources;
pub mod traits;

mod metrics;

// Re-export commonly used items
pub mod prelude {
    pub use crate::consumers::{consumer_from_fn, CollectConsumer, ConsumerEvent, LogConsumer};
    pub use crate::error::{Error, Result};
    pub use crate::mediator::{Delivery, Mediator, MediatorState, Offer};
    pub use crate::pipeline::{
        ConcurrentStart, Pipeline, PipelineConfig, RunHandle, RunId, RunOutcome, RunSummary,
    };
    pub use crate::policy::BackpressurePolicy;
    pub use crate::progress::Progress;
    pub use crate::sources::{
        from_emitter, generate, CounterSource, Emitter, SourceProducer,
    };
    pub use crate::traits::{Consumer, Producer, Source};
}

// Re-export main error type
pub use error::{Error, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
