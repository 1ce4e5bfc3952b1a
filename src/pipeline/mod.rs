//! Pipeline orchestration and execution.
//!
//! A [`Pipeline`] wires a producer, a mediator and a consumer into a run and
//! owns its cancellation. At most one run is active per pipeline; what
//! happens on a second `start` is decided by
//! [`PipelineConfig::on_concurrent_start`].

mod run;

pub use run::{RunHandle, RunId, RunOutcome, RunSummary};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{info, Instrument};

use crate::error::{Error, Result};
use crate::mediator::Mediator;
use crate::policy::BackpressurePolicy;
use crate::sources::{CounterSource, SourceProducer, DEFAULT_DEMAND_BATCH_SIZE};
use crate::traits::{Consumer, Producer};

/// What `start` does while another run is still active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ConcurrentStart {
    /// Fail with `Error::AlreadyRunning`
    #[default]
    Reject,
    /// Cancel the active run; the new one begins once it has torn down
    CancelPrevious,
}

/// Configuration for pipeline execution
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PipelineConfig {
    /// Behaviour of `start` while a run is active
    pub on_concurrent_start: ConcurrentStart,
    /// Pace of the consumer: at most one item per interval. `None` consumes
    /// as fast as the consumer itself allows.
    pub frame_interval: Option<Duration>,
    /// How many items the counter producer generates per batch
    pub demand_batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            on_concurrent_start: ConcurrentStart::Reject,
            frame_interval: None,
            demand_batch_size: DEFAULT_DEMAND_BATCH_SIZE,
        }
    }
}

impl PipelineConfig {
    fn validate(&self) -> Result<()> {
        if self.demand_batch_size == 0 {
            return Err(Error::invalid_argument("demand batch size must be positive"));
        }
        if self.frame_interval == Some(Duration::ZERO) {
            return Err(Error::invalid_argument("frame interval must be non-zero"));
        }
        Ok(())
    }
}

/// Starts and cancels runs.
///
/// # Examples
///
/// ```rust
/// use backflow::prelude::*;
///
/// #[tokio::main]
/// async fn main() -> Result<()> {
///     let pipeline = Pipeline::new();
///     let consumer = CollectConsumer::new();
///     let run = pipeline.start(5, BackpressurePolicy::Buffer, consumer.clone())?;
///
///     assert!(run.wait().await.is_completed());
///     assert_eq!(consumer.collected().await, vec![0, 1, 2, 3, 4]);
///     Ok(())
/// }
/// ```
pub struct Pipeline {
    config: PipelineConfig,
    active: Mutex<Option<RunHandle>>,
    next_id: AtomicU64,
}

impl Pipeline {
    /// Create a pipeline with the default configuration
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    /// Create a pipeline with a custom configuration
    pub fn with_config(config: PipelineConfig) -> Self {
        Self {
            config,
            active: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Set the concurrent start behaviour
    pub fn on_concurrent_start(mut self, behaviour: ConcurrentStart) -> Self {
        self.config.on_concurrent_start = behaviour;
        self
    }

    /// Pace the consumer to one item per `interval`
    pub fn frame_interval(mut self, interval: Duration) -> Self {
        self.config.frame_interval = Some(interval);
        self
    }

    /// Set the counter producer's batch size
    pub fn demand_batch_size(mut self, size: usize) -> Self {
        self.config.demand_batch_size = size;
        self
    }

    /// Get the pipeline configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Start a run over `0..item_count`.
    ///
    /// Must be called from within a Tokio runtime. Fails with
    /// `Error::InvalidArgument` when `item_count` is zero.
    pub fn start<C>(
        &self,
        item_count: u64,
        policy: BackpressurePolicy,
        consumer: C,
    ) -> Result<RunHandle>
    where
        C: Consumer<Item = u64>,
    {
        if item_count == 0 {
            return Err(Error::invalid_argument("item count must be positive"));
        }
        let producer = SourceProducer::new(CounterSource::new(item_count))
            .with_batch_size(self.config.demand_batch_size);
        self.start_with(producer, item_count, policy, consumer)
    }

    /// Start a run with a custom producer that will emit `total` items.
    ///
    /// `total` only feeds progress reporting.
    pub fn start_with<P, C>(
        &self,
        producer: P,
        total: u64,
        policy: BackpressurePolicy,
        consumer: C,
    ) -> Result<RunHandle>
    where
        P: Producer,
        C: Consumer<Item = P::Item>,
    {
        if total == 0 {
            return Err(Error::invalid_argument("item count must be positive"));
        }
        self.config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::custom(format!("no Tokio runtime: {}", e)))?;

        let id = RunId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mediator = Arc::new(Mediator::new(policy));
        let (handle, reporter) = RunHandle::new(id, policy, total, mediator.clone());

        let previous = {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(current) = active.as_ref().filter(|run| !run.is_finished()) {
                if self.config.on_concurrent_start == ConcurrentStart::Reject {
                    return Err(Error::AlreadyRunning(current.id()));
                }
            }
            active.replace(handle.clone())
        };
        let previous = previous.filter(|run| !run.is_finished());
        if let Some(previous) = &previous {
            info!(previous = %previous.id(), run = %id, "cancelling previous run");
            previous.cancel();
        }

        info!(run = %id, %policy, total, "starting run");
        let span = tracing::info_span!("run", run = %id, %policy);
        runtime.spawn(
            run::supervise(
                previous,
                producer,
                consumer,
                mediator,
                reporter,
                self.config.frame_interval,
            )
            .instrument(span),
        );

        Ok(handle)
    }

    /// Cancel a run. Idempotent, callable from any thread.
    pub fn cancel(&self, handle: &RunHandle) {
        handle.cancel();
    }

    /// Cancel whatever run is active, if any
    pub fn cancel_active(&self) {
        if let Some(run) = self.active() {
            run.cancel();
        }
    }

    /// The run that has not finished yet, if any
    pub fn active(&self) -> Option<RunHandle> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|run| !run.is_finished())
            .cloned()
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        // Runs never outlive the pipeline that started them
        self.cancel_active();
    }
}
