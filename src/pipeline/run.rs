//! A single run: the producer task, the consumer task and the handle that
//! observes and cancels them.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn, Instrument};

use crate::error::{Error, Result};
use crate::mediator::{Delivery, Mediator, MediatorState};
use crate::metrics;
use crate::policy::BackpressurePolicy;
use crate::progress::Progress;
use crate::sources::Emitter;
use crate::traits::{Consumer, Producer};

/// Unique identifier for runs started by one pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(pub u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

/// Counts at the end of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RunSummary {
    pub total: u64,
    pub delivered: u64,
    pub dropped: u64,
}

/// How a run ended
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Every retained item reached the consumer
    Completed(RunSummary),
    /// The run was cancelled before it completed
    Cancelled(RunSummary),
    /// The producer or the consumer failed
    Failed(Error),
}

impl RunOutcome {
    /// Whether the run delivered everything
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }

    /// Whether the run was torn down before completing
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunOutcome::Cancelled(_))
    }

    /// Counts for a run that did not fail
    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            RunOutcome::Completed(summary) | RunOutcome::Cancelled(summary) => Some(summary),
            RunOutcome::Failed(_) => None,
        }
    }

    /// The fault that ended a failed run
    pub fn error(&self) -> Option<&Error> {
        match self {
            RunOutcome::Failed(error) => Some(error),
            _ => None,
        }
    }

    /// Short name used in logs and metric labels
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Completed(_) => "completed",
            RunOutcome::Cancelled(_) => "cancelled",
            RunOutcome::Failed(_) => "failed",
        }
    }
}

/// Type-erased control over a run's mediator
trait RunControl: Send + Sync {
    fn cancel(&self);
    fn dropped(&self) -> u64;
    fn state(&self) -> MediatorState;
}

impl<T: Send> RunControl for Mediator<T> {
    fn cancel(&self) {
        Mediator::cancel(self)
    }

    fn dropped(&self) -> u64 {
        Mediator::dropped(self)
    }

    fn state(&self) -> MediatorState {
        Mediator::state(self)
    }
}

struct RunShared {
    id: RunId,
    policy: BackpressurePolicy,
    total: u64,
    control: Arc<dyn RunControl>,
    progress: watch::Receiver<Progress>,
    outcome: watch::Receiver<Option<RunOutcome>>,
    finished: CancellationToken,
}

/// Handle to a started run. Cheap to clone; every clone observes the same run.
#[derive(Clone)]
pub struct RunHandle {
    inner: Arc<RunShared>,
}

/// The writing half of a run's observable state, owned by the run's tasks
pub(crate) struct RunReporter {
    progress: watch::Sender<Progress>,
    outcome: watch::Sender<Option<RunOutcome>>,
    finished: CancellationToken,
    total: u64,
}

impl RunHandle {
    pub(crate) fn new<T: Send + 'static>(
        id: RunId,
        policy: BackpressurePolicy,
        total: u64,
        mediator: Arc<Mediator<T>>,
    ) -> (Self, RunReporter) {
        let (progress_tx, progress_rx) = watch::channel(Progress::new(total));
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let finished = CancellationToken::new();

        let handle = Self {
            inner: Arc::new(RunShared {
                id,
                policy,
                total,
                control: mediator,
                progress: progress_rx,
                outcome: outcome_rx,
                finished: finished.clone(),
            }),
        };
        let reporter = RunReporter {
            progress: progress_tx,
            outcome: outcome_tx,
            finished,
            total,
        };
        (handle, reporter)
    }

    /// Identifier assigned by the pipeline
    pub fn id(&self) -> RunId {
        self.inner.id
    }

    /// Policy the run's mediator enforces
    pub fn policy(&self) -> BackpressurePolicy {
        self.inner.policy
    }

    /// Number of items the producer will emit
    pub fn total(&self) -> u64 {
        self.inner.total
    }

    /// Cancel the run. Idempotent, callable from any thread.
    pub fn cancel(&self) {
        self.inner.control.cancel();
    }

    /// Latest progress published by the consumer
    pub fn progress(&self) -> Progress {
        *self.inner.progress.borrow()
    }

    /// Progress updates as a stream, starting with the current value
    pub fn progress_stream(&self) -> WatchStream<Progress> {
        WatchStream::new(self.inner.progress.clone())
    }

    /// Items discarded by the mediator so far
    pub fn dropped(&self) -> u64 {
        self.inner.control.dropped()
    }

    /// Current state of the run's mediator
    pub fn mediator_state(&self) -> MediatorState {
        self.inner.control.state()
    }

    /// Whether both tasks of the run have ended
    pub fn is_finished(&self) -> bool {
        self.inner.finished.is_cancelled()
    }

    /// Resolves once both tasks of the run have ended
    pub async fn finished(&self) {
        self.inner.finished.cancelled().await
    }

    /// Wait for the run to end and return how it ended
    pub async fn wait(&self) -> RunOutcome {
        let mut outcome = self.inner.outcome.clone();
        let result = match outcome.wait_for(Option::is_some).await {
            Ok(done) => (*done).clone(),
            Err(_) => None,
        };
        // The reporter only disappears without an outcome if the runtime shut down
        result.unwrap_or(RunOutcome::Failed(Error::Closed))
    }
}

impl fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunHandle")
            .field("id", &self.inner.id)
            .field("policy", &self.inner.policy)
            .field("total", &self.inner.total)
            .field("progress", &self.progress())
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Runs the producer to the end and tells the mediator how it went
async fn drive_producer<P: Producer>(producer: P, mediator: Arc<Mediator<P::Item>>) {
    match producer.run(Emitter::new(mediator.clone())).await {
        Ok(()) => {
            debug!(offered = mediator.offered(), "producer finished");
            mediator.signal_complete();
        }
        Err(Error::Cancelled) => {
            trace!("producer stopped on cancellation");
            // A producer may give up on its own; the consumer still needs a terminal delivery
            mediator.cancel();
        }
        Err(error) => mediator.fail(error),
    }
}

/// Pulls from the mediator at the consumer's pace until a terminal delivery.
///
/// Sole owner of the consumed count; it reaches the outside world only
/// through the progress channel.
struct ConsumerDriver<C: Consumer> {
    consumer: C,
    mediator: Arc<Mediator<C::Item>>,
    progress_tx: watch::Sender<Progress>,
    progress: Progress,
    reported_dropped: u64,
}

impl<C: Consumer> ConsumerDriver<C> {
    fn new(
        consumer: C,
        mediator: Arc<Mediator<C::Item>>,
        progress_tx: watch::Sender<Progress>,
        total: u64,
    ) -> Self {
        Self {
            consumer,
            mediator,
            progress_tx,
            progress: Progress::new(total),
            reported_dropped: 0,
        }
    }

    async fn run(mut self, frame_interval: Option<Duration>) -> RunOutcome {
        let mut frames = frame_interval.map(|period| {
            let mut frames = tokio::time::interval(period);
            frames.set_missed_tick_behavior(MissedTickBehavior::Delay);
            frames
        });

        loop {
            if let Some(frames) = frames.as_mut() {
                tokio::select! {
                    biased;
                    _ = self.mediator.shut_down() => {}
                    _ = frames.tick() => {}
                }
            }

            let delivery = match self.mediator.take().await {
                Ok(delivery) => delivery,
                Err(error) => return RunOutcome::Failed(error),
            };

            match self.handle(delivery).await {
                Ok(None) => {}
                Ok(Some(outcome)) => return outcome,
                Err(error) => {
                    warn!(%error, "consumer failed, tearing down run");
                    // Stop the producer before reporting
                    self.mediator.cancel();
                    self.consumer.on_error(&error).await;
                    return RunOutcome::Failed(error);
                }
            }
        }
    }

    async fn handle(&mut self, delivery: Delivery<C::Item>) -> Result<Option<RunOutcome>> {
        match delivery {
            Delivery::Item(item) => {
                self.consumer.on_item(item).await?;
                self.progress.advance();
                self.progress_tx.send_replace(self.progress);
                metrics::record_delivered(self.mediator.policy());
                self.consumer.on_progress(self.progress).await?;
                self.report_dropped().await?;
                Ok(None)
            }
            Delivery::Complete => {
                self.report_dropped().await?;
                self.consumer.on_complete().await?;
                Ok(Some(RunOutcome::Completed(self.summary())))
            }
            Delivery::Cancelled => {
                self.consumer.on_cancelled().await;
                Ok(Some(RunOutcome::Cancelled(self.summary())))
            }
            Delivery::Failed(error) => {
                self.consumer.on_error(&error).await;
                Ok(Some(RunOutcome::Failed(error)))
            }
        }
    }

    async fn report_dropped(&mut self) -> Result<()> {
        let dropped = self.mediator.dropped();
        if dropped > self.reported_dropped {
            self.reported_dropped = dropped;
            self.consumer.on_dropped(dropped).await?;
        }
        Ok(())
    }

    fn summary(&self) -> RunSummary {
        RunSummary {
            total: self.progress.total,
            delivered: self.progress.consumed,
            dropped: self.mediator.dropped(),
        }
    }
}

/// Owns one run from start to teardown
pub(crate) async fn supervise<P, C>(
    previous: Option<RunHandle>,
    producer: P,
    consumer: C,
    mediator: Arc<Mediator<P::Item>>,
    reporter: RunReporter,
    frame_interval: Option<Duration>,
) where
    P: Producer,
    C: Consumer<Item = P::Item>,
{
    if let Some(previous) = previous {
        previous.finished().await;
        debug!(previous = %previous.id(), "previous run torn down");
    }

    let RunReporter {
        progress,
        outcome,
        finished,
        total,
    } = reporter;

    let producer_task = tokio::spawn(
        drive_producer(producer, mediator.clone()).instrument(tracing::Span::current()),
    );
    let consumer_task = tokio::spawn(
        ConsumerDriver::new(consumer, mediator.clone(), progress, total)
            .run(frame_interval)
            .instrument(tracing::Span::current()),
    );

    let producer_watch = async {
        if let Err(error) = producer_task.await {
            // A panicking producer would otherwise leave the consumer waiting forever
            mediator.fail(error.into());
        }
    };
    let consumer_watch = async {
        let run_outcome = match consumer_task.await {
            Ok(run_outcome) => run_outcome,
            Err(error) => RunOutcome::Failed(error.into()),
        };
        // No-op after completion; otherwise the producer must not outlive the consumer
        mediator.cancel();
        run_outcome
    };
    let (run_outcome, ()) = tokio::join!(consumer_watch, producer_watch);

    match &run_outcome {
        RunOutcome::Failed(error) => warn!(%error, "run failed"),
        other => info!(
            outcome = other.label(),
            delivered = other.summary().map(|s| s.delivered),
            dropped = other.summary().map(|s| s.dropped),
            "run finished"
        ),
    }
    metrics::record_run_finished(mediator.policy(), &run_outcome);

    // Finished before the outcome is visible, so a waiter can start the next run right away
    finished.cancel();
    outcome.send_replace(Some(run_outcome));
}
