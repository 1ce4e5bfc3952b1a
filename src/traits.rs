//! Core traits for the producer/consumer system.
//!
//! A run moves items one way: a [`Producer`] hands them to the mediator, the
//! mediator applies its overload policy, and a [`Consumer`] receives whatever
//! survives at its own pace. Producers come in two shapes that share the
//! [`Producer`] trait: pull-driven generation from a [`Source`], and eager
//! pushing through an [`Emitter`](crate::sources::Emitter).

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::progress::Progress;
use crate::sources::Emitter;

/// A source generates items on demand.
///
/// Sources respond to explicit demand requests and never produce more than
/// asked for. An empty batch means the source is exhausted.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use backflow::error::Result;
/// use backflow::traits::Source;
///
/// struct Squares {
///     next: u64,
///     end: u64,
/// }
///
/// #[async_trait]
/// impl Source for Squares {
///     type Item = u64;
///
///     async fn handle_demand(&mut self, demand: usize) -> Result<Vec<Self::Item>> {
///         let mut items = Vec::with_capacity(demand);
///         while items.len() < demand && self.next < self.end {
///             items.push(self.next * self.next);
///             self.next += 1;
///         }
///         Ok(items)
///     }
/// }
/// ```
#[async_trait]
pub trait Source {
    /// The type of items this source generates
    type Item: Send + 'static;

    /// Return up to `demand` items, or an empty Vec once exhausted.
    async fn handle_demand(&mut self, demand: usize) -> Result<Vec<Self::Item>>;

    /// Get the next single item (convenience method).
    async fn next(&mut self) -> Result<Option<Self::Item>> {
        let items = self.handle_demand(1).await?;
        Ok(items.into_iter().next())
    }
}

/// Something that emits a finite sequence of items into a run.
///
/// A producer is consumed by running it; a fresh run needs a fresh producer.
/// Implementations must stop as soon as [`Emitter::emit`] returns an error
/// and propagate it, and return `Ok(())` once every item was emitted. The
/// pipeline signals completion to the mediator on their behalf.
#[async_trait]
pub trait Producer: Send + 'static {
    /// The type of items this producer emits
    type Item: Send + 'static;

    /// Emit every item through `emitter`
    async fn run(self, emitter: Emitter<Self::Item>) -> Result<()>;
}

/// A consumer receives what the mediator lets through.
///
/// Only `on_item` is required. The progress hooks are meant for a host UI:
/// `on_progress` follows every accepted item, `on_dropped` follows whenever
/// the mediator's drop counter grew since the last report.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use backflow::error::Result;
/// use backflow::progress::Progress;
/// use backflow::traits::Consumer;
///
/// struct ProgressBar {
///     percent: u8,
/// }
///
/// #[async_trait]
/// impl Consumer for ProgressBar {
///     type Item = u64;
///
///     async fn on_item(&mut self, _item: Self::Item) -> Result<()> {
///         Ok(())
///     }
///
///     async fn on_progress(&mut self, progress: Progress) -> Result<()> {
///         self.percent = progress.percent();
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Consumer: Send + 'static {
    /// The type of items this consumer accepts
    type Item: Send + 'static;

    /// Accept a single item. An error tears the run down.
    async fn on_item(&mut self, item: Self::Item) -> Result<()>;

    /// Called after each accepted item with the updated progress.
    async fn on_progress(&mut self, _progress: Progress) -> Result<()> {
        Ok(())
    }

    /// Called with the total number of items discarded so far.
    async fn on_dropped(&mut self, _dropped: u64) -> Result<()> {
        Ok(())
    }

    /// Called once after the last item.
    async fn on_complete(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called once when the run is cancelled.
    async fn on_cancelled(&mut self) {}

    /// Called once when the producer or this consumer failed.
    async fn on_error(&mut self, _error: &Error) {}
}
