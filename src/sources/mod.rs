//! Producer implementations.
//!
//! Three ways of producing the integer stream are provided, all behind the
//! [`Producer`] trait:
//!
//! - [`CounterSource`]: a `0..n` range, pulled in demand-sized batches
//! - [`GenerateSource`]: a state value stepped by a function until it yields `None`
//! - [`PushProducer`]: a closure that eagerly pushes items through an [`Emitter`]
//!
//! Sources become producers by wrapping them in a [`SourceProducer`].

mod emitter;

pub use emitter::Emitter;

use async_trait::async_trait;
use std::marker::PhantomData;

use crate::error::{Error, Result};
use crate::traits::{Producer, Source};

/// Batch size used when pulling from a source
pub const DEFAULT_DEMAND_BATCH_SIZE: usize = 1024;

/// A source that counts from `0` up to, but excluding, `total`
#[derive(Debug, Clone)]
pub struct CounterSource {
    cursor: u64,
    total: u64,
}

impl CounterSource {
    /// Create a counter over `0..total`
    pub fn new(total: u64) -> Self {
        Self { cursor: 0, total }
    }

    /// Next index to produce
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Upper bound, exclusive
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Items not produced yet
    pub fn remaining(&self) -> u64 {
        self.total - self.cursor
    }
}

#[async_trait]
impl Source for CounterSource {
    type Item = u64;

    async fn handle_demand(&mut self, demand: usize) -> Result<Vec<Self::Item>> {
        let batch = self.remaining().min(demand as u64);
        let end = self.cursor + batch;
        let items = (self.cursor..end).collect();
        self.cursor = end;
        Ok(items)
    }
}

/// A source driven by a step function over some state.
///
/// Each call to the step function yields the next item, or `None` once the
/// sequence is over.
pub struct GenerateSource<S, F, T> {
    state: S,
    step: F,
    exhausted: bool,
    _phantom: PhantomData<fn() -> T>,
}

impl<S, F, T> GenerateSource<S, F, T>
where
    F: FnMut(&mut S) -> Option<T>,
{
    /// Create a source starting from `initial`
    pub fn new(initial: S, step: F) -> Self {
        Self {
            state: initial,
            step,
            exhausted: false,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<S, F, T> Source for GenerateSource<S, F, T>
where
    S: Send,
    F: FnMut(&mut S) -> Option<T> + Send,
    T: Send + 'static,
{
    type Item = T;

    async fn handle_demand(&mut self, demand: usize) -> Result<Vec<Self::Item>> {
        let mut items = Vec::with_capacity(demand.min(DEFAULT_DEMAND_BATCH_SIZE));
        while !self.exhausted && items.len() < demand {
            match (self.step)(&mut self.state) {
                Some(item) => items.push(item),
                None => self.exhausted = true,
            }
        }
        Ok(items)
    }
}

/// Helper function to create a source from a state and a step function
pub fn generate<S, F, T>(initial: S, step: F) -> GenerateSource<S, F, T>
where
    F: FnMut(&mut S) -> Option<T>,
{
    GenerateSource::new(initial, step)
}

/// Pull-driven producer: requests batches from a source and offers each item
pub struct SourceProducer<S> {
    source: S,
    batch_size: usize,
}

impl<S: Source> SourceProducer<S> {
    /// Wrap a source with the default batch size
    pub fn new(source: S) -> Self {
        Self {
            source,
            batch_size: DEFAULT_DEMAND_BATCH_SIZE,
        }
    }

    /// Set how many items are requested from the source at once
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

#[async_trait]
impl<S> Producer for SourceProducer<S>
where
    S: Source + Send + 'static,
{
    type Item = S::Item;

    async fn run(mut self, mut emitter: Emitter<Self::Item>) -> Result<()> {
        loop {
            if emitter.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let batch = self.source.handle_demand(self.batch_size).await?;
            if batch.is_empty() {
                return Ok(());
            }
            for item in batch {
                emitter.emit(item)?;
            }
            // Let the consumer task in between batches on a busy runtime
            tokio::task::yield_now().await;
        }
    }
}

/// Eager producer: a closure that pushes every item itself.
///
/// The closure runs on a blocking worker thread, so it may loop as hard as
/// it likes without starving the runtime.
pub struct PushProducer<F, T> {
    body: F,
    _phantom: PhantomData<fn() -> T>,
}

impl<F, T> PushProducer<F, T>
where
    F: FnOnce(&mut Emitter<T>) -> Result<()> + Send + 'static,
{
    /// Create a push producer from a closure
    pub fn new(body: F) -> Self {
        Self {
            body,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<F, T> Producer for PushProducer<F, T>
where
    F: FnOnce(&mut Emitter<T>) -> Result<()> + Send + 'static,
    T: Send + 'static,
{
    type Item = T;

    async fn run(self, mut emitter: Emitter<Self::Item>) -> Result<()> {
        let body = self.body;
        tokio::task::spawn_blocking(move || body(&mut emitter)).await?
    }
}

/// Helper function to create a push producer from a closure
pub fn from_emitter<F, T>(body: F) -> PushProducer<F, T>
where
    F: FnOnce(&mut Emitter<T>) -> Result<()> + Send + 'static,
{
    PushProducer::new(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mediator::{Delivery, Mediator};
    use crate::policy::BackpressurePolicy;
    use std::sync::Arc;

    fn drain(mediator: &Mediator<u64>) -> Vec<u64> {
        let mut items = Vec::new();
        while let Ok(Some(Delivery::Item(item))) = mediator.try_take() {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn test_counter_respects_bound() {
        let mut source = CounterSource::new(5);
        assert_eq!(source.handle_demand(3).await.unwrap(), vec![0, 1, 2]);
        assert_eq!(source.handle_demand(3).await.unwrap(), vec![3, 4]);
        assert!(source.handle_demand(3).await.unwrap().is_empty());
        assert_eq!(source.cursor(), source.total());
        assert_eq!(source.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_generate_stops_at_none() {
        let mut source = generate(0u64, |current| {
            if *current < 4 {
                *current += 1;
                Some(*current - 1)
            } else {
                None
            }
        });
        assert_eq!(source.handle_demand(10).await.unwrap(), vec![0, 1, 2, 3]);
        assert!(source.handle_demand(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_source_producer_offers_everything() {
        let mediator = Arc::new(Mediator::new(BackpressurePolicy::Buffer));
        let producer = SourceProducer::new(CounterSource::new(10)).with_batch_size(3);

        producer.run(Emitter::new(mediator.clone())).await.unwrap();

        assert_eq!(mediator.offered(), 10);
        assert_eq!(drain(&mediator), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_source_producer_stops_when_cancelled() {
        let mediator = Arc::new(Mediator::new(BackpressurePolicy::Buffer));
        mediator.cancel();

        let producer = SourceProducer::new(CounterSource::new(10));
        let result = producer.run(Emitter::new(mediator.clone())).await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(mediator.offered(), 0);
    }

    #[tokio::test]
    async fn test_push_producer_runs_closure() {
        let mediator = Arc::new(Mediator::new(BackpressurePolicy::Latest));
        let producer = from_emitter(|emitter: &mut Emitter<u64>| {
            for i in 0..1000 {
                emitter.emit(i)?;
            }
            Ok(())
        });

        producer.run(Emitter::new(mediator.clone())).await.unwrap();

        assert_eq!(mediator.offered(), 1000);
        assert_eq!(mediator.dropped(), 999);
        assert_eq!(drain(&mediator), vec![999]);
    }

    #[tokio::test]
    async fn test_push_producer_panic_becomes_error() {
        let mediator = Arc::new(Mediator::<u64>::new(BackpressurePolicy::Buffer));
        let producer = from_emitter(|_emitter: &mut Emitter<u64>| -> Result<()> {
            panic!("generator exploded");
        });

        let result = producer.run(Emitter::new(mediator)).await;
        assert!(matches!(result, Err(Error::Custom(_))));
    }
}
