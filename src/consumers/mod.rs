//! Consumer implementations.
//!
//! These stand in for the host application's side of a run: something that
//! renders or records items at its own pace.

use async_trait::async_trait;
use std::fmt::Display;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as TokioMutex;
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::progress::Progress;
use crate::traits::Consumer;

/// A non-item notification observed by a [`CollectConsumer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerEvent {
    Progress(Progress),
    Dropped(u64),
    Complete,
    Cancelled,
    Error(String),
}

/// A consumer that records every item and notification.
///
/// Clones share the same storage, so keep one clone to inspect the results
/// after handing the other to a run.
pub struct CollectConsumer<T> {
    items: Arc<TokioMutex<Vec<T>>>,
    events: Arc<TokioMutex<Vec<ConsumerEvent>>>,
    delay: Option<Duration>,
}

impl<T: Send + 'static + Clone> CollectConsumer<T> {
    /// Create a new collect consumer
    pub fn new() -> Self {
        Self {
            items: Arc::new(TokioMutex::new(Vec::new())),
            events: Arc::new(TokioMutex::new(Vec::new())),
            delay: None,
        }
    }

    /// Sleep this long after every item, like a slow render
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Snapshot of the collected items
    pub async fn collected(&self) -> Vec<T> {
        self.items.lock().await.clone()
    }

    /// Snapshot of the recorded notifications
    pub async fn events(&self) -> Vec<ConsumerEvent> {
        self.events.lock().await.clone()
    }

    /// How many times the given notification was recorded
    pub async fn count_events(&self, predicate: impl Fn(&ConsumerEvent) -> bool) -> usize {
        self.events.lock().await.iter().filter(|e| predicate(*e)).count()
    }

    async fn record(&self, event: ConsumerEvent) {
        self.events.lock().await.push(event);
    }
}

#[async_trait]
impl<T: Send + 'static + Clone> Consumer for CollectConsumer<T> {
    type Item = T;

    async fn on_item(&mut self, item: Self::Item) -> Result<()> {
        self.items.lock().await.push(item);
        if let Some(delay) = self.delay {
            sleep(delay).await;
        }
        Ok(())
    }

    async fn on_progress(&mut self, progress: Progress) -> Result<()> {
        self.record(ConsumerEvent::Progress(progress)).await;
        Ok(())
    }

    async fn on_dropped(&mut self, dropped: u64) -> Result<()> {
        self.record(ConsumerEvent::Dropped(dropped)).await;
        Ok(())
    }

    async fn on_complete(&mut self) -> Result<()> {
        self.record(ConsumerEvent::Complete).await;
        Ok(())
    }

    async fn on_cancelled(&mut self) {
        self.record(ConsumerEvent::Cancelled).await;
    }

    async fn on_error(&mut self, error: &Error) {
        self.record(ConsumerEvent::Error(error.to_string())).await;
    }
}

impl<T: Send + 'static + Clone> Default for CollectConsumer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for CollectConsumer<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            events: self.events.clone(),
            delay: self.delay,
        }
    }
}

/// A consumer created from a function
pub struct FnConsumer<F, T> {
    pub f: F,
    _phantom: PhantomData<fn(T)>,
}

#[async_trait]
impl<F, T> Consumer for FnConsumer<F, T>
where
    F: FnMut(T) -> Result<()> + Send + 'static,
    T: Send + 'static,
{
    type Item = T;

    async fn on_item(&mut self, item: Self::Item) -> Result<()> {
        (self.f)(item)
    }
}

/// Helper function to create a simple consumer from a function
pub fn consumer_from_fn<F, T>(f: F) -> FnConsumer<F, T>
where
    F: FnMut(T) -> Result<()> + Send + 'static,
    T: Send + 'static,
{
    FnConsumer {
        f,
        _phantom: PhantomData,
    }
}

/// A consumer that reports through `tracing`, the way a progress bar would
/// render: one line per percent step rather than per item.
pub struct LogConsumer<T> {
    label: String,
    last_percent: Option<u8>,
    _phantom: PhantomData<fn(T)>,
}

impl<T> LogConsumer<T> {
    /// Create a log consumer tagging every line with `label`
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            last_percent: None,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Send + Display + 'static> Consumer for LogConsumer<T> {
    type Item = T;

    async fn on_item(&mut self, item: Self::Item) -> Result<()> {
        trace!(label = %self.label, %item, "item");
        Ok(())
    }

    async fn on_progress(&mut self, progress: Progress) -> Result<()> {
        let percent = progress.percent();
        if self.last_percent != Some(percent) {
            self.last_percent = Some(percent);
            debug!(label = %self.label, %progress, "progress");
        }
        Ok(())
    }

    async fn on_dropped(&mut self, dropped: u64) -> Result<()> {
        trace!(label = %self.label, dropped, "items dropped");
        Ok(())
    }

    async fn on_complete(&mut self) -> Result<()> {
        info!(label = %self.label, "complete");
        Ok(())
    }

    async fn on_cancelled(&mut self) {
        info!(label = %self.label, "cancelled");
    }

    async fn on_error(&mut self, error: &Error) {
        warn!(label = %self.label, %error, "failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collect_consumer_shares_storage() {
        let collector = CollectConsumer::new();
        let mut handed_out = collector.clone();

        handed_out.on_item(1u64).await.unwrap();
        handed_out.on_item(2u64).await.unwrap();
        handed_out.on_dropped(3).await.unwrap();
        handed_out.on_complete().await.unwrap();

        assert_eq!(collector.collected().await, vec![1, 2]);
        assert_eq!(
            collector.events().await,
            vec![ConsumerEvent::Dropped(3), ConsumerEvent::Complete]
        );
        assert_eq!(
            collector
                .count_events(|e| *e == ConsumerEvent::Complete)
                .await,
            1
        );
    }

    #[tokio::test]
    async fn test_fn_consumer_propagates_errors() {
        let mut consumer = consumer_from_fn(|item: u64| {
            if item == 3 {
                Err(Error::custom("bad frame"))
            } else {
                Ok(())
            }
        });

        assert!(consumer.on_item(1).await.is_ok());
        assert!(consumer.on_item(3).await.is_err());
    }
}
