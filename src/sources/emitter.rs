//! Producer-side handle onto a mediator.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::mediator::{Mediator, Offer};

/// Pushes items into a mediator on behalf of a producer.
///
/// Checks for cancellation before every emission, so a producer that
/// propagates `emit` errors with `?` stops after at most the in-flight item.
pub struct Emitter<T> {
    mediator: Arc<Mediator<T>>,
    emitted: u64,
}

impl<T> Emitter<T> {
    /// Create an emitter feeding `mediator`
    pub fn new(mediator: Arc<Mediator<T>>) -> Self {
        Self {
            mediator,
            emitted: 0,
        }
    }

    /// Offer one item. Dropped and replaced items are not errors.
    ///
    /// Fails with `Error::Cancelled` once the run was torn down and with
    /// `Error::Closed` if completion was already signalled.
    pub fn emit(&mut self, item: T) -> Result<Offer> {
        if self.mediator.is_shut_down() {
            return Err(Error::Cancelled);
        }
        match self.mediator.offer(item) {
            Offer::Rejected if self.mediator.is_shut_down() => Err(Error::Cancelled),
            Offer::Rejected => Err(Error::Closed),
            offer => {
                self.emitted += 1;
                Ok(offer)
            }
        }
    }

    /// Whether the producer should stop
    pub fn is_cancelled(&self) -> bool {
        self.mediator.is_shut_down()
    }

    /// Items successfully handed to the mediator, including dropped ones
    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}
