//! Error types for the backpressure pipeline.

use std::sync::Arc;

use crate::pipeline::RunId;

/// The main error type for the producer/mediator/consumer system.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A start request or policy name was rejected
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A run is already active and the controller is configured to reject
    #[error("Run {0} is already active")]
    AlreadyRunning(RunId),

    /// The run was cancelled; a normal termination path, not a fault
    #[error("Run was cancelled")]
    Cancelled,

    /// The mediator already delivered its terminal marker
    #[error("Mediator is closed")]
    Closed,

    /// A producer failed to generate an item
    #[error("Producer error: {0}")]
    Producer(Arc<dyn std::error::Error + Send + Sync>),

    /// A consumer failed to accept an item
    #[error("Consumer error: {0}")]
    Consumer(Arc<dyn std::error::Error + Send + Sync>),

    /// A custom error with a message
    #[error("{0}")]
    Custom(String),
}

// Convenience constructors
impl Error {
    /// Create a producer error from any error type
    pub fn producer<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Error::Producer(Arc::new(error))
    }

    /// Create a consumer error from any error type
    pub fn consumer<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Error::Consumer(Arc::new(error))
    }

    /// Create an invalid argument error
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Error::InvalidArgument(message.into())
    }

    /// Create a custom error with a message
    pub fn custom<S: Into<String>>(message: S) -> Self {
        Error::Custom(message.into())
    }

    /// Whether this error is the cancellation path rather than a fault
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            Error::Cancelled
        } else {
            Error::custom(format!("Task panicked: {}", err))
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Custom(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Custom(s.to_string())
    }
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Helper trait for converting foreign errors into our Error type
pub trait IntoError<T> {
    fn into_producer_error(self) -> Result<T>;
    fn into_consumer_error(self) -> Result<T>;
}

impl<T, E> IntoError<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn into_producer_error(self) -> Result<T> {
        self.map_err(Error::producer)
    }

    fn into_consumer_error(self) -> Result<T> {
        self.map_err(Error::consumer)
    }
}
