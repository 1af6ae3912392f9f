use thiserror::Error;

use super::validation::ValidationError;

/// The request supplier could not produce another request.
///
/// Propagated to the driver and treated as a fatal failing condition.
#[derive(Debug, Error)]
pub enum SupplyError {
    #[error("Workload is exhausted.")]
    Exhausted,
    #[error("Request production failed: {message}")]
    Production { message: String },
    #[error("Produced request was rejected: {0}")]
    Invalid(#[from] ValidationError),
    #[error("Workload state lock poisoned.")]
    LockPoisoned,
}

/// A completion subscriber failed while processing an event.
///
/// Propagated to the driver and treated as a fatal failing condition.
#[derive(Debug, Error)]
pub enum SubscriberError {
    #[error("Subscriber '{name}' failed: {message}")]
    Failed { name: &'static str, message: String },
}
