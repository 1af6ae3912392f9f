//! Request pacing: admission gates for the driver's issue loop.
mod concurrent;
mod rate;

#[cfg(test)]
mod tests;

use async_trait::async_trait;

use crate::types::Completion;

pub use concurrent::ConcurrentRequestScheduler;
pub use rate::RequestRateScheduler;

/// Paces the driver's request issuance.
///
/// `wait_for_next` suspends the caller until it may issue the next request;
/// it is the only suspension point on the issue path. A shutdown broadcast
/// interrupts a blocked wait promptly; that is logged and treated as
/// "proceed now", never surfaced as an error. `complete` is invoked exactly
/// once per finished operation to release admission capacity.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn wait_for_next(&self);

    fn complete(&self, completion: &Completion);
}
