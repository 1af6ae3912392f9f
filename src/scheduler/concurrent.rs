use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::debug;

use crate::error::ValidationError;
use crate::shutdown::ShutdownSender;
use crate::types::Completion;

use super::Scheduler;

/// How often a blocked wait re-evaluates ramp progress.
const RAMP_RECHECK: Duration = Duration::from_millis(50);

/// Bounds the number of in-flight operations to a fixed concurrency level.
///
/// The permit pool is seeded with `concurrency - 1` permits: the first
/// request always proceeds free, and every completion returns one permit.
/// With a ramp-up configured, the seed permits are instead released
/// linearly over the ramp window, so the effective limit grows from one to
/// the target.
pub struct ConcurrentRequestScheduler {
    permits: Semaphore,
    concurrency: usize,
    started: AtomicBool,
    ramp: Option<Ramp>,
    shutdown: ShutdownSender,
}

struct Ramp {
    duration: Duration,
    origin: Mutex<Option<Instant>>,
    released: AtomicU64,
}

impl ConcurrentRequestScheduler {
    /// Creates a scheduler admitting at most `concurrency` operations.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::NonPositiveConcurrency`] when
    /// `concurrency` is zero.
    pub fn new(
        concurrency: usize,
        ramp: Option<Duration>,
        shutdown: &ShutdownSender,
    ) -> Result<Self, ValidationError> {
        if concurrency == 0 {
            return Err(ValidationError::NonPositiveConcurrency);
        }
        let ramp = ramp.filter(|duration| !duration.is_zero()).map(|duration| Ramp {
            duration,
            origin: Mutex::new(None),
            released: AtomicU64::new(0),
        });
        let seed = if ramp.is_some() {
            0
        } else {
            concurrency.saturating_sub(1)
        };
        Ok(Self {
            permits: Semaphore::new(seed),
            concurrency,
            started: AtomicBool::new(false),
            ramp,
            shutdown: shutdown.clone(),
        })
    }

    /// Releases any seed permits the ramp schedule has newly unlocked.
    /// Returns false once the ramp has fully played out.
    fn advance_ramp(&self) -> bool {
        let Some(ramp) = self.ramp.as_ref() else {
            return false;
        };
        let origin = {
            let mut guard = match ramp.origin.lock() {
                Ok(guard) => guard,
                Err(_) => return false,
            };
            *guard.get_or_insert_with(Instant::now)
        };
        let fraction = if ramp.duration.is_zero() {
            1.0
        } else {
            (origin.elapsed().as_secs_f64() / ramp.duration.as_secs_f64()).min(1.0)
        };
        let target = self.concurrency.saturating_sub(1) as u64;
        let allowed = (target as f64 * fraction).floor() as u64;
        let previous = ramp.released.fetch_max(allowed, Ordering::AcqRel);
        if allowed > previous {
            let fresh = usize::try_from(allowed.saturating_sub(previous)).unwrap_or(usize::MAX);
            self.permits.add_permits(fresh);
        }
        allowed < target
    }
}

#[async_trait]
impl Scheduler for ConcurrentRequestScheduler {
    async fn wait_for_next(&self) {
        let mut ramping = self.advance_ramp();
        if !self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            if ramping {
                tokio::select! {
                    permit = self.permits.acquire() => {
                        if let Ok(permit) = permit {
                            permit.forget();
                        }
                        return;
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Concurrency gate interrupted; proceeding.");
                        return;
                    }
                    () = tokio::time::sleep(RAMP_RECHECK) => {
                        ramping = self.advance_ramp();
                    }
                }
            } else {
                tokio::select! {
                    permit = self.permits.acquire() => {
                        if let Ok(permit) = permit {
                            permit.forget();
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Concurrency gate interrupted; proceeding.");
                    }
                }
                return;
            }
        }
    }

    fn complete(&self, _completion: &Completion) {
        self.permits.add_permits(1);
    }
}
