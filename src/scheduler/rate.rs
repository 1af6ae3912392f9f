use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use crate::distribution::Distribution;
use crate::error::ValidationError;
use crate::shutdown::ShutdownSender;
use crate::types::{Completion, TimeUnit};

use super::Scheduler;

/// Effective-rate floor while ramping, so the very first gap stays finite.
const RAMP_FLOOR: f64 = 0.01;

/// Paces requests by sampled inter-arrival gaps, independent of completions.
///
/// Each wait draws a rate sample (operations per time unit), converts it to
/// a gap, subtracts the time already elapsed since the previous call, and
/// sleeps for the remainder. A configured ramp-up scales the effective rate
/// linearly from near zero to the target over the ramp window.
pub struct RequestRateScheduler {
    distribution: Mutex<Distribution>,
    unit_nanos: f64,
    ramp: Option<Duration>,
    ramp_origin: Mutex<Option<Instant>>,
    last_call: Mutex<Instant>,
    shutdown: ShutdownSender,
}

impl RequestRateScheduler {
    /// Creates a scheduler pacing at the distribution's mean rate per
    /// `unit`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::NonPositiveRate`] when the distribution's
    /// mean rate is not positive.
    pub fn new(
        distribution: Distribution,
        unit: TimeUnit,
        ramp: Option<Duration>,
        shutdown: &ShutdownSender,
    ) -> Result<Self, ValidationError> {
        if distribution.mean() <= 0.0 {
            return Err(ValidationError::NonPositiveRate {
                value: distribution.mean(),
            });
        }
        Ok(Self {
            distribution: Mutex::new(distribution),
            unit_nanos: unit.nanos() as f64,
            ramp: ramp.filter(|duration| !duration.is_zero()),
            ramp_origin: Mutex::new(None),
            last_call: Mutex::new(Instant::now()),
            shutdown: shutdown.clone(),
        })
    }

    fn sample_gap_nanos(&self) -> f64 {
        let sample = match self.distribution.lock() {
            Ok(mut distribution) => distribution.next_sample(),
            Err(_) => return 0.0,
        };
        if sample <= 0.0 {
            return 0.0;
        }
        let mut gap = self.unit_nanos / sample;
        if let Some(ramp) = self.ramp {
            let origin = {
                let mut guard = match self.ramp_origin.lock() {
                    Ok(guard) => guard,
                    Err(_) => return gap,
                };
                *guard.get_or_insert_with(Instant::now)
            };
            let fraction = origin.elapsed().as_secs_f64() / ramp.as_secs_f64();
            gap /= fraction.clamp(RAMP_FLOOR, 1.0);
        }
        gap
    }

    fn mark_called(&self) {
        if let Ok(mut last_call) = self.last_call.lock() {
            *last_call = Instant::now();
        }
    }

    fn previous_call(&self) -> Instant {
        self.last_call
            .lock()
            .map_or_else(|_| Instant::now(), |guard| *guard)
    }
}

#[async_trait]
impl Scheduler for RequestRateScheduler {
    async fn wait_for_next(&self) {
        let gap_nanos = self.sample_gap_nanos();
        // A zero or unrepresentable gap means "proceed immediately" rather
        // than dividing by zero.
        if !gap_nanos.is_finite() || gap_nanos <= 0.0 {
            self.mark_called();
            return;
        }
        let gap = Duration::from_nanos(gap_nanos as u64);
        // Drift correction: time already spent since the previous call
        // counts toward this gap.
        let deadline = self.previous_call() + gap;
        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            // Re-measure after every wake instead of trusting a single
            // sleep to cover the whole remainder.
            let remaining = deadline.saturating_duration_since(now);
            tokio::select! {
                () = tokio::time::sleep(remaining) => {}
                _ = shutdown_rx.recv() => {
                    debug!("Rate gate interrupted; proceeding.");
                    self.mark_called();
                    return;
                }
            }
        }
        self.mark_called();
    }

    /// Rate pacing is independent of request completion.
    fn complete(&self, _completion: &Completion) {}
}
