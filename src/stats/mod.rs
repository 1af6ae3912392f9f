//! Concurrent per-operation statistics: counters, status-code histograms,
//! and latency aggregation.
//!
//! Counters are independent atomics keyed by operation kind and counter
//! kind; there is no coarse lock across cells, so completions on different
//! operations never serialize against each other.
#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

use hdrhistogram::Histogram;

use crate::error::{MetricsError, ValidationError};
use crate::types::{
    CounterKind, MAX_STATUS_CODE, MIN_STATUS_CODE, OperationKind, Request, Response, RunState,
};

const STATUS_SLOTS: usize = (MAX_STATUS_CODE - MIN_STATUS_CODE) as usize + 1;

/// Latency histograms cover one microsecond up to an hour.
const LATENCY_HIGH_MICROS: u64 = 3_600_000_000;

/// Per-run statistics store, owned by the driver for the duration of one
/// test run and shared by reference with every completion path.
pub struct Statistics {
    counters: [[AtomicU64; CounterKind::COUNT]; OperationKind::COUNT],
    status_codes: Box<[AtomicU64]>,
    latencies: Vec<Mutex<Histogram<u64>>>,
    run_state: AtomicU8,
    draining: AtomicBool,
}

/// A point-in-time copy of every counter cell.
///
/// Two snapshots taken at different times yield interval readings via
/// [`StatsSnapshot::delta`]; a single snapshot is a cumulative reading.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsSnapshot {
    counters: [[u64; CounterKind::COUNT]; OperationKind::COUNT],
}

/// Aggregated latency figures for one operation kind, in microseconds.
#[derive(Debug, Clone, Copy)]
pub struct LatencySummary {
    pub count: u64,
    pub mean_micros: f64,
    pub p50_micros: u64,
    pub p90_micros: u64,
    pub p99_micros: u64,
    pub max_micros: u64,
}

impl Statistics {
    /// Creates an empty store.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::HistogramCreate`] if a latency histogram
    /// cannot be allocated.
    pub fn new() -> Result<Self, MetricsError> {
        let mut latencies = Vec::with_capacity(OperationKind::COUNT);
        for _ in 0..OperationKind::COUNT {
            let histogram = Histogram::new_with_bounds(1, LATENCY_HIGH_MICROS, 3)
                .map_err(|source| MetricsError::HistogramCreate { source })?;
            latencies.push(Mutex::new(histogram));
        }
        let status_codes = (0..OperationKind::COUNT.saturating_mul(STATUS_SLOTS))
            .map(|_| AtomicU64::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Ok(Self {
            counters: std::array::from_fn(|_| std::array::from_fn(|_| AtomicU64::new(0))),
            status_codes,
            latencies,
            run_state: AtomicU8::new(encode_state(RunState::Running)),
            draining: AtomicBool::new(false),
        })
    }

    /// Records a dispatched request: one more operation in flight for its
    /// kind and for the aggregate.
    pub fn update_dispatch(&self, request: &Request) {
        self.add(request.kind(), CounterKind::ActiveOperations, 1);
        self.add(OperationKind::All, CounterKind::ActiveOperations, 1);
    }

    /// Records a completed request.
    ///
    /// The in-flight slot is always released. Once the run has left
    /// RUNNING, late aborted completions are discarded from the totals;
    /// late successful completions still count.
    pub fn update_completion(&self, request: &Request, response: &Response) {
        let kind = request.kind();
        self.release_active(kind);
        self.release_active(OperationKind::All);

        if self.draining.load(Ordering::Acquire) && response.is_aborted() {
            return;
        }

        self.add(kind, CounterKind::Operations, 1);
        self.add(OperationKind::All, CounterKind::Operations, 1);

        let bytes = if kind.is_upload() {
            request.body_size()
        } else {
            response.body_size()
        };
        if bytes > 0 {
            self.add(kind, CounterKind::Bytes, bytes);
            self.add(OperationKind::All, CounterKind::Bytes, bytes);
        }

        self.bump_status(kind, response.status_code());
        self.bump_status(OperationKind::All, response.status_code());

        let micros = u64::try_from(response.timing().latency().as_micros()).unwrap_or(u64::MAX);
        self.record_latency(kind, micros);
        self.record_latency(OperationKind::All, micros);
    }

    /// Captures a run-state transition for post-shutdown accounting.
    pub fn update_run_state(&self, state: RunState) {
        self.run_state.store(encode_state(state), Ordering::Release);
        if state != RunState::Running {
            self.draining.store(true, Ordering::Release);
        }
    }

    #[must_use]
    pub fn run_state(&self) -> RunState {
        decode_state(self.run_state.load(Ordering::Acquire))
    }

    /// Cumulative point read of one counter cell.
    #[must_use]
    pub fn get(&self, kind: OperationKind, counter: CounterKind) -> u64 {
        self.cell(kind, counter)
            .map_or(0, |cell| cell.load(Ordering::Acquire))
    }

    /// Point read of one status-code cell.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::StatusCodeOutOfRange`] for codes outside
    /// `[100, 599]`. A valid code that was never observed reads zero.
    pub fn get_status_code(&self, kind: OperationKind, code: u16) -> Result<u64, ValidationError> {
        let slot = status_slot(code)?;
        Ok(self
            .status_cell(kind, slot)
            .map_or(0, |cell| cell.load(Ordering::Acquire)))
    }

    /// Owned snapshot of every observed status code for one kind.
    #[must_use]
    pub fn status_codes(&self, kind: OperationKind) -> BTreeMap<u16, u64> {
        let mut codes = BTreeMap::new();
        for slot in 0..STATUS_SLOTS {
            let count = self
                .status_cell(kind, slot)
                .map_or(0, |cell| cell.load(Ordering::Acquire));
            if count > 0 {
                codes.insert(MIN_STATUS_CODE.saturating_add(slot as u16), count);
            }
        }
        codes
    }

    /// Copies every counter cell at once.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let mut snapshot = StatsSnapshot::default();
        for kind in OperationKind::KINDS {
            for counter in [
                CounterKind::Operations,
                CounterKind::ActiveOperations,
                CounterKind::Bytes,
            ] {
                snapshot.set(kind, counter, self.get(kind, counter));
            }
        }
        snapshot
    }

    /// Aggregated latency for one kind, or `None` before any completion.
    #[must_use]
    pub fn latency_summary(&self, kind: OperationKind) -> Option<LatencySummary> {
        let histogram = self.latencies.get(kind.index())?.lock().ok()?;
        if histogram.is_empty() {
            return None;
        }
        Some(LatencySummary {
            count: histogram.len(),
            mean_micros: histogram.mean(),
            p50_micros: histogram.value_at_quantile(0.50),
            p90_micros: histogram.value_at_quantile(0.90),
            p99_micros: histogram.value_at_quantile(0.99),
            max_micros: histogram.max(),
        })
    }

    fn cell(&self, kind: OperationKind, counter: CounterKind) -> Option<&AtomicU64> {
        self.counters
            .get(kind.index())
            .and_then(|row| row.get(counter.index()))
    }

    fn status_cell(&self, kind: OperationKind, slot: usize) -> Option<&AtomicU64> {
        self.status_codes
            .get(kind.index().saturating_mul(STATUS_SLOTS).saturating_add(slot))
    }

    fn add(&self, kind: OperationKind, counter: CounterKind, amount: u64) {
        if let Some(cell) = self.cell(kind, counter) {
            cell.fetch_add(amount, Ordering::AcqRel);
        }
    }

    /// Saturating decrement: the in-flight gauge can never read negative.
    fn release_active(&self, kind: OperationKind) {
        if let Some(cell) = self.cell(kind, CounterKind::ActiveOperations) {
            drop(cell.fetch_update(Ordering::AcqRel, Ordering::Acquire, |value| {
                Some(value.saturating_sub(1))
            }));
        }
    }

    fn bump_status(&self, kind: OperationKind, code: u16) {
        if let Ok(slot) = status_slot(code)
            && let Some(cell) = self.status_cell(kind, slot)
        {
            cell.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn record_latency(&self, kind: OperationKind, micros: u64) {
        if let Some(histogram) = self.latencies.get(kind.index())
            && let Ok(mut histogram) = histogram.lock()
        {
            histogram.saturating_record(micros.max(1));
        }
    }
}

impl StatsSnapshot {
    #[must_use]
    pub fn get(&self, kind: OperationKind, counter: CounterKind) -> u64 {
        self.counters
            .get(kind.index())
            .and_then(|row| row.get(counter.index()))
            .copied()
            .unwrap_or(0)
    }

    fn set(&mut self, kind: OperationKind, counter: CounterKind, value: u64) {
        if let Some(cell) = self
            .counters
            .get_mut(kind.index())
            .and_then(|row| row.get_mut(counter.index()))
        {
            *cell = value;
        }
    }

    /// Interval reading: this snapshot minus an earlier one.
    ///
    /// Gauges (active operations) keep the later value rather than a
    /// difference.
    #[must_use]
    pub fn delta(&self, earlier: &StatsSnapshot) -> StatsSnapshot {
        let mut interval = StatsSnapshot::default();
        for kind in OperationKind::KINDS {
            for counter in [CounterKind::Operations, CounterKind::Bytes] {
                let value = self
                    .get(kind, counter)
                    .saturating_sub(earlier.get(kind, counter));
                interval.set(kind, counter, value);
            }
            interval.set(
                kind,
                CounterKind::ActiveOperations,
                self.get(kind, CounterKind::ActiveOperations),
            );
        }
        interval
    }
}

fn status_slot(code: u16) -> Result<usize, ValidationError> {
    if !(MIN_STATUS_CODE..=MAX_STATUS_CODE).contains(&code) {
        return Err(ValidationError::StatusCodeOutOfRange { code });
    }
    Ok(usize::from(code - MIN_STATUS_CODE))
}

const fn encode_state(state: RunState) -> u8 {
    match state {
        RunState::Running => 0,
        RunState::Stopping => 1,
        RunState::Stopped => 2,
        RunState::Failing => 3,
        RunState::Failed => 4,
    }
}

const fn decode_state(value: u8) -> RunState {
    match value {
        1 => RunState::Stopping,
        2 => RunState::Stopped,
        3 => RunState::Failing,
        4 => RunState::Failed,
        _ => RunState::Running,
    }
}
