//! The load-test driver: a single request-issuing loop feeding an
//! asynchronous client, with completions published exactly once each to
//! the scheduler, the statistics store, any extra subscribers, and the
//! stop/fail condition set.
mod control;

pub use control::{DriverControl, HARD_FAILURE_STATUS, LoadTestResult};

use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::client::Client;
use crate::conditions::{ConditionAction, ConditionSet};
use crate::error::{AppResult, SubscriberError, ValidationError};
use crate::scheduler::Scheduler;
use crate::shutdown::{ShutdownSender, shutdown_channel};
use crate::stats::Statistics;
use crate::supply::RequestSupplier;
use crate::types::{Completion, Request, RunState};

/// How often runtime-watching conditions are re-evaluated between
/// completions.
const CONDITION_TICK: Duration = Duration::from_millis(100);

/// Default grace period for draining outstanding requests on a stop.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Receives every completed request exactly once.
///
/// A subscriber failure is fatal: the driver transitions to FAILING and
/// terminates outstanding work.
pub trait CompletionSubscriber: Send + Sync {
    fn name(&self) -> &'static str;

    /// # Errors
    ///
    /// Returns [`SubscriberError`] when the event cannot be processed.
    fn on_completion(&self, completion: &Completion) -> Result<(), SubscriberError>;
}

/// Everything the completion path needs, cloned into each dispatch task.
struct Publisher {
    scheduler: Arc<dyn Scheduler>,
    stats: Arc<Statistics>,
    subscribers: Vec<Arc<dyn CompletionSubscriber>>,
    conditions: Arc<ConditionSet>,
    control: DriverControl,
    started: OnceLock<Instant>,
    in_flight: AtomicU64,
    drained: Notify,
}

impl Publisher {
    /// Publishes one completion to every consumer, in a fixed order: the
    /// scheduler first so its admission state frees up, then statistics,
    /// then extra subscribers, then the condition set.
    fn publish(&self, completion: &Completion) {
        self.scheduler.complete(completion);
        self.stats
            .update_completion(&completion.request, &completion.response);
        for subscriber in &self.subscribers {
            if let Err(err) = subscriber.on_completion(completion) {
                error!(subscriber = subscriber.name(), error = %err, "Subscriber failed.");
                drop(self.control.request_fail(true));
            }
        }
        match self.conditions.evaluate(&self.stats, self.started()) {
            Some(ConditionAction::Fail) => drop(self.control.request_fail(false)),
            Some(ConditionAction::Stop) => drop(self.control.request_stop()),
            None => {}
        }
    }

    fn leave(&self) {
        let previous = self.in_flight.fetch_sub(1, Ordering::AcqRel);
        if previous <= 1 {
            self.drained.notify_waiters();
        }
    }

    /// When the run entered its issue loop; runtime thresholds measure
    /// from here, not from driver construction.
    fn started(&self) -> Instant {
        *self.started.get_or_init(Instant::now)
    }
}

/// Drives one load-test run to completion.
pub struct LoadTestDriver {
    supplier: Arc<dyn RequestSupplier>,
    client: Arc<dyn Client>,
    publisher: Arc<Publisher>,
    shutdown: ShutdownSender,
    drain_timeout: Duration,
}

/// Builder for [`LoadTestDriver`]; collaborators are validated at `build`
/// time, before the run starts.
#[derive(Default)]
pub struct LoadTestDriverBuilder {
    scheduler: Option<Arc<dyn Scheduler>>,
    supplier: Option<Arc<dyn RequestSupplier>>,
    client: Option<Arc<dyn Client>>,
    stats: Option<Arc<Statistics>>,
    conditions: ConditionSet,
    subscribers: Vec<Arc<dyn CompletionSubscriber>>,
    shutdown: Option<ShutdownSender>,
    drain_timeout: Option<Duration>,
}

impl LoadTestDriverBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    #[must_use]
    pub fn supplier(mut self, supplier: Arc<dyn RequestSupplier>) -> Self {
        self.supplier = Some(supplier);
        self
    }

    #[must_use]
    pub fn client(mut self, client: Arc<dyn Client>) -> Self {
        self.client = Some(client);
        self
    }

    #[must_use]
    pub fn stats(mut self, stats: Arc<Statistics>) -> Self {
        self.stats = Some(stats);
        self
    }

    #[must_use]
    pub fn conditions(mut self, conditions: ConditionSet) -> Self {
        self.conditions = conditions;
        self
    }

    #[must_use]
    pub fn subscriber(mut self, subscriber: Arc<dyn CompletionSubscriber>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    #[must_use]
    pub fn shutdown(mut self, shutdown: ShutdownSender) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    #[must_use]
    pub fn drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = Some(drain_timeout);
        self
    }

    /// # Errors
    ///
    /// Returns a validation error when the scheduler, supplier, or client
    /// collaborator is missing, or a metrics error when the statistics
    /// store cannot be allocated.
    pub fn build(self) -> AppResult<LoadTestDriver> {
        let scheduler = self.scheduler.ok_or(ValidationError::MissingScheduler)?;
        let supplier = self.supplier.ok_or(ValidationError::MissingSupplier)?;
        let client = self.client.ok_or(ValidationError::MissingClient)?;
        let stats = match self.stats {
            Some(stats) => stats,
            None => Arc::new(Statistics::new()?),
        };
        let shutdown = self
            .shutdown
            .unwrap_or_else(|| shutdown_channel().0);
        Ok(LoadTestDriver {
            supplier,
            client,
            publisher: Arc::new(Publisher {
                scheduler,
                stats,
                subscribers: self.subscribers,
                conditions: Arc::new(self.conditions),
                control: DriverControl::new(),
                started: OnceLock::new(),
                in_flight: AtomicU64::new(0),
                drained: Notify::new(),
            }),
            shutdown,
            drain_timeout: self.drain_timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT),
        })
    }
}

impl LoadTestDriver {
    #[must_use]
    pub fn builder() -> LoadTestDriverBuilder {
        LoadTestDriverBuilder::new()
    }

    /// The statistics store this run writes into.
    #[must_use]
    pub fn stats(&self) -> Arc<Statistics> {
        Arc::clone(&self.publisher.stats)
    }

    /// Handle for requesting a stop or fail from outside the run.
    #[must_use]
    pub fn control(&self) -> DriverControl {
        self.publisher.control.clone()
    }

    /// Runs the test to a terminal state.
    ///
    /// The steady-state loop never surfaces an error: runtime failures are
    /// translated into a FAILING transition and carried in the result's
    /// status.
    pub async fn run(self) -> LoadTestResult {
        let start_millis = epoch_millis();
        // Anchor the runtime-condition clock to the run, not to build().
        let _started = self.publisher.started();
        let control = self.publisher.control.clone();
        let mut state_rx = control.subscribe();
        let mut shutdown_rx = self.shutdown.subscribe();

        let ticker = self.spawn_condition_ticker();
        info!("Load test running.");

        while control.state() == RunState::Running {
            tokio::select! {
                () = self.publisher.scheduler.wait_for_next() => {}
                _ = state_rx.changed() => continue,
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received.");
                    drop(control.request_stop());
                    continue;
                }
            }
            if control.state() != RunState::Running {
                break;
            }
            let request = match self.supplier.get() {
                Ok(request) => request,
                Err(err) => {
                    error!(error = %err, "Request production failed.");
                    drop(control.request_fail(true));
                    break;
                }
            };
            self.dispatch(request);
        }

        // Drain accounting starts here: late aborted completions are
        // discarded from the totals, late successes still count.
        let halting = control.state();
        self.publisher.stats.update_run_state(halting);

        match halting {
            RunState::Failing => {
                let terminated = self.client.shutdown(true, Duration::ZERO).await;
                info!(terminated, "Immediate shutdown complete.");
            }
            RunState::Running | RunState::Stopping | RunState::Stopped | RunState::Failed => {
                self.wait_for_drain().await;
                let remaining = self.client.shutdown(false, self.drain_timeout).await;
                if remaining > 0 {
                    debug!(remaining, "Requests still outstanding after drain.");
                }
            }
        }

        if let Some(ticker) = ticker {
            ticker.abort();
        }

        let terminal = control.finish();
        self.publisher.stats.update_run_state(terminal);
        let status = self.final_status(terminal);
        info!(state = terminal.as_str(), status, "Load test finished.");
        LoadTestResult::from_parts(status, start_millis, epoch_millis())
    }

    fn dispatch(&self, request: Request) {
        self.publisher.stats.update_dispatch(&request);
        self.publisher.in_flight.fetch_add(1, Ordering::AcqRel);
        let client = Arc::clone(&self.client);
        let publisher = Arc::clone(&self.publisher);
        drop(tokio::spawn(async move {
            let response = client.execute(&request).await;
            let completion = Completion { request, response };
            publisher.publish(&completion);
            publisher.leave();
        }));
    }

    fn spawn_condition_ticker(&self) -> Option<tokio::task::JoinHandle<()>> {
        if !self.publisher.conditions.watches_runtime() {
            return None;
        }
        let publisher = Arc::clone(&self.publisher);
        let mut state_rx = publisher.control.subscribe();
        Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval(CONDITION_TICK);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        match publisher
                            .conditions
                            .evaluate(&publisher.stats, publisher.started())
                        {
                            Some(ConditionAction::Fail) => {
                                drop(publisher.control.request_fail(false));
                            }
                            Some(ConditionAction::Stop) => {
                                drop(publisher.control.request_stop());
                            }
                            None => {}
                        }
                    }
                    _ = state_rx.changed() => {
                        if publisher.control.state() != RunState::Running {
                            break;
                        }
                    }
                }
            }
        }))
    }

    /// Waits for in-flight completions to publish, bounded by the drain
    /// timeout.
    async fn wait_for_drain(&self) {
        let deadline = Instant::now() + self.drain_timeout;
        while self.publisher.in_flight.load(Ordering::Acquire) > 0 {
            let now = Instant::now();
            if now >= deadline {
                debug!("Drain timeout elapsed.");
                break;
            }
            let remaining = deadline.saturating_duration_since(now);
            tokio::select! {
                () = self.publisher.drained.notified() => {}
                () = tokio::time::sleep(remaining) => break,
            }
        }
    }

    fn final_status(&self, terminal: RunState) -> i64 {
        if terminal != RunState::Failed {
            return 0;
        }
        if self.publisher.control.hard_failure() {
            return HARD_FAILURE_STATUS;
        }
        i64::try_from(self.publisher.conditions.fired_fail_count())
            .unwrap_or(i64::MAX)
            .max(1)
    }
}

fn epoch_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
}
