//! Stopping and failing conditions evaluated against the statistics store.
//!
//! Each condition is armed at construction and fires at most once; after
//! the first crossing it disarms itself and ignores further events. The
//! driver resolves simultaneous signals, fail taking precedence over stop.
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

use crate::error::ValidationError;
use crate::stats::Statistics;
use crate::types::{CounterKind, MAX_STATUS_CODE, MIN_STATUS_CODE, OperationKind};

/// What a fired condition asks the driver to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionAction {
    /// Stop issuing requests and drain outstanding work.
    Stop,
    /// Terminate outstanding work immediately.
    Fail,
}

/// The quantity a condition watches.
#[derive(Debug, Clone, Copy)]
pub enum Watch {
    /// Completed operations of one kind reach the threshold.
    OperationCount {
        kind: OperationKind,
        threshold: u64,
    },
    /// Wall time since the run started reaches the limit.
    Runtime { limit: Duration },
    /// One status code has been observed threshold times for one kind.
    StatusCodeCount {
        kind: OperationKind,
        code: u16,
        threshold: u64,
    },
    /// Requests in flight for one kind reach the threshold.
    ConcurrentRequests {
        kind: OperationKind,
        threshold: u64,
    },
}

/// A single armed threshold.
pub struct Condition {
    watch: Watch,
    action: ConditionAction,
    armed: AtomicBool,
}

impl Condition {
    /// Builds a condition, validating its threshold.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::ZeroConditionThreshold`] for a zero count
    /// threshold, [`ValidationError::ZeroRuntimeLimit`] for a zero runtime
    /// limit, and [`ValidationError::StatusCodeOutOfRange`] for a watched
    /// code outside `[100, 599]`.
    pub fn new(watch: Watch, action: ConditionAction) -> Result<Self, ValidationError> {
        match watch {
            Watch::OperationCount { threshold, .. } | Watch::ConcurrentRequests { threshold, .. } => {
                if threshold == 0 {
                    return Err(ValidationError::ZeroConditionThreshold);
                }
            }
            Watch::Runtime { limit } => {
                if limit.is_zero() {
                    return Err(ValidationError::ZeroRuntimeLimit);
                }
            }
            Watch::StatusCodeCount {
                code, threshold, ..
            } => {
                if !(MIN_STATUS_CODE..=MAX_STATUS_CODE).contains(&code) {
                    return Err(ValidationError::StatusCodeOutOfRange { code });
                }
                if threshold == 0 {
                    return Err(ValidationError::ZeroConditionThreshold);
                }
            }
        }
        Ok(Self {
            watch,
            action,
            armed: AtomicBool::new(true),
        })
    }

    #[must_use]
    pub const fn action(&self) -> ConditionAction {
        self.action
    }

    /// Whether this condition already fired.
    #[must_use]
    pub fn fired(&self) -> bool {
        !self.armed.load(Ordering::Acquire)
    }

    /// Re-evaluates the watched quantity; returns the action on the first
    /// crossing only.
    #[must_use]
    pub fn evaluate(&self, stats: &Statistics, started: Instant) -> Option<ConditionAction> {
        if !self.armed.load(Ordering::Acquire) {
            return None;
        }
        let crossed = match self.watch {
            Watch::OperationCount { kind, threshold } => {
                stats.get(kind, CounterKind::Operations) >= threshold
            }
            Watch::Runtime { limit } => started.elapsed() >= limit,
            Watch::StatusCodeCount {
                kind,
                code,
                threshold,
            } => stats.get_status_code(kind, code).unwrap_or(0) >= threshold,
            Watch::ConcurrentRequests { kind, threshold } => {
                stats.get(kind, CounterKind::ActiveOperations) >= threshold
            }
        };
        if !crossed {
            return None;
        }
        // The swap makes firing a one-shot even under concurrent evaluation.
        if self.armed.swap(false, Ordering::AcqRel) {
            info!(
                action = match self.action {
                    ConditionAction::Stop => "stop",
                    ConditionAction::Fail => "fail",
                },
                watch = ?self.watch,
                "Condition fired."
            );
            return Some(self.action);
        }
        None
    }
}

/// All registered conditions for one run.
#[derive(Default)]
pub struct ConditionSet {
    conditions: Vec<Condition>,
}

impl ConditionSet {
    #[must_use]
    pub fn new(conditions: Vec<Condition>) -> Self {
        Self { conditions }
    }

    pub fn push(&mut self, condition: Condition) {
        self.conditions.push(condition);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Evaluates every armed condition against the current statistics.
    ///
    /// Every condition that crosses its threshold on this tick fires, even
    /// when an earlier one already requested a halt; the strongest action
    /// is returned, fail over stop.
    #[must_use]
    pub fn evaluate(&self, stats: &Statistics, started: Instant) -> Option<ConditionAction> {
        let mut strongest = None;
        for condition in &self.conditions {
            match condition.evaluate(stats, started) {
                Some(ConditionAction::Fail) => strongest = Some(ConditionAction::Fail),
                Some(ConditionAction::Stop) => {
                    if strongest.is_none() {
                        strongest = Some(ConditionAction::Stop);
                    }
                }
                None => {}
            }
        }
        strongest
    }

    /// How many fail conditions have fired; the non-zero exit status of a
    /// failed run.
    #[must_use]
    pub fn fired_fail_count(&self) -> u64 {
        self.conditions
            .iter()
            .filter(|condition| condition.action() == ConditionAction::Fail && condition.fired())
            .count() as u64
    }

    /// Whether any registered condition watches elapsed runtime; such
    /// conditions need periodic evaluation, not just completion ticks.
    #[must_use]
    pub fn watches_runtime(&self) -> bool {
        self.conditions
            .iter()
            .any(|condition| matches!(condition.watch, Watch::Runtime { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Request, Response, Timing};

    fn stats_with_writes(count: u64) -> Result<Statistics, Box<dyn std::error::Error>> {
        let stats = Statistics::new()?;
        for id in 0..count {
            let request = Request::new(
                id,
                http::Method::PUT,
                format!("/bucket/obj-{id}"),
                OperationKind::Write,
                64,
            )?;
            let now = Instant::now();
            let timing = Timing {
                start: now,
                first_byte: Some(now),
                finish: now,
            };
            let response = Response::new(id, 201, 0, timing)?;
            stats.update_dispatch(&request);
            stats.update_completion(&request, &response);
        }
        Ok(stats)
    }

    #[test]
    fn rejects_zero_thresholds() {
        assert!(matches!(
            Condition::new(
                Watch::OperationCount {
                    kind: OperationKind::Write,
                    threshold: 0,
                },
                ConditionAction::Stop,
            ),
            Err(ValidationError::ZeroConditionThreshold)
        ));
        assert!(matches!(
            Condition::new(
                Watch::Runtime {
                    limit: Duration::ZERO,
                },
                ConditionAction::Stop,
            ),
            Err(ValidationError::ZeroRuntimeLimit)
        ));
        assert!(matches!(
            Condition::new(
                Watch::StatusCodeCount {
                    kind: OperationKind::All,
                    code: 600,
                    threshold: 1,
                },
                ConditionAction::Fail,
            ),
            Err(ValidationError::StatusCodeOutOfRange { code: 600 })
        ));
    }

    #[tokio::test]
    async fn fires_exactly_once_at_the_threshold() -> Result<(), Box<dyn std::error::Error>> {
        let condition = Condition::new(
            Watch::OperationCount {
                kind: OperationKind::Write,
                threshold: 5,
            },
            ConditionAction::Stop,
        )?;
        let started = Instant::now();

        let below = stats_with_writes(4)?;
        assert_eq!(condition.evaluate(&below, started), None);
        assert!(!condition.fired());

        let at = stats_with_writes(5)?;
        assert_eq!(condition.evaluate(&at, started), Some(ConditionAction::Stop));
        assert!(condition.fired());

        // The sixth completion must not re-fire a disarmed condition.
        let above = stats_with_writes(6)?;
        assert_eq!(condition.evaluate(&above, started), None);
        Ok(())
    }

    #[tokio::test]
    async fn fail_takes_precedence_on_the_same_tick() -> Result<(), Box<dyn std::error::Error>> {
        let set = ConditionSet::new(vec![
            Condition::new(
                Watch::OperationCount {
                    kind: OperationKind::Write,
                    threshold: 3,
                },
                ConditionAction::Stop,
            )?,
            Condition::new(
                Watch::StatusCodeCount {
                    kind: OperationKind::Write,
                    code: 201,
                    threshold: 3,
                },
                ConditionAction::Fail,
            )?,
        ]);
        let stats = stats_with_writes(3)?;
        assert_eq!(
            set.evaluate(&stats, Instant::now()),
            Some(ConditionAction::Fail)
        );
        // Both conditions fired on that tick.
        assert_eq!(set.fired_fail_count(), 1);
        assert_eq!(set.evaluate(&stats, Instant::now()), None);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn runtime_condition_fires_after_the_limit() -> Result<(), Box<dyn std::error::Error>> {
        let condition = Condition::new(
            Watch::Runtime {
                limit: Duration::from_secs(10),
            },
            ConditionAction::Stop,
        )?;
        let stats = Statistics::new()?;
        let started = Instant::now();
        assert_eq!(condition.evaluate(&stats, started), None);
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(
            condition.evaluate(&stats, started),
            Some(ConditionAction::Stop)
        );
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_request_condition_watches_the_gauge(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let condition = Condition::new(
            Watch::ConcurrentRequests {
                kind: OperationKind::All,
                threshold: 2,
            },
            ConditionAction::Fail,
        )?;
        let stats = Statistics::new()?;
        let first = Request::new(1, http::Method::PUT, "/bucket/a", OperationKind::Write, 1)?;
        let second = Request::new(2, http::Method::GET, "/bucket/b", OperationKind::Read, 0)?;
        stats.update_dispatch(&first);
        assert_eq!(condition.evaluate(&stats, Instant::now()), None);
        stats.update_dispatch(&second);
        assert_eq!(
            condition.evaluate(&stats, Instant::now()),
            Some(ConditionAction::Fail)
        );
        Ok(())
    }
}
