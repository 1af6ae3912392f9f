//! Value objects shared across the scheduler, driver, and statistics store.
use std::collections::HashMap;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::ValidationError;

/// Lowest HTTP status code tracked by the statistics store.
pub const MIN_STATUS_CODE: u16 = 100;
/// Highest HTTP status code tracked by the statistics store.
pub const MAX_STATUS_CODE: u16 = 599;
/// Reserved status code for operations terminated before a real response
/// arrived (transport failure or immediate shutdown).
pub const ABORTED_STATUS_CODE: u16 = 599;

/// Category of storage action; the partition key for statistics.
///
/// Every concrete request maps to exactly one non-`All` kind; `All`
/// aggregates across kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    All,
    Write,
    Overwrite,
    Read,
    Metadata,
    Delete,
    List,
    MultipartWrite,
}

impl OperationKind {
    pub const COUNT: usize = 8;

    /// Every kind, `All` first.
    pub const KINDS: [OperationKind; Self::COUNT] = [
        OperationKind::All,
        OperationKind::Write,
        OperationKind::Overwrite,
        OperationKind::Read,
        OperationKind::Metadata,
        OperationKind::Delete,
        OperationKind::List,
        OperationKind::MultipartWrite,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            OperationKind::All => "all",
            OperationKind::Write => "write",
            OperationKind::Overwrite => "overwrite",
            OperationKind::Read => "read",
            OperationKind::Metadata => "metadata",
            OperationKind::Delete => "delete",
            OperationKind::List => "list",
            OperationKind::MultipartWrite => "multipart-write",
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            OperationKind::All => 0,
            OperationKind::Write => 1,
            OperationKind::Overwrite => 2,
            OperationKind::Read => 3,
            OperationKind::Metadata => 4,
            OperationKind::Delete => 5,
            OperationKind::List => 6,
            OperationKind::MultipartWrite => 7,
        }
    }

    /// Whether the transferred payload for this kind is the request body
    /// rather than the response body.
    #[must_use]
    pub const fn is_upload(self) -> bool {
        matches!(
            self,
            OperationKind::Write | OperationKind::Overwrite | OperationKind::MultipartWrite
        )
    }
}

/// Metric tracked per operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterKind {
    /// Completed operations.
    Operations,
    /// Operations currently in flight.
    ActiveOperations,
    /// Payload bytes transferred.
    Bytes,
}

impl CounterKind {
    pub const COUNT: usize = 3;

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            CounterKind::Operations => "operations",
            CounterKind::ActiveOperations => "active-operations",
            CounterKind::Bytes => "bytes",
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            CounterKind::Operations => 0,
            CounterKind::ActiveOperations => 1,
            CounterKind::Bytes => 2,
        }
    }
}

/// Unit attached to rate and runtime configuration values.
#[derive(Debug, Clone, Copy, ValueEnum, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Ns,
    Us,
    Ms,
    S,
    M,
    H,
}

impl TimeUnit {
    #[must_use]
    pub const fn nanos(self) -> u64 {
        match self {
            TimeUnit::Ns => 1,
            TimeUnit::Us => 1_000,
            TimeUnit::Ms => 1_000_000,
            TimeUnit::S => 1_000_000_000,
            TimeUnit::M => 60_000_000_000,
            TimeUnit::H => 3_600_000_000_000,
        }
    }
}

impl std::str::FromStr for TimeUnit {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ns" => Ok(TimeUnit::Ns),
            "us" => Ok(TimeUnit::Us),
            "ms" => Ok(TimeUnit::Ms),
            "s" => Ok(TimeUnit::S),
            "m" => Ok(TimeUnit::M),
            "h" => Ok(TimeUnit::H),
            _ => Err(ValidationError::InvalidTimeUnit {
                value: s.to_owned(),
            }),
        }
    }
}

/// Lifecycle phase of a load-test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Stopping,
    Stopped,
    Failing,
    Failed,
}

impl RunState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            RunState::Running => "running",
            RunState::Stopping => "stopping",
            RunState::Stopped => "stopped",
            RunState::Failing => "failing",
            RunState::Failed => "failed",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, RunState::Stopped | RunState::Failed)
    }
}

/// A single storage operation to issue, identified by a correlation id.
///
/// The context map carries string-keyed metadata for collaborators (auth,
/// naming); the core never interprets it.
#[derive(Debug, Clone)]
pub struct Request {
    id: u64,
    method: http::Method,
    target: String,
    kind: OperationKind,
    body_size: u64,
    context: HashMap<String, String>,
}

impl Request {
    /// Creates a request for one concrete operation.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::AggregateKindNotAllowed`] when `kind` is
    /// [`OperationKind::All`]; aggregate rows are derived, never issued.
    pub fn new(
        id: u64,
        method: http::Method,
        target: impl Into<String>,
        kind: OperationKind,
        body_size: u64,
    ) -> Result<Self, ValidationError> {
        if kind == OperationKind::All {
            return Err(ValidationError::AggregateKindNotAllowed);
        }
        Ok(Self {
            id,
            method,
            target: target.into(),
            kind,
            body_size,
            context: HashMap::new(),
        })
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub const fn method(&self) -> &http::Method {
        &self.method
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        self.kind
    }

    #[must_use]
    pub const fn body_size(&self) -> u64 {
        self.body_size
    }

    #[must_use]
    pub fn context(&self, key: &str) -> Option<&str> {
        self.context.get(key).map(String::as_str)
    }
}

/// Timing marks captured while executing one request.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub start: Instant,
    pub first_byte: Option<Instant>,
    pub finish: Instant,
}

impl Timing {
    #[must_use]
    pub fn latency(&self) -> Duration {
        self.finish.saturating_duration_since(self.start)
    }

    #[must_use]
    pub fn time_to_first_byte(&self) -> Option<Duration> {
        self.first_byte
            .map(|mark| mark.saturating_duration_since(self.start))
    }
}

/// The outcome of one executed request.
#[derive(Debug, Clone)]
pub struct Response {
    request_id: u64,
    status_code: u16,
    body_size: u64,
    timing: Timing,
}

impl Response {
    /// Creates a completed response.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::StatusCodeOutOfRange`] when `status_code`
    /// falls outside `[100, 599]`.
    pub fn new(
        request_id: u64,
        status_code: u16,
        body_size: u64,
        timing: Timing,
    ) -> Result<Self, ValidationError> {
        if !(MIN_STATUS_CODE..=MAX_STATUS_CODE).contains(&status_code) {
            return Err(ValidationError::StatusCodeOutOfRange { code: status_code });
        }
        Ok(Self {
            request_id,
            status_code,
            body_size,
            timing,
        })
    }

    /// Marks a request that never produced a real response.
    #[must_use]
    pub const fn aborted(request_id: u64, timing: Timing) -> Self {
        Self {
            request_id,
            status_code: ABORTED_STATUS_CODE,
            body_size: 0,
            timing,
        }
    }

    #[must_use]
    pub const fn request_id(&self) -> u64 {
        self.request_id
    }

    #[must_use]
    pub const fn status_code(&self) -> u16 {
        self.status_code
    }

    #[must_use]
    pub const fn body_size(&self) -> u64 {
        self.body_size
    }

    #[must_use]
    pub const fn timing(&self) -> &Timing {
        &self.timing
    }

    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        self.status_code == ABORTED_STATUS_CODE
    }
}

/// A matched request/response pair, published to every completion
/// subscriber exactly once.
#[derive(Debug, Clone)]
pub struct Completion {
    pub request: Request,
    pub response: Response,
}
