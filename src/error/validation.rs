use thiserror::Error;

/// Malformed construction parameters or missing collaborators.
///
/// These are always surfaced synchronously before a run starts and are
/// never retried.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Concurrency must be > 0.")]
    NonPositiveConcurrency,
    #[error("Request rate must be > 0, got {value}.")]
    NonPositiveRate { value: f64 },
    #[error("Ramp-up duration must be >= 0, got {value}.")]
    NegativeRampDuration { value: f64 },
    #[error("Distribution mean must be >= 0, got {value}.")]
    NegativeMean { value: f64 },
    #[error("Distribution spread must be >= 0, got {value}.")]
    NegativeSpread { value: f64 },
    #[error("Status code {code} is outside [100, 599].")]
    StatusCodeOutOfRange { code: u16 },
    #[error("Requests must map to a concrete operation kind, not the aggregate.")]
    AggregateKindNotAllowed,
    #[error("Condition threshold must be > 0.")]
    ZeroConditionThreshold,
    #[error("Runtime limit must be > 0.")]
    ZeroRuntimeLimit,
    #[error("Result start timestamp must be >= 0, got {start}.")]
    NegativeStartTimestamp { start: i64 },
    #[error("Result finish {finish} precedes start {start}.")]
    FinishBeforeStart { start: i64, finish: i64 },
    #[error("A pacing distribution is required for the rate scheduler.")]
    MissingDistribution,
    #[error("Missing target URL (set --url or provide in config).")]
    MissingTargetUrl,
    #[error("Invalid target URL '{url}': {source}")]
    InvalidTargetUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Set either a concurrency level or a request rate, not both.")]
    ConcurrencyRateConflict,
    #[error("Either a concurrency level or a request rate is required.")]
    MissingAdmissionPolicy,
    #[error("Workload weights must not all be zero.")]
    ZeroWorkloadWeights,
    #[error("Invalid time unit '{value}'. Use ns, us, ms, s, m, or h.")]
    InvalidTimeUnit { value: String },
    #[error("Invalid size distribution '{value}'. Use uniform, normal, or poisson.")]
    InvalidSizeDistribution { value: String },
    #[error("A request supplier is required.")]
    MissingSupplier,
    #[error("A client is required.")]
    MissingClient,
    #[error("A scheduler is required.")]
    MissingScheduler,
    #[error("Run finished with status {status}.")]
    RunFailed { status: i32 },
}
