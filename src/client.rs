//! The asynchronous client seam and its HTTP implementation.
//!
//! The driver only needs two operations from a client: execute one request
//! and shut down. Transport failures never surface as errors; they become
//! aborted responses so every dispatched request produces exactly one
//! completion.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::args::DEFAULT_USER_AGENT;
use crate::types::{MAX_STATUS_CODE, MIN_STATUS_CODE, Request, Response, Timing};

/// Executes requests against the target cluster.
#[async_trait]
pub trait Client: Send + Sync {
    /// Executes one request to completion. Never fails: a request that
    /// cannot produce a real response yields an aborted one.
    async fn execute(&self, request: &Request) -> Response;

    /// Stops the client. With `immediate` set, outstanding requests are
    /// abandoned at once; otherwise the client waits up to `timeout` for
    /// them to drain. Returns the number of requests still outstanding
    /// when shutdown finished.
    async fn shutdown(&self, immediate: bool, timeout: Duration) -> u64;
}

/// reqwest-backed [`Client`] for object-storage endpoints.
pub struct HttpClient {
    http: reqwest::Client,
    in_flight: Arc<AtomicU64>,
    drained: Arc<Notify>,
    closed: AtomicBool,
}

impl HttpClient {
    /// Builds a client with the given per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`reqwest::Error`] when the underlying connection pool
    /// cannot be constructed.
    pub fn new(request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            in_flight: Arc::new(AtomicU64::new(0)),
            drained: Arc::new(Notify::new()),
            closed: AtomicBool::new(false),
        })
    }

    fn enter(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    fn leave(&self) {
        let previous = self.in_flight.fetch_sub(1, Ordering::AcqRel);
        if previous <= 1 {
            self.drained.notify_waiters();
        }
    }

    async fn send(&self, request: &Request) -> Result<Response, reqwest::Error> {
        let start = Instant::now();
        let mut builder = self
            .http
            .request(request.method().clone(), request.target());
        if request.body_size() > 0 {
            builder = builder.body(vec![0_u8; usize::try_from(request.body_size()).unwrap_or(0)]);
        }
        let upstream = builder.send().await?;
        let first_byte = Instant::now();
        let status = upstream.status().as_u16();
        let body = upstream.bytes().await?;
        let timing = Timing {
            start,
            first_byte: Some(first_byte),
            finish: Instant::now(),
        };
        let body_size = body.len() as u64;
        // Codes outside the tracked range collapse to the abort marker.
        if (MIN_STATUS_CODE..=MAX_STATUS_CODE).contains(&status) {
            Response::new(request.id(), status, body_size, timing)
                .map_or_else(|_| Ok(Response::aborted(request.id(), timing)), Ok)
        } else {
            warn!(status, id = request.id(), "Untracked status code.");
            Ok(Response::aborted(request.id(), timing))
        }
    }
}

#[async_trait]
impl Client for HttpClient {
    async fn execute(&self, request: &Request) -> Response {
        if self.closed.load(Ordering::Acquire) {
            let now = Instant::now();
            return Response::aborted(
                request.id(),
                Timing {
                    start: now,
                    first_byte: None,
                    finish: now,
                },
            );
        }
        self.enter();
        let start = Instant::now();
        let response = match self.send(request).await {
            Ok(response) => response,
            Err(err) => {
                debug!(id = request.id(), error = %err, "Request aborted by transport.");
                Response::aborted(
                    request.id(),
                    Timing {
                        start,
                        first_byte: None,
                        finish: Instant::now(),
                    },
                )
            }
        };
        self.leave();
        response
    }

    async fn shutdown(&self, immediate: bool, timeout: Duration) -> u64 {
        self.closed.store(true, Ordering::Release);
        if immediate {
            return self.in_flight.load(Ordering::Acquire);
        }
        let deadline = Instant::now() + timeout;
        while self.in_flight.load(Ordering::Acquire) > 0 {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let remaining = deadline.saturating_duration_since(now);
            tokio::select! {
                () = self.drained.notified() => {}
                () = tokio::time::sleep(remaining) => break,
            }
        }
        self.in_flight.load(Ordering::Acquire)
    }
}
