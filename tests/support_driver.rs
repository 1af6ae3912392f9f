//! Shared mock collaborators for driver end-to-end tests.
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use objstress::client::Client;
use objstress::types::{Request, Response, Timing};

/// A client that answers every request with a fixed status code after a
/// short delay, and records its shutdown calls.
pub struct MockClient {
    status: u16,
    delay: Duration,
    shutdowns: Mutex<Vec<(bool, Duration)>>,
}

impl MockClient {
    pub fn with_status(status: u16) -> Arc<Self> {
        Arc::new(Self {
            status,
            delay: Duration::from_millis(1),
            shutdowns: Mutex::new(Vec::new()),
        })
    }

    pub fn shutdown_calls(&self) -> Vec<(bool, Duration)> {
        self.shutdowns
            .lock()
            .map_or_else(|_| Vec::new(), |calls| calls.clone())
    }
}

#[async_trait]
impl Client for MockClient {
    async fn execute(&self, request: &Request) -> Response {
        tokio::time::sleep(self.delay).await;
        let now = Instant::now();
        let timing = Timing {
            start: now,
            first_byte: Some(now),
            finish: now,
        };
        Response::new(request.id(), self.status, 0, timing)
            .unwrap_or_else(|_| Response::aborted(request.id(), timing))
    }

    async fn shutdown(&self, immediate: bool, timeout: Duration) -> u64 {
        if let Ok(mut calls) = self.shutdowns.lock() {
            calls.push((immediate, timeout));
        }
        0
    }
}
