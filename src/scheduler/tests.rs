use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, timeout};

use crate::distribution::Distribution;
use crate::error::ValidationError;
use crate::shutdown::shutdown_channel;
use crate::types::{Completion, OperationKind, Request, Response, TimeUnit, Timing};

use super::{ConcurrentRequestScheduler, RequestRateScheduler, Scheduler};

const GATE_PROBE: Duration = Duration::from_millis(250);

fn completion() -> Result<Completion, ValidationError> {
    let request = Request::new(1, http::Method::PUT, "/bucket/obj", OperationKind::Write, 8)?;
    let now = Instant::now();
    let timing = Timing {
        start: now,
        first_byte: Some(now),
        finish: now,
    };
    let response = Response::new(1, 201, 0, timing)?;
    Ok(Completion { request, response })
}

#[test]
fn concurrent_rejects_zero_concurrency() {
    let (shutdown_tx, _rx) = shutdown_channel();
    assert!(matches!(
        ConcurrentRequestScheduler::new(0, None, &shutdown_tx),
        Err(ValidationError::NonPositiveConcurrency)
    ));
}

#[tokio::test(start_paused = true)]
async fn concurrent_admits_exactly_n_without_completions() -> Result<(), ValidationError> {
    let (shutdown_tx, _rx) = shutdown_channel();
    let scheduler = ConcurrentRequestScheduler::new(3, None, &shutdown_tx)?;

    for _ in 0..3 {
        assert!(
            timeout(GATE_PROBE, scheduler.wait_for_next()).await.is_ok(),
            "wait within the concurrency level must not block"
        );
    }
    assert!(
        timeout(GATE_PROBE, scheduler.wait_for_next()).await.is_err(),
        "wait beyond the concurrency level must block"
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn concurrent_completion_releases_one_permit() -> Result<(), ValidationError> {
    let (shutdown_tx, _rx) = shutdown_channel();
    let scheduler = ConcurrentRequestScheduler::new(2, None, &shutdown_tx)?;
    let event = completion()?;

    scheduler.wait_for_next().await;
    scheduler.wait_for_next().await;
    assert!(timeout(GATE_PROBE, scheduler.wait_for_next()).await.is_err());

    scheduler.complete(&event);
    assert!(timeout(GATE_PROBE, scheduler.wait_for_next()).await.is_ok());
    assert!(timeout(GATE_PROBE, scheduler.wait_for_next()).await.is_err());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn concurrent_shutdown_interrupts_blocked_wait() -> Result<(), ValidationError> {
    let (shutdown_tx, _rx) = shutdown_channel();
    let scheduler = Arc::new(ConcurrentRequestScheduler::new(1, None, &shutdown_tx)?);

    scheduler.wait_for_next().await;
    let blocked = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.wait_for_next().await })
    };
    tokio::task::yield_now().await;
    drop(shutdown_tx.send(()));
    assert!(
        timeout(GATE_PROBE, blocked).await.is_ok(),
        "interrupted wait must return promptly"
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn concurrent_ramp_releases_permits_over_time() -> Result<(), ValidationError> {
    let (shutdown_tx, _rx) = shutdown_channel();
    let ramp = Duration::from_secs(1);
    let scheduler = ConcurrentRequestScheduler::new(4, Some(ramp), &shutdown_tx)?;

    // At the origin only the free first admission is available.
    scheduler.wait_for_next().await;
    assert!(
        timeout(Duration::from_millis(20), scheduler.wait_for_next())
            .await
            .is_err()
    );

    // Past the ramp window all remaining seed permits are released.
    tokio::time::advance(Duration::from_secs(2)).await;
    for _ in 0..3 {
        assert!(
            timeout(GATE_PROBE, scheduler.wait_for_next()).await.is_ok(),
            "post-ramp admission must proceed"
        );
    }
    assert!(timeout(GATE_PROBE, scheduler.wait_for_next()).await.is_err());
    Ok(())
}

#[test]
fn rate_rejects_non_positive_rate() -> Result<(), ValidationError> {
    let (shutdown_tx, _rx) = shutdown_channel();
    let distribution = Distribution::uniform(0.0, 0.0)?;
    assert!(matches!(
        RequestRateScheduler::new(distribution, TimeUnit::S, None, &shutdown_tx),
        Err(ValidationError::NonPositiveRate { .. })
    ));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn rate_paces_waits_to_the_configured_rate() -> Result<(), ValidationError> {
    let (shutdown_tx, _rx) = shutdown_channel();
    // 100 ops per second with zero spread: a deterministic 10ms gap.
    let distribution = Distribution::uniform(100.0, 0.0)?;
    let scheduler = RequestRateScheduler::new(distribution, TimeUnit::S, None, &shutdown_tx)?;

    let start = Instant::now();
    for _ in 0..20 {
        scheduler.wait_for_next().await;
    }
    let elapsed = start.elapsed();
    let expected = Duration::from_millis(200);
    assert!(
        elapsed >= expected.saturating_sub(Duration::from_millis(15))
            && elapsed <= expected + Duration::from_millis(60),
        "elapsed {elapsed:?} not within tolerance of {expected:?}"
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn rate_ramp_scales_the_gap_up_to_the_target() -> Result<(), ValidationError> {
    let (shutdown_tx, _rx) = shutdown_channel();
    // 100 ops per second ramped over 10s. At the ramp origin the effective
    // rate is floored at 1% of the target, so the first gap stretches from
    // 10ms to 1s.
    let distribution = Distribution::uniform(100.0, 0.0)?;
    let scheduler = RequestRateScheduler::new(
        distribution,
        TimeUnit::S,
        Some(Duration::from_secs(10)),
        &shutdown_tx,
    )?;

    let start = Instant::now();
    scheduler.wait_for_next().await;
    let first_gap = start.elapsed();
    assert!(
        first_gap >= Duration::from_millis(900) && first_gap <= Duration::from_millis(1100),
        "early-ramp gap {first_gap:?} not near 1s"
    );

    // Past the ramp window the gap converges to the configured rate.
    tokio::time::advance(Duration::from_secs(12)).await;
    scheduler.wait_for_next().await;
    let start = Instant::now();
    for _ in 0..10 {
        scheduler.wait_for_next().await;
    }
    let elapsed = start.elapsed();
    let expected = Duration::from_millis(100);
    assert!(
        elapsed >= expected.saturating_sub(Duration::from_millis(10))
            && elapsed <= expected + Duration::from_millis(40),
        "post-ramp pacing {elapsed:?} not within tolerance of {expected:?}"
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn rate_zero_sample_proceeds_immediately() -> Result<(), ValidationError> {
    let (shutdown_tx, _rx) = shutdown_channel();
    let mut distribution = Distribution::poisson(1_000_000_000.0)?;
    distribution.reseed(3);
    let scheduler = RequestRateScheduler::new(distribution, TimeUnit::S, None, &shutdown_tx)?;
    // Enormous sampled rates collapse the gap to (near) zero; the wait must
    // not block meaningfully.
    assert!(
        timeout(Duration::from_millis(5), scheduler.wait_for_next())
            .await
            .is_ok()
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn rate_shutdown_interrupts_blocked_wait() -> Result<(), ValidationError> {
    let (shutdown_tx, _rx) = shutdown_channel();
    // One op per hour: the gap is far beyond the probe window.
    let distribution = Distribution::uniform(1.0, 0.0)?;
    let scheduler = Arc::new(RequestRateScheduler::new(
        distribution,
        TimeUnit::H,
        None,
        &shutdown_tx,
    )?);

    let blocked = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.wait_for_next().await })
    };
    tokio::task::yield_now().await;
    drop(shutdown_tx.send(()));
    assert!(timeout(GATE_PROBE, blocked).await.is_ok());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn rate_completion_is_a_no_op() -> Result<(), ValidationError> {
    let (shutdown_tx, _rx) = shutdown_channel();
    let distribution = Distribution::uniform(100.0, 0.0)?;
    let scheduler = RequestRateScheduler::new(distribution, TimeUnit::S, None, &shutdown_tx)?;
    let event = completion()?;

    // Completions must not change pacing: the next wait still observes the
    // sampled gap.
    scheduler.wait_for_next().await;
    scheduler.complete(&event);
    let start = Instant::now();
    scheduler.wait_for_next().await;
    assert!(start.elapsed() >= Duration::from_millis(5));
    Ok(())
}
