use std::sync::Arc;

use std::time::Duration;

use tokio::time::Instant;

use crate::error::ValidationError;
use crate::types::{
    ABORTED_STATUS_CODE, CounterKind, OperationKind, Request, Response, RunState, Timing,
};

use super::Statistics;

fn timing() -> Timing {
    let now = Instant::now();
    Timing {
        start: now,
        first_byte: Some(now + Duration::from_millis(2)),
        finish: now + Duration::from_millis(5),
    }
}

fn write_request(id: u64, body_size: u64) -> Result<Request, ValidationError> {
    Request::new(
        id,
        http::Method::PUT,
        format!("/bucket/obj-{id}"),
        OperationKind::Write,
        body_size,
    )
}

fn read_request(id: u64) -> Result<Request, ValidationError> {
    Request::new(
        id,
        http::Method::GET,
        format!("/bucket/obj-{id}"),
        OperationKind::Read,
        0,
    )
}

#[test]
fn completion_updates_all_counters() -> Result<(), Box<dyn std::error::Error>> {
    let stats = Statistics::new()?;
    let request = write_request(1, 4096)?;
    let response = Response::new(1, 201, 0, timing())?;

    stats.update_dispatch(&request);
    assert_eq!(stats.get(OperationKind::Write, CounterKind::ActiveOperations), 1);
    assert_eq!(stats.get(OperationKind::All, CounterKind::ActiveOperations), 1);

    stats.update_completion(&request, &response);
    assert_eq!(stats.get(OperationKind::Write, CounterKind::ActiveOperations), 0);
    assert_eq!(stats.get(OperationKind::Write, CounterKind::Operations), 1);
    assert_eq!(stats.get(OperationKind::Write, CounterKind::Bytes), 4096);
    assert_eq!(stats.get(OperationKind::All, CounterKind::Operations), 1);
    assert_eq!(stats.get(OperationKind::All, CounterKind::Bytes), 4096);
    assert_eq!(stats.get_status_code(OperationKind::Write, 201)?, 1);
    assert_eq!(stats.get_status_code(OperationKind::All, 201)?, 1);
    Ok(())
}

#[test]
fn downloads_count_response_bytes() -> Result<(), Box<dyn std::error::Error>> {
    let stats = Statistics::new()?;
    let request = read_request(7)?;
    let response = Response::new(7, 200, 1024, timing())?;
    stats.update_dispatch(&request);
    stats.update_completion(&request, &response);
    assert_eq!(stats.get(OperationKind::Read, CounterKind::Bytes), 1024);
    Ok(())
}

#[test]
fn concurrent_completions_lose_no_updates() -> Result<(), Box<dyn std::error::Error>> {
    const WORKERS: u64 = 10;
    const PER_WORKER: u64 = 100;
    const PAYLOAD: u64 = 8192;

    let stats = Arc::new(Statistics::new()?);
    std::thread::scope(|scope| {
        for worker in 0..WORKERS {
            let stats = Arc::clone(&stats);
            scope.spawn(move || -> Result<(), ValidationError> {
                for seq in 0..PER_WORKER {
                    let id = worker * PER_WORKER + seq;
                    let request = write_request(id, PAYLOAD)?;
                    let response = Response::new(id, 201, 0, timing())?;
                    stats.update_dispatch(&request);
                    stats.update_completion(&request, &response);
                }
                Ok(())
            });
        }
    });

    let total = WORKERS * PER_WORKER;
    assert_eq!(stats.get(OperationKind::Write, CounterKind::Operations), total);
    assert_eq!(
        stats.get(OperationKind::Write, CounterKind::Bytes),
        total * PAYLOAD
    );
    assert_eq!(stats.get(OperationKind::All, CounterKind::Operations), total);
    assert_eq!(stats.get(OperationKind::All, CounterKind::ActiveOperations), 0);
    assert_eq!(stats.get_status_code(OperationKind::Write, 201)?, total);
    Ok(())
}

#[test]
fn status_code_reads_validate_the_range() -> Result<(), Box<dyn std::error::Error>> {
    let stats = Statistics::new()?;
    assert!(matches!(
        stats.get_status_code(OperationKind::All, 99),
        Err(ValidationError::StatusCodeOutOfRange { code: 99 })
    ));
    assert!(matches!(
        stats.get_status_code(OperationKind::All, 600),
        Err(ValidationError::StatusCodeOutOfRange { code: 600 })
    ));
    // Valid but never observed reads zero.
    assert_eq!(stats.get_status_code(OperationKind::Delete, 404)?, 0);
    Ok(())
}

#[test]
fn active_gauge_never_goes_negative() -> Result<(), Box<dyn std::error::Error>> {
    let stats = Statistics::new()?;
    let request = write_request(1, 1)?;
    let response = Response::new(1, 201, 0, timing())?;
    // A completion without a recorded dispatch saturates at zero.
    stats.update_completion(&request, &response);
    assert_eq!(
        stats.get(OperationKind::Write, CounterKind::ActiveOperations),
        0
    );
    assert_eq!(stats.get(OperationKind::All, CounterKind::ActiveOperations), 0);
    Ok(())
}

#[test]
fn late_aborted_completions_are_discarded() -> Result<(), Box<dyn std::error::Error>> {
    let stats = Statistics::new()?;
    let aborted = write_request(1, 512)?;
    let survivor = write_request(2, 512)?;
    stats.update_dispatch(&aborted);
    stats.update_dispatch(&survivor);

    stats.update_run_state(RunState::Stopping);

    let aborted_response = Response::aborted(1, timing());
    stats.update_completion(&aborted, &aborted_response);
    // The in-flight slot is released, nothing else changes.
    assert_eq!(stats.get(OperationKind::Write, CounterKind::Operations), 0);
    assert_eq!(stats.get(OperationKind::Write, CounterKind::Bytes), 0);
    assert_eq!(stats.get_status_code(OperationKind::Write, ABORTED_STATUS_CODE)?, 0);

    // Late successful completions still count.
    let ok_response = Response::new(2, 201, 0, timing())?;
    stats.update_completion(&survivor, &ok_response);
    assert_eq!(stats.get(OperationKind::Write, CounterKind::Operations), 1);
    assert_eq!(stats.get(OperationKind::Write, CounterKind::Bytes), 512);
    assert_eq!(stats.get(OperationKind::All, CounterKind::ActiveOperations), 0);
    Ok(())
}

#[test]
fn aborted_completions_count_while_running() -> Result<(), Box<dyn std::error::Error>> {
    let stats = Statistics::new()?;
    let request = write_request(1, 512)?;
    stats.update_dispatch(&request);
    let response = Response::aborted(1, timing());
    stats.update_completion(&request, &response);
    assert_eq!(stats.get(OperationKind::Write, CounterKind::Operations), 1);
    assert_eq!(stats.get_status_code(OperationKind::Write, ABORTED_STATUS_CODE)?, 1);
    Ok(())
}

#[test]
fn snapshots_support_interval_reads() -> Result<(), Box<dyn std::error::Error>> {
    let stats = Statistics::new()?;
    for id in 0..3u64 {
        let request = write_request(id, 100)?;
        let response = Response::new(id, 201, 0, timing())?;
        stats.update_dispatch(&request);
        stats.update_completion(&request, &response);
    }
    let first = stats.snapshot();

    for id in 3..8u64 {
        let request = write_request(id, 100)?;
        let response = Response::new(id, 201, 0, timing())?;
        stats.update_dispatch(&request);
        stats.update_completion(&request, &response);
    }
    let second = stats.snapshot();

    assert_eq!(first.get(OperationKind::Write, CounterKind::Operations), 3);
    assert_eq!(second.get(OperationKind::Write, CounterKind::Operations), 8);
    let interval = second.delta(&first);
    assert_eq!(interval.get(OperationKind::Write, CounterKind::Operations), 5);
    assert_eq!(interval.get(OperationKind::Write, CounterKind::Bytes), 500);
    Ok(())
}

#[test]
fn status_code_map_is_an_owned_snapshot() -> Result<(), Box<dyn std::error::Error>> {
    let stats = Statistics::new()?;
    for (id, code) in [(1u64, 200u16), (2, 200), (3, 404)] {
        let request = read_request(id)?;
        let response = Response::new(id, code, 10, timing())?;
        stats.update_dispatch(&request);
        stats.update_completion(&request, &response);
    }
    let codes = stats.status_codes(OperationKind::Read);
    assert_eq!(codes.get(&200), Some(&2));
    assert_eq!(codes.get(&404), Some(&1));
    assert_eq!(codes.len(), 2);
    Ok(())
}

#[test]
fn latency_summary_reports_percentiles() -> Result<(), Box<dyn std::error::Error>> {
    let stats = Statistics::new()?;
    assert!(stats.latency_summary(OperationKind::Write).is_none());
    for id in 0..50u64 {
        let request = write_request(id, 1)?;
        let response = Response::new(id, 201, 0, timing())?;
        stats.update_dispatch(&request);
        stats.update_completion(&request, &response);
    }
    let summary = stats
        .latency_summary(OperationKind::Write)
        .ok_or("expected a latency summary")?;
    assert_eq!(summary.count, 50);
    assert!(summary.p99_micros >= summary.p50_micros);
    assert!(summary.max_micros >= summary.p99_micros);
    Ok(())
}
