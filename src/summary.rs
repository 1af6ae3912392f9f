//! Plain-text end-of-run report.
use std::fmt::Write as _;

use crate::driver::LoadTestResult;
use crate::stats::Statistics;
use crate::types::{CounterKind, OperationKind, RunState};

/// Renders the final per-operation report.
#[must_use]
pub fn render(stats: &Statistics, result: &LoadTestResult) -> String {
    let mut out = String::new();
    let seconds = result.duration_millis() as f64 / 1000.0;

    drop(writeln!(
        out,
        "Run {} with status {} in {:.3}s.",
        stats.run_state().as_str(),
        result.status(),
        seconds
    ));
    drop(writeln!(
        out,
        "{:<16} {:>12} {:>16} {:>10} {:>9} {:>9} {:>9}",
        "operation", "count", "bytes", "ops/s", "p50 ms", "p99 ms", "max ms"
    ));

    for kind in OperationKind::KINDS {
        let operations = stats.get(kind, CounterKind::Operations);
        if operations == 0 && kind != OperationKind::All {
            continue;
        }
        let bytes = stats.get(kind, CounterKind::Bytes);
        let rate = if seconds > 0.0 {
            operations as f64 / seconds
        } else {
            0.0
        };
        let (p50, p99, max) = stats.latency_summary(kind).map_or((0.0, 0.0, 0.0), |lat| {
            (
                lat.p50_micros as f64 / 1000.0,
                lat.p99_micros as f64 / 1000.0,
                lat.max_micros as f64 / 1000.0,
            )
        });
        drop(writeln!(
            out,
            "{:<16} {:>12} {:>16} {:>10.1} {:>9.2} {:>9.2} {:>9.2}",
            kind.as_str(),
            operations,
            bytes,
            rate,
            p50,
            p99,
            max
        ));
    }

    let codes = stats.status_codes(OperationKind::All);
    if !codes.is_empty() {
        drop(writeln!(out, "status codes:"));
        for (code, count) in codes {
            drop(writeln!(out, "  {code}: {count}"));
        }
    }
    if stats.run_state() == RunState::Failed {
        drop(writeln!(out, "run FAILED; see conditions above."));
    }
    out
}
