//! Process entry: parse flags, merge config, wire collaborators, run.
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use crate::args::TesterArgs;
use crate::client::HttpClient;
use crate::conditions::{Condition, ConditionAction, ConditionSet, Watch};
use crate::config::{AdmissionPolicy, FileConfig, Settings, ThresholdSettings};
use crate::driver::LoadTestDriver;
use crate::error::{AppResult, ValidationError};
use crate::scheduler::{ConcurrentRequestScheduler, RequestRateScheduler, Scheduler};
use crate::shutdown::shutdown_channel;
use crate::supply::WorkloadSupplier;
use crate::types::OperationKind;
use crate::{logger, summary};

pub fn run() -> AppResult<()> {
    let args = TesterArgs::try_parse()?;
    logger::init_logging(args.verbose);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run_async(&args))
}

async fn run_async(args: &TesterArgs) -> AppResult<()> {
    let file = FileConfig::discover(args.config.as_deref())?;
    let settings = Settings::resolve(args, &file)?;

    let (shutdown_tx, _shutdown_rx) = shutdown_channel();

    let scheduler: Arc<dyn Scheduler> = match settings.admission {
        AdmissionPolicy::Concurrency { level } => Arc::new(ConcurrentRequestScheduler::new(
            usize::try_from(level).unwrap_or(usize::MAX),
            settings.ramp,
            &shutdown_tx,
        )?),
        AdmissionPolicy::Rate {
            kind,
            mean,
            spread,
            unit,
        } => Arc::new(RequestRateScheduler::new(
            kind.build(mean, spread)?,
            unit,
            settings.ramp,
            &shutdown_tx,
        )?),
    };

    let mut supplier = WorkloadSupplier::builder()
        .target(settings.url.clone())
        .sizes(settings.size_kind.build(settings.size_mean, settings.size_spread)?);
    for (kind, weight) in &settings.weights {
        supplier = supplier.weight(*kind, *weight);
    }
    if let Some(seed) = settings.seed {
        supplier = supplier.seed(seed);
    }

    let mut conditions = ConditionSet::default();
    build_conditions(&mut conditions, &settings.stopping, ConditionAction::Stop)?;
    build_conditions(&mut conditions, &settings.failing, ConditionAction::Fail)?;

    let client = HttpClient::new(settings.request_timeout)?;
    let driver = LoadTestDriver::builder()
        .scheduler(scheduler)
        .supplier(Arc::new(supplier.build()?))
        .client(Arc::new(client))
        .conditions(conditions)
        .shutdown(shutdown_tx.clone())
        .drain_timeout(settings.drain_timeout)
        .build()?;

    spawn_signal_handler(shutdown_tx);

    info!(url = %settings.url, "Starting load test.");
    let stats = driver.stats();
    let result = driver.run().await;

    print!("{}", summary::render(&stats, &result));

    if result.is_success() {
        Ok(())
    } else {
        Err(ValidationError::RunFailed {
            status: i32::try_from(result.status()).unwrap_or(i32::MIN),
        }
        .into())
    }
}

fn build_conditions(
    set: &mut ConditionSet,
    thresholds: &ThresholdSettings,
    action: ConditionAction,
) -> Result<(), ValidationError> {
    if thresholds.is_empty() {
        return Ok(());
    }
    if let Some(operations) = thresholds.operations {
        set.push(Condition::new(
            Watch::OperationCount {
                kind: OperationKind::All,
                threshold: operations,
            },
            action,
        )?);
    }
    if let Some(limit) = thresholds.runtime {
        set.push(Condition::new(Watch::Runtime { limit }, action)?);
    }
    for (code, threshold) in &thresholds.status_codes {
        set.push(Condition::new(
            Watch::StatusCodeCount {
                kind: OperationKind::All,
                code: *code,
                threshold: *threshold,
            },
            action,
        )?);
    }
    if let Some(threshold) = thresholds.max_concurrent {
        set.push(Condition::new(
            Watch::ConcurrentRequests {
                kind: OperationKind::All,
                threshold,
            },
            action,
        )?);
    }
    Ok(())
}

fn spawn_signal_handler(shutdown_tx: crate::shutdown::ShutdownSender) {
    drop(tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received; stopping.");
                drop(shutdown_tx.send(()));
            }
            Err(err) => error!(error = %err, "Cannot listen for interrupts."),
        }
    }));
}
