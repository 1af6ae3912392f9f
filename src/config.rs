//! File-based configuration and the merged run settings.
//!
//! A config file (.toml or .json) sits underneath the CLI: any flag given
//! on the command line wins over the file, and built-in defaults apply
//! last. The admission policy merges as a unit, so a `--concurrency` flag
//! ignores a `rate` entry in the file rather than conflicting with it.
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::args::{DistributionKind, TesterArgs};
use crate::error::{AppResult, ConfigError, ValidationError};
use crate::types::{OperationKind, TimeUnit};

const DEFAULT_WRITE_WEIGHT: u32 = 10;
const DEFAULT_READ_WEIGHT: u32 = 80;
const DEFAULT_METADATA_WEIGHT: u32 = 5;
const DEFAULT_DELETE_WEIGHT: u32 = 5;
const DEFAULT_SIZE_MEAN: f64 = 65_536.0;
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Config filenames probed in the working directory when `--config` is not
/// given.
pub const DEFAULT_CONFIG_FILES: [&str; 2] = ["objstress.toml", "objstress.json"];

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct FileConfig {
    pub url: Option<String>,
    pub concurrency: Option<u64>,
    pub rate: Option<f64>,
    pub rate_unit: Option<TimeUnit>,
    pub rate_distribution: Option<DistributionKind>,
    pub rate_spread: Option<f64>,
    pub ramp: Option<f64>,
    pub ramp_unit: Option<TimeUnit>,
    pub seed: Option<u64>,
    pub drain_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub workload: Option<WorkloadConfig>,
    pub stopping: Option<ThresholdConfig>,
    pub failing: Option<FailingConfig>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct WorkloadConfig {
    pub write_weight: Option<u32>,
    pub read_weight: Option<u32>,
    pub overwrite_weight: Option<u32>,
    pub metadata_weight: Option<u32>,
    pub delete_weight: Option<u32>,
    pub list_weight: Option<u32>,
    pub multipart_weight: Option<u32>,
    pub size_distribution: Option<DistributionKind>,
    pub size_mean: Option<f64>,
    pub size_spread: Option<f64>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ThresholdConfig {
    pub operations: Option<u64>,
    pub runtime: Option<f64>,
    pub runtime_unit: Option<TimeUnit>,
    /// Status code (as a table key) to occurrence threshold.
    pub status_codes: Option<BTreeMap<String, u64>>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct FailingConfig {
    pub operations: Option<u64>,
    pub runtime: Option<f64>,
    pub runtime_unit: Option<TimeUnit>,
    pub status_codes: Option<BTreeMap<String, u64>>,
    pub max_concurrent: Option<u64>,
}

impl FailingConfig {
    fn thresholds(&self) -> ThresholdConfig {
        ThresholdConfig {
            operations: self.operations,
            runtime: self.runtime,
            runtime_unit: self.runtime_unit,
            status_codes: self.status_codes.clone(),
        }
    }
}

impl FileConfig {
    /// Loads a config file, dispatching on its extension.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for unreadable files, parse failures, and
    /// unsupported extensions.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&raw).map_err(|source| ConfigError::ParseToml {
                path: path.to_path_buf(),
                source,
            }),
            Some("json") => serde_json::from_str(&raw).map_err(|source| ConfigError::ParseJson {
                path: path.to_path_buf(),
                source,
            }),
            _ => Err(ConfigError::UnsupportedExtension {
                path: path.to_path_buf(),
            }),
        }
    }

    /// Loads the configured file, or probes the default filenames.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when an explicitly named file cannot be
    /// loaded; missing default files are not an error.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        for name in DEFAULT_CONFIG_FILES {
            let path = Path::new(name);
            if path.is_file() {
                debug!(file = name, "Using default config file.");
                return Self::load(path);
            }
        }
        Ok(Self::default())
    }
}

/// How request admission is paced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AdmissionPolicy {
    Concurrency {
        level: u64,
    },
    Rate {
        kind: DistributionKind,
        mean: f64,
        spread: f64,
        unit: TimeUnit,
    },
}

/// One resolved threshold table (stopping or failing).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThresholdSettings {
    pub operations: Option<u64>,
    pub runtime: Option<Duration>,
    pub status_codes: Vec<(u16, u64)>,
    pub max_concurrent: Option<u64>,
}

impl ThresholdSettings {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_none()
            && self.runtime.is_none()
            && self.status_codes.is_empty()
            && self.max_concurrent.is_none()
    }
}

/// Fully merged, validated settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub url: Url,
    pub admission: AdmissionPolicy,
    pub ramp: Option<Duration>,
    pub weights: Vec<(OperationKind, u32)>,
    pub size_kind: DistributionKind,
    pub size_mean: f64,
    pub size_spread: f64,
    pub seed: Option<u64>,
    pub drain_timeout: Duration,
    pub request_timeout: Duration,
    pub stopping: ThresholdSettings,
    pub failing: ThresholdSettings,
}

impl Settings {
    /// Merges CLI flags over a file config into run settings.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a missing or invalid target URL, a
    /// missing or conflicting admission policy, or a negative ramp, and a
    /// config error for malformed status-code threshold keys.
    pub fn resolve(args: &TesterArgs, file: &FileConfig) -> AppResult<Self> {
        let url = resolve_url(args, file)?;
        let admission = resolve_admission(args, file)?;
        let ramp = resolve_ramp(args, file)?;

        let workload = file.workload.clone().unwrap_or_default();
        let weights = vec![
            (
                OperationKind::Write,
                args.write_weight
                    .or(workload.write_weight)
                    .unwrap_or(DEFAULT_WRITE_WEIGHT),
            ),
            (
                OperationKind::Read,
                args.read_weight
                    .or(workload.read_weight)
                    .unwrap_or(DEFAULT_READ_WEIGHT),
            ),
            (
                OperationKind::Overwrite,
                args.overwrite_weight
                    .or(workload.overwrite_weight)
                    .unwrap_or(0),
            ),
            (
                OperationKind::Metadata,
                args.metadata_weight
                    .or(workload.metadata_weight)
                    .unwrap_or(DEFAULT_METADATA_WEIGHT),
            ),
            (
                OperationKind::Delete,
                args.delete_weight
                    .or(workload.delete_weight)
                    .unwrap_or(DEFAULT_DELETE_WEIGHT),
            ),
            (
                OperationKind::List,
                args.list_weight.or(workload.list_weight).unwrap_or(0),
            ),
            (
                OperationKind::MultipartWrite,
                args.multipart_weight
                    .or(workload.multipart_weight)
                    .unwrap_or(0),
            ),
        ];

        let mut stopping = resolve_thresholds(file.stopping.as_ref(), None)?;
        // CLI stop flags override the file's stopping table entry-wise.
        if args.operations.is_some() {
            stopping.operations = args.operations;
        }
        if let Some(runtime) = args.runtime {
            stopping.runtime = Some(to_duration(runtime, args.runtime_unit)?);
        }
        let failing = match file.failing.as_ref() {
            Some(failing) => {
                resolve_thresholds(Some(&failing.thresholds()), failing.max_concurrent)?
            }
            None => ThresholdSettings::default(),
        };

        Ok(Self {
            url,
            admission,
            ramp,
            weights,
            size_kind: args
                .size_distribution
                .or(workload.size_distribution)
                .unwrap_or(DistributionKind::Uniform),
            size_mean: args
                .size_mean
                .or(workload.size_mean)
                .unwrap_or(DEFAULT_SIZE_MEAN),
            size_spread: args.size_spread.or(workload.size_spread).unwrap_or(0.0),
            seed: args.seed.or(file.seed),
            drain_timeout: args
                .drain_timeout_secs
                .or(file.drain_timeout_secs)
                .map_or(DEFAULT_DRAIN_TIMEOUT, Duration::from_secs),
            request_timeout: args
                .request_timeout_secs
                .or(file.request_timeout_secs)
                .map_or(DEFAULT_REQUEST_TIMEOUT, Duration::from_secs),
            stopping,
            failing,
        })
    }
}

fn resolve_url(args: &TesterArgs, file: &FileConfig) -> Result<Url, ValidationError> {
    if let Some(url) = args.url.clone() {
        return Ok(url);
    }
    match file.url.as_deref() {
        Some(raw) => Url::parse(raw).map_err(|source| ValidationError::InvalidTargetUrl {
            url: raw.to_owned(),
            source,
        }),
        None => Err(ValidationError::MissingTargetUrl),
    }
}

fn resolve_admission(
    args: &TesterArgs,
    file: &FileConfig,
) -> Result<AdmissionPolicy, ValidationError> {
    match (args.concurrency, args.rate) {
        (Some(_), Some(_)) => Err(ValidationError::ConcurrencyRateConflict),
        (Some(level), None) => Ok(AdmissionPolicy::Concurrency { level }),
        (None, Some(mean)) => Ok(AdmissionPolicy::Rate {
            kind: args.rate_distribution,
            mean,
            spread: args.rate_spread,
            unit: args.rate_unit,
        }),
        (None, None) => match (file.concurrency, file.rate) {
            (Some(_), Some(_)) => Err(ValidationError::ConcurrencyRateConflict),
            (Some(level), None) => Ok(AdmissionPolicy::Concurrency { level }),
            (None, Some(mean)) => Ok(AdmissionPolicy::Rate {
                kind: file.rate_distribution.unwrap_or(DistributionKind::Uniform),
                mean,
                spread: file.rate_spread.unwrap_or(0.0),
                unit: file.rate_unit.unwrap_or(TimeUnit::S),
            }),
            (None, None) => Err(ValidationError::MissingAdmissionPolicy),
        },
    }
}

fn resolve_ramp(args: &TesterArgs, file: &FileConfig) -> Result<Option<Duration>, ValidationError> {
    let (value, unit) = match (args.ramp, file.ramp) {
        (Some(value), _) => (value, args.ramp_unit),
        (None, Some(value)) => (value, file.ramp_unit.unwrap_or(TimeUnit::S)),
        (None, None) => return Ok(None),
    };
    let ramp = to_duration(value, unit)?;
    Ok(if ramp.is_zero() { None } else { Some(ramp) })
}

fn to_duration(value: f64, unit: TimeUnit) -> Result<Duration, ValidationError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ValidationError::NegativeRampDuration { value });
    }
    Ok(Duration::from_nanos((value * unit.nanos() as f64) as u64))
}

fn resolve_thresholds(
    config: Option<&ThresholdConfig>,
    max_concurrent: Option<u64>,
) -> AppResult<ThresholdSettings> {
    let Some(config) = config else {
        return Ok(ThresholdSettings {
            max_concurrent,
            ..ThresholdSettings::default()
        });
    };
    let runtime = match config.runtime {
        Some(value) => Some(to_duration(
            value,
            config.runtime_unit.unwrap_or(TimeUnit::S),
        )?),
        None => None,
    };
    let mut status_codes = Vec::new();
    if let Some(map) = config.status_codes.as_ref() {
        for (key, threshold) in map {
            let code = key
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidStatusCodeKey { key: key.clone() })?;
            status_codes.push((code, *threshold));
        }
    }
    Ok(ThresholdSettings {
        operations: config.operations,
        runtime,
        status_codes,
        max_concurrent,
    })
}
