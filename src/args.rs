//! CLI surface.
use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};
use serde::Deserialize;
use url::Url;

use crate::distribution::Distribution;
use crate::error::ValidationError;
use crate::types::TimeUnit;

pub const DEFAULT_USER_AGENT: &str = concat!("objstress/", env!("CARGO_PKG_VERSION"));

/// Shape of a sampled quantity (pacing rate or payload size).
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistributionKind {
    Uniform,
    Normal,
    Poisson,
}

impl DistributionKind {
    /// Builds the matching sampler.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] for negative mean or spread.
    pub fn build(self, mean: f64, spread: f64) -> Result<Distribution, ValidationError> {
        match self {
            DistributionKind::Uniform => Distribution::uniform(mean, spread),
            DistributionKind::Normal => Distribution::normal(mean, spread),
            DistributionKind::Poisson => Distribution::poisson(mean),
        }
    }
}

impl std::str::FromStr for DistributionKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uniform" => Ok(DistributionKind::Uniform),
            "normal" => Ok(DistributionKind::Normal),
            "poisson" => Ok(DistributionKind::Poisson),
            _ => Err(ValidationError::InvalidSizeDistribution {
                value: s.to_owned(),
            }),
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "objstress",
    version,
    about = "Sustained HTTP object-storage load generation."
)]
pub struct TesterArgs {
    /// Target bucket URL requests are issued against.
    #[arg(long, env = "OBJSTRESS_URL")]
    pub url: Option<Url>,

    /// Fixed number of requests allowed in flight. Conflicts with --rate.
    #[arg(short = 'c', long)]
    pub concurrency: Option<u64>,

    /// Mean request rate per --rate-unit. Conflicts with --concurrency.
    #[arg(short = 'r', long)]
    pub rate: Option<f64>,

    #[arg(long, value_enum, default_value = "s")]
    pub rate_unit: TimeUnit,

    /// Shape of the sampled request rate.
    #[arg(long, value_enum, default_value = "uniform")]
    pub rate_distribution: DistributionKind,

    /// Jitter around the mean rate, in the same unit.
    #[arg(long, default_value_t = 0.0)]
    pub rate_spread: f64,

    /// Ramp the admission level up linearly over this much time.
    #[arg(long)]
    pub ramp: Option<f64>,

    #[arg(long, value_enum, default_value = "s")]
    pub ramp_unit: TimeUnit,

    /// Stop cleanly after this much elapsed time.
    #[arg(long)]
    pub runtime: Option<f64>,

    #[arg(long, value_enum, default_value = "s")]
    pub runtime_unit: TimeUnit,

    /// Stop cleanly after this many completed operations.
    #[arg(long)]
    pub operations: Option<u64>,

    /// Relative weight of write operations in the mix (default 10).
    #[arg(long)]
    pub write_weight: Option<u32>,

    /// Relative weight of read operations in the mix (default 80).
    #[arg(long)]
    pub read_weight: Option<u32>,

    #[arg(long)]
    pub overwrite_weight: Option<u32>,

    /// Relative weight of HEAD probes in the mix (default 5).
    #[arg(long)]
    pub metadata_weight: Option<u32>,

    /// Relative weight of delete operations in the mix (default 5).
    #[arg(long)]
    pub delete_weight: Option<u32>,

    #[arg(long)]
    pub list_weight: Option<u32>,

    #[arg(long)]
    pub multipart_weight: Option<u32>,

    /// Shape of the sampled payload size.
    #[arg(long, value_enum)]
    pub size_distribution: Option<DistributionKind>,

    /// Mean payload size in bytes (default 65536).
    #[arg(long)]
    pub size_mean: Option<f64>,

    /// Payload size jitter in bytes.
    #[arg(long)]
    pub size_spread: Option<f64>,

    /// Seed for deterministic workload generation.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Grace period in seconds for draining outstanding requests on stop
    /// (default 30).
    #[arg(long)]
    pub drain_timeout_secs: Option<u64>,

    /// Per-request timeout in seconds (default 60).
    #[arg(long)]
    pub request_timeout_secs: Option<u64>,

    /// Config file (.toml or .json) merged underneath CLI flags.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(short, long, action = ArgAction::SetTrue)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() -> Result<(), clap::Error> {
        let args = TesterArgs::try_parse_from(["objstress", "--url", "http://s.test/bucket/"])?;
        assert!(args.concurrency.is_none());
        assert!(args.rate.is_none());
        assert_eq!(args.rate_unit, TimeUnit::S);
        assert!(args.read_weight.is_none());
        assert!(args.drain_timeout_secs.is_none());
        Ok(())
    }

    #[test]
    fn rate_flags_parse() -> Result<(), clap::Error> {
        let args = TesterArgs::try_parse_from([
            "objstress",
            "--url",
            "http://s.test/bucket/",
            "--rate",
            "250.5",
            "--rate-unit",
            "m",
            "--rate-distribution",
            "poisson",
            "--ramp",
            "30",
        ])?;
        assert_eq!(args.rate, Some(250.5));
        assert_eq!(args.rate_unit, TimeUnit::M);
        assert_eq!(args.rate_distribution, DistributionKind::Poisson);
        assert_eq!(args.ramp, Some(30.0));
        Ok(())
    }

    #[test]
    fn distribution_kind_parses_from_config_strings() {
        assert_eq!(
            "Normal".parse::<DistributionKind>().ok(),
            Some(DistributionKind::Normal)
        );
        assert!(matches!(
            "zipf".parse::<DistributionKind>(),
            Err(ValidationError::InvalidSizeDistribution { .. })
        ));
    }
}
