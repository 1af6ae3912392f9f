//! Request production: a weighted workload mix over the storage operation
//! kinds, with sampled payload sizes and an object-name pool so reads and
//! deletes target objects the run has actually written.
use std::collections::VecDeque;
use std::sync::Mutex;

use rand::Rng;
use rand::SeedableRng;
use rand::distributions::{Distribution as _, WeightedIndex};
use rand::rngs::SmallRng;
use url::Url;

use crate::distribution::Distribution;
use crate::error::{SupplyError, ValidationError};
use crate::types::{OperationKind, Request};

/// Largest number of written object names retained for later reads,
/// overwrites, and deletes.
const NAME_POOL_CAP: usize = 65_536;

/// Produces the next request to issue.
///
/// Implementations may fail to signal that no further requests can be
/// produced; the driver treats that as fatal.
pub trait RequestSupplier: Send + Sync {
    /// # Errors
    ///
    /// Returns [`SupplyError`] when no further request can be produced.
    fn get(&self) -> Result<Request, SupplyError>;
}

struct SupplierInner {
    rng: SmallRng,
    sizes: Distribution,
    next_id: u64,
    issued: u64,
    pool: VecDeque<String>,
}

/// Weighted-mix supplier over a single target URL.
pub struct WorkloadSupplier {
    target: Url,
    kinds: Vec<OperationKind>,
    index: WeightedIndex<u32>,
    limit: Option<u64>,
    inner: Mutex<SupplierInner>,
}

/// Builder for [`WorkloadSupplier`]; every collaborator is validated at
/// `build` time.
#[derive(Default)]
pub struct WorkloadSupplierBuilder {
    target: Option<Url>,
    weights: Vec<(OperationKind, u32)>,
    sizes: Option<Distribution>,
    seed: Option<u64>,
    limit: Option<u64>,
}

impl WorkloadSupplierBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn target(mut self, target: Url) -> Self {
        self.target = Some(target);
        self
    }

    /// Adds one operation kind to the mix with a relative weight.
    #[must_use]
    pub fn weight(mut self, kind: OperationKind, weight: u32) -> Self {
        self.weights.push((kind, weight));
        self
    }

    /// Payload-size distribution for upload kinds, in bytes.
    #[must_use]
    pub fn sizes(mut self, sizes: Distribution) -> Self {
        self.sizes = Some(sizes);
        self
    }

    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Caps the number of requests produced; further calls fail with
    /// [`SupplyError::Exhausted`].
    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// # Errors
    ///
    /// Returns [`ValidationError::MissingTargetUrl`] without a target,
    /// [`ValidationError::MissingDistribution`] without a size
    /// distribution, [`ValidationError::ZeroWorkloadWeights`] when the mix
    /// is empty or sums to zero, and
    /// [`ValidationError::AggregateKindNotAllowed`] when the mix names the
    /// aggregate kind.
    pub fn build(self) -> Result<WorkloadSupplier, ValidationError> {
        let target = self.target.ok_or(ValidationError::MissingTargetUrl)?;
        let mut sizes = self.sizes.ok_or(ValidationError::MissingDistribution)?;
        if let Some(seed) = self.seed {
            sizes.reseed(seed);
        }
        if self
            .weights
            .iter()
            .any(|(kind, _)| *kind == OperationKind::All)
        {
            return Err(ValidationError::AggregateKindNotAllowed);
        }
        let active: Vec<(OperationKind, u32)> = self
            .weights
            .into_iter()
            .filter(|(_, weight)| *weight > 0)
            .collect();
        if active.is_empty() {
            return Err(ValidationError::ZeroWorkloadWeights);
        }
        let kinds = active.iter().map(|(kind, _)| *kind).collect();
        let index = WeightedIndex::new(active.iter().map(|(_, weight)| *weight))
            .map_err(|_| ValidationError::ZeroWorkloadWeights)?;
        let rng = self
            .seed
            .map_or_else(SmallRng::from_entropy, SmallRng::seed_from_u64);
        Ok(WorkloadSupplier {
            target,
            kinds,
            index,
            limit: self.limit,
            inner: Mutex::new(SupplierInner {
                rng,
                sizes,
                next_id: 1,
                issued: 0,
                pool: VecDeque::new(),
            }),
        })
    }
}

impl WorkloadSupplier {
    #[must_use]
    pub fn builder() -> WorkloadSupplierBuilder {
        WorkloadSupplierBuilder::new()
    }

    fn object_url(&self, name: &str) -> Result<String, SupplyError> {
        self.target
            .join(name)
            .map(String::from)
            .map_err(|err| SupplyError::Production {
                message: format!("cannot build object URL for {name}: {err}"),
            })
    }

    fn sample_size(inner: &mut SupplierInner) -> u64 {
        let sample = inner.sizes.next_sample();
        if sample.is_finite() && sample >= 1.0 {
            sample.round() as u64
        } else {
            1
        }
    }

    fn remember(inner: &mut SupplierInner, name: String) {
        if inner.pool.len() >= NAME_POOL_CAP {
            drop(inner.pool.pop_front());
        }
        inner.pool.push_back(name);
    }

    fn pick_existing(inner: &mut SupplierInner) -> Option<String> {
        if inner.pool.is_empty() {
            return None;
        }
        let slot = inner.rng.gen_range(0..inner.pool.len());
        inner.pool.get(slot).cloned()
    }

    fn build_request(
        &self,
        inner: &mut SupplierInner,
        kind: OperationKind,
    ) -> Result<Request, SupplyError> {
        let id = inner.next_id;
        inner.next_id = inner.next_id.wrapping_add(1);

        let request = match kind {
            OperationKind::Write | OperationKind::MultipartWrite => {
                let name = format!("obj-{id:016x}");
                let size = Self::sample_size(inner);
                let method = if kind == OperationKind::MultipartWrite {
                    http::Method::POST
                } else {
                    http::Method::PUT
                };
                let request = Request::new(id, method, self.object_url(&name)?, kind, size)?;
                Self::remember(inner, name);
                request
            }
            OperationKind::Overwrite => match Self::pick_existing(inner) {
                Some(name) => {
                    let size = Self::sample_size(inner);
                    Request::new(id, http::Method::PUT, self.object_url(&name)?, kind, size)?
                }
                // Nothing written yet: fall back to a fresh write.
                None => return self.build_request(inner, OperationKind::Write),
            },
            OperationKind::Read => match Self::pick_existing(inner) {
                Some(name) => {
                    Request::new(id, http::Method::GET, self.object_url(&name)?, kind, 0)?
                }
                None => return self.build_request(inner, OperationKind::Write),
            },
            OperationKind::Metadata => match Self::pick_existing(inner) {
                Some(name) => {
                    Request::new(id, http::Method::HEAD, self.object_url(&name)?, kind, 0)?
                }
                None => return self.build_request(inner, OperationKind::Write),
            },
            OperationKind::Delete => match Self::pick_existing(inner) {
                Some(name) => {
                    inner.pool.retain(|pooled| pooled != &name);
                    Request::new(id, http::Method::DELETE, self.object_url(&name)?, kind, 0)?
                }
                None => return self.build_request(inner, OperationKind::Write),
            },
            OperationKind::List => {
                Request::new(id, http::Method::GET, self.target.as_str(), kind, 0)?
            }
            OperationKind::All => return Err(ValidationError::AggregateKindNotAllowed.into()),
        };
        Ok(request)
    }
}

impl RequestSupplier for WorkloadSupplier {
    fn get(&self) -> Result<Request, SupplyError> {
        let mut inner = self.inner.lock().map_err(|_| SupplyError::LockPoisoned)?;
        if let Some(limit) = self.limit
            && inner.issued >= limit
        {
            return Err(SupplyError::Exhausted);
        }
        let slot = self.index.sample(&mut inner.rng);
        let kind = self
            .kinds
            .get(slot)
            .copied()
            .ok_or(SupplyError::Exhausted)?;
        let request = self.build_request(&mut inner, kind)?;
        inner.issued = inner.issued.saturating_add(1);
        Ok(request)
    }
}
