mod ip_hash;
mod random;
mod round_robin;
mod weighted;

use std::sync::Arc;

pub use ip_hash::IpHash;
pub use random::Random;
pub use round_robin::RoundRobin;
pub use weighted::WeightedRoundRobin;

use crate::config::PolicyKind;
use crate::health::HealthChecker;
use crate::pool::BackendPool;
use crate::pool::backend::{Backend, Lease};

/// Per-request inputs a policy may consult.
#[derive(Debug, Default, Clone)]
pub struct RequestContext {
	pub client_ip: Option<String>,
}

impl RequestContext {
	pub fn new() -> RequestContext {
		RequestContext::default()
	}

	pub fn with_client_ip(ip: impl Into<String>) -> RequestContext {
		RequestContext {
			client_ip: Some(ip.into()),
		}
	}
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectError {
	/// Empty pool, or every candidate failed eligibility or leasing.
	#[error("no server available")]
	NoServerAvailable,
	/// A sticky selection landed on a backend that cannot take the request.
	#[error("server not available")]
	ServerNotAvailable,
	#[error("no client ip in request")]
	NoClientIp,
	/// The policy requires a capability the backend was not built with.
	#[error("server {0:?} has no weight")]
	NotWeighted(String),
}

/// Selection policy over one consistent pool view. `eligible` folds in the
/// active flag and health state; a policy must lease a slot (via
/// [`Backend::acquire`]) before returning a candidate, and the caller owns
/// the release.
pub trait Picker: Send + Sync {
	fn pick(
		&self,
		backends: &[Arc<Backend>],
		ctx: &RequestContext,
		eligible: &dyn Fn(&Backend) -> bool,
	) -> Result<Arc<Backend>, SelectError>;
}

pub fn picker_for(kind: PolicyKind) -> Box<dyn Picker> {
	match kind {
		PolicyKind::RoundRobin => Box::new(RoundRobin::new()),
		PolicyKind::WeightedRoundRobin => Box::new(WeightedRoundRobin::new()),
		PolicyKind::IpHash => Box::new(IpHash),
		PolicyKind::Random => Box::new(Random::new()),
	}
}

/// Ties a pool to a selection policy and hands out RAII connection leases.
pub struct LoadBalancer {
	pool: Arc<BackendPool>,
	picker: Box<dyn Picker>,
	health: Option<Arc<HealthChecker>>,
}

impl LoadBalancer {
	pub fn new(pool: Arc<BackendPool>, picker: Box<dyn Picker>) -> LoadBalancer {
		LoadBalancer {
			pool,
			picker,
			health: None,
		}
	}

	/// Fold health-check results into eligibility: a backend with a recorded
	/// failing probe is skipped; one that was never probed is not.
	pub fn with_health(mut self, health: Arc<HealthChecker>) -> LoadBalancer {
		self.health = Some(health);
		self
	}

	pub fn pool(&self) -> &Arc<BackendPool> {
		&self.pool
	}

	pub fn next(&self, ctx: &RequestContext) -> Result<Lease, SelectError> {
		let backends = self.pool.snapshot();
		let eligible = |b: &Backend| {
			if !b.is_active() {
				return false;
			}
			match &self.health {
				Some(hc) => hc.get(b.id()).is_none_or(|h| h.is_healthy),
				None => true,
			}
		};
		let backend = self.picker.pick(&backends, ctx, &eligible)?;
		Ok(Lease::new(backend))
	}
}
