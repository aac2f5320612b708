use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::pool::BackendPool;
use crate::pool::backend::Backend;

const HEALTH_CHECK_PATH: &str = "/health-check";

/// Outcome of the most recent probe of one backend.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ServerHealth {
	pub last_check: DateTime<Utc>,
	pub latency_ns: u64,
	pub is_healthy: bool,
}

/// Probes every pooled backend with `GET /health-check` on a fixed interval,
/// fanning the probes out in parallel and waiting for all of them before the
/// next tick. Records are kept per backend ID; a missing record means the
/// backend has not been probed yet. Removing a backend from the pool does
/// not evict its record eagerly, the next cycle simply stops refreshing it.
pub struct HealthChecker {
	pool: Arc<BackendPool>,
	records: RwLock<HashMap<String, ServerHealth>>,
	interval: Duration,
	client: reqwest::Client,
	cancel: CancellationToken,
}

impl HealthChecker {
	pub fn new(
		pool: Arc<BackendPool>,
		interval: Duration,
		timeout: Duration,
	) -> anyhow::Result<HealthChecker> {
		let client = reqwest::Client::builder().timeout(timeout).build()?;
		Ok(HealthChecker {
			pool,
			records: RwLock::new(HashMap::new()),
			interval,
			client,
			cancel: CancellationToken::new(),
		})
	}

	/// Start the background probe loop. The first cycle runs immediately.
	pub fn start(self: &Arc<Self>) {
		let hc = Arc::clone(self);
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(hc.interval);
			loop {
				tokio::select! {
					_ = hc.cancel.cancelled() => {
						debug!("health checker stopped");
						return;
					}
					_ = ticker.tick() => hc.check_now().await,
				}
			}
		});
	}

	/// Signal the probe loop to terminate. Safe to call more than once; the
	/// loop exits on its next tick boundary at the latest.
	pub fn stop(&self) {
		self.cancel.cancel();
	}

	pub fn get(&self, id: &str) -> Option<ServerHealth> {
		self.records.read().get(id).cloned()
	}

	pub fn all(&self) -> HashMap<String, ServerHealth> {
		self.records.read().clone()
	}

	/// Run one full probe cycle over the current pool snapshot.
	pub async fn check_now(&self) {
		let backends = self.pool.snapshot();
		join_all(backends.iter().map(|b| self.probe(b))).await;
	}

	async fn probe(&self, backend: &Arc<Backend>) {
		let url = format!("http://{}{}", backend.host_port(), HEALTH_CHECK_PATH);
		let started = Instant::now();
		let result = self.client.get(&url).send().await;
		// Failures record the actually elapsed time, not the timeout.
		let latency_ns = started.elapsed().as_nanos() as u64;

		let is_healthy = match &result {
			Ok(resp) => resp.status() == reqwest::StatusCode::OK,
			Err(_) => false,
		};
		match &result {
			Err(err) => warn!(server = backend.id(), error = %err, "health check failed"),
			Ok(resp) if !is_healthy => {
				warn!(server = backend.id(), status = %resp.status(), "health check failed")
			},
			Ok(_) => debug!(server = backend.id(), latency_ns, "health check ok"),
		}

		self.records.write().insert(
			backend.id().to_string(),
			ServerHealth {
				last_check: Utc::now(),
				latency_ns,
				is_healthy,
			},
		);
	}

	#[cfg(test)]
	pub(crate) fn insert_record(&self, id: &str, health: ServerHealth) {
		self.records.write().insert(id.to_string(), health);
	}
}
