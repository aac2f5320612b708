pub mod backend;

use std::sync::Arc;

use parking_lot::RwLock;

use crate::pool::backend::{Backend, InvalidBackend};

#[derive(thiserror::Error, Debug)]
pub enum PoolError {
	#[error("server {0:?} already exists")]
	AlreadyExists(String),
	#[error("server {0:?} not found")]
	NotFound(String),
	#[error(transparent)]
	Invalid(#[from] InvalidBackend),
}

/// The ordered set of backends known to the load balancer. Insertion order is
/// stable; cursor-based policies depend on it. Reads take a snapshot so
/// selection never observes a half-applied mutation, while the backends
/// themselves are shared, so status changes are visible through snapshots
/// taken earlier.
#[derive(Debug, Default)]
pub struct BackendPool {
	backends: RwLock<Vec<Arc<Backend>>>,
}

impl BackendPool {
	pub fn new() -> BackendPool {
		BackendPool::default()
	}

	/// Append a backend. IDs are unique within the pool.
	pub fn add(&self, backend: Backend) -> Result<Arc<Backend>, PoolError> {
		let mut backends = self.backends.write();
		if backends.iter().any(|b| b.id() == backend.id()) {
			return Err(PoolError::AlreadyExists(backend.id().to_string()));
		}
		let backend = Arc::new(backend);
		backends.push(backend.clone());
		Ok(backend)
	}

	/// Remove a backend, preserving the order of the rest. In-flight leases
	/// on the removed backend still release cleanly; it simply stops being a
	/// selection candidate.
	pub fn remove(&self, id: &str) -> Result<Arc<Backend>, PoolError> {
		let mut backends = self.backends.write();
		let idx = backends
			.iter()
			.position(|b| b.id() == id)
			.ok_or_else(|| PoolError::NotFound(id.to_string()))?;
		Ok(backends.remove(idx))
	}

	pub fn set_status(&self, id: &str, active: bool) -> Result<(), PoolError> {
		self.get(id)?.set_active(active);
		Ok(())
	}

	pub fn set_max_conns(&self, id: &str, max: usize) -> Result<(), PoolError> {
		self.get(id)?.set_max_conns(max)?;
		Ok(())
	}

	pub fn get(&self, id: &str) -> Result<Arc<Backend>, PoolError> {
		self
			.backends
			.read()
			.iter()
			.find(|b| b.id() == id)
			.cloned()
			.ok_or_else(|| PoolError::NotFound(id.to_string()))
	}

	/// A point-in-time copy of the ordered backend list.
	pub fn snapshot(&self) -> Vec<Arc<Backend>> {
		self.backends.read().clone()
	}

	pub fn len(&self) -> usize {
		self.backends.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.backends.read().is_empty()
	}
}
