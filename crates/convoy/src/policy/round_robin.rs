use std::sync::Arc;

use parking_lot::Mutex;

use crate::policy::{Picker, RequestContext, SelectError};
use crate::pool::backend::Backend;

/// Cycles through the pool in insertion order, skipping backends that are
/// ineligible or at capacity.
#[derive(Debug, Default)]
pub struct RoundRobin {
	cursor: Mutex<usize>,
}

impl RoundRobin {
	pub fn new() -> RoundRobin {
		RoundRobin::default()
	}
}

impl Picker for RoundRobin {
	fn pick(
		&self,
		backends: &[Arc<Backend>],
		_ctx: &RequestContext,
		eligible: &dyn Fn(&Backend) -> bool,
	) -> Result<Arc<Backend>, SelectError> {
		let n = backends.len();
		if n == 0 {
			return Err(SelectError::NoServerAvailable);
		}
		let mut cursor = self.cursor.lock();
		// The pool may have shrunk since the last call.
		let start = *cursor % n;
		for i in 0..n {
			let idx = (start + i) % n;
			let backend = &backends[idx];
			if eligible(backend) && backend.acquire() {
				*cursor = (idx + 1) % n;
				return Ok(backend.clone());
			}
		}
		Err(SelectError::NoServerAvailable)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::policy::tests::{active, backends};

	fn next_id(rr: &RoundRobin, pool: &[Arc<Backend>]) -> String {
		let b = rr.pick(pool, &RequestContext::new(), &active).unwrap();
		b.release();
		b.id().to_string()
	}

	#[test]
	fn cycles_in_pool_order() {
		let pool = backends(&["s1", "s2", "s3"]);
		let rr = RoundRobin::new();
		let order: Vec<_> = (0..6).map(|_| next_id(&rr, &pool)).collect();
		assert_eq!(order, ["s1", "s2", "s3", "s1", "s2", "s3"]);
	}

	#[test]
	fn skips_inactive_backends() {
		let pool = backends(&["s1", "s2", "s3"]);
		let rr = RoundRobin::new();
		pool[1].set_active(false);
		let order: Vec<_> = (0..6).map(|_| next_id(&rr, &pool)).collect();
		assert_eq!(order, ["s1", "s3", "s1", "s3", "s1", "s3"]);
	}

	#[test]
	fn empty_pool_has_no_server() {
		let rr = RoundRobin::new();
		assert_eq!(
			rr.pick(&[], &RequestContext::new(), &active).unwrap_err(),
			SelectError::NoServerAvailable
		);
	}

	#[test]
	fn all_inactive_has_no_server() {
		let pool = backends(&["s1", "s2"]);
		for b in &pool {
			b.set_active(false);
		}
		let rr = RoundRobin::new();
		assert_eq!(
			rr.pick(&pool, &RequestContext::new(), &active).unwrap_err(),
			SelectError::NoServerAvailable
		);
	}

	#[test]
	fn skips_backends_at_capacity() {
		let pool = vec![
			Arc::new(Backend::new("s1", "127.0.0.1", 8081, 1).unwrap()),
			Arc::new(Backend::new("s2", "127.0.0.1", 8082, 1).unwrap()),
		];
		let rr = RoundRobin::new();
		let first = rr.pick(&pool, &RequestContext::new(), &active).unwrap();
		assert_eq!(first.id(), "s1");
		// s1 is now at capacity and the cursor points at s2 anyway; both of
		// the next two picks land on s2 only while it has room.
		let second = rr.pick(&pool, &RequestContext::new(), &active).unwrap();
		assert_eq!(second.id(), "s2");
		assert_eq!(
			rr.pick(&pool, &RequestContext::new(), &active).unwrap_err(),
			SelectError::NoServerAvailable
		);
		first.release();
		assert_eq!(
			rr.pick(&pool, &RequestContext::new(), &active)
				.unwrap()
				.id(),
			"s1"
		);
	}

	#[test]
	fn distribution_is_even_over_full_cycles() {
		let pool = backends(&["s1", "s2", "s3"]);
		let rr = RoundRobin::new();
		let mut counts = std::collections::HashMap::new();
		for _ in 0..30 {
			*counts.entry(next_id(&rr, &pool)).or_insert(0) += 1;
		}
		assert!(counts.values().all(|&c| c == 10));
	}
}
