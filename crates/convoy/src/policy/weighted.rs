use std::sync::Arc;

use parking_lot::Mutex;

use crate::policy::{Picker, RequestContext, SelectError};
use crate::pool::backend::Backend;

#[derive(Debug, Default)]
struct State {
	cursor: usize,
	/// How many requests the backend at `cursor` has been handed in its
	/// current turn.
	delivered: u16,
}

/// Serves each backend `weight` times before advancing. Requires weighted
/// backends; a plain backend in the pool is a configuration error surfaced
/// as [`SelectError::NotWeighted`].
#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
	state: Mutex<State>,
}

impl WeightedRoundRobin {
	pub fn new() -> WeightedRoundRobin {
		WeightedRoundRobin::default()
	}
}

impl Picker for WeightedRoundRobin {
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
		let mut state = self.state.lock();
		if state.cursor >= n {
			state.cursor = 0;
			state.delivered = 0;
		}
		// One full lap at most, so a backend whose acquire keeps failing
		// cannot spin this loop forever.
		for _ in 0..n {
			let backend = &backends[state.cursor];
			let weight = backend
				.weight()
				.ok_or_else(|| SelectError::NotWeighted(backend.id().to_string()))?;
			if eligible(backend) && state.delivered < weight && backend.acquire() {
				state.delivered += 1;
				return Ok(backend.clone());
			}
			state.delivered = 0;
			state.cursor = (state.cursor + 1) % n;
		}
		Err(SelectError::NoServerAvailable)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::policy::tests::active;

	fn weighted(specs: &[(&str, u16)]) -> Vec<Arc<Backend>> {
		specs
			.iter()
			.enumerate()
			.map(|(i, (id, w))| {
				Arc::new(
					Backend::weighted(id, "127.0.0.1", 8081 + i as u16, usize::MAX >> 1, *w).unwrap(),
				)
			})
			.collect()
	}

	fn next_id(wrr: &WeightedRoundRobin, pool: &[Arc<Backend>]) -> String {
		let b = wrr.pick(pool, &RequestContext::new(), &active).unwrap();
		b.release();
		b.id().to_string()
	}

	#[test]
	fn delivers_weight_per_turn() {
		let pool = weighted(&[("a", 3), ("b", 1), ("c", 2)]);
		let wrr = WeightedRoundRobin::new();
		let order: Vec<_> = (0..6).map(|_| next_id(&wrr, &pool)).collect();
		assert_eq!(order, ["a", "a", "a", "b", "c", "c"]);
		// The cycle repeats.
		let order: Vec<_> = (0..6).map(|_| next_id(&wrr, &pool)).collect();
		assert_eq!(order, ["a", "a", "a", "b", "c", "c"]);
	}

	#[test]
	fn exact_share_over_whole_cycles() {
		let pool = weighted(&[("a", 3), ("b", 1), ("c", 2)]);
		let wrr = WeightedRoundRobin::new();
		let mut counts = std::collections::HashMap::new();
		// Two full cycles of total weight 6.
		for _ in 0..12 {
			*counts.entry(next_id(&wrr, &pool)).or_insert(0u32) += 1;
		}
		assert_eq!(counts["a"], 6);
		assert_eq!(counts["b"], 2);
		assert_eq!(counts["c"], 4);
	}

	#[test]
	fn skips_inactive_backends() {
		let pool = weighted(&[("a", 2), ("b", 1)]);
		pool[0].set_active(false);
		let wrr = WeightedRoundRobin::new();
		assert_eq!(next_id(&wrr, &pool), "b");
		assert_eq!(next_id(&wrr, &pool), "b");
	}

	#[test]
	fn plain_backend_is_rejected() {
		let pool = vec![Arc::new(
			Backend::new("plain", "127.0.0.1", 8081, 5).unwrap(),
		)];
		let wrr = WeightedRoundRobin::new();
		assert_eq!(
			wrr.pick(&pool, &RequestContext::new(), &active).unwrap_err(),
			SelectError::NotWeighted("plain".to_string())
		);
	}

	#[test]
	fn bounded_scan_when_all_at_capacity() {
		let pool = vec![
			Arc::new(Backend::weighted("a", "127.0.0.1", 8081, 1, 3).unwrap()),
			Arc::new(Backend::weighted("b", "127.0.0.1", 8082, 1, 2).unwrap()),
		];
		let wrr = WeightedRoundRobin::new();
		let a = wrr.pick(&pool, &RequestContext::new(), &active).unwrap();
		let b = wrr.pick(&pool, &RequestContext::new(), &active).unwrap();
		assert_eq!((a.id(), b.id()), ("a", "b"));
		assert_eq!(
			wrr.pick(&pool, &RequestContext::new(), &active).unwrap_err(),
			SelectError::NoServerAvailable
		);
	}

	#[test]
	fn empty_pool_has_no_server() {
		let wrr = WeightedRoundRobin::new();
		assert_eq!(
			wrr.pick(&[], &RequestContext::new(), &active).unwrap_err(),
			SelectError::NoServerAvailable
		);
	}
}
