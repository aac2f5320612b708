use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::policy::{Picker, RequestContext, SelectError};
use crate::pool::backend::Backend;

const DEFAULT_ATTEMPTS: usize = 10;

/// Uniform random selection with a bounded attempt budget. The PRNG is
/// seeded so selection sequences can be reproduced in tests.
#[derive(Debug)]
pub struct Random {
	attempts: usize,
	seed: u64,
	rng: Mutex<StdRng>,
}

impl Random {
	pub fn new() -> Random {
		Random::with_seed(rand::random())
	}

	pub fn with_seed(seed: u64) -> Random {
		Random {
			attempts: DEFAULT_ATTEMPTS,
			seed,
			rng: Mutex::new(StdRng::seed_from_u64(seed)),
		}
	}

	pub fn attempts(mut self, attempts: usize) -> Random {
		self.attempts = attempts;
		self
	}

	pub fn seed(&self) -> u64 {
		self.seed
	}
}

impl Default for Random {
	fn default() -> Random {
		Random::new()
	}
}

impl Picker for Random {
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
		let mut rng = self.rng.lock();
		for _ in 0..self.attempts {
			let backend = &backends[rng.random_range(0..n)];
			if eligible(backend) && backend.acquire() {
				return Ok(backend.clone());
			}
		}
		Err(SelectError::ServerNotAvailable)
	}
}
