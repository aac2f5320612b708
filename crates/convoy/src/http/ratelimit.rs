use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
	#[error("rate limit must be greater than zero")]
	InvalidRateLimit,
	#[error("window size must be greater than zero")]
	InvalidWindowSize,
}

fn unix_nanos() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or_default()
		.as_nanos() as u64
}

// The window index and the in-window count share one atomic word: index in
// the high half, count in the low half. Both are bounded by COUNT_MASK.
const COUNT_BITS: u32 = 32;
const COUNT_MASK: u64 = (1 << COUNT_BITS) - 1;

fn pack(window_idx: u64, count: u64) -> u64 {
	(window_idx << COUNT_BITS) | count
}

fn unpack(state: u64) -> (u64, u64) {
	(state >> COUNT_BITS, state & COUNT_MASK)
}

/// Fixed-window request counter. Windows are consecutive intervals counted
/// from the limiter's creation; the current window's index and its count
/// live in one atomic word, so the rollover reset and the increment commit
/// in a single compare-exchange and a rollover decision can never be lost
/// to a concurrent increment against the stale window.
#[derive(Debug)]
pub struct RateLimiter {
	limit: u64,
	window: Duration,
	/// Unix nanos the first window started; window indices count from here.
	epoch: u64,
	state: AtomicU64,
}

impl RateLimiter {
	pub fn new(limit: u64, window: Duration) -> Result<RateLimiter, RateLimitError> {
		if limit == 0 {
			return Err(RateLimitError::InvalidRateLimit);
		}
		if window.is_zero() {
			return Err(RateLimitError::InvalidWindowSize);
		}
		Ok(Self::new_unchecked(limit, window))
	}

	fn new_unchecked(limit: u64, window: Duration) -> RateLimiter {
		RateLimiter {
			limit,
			window,
			epoch: unix_nanos(),
			state: AtomicU64::new(0),
		}
	}

	fn window_index(&self, now: u64) -> u64 {
		(now.saturating_sub(self.epoch) / self.window.as_nanos() as u64).min(COUNT_MASK)
	}

	/// Count one request against the current window. Returns false once the
	/// window's budget is spent; the failed attempt is not counted.
	pub fn try_acquire(&self) -> bool {
		let window_idx = self.window_index(unix_nanos());
		let limit = self.limit.min(COUNT_MASK);
		self
			.state
			.fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
				let (idx, count) = unpack(state);
				// Another caller may have committed a later window already;
				// a caller with a stale clock reading counts against that
				// window instead of rewinding it. A fresh window starts its
				// count at zero; the reset and the increment land in the
				// same CAS.
				let target = window_idx.max(idx);
				let count = if idx == target { count } else { 0 };
				(count < limit).then(|| pack(target, count + 1))
			})
			.is_ok()
	}

	pub fn limit(&self) -> u64 {
		self.limit
	}

	pub fn window(&self) -> Duration {
		self.window
	}

	/// Budget left in the current window.
	pub fn remaining(&self) -> u64 {
		let (idx, count) = unpack(self.state.load(Ordering::Acquire));
		if idx >= self.window_index(unix_nanos()) {
			self.limit.saturating_sub(count)
		} else {
			self.limit
		}
	}

	/// When the current window ends.
	pub fn reset_at(&self) -> SystemTime {
		let idx = self.window_index(unix_nanos());
		let window_nanos = self.window.as_nanos() as u64;
		let start = self.epoch.saturating_add(idx.saturating_mul(window_nanos));
		UNIX_EPOCH + Duration::from_nanos(start) + self.window
	}

	pub fn reset_unix_secs(&self) -> u64 {
		self
			.reset_at()
			.duration_since(UNIX_EPOCH)
			.unwrap_or_default()
			.as_secs()
	}
}

/// Per-client-IP limiters sharing one `(limit, window)` configuration.
/// Limiters are created lazily on the first sight of an IP; a racing first
/// sight yields one shared limiter. No eviction.
#[derive(Debug)]
pub struct IpRateLimiter {
	limit: u64,
	window: Duration,
	limiters: RwLock<HashMap<String, Arc<RateLimiter>>>,
}

impl IpRateLimiter {
	pub fn new(limit: u64, window: Duration) -> Result<IpRateLimiter, RateLimitError> {
		if limit == 0 {
			return Err(RateLimitError::InvalidRateLimit);
		}
		if window.is_zero() {
			return Err(RateLimitError::InvalidWindowSize);
		}
		Ok(IpRateLimiter {
			limit,
			window,
			limiters: RwLock::new(HashMap::new()),
		})
	}

	pub fn get(&self, ip: &str) -> Arc<RateLimiter> {
		if let Some(limiter) = self.limiters.read().get(ip) {
			return limiter.clone();
		}
		self
			.limiters
			.write()
			.entry(ip.to_string())
			.or_insert_with(|| Arc::new(RateLimiter::new_unchecked(self.limit, self.window)))
			.clone()
	}

	pub fn tracked_ips(&self) -> usize {
		self.limiters.read().len()
	}
}
