use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

const MAX_ID_LEN: usize = 64;
const MAX_WEIGHT: u16 = 100;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidBackend {
	#[error("server name must be 1-{MAX_ID_LEN} characters, got {0}")]
	NameLength(usize),
	#[error("server name may only contain letters, digits, '_' and '-': {0:?}")]
	NameChar(String),
	#[error("host must be a routable IP literal: {0:?}")]
	Host(String),
	#[error("port must be non-zero")]
	Port,
	#[error("max connections must be at least 1")]
	MaxConns,
	#[error("connection pool size {size} exceeds max connections {max}")]
	PoolSize { size: usize, max: usize },
	#[error("weight must be between 1 and {MAX_WEIGHT}, got {0}")]
	Weight(u16),
}

/// An upstream HTTP origin. Identity and address are immutable; the active
/// flag, connection cap, and outstanding-lease count are mutated through
/// atomics so selection policies can read them without locking the pool.
#[derive(Debug)]
pub struct Backend {
	id: String,
	host: IpAddr,
	port: u16,
	weight: Option<u16>,
	pool_size: usize,
	active: AtomicBool,
	max_conns: AtomicUsize,
	outstanding: AtomicUsize,
}

impl Backend {
	pub fn new(id: &str, host: &str, port: u16, max_conns: usize) -> Result<Backend, InvalidBackend> {
		Self::build(id, host, port, max_conns, None)
	}

	/// A backend usable with the weighted round-robin policy.
	pub fn weighted(
		id: &str,
		host: &str,
		port: u16,
		max_conns: usize,
		weight: u16,
	) -> Result<Backend, InvalidBackend> {
		Self::build(id, host, port, max_conns, Some(weight))
	}

	fn build(
		id: &str,
		host: &str,
		port: u16,
		max_conns: usize,
		weight: Option<u16>,
	) -> Result<Backend, InvalidBackend> {
		if id.is_empty() || id.len() > MAX_ID_LEN {
			return Err(InvalidBackend::NameLength(id.len()));
		}
		if !id
			.chars()
			.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
		{
			return Err(InvalidBackend::NameChar(id.to_string()));
		}
		let ip: IpAddr = host
			.parse()
			.map_err(|_| InvalidBackend::Host(host.to_string()))?;
		if ip.is_unspecified() {
			return Err(InvalidBackend::Host(host.to_string()));
		}
		if port == 0 {
			return Err(InvalidBackend::Port);
		}
		if max_conns == 0 {
			return Err(InvalidBackend::MaxConns);
		}
		if let Some(w) = weight
			&& !(1..=MAX_WEIGHT).contains(&w)
		{
			return Err(InvalidBackend::Weight(w));
		}
		Ok(Backend {
			id: id.to_string(),
			host: ip,
			port,
			weight,
			pool_size: 0,
			active: AtomicBool::new(true),
			max_conns: AtomicUsize::new(max_conns),
			outstanding: AtomicUsize::new(0),
		})
	}

	/// Set the warm connection count kept ready ahead of demand. Must not
	/// exceed the connection cap.
	pub fn with_pool_size(mut self, size: usize) -> Result<Backend, InvalidBackend> {
		let max = self.max_conns.load(Ordering::Relaxed);
		if size > max {
			return Err(InvalidBackend::PoolSize { size, max });
		}
		self.pool_size = size;
		Ok(self)
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn host(&self) -> IpAddr {
		self.host
	}

	pub fn port(&self) -> u16 {
		self.port
	}

	/// `host:port`, with IPv6 hosts bracketed.
	pub fn host_port(&self) -> String {
		SocketAddr::new(self.host, self.port).to_string()
	}

	pub fn weight(&self) -> Option<u16> {
		self.weight
	}

	pub fn pool_size(&self) -> usize {
		self.pool_size
	}

	pub fn is_active(&self) -> bool {
		self.active.load(Ordering::Acquire)
	}

	pub(crate) fn set_active(&self, active: bool) {
		self.active.store(active, Ordering::Release);
	}

	pub fn max_conns(&self) -> usize {
		self.max_conns.load(Ordering::Acquire)
	}

	/// Resize the connection cap. In-flight leases count against the new
	/// cap; if it drops below the outstanding count, no lease is revoked but
	/// no further acquisitions succeed until the count drains below it.
	pub(crate) fn set_max_conns(&self, max: usize) -> Result<(), InvalidBackend> {
		if max == 0 {
			return Err(InvalidBackend::MaxConns);
		}
		self.max_conns.store(max, Ordering::Release);
		Ok(())
	}

	pub fn outstanding(&self) -> usize {
		self.outstanding.load(Ordering::Acquire)
	}

	/// Leased slots within the warm pool.
	pub fn warm_in_use(&self) -> usize {
		self.outstanding().min(self.pool_size)
	}

	/// Leased slots beyond the warm pool.
	pub fn overflow_in_use(&self) -> usize {
		self.outstanding().saturating_sub(self.pool_size)
	}

	/// Reserve one connection slot. Succeeds iff the outstanding count is
	/// below the cap, in which case the count moves up by exactly one. The
	/// check and increment are a single atomic update, so the count can
	/// never be observed above the cap.
	pub fn acquire(&self) -> bool {
		self
			.outstanding
			.fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
				let max = self.max_conns.load(Ordering::Acquire);
				(cur < max).then_some(cur + 1)
			})
			.is_ok()
	}

	/// Return one connection slot. A release with nothing outstanding is a
	/// no-op; the count never underflows even under racing double-releases.
	pub fn release(&self) {
		let _ = self
			.outstanding
			.fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| cur.checked_sub(1));
	}
}

/// A reserved connection slot on one backend. Dropping the lease returns the
/// slot, so every exit path of a request releases exactly once.
#[derive(Debug)]
pub struct Lease {
	backend: Arc<Backend>,
}

impl Lease {
	pub(crate) fn new(backend: Arc<Backend>) -> Lease {
		Lease { backend }
	}

	pub fn backend(&self) -> &Arc<Backend> {
		&self.backend
	}
}

impl Drop for Lease {
	fn drop(&mut self) {
		self.backend.release();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn validates_construction() {
		assert!(Backend::new("s1", "127.0.0.1", 8081, 5).is_ok());
		assert!(Backend::new("s-1_a", "::1", 8081, 5).is_ok());

		assert_eq!(
			Backend::new("", "127.0.0.1", 8081, 5).unwrap_err(),
			InvalidBackend::NameLength(0)
		);
		let long = "x".repeat(65);
		assert_eq!(
			Backend::new(&long, "127.0.0.1", 8081, 5).unwrap_err(),
			InvalidBackend::NameLength(65)
		);
		assert_eq!(
			Backend::new("bad name", "127.0.0.1", 8081, 5).unwrap_err(),
			InvalidBackend::NameChar("bad name".to_string())
		);
		assert_eq!(
			Backend::new("s1", "backend1", 8081, 5).unwrap_err(),
			InvalidBackend::Host("backend1".to_string())
		);
		assert_eq!(
			Backend::new("s1", "0.0.0.0", 8081, 5).unwrap_err(),
			InvalidBackend::Host("0.0.0.0".to_string())
		);
		assert_eq!(
			Backend::new("s1", "127.0.0.1", 0, 5).unwrap_err(),
			InvalidBackend::Port
		);
		assert_eq!(
			Backend::new("s1", "127.0.0.1", 8081, 0).unwrap_err(),
			InvalidBackend::MaxConns
		);
		assert_eq!(
			Backend::weighted("s1", "127.0.0.1", 8081, 5, 0).unwrap_err(),
			InvalidBackend::Weight(0)
		);
		assert_eq!(
			Backend::weighted("s1", "127.0.0.1", 8081, 5, 101).unwrap_err(),
			InvalidBackend::Weight(101)
		);
	}

	#[test]
	fn pool_size_bounded_by_cap() {
		let b = Backend::new("s1", "127.0.0.1", 8081, 5)
			.unwrap()
			.with_pool_size(3)
			.unwrap();
		assert_eq!(b.pool_size(), 3);
		assert_eq!(
			Backend::new("s1", "127.0.0.1", 8081, 5)
				.unwrap()
				.with_pool_size(6)
				.unwrap_err(),
			InvalidBackend::PoolSize { size: 6, max: 5 }
		);
	}

	#[test]
	fn host_port_brackets_ipv6() {
		let b = Backend::new("s1", "::1", 8081, 5).unwrap();
		assert_eq!(b.host_port(), "[::1]:8081");
		let b = Backend::new("s1", "10.0.0.7", 8081, 5).unwrap();
		assert_eq!(b.host_port(), "10.0.0.7:8081");
	}

	#[test]
	fn acquire_respects_cap() {
		let b = Backend::new("s1", "127.0.0.1", 8081, 3).unwrap();
		assert!(b.acquire());
		assert!(b.acquire());
		assert!(b.acquire());
		assert!(!b.acquire());
		assert_eq!(b.outstanding(), 3);

		b.release();
		assert_eq!(b.outstanding(), 2);
		assert!(b.acquire());
		assert!(!b.acquire());
	}

	#[test]
	fn release_never_underflows() {
		let b = Backend::new("s1", "127.0.0.1", 8081, 3).unwrap();
		b.release();
		b.release();
		assert_eq!(b.outstanding(), 0);
		assert!(b.acquire());
		b.release();
		b.release();
		assert_eq!(b.outstanding(), 0);
	}

	#[test]
	fn resize_below_outstanding_blocks_new_leases() {
		let b = Backend::new("s1", "127.0.0.1", 8081, 5).unwrap();
		for _ in 0..4 {
			assert!(b.acquire());
		}
		b.set_max_conns(2).unwrap();
		assert_eq!(b.outstanding(), 4);
		assert!(!b.acquire());
		b.release();
		b.release();
		assert!(!b.acquire());
		b.release();
		assert!(b.acquire());
		assert_eq!(b.set_max_conns(0), Err(InvalidBackend::MaxConns));
	}

	#[test]
	fn warm_and_overflow_counts() {
		let b = Backend::new("s1", "127.0.0.1", 8081, 5)
			.unwrap()
			.with_pool_size(2)
			.unwrap();
		for _ in 0..4 {
			assert!(b.acquire());
		}
		assert_eq!(b.warm_in_use(), 2);
		assert_eq!(b.overflow_in_use(), 2);
	}

	#[test]
	fn lease_releases_on_drop() {
		let b = Arc::new(Backend::new("s1", "127.0.0.1", 8081, 1).unwrap());
		assert!(b.acquire());
		let lease = Lease::new(b.clone());
		assert_eq!(b.outstanding(), 1);
		drop(lease);
		assert_eq!(b.outstanding(), 0);
	}

	#[test]
	fn concurrent_acquires_never_exceed_cap() {
		let b = Arc::new(Backend::new("s1", "127.0.0.1", 8081, 7).unwrap());
		let mut handles = vec![];
		for _ in 0..8 {
			let b = Arc::clone(&b);
			handles.push(std::thread::spawn(move || {
				for _ in 0..1000 {
					assert!(b.outstanding() <= b.max_conns());
					if b.acquire() {
						assert!(b.outstanding() <= b.max_conns());
						b.release();
					}
				}
			}));
		}
		for handle in handles {
			handle.join().unwrap();
		}
		assert_eq!(b.outstanding(), 0);
	}
}
