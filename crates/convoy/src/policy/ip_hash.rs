use std::sync::Arc;

use crate::policy::{Picker, RequestContext, SelectError};
use crate::pool::backend::Backend;

/// Pins each client IP to one backend by hashing the IP over the pool's
/// current order. Stickiness is the contract: if the pinned backend cannot
/// take the request there is no fallback.
#[derive(Debug, Default, Clone, Copy)]
pub struct IpHash;

/// 32-bit FNV-1a.
fn fnv1a(data: &[u8]) -> u32 {
	let mut hash: u32 = 0x811c9dc5;
	for byte in data {
		hash ^= u32::from(*byte);
		hash = hash.wrapping_mul(0x0100_0193);
	}
	hash
}

impl Picker for IpHash {
	fn pick(
		&self,
		backends: &[Arc<Backend>],
		ctx: &RequestContext,
		eligible: &dyn Fn(&Backend) -> bool,
	) -> Result<Arc<Backend>, SelectError> {
		let n = backends.len();
		if n == 0 {
			return Err(SelectError::NoServerAvailable);
		}
		let client_ip = ctx.client_ip.as_deref().ok_or(SelectError::NoClientIp)?;
		let idx = fnv1a(client_ip.as_bytes()) as usize % n;
		let backend = &backends[idx];
		if eligible(backend) && backend.acquire() {
			Ok(backend.clone())
		} else {
			Err(SelectError::ServerNotAvailable)
		}
	}
}
