use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Which selection policy the balancer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolicyKind {
	#[default]
	RoundRobin,
	WeightedRoundRobin,
	IpHash,
	Random,
}

impl FromStr for PolicyKind {
	type Err = String;

	fn from_str(s: &str) -> Result<PolicyKind, String> {
		match s.to_ascii_lowercase().as_str() {
			"round-robin" | "round_robin" | "rr" => Ok(PolicyKind::RoundRobin),
			"weighted-round-robin" | "weighted_round_robin" | "weighted" | "wrr" => {
				Ok(PolicyKind::WeightedRoundRobin)
			},
			"ip-hash" | "ip_hash" | "iphash" => Ok(PolicyKind::IpHash),
			"random" => Ok(PolicyKind::Random),
			other => Err(format!("unknown policy {other:?}")),
		}
	}
}

impl fmt::Display for PolicyKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			PolicyKind::RoundRobin => "round-robin",
			PolicyKind::WeightedRoundRobin => "weighted-round-robin",
			PolicyKind::IpHash => "ip-hash",
			PolicyKind::Random => "random",
		};
		write!(f, "{name}")
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
	pub limit: u64,
	pub window: Duration,
	pub per_client_ip: bool,
}

/// One backend to register at startup. `host:port` and the optional weight
/// come from a `id=host:port[@weight]` spec; caps fall back to the
/// pool-wide defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
	pub id: String,
	pub host: String,
	pub port: u16,
	pub weight: Option<u16>,
	pub max_conns: Option<usize>,
	pub pool_size: Option<usize>,
}

impl FromStr for BackendConfig {
	type Err = String;

	fn from_str(s: &str) -> Result<BackendConfig, String> {
		let (id, rest) = s
			.split_once('=')
			.ok_or_else(|| format!("expected id=host:port[@weight], got {s:?}"))?;
		let (addr, weight) = match rest.split_once('@') {
			Some((addr, weight)) => {
				let weight = weight
					.parse::<u16>()
					.map_err(|_| format!("invalid weight {weight:?}"))?;
				(addr, Some(weight))
			},
			None => (rest, None),
		};
		let addr: SocketAddr = addr
			.parse()
			.map_err(|_| format!("invalid backend address {addr:?}"))?;
		Ok(BackendConfig {
			id: id.to_string(),
			host: addr.ip().to_string(),
			port: addr.port(),
			weight,
			max_conns: None,
			pool_size: None,
		})
	}
}

/// Constructor inputs for one balancer instance. Built by the embedding
/// binary, not read from files.
#[derive(Debug, Clone)]
pub struct Config {
	pub port: u16,
	pub admin_port: Option<u16>,
	pub policy: PolicyKind,
	/// Connection cap for backends that do not set their own.
	pub default_max_conns: usize,
	/// Warm pool size for backends that do not set their own.
	pub default_pool_size: usize,
	/// Zero disables active health checking.
	pub health_interval: Duration,
	pub health_timeout: Duration,
	pub rate_limit: Option<RateLimitConfig>,
	pub request_timeout: Duration,
	pub instance_name: Option<String>,
	pub product: String,
	pub version: String,
	pub backends: Vec<BackendConfig>,
}

impl Default for Config {
	fn default() -> Config {
		Config {
			port: 8080,
			admin_port: None,
			policy: PolicyKind::RoundRobin,
			default_max_conns: 100,
			default_pool_size: 0,
			health_interval: Duration::from_secs(10),
			health_timeout: Duration::from_secs(2),
			rate_limit: None,
			request_timeout: Duration::from_secs(1),
			instance_name: None,
			product: "Convoy".to_string(),
			version: env!("CARGO_PKG_VERSION").to_string(),
			backends: Vec::new(),
		}
	}
}

impl Config {
	/// The name announced in `X-Load-Balancer`.
	pub fn instance_name(&self) -> String {
		self
			.instance_name
			.clone()
			.unwrap_or_else(|| format!("convoy-lb-{}", self.port))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn policy_kind_parses_aliases() {
		assert_eq!("rr".parse::<PolicyKind>().unwrap(), PolicyKind::RoundRobin);
		assert_eq!(
			"weighted".parse::<PolicyKind>().unwrap(),
			PolicyKind::WeightedRoundRobin
		);
		assert_eq!("ip-hash".parse::<PolicyKind>().unwrap(), PolicyKind::IpHash);
		assert_eq!("Random".parse::<PolicyKind>().unwrap(), PolicyKind::Random);
		assert!("sticky".parse::<PolicyKind>().is_err());
	}

	#[test]
	fn backend_spec_parses() {
		let spec: BackendConfig = "s1=127.0.0.1:8081".parse().unwrap();
		assert_eq!(spec.id, "s1");
		assert_eq!(spec.host, "127.0.0.1");
		assert_eq!(spec.port, 8081);
		assert_eq!(spec.weight, None);

		let spec: BackendConfig = "s2=[::1]:9000@3".parse().unwrap();
		assert_eq!(spec.host, "::1");
		assert_eq!(spec.port, 9000);
		assert_eq!(spec.weight, Some(3));

		assert!("s3".parse::<BackendConfig>().is_err());
		assert!("s3=nothost".parse::<BackendConfig>().is_err());
		assert!("s3=127.0.0.1:8081@heavy".parse::<BackendConfig>().is_err());
	}

	#[test]
	fn instance_name_defaults_from_port() {
		let config = Config {
			port: 9999,
			..Config::default()
		};
		assert_eq!(config.instance_name(), "convoy-lb-9999");
		let named = Config {
			instance_name: Some("edge-1".to_string()),
			..Config::default()
		};
		assert_eq!(named.instance_name(), "edge-1");
	}
}
