use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use convoy::{BackendConfig, Config, RateLimitConfig, app, telemetry};
use tracing::info;

/// Backends registered when none are given on the command line. Weighted so
/// every policy, including weighted round-robin, works out of the box.
const DEFAULT_BACKENDS: [&str; 3] = [
	"s1=127.0.0.1:8081@3",
	"s2=127.0.0.1:8082@1",
	"s3=127.0.0.1:8083@2",
];

#[derive(Parser, Debug)]
#[command(name = "convoy", about = "HTTP reverse-proxy load balancer", version)]
struct Args {
	/// Port to accept client traffic on
	#[arg(short, long, default_value_t = 8080)]
	port: u16,

	/// Management port serving /healthz and /backends/health
	#[arg(long)]
	admin_port: Option<u16>,

	/// Selection policy: round-robin, weighted-round-robin, ip-hash, random
	#[arg(long, default_value = "round-robin")]
	policy: String,

	/// Backend spec id=host:port[@weight]; repeatable
	#[arg(long = "backend")]
	backends: Vec<String>,

	/// Connection cap per backend
	#[arg(long, default_value_t = 100)]
	max_conns: usize,

	/// Warm connection pool size per backend
	#[arg(long, default_value_t = 0)]
	pool_size: usize,

	/// Seconds between health-check cycles; 0 disables probing
	#[arg(long, default_value_t = 10)]
	health_interval: u64,

	/// Per-probe timeout in seconds
	#[arg(long, default_value_t = 2)]
	health_timeout: u64,

	/// Requests allowed per window; unset disables rate limiting
	#[arg(long)]
	rate_limit: Option<u64>,

	/// Rate-limit window in seconds
	#[arg(long, default_value_t = 60)]
	rate_limit_window: u64,

	/// Track the rate limit per client IP instead of globally
	#[arg(long)]
	per_ip: bool,

	/// Upstream request deadline in milliseconds
	#[arg(long, default_value_t = 1000)]
	request_timeout_ms: u64,

	/// Instance name announced in X-Load-Balancer
	#[arg(long)]
	name: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	telemetry::setup_logging();
	let args = Args::parse();

	let specs = if args.backends.is_empty() {
		info!("no backends given; using the default local set");
		DEFAULT_BACKENDS.iter().map(|s| s.to_string()).collect()
	} else {
		args.backends.clone()
	};
	let backends = specs
		.iter()
		.map(|spec| {
			spec
				.parse::<BackendConfig>()
				.map_err(anyhow::Error::msg)
				.with_context(|| format!("bad backend spec {spec:?}"))
		})
		.collect::<anyhow::Result<Vec<_>>>()?;

	let config = Config {
		port: args.port,
		admin_port: args.admin_port,
		policy: args.policy.parse().map_err(anyhow::Error::msg)?,
		default_max_conns: args.max_conns,
		default_pool_size: args.pool_size,
		health_interval: Duration::from_secs(args.health_interval),
		health_timeout: Duration::from_secs(args.health_timeout),
		rate_limit: args.rate_limit.map(|limit| RateLimitConfig {
			limit,
			window: Duration::from_secs(args.rate_limit_window),
			per_client_ip: args.per_ip,
		}),
		request_timeout: Duration::from_millis(args.request_timeout_ms),
		instance_name: args.name,
		backends,
		..Config::default()
	};

	let server = app::run(config).await?;
	shutdown_signal().await;
	info!("shutting down");
	server.shutdown();
	server.wait().await;
	Ok(())
}

async fn shutdown_signal() {
	#[cfg(unix)]
	{
		use tokio::signal::unix::{SignalKind, signal};
		let mut term = match signal(SignalKind::terminate()) {
			Ok(term) => term,
			Err(_) => {
				let _ = tokio::signal::ctrl_c().await;
				return;
			},
		};
		tokio::select! {
			_ = tokio::signal::ctrl_c() => {},
			_ = term.recv() => {},
		}
	}
	#[cfg(not(unix))]
	{
		let _ = tokio::signal::ctrl_c().await;
	}
}
