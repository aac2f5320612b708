use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Install the process-wide tracing subscriber. `RUST_LOG` overrides the
/// default `info` filter. Call once from the binary.
pub fn setup_logging() {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	tracing_subscriber::registry()
		.with(filter)
		.with(tracing_subscriber::fmt::layer())
		.init();
}
