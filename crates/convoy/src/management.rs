use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::health::{HealthChecker, ServerHealth};

/// The unauthenticated management surface: process readiness plus the
/// per-backend health records.
pub fn app(health: Option<Arc<HealthChecker>>) -> Router {
	Router::new()
		.route("/healthz", get(healthz))
		.route("/backends/health", get(backends_health))
		.with_state(health)
}

async fn healthz() -> &'static str {
	"ok"
}

async fn backends_health(
	State(health): State<Option<Arc<HealthChecker>>>,
) -> Json<HashMap<String, ServerHealth>> {
	Json(health.map(|h| h.all()).unwrap_or_default())
}

pub async fn serve(
	listener: TcpListener,
	health: Option<Arc<HealthChecker>>,
	cancel: CancellationToken,
) -> std::io::Result<()> {
	axum::serve(listener, app(health))
		.with_graceful_shutdown(cancel.cancelled_owned())
		.await
}
