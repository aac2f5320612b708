use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::health::HealthChecker;
use crate::http::middleware::{self, Handler, Middleware, RateLimitScope};
use crate::http::{Body, ClientAddr};
use crate::management;
use crate::policy::{self, LoadBalancer};
use crate::pool::BackendPool;
use crate::pool::backend::Backend;
use crate::proxy::Router;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// A running balancer instance.
pub struct Server {
	address: SocketAddr,
	admin_address: Option<SocketAddr>,
	pool: Arc<BackendPool>,
	health: Option<Arc<HealthChecker>>,
	cancel: CancellationToken,
	handle: JoinHandle<()>,
}

impl Server {
	pub fn address(&self) -> SocketAddr {
		self.address
	}

	pub fn admin_address(&self) -> Option<SocketAddr> {
		self.admin_address
	}

	/// The live pool; admin operations go through this handle.
	pub fn pool(&self) -> &Arc<BackendPool> {
		&self.pool
	}

	pub fn health(&self) -> Option<&Arc<HealthChecker>> {
		self.health.as_ref()
	}

	/// Begin shutdown: stop accepting, stop probing, drain in-flight
	/// connections.
	pub fn shutdown(&self) {
		self.cancel.cancel();
		if let Some(health) = &self.health {
			health.stop();
		}
	}

	pub async fn wait(self) {
		let _ = self.handle.await;
	}
}

/// Wire up and start a balancer from its configuration.
pub async fn run(config: Config) -> anyhow::Result<Server> {
	let pool = Arc::new(BackendPool::new());
	for spec in &config.backends {
		let max_conns = spec.max_conns.unwrap_or(config.default_max_conns);
		let backend = match spec.weight {
			Some(weight) => Backend::weighted(&spec.id, &spec.host, spec.port, max_conns, weight)?,
			None => Backend::new(&spec.id, &spec.host, spec.port, max_conns)?,
		};
		let backend =
			backend.with_pool_size(spec.pool_size.unwrap_or(config.default_pool_size))?;
		pool.add(backend)?;
		debug!(server = %spec.id, "registered backend");
	}

	let health = if config.health_interval.is_zero() {
		None
	} else {
		let hc = Arc::new(HealthChecker::new(
			pool.clone(),
			config.health_interval,
			config.health_timeout,
		)?);
		hc.start();
		Some(hc)
	};

	let mut lb = LoadBalancer::new(pool.clone(), policy::picker_for(config.policy));
	if let Some(hc) = &health {
		lb = lb.with_health(hc.clone());
	}
	let router = Arc::new(Router::with_timeout(Arc::new(lb), config.request_timeout));

	let mut middlewares: Vec<Middleware> = Vec::new();
	if let Some(rl) = &config.rate_limit {
		let scope = if rl.per_client_ip {
			RateLimitScope::PerClientIp
		} else {
			RateLimitScope::Global
		};
		middlewares.push(middleware::rate_limit(rl.limit, rl.window, scope));
	}
	middlewares.push(middleware::headers(
		&config.instance_name(),
		&config.product,
		&config.version,
	));
	let handler = middleware::chain(middlewares, router.handler());

	let cancel = CancellationToken::new();

	let admin_address = match config.admin_port {
		Some(port) => {
			let listener = TcpListener::bind(("127.0.0.1", port)).await?;
			let address = listener.local_addr()?;
			let health = health.clone();
			let admin_cancel = cancel.clone();
			tokio::spawn(async move {
				if let Err(err) = management::serve(listener, health, admin_cancel).await {
					warn!(error = %err, "admin server failed");
				}
			});
			info!(%address, "admin server listening");
			Some(address)
		},
		None => None,
	};

	let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
	let address = listener.local_addr()?;
	let handle = tokio::spawn(accept_loop(listener, handler, cancel.clone()));
	info!(%address, policy = %config.policy, "load balancer listening");

	Ok(Server {
		address,
		admin_address,
		pool,
		health,
		cancel,
		handle,
	})
}

async fn accept_loop(listener: TcpListener, handler: Handler, cancel: CancellationToken) {
	let graceful = GracefulShutdown::new();
	loop {
		tokio::select! {
			_ = cancel.cancelled() => break,
			accepted = listener.accept() => {
				let (stream, peer) = match accepted {
					Ok(conn) => conn,
					Err(err) => {
						warn!(error = %err, "accept failed");
						continue;
					},
				};
				let handler = handler.clone();
				let service = service_fn(move |mut req: ::http::Request<Incoming>| {
					let handler = handler.clone();
					async move {
						req.extensions_mut().insert(ClientAddr(peer));
						Ok::<_, Infallible>(handler(req.map(Body::new)).await)
					}
				});
				let builder = auto::Builder::new(TokioExecutor::new());
				let conn = builder
					.serve_connection_with_upgrades(TokioIo::new(stream), service)
					.into_owned();
				let conn = graceful.watch(conn);
				tokio::spawn(async move {
					if let Err(err) = conn.await {
						debug!("connection closed with error: {err}");
					}
				});
			}
		}
	}
	// Let in-flight requests finish, but not forever.
	if tokio::time::timeout(SHUTDOWN_GRACE, graceful.shutdown())
		.await
		.is_err()
	{
		warn!("graceful shutdown timed out; dropping remaining connections");
	}
}
