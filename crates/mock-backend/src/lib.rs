use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

/// What the backend saw, echoed back so proxy tests can assert on it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct EchoResponse {
	pub server: String,
	pub method: String,
	pub path: String,
	pub headers: HashMap<String, String>,
	pub body: String,
}

/// A demo backend. Answers `/health-check` with 200 and echoes every other
/// request as JSON, tagged with an `X-Backend-Server` header. A
/// `delay_ms` query parameter delays the echo, for timeout tests.
pub struct Server {
	address: SocketAddr,
	shutdown: tokio::sync::oneshot::Sender<()>,
	handle: tokio::task::JoinHandle<()>,
}

impl Server {
	pub async fn run() -> Self {
		Self::run_with_port(0).await
	}

	pub async fn run_with_port(port: u16) -> Self {
		Self::start("", port).await
	}

	/// Run with an explicit server name instead of the port-derived one.
	pub async fn run_named(name: &str, port: u16) -> Self {
		Self::start(name, port).await
	}

	async fn start(name: &str, port: u16) -> Self {
		let listener = TcpListener::bind(("127.0.0.1", port))
			.await
			.expect("failed to bind");
		let address = listener.local_addr().expect("failed to get local addr");
		let name = if name.is_empty() {
			format!("backend-{}", address.port())
		} else {
			name.to_string()
		};
		let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

		let app = Router::new()
			.route("/health-check", get(health_check))
			.fallback(echo_handler)
			.with_state(name);
		let server = async move {
			axum::serve(listener, app)
				.with_graceful_shutdown(async move {
					let _ = shutdown_rx.await;
				})
				.await
				.expect("server error");
		};

		let handle = tokio::spawn(server);

		Server {
			address,
			shutdown: shutdown_tx,
			handle,
		}
	}

	pub fn address(&self) -> SocketAddr {
		self.address
	}

	pub async fn shutdown(self) {
		let _ = self.shutdown.send(());
		let _ = self.handle.await;
	}

	pub async fn wait_for_shutdown(self) {
		let _ = self.handle.await;
	}
}

async fn health_check() -> StatusCode {
	StatusCode::OK
}

async fn echo_handler(
	State(name): State<String>,
	method: Method,
	uri: Uri,
	headers: HeaderMap,
	body: Bytes,
) -> Response {
	if let Some(delay) = requested_delay(&uri) {
		tokio::time::sleep(delay).await;
	}
	let headers_map: HashMap<String, String> = headers
		.iter()
		.map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
		.collect();
	let body_str =
		String::from_utf8(body.to_vec()).unwrap_or_else(|_| "<non-utf8 body>".to_string());
	let resp = EchoResponse {
		server: name.clone(),
		method: method.to_string(),
		path: uri.path().to_string(),
		headers: headers_map,
		body: body_str,
	};
	([("x-backend-server", name)], Json(resp)).into_response()
}

fn requested_delay(uri: &Uri) -> Option<Duration> {
	uri.query()?.split('&').find_map(|pair| {
		let (key, value) = pair.split_once('=')?;
		if key != "delay_ms" {
			return None;
		}
		value.parse().ok().map(Duration::from_millis)
	})
}
