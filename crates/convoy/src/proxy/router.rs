use std::sync::Arc;
use std::time::Duration;

use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::{debug, trace};

use crate::http::middleware::{self, Handler};
use crate::http::{Authority, Body, PathAndQuery, Request, Response, Scheme, Uri, client_ip};
use crate::policy::{LoadBalancer, RequestContext};
use crate::proxy::ProxyError;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// Ties selection to forwarding: pick a backend, proxy the request to it
/// under a deadline, and give the connection slot back on every exit.
pub struct Router {
	lb: Arc<LoadBalancer>,
	client: Client<HttpConnector, Body>,
	timeout: Duration,
}

impl Router {
	pub fn new(lb: Arc<LoadBalancer>) -> Router {
		Router::with_timeout(lb, DEFAULT_REQUEST_TIMEOUT)
	}

	pub fn with_timeout(lb: Arc<LoadBalancer>, timeout: Duration) -> Router {
		Router {
			lb,
			client: Client::builder(TokioExecutor::new()).build_http(),
			timeout,
		}
	}

	pub fn handler(self: Arc<Self>) -> Handler {
		middleware::handler(move |req| {
			let router = self.clone();
			async move { router.route(req).await }
		})
	}

	pub async fn route(&self, req: Request) -> Response {
		match self.proxy(req).await {
			Ok(resp) => resp,
			Err(err) => {
				debug!(error = %err, "request not proxied");
				err.into_response()
			},
		}
	}

	async fn proxy(&self, mut req: Request) -> Result<Response, ProxyError> {
		let ctx = RequestContext {
			client_ip: client_ip(&req),
		};
		// The lease is held for the whole proxy exchange and returned when
		// it drops, also on the timeout and error paths below.
		let lease = self.lb.next(&ctx)?;
		let backend = lease.backend();

		*req.uri_mut() = target_uri(req.uri(), &backend.host_port())?;
		trace!(server = backend.id(), uri = %req.uri(), "forwarding request");

		// Deadline covers the upstream call; when it fires, the in-flight
		// request future is dropped and the connection aborted.
		let resp = tokio::time::timeout(self.timeout, self.client.request(req))
			.await
			.map_err(|_| ProxyError::RequestTimeout)??;
		Ok(resp.map(Body::new))
	}
}

/// Rewrite a request URI to address the chosen backend, keeping path and
/// query intact.
fn target_uri(uri: &Uri, authority: &str) -> Result<Uri, ProxyError> {
	let mut parts = uri.clone().into_parts();
	parts.scheme = Some(Scheme::HTTP);
	parts.authority =
		Some(Authority::try_from(authority).map_err(|_| ProxyError::InvalidRequest)?);
	if parts.path_and_query.is_none() {
		parts.path_and_query = Some(PathAndQuery::from_static("/"));
	}
	Uri::from_parts(parts).map_err(|_| ProxyError::InvalidRequest)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn target_uri_rewrites_authority_only() {
		let uri: Uri = "/search?q=all&page=2".parse().unwrap();
		let rewritten = target_uri(&uri, "10.0.0.7:8081").unwrap();
		assert_eq!(rewritten.to_string(), "http://10.0.0.7:8081/search?q=all&page=2");
	}

	#[test]
	fn target_uri_defaults_empty_path() {
		let uri = Uri::default();
		let rewritten = target_uri(&uri, "10.0.0.7:8081").unwrap();
		assert_eq!(rewritten.to_string(), "http://10.0.0.7:8081/");
	}

	#[test]
	fn target_uri_handles_ipv6_authority() {
		let uri: Uri = "/x".parse().unwrap();
		let rewritten = target_uri(&uri, "[::1]:8081").unwrap();
		assert_eq!(rewritten.to_string(), "http://[::1]:8081/x");
	}
}
