use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::http::ratelimit::{IpRateLimiter, RateLimitError, RateLimiter};
use crate::http::{Body, ClientAddr, HeaderValue, Request, Response, StatusCode, header};
use crate::http::{client_ip, original_host, x_headers};

/// An async request handler. The boxed future keeps handlers object-safe so
/// middlewares can wrap any of them.
pub type Handler = Arc<dyn Fn(Request) -> BoxFuture<'static, Response> + Send + Sync>;

/// A handler transformer. No middleware may assume it is innermost.
pub type Middleware = Box<dyn FnOnce(Handler) -> Handler + Send>;

pub fn handler<F, Fut>(f: F) -> Handler
where
	F: Fn(Request) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Response> + Send + 'static,
{
	Arc::new(move |req| f(req).boxed())
}

/// Compose middlewares around a handler, first-listed outermost:
/// `chain([m1, m2], h)` runs requests through `m1(m2(h))`.
pub fn chain(middlewares: Vec<Middleware>, inner: Handler) -> Handler {
	middlewares
		.into_iter()
		.rev()
		.fold(inner, |handler, middleware| middleware(handler))
}

/// Sets the forwarding headers on the request and stamps the response with
/// the product identity. All strings are constructor inputs, not process
/// globals.
pub fn headers(instance: &str, product: &str, version: &str) -> Middleware {
	let instance = HeaderValue::from_str(instance).ok();
	let product = HeaderValue::from_str(product).ok();
	let version = HeaderValue::from_str(version).ok();
	Box::new(move |next: Handler| {
		Arc::new(move |mut req: Request| {
			if let Some(peer) = req.extensions().get::<ClientAddr>().copied()
				&& let Ok(value) = HeaderValue::from_str(&peer.0.ip().to_string())
			{
				req.headers_mut().insert(x_headers::X_FORWARDED_FOR, value);
			}
			if let Some(host) = original_host(&req)
				&& let Ok(value) = HeaderValue::from_str(&host)
			{
				req.headers_mut().insert(x_headers::X_ORIGINAL_HOST, value);
			}
			if let Some(instance) = &instance {
				req
					.headers_mut()
					.insert(x_headers::X_LOAD_BALANCER, instance.clone());
			}
			let next = next.clone();
			let product = product.clone();
			let version = version.clone();
			async move {
				let mut resp = next(req).await;
				if let Some(product) = product {
					resp.headers_mut().insert(x_headers::X_POWERED_BY, product);
				}
				if let Some(version) = version {
					resp
						.headers_mut()
						.insert(x_headers::X_LOAD_BALANCER_VERSION, version);
				}
				resp
			}
			.boxed()
		})
	})
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitScope {
	Global,
	PerClientIp,
}

enum Limiter {
	Global(Arc<RateLimiter>),
	PerIp(Arc<IpRateLimiter>),
}

impl Limiter {
	fn for_request(&self, req: &Request) -> Arc<RateLimiter> {
		match self {
			Limiter::Global(limiter) => limiter.clone(),
			Limiter::PerIp(limiters) => {
				// Clients we cannot identify share one bucket.
				let ip = client_ip(req).unwrap_or_else(|| "unknown".to_string());
				limiters.get(&ip)
			},
		}
	}
}

/// Rate-limit middleware, failing construction on bad settings.
pub fn try_rate_limit(
	limit: u64,
	window: Duration,
	scope: RateLimitScope,
) -> Result<Middleware, RateLimitError> {
	let limiter = match scope {
		RateLimitScope::Global => Limiter::Global(Arc::new(RateLimiter::new(limit, window)?)),
		RateLimitScope::PerClientIp => {
			Limiter::PerIp(Arc::new(IpRateLimiter::new(limit, window)?))
		},
	};
	Ok(Box::new(move |next: Handler| {
		Arc::new(move |req: Request| {
			let limiter = limiter.for_request(&req);
			if !limiter.try_acquire() {
				return futures_util::future::ready(too_many_requests(&limiter)).boxed();
			}
			next(req)
		})
	}))
}

/// Rate-limit middleware. Misconfigured settings still yield a middleware;
/// it answers every request with 503 so the bad deployment is loud instead
/// of silently unlimited. Use [`try_rate_limit`] to inspect the failure.
pub fn rate_limit(limit: u64, window: Duration, scope: RateLimitScope) -> Middleware {
	match try_rate_limit(limit, window, scope) {
		Ok(middleware) => middleware,
		Err(err) => Box::new(move |_next: Handler| {
			Arc::new(move |_req: Request| {
				futures_util::future::ready(misconfigured(&err)).boxed()
			})
		}),
	}
}

fn too_many_requests(limiter: &RateLimiter) -> Response {
	let body = serde_json::json!({
		"error": "rate limit exceeded",
		"limit": limiter.limit(),
		"remaining": 0,
		"reset": limiter.reset_unix_secs(),
	});
	::http::Response::builder()
		.status(StatusCode::TOO_MANY_REQUESTS)
		.header(header::CONTENT_TYPE, "application/json")
		.header(x_headers::X_RATELIMIT_LIMIT, limiter.limit())
		.header(x_headers::X_RATELIMIT_REMAINING, 0)
		.body(Body::from(body.to_string()))
		.unwrap()
}

fn misconfigured(err: &RateLimitError) -> Response {
	let body = serde_json::json!({ "error": err.to_string() });
	::http::Response::builder()
		.status(StatusCode::SERVICE_UNAVAILABLE)
		.header(header::CONTENT_TYPE, "application/json")
		.body(Body::from(body.to_string()))
		.unwrap()
}
