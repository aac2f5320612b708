pub mod middleware;
pub mod ratelimit;

use std::net::SocketAddr;

pub type Body = axum_core::body::Body;
pub type Request = ::http::Request<Body>;
pub type Response = ::http::Response<Body>;

pub use ::http::uri::{Authority, PathAndQuery, Scheme};
pub use ::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header};

pub mod x_headers {
	use http::HeaderName;

	pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
	pub const X_ORIGINAL_HOST: HeaderName = HeaderName::from_static("x-original-host");
	pub const X_LOAD_BALANCER: HeaderName = HeaderName::from_static("x-load-balancer");
	pub const X_POWERED_BY: HeaderName = HeaderName::from_static("x-powered-by");
	pub const X_LOAD_BALANCER_VERSION: HeaderName =
		HeaderName::from_static("x-load-balancer-version");
	pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
	pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
}

/// Peer address of the client connection, stashed into request extensions by
/// the accept loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub SocketAddr);

/// The client identity for rate limiting and IP-hash stickiness: the first
/// hop of `X-Forwarded-For` when present, else the connection peer address.
pub fn client_ip(req: &Request) -> Option<String> {
	if let Some(forwarded) = req.headers().get(x_headers::X_FORWARDED_FOR)
		&& let Ok(forwarded) = forwarded.to_str()
	{
		let first = forwarded.split(',').next().unwrap_or("").trim();
		if !first.is_empty() {
			return Some(first.to_string());
		}
	}
	req
		.extensions()
		.get::<ClientAddr>()
		.map(|addr| addr.0.ip().to_string())
}

/// The host the client originally addressed: the `Host` header for HTTP/1,
/// else the request authority.
pub fn original_host(req: &Request) -> Option<String> {
	req
		.headers()
		.get(header::HOST)
		.and_then(|h| h.to_str().ok())
		.map(str::to_string)
		.or_else(|| req.uri().authority().map(|a| a.to_string()))
}
