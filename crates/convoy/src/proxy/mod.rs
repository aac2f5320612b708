mod router;

pub use router::Router;

use crate::http::{Body, Response, StatusCode, header};
use crate::policy::SelectError;

#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
	#[error("{0}")]
	Select(#[from] SelectError),
	#[error("upstream call failed: {0}")]
	UpstreamCallFailed(#[from] hyper_util::client::legacy::Error),
	#[error("request timeout")]
	RequestTimeout,
	#[error("invalid request")]
	InvalidRequest,
}

impl ProxyError {
	pub fn into_response(self) -> Response {
		let code = match &self {
			ProxyError::Select(_) => StatusCode::SERVICE_UNAVAILABLE,
			ProxyError::UpstreamCallFailed(_) => StatusCode::BAD_GATEWAY,
			ProxyError::RequestTimeout => StatusCode::GATEWAY_TIMEOUT,
			ProxyError::InvalidRequest => StatusCode::BAD_REQUEST,
		};
		::http::Response::builder()
			.status(code)
			.header(header::CONTENT_TYPE, "text/plain")
			.body(Body::from(self.to_string()))
			.unwrap()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn selection_errors_map_to_503_with_message() {
		let resp = ProxyError::Select(SelectError::NoServerAvailable).into_response();
		assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
		assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "text/plain");
	}

	#[test]
	fn timeout_maps_to_504() {
		let resp = ProxyError::RequestTimeout.into_response();
		assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
	}
}
