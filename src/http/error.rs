use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::core::{ErrorBody, GatewayError};

/// Seconds clients are told to wait before retrying a 503 (spec.md §7).
const RETRY_AFTER_SECS: &str = "5";

/// Maps a [`GatewayError`] to its HTTP response (spec.md §7). An
/// `UpstreamHttpError` (possibly wrapped inside `AllAttemptsFailed`) is
/// passed through with the upstream's own status and body verbatim; every
/// other variant gets a synthesized `ErrorBody`.
pub struct ApiError {
    pub err: GatewayError,
    pub path: String,
}

impl ApiError {
    pub fn new(err: GatewayError, path: impl Into<String>) -> Self {
        Self { err, path: path.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Some((status, body)) = self.err.upstream_http() {
            let code = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            return (code, body.to_string()).into_response();
        }

        if self.err.is_timeout() {
            let body = ErrorBody::new(&self.err, self.path);
            return (StatusCode::GATEWAY_TIMEOUT, Json(body)).into_response();
        }

        let status = match &self.err {
            GatewayError::RegistryFetchError { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::NoUpstreamsAvailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::UpstreamTransportError(_) => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::UpstreamHttpError { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::AllAttemptsFailed { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::ChainNotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::NotReady { .. } => StatusCode::SERVICE_UNAVAILABLE,
        };
        let retry_after = matches!(
            self.err,
            GatewayError::NoUpstreamsAvailable { .. } | GatewayError::NotReady { .. }
        );
        let body = ErrorBody::new(&self.err, self.path);
        let mut response = (status, Json(body)).into_response();
        if retry_after {
            response
                .headers_mut()
                .insert("Retry-After", HeaderValue::from_static(RETRY_AFTER_SECS));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_not_found_maps_to_404() {
        let err = ApiError::new(
            GatewayError::ChainNotFound { path: "/nope".into() },
            "/nope",
        );
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn upstream_http_error_passes_through_status() {
        let err = ApiError::new(
            GatewayError::UpstreamHttpError { status: 418, body: "teapot".into() },
            "/main/status",
        );
        let resp = err.into_response();
        assert_eq!(resp.status().as_u16(), 418);
    }

    #[test]
    fn upstream_timeout_maps_to_504() {
        let err = ApiError::new(
            GatewayError::UpstreamTimeout("request timed out".into()),
            "/main/status",
        );
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn all_attempts_failed_wrapping_timeout_maps_to_504() {
        let err = ApiError::new(
            GatewayError::AllAttemptsFailed {
                cause: Box::new(GatewayError::UpstreamTimeout("request timed out".into())),
            },
            "/main/status",
        );
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn no_upstreams_available_sets_retry_after() {
        let err = ApiError::new(
            GatewayError::NoUpstreamsAvailable { chain: "main".into() },
            "/main/status",
        );
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(resp.headers().get("Retry-After").unwrap(), "5");
    }

    #[test]
    fn not_ready_sets_retry_after() {
        let err = ApiError::new(GatewayError::NotReady { what: "main".into() }, "/main/status");
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(resp.headers().get("Retry-After").unwrap(), "5");
    }
}
