use chrono::{DateTime, Utc};
use serde::Serialize;

/// Error taxonomy for the endpoint lifecycle and routing engine.
///
/// Mirrors the shape of the teacher's `RpcError` (one variant per failure
/// mode observed by a caller), extended with the upstream transport/HTTP
/// split and retry-exhaustion wrapper the routing engine needs.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("registry fetch failed for chain {chain}: {reason}")]
    RegistryFetchError { chain: String, reason: String },

    #[error("no upstreams available for chain {chain}")]
    NoUpstreamsAvailable { chain: String },

    #[error("upstream transport error: {0}")]
    UpstreamTransportError(String),

    #[error("upstream request timed out: {0}")]
    UpstreamTimeout(String),

    #[error("upstream returned HTTP {status}")]
    UpstreamHttpError { status: u16, body: String },

    #[error("all retry attempts failed: {cause}")]
    AllAttemptsFailed { cause: Box<GatewayError> },

    #[error("no chain matches path {path}")]
    ChainNotFound { path: String },

    #[error("{what} is not ready")]
    NotReady { what: String },
}

impl GatewayError {
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::RegistryFetchError { .. } => "RegistryFetchError",
            GatewayError::NoUpstreamsAvailable { .. } => "NoUpstreamsAvailable",
            GatewayError::UpstreamTransportError(_) => "UpstreamTransportError",
            GatewayError::UpstreamTimeout(_) => "UpstreamTimeout",
            GatewayError::UpstreamHttpError { .. } => "UpstreamHttpError",
            GatewayError::AllAttemptsFailed { .. } => "AllAttemptsFailed",
            GatewayError::ChainNotFound { .. } => "ChainNotFound",
            GatewayError::NotReady { .. } => "NotReady",
        }
    }

    /// Status/body an upstream returned, if this error (or its wrapped
    /// cause) is an `UpstreamHttpError`. Used by the HTTP boundary to pass
    /// the upstream's status and body through verbatim.
    pub fn upstream_http(&self) -> Option<(u16, &str)> {
        match self {
            GatewayError::UpstreamHttpError { status, body } => Some((*status, body)),
            GatewayError::AllAttemptsFailed { cause } => cause.upstream_http(),
            _ => None,
        }
    }

    /// True iff this error (or its wrapped cause) is a timed-out upstream
    /// request — the HTTP boundary maps this to 504 rather than 502.
    pub fn is_timeout(&self) -> bool {
        match self {
            GatewayError::UpstreamTimeout(_) => true,
            GatewayError::AllAttemptsFailed { cause } => cause.is_timeout(),
            _ => false,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub path: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorBody {
    pub fn new(err: &GatewayError, path: impl Into<String>) -> Self {
        Self {
            error: err.kind().to_string(),
            message: err.to_string(),
            path: path.into(),
            timestamp: Utc::now(),
        }
    }
}
