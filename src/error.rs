//! Error types for the query gateway.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// Result type alias used throughout the gateway.
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway errors, one variant per row of the error taxonomy.
///
/// Every variant maps to exactly one HTTP status via [`Error::status_code`]
/// and one log level via [`Error::is_server_error`].
#[derive(Error, Debug)]
pub enum Error {
    /// Config file failed to load or validate. Startup-only; the process exits.
    #[error("configuration error: {0}")]
    ConfigInvalid(String),

    /// Inbound `Host` does not match any configured destination.
    #[error("unknown host: {0}")]
    UnknownHost(String),

    /// `x-id-token` header missing.
    #[error("missing identity token")]
    TokenMissing,

    /// `x-id-token` failed signature or claim verification.
    #[error("invalid identity token: {0}")]
    TokenInvalid(String),

    /// `X-Scope-OrgID` header missing or empty.
    #[error("missing tenant header")]
    TenantHeaderMissing,

    /// `X-Scope-OrgID` carried a pipe-delimited multi-tenant list.
    #[error("multi-tenant requests are not supported")]
    TenantHeaderMultiTenant,

    /// Tenant absent from the destination's tenant map and `allowUndefined` is false.
    #[error("tenant unknown to this destination")]
    TenantUnknown,

    /// Caller's groups did not satisfy the tenant's allow/deny policy.
    #[error("access denied by tenant policy")]
    PolicyDenied,

    /// The query parameter's value failed to parse as the backend's grammar.
    #[error("invalid query: {0}")]
    QueryUnparseable(String),

    /// The parsed query has a shape the rewriter does not know how to handle.
    #[error("unsupported expression type: {0}")]
    QueryUnsupportedShape(String),

    /// A route this backend/method combination is deliberately unimplemented.
    #[error("not implemented: {0}")]
    BackendNotImplemented(String),

    /// Destination type has no registered rewriter at all (unreachable in valid config).
    #[error("unprocessable destination: {0}")]
    UnprocessableDestination(String),

    /// The upstream call itself failed (connection, timeout, etc).
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    /// A branch that config validation should have made unreachable.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Body shape for all error responses. Deliberately short and non-leaky.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl Error {
    /// HTTP status this error surfaces to the client, per the taxonomy in
    /// the specification's error handling design.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ConfigInvalid(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::UnknownHost(_) => StatusCode::NOT_FOUND,
            Self::TokenMissing | Self::TokenInvalid(_) => StatusCode::UNAUTHORIZED,
            Self::TenantHeaderMissing => StatusCode::BAD_REQUEST,
            Self::TenantHeaderMultiTenant => StatusCode::NOT_IMPLEMENTED,
            Self::TenantUnknown => StatusCode::FORBIDDEN,
            Self::PolicyDenied => StatusCode::FORBIDDEN,
            Self::QueryUnparseable(_) => StatusCode::BAD_REQUEST,
            Self::QueryUnsupportedShape(_) => StatusCode::BAD_REQUEST,
            Self::BackendNotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            Self::UnprocessableDestination(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable kind string for the response body.
    #[must_use]
    fn kind(&self) -> &'static str {
        match self {
            Self::ConfigInvalid(_) => "config_invalid",
            Self::UnknownHost(_) => "unknown_host",
            Self::TokenMissing => "token_missing",
            Self::TokenInvalid(_) => "token_invalid",
            Self::TenantHeaderMissing => "tenant_header_missing",
            Self::TenantHeaderMultiTenant => "tenant_header_multi_tenant",
            Self::TenantUnknown => "tenant_unknown",
            Self::PolicyDenied => "policy_denied",
            Self::QueryUnparseable(_) => "query_unparseable",
            Self::QueryUnsupportedShape(_) => "query_unsupported_shape",
            Self::BackendNotImplemented(_) => "not_implemented",
            Self::UnprocessableDestination(_) => "unprocessable_destination",
            Self::Upstream(_) => "upstream_error",
            Self::Internal(_) => "internal",
        }
    }

    /// Errors surfaced as 5xx are logged at `error`, everything policy-produced
    /// (4xx) is logged at `warn`, per the propagation policy.
    fn log(&self) {
        if self.status_code().is_server_error() {
            error!(error = %self, kind = self.kind(), "request failed");
        } else {
            warn!(error = %self, kind = self.kind(), "request rejected");
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        self.log();
        let status = self.status_code();
        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
        };
        (status, axum::Json(body)).into_response()
    }
}
