//! Mapping of service errors onto HTTP responses.
//!
//! Every failure is answered with a JSON body carrying the stable error kind:
//!
//! ```json
//! { "error": "AlreadyPooled", "message": "App a already belongs to pool p" }
//! ```
//!
//! ## Status Codes
//! - 400: `InvalidQuantity`, `InvalidRange`, `InvalidIdentifier`
//! - 400/415/422: `InvalidRequest` (unreadable body or query string)
//! - 404: `NotFound`
//! - 409: `AlreadyPooled`, `DeleteNotPermitted`, `RangeConflict`
//! - 503: `ConcurrencyExhausted` and other transient failures
//! - 500: everything else

use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

pub type Result<T> = core::result::Result<T, ApiError>;

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Service(#[from] rangeid::Error),

    /// The request asked for more identifiers than the server allows at once.
    #[error("Invalid quantity: {quantity} exceeds the per-request limit of {limit}")]
    QuantityLimit { quantity: i64, limit: i64 },

    /// The body was missing, not JSON, or did not match the expected shape.
    #[error("Invalid request body: {}", .0.body_text())]
    InvalidBody(#[from] JsonRejection),

    #[error("Invalid query string: {}", .0.body_text())]
    InvalidQuery(#[from] QueryRejection),
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Service(e) => e.kind(),
            Self::QuantityLimit { .. } => "InvalidQuantity",
            Self::InvalidBody(_) | Self::InvalidQuery(_) => "InvalidRequest",
        }
    }

    pub fn status(&self) -> StatusCode {
        use rangeid::Error;

        match self {
            Self::QuantityLimit { .. } => StatusCode::BAD_REQUEST,
            Self::InvalidBody(rejection) => rejection.status(),
            Self::InvalidQuery(rejection) => rejection.status(),
            Self::Service(e) => match e {
                Error::InvalidQuantity { .. }
                | Error::InvalidRange { .. }
                | Error::InvalidIdentifier { .. } => StatusCode::BAD_REQUEST,
                Error::NotFound { .. } => StatusCode::NOT_FOUND,
                Error::AlreadyPooled { .. }
                | Error::DeleteNotPermitted { .. }
                | Error::RangeConflict { .. } => StatusCode::CONFLICT,
                e if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(kind = self.kind(), error = %self, "request failed");
        } else {
            tracing::debug!(kind = self.kind(), error = %self, "request rejected");
        }

        let body = json!({ "error": self.kind(), "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}
