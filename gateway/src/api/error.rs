//! API error responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Errors answered directly by the gateway's own endpoints.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request is malformed or was refused.
    #[error("{0}")]
    BadRequest(String),
    /// Nothing serves the requested resource.
    #[error("{0}")]
    NotFound(String),
    /// A forwarded request reached a node that does not accept them.
    #[error("This server does not accept forwarded requests.")]
    ForwardedRequestRejected,
}

impl ApiError {
    /// Status code of the response.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::ForwardedRequestRejected => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "success": false,
            "error": self.to_string(),
        }));

        (self.status_code(), body).into_response()
    }
}
