//! Error types for queue dispatch.

use axum::http::StatusCode;

/// Errors from the queue correlation table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// A pending slot already exists for this request id.
    #[error("Unable to add pending response id {0}")]
    DuplicateRequestId(String),
}

/// Why a dispatched request produced no usable module response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The correlation slot could not be created.
    #[error("Unable to add pending response id {reqid} to queue '{queue}'.")]
    DuplicateRequest {
        /// Request id.
        reqid: String,
        /// Target queue.
        queue: String,
    },
    /// No module answered within the response timeout.
    #[error("The request timed out (#reqid {0})")]
    Timeout(String),
    /// The caller went away before a response arrived.
    #[error("The request was canceled by caller (#reqid {0})")]
    Cancelled(String),
    /// The module posted an empty response.
    #[error("null json returned from backend (#reqid {0})")]
    EmptyResponse(String),
    /// The module response is not a JSON object.
    #[error("Invalid JSON response from backend (#reqid {0})")]
    InvalidJson(String),
}

impl DispatchError {
    /// Status code reported in the error envelope.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Cancelled(_) => StatusCode::REQUEST_TIMEOUT,
            Self::DuplicateRequest { .. }
            | Self::Timeout(_)
            | Self::EmptyResponse(_)
            | Self::InvalidJson(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns `true` if the module never answered in time.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
