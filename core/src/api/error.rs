// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! API error handling.
//!
//! Errors serialise as `{"error": ...}` bodies; the state-machine
//! reject additionally carries the current status, the requested
//! status, and the allowed next states so clients can self-correct.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

use crate::jobs::{allowed_transitions, RenderStatus};
use crate::store::StoreError;

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

/// API error types
#[derive(Debug)]
pub enum ApiError {
    /// Bad request (400)
    BadRequest(String),
    /// Unknown resource (404)
    NotFound(String),
    /// Rejected state-machine transition (400)
    InvalidTransition {
        /// Status the job is currently in
        current: RenderStatus,
        /// Status the client asked for
        requested: RenderStatus,
    },
    /// Retry ceiling hit (400)
    RetryExhausted {
        /// The retry count that crossed the ceiling
        retry_count: u32,
    },
    /// Internal server error (500)
    Internal(String),
}

impl ApiError {
    /// The HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::InvalidTransition { .. } | Self::RetryExhausted { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadRequest(msg) | Self::NotFound(msg) | Self::Internal(msg) => f.write_str(msg),
            Self::InvalidTransition { current, requested } => {
                write!(f, "invalid state transition: {current} -> {requested}")
            }
            Self::RetryExhausted { retry_count } => {
                write!(f, "max retries exceeded ({retry_count})")
            }
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            Self::BadRequest(msg) | Self::NotFound(msg) | Self::Internal(msg) => {
                json!({ "error": msg })
            }
            Self::InvalidTransition { current, requested } => json!({
                "error": "invalid state transition",
                "current_status": current,
                "requested_status": requested,
                "allowed_transitions": allowed_transitions(*current),
            }),
            Self::RetryExhausted { retry_count } => json!({
                "error": "max retries exceeded",
                "retry_count": retry_count,
            }),
        };
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}
