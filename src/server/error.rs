// src/server/error.rs

use std::time::Duration;

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use crate::core::error::{AssessError, ValidationError};

/// An error response. The body is always `{"error": "<message>"}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    RateLimited { retry_after: Duration },
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::Internal(_) => "internal error".to_string(),
            ApiError::RateLimited { .. } => AssessError::RateLimited.to_string(),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<AssessError> for ApiError {
    fn from(err: AssessError) -> Self {
        match err {
            AssessError::Validation(e) => e.into(),
            AssessError::RateLimited => ApiError::RateLimited { retry_after: Duration::ZERO },
            AssessError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // The detail goes to the log only.
        if let ApiError::Internal(msg) = &self {
            error!(error = %msg, "Request failed with an internal error.");
        }

        let mut response = (status, Json(json!({ "error": self.message() }))).into_response();
        if let ApiError::RateLimited { retry_after } = self {
            // Whole seconds, rounded up, never 0.
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            response.headers_mut().insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
        }
        response
    }
}
