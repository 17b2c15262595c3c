// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mapping of service errors to HTTP responses.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::{error, warn};

use courier_core::CourierError;

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// A handler failure rendered as `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    Service(CourierError),
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Service(e) => status_of(e),
        }
    }
}

fn status_of(e: &CourierError) -> StatusCode {
    match e {
        CourierError::NotInitialized | CourierError::Storage { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        CourierError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        CourierError::InvalidInput(_)
        | CourierError::InvalidRecipient(_)
        | CourierError::Serialization(_) => StatusCode::BAD_REQUEST,
        CourierError::AccountNotFound(_) => StatusCode::NOT_FOUND,
        CourierError::CapacityExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        CourierError::NoActiveConnection { .. }
        | CourierError::JobFailed { .. }
        | CourierError::Transport { .. } => StatusCode::BAD_GATEWAY,
        CourierError::Config(_)
        | CourierError::HandlerAlreadyRegistered(_)
        | CourierError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<CourierError> for ApiError {
    fn from(e: CourierError) -> Self {
        ApiError::Service(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::Service(e) => e.to_string(),
            ApiError::BadRequest(message) => message,
        };
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %message, "request failed");
        } else {
            warn!(status = status.as_u16(), error = %message, "request rejected");
        }
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
