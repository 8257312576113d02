use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use gleaner_core::error::AppError;
use gleaner_core::sse::error_code;

use crate::dto::ErrorResponse;

/// Wrapper so we can implement `IntoResponse` for `AppError`.
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            AppError::InvalidUrl(_) | AppError::SsrfBlocked(_) => StatusCode::BAD_REQUEST,
            AppError::SerializationError(_) => StatusCode::BAD_REQUEST,
            AppError::RobotsBlocked(_) => StatusCode::FORBIDDEN,
            AppError::NoContentFound(_) => StatusCode::NOT_FOUND,
            AppError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            AppError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            // Client closed request
            AppError::Aborted => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }

        let body = ErrorResponse {
            error: error_code(&self.0).to_string(),
            message: self.0.to_string(),
        };

        let mut response = (status, axum::Json(body)).into_response();
        if let AppError::CircuitOpen { retry_after, .. } = &self.0 {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(retry_after.as_secs()));
        }
        response
    }
}
