use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::models::courier::TrackingMode;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{mode} tracking range exhausted (end {end})")]
    RangeExhausted { mode: &'static str, end: i64 },

    #[error("express tracking range is not configured for this courier")]
    ExpressNotConfigured,

    #[error("custom courier: tracking ids are entered manually")]
    CustomCourier,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn courier_not_found() -> Self {
        AppError::NotFound("Courier not found".to_string())
    }

    pub fn range_exhausted(mode: TrackingMode, end: i64) -> Self {
        AppError::RangeExhausted {
            mode: mode.as_str(),
            end,
        }
    }

    /// Short label used in metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::Conflict(_) => "conflict",
            AppError::RangeExhausted { .. } => "range_exhausted",
            AppError::ExpressNotConfigured => "express_not_configured",
            AppError::CustomCourier => "custom_courier",
            AppError::Storage(_) => "storage",
            AppError::Internal(_) => "internal",
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_)
            | AppError::RangeExhausted { .. }
            | AppError::ExpressNotConfigured
            | AppError::CustomCourier => StatusCode::CONFLICT,
            AppError::Storage(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
            "Server error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
