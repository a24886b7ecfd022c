use axum::extract::{FromRequest, FromRequestParts};
use uuid::Uuid;

use crate::error::AppError;

/// `axum::Json` whose rejections render as `{"error": ...}`.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// `axum::extract::Query` whose rejections render as `{"error": ...}`.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct ApiQuery<T>(pub T);

/// Parses a path id, reporting anything that is not a UUID as `not_found`.
pub fn parse_id(raw: &str, not_found: impl FnOnce() -> AppError) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| not_found())
}
