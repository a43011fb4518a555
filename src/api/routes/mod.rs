//! API Routes
//!
//! Route handlers organized by functionality.

pub mod command;
pub mod health;
pub mod status;

use axum::http::Uri;

use crate::api::ApiError;

/// Fallback for paths no route matches
pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(uri.path().to_string())
}
