//! Common API handler utilities.

use axum::response::Json;

use crate::models::{common::ApiResponse, error::ErrorResponse};

/// Result type for all API handlers. The success value is wrapped in
/// [`ApiResponse`].
pub type HandlerResult<T> = Result<Json<ApiResponse<T>>, ErrorResponse>;

/// Placeholder shown for a device that cannot currently be read.
pub const UNAVAILABLE: &str = "N/A";

/// Create a successful response with data.
pub fn ok<T: serde::Serialize>(data: T) -> HandlerResult<T> {
    Ok(Json(ApiResponse::success(data)))
}

/// Parse a path segment, mapping failure to a 400.
pub fn extract_path<T>(value: &str, what: &str) -> Result<T, ErrorResponse>
where
    T: std::str::FromStr,
{
    value
        .parse::<T>()
        .map_err(|_| ErrorResponse::bad_request(format!("Invalid {}: {}", what, value)))
}
