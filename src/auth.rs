//! API token check for destructive operations.
//!
//! A node started without a token refuses every protected call.

use axum::http::HeaderMap;

use crate::client::protocol::API_TOKEN_HEADER;
use crate::error::{ApiError, ApiResult};

pub fn require_api_token(headers: &HeaderMap, configured: Option<&str>) -> ApiResult<()> {
    let Some(expected) = configured else {
        return Err(ApiError::Unauthorized(
            "Server not configured with API token.".to_string(),
        ));
    };

    let provided = headers
        .get(API_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok());
    if provided != Some(expected) {
        return Err(ApiError::Unauthorized("Invalid API token.".to_string()));
    }
    Ok(())
}
