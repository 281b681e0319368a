use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use parley_types::error::ChatError;

/// REST-facing wrapper mapping the shared taxonomy onto status codes.
/// Internal errors are logged here and never leak details to the client.
pub struct ApiError(pub ChatError);

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        Self(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(ChatError::Internal(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            ChatError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": ChatError::InvalidCredentials.to_string() })),
            )
                .into_response(),

            ChatError::RateLimited(remaining_secs) => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "error": ChatError::RateLimited(remaining_secs).to_string(),
                    "retry_after": remaining_secs,
                })),
            )
                .into_response(),

            ChatError::UsernameTaken => (
                StatusCode::CONFLICT,
                Json(json!({ "error": ChatError::UsernameTaken.to_string() })),
            )
                .into_response(),

            ChatError::UploadRejected(reason) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("upload rejected: {reason}") })),
            )
                .into_response(),

            ChatError::DecryptionFailure => {
                // History replay skips these per-row; reaching here means a
                // caller misused the taxonomy, but answer safely anyway.
                error!("decryption failure surfaced to the REST layer");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }

            ChatError::Internal(e) => {
                error!("internal error: {:#}", e);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}
