mod classify;
mod explain;
mod health;
mod upload;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

use crate::server::SharedState;
use cxr_inference::XrayError;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health::healthcheck))
        .route("/upload/{filename}", post(upload::upload_image))
        .route("/classify/{filename}", post(classify::classify_image))
        .route("/explain/lime/{filename}", post(explain::explain_lime))
        .route("/explain/gradcam/{filename}", post(explain::explain_gradcam))
}

/// The single point where pipeline errors become HTTP responses.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid filename: {0}")]
    InvalidFilename(String),
    #[error(transparent)]
    Pipeline(#[from] XrayError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidFilename(_) => StatusCode::BAD_REQUEST,
            ApiError::Pipeline(XrayError::Decoding(_)) => StatusCode::BAD_REQUEST,
            ApiError::Pipeline(XrayError::Cancelled) => StatusCode::REQUEST_TIMEOUT,
            ApiError::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        tracing::error!(status = %status, "request failed: {}", self);

        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Path of a previously uploaded image.
fn resolve_upload(state: &SharedState, filename: &str) -> Result<PathBuf, ApiError> {
    Ok(state.storage.upload_dir.join(sanitize_filename(filename)?))
}

/// Reject names that could escape the upload directory. A bare file name is
/// exactly one normal path component, so `scan..png` stays legal while `..`,
/// separators, and absolute paths are refused.
fn sanitize_filename(filename: &str) -> Result<&str, ApiError> {
    let mut components = Path::new(filename).components();
    let single_normal = matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none();
    if !single_normal || filename.contains('\\') {
        return Err(ApiError::InvalidFilename(filename.to_string()));
    }
    Ok(filename)
}
