use axum::{
    body::Bytes,
    extract::{Path, State},
    response::Json,
};
use serde::Serialize;
use tracing::instrument;

use super::{sanitize_filename, ApiError};
use crate::server::SharedState;
use cxr_inference::XrayError;

#[derive(Serialize)]
pub struct UploadResponse {
    pub path: String,
}

/// Persist raw image bytes under the upload directory. Re-uploading the same
/// filename overwrites the previous bytes.
#[instrument(skip(state, body))]
pub async fn upload_image(
    State(state): State<SharedState>,
    Path(filename): Path<String>,
    body: Bytes,
) -> Result<Json<UploadResponse>, ApiError> {
    let name = sanitize_filename(&filename)?.to_string();

    tokio::fs::create_dir_all(&state.storage.upload_dir)
        .await
        .map_err(XrayError::from)?;

    let path = state.storage.upload_dir.join(name);
    tokio::fs::write(&path, &body)
        .await
        .map_err(XrayError::from)?;

    tracing::info!(path = %path.display(), bytes = body.len(), "upload stored");

    Ok(Json(UploadResponse {
        path: path.display().to_string(),
    }))
}
