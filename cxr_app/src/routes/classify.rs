use axum::{
    extract::{Path, State},
    response::Json,
};
use tracing::instrument;

use super::{resolve_upload, ApiError};
use crate::server::SharedState;
use cxr_inference::{classify, Prediction, XrayError};

/// Classify a previously uploaded image.
#[instrument(skip(state))]
pub async fn classify_image(
    State(state): State<SharedState>,
    Path(filename): Path<String>,
) -> Result<Json<Prediction>, ApiError> {
    let image_path = resolve_upload(&state, &filename)?;
    let handles = state.registry.handles()?;

    let prediction = tokio::task::spawn_blocking(move || classify(&handles, &image_path))
        .await
        .map_err(|e| XrayError::Computation(format!("classification task failed: {}", e)))??;

    Ok(Json(prediction))
}
