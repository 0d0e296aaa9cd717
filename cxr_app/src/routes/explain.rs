use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Serialize;
use tracing::instrument;

use super::{resolve_upload, ApiError};
use crate::server::SharedState;
use cxr_explain::{explain_gradient, explain_perturbation, CancelToken, Progress};
use cxr_inference::XrayError;

#[derive(Serialize)]
pub struct ExplainResponse {
    pub artifact: String,
    pub class_index: usize,
}

/// Run the perturbation explainer on a blocking worker. When the configured
/// timeout fires the worker is cancelled and the request fails with 408.
#[instrument(skip(state))]
pub async fn explain_lime(
    State(state): State<SharedState>,
    Path(filename): Path<String>,
) -> Result<Json<ExplainResponse>, ApiError> {
    let image_path = resolve_upload(&state, &filename)?;
    let handles = state.registry.handles()?;
    let opts = state.explain.lime_options();
    let output_dir = state.storage.lime_output_dir.clone();

    let cancel = CancelToken::new();
    let worker_cancel = cancel.clone();
    // Cancels the worker if this future is dropped or errors out before
    // completion; disarmed only once the worker has finished.
    let guard = cancel.drop_guard();

    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel::<Progress>();
    tokio::spawn(async move {
        while let Some(p) = progress_rx.recv().await {
            tracing::debug!(completed = p.completed, total = p.total, "perturbation progress");
        }
    });

    let worker = tokio::task::spawn_blocking(move || {
        explain_perturbation(
            &handles,
            &image_path,
            &output_dir,
            &opts,
            &worker_cancel,
            |p| {
                let _ = progress_tx.send(p);
            },
        )
    });

    let explanation = match tokio::time::timeout(state.explain.timeout(), worker).await {
        Ok(joined) => joined
            .map_err(|e| XrayError::Explanation(format!("perturbation worker failed: {}", e)))??,
        Err(_) => {
            // The guard's drop flags the worker, which stops at its next
            // batch boundary.
            return Err(ApiError::Pipeline(XrayError::Cancelled));
        }
    };

    guard.disarm();
    Ok(Json(ExplainResponse {
        artifact: explanation.artifact.display().to_string(),
        class_index: explanation.class_index,
    }))
}

/// Run the gradient explainer on a blocking worker.
#[instrument(skip(state))]
pub async fn explain_gradcam(
    State(state): State<SharedState>,
    Path(filename): Path<String>,
) -> Result<Json<ExplainResponse>, ApiError> {
    let image_path = resolve_upload(&state, &filename)?;
    let handles = state.registry.handles()?;
    let opts = state.explain.gradcam_options();
    let output_dir = state.storage.gradcam_output_dir.clone();

    let explanation = tokio::task::spawn_blocking(move || {
        explain_gradient(&handles, &image_path, &output_dir, &opts)
    })
    .await
    .map_err(|e| XrayError::Computation(format!("gradient worker failed: {}", e)))??;

    Ok(Json(ExplainResponse {
        artifact: explanation.artifact.display().to_string(),
        class_index: explanation.class_index,
    }))
}
