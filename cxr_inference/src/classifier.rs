//! Disease classification: one forward pass over an uploaded image.

use std::path::Path;

use serde::Serialize;

use crate::error::XrayError;
use crate::preprocess::tensor_from_batch;
use crate::registry::ModelHandles;
use crate::{default_device, CpuBackend};

/// An immutable classification result. Confidence is a percentage in
/// [0, 100].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
}

/// Classify the image at `path`.
///
/// Decode -> resize -> normalize -> forward -> softmax -> argmax -> label.
/// The argmax index is guarded against the label vocabulary width so a
/// mismatched checkpoint can never silently mis-label.
pub fn classify(handles: &ModelHandles, path: &Path) -> Result<Prediction, XrayError> {
    let img = handles.preprocessor.decode_path(path)?;
    let resized = handles.preprocessor.resize(&img);
    let input = handles.preprocessor.to_array(&resized);

    let device = default_device();
    let x = tensor_from_batch::<CpuBackend>(input, &device);

    let probs = {
        let model = handles
            .inference
            .lock()
            .map_err(|_| XrayError::Computation("inference model lock poisoned".into()))?;
        model.forward_probs(x)
    };

    let probs: Vec<f32> = probs
        .into_data()
        .to_vec()
        .map_err(|e| XrayError::Computation(format!("failed to read probabilities: {:?}", e)))?;

    let (index, max) = probs
        .iter()
        .copied()
        .enumerate()
        .reduce(|acc, item| if item.1 > acc.1 { item } else { acc })
        .ok_or_else(|| XrayError::Computation("model produced an empty output".into()))?;

    let label = handles.labels.get(index).ok_or_else(|| {
        XrayError::Configuration(format!(
            "predicted index {} is outside the label vocabulary",
            index
        ))
    })?;

    tracing::debug!(label, confidence = max, "classified image");

    Ok(Prediction {
        label: label.to_string(),
        confidence: max * 100.0,
    })
}
