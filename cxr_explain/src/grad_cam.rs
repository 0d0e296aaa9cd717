//! Gradient-based explanation (Grad-CAM-style).
//!
//! One forward pass capturing the last convolutional feature map, one
//! backward pass from the top class's logit, gradients pooled over the
//! spatial dimensions into per-channel weights, and the weighted feature map
//! rendered as a jet heat map blended over the original image.

use std::path::{Path, PathBuf};

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use ndarray::Array2;

use cxr_inference::{
    default_device, tensor_from_batch, AutodiffCpuBackend, ModelHandles, XrayCnn, XrayError,
};

use crate::render::{artifact_path, blend_heat_map, colorize_heat_map, save_artifact};

/// Tuning knobs for the gradient explainer.
#[derive(Debug, Clone, Copy)]
pub struct GradCamOptions {
    /// Opacity of the heat map over the original image.
    pub alpha: f32,
}

impl Default for GradCamOptions {
    fn default() -> Self {
        Self { alpha: 0.4 }
    }
}

/// Result of a gradient explanation run.
#[derive(Debug, Clone)]
pub struct GradCamExplanation {
    /// Path of the saved heat-map overlay.
    pub artifact: PathBuf,
    /// Model output index the explanation is for (the top predicted class).
    pub class_index: usize,
}

/// Explain the image at `image_path`, writing the overlay under
/// `output_dir`. The heat map is rescaled to the original image's
/// resolution before blending.
pub fn explain_gradient(
    handles: &ModelHandles,
    image_path: &Path,
    output_dir: &Path,
    opts: &GradCamOptions,
) -> Result<GradCamExplanation, XrayError> {
    let img = handles.preprocessor.decode_path(image_path)?;
    let original = img.to_rgb8();
    let resized = handles.preprocessor.resize(&img);
    let input = handles.preprocessor.to_array(&resized);

    let device = default_device();
    let x = tensor_from_batch::<AutodiffCpuBackend>(input, &device);

    let (heat, class_index) = {
        let model = handles
            .autodiff
            .lock()
            .map_err(|_| XrayError::Computation("autodiff model lock poisoned".into()))?;
        compute_cam(&model, x)?
    };

    let overlay = blend_heat_map(&original, &colorize_heat_map(&heat), opts.alpha);

    let artifact = artifact_path(output_dir, image_path, "gradcam");
    save_artifact(&overlay, &artifact)?;

    tracing::info!(
        artifact = %artifact.display(),
        class_index,
        "gradient explanation complete"
    );

    Ok(GradCamExplanation {
        artifact,
        class_index,
    })
}

/// Compute the normalized class-activation map for the top predicted class.
///
/// Fails with [`XrayError::Configuration`] when the model has no
/// convolutional feature map to attribute to.
pub fn compute_cam<B: AutodiffBackend>(
    model: &XrayCnn<B>,
    input: Tensor<B, 4>,
) -> Result<(Array2<f32>, usize), XrayError> {
    if !model.has_conv_features() {
        return Err(XrayError::Configuration(
            "model has no convolutional feature map to explain".into(),
        ));
    }

    // Cut the graph at the feature map so the backward pass attributes the
    // class score to it directly.
    let features = model.features(input).detach().require_grad();
    let logits = model.head(features.clone());

    let class_index: i64 = logits.clone().inner().argmax(1).into_scalar().elem();
    let class_index = class_index as usize;

    let score = logits
        .slice([0..1, class_index..class_index + 1])
        .sum();
    let grads = score.backward();
    let gradients = features.grad(&grads).ok_or_else(|| {
        XrayError::Computation("no gradient reached the feature map".into())
    })?;

    let heat = weighted_cam(features.inner(), gradients)?;
    Ok((heat, class_index))
}

/// Pool gradients into per-channel weights, weight the activations, clip
/// negatives and normalize to [0, 1].
///
/// A uniformly-zero map is a degenerate result and fails with
/// [`XrayError::Computation`] instead of propagating NaN pixels.
pub fn weighted_cam<B: Backend>(
    activations: Tensor<B, 4>,
    gradients: Tensor<B, 4>,
) -> Result<Array2<f32>, XrayError> {
    // Global average pool the gradients: (1, C, h, w) -> (1, C, 1, 1).
    let weights = gradients.mean_dim(3).mean_dim(2);

    // Weighted channel sum with negative contributions clipped.
    let cam = (activations * weights).sum_dim(1).clamp_min(0.0);

    let max: f32 = cam.clone().max().into_scalar().elem();
    if !max.is_finite() || max <= 0.0 {
        return Err(XrayError::Computation(
            "class-activation map is uniformly zero".into(),
        ));
    }

    let cam = cam / max;
    let [_, _, h, w] = cam.dims();
    let data: Vec<f32> = cam
        .into_data()
        .to_vec()
        .map_err(|e| XrayError::Computation(format!("failed to read heat map: {:?}", e)))?;

    Array2::from_shape_vec((h, w), data)
        .map_err(|e| XrayError::Computation(format!("heat map has invalid shape: {}", e)))
}
