//! Perturbation-based explanation (LIME-style).
//!
//! Segment the resized image into superpixels, toggle random subsets of them
//! off, run the classifier over every perturbed sample, fit a weighted
//! linear surrogate for the top class's probability, and draw the boundaries
//! of the most positively-weighted superpixels on the resized input.
//!
//! This is by far the most expensive stage (hundreds of forward passes), so
//! it cooperates with a [`CancelToken`] between batches and reports progress
//! to the caller.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use ndarray::{Array, Array2, Ix4};
use rand::{rngs::StdRng, Rng, SeedableRng};

use cxr_inference::{default_device, tensor_from_batch, CpuBackend, ModelHandles, XrayError};

use crate::render::{artifact_path, draw_boundaries, save_artifact};
use crate::segmentation::{slic, SegmentationMap};
use crate::surrogate::fit_weighted_ridge;
use crate::{CancelToken, Progress};

/// Iterations of the superpixel k-means refinement.
const SEGMENTATION_ITERS: usize = 10;

/// Tuning knobs for the perturbation explainer.
#[derive(Debug, Clone)]
pub struct LimeOptions {
    /// Number of perturbed samples (sample 0 is always the unperturbed mask).
    pub num_samples: usize,
    /// How many top superpixels to highlight.
    pub num_features: usize,
    /// Samples per forward pass.
    pub batch_size: usize,
    /// Target superpixel cell size in pixels.
    pub cell_size: u32,
    /// Width of the exponential sample-weight kernel.
    pub kernel_width: f64,
    /// L2 penalty of the surrogate fit.
    pub ridge_lambda: f64,
    /// RNG seed, fixed so repeated runs reproduce the same overlay.
    pub seed: u64,
}

impl Default for LimeOptions {
    fn default() -> Self {
        Self {
            num_samples: 1000,
            num_features: 5,
            batch_size: 16,
            cell_size: 32,
            kernel_width: 0.25,
            ridge_lambda: 1.0,
            seed: 42,
        }
    }
}

/// Result of a perturbation run.
#[derive(Debug, Clone)]
pub struct LimeExplanation {
    /// Path of the saved boundary overlay.
    pub artifact: PathBuf,
    /// Model output index the explanation is for (the top predicted class).
    pub class_index: usize,
    /// The highlighted superpixels, most important first.
    pub top_segments: Vec<usize>,
}

/// Explain the image at `image_path`, writing the overlay under
/// `output_dir`.
pub fn explain_perturbation(
    handles: &ModelHandles,
    image_path: &Path,
    output_dir: &Path,
    opts: &LimeOptions,
    cancel: &CancelToken,
    mut progress: impl FnMut(Progress),
) -> Result<LimeExplanation, XrayError> {
    let img = handles.preprocessor.decode_path(image_path)?;
    let resized = handles.preprocessor.resize(&img);
    let rgb = resized.to_rgb8();

    let segments = slic(&rgb, opts.cell_size, SEGMENTATION_ITERS)?;
    let n_segments = segments.n_segments();

    let base = handles.preprocessor.to_array(&resized);
    let norm = *handles.preprocessor.normalization();
    let hidden = [
        norm.hidden_value(0),
        norm.hidden_value(1),
        norm.hidden_value(2),
    ];

    let masks = sample_masks(n_segments, opts.num_samples.max(1), opts.seed);
    let probs = perturbed_probabilities(
        handles,
        &base,
        &hidden,
        &segments,
        &masks,
        opts.batch_size.max(1),
        cancel,
        &mut progress,
    )?;

    // The class to explain is the model's top prediction on the unperturbed
    // sample.
    let class_index = probs[0]
        .iter()
        .copied()
        .enumerate()
        .reduce(|acc, item| if item.1 > acc.1 { item } else { acc })
        .map(|(i, _)| i)
        .ok_or_else(|| XrayError::Computation("model produced an empty output".into()))?;

    let x = design_matrix(&masks);
    let y: Vec<f64> = probs.iter().map(|row| row[class_index] as f64).collect();
    let weights = kernel_weights(&masks, n_segments, opts.kernel_width);

    let coefs = fit_weighted_ridge(&x, &y, &weights, opts.ridge_lambda)?;

    let mut ranked: Vec<(usize, f64)> = coefs.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    let top_segments: Vec<usize> = ranked
        .into_iter()
        .take(opts.num_features)
        .filter(|&(_, coef)| coef > 0.0)
        .map(|(i, _)| i)
        .collect();

    let selected: HashSet<usize> = top_segments.iter().copied().collect();
    let overlay = draw_boundaries(&rgb, &segments, &selected);

    let artifact = artifact_path(output_dir, image_path, "lime");
    save_artifact(&overlay, &artifact)?;

    tracing::info!(
        artifact = %artifact.display(),
        class_index,
        segments = n_segments,
        highlighted = top_segments.len(),
        "perturbation explanation complete"
    );

    Ok(LimeExplanation {
        artifact,
        class_index,
        top_segments,
    })
}

/// Random presence masks. Sample 0 keeps every superpixel visible so the
/// explained class comes from the unperturbed prediction.
fn sample_masks(n_segments: usize, num_samples: usize, seed: u64) -> Vec<Vec<bool>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut masks = Vec::with_capacity(num_samples);
    masks.push(vec![true; n_segments]);
    for _ in 1..num_samples {
        masks.push((0..n_segments).map(|_| rng.random::<f32>() < 0.5).collect());
    }
    masks
}

/// Class probabilities for every perturbed sample, computed in batches with
/// cancellation checks in between.
#[allow(clippy::too_many_arguments)]
fn perturbed_probabilities(
    handles: &ModelHandles,
    base: &Array<f32, Ix4>,
    hidden: &[f32; 3],
    segments: &SegmentationMap,
    masks: &[Vec<bool>],
    batch_size: usize,
    cancel: &CancelToken,
    progress: &mut impl FnMut(Progress),
) -> Result<Vec<Vec<f32>>, XrayError> {
    let size = handles.preprocessor.input_size() as usize;
    let total = masks.len();
    let device = default_device();

    let mut probs: Vec<Vec<f32>> = Vec::with_capacity(total);
    for chunk in masks.chunks(batch_size) {
        if cancel.is_cancelled() {
            return Err(XrayError::Cancelled);
        }

        let mut batch = Array::zeros((chunk.len(), 3, size, size));
        for (row, mask) in chunk.iter().enumerate() {
            for y in 0..size {
                for x in 0..size {
                    let visible = mask[segments.label_at(x as u32, y as u32)];
                    for c in 0..3 {
                        batch[[row, c, y, x]] = if visible {
                            base[[0, c, y, x]]
                        } else {
                            hidden[c]
                        };
                    }
                }
            }
        }

        let tensor = tensor_from_batch::<CpuBackend>(batch, &device);
        let output = {
            let model = handles
                .inference
                .lock()
                .map_err(|_| XrayError::Computation("inference model lock poisoned".into()))?;
            model.forward_probs(tensor)
        };

        let [rows, n_classes] = output.dims();
        let flat: Vec<f32> = output.into_data().to_vec().map_err(|e| {
            XrayError::Computation(format!("failed to read probabilities: {:?}", e))
        })?;
        for row in 0..rows {
            probs.push(flat[row * n_classes..(row + 1) * n_classes].to_vec());
        }

        progress(Progress {
            completed: probs.len(),
            total,
        });
    }

    Ok(probs)
}

fn design_matrix(masks: &[Vec<bool>]) -> Array2<f64> {
    let n = masks.len();
    let k = masks.first().map(|m| m.len()).unwrap_or(0);
    Array2::from_shape_fn((n, k), |(i, j)| if masks[i][j] { 1.0 } else { 0.0 })
}

/// Exponential kernel over the cosine distance between a mask and the
/// unperturbed (all-ones) mask.
fn kernel_weights(masks: &[Vec<bool>], n_segments: usize, kernel_width: f64) -> Vec<f64> {
    masks
        .iter()
        .map(|mask| {
            let on = mask.iter().filter(|&&m| m).count() as f64;
            let cos = (on / n_segments as f64).sqrt();
            let d = 1.0 - cos;
            (-d * d / (kernel_width * kernel_width)).exp()
        })
        .collect()
}
