//! Inference core for the chest X-ray diagnosis service: error taxonomy,
//! class labels, image preprocessing, the convolutional classifier model and
//! the process-wide model registry.

pub mod checkpoint;
pub mod classifier;
pub mod error;
pub mod labels;
pub mod model;
pub mod preprocess;
pub mod registry;

pub use burn;

pub use classifier::{classify, Prediction};
pub use error::XrayError;
pub use labels::ClassLabels;
pub use model::{XrayCnn, XrayCnnConfig};
pub use preprocess::{tensor_from_batch, Normalization, Preprocessor};
pub use registry::{ModelHandles, ModelRegistry, ModelSpec};

/// CPU backend used for plain forward inference.
pub type CpuBackend = burn::backend::NdArray;

/// Autodiff-enabled CPU backend used by the gradient explainer.
pub type AutodiffCpuBackend = burn::backend::Autodiff<CpuBackend>;

/// The device every model instance is placed on.
pub fn default_device() -> <CpuBackend as burn::tensor::backend::Backend>::Device {
    Default::default()
}
