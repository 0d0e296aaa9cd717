//! Process-wide model registry.
//!
//! Weights are loaded at most once and shared read-only across all calls.
//! The registry holds two instances of the same weights: one on the plain
//! CPU backend for forward-only stages (classifier, perturbation explainer)
//! and one on the autodiff backend for the gradient explainer. Each instance
//! sits behind a mutex; requests serialize on it.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use burn::module::AutodiffModule;

use crate::checkpoint::load_model;
use crate::error::XrayError;
use crate::labels::ClassLabels;
use crate::model::{XrayCnn, XrayCnnConfig};
use crate::preprocess::{Normalization, Preprocessor};
use crate::{default_device, AutodiffCpuBackend, CpuBackend};

/// Everything needed to load the model once.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub checkpoint: PathBuf,
    pub labels_file: PathBuf,
    pub input_size: u32,
    pub normalization: Normalization,
    pub conv_channels: Vec<usize>,
}

/// Shared, read-only handles produced by one successful load.
#[derive(Debug)]
pub struct ModelHandles {
    pub inference: Mutex<XrayCnn<CpuBackend>>,
    pub autodiff: Mutex<XrayCnn<AutodiffCpuBackend>>,
    pub labels: ClassLabels,
    pub preprocessor: Preprocessor,
}

/// Lazily-initialized registry of model handles.
///
/// The first call that needs the model loads it; later calls share the same
/// handles. A failed load is not cached, so the next call retries.
pub struct ModelRegistry {
    spec: ModelSpec,
    handles: Mutex<Option<Arc<ModelHandles>>>,
}

impl ModelRegistry {
    pub fn new(spec: ModelSpec) -> Self {
        Self {
            spec,
            handles: Mutex::new(None),
        }
    }

    /// Get the shared model handles, loading the checkpoint on first use.
    pub fn handles(&self) -> Result<Arc<ModelHandles>, XrayError> {
        let mut guard = self
            .handles
            .lock()
            .map_err(|_| XrayError::Computation("model registry lock poisoned".into()))?;

        if let Some(handles) = guard.as_ref() {
            return Ok(handles.clone());
        }

        let handles = Arc::new(self.load()?);
        *guard = Some(handles.clone());
        Ok(handles)
    }

    fn load(&self) -> Result<ModelHandles, XrayError> {
        let labels = ClassLabels::from_file(&self.spec.labels_file)?;

        let config = XrayCnnConfig::new(self.spec.input_size as usize, labels.len())
            .with_conv_channels(self.spec.conv_channels.clone());

        let device = default_device();
        let autodiff: XrayCnn<AutodiffCpuBackend> = config.init(&device);
        let autodiff = load_model(autodiff, &self.spec.checkpoint, &device)?;

        // The label-index-to-name mapping is a positional contract with the
        // checkpoint; verify it instead of assuming.
        labels.validate_width(autodiff.output_width())?;

        let inference = autodiff.valid();

        tracing::info!(
            checkpoint = ?self.spec.checkpoint,
            classes = labels.len(),
            input_size = self.spec.input_size,
            "model loaded"
        );

        Ok(ModelHandles {
            inference: Mutex::new(inference),
            autodiff: Mutex::new(autodiff),
            labels,
            preprocessor: Preprocessor::new(self.spec.input_size, self.spec.normalization),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::save_model;
    use std::io::Write;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("cxr_registry_{}_{}", std::process::id(), name));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_labels(dir: &PathBuf, labels: &[&str]) -> PathBuf {
        let path = dir.join("labels.txt");
        let mut file = std::fs::File::create(&path).unwrap();
        for label in labels {
            writeln!(file, "{}", label).unwrap();
        }
        path
    }

    fn write_checkpoint(dir: &PathBuf, n_classes: usize) -> PathBuf {
        let device = default_device();
        let config = XrayCnnConfig::new(32, n_classes).with_conv_channels(vec![4]);
        let model = config.init::<AutodiffCpuBackend>(&device);
        let path = dir.join("model.mpk");
        save_model(&model, &path).unwrap();
        path
    }

    fn spec(checkpoint: PathBuf, labels_file: PathBuf) -> ModelSpec {
        ModelSpec {
            checkpoint,
            labels_file,
            input_size: 32,
            normalization: Normalization::default(),
            conv_channels: vec![4],
        }
    }

    #[test]
    fn test_lazy_load_shares_handles() {
        let dir = temp_dir("shared");
        let labels_file = write_labels(&dir, &["Covid19", "Normal", "Pneumonia", "Tuberculosis"]);
        let checkpoint = write_checkpoint(&dir, 4);

        let registry = ModelRegistry::new(spec(checkpoint, labels_file));
        let first = registry.handles().unwrap();
        let second = registry.handles().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_width_mismatch_is_configuration_error() {
        let dir = temp_dir("mismatch");
        // Three labels against a four-class checkpoint: the positional
        // contract is broken and loading must refuse.
        let labels_file = write_labels(&dir, &["Covid19", "Normal", "Pneumonia"]);

        let device = default_device();
        let config = XrayCnnConfig::new(32, 4).with_conv_channels(vec![4]);
        let model = config.init::<AutodiffCpuBackend>(&device);
        let checkpoint = dir.join("model.mpk");
        save_model(&model, &checkpoint).unwrap();

        let registry = ModelRegistry::new(spec(checkpoint, labels_file));
        let err = registry.handles().unwrap_err();
        assert!(matches!(err, XrayError::Configuration(_)));

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_missing_checkpoint_retries() {
        let dir = temp_dir("retry");
        let labels_file = write_labels(&dir, &["Covid19", "Normal", "Pneumonia", "Tuberculosis"]);

        let registry = ModelRegistry::new(spec(dir.join("missing.mpk"), labels_file));
        assert!(registry.handles().is_err());

        // A failed load is not cached; once the checkpoint appears the next
        // call succeeds.
        write_checkpoint(&dir, 4);
        let renamed = dir.join("model.mpk");
        std::fs::rename(&renamed, dir.join("missing.mpk")).unwrap();
        assert!(registry.handles().is_ok());

        std::fs::remove_dir_all(dir).ok();
    }
}
