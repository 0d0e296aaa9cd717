//! Model weight serialization via Burn's named MessagePack recorder.

use std::path::Path;

use burn::module::Module;
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};

use crate::error::XrayError;

/// Save a module's weights to a checkpoint file.
pub fn save_model<B, M>(model: &M, path: &Path) -> Result<(), XrayError>
where
    B: Backend,
    M: Module<B>,
{
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(path.to_path_buf(), &recorder)
        .map_err(|e| XrayError::Configuration(format!("failed to save checkpoint: {}", e)))
}

/// Load a checkpoint into a freshly-initialized module.
///
/// A missing or structurally incompatible checkpoint is a configuration
/// error: the process has nothing sensible to run inference with.
pub fn load_model<B, M>(model: M, path: &Path, device: &B::Device) -> Result<M, XrayError>
where
    B: Backend,
    M: Module<B>,
{
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    model
        .load_file(path.to_path_buf(), &recorder, device)
        .map_err(|e| {
            XrayError::Configuration(format!("failed to load checkpoint {:?}: {}", path, e))
        })
}
