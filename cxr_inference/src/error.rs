use thiserror::Error;

/// Unified error taxonomy for the whole pipeline.
///
/// Every stage returns this type; the HTTP boundary catches it exactly once
/// and maps each kind to a status code.
#[derive(Error, Debug)]
pub enum XrayError {
    /// The image bytes could not be decoded.
    #[error("failed to decode image: {0}")]
    Decoding(#[from] image::ImageError),

    /// The model does not have the structure a stage expects, e.g. no
    /// convolutional block, or an output width that does not match the
    /// label vocabulary.
    #[error("model configuration error: {0}")]
    Configuration(String),

    /// A computation produced a degenerate numeric result, e.g. a
    /// uniformly-zero heat map.
    #[error("computation error: {0}")]
    Computation(String),

    /// The explainability pipeline failed, e.g. segmentation produced zero
    /// regions or the surrogate fit did not converge.
    #[error("explanation error: {0}")]
    Explanation(String),

    /// Filesystem failure while persisting an upload or artifact.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation was cancelled before it completed.
    #[error("operation was cancelled")]
    Cancelled,
}
