//! Error types for the segmentation core

use std::path::PathBuf;
use thiserror::Error;

/// Failure reported by an [`InferenceBackend`](super::InferenceBackend).
///
/// The engine wraps this once in [`SegmentationError::Backend`] and never
/// inspects or retries it.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("model {name} unavailable at {}: {reason}", path.display())]
    ModelUnavailable {
        name: String,
        path: PathBuf,
        reason: String,
    },

    #[error("invalid backend configuration: {0}")]
    InvalidConfig(String),

    #[error("model {model} has no input tensors")]
    MissingInput { model: String },

    #[error("model {model} produced no output at index {index}")]
    MissingOutput { model: String, index: usize },

    #[error("model {model} produced output of shape {shape:?}, expected {expected}")]
    UnexpectedShape {
        model: String,
        shape: Vec<usize>,
        expected: &'static str,
    },

    #[error("failed to download model {name} from {url}: {reason}")]
    Download {
        name: String,
        url: String,
        reason: String,
    },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("session for {0} is poisoned")]
    Poisoned(String),

    #[error("ONNX Runtime error: {0}")]
    Ort(#[from] ort::Error),
}

/// Errors raised by `encode` / `predict_masks`.
#[derive(Error, Debug)]
pub enum SegmentationError {
    #[error("degenerate {context} size {width}x{height}")]
    DegenerateSize {
        context: &'static str,
        height: u32,
        width: u32,
    },

    #[error("unsupported image of shape {shape:?}: {reason}")]
    UnsupportedImage {
        shape: Vec<usize>,
        reason: &'static str,
    },

    #[error("transform matrix is singular (determinant {determinant:e})")]
    SingularMatrix { determinant: f64 },

    #[error("prompt entry {index} has unrecognized type {type_name:?}")]
    UnrecognizedPromptType { index: usize, type_name: String },

    #[error("prompt entry {index} is malformed: {reason}")]
    MalformedPrompt { index: usize, reason: String },

    #[error("prompt is not a JSON array of annotations: {0}")]
    InvalidPromptJson(#[from] serde_json::Error),

    #[error("invalid embedding bundle: {0}")]
    InvalidBundle(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type Result<T, E = SegmentationError> = std::result::Result<T, E>;
