mod backend;
pub mod config;
mod download;
mod engine;
mod error;
mod onnx;
mod preprocess;
pub mod prompt;
pub mod transform;
pub mod types;

pub use backend::{InferenceBackend, NamedTensors};
pub use download::direct_download_url;
pub use config::{BackendConfig, EngineConfig, ModelSource, RescaleReference};
pub use engine::{decoder_inputs, SegmentationEngine};
pub use error::{BackendError, Result, SegmentationError};
pub use onnx::{OrtBackend, OrtSession};
pub use preprocess::Preprocessor;
pub use prompt::{encode_prompt, Annotation, EncodedPrompt, Prompt};
pub use transform::TransformMatrix;
pub use types::{EmbeddingBundle, ImageSize, Masks, CANVAS_SIZE, LONG_SIDE_LENGTH};

/// Create an engine over ONNX Runtime with the default quantized ViT-L models
pub fn create_default_engine(backend_config: BackendConfig) -> Result<SegmentationEngine<OrtBackend>> {
    let backend = OrtBackend::new(backend_config)?;
    SegmentationEngine::new(backend, EngineConfig::default())
}
