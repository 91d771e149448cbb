//! Configuration for the ONNX backend and the segmentation engine

use std::path::{Path, PathBuf};

pub const DEFAULT_ENCODER_MODEL: &str = "sam_vit_l_0b3195.encoder.quant.onnx";
pub const DEFAULT_DECODER_MODEL: &str = "sam_vit_l_0b3195.decoder.quant.onnx";

/// Where a model file can be obtained when it is missing locally
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSource {
    pub file_name: String,
    pub url: String,
}

impl ModelSource {
    pub fn new(file_name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            url: url.into(),
        }
    }
}

/// ONNX Runtime backend configuration
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Directory model file names are resolved against
    pub model_dir: PathBuf,
    /// Intra-op threads per session
    pub intra_threads: usize,
    /// Graph optimization level, 0 (disabled) to 3
    pub optimization_level: u8,
    /// Known download locations for missing models
    pub model_sources: Vec<ModelSource>,
    /// Fetch a missing model from its source URL before loading it
    pub download_missing: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("data"),
            intra_threads: 4,
            optimization_level: 3,
            model_sources: vec![
                ModelSource::new(
                    DEFAULT_ENCODER_MODEL,
                    "https://drive.google.com/file/d/1cxFVincc2-Yi1WACbC46l9vF4rJoilq5/view?usp=drive_link",
                ),
                ModelSource::new(
                    DEFAULT_DECODER_MODEL,
                    "https://drive.google.com/file/d/1xIx_jKftt8P4HEzNyKlm3S2Z-9pPdu9C/view?usp=drive_link",
                ),
            ],
            download_missing: true,
        }
    }
}

impl BackendConfig {
    pub fn with_model_dir(model_dir: impl AsRef<Path>) -> Self {
        Self {
            model_dir: model_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.intra_threads == 0 {
            return Err("Intra-op thread count must be at least 1".to_string());
        }

        if self.optimization_level > 3 {
            return Err(format!(
                "Optimization level must be between 0 and 3, got {}",
                self.optimization_level
            ));
        }

        if let Some(source) = self.model_sources.iter().find(|s| s.file_name.is_empty()) {
            return Err(format!("Model source {} has an empty file name", source.url));
        }

        Ok(())
    }

    /// Resolve a model name to a path under `model_dir`
    pub fn model_path(&self, name: &str) -> PathBuf {
        self.model_dir.join(name)
    }

    /// Download location for `name`, matched on the file name
    pub fn source_url(&self, name: &str) -> Option<&str> {
        let file_name = Path::new(name).file_name()?.to_str()?;
        self.model_sources
            .iter()
            .find(|s| s.file_name == file_name)
            .map(|s| s.url.as_str())
    }
}

/// Reference size for the long-side rescale applied to prompt points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RescaleReference {
    /// Rescale from the original image size
    #[default]
    OriginalSize,
    /// Rescale from the canvas size. With a 1024-wide canvas this is the
    /// identity.
    CanvasSize,
}

/// Segmentation engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub encoder_model: String,
    pub decoder_model: String,
    pub point_rescale: RescaleReference,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            encoder_model: DEFAULT_ENCODER_MODEL.to_string(),
            decoder_model: DEFAULT_DECODER_MODEL.to_string(),
            point_rescale: RescaleReference::default(),
        }
    }
}
