use super::backend::{InferenceBackend, NamedTensors};
use super::config::BackendConfig;
use super::download::fetch_model;
use super::error::BackendError;
use ndarray::ArrayD;
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::Tensor;
use std::sync::Mutex;

/// A loaded ONNX model.
///
/// `Session::run` needs exclusive access, so each session sits behind its own
/// mutex and one backend can serve several threads.
pub struct OrtSession {
    name: String,
    session: Mutex<Session>,
    input_names: Vec<String>,
}

impl std::fmt::Debug for OrtSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrtSession")
            .field("name", &self.name)
            .field("input_names", &self.input_names)
            .finish_non_exhaustive()
    }
}

/// ONNX Runtime implementation of [`InferenceBackend`]
#[derive(Debug)]
pub struct OrtBackend {
    config: BackendConfig,
}

impl OrtBackend {
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        config.validate().map_err(BackendError::InvalidConfig)?;

        let providers = enabled_providers();
        if providers.is_empty() {
            tracing::warn!("No GPU execution providers compiled in, running on CPU");
        } else {
            tracing::info!("Execution providers for ONNX Runtime: {}", providers.join(", "));
        }

        Ok(Self { config })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn optimization_level(&self) -> GraphOptimizationLevel {
        match self.config.optimization_level {
            0 => GraphOptimizationLevel::Disable,
            1 => GraphOptimizationLevel::Level1,
            2 => GraphOptimizationLevel::Level2,
            _ => GraphOptimizationLevel::Level3,
        }
    }

    fn builder(&self) -> ort::Result<SessionBuilder> {
        let builder = Session::builder()?
            .with_optimization_level(self.optimization_level())?
            .with_intra_threads(self.config.intra_threads)?;
        register_providers(builder)
    }
}

fn enabled_providers() -> Vec<&'static str> {
    let mut providers = Vec::new();
    if cfg!(feature = "tensorrt") {
        providers.push("TensorRT");
    }
    if cfg!(feature = "cuda") {
        providers.push("CUDA");
    }
    providers
}

#[cfg(any(feature = "cuda", feature = "tensorrt"))]
fn register_providers(builder: SessionBuilder) -> ort::Result<SessionBuilder> {
    let mut providers = Vec::new();
    #[cfg(feature = "tensorrt")]
    providers.push(ort::execution_providers::TensorRTExecutionProvider::default().build());
    #[cfg(feature = "cuda")]
    providers.push(ort::execution_providers::CUDAExecutionProvider::default().build());
    builder.with_execution_providers(providers)
}

#[cfg(not(any(feature = "cuda", feature = "tensorrt")))]
fn register_providers(builder: SessionBuilder) -> ort::Result<SessionBuilder> {
    Ok(builder)
}

impl InferenceBackend for OrtBackend {
    type Session = OrtSession;

    fn load_model(&self, name: &str) -> Result<OrtSession, BackendError> {
        let path = self.config.model_path(name);

        if !path.is_file() {
            match self.config.source_url(name) {
                Some(url) if self.config.download_missing => {
                    tracing::warn!("Model {} not found at {}", name, path.display());
                    fetch_model(name, url, &path)?;
                }
                Some(url) => {
                    return Err(BackendError::ModelUnavailable {
                        name: name.to_string(),
                        path,
                        reason: format!("file not found, download it from {url}"),
                    });
                }
                None => {
                    return Err(BackendError::ModelUnavailable {
                        name: name.to_string(),
                        path,
                        reason: "file not found".to_string(),
                    });
                }
            }
        }

        tracing::info!("Loading model {} from {}", name, path.display());

        let session = self
            .builder()
            .and_then(|builder| builder.commit_from_file(&path))
            .map_err(|e| BackendError::ModelUnavailable {
                name: name.to_string(),
                path: path.clone(),
                reason: e.to_string(),
            })?;

        let input_names: Vec<String> = session.inputs.iter().map(|input| input.name.clone()).collect();
        tracing::debug!("Model {} inputs: {:?}", name, input_names);
        tracing::info!("Model {} loaded successfully", name);

        Ok(OrtSession {
            name: name.to_string(),
            session: Mutex::new(session),
            input_names,
        })
    }

    fn input_names(&self, session: &OrtSession) -> Vec<String> {
        session.input_names.clone()
    }

    fn run(&self, session: &OrtSession, inputs: NamedTensors) -> Result<Vec<ArrayD<f32>>, BackendError> {
        let _span = tracing::debug_span!("inference", model = %session.name).entered();

        let mut values = Vec::with_capacity(inputs.len());
        for (name, array) in inputs {
            values.push((name, Tensor::from_array(array)?));
        }

        let mut guard = session
            .session
            .lock()
            .map_err(|_| BackendError::Poisoned(session.name.clone()))?;
        let outputs = guard.run(values)?;

        let mut extracted = Vec::with_capacity(outputs.len());
        for index in 0..outputs.len() {
            extracted.push(outputs[index].try_extract_array::<f32>()?.to_owned());
        }

        Ok(extracted)
    }
}
