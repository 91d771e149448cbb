use super::error::BackendError;
use ndarray::ArrayD;

/// Named input tensors for one model invocation, in feed order
pub type NamedTensors = Vec<(String, ArrayD<f32>)>;

/// Model runtime the engine delegates to.
///
/// Implementations own weight lookup and execution-provider selection. The
/// engine holds no lock around these calls: if an implementation is shared
/// between threads it must make `run` safe for concurrent use itself.
pub trait InferenceBackend {
    /// Handle to a loaded model
    type Session;

    /// Load a model by name
    ///
    /// # Errors
    /// `BackendError::ModelUnavailable` if the weights cannot be found or loaded
    fn load_model(&self, name: &str) -> Result<Self::Session, BackendError>;

    /// Names of the model's inputs in declaration order
    fn input_names(&self, session: &Self::Session) -> Vec<String>;

    /// Run the model and return its outputs in declaration order.
    ///
    /// Must be deterministic for identical inputs and weights.
    fn run(&self, session: &Self::Session, inputs: NamedTensors) -> Result<Vec<ArrayD<f32>>, BackendError>;
}
