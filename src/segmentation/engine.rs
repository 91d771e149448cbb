use super::backend::{InferenceBackend, NamedTensors};
use super::config::{EngineConfig, RescaleReference};
use super::error::{BackendError, Result, SegmentationError};
use super::preprocess::Preprocessor;
use super::prompt::{encode_prompt, Prompt};
use super::transform::{compute_forward, rescale_coords};
use super::types::{EmbeddingBundle, ImageSize, Masks, CANVAS_SIZE, LONG_SIDE_LENGTH, MASK_INPUT_SIZE};
use image::RgbImage;
use ndarray::{arr1, Array1, Array2, Array3, Array4, ArrayView, Axis, Dimension, Ix3, Ix4};

/// Decoder input names, fixed by the exported decoder graph
pub mod decoder_inputs {
    pub const IMAGE_EMBEDDINGS: &str = "image_embeddings";
    pub const POINT_COORDS: &str = "point_coords";
    pub const POINT_LABELS: &str = "point_labels";
    pub const MASK_INPUT: &str = "mask_input";
    pub const HAS_MASK_INPUT: &str = "has_mask_input";
    pub const ORIG_IM_SIZE: &str = "orig_im_size";
}

/// Two-phase promptable segmentation over an [`InferenceBackend`].
///
/// `encode` turns an image into a self-contained [`EmbeddingBundle`];
/// `predict_masks` decodes any number of prompts against a bundle. Neither
/// call mutates the engine, so both can run from several threads as far as
/// the backend allows.
pub struct SegmentationEngine<B: InferenceBackend> {
    backend: B,
    encoder: B::Session,
    decoder: B::Session,
    encoder_input: String,
    preprocessor: Preprocessor,
    config: EngineConfig,
}

impl<B: InferenceBackend> SegmentationEngine<B> {
    /// Load the encoder and decoder named in `config`
    pub fn new(backend: B, config: EngineConfig) -> Result<Self> {
        tracing::info!(
            "Loading segmentation models: encoder={}, decoder={}",
            config.encoder_model,
            config.decoder_model
        );

        let encoder = backend.load_model(&config.encoder_model)?;
        let encoder_input = backend
            .input_names(&encoder)
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::MissingInput {
                model: config.encoder_model.clone(),
            })?;
        let decoder = backend.load_model(&config.decoder_model)?;

        tracing::debug!("Encoder input tensor: {}", encoder_input);

        Ok(Self {
            backend,
            encoder,
            decoder,
            encoder_input,
            preprocessor: Preprocessor::new(CANVAS_SIZE),
            config,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compute the embedding for an RGB image
    pub fn encode(&self, image: &RgbImage) -> Result<EmbeddingBundle> {
        self.encode_array(Preprocessor::to_hwc(image).view())
    }

    /// Compute the embedding for an `(H, W)` or `(H, W, C)` image tensor.
    ///
    /// Single-plane images are encoded as one channel.
    pub fn encode_array<D: Dimension>(&self, image: ArrayView<f32, D>) -> Result<EmbeddingBundle> {
        let _span = tracing::debug_span!("encode").entered();

        let shape = image.shape().to_vec();
        let image = match image.ndim() {
            2 => image.into_dyn().insert_axis(Axis(2)),
            _ => image.into_dyn(),
        };
        let image = image
            .into_dimensionality::<Ix3>()
            .map_err(|_| SegmentationError::UnsupportedImage {
                shape: shape.clone(),
                reason: "expected (height, width[, channels])",
            })?;

        let (height, width, _) = image.dim();
        let original_size = ImageSize::from_shape(&shape).ok_or_else(|| SegmentationError::UnsupportedImage {
            shape,
            reason: "dimension exceeds u32",
        })?;
        tracing::debug!("Encoding image {}x{}", width, height);

        let transform = compute_forward(original_size, self.preprocessor.canvas())?;
        let canvas = self.preprocessor.preprocess(image, &transform)?;

        let outputs = self.backend.run(
            &self.encoder,
            vec![(self.encoder_input.clone(), canvas.into_dyn())],
        )?;
        let embedding = outputs
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::MissingOutput {
                model: self.config.encoder_model.clone(),
                index: 0,
            })?;

        tracing::debug!("Image embedding shape: {:?}", embedding.shape());

        Ok(EmbeddingBundle::from_parts(embedding, original_size, transform))
    }

    /// Decode masks for `prompt` at the bundle's original resolution.
    ///
    /// Returns `(candidates, height, width)` decoder scores.
    pub fn predict_masks(&self, bundle: &EmbeddingBundle, prompt: &Prompt) -> Result<Masks> {
        let _span = tracing::debug_span!("predict_masks").entered();

        bundle.validate()?;
        let inverse = bundle.transform().invert()?;

        let encoded = encode_prompt(prompt);
        let coords = self.points_to_canvas(&encoded.points, bundle)?;
        let count = encoded.len();
        tracing::debug!("Decoding {} prompt entries as {} points", prompt.len(), count);

        let point_coords = Array3::from_shape_fn((1, count, 2), |(_, i, j)| coords[i][j]);
        let point_labels = Array2::from_shape_fn((1, count), |(_, i)| encoded.labels[i]);
        let canvas = self.preprocessor.canvas();

        let inputs: NamedTensors = vec![
            (
                decoder_inputs::IMAGE_EMBEDDINGS.to_string(),
                bundle.embedding().clone(),
            ),
            (decoder_inputs::POINT_COORDS.to_string(), point_coords.into_dyn()),
            (decoder_inputs::POINT_LABELS.to_string(), point_labels.into_dyn()),
            (
                decoder_inputs::MASK_INPUT.to_string(),
                Array4::<f32>::zeros((1, 1, MASK_INPUT_SIZE, MASK_INPUT_SIZE)).into_dyn(),
            ),
            (
                decoder_inputs::HAS_MASK_INPUT.to_string(),
                Array1::<f32>::zeros(1).into_dyn(),
            ),
            (
                decoder_inputs::ORIG_IM_SIZE.to_string(),
                arr1(&[canvas.height as f32, canvas.width as f32]).into_dyn(),
            ),
        ];

        // Outputs are (masks, iou_predictions, low_res_logits); only masks are used
        let outputs = self.backend.run(&self.decoder, inputs)?;
        let raw = outputs
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::MissingOutput {
                model: self.config.decoder_model.clone(),
                index: 0,
            })?;

        let shape = raw.shape().to_vec();
        let raw = raw
            .into_dimensionality::<Ix4>()
            .map_err(|_| BackendError::UnexpectedShape {
                model: self.config.decoder_model.clone(),
                shape,
                expected: "(batch, candidates, height, width)",
            })?;
        tracing::debug!("Raw mask shape: {:?}", raw.shape());

        Preprocessor::postprocess_masks(raw.view(), &inverse, bundle.original_size())
    }

    /// Long-side rescale followed by the bundle's forward matrix
    fn points_to_canvas(&self, points: &[[f32; 2]], bundle: &EmbeddingBundle) -> Result<Vec<[f32; 2]>> {
        let reference = match self.config.point_rescale {
            RescaleReference::OriginalSize => bundle.original_size(),
            RescaleReference::CanvasSize => self.preprocessor.canvas(),
        };
        let rescaled = rescale_coords(points, reference, LONG_SIDE_LENGTH)?;
        Ok(bundle.transform().apply_to_points(&rescaled))
    }
}
