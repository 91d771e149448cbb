#![allow(dead_code)]

use ndarray::{Array2, Array4, ArrayD, Axis, IxDyn};
use samseg::segmentation::config::{DEFAULT_DECODER_MODEL, DEFAULT_ENCODER_MODEL};
use samseg::segmentation::decoder_inputs;
use samseg::segmentation::{BackendError, InferenceBackend, NamedTensors};
use std::sync::Mutex;

pub const ENCODER_INPUT: &str = "input_image";
pub const CANDIDATES: usize = 3;

/// Radius, in canvas pixels, of the disc candidate `c` marks around the first
/// prompt point
pub fn candidate_radius(candidate: usize) -> f32 {
    20.0 * (candidate as f32 + 1.0)
}

#[derive(Debug, Clone)]
pub struct Call {
    pub model: String,
    pub inputs: NamedTensors,
}

impl Call {
    pub fn input(&self, name: &str) -> &ArrayD<f32> {
        &self
            .inputs
            .iter()
            .find(|(n, _)| n == name)
            .unwrap_or_else(|| panic!("input {name} not fed to {}", self.model))
            .1
    }
}

/// Deterministic stand-in for the encoder/decoder pair.
///
/// The encoder returns per-channel means of the canvas. The decoder returns
/// `CANDIDATES` canvas-sized masks scoring `radius - distance` to the first
/// prompt point.
#[derive(Default)]
pub struct MockBackend {
    pub calls: Mutex<Vec<Call>>,
    pub missing_models: Vec<String>,
    pub failing_models: Vec<String>,
    pub encoder_inputs: Option<Vec<String>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, model: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.model == model).collect()
    }

    pub fn last_decoder_call(&self) -> Call {
        self.calls_to(DEFAULT_DECODER_MODEL)
            .pop()
            .expect("decoder was never called")
    }

    fn encode(inputs: &NamedTensors) -> ArrayD<f32> {
        let canvas = &inputs[0].1;
        let channels = canvas.shape()[2];
        let flat = canvas
            .view()
            .into_shape_with_order((canvas.len() / channels, channels))
            .unwrap();
        let means = flat.mean_axis(Axis(0)).unwrap();
        means.insert_axis(Axis(0)).into_dyn()
    }

    fn decode(inputs: &NamedTensors) -> Vec<ArrayD<f32>> {
        let coords = inputs
            .iter()
            .find(|(n, _)| n == decoder_inputs::POINT_COORDS)
            .map(|(_, a)| a.clone())
            .unwrap();
        let size = inputs
            .iter()
            .find(|(n, _)| n == decoder_inputs::ORIG_IM_SIZE)
            .map(|(_, a)| a.clone())
            .unwrap();
        let (height, width) = (size[[0]] as usize, size[[1]] as usize);
        let (px, py) = (coords[[0, 0, 0]], coords[[0, 0, 1]]);

        let masks = Array4::from_shape_fn((1, CANDIDATES, height, width), |(_, c, y, x)| {
            let distance = ((x as f32 - px).powi(2) + (y as f32 - py).powi(2)).sqrt();
            candidate_radius(c) - distance
        });
        let iou = Array2::from_elem((1, CANDIDATES), 0.9f32);
        let low_res = ArrayD::zeros(IxDyn(&[1, CANDIDATES, 256, 256]));

        vec![masks.into_dyn(), iou.into_dyn(), low_res]
    }
}

impl InferenceBackend for MockBackend {
    type Session = String;

    fn load_model(&self, name: &str) -> Result<String, BackendError> {
        if self.missing_models.iter().any(|m| m == name) {
            return Err(BackendError::ModelUnavailable {
                name: name.to_string(),
                path: name.into(),
                reason: "file not found".to_string(),
            });
        }
        Ok(name.to_string())
    }

    fn input_names(&self, session: &String) -> Vec<String> {
        if session == DEFAULT_ENCODER_MODEL {
            self.encoder_inputs
                .clone()
                .unwrap_or_else(|| vec![ENCODER_INPUT.to_string()])
        } else {
            [
                decoder_inputs::IMAGE_EMBEDDINGS,
                decoder_inputs::POINT_COORDS,
                decoder_inputs::POINT_LABELS,
                decoder_inputs::MASK_INPUT,
                decoder_inputs::HAS_MASK_INPUT,
                decoder_inputs::ORIG_IM_SIZE,
            ]
            .iter()
            .map(|s| s.to_string())
            .collect()
        }
    }

    fn run(&self, session: &String, inputs: NamedTensors) -> Result<Vec<ArrayD<f32>>, BackendError> {
        self.calls.lock().unwrap().push(Call {
            model: session.clone(),
            inputs: inputs.clone(),
        });

        if self.failing_models.iter().any(|m| m == session) {
            return Err(BackendError::Poisoned(session.clone()));
        }

        if session == DEFAULT_ENCODER_MODEL {
            Ok(vec![Self::encode(&inputs)])
        } else {
            Ok(Self::decode(&inputs))
        }
    }
}
