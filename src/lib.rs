//! Promptable image segmentation over a two-stage encoder/decoder model.
//!
//! Images are encoded once into an [`EmbeddingBundle`](segmentation::EmbeddingBundle);
//! point and box prompts are then decoded against it into masks at the
//! original image resolution.

pub mod segmentation;
