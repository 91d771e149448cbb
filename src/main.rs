use anyhow::{bail, Context, Result};
use clap::Parser;
use samseg::segmentation::config::{DEFAULT_DECODER_MODEL, DEFAULT_ENCODER_MODEL};
use samseg::segmentation::{
    BackendConfig, EngineConfig, OrtBackend, Preprocessor, Prompt, RescaleReference,
    SegmentationEngine,
};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Image to segment
    image: PathBuf,

    /// Prompt as JSON, e.g. '[{"type":"point","data":[50,50],"label":1}]'
    #[arg(short, long, conflicts_with = "prompt_file")]
    prompt: Option<String>,

    /// Read the JSON prompt from a file
    #[arg(long)]
    prompt_file: Option<PathBuf>,

    /// Directory holding the ONNX models
    #[arg(long, default_value = "data")]
    model_dir: PathBuf,

    /// Encoder model file name
    #[arg(long, default_value = DEFAULT_ENCODER_MODEL)]
    encoder: String,

    /// Decoder model file name
    #[arg(long, default_value = DEFAULT_DECODER_MODEL)]
    decoder: String,

    /// Directory the mask PNGs are written to
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Mask score above which a pixel is foreground
    #[arg(long, default_value_t = 0.0)]
    threshold: f32,

    /// Intra-op threads per ONNX session
    #[arg(long, default_value_t = 4)]
    intra_threads: usize,

    /// Fail instead of downloading missing models
    #[arg(long)]
    no_download: bool,

    /// Rescale prompt points from the canvas size instead of the image size
    #[arg(long)]
    canvas_rescale: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("samseg starting");

    let prompt = load_prompt(&args)?;
    tracing::info!("Prompt with {} entries", prompt.len());

    let image = image::open(&args.image)
        .with_context(|| format!("Failed to open image {}", args.image.display()))?
        .to_rgb8();
    tracing::info!("Image: {}x{}", image.width(), image.height());

    let backend_config = BackendConfig {
        model_dir: args.model_dir.clone(),
        intra_threads: args.intra_threads,
        download_missing: !args.no_download,
        ..BackendConfig::default()
    };
    let engine_config = EngineConfig {
        encoder_model: args.encoder.clone(),
        decoder_model: args.decoder.clone(),
        point_rescale: if args.canvas_rescale {
            RescaleReference::CanvasSize
        } else {
            RescaleReference::OriginalSize
        },
    };

    let backend = OrtBackend::new(backend_config).context("Failed to initialize ONNX Runtime backend")?;
    let engine = SegmentationEngine::new(backend, engine_config)
        .context("Failed to load segmentation models")?;

    let encode_start = Instant::now();
    let bundle = engine.encode(&image).context("Failed to encode image")?;
    let encode_time = encode_start.elapsed();

    let decode_start = Instant::now();
    let masks = engine
        .predict_masks(&bundle, &prompt)
        .context("Failed to predict masks")?;
    let decode_time = decode_start.elapsed();

    tracing::info!(
        "encode={:.1}ms, decode={:.1}ms, masks={}",
        encode_time.as_secs_f64() * 1000.0,
        decode_time.as_secs_f64() * 1000.0,
        masks.shape()[0]
    );

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Failed to create {}", args.output_dir.display()))?;

    for (index, mask) in masks.outer_iter().enumerate() {
        let path = args.output_dir.join(format!("mask_{index}.png"));
        Preprocessor::mask_to_luma(mask, args.threshold)
            .save(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!("Wrote {}", path.display());
    }

    Ok(())
}

fn load_prompt(args: &Args) -> Result<Prompt> {
    let json = match (&args.prompt, &args.prompt_file) {
        (Some(json), _) => json.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read prompt file {}", path.display()))?,
        (None, None) => bail!("A prompt is required (--prompt or --prompt-file)"),
    };

    Prompt::from_json(&json).context("Failed to parse prompt")
}
