use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use tokio::sync::watch;

use facewatch_core::detection::infrastructure::model_resolver::ModelSource;
use facewatch_core::detection::infrastructure::onnx_face_model::{
    OnnxModelLoader, DEFAULT_CONFIDENCE,
};
use facewatch_core::detection::infrastructure::ort_backend::OrtBackend;
use facewatch_core::overlay::infrastructure::raster_surface::SharedRasterSurface;
use facewatch_core::pipeline::pipeline_config::PipelineConfig;
use facewatch_core::pipeline::pipeline_controller::{Collaborators, PipelineController};
use facewatch_core::pipeline::pipeline_logger::{PipelineLogger, StdoutPipelineLogger};
use facewatch_core::pipeline::pipeline_state::PipelineState;
use facewatch_core::shared::constants::{FACE_MODEL_NAME, FACE_MODEL_URL, IMAGE_EXTENSIONS};
use facewatch_core::video::domain::frame_source::FrameSource;
use facewatch_core::video::infrastructure::ffmpeg_camera_source::{
    FfmpegCameraOptions, FfmpegCameraSource,
};
use facewatch_core::video::infrastructure::still_image_source::StillImageSource;
use facewatch_core::BoxError;

/// Live face detection on a camera feed.
#[derive(Parser)]
#[command(name = "facewatch")]
struct Cli {
    /// Camera device, video file, or stream URL. Defaults to the first
    /// system camera.
    input: Option<String>,

    /// Capture demuxer (v4l2, avfoundation, dshow). Omit for files and URLs.
    #[arg(long)]
    format: Option<String>,

    /// Use a still image as the camera.
    #[arg(long, conflicts_with_all = ["input", "format"])]
    image: Option<PathBuf>,

    /// JSON pipeline config; flags below override its fields.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Requested camera width.
    #[arg(long)]
    capture_width: Option<u32>,

    /// Requested camera height.
    #[arg(long)]
    capture_height: Option<u32>,

    /// Width of the frames handed to the model.
    #[arg(long)]
    width: Option<u32>,

    /// Height of the frames handed to the model.
    #[arg(long)]
    height: Option<u32>,

    /// Channels per pixel: 3 (RGB) or 4 (RGBA).
    #[arg(long)]
    channels: Option<u8>,

    /// Minimum milliseconds between cycle starts.
    #[arg(long)]
    min_delay_ms: Option<u64>,

    /// Consecutive failed cycles before the loop gives up.
    #[arg(long)]
    max_failures: Option<u32>,

    /// Display refresh rate the loop aligns to.
    #[arg(long)]
    refresh_hz: Option<u32>,

    /// Mirror boxes horizontally (selfie view).
    #[arg(long)]
    flip: bool,

    /// Local ONNX model file. Defaults to the cached face model,
    /// downloading it on first use.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Face detection confidence threshold (0.0-1.0).
    #[arg(long, default_value_t = DEFAULT_CONFIDENCE)]
    confidence: f64,

    /// Stop after this many cycles.
    #[arg(long)]
    max_cycles: Option<u64>,

    /// Write the final overlay to this PNG file.
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Log progress every N cycles.
    #[arg(long, default_value = "60")]
    log_every: usize,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn run() -> Result<(), BoxError> {
    let cli = Cli::parse();
    validate(&cli)?;

    let config = build_config(&cli)?;
    let source = build_source(&cli, &config);
    let collaborators = Collaborators {
        source,
        backend: Box::new(OrtBackend::default()),
        loader: Box::new(OnnxModelLoader::new(model_source(&cli), cli.confidence)),
    };

    let (cycles_tx, mut cycles_rx) = watch::channel(0u64);
    let logger = CycleCounter {
        inner: StdoutPipelineLogger::new(cli.log_every),
        cycles: cycles_tx,
    };
    let mut controller =
        PipelineController::new(config, collaborators)?.with_logger(Box::new(logger));

    let overlay = SharedRasterSurface::default();
    controller.mount_surface(Box::new(overlay.clone()));

    log::info!("Starting face detection");
    if let Err(e) = controller.initialize().await {
        controller.dispose().await;
        return Err(e.into());
    }

    let limit = cli.max_cycles;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => log::info!("Interrupted"),
        _ = controller.join() => {}
        _ = wait_for_cycles(&mut cycles_rx, limit) => {
            log::info!("Reached {} cycles", limit.unwrap_or_default());
        }
    }

    controller.stop();
    let cycles = controller.join().await;
    let outcome = controller.state();

    if let Some(path) = &cli.snapshot {
        overlay.save_png(path)?;
        log::info!("Overlay written to {}", path.display());
    }
    controller.dispose().await;

    if let PipelineState::Error(reason) = outcome {
        return Err(reason.into());
    }
    log::info!("Ran {} cycles", cycles.unwrap_or_default());
    Ok(())
}

/// Forwards to the stdout logger and publishes the cycle count.
struct CycleCounter {
    inner: StdoutPipelineLogger,
    cycles: watch::Sender<u64>,
}

impl PipelineLogger for CycleCounter {
    fn progress(&mut self, current: usize, total: usize) {
        self.inner.progress(current, total);
        self.cycles.send_replace(current as u64);
    }

    fn timing(&mut self, stage: &str, duration_ms: f64) {
        self.inner.timing(stage, duration_ms);
    }

    fn metric(&mut self, name: &str, value: f64) {
        self.inner.metric(name, value);
    }

    fn info(&mut self, message: &str) {
        self.inner.info(message);
    }

    fn summary(&self) {
        self.inner.summary();
    }
}

async fn wait_for_cycles(rx: &mut watch::Receiver<u64>, limit: Option<u64>) {
    match limit {
        Some(limit) => {
            if rx.wait_for(|n| *n >= limit).await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending().await,
    }
}

fn build_config(cli: &Cli) -> Result<PipelineConfig, BoxError> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("Cannot read config {}: {e}", path.display()))?;
            PipelineConfig::from_json(&text)?
        }
        None => PipelineConfig::default(),
    };

    if let Some(w) = cli.capture_width {
        config.capture.width = w;
    }
    if let Some(h) = cli.capture_height {
        config.capture.height = h;
    }
    if let Some(w) = cli.width {
        config.output.width = w;
    }
    if let Some(h) = cli.height {
        config.output.height = h;
    }
    if let Some(c) = cli.channels {
        config.output.channels = c;
    }
    if let Some(ms) = cli.min_delay_ms {
        config.min_cycle_delay = std::time::Duration::from_millis(ms);
    }
    if let Some(n) = cli.max_failures {
        config.max_consecutive_failures = n;
    }
    if let Some(hz) = cli.refresh_hz {
        config.refresh_hz = hz;
    }
    config.flip_horizontal |= cli.flip;

    config.validate()?;
    Ok(config)
}

fn build_source(cli: &Cli, config: &PipelineConfig) -> Box<dyn FrameSource> {
    if let Some(path) = &cli.image {
        return Box::new(StillImageSource::new(path, config.output));
    }

    let (input, input_format) = match &cli.input {
        Some(input) => (input.clone(), cli.format.clone()),
        None => {
            let (device, format) = default_camera();
            (device.to_string(), cli.format.clone().or(Some(format.to_string())))
        }
    };
    log::info!("Camera input: {input}");
    Box::new(FfmpegCameraSource::new(FfmpegCameraOptions {
        input,
        input_format,
        capture: config.capture,
        output: config.output,
    }))
}

fn model_source(cli: &Cli) -> ModelSource {
    match &cli.model {
        Some(path) => ModelSource::File(path.clone()),
        None => ModelSource::Remote {
            name: FACE_MODEL_NAME.to_string(),
            url: FACE_MODEL_URL.to_string(),
            bundled_dir: None,
        },
    }
}

/// First system camera and the demuxer that opens it.
fn default_camera() -> (&'static str, &'static str) {
    if cfg!(target_os = "macos") {
        ("0", "avfoundation")
    } else if cfg!(target_os = "windows") {
        ("video=0", "dshow")
    } else {
        ("/dev/video0", "v4l2")
    }
}

fn validate(cli: &Cli) -> Result<(), BoxError> {
    if let Some(image) = &cli.image {
        if !image.exists() {
            return Err(format!("Image file not found: {}", image.display()).into());
        }
        if !is_image(image) {
            return Err(format!("Unsupported image type: {}", image.display()).into());
        }
    }
    if let Some(model) = &cli.model {
        if !model.is_file() {
            return Err(format!("Model file not found: {}", model.display()).into());
        }
    }
    if !(0.0..=1.0).contains(&cli.confidence) {
        return Err(format!(
            "Confidence must be between 0.0 and 1.0, got {}",
            cli.confidence
        )
        .into());
    }
    if cli.max_cycles == Some(0) {
        return Err("--max-cycles must be at least 1".into());
    }
    Ok(())
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}
