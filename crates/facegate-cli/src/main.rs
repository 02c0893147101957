use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::encode::{self, JPEG_QUALITY};
use facegate_core::upload::DEFAULT_RECOGNIZE_URL;
use facegate_core::{
    CaptureSource, FaceDetector, FaceRegion, Frame, HttpUploadSink, ModelSet, OnnxFaceDetector,
    UploadSink,
};
use facegate_hw::{V4lCamera, DEFAULT_CAPTURE_SIZE};
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "facegate", about = "facegate face detection and recognition tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List V4L2 capture devices
    Devices,
    /// Run camera diagnostics
    Test {
        /// V4L2 device path
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Frames to discard before measuring
        #[arg(long, default_value_t = 4)]
        warmup: usize,
    },
    /// Detect faces in a still image and print them as JSON
    Detect {
        image: PathBuf,
        /// Directory containing the ONNX models
        #[arg(short, long, env = "FACEGATE_MODEL_DIR")]
        model_dir: Option<PathBuf>,
        /// Include 512-d descriptors in the output
        #[arg(long)]
        descriptors: bool,
    },
    /// Send an image to the recognition endpoint and print the identity
    Upload {
        image: PathBuf,
        #[arg(short, long, env = "FACEGATE_RECOGNIZE_URL", default_value = DEFAULT_RECOGNIZE_URL)]
        endpoint: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices => list_devices(),
        Commands::Test { device, warmup } => camera_test(&device, warmup),
        Commands::Detect {
            image,
            model_dir,
            descriptors,
        } => {
            let model_dir = model_dir.unwrap_or_else(facegate_core::default_model_dir);
            detect(&image, &model_dir, descriptors)
        }
        Commands::Upload { image, endpoint } => upload(&image, &endpoint).await,
    }
}

fn list_devices() -> Result<()> {
    let devices = V4lCamera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
        return Ok(());
    }
    for d in devices {
        println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }
    Ok(())
}

fn camera_test(device: &str, warmup: usize) -> Result<()> {
    println!("Running camera diagnostics on {device}...");

    let mut camera = V4lCamera::new(device, DEFAULT_CAPTURE_SIZE);
    let info = camera
        .start()
        .with_context(|| format!("failed to start {device}"))?;
    println!(
        "  negotiated: {} ({:?})",
        info.size,
        camera.pixel_format()
    );

    let failed = warm_up(&mut camera, warmup);
    if failed > 0 {
        println!("  warmup: {failed} of {warmup} frames failed");
    }

    let started = Instant::now();
    let frame = camera.current_frame().context("failed to capture frame")?;
    println!(
        "  frame #{}: {}x{}, avg brightness {:.1}, captured in {:?}",
        frame.sequence,
        frame.width(),
        frame.height(),
        frame.avg_brightness(),
        started.elapsed()
    );
    Ok(())
}

/// Discard `frames` frames while auto-exposure settles. Returns how many failed.
fn warm_up(camera: &mut dyn CaptureSource, frames: usize) -> usize {
    let mut failed = 0;
    for n in 0..frames {
        if let Err(e) = camera.current_frame() {
            tracing::debug!(frame = n, error = %e, "warmup frame failed");
            failed += 1;
        }
    }
    failed
}

fn load_frame(path: &Path) -> Result<Frame> {
    let image = image::open(path)
        .with_context(|| format!("failed to read {}", path.display()))?
        .to_rgb8();
    Ok(Frame::from_image(image, 0))
}

fn detect(path: &Path, model_dir: &Path, descriptors: bool) -> Result<()> {
    let frame = load_frame(path)?;

    let mut detector = OnnxFaceDetector::new(ModelSet::in_dir(model_dir));
    detector.load().context("failed to load models")?;

    let started = Instant::now();
    let detections = detector.detect(&frame)?;
    tracing::info!(
        faces = detections.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "detection complete"
    );

    // Report in image coordinates.
    let regions: Vec<FaceRegion> = detections
        .resize_to(frame.size())
        .into_iter()
        .map(|mut r| {
            if !descriptors {
                r.descriptor = None;
            }
            r
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&regions)?);
    Ok(())
}

async fn upload(path: &Path, endpoint: &str) -> Result<()> {
    let frame = load_frame(path)?;
    let image = encode::encode_jpeg(frame.image(), JPEG_QUALITY)?;
    println!(
        "Sending {}x{} image ({} bytes) to {endpoint}...",
        image.width,
        image.height,
        image.bytes.len()
    );

    let sink = HttpUploadSink::new(endpoint);
    let recognition = sink.upload(image).await?;
    match recognition.confidence {
        Some(c) => println!("Person recognized: {} ({c:.2})", recognition.name),
        None => println!("Person recognized: {}", recognition.name),
    }
    Ok(())
}
