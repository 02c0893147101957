use anyhow::Result;
use facegate_core::notify::{JsonLinesNotifier, LogNotifier};
use facegate_core::{
    Event, HttpUploadSink, ModelSet, Notification, Notifier, OnnxFaceDetector, Overlay, Size,
};
use facegate_hw::V4lCamera;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod gate;
mod readiness;
mod scheduler;
#[cfg(test)]
mod testing;

use config::{Config, NotifierFormat};
use engine::EngineHandle;
use gate::{GateOptions, UploadGate};
use readiness::Readiness;
use scheduler::{Scheduler, SchedulerOptions};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "facegated starting");

    let config = Config::from_env()?;
    tracing::info!(
        camera = %config.camera_device,
        capture = %config.capture_size,
        models = %config.model_dir.display(),
        endpoint = %config.recognize_url,
        interval_ms = config.cycle_interval.as_millis() as u64,
        "configuration loaded"
    );

    let notifier: Arc<dyn Notifier> = match config.notifier {
        NotifierFormat::Log => Arc::new(LogNotifier),
        NotifierFormat::Json => Arc::new(JsonLinesNotifier::new(std::io::stdout())),
    };

    let detector = OnnxFaceDetector::new(ModelSet::in_dir(&config.model_dir));
    let camera = V4lCamera::new(config.camera_device.clone(), config.capture_size);
    let engine = EngineHandle::new(Box::new(detector), Box::new(camera));
    let readiness = Readiness::new();

    let gate = UploadGate::new(
        Arc::new(HttpUploadSink::new(config.recognize_url.clone())),
        Arc::clone(&notifier),
        GateOptions {
            jpeg_quality: config.jpeg_quality,
            upload_timeout: config.upload_timeout,
        },
    );
    let overlay = Arc::new(Mutex::new(Overlay::new(Size::new(0, 0))));
    let scheduler = Scheduler::new(
        engine.clone(),
        readiness.clone(),
        gate.clone(),
        overlay,
        Arc::clone(&notifier),
        SchedulerOptions {
            interval: config.cycle_interval,
            readiness_timeout: config.readiness_timeout,
        },
    );

    // Models load in the background while the camera starts.
    let load_task = {
        let engine = engine.clone();
        let readiness = readiness.clone();
        let notifier = Arc::clone(&notifier);
        tokio::spawn(async move {
            readiness::load_models(&engine, &readiness, notifier.as_ref()).await;
        })
    };

    match engine.start_capture(config.warmup_frames).await {
        Ok(info) => scheduler.start(info.size),
        Err(e) => {
            tracing::error!(error = %e, device = %config.camera_device, "camera unavailable");
            notifier.notify(Notification::new(Event::CameraUnavailable {
                reason: e.to_string(),
            }));
        }
    }

    tracing::info!("facegated ready");
    tokio::signal::ctrl_c().await?;
    tracing::info!(scheduler = ?scheduler.state(), "facegated shutting down");

    scheduler.stop();
    gate.close();
    load_task.abort();
    engine.release_capture().await;

    Ok(())
}
