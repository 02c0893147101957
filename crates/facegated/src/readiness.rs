use crate::engine::EngineHandle;
use facegate_core::{Event, Notification, Notifier};
use std::sync::Arc;
use tokio::sync::watch;

/// Set-once flag: true after every detector sub-model has loaded.
#[derive(Clone)]
pub struct Readiness {
    tx: Arc<watch::Sender<bool>>,
}

impl Readiness {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn mark_ready(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the flag is set. Returns immediately if it already is.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

/// Load the detector models, then flip `readiness` and announce the outcome.
pub async fn load_models(engine: &EngineHandle, readiness: &Readiness, notifier: &dyn Notifier) {
    let started = std::time::Instant::now();
    match engine.load_models().await {
        Ok(()) => {
            tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "models loaded");
            readiness.mark_ready();
            notifier.notify(Notification::new(Event::ModelsLoaded));
        }
        Err(e) => {
            tracing::error!(error = %e, "model load failed");
            notifier.notify(Notification::new(Event::ModelLoadFailed {
                reason: e.to_string(),
            }));
        }
    }
}
