//! OCR Orchestration
//!
//! [`OcrService`] wires the engine lifecycle, request coordinator, result cache
//! and progress reporter together and runs the dispatcher task that replays
//! deferred work outside the caller's stack.

pub mod cache;
pub mod coordinator;
pub mod events;
pub mod fingerprint;
pub mod lifecycle;
pub mod progress;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::OcrConfig;
use crate::language::Language;
use crate::surface::RasterSurface;
use crate::vision::{ImagePreprocessor, RecognitionBackend};

pub use cache::FingerprintCache;
pub use coordinator::{Job, RecognitionRequest, RequestCoordinator};
pub use events::OcrEvent;
pub use fingerprint::{Fingerprint, PageId};
pub use lifecycle::{EngineLifecycle, EngineState};
pub use progress::{InitProgress, LogEntry, ProgressReporter};

/// The OCR core as seen by the viewer
///
/// Must be created inside a Tokio runtime. Dropping the service stops the
/// dispatcher; call [`OcrService::shutdown`] to also release the engine.
pub struct OcrService {
    lifecycle: Arc<EngineLifecycle>,
    coordinator: Arc<RequestCoordinator>,
    cache: Arc<FingerprintCache>,
    progress: Arc<ProgressReporter>,
    events: events::EventSender,
    cancel: CancellationToken,
}

impl OcrService {
    pub fn new(config: &OcrConfig, backend: Arc<dyn RecognitionBackend>) -> Self {
        let events = events::channel();
        let progress = Arc::new(ProgressReporter::new(
            config.progress.log_capacity,
            events.clone(),
        ));
        let cache = Arc::new(FingerprintCache::new());
        let lifecycle = Arc::new(EngineLifecycle::new(
            backend,
            config.general.language.clone(),
            Arc::clone(&progress),
            events.clone(),
        ));

        let (drain_tx, drain_rx) = mpsc::unbounded_channel();
        let coordinator = Arc::new(RequestCoordinator::new(
            Arc::clone(&lifecycle),
            Arc::clone(&cache),
            Arc::clone(&progress),
            ImagePreprocessor::new(config.preprocess.clone()),
            events.clone(),
            config.recognition.timeout_secs.map(Duration::from_secs),
            drain_tx,
        ));

        let cancel = CancellationToken::new();
        tokio::spawn(dispatch(
            Arc::clone(&coordinator),
            drain_rx,
            lifecycle.subscribe_state(),
            cancel.clone(),
        ));

        Self {
            lifecycle,
            coordinator,
            cache,
            progress,
            events,
            cancel,
        }
    }

    /// (Re)build the engine for `language`. The cache is left alone.
    pub async fn initialize(&self, language: Language) -> EngineState {
        self.lifecycle.initialize(language).await
    }

    /// Recognize the text on a rendered page.
    ///
    /// Never fails: `None` means the request was deferred (engine not ready or
    /// busy) or recognition failed. Both cases are logged, and a deferred
    /// request reports its eventual result as an [`OcrEvent`].
    pub async fn run_ocr(
        &self,
        surface: impl Into<Arc<RasterSurface>>,
        page: impl Into<PageId>,
        scale: f64,
        force: bool,
    ) -> Option<String> {
        self.coordinator
            .run(RecognitionRequest {
                surface: surface.into(),
                page: page.into(),
                scale,
                force,
            })
            .await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OcrEvent> {
        self.events.subscribe()
    }

    pub fn engine_state(&self) -> EngineState {
        self.lifecycle.state()
    }

    pub fn is_ready(&self) -> bool {
        self.lifecycle.is_ready()
    }

    pub fn active_language(&self) -> Language {
        self.lifecycle.language()
    }

    pub fn init_progress(&self) -> InitProgress {
        self.progress.init_progress()
    }

    pub fn recognition_progress(&self) -> u8 {
        self.progress.recognition_progress()
    }

    /// Rolling log, newest first
    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.progress.entries()
    }

    pub fn cache(&self) -> &FingerprintCache {
        &self.cache
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        debug!("Recognition cache cleared");
    }

    /// Fingerprint a page would be cached under with the active language
    pub fn fingerprint(&self, page: impl Into<PageId>, scale: f64) -> Fingerprint {
        Fingerprint::new(&page.into(), scale, &self.lifecycle.language())
    }

    /// A recognition is running
    pub fn is_busy(&self) -> bool {
        self.coordinator.is_busy()
    }

    /// A request is waiting for the engine
    pub fn has_pending(&self) -> bool {
        self.coordinator.has_pending()
    }

    /// Stop the dispatcher and release the engine
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.lifecycle.teardown().await;
        info!("OCR service stopped");
    }
}

impl Drop for OcrService {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Runs drained jobs and replays the pending request on every transition to ready
async fn dispatch(
    coordinator: Arc<RequestCoordinator>,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    mut states: watch::Receiver<EngineState>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(job) = jobs.recv() => {
                coordinator.execute(job).await;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                if state == EngineState::Ready {
                    if let Some(job) = coordinator.replay_pending() {
                        coordinator.execute(job).await;
                    }
                }
            }
        }
    }
    debug!("OCR dispatcher stopped");
}
