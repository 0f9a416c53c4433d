//! Request admission and execution
//!
//! At most one recognition runs at a time. Requests that cannot run right
//! away land in a single pending slot where the newest one always wins; the
//! slot is drained when the running recognition completes and replayed when
//! the engine becomes ready.

use parking_lot::Mutex;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::cache::FingerprintCache;
use super::events::{publish, EventSender, OcrEvent};
use super::fingerprint::{Fingerprint, PageId};
use super::lifecycle::EngineLifecycle;
use super::progress::ProgressReporter;
use crate::error::{OcrError, Result};
use crate::surface::RasterSurface;
use crate::vision::{ImagePreprocessor, RecognitionEngine};

/// Everything needed to (re)run one recognition
#[derive(Debug, Clone)]
pub struct RecognitionRequest {
    pub surface: Arc<RasterSurface>,
    pub page: PageId,
    pub scale: f64,
    /// Bypass the cache
    pub force: bool,
}

/// A request cleared to run, bound to the engine and fingerprint it was
/// admitted under
pub struct Job {
    request: RecognitionRequest,
    fingerprint: Fingerprint,
    engine: Arc<dyn RecognitionEngine>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("request", &self.request)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

impl Job {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

enum Admission {
    Cached(String),
    Deferred,
    Execute(Job),
}

#[derive(Default)]
struct RunSlot {
    in_flight: bool,
    pending: Option<RecognitionRequest>,
}

/// Decides whether a request is served from cache, deferred or executed
pub struct RequestCoordinator {
    lifecycle: Arc<EngineLifecycle>,
    cache: Arc<FingerprintCache>,
    progress: Arc<ProgressReporter>,
    preprocessor: ImagePreprocessor,
    events: EventSender,
    timeout: Option<Duration>,
    slot: Mutex<RunSlot>,
    /// Drained jobs go to the service dispatcher
    drain_tx: mpsc::UnboundedSender<Job>,
}

impl RequestCoordinator {
    pub fn new(
        lifecycle: Arc<EngineLifecycle>,
        cache: Arc<FingerprintCache>,
        progress: Arc<ProgressReporter>,
        preprocessor: ImagePreprocessor,
        events: EventSender,
        timeout: Option<Duration>,
        drain_tx: mpsc::UnboundedSender<Job>,
    ) -> Self {
        Self {
            lifecycle,
            cache,
            progress,
            preprocessor,
            events,
            timeout,
            slot: Mutex::new(RunSlot::default()),
            drain_tx,
        }
    }

    /// Serve, defer or execute `request`.
    ///
    /// Returns the recognized text, or `None` when the request was deferred or
    /// failed. Deferred requests report their result through the event stream.
    pub async fn run(&self, request: RecognitionRequest) -> Option<String> {
        if !request.scale.is_finite() || request.scale <= 0.0 {
            self.progress.log(format!(
                "Page {}: invalid scale {}",
                request.page, request.scale
            ));
            return None;
        }

        let admission = {
            let mut slot = self.slot.lock();
            self.admit(&mut slot, request)
        };
        match admission {
            Admission::Cached(text) => Some(text),
            Admission::Deferred => None,
            Admission::Execute(job) => self.execute(job).await,
        }
    }

    /// Take the pending request for an engine that just became ready.
    ///
    /// Returns `None` if nothing is pending, a recognition is already running
    /// (its completion drains the slot), or the request was served from cache.
    pub fn replay_pending(&self) -> Option<Job> {
        let mut slot = self.slot.lock();
        if slot.in_flight {
            return None;
        }
        let request = slot.pending.take()?;
        debug!("Replaying pending request for page {}", request.page);
        match self.admit(&mut slot, request) {
            Admission::Execute(job) => Some(job),
            Admission::Cached(_) | Admission::Deferred => None,
        }
    }

    /// Run an admitted job to completion, then drain the pending slot.
    ///
    /// A job whose engine was replaced before it started goes back to the
    /// pending slot and is admitted again against the current engine.
    pub async fn execute(&self, job: Job) -> Option<String> {
        let Job {
            request,
            fingerprint,
            engine,
        } = job;

        if !self.lifecycle.is_live(&engine) {
            debug!(
                "Engine for {} was replaced, requeueing page {}",
                fingerprint, request.page
            );
            self.requeue(request);
            self.complete();
            return None;
        }

        let outcome = match self.recognize(engine, &request).await {
            Ok(text) => {
                let text = text.trim().to_string();
                self.cache.set(fingerprint.clone(), text.clone());
                if text.is_empty() {
                    self.progress.log(format!("Page {}: no text found", request.page));
                } else {
                    self.progress.log(format!(
                        "Page {}: recognized {} characters",
                        request.page,
                        text.chars().count()
                    ));
                }
                publish(
                    &self.events,
                    OcrEvent::Recognized {
                        fingerprint,
                        text: text.clone(),
                        cached: false,
                    },
                );
                Some(text)
            }
            Err(e) => {
                self.progress
                    .log(format!("OCR failed on page {}: {}", request.page, e));
                publish(
                    &self.events,
                    OcrEvent::RecognitionFailed {
                        fingerprint,
                        message: e.to_string(),
                    },
                );
                None
            }
        };

        self.complete();
        outcome
    }

    pub fn is_busy(&self) -> bool {
        self.slot.lock().in_flight
    }

    pub fn has_pending(&self) -> bool {
        self.slot.lock().pending.is_some()
    }

    /// Admission runs under the slot lock so completion can drain atomically
    fn admit(&self, slot: &mut RunSlot, request: RecognitionRequest) -> Admission {
        let engine = self.lifecycle.engine();
        let language = match &engine {
            Some(engine) => engine.language().clone(),
            None => self.lifecycle.language(),
        };
        let fingerprint = Fingerprint::new(&request.page, request.scale, &language);

        if !request.force {
            if let Some(text) = self.cache.get(&fingerprint) {
                self.progress
                    .log(format!("Page {}: skipped, cached", request.page));
                publish(
                    &self.events,
                    OcrEvent::Recognized {
                        fingerprint,
                        text: text.clone(),
                        cached: true,
                    },
                );
                return Admission::Cached(text);
            }
        }

        let Some(engine) = engine else {
            if request.force {
                self.progress.log(format!(
                    "OCR engine not ready, queued re-run of page {}",
                    request.page
                ));
            }
            slot.pending = Some(request);
            return Admission::Deferred;
        };

        if slot.in_flight {
            debug!("Recognition busy, page {} replaces pending request", request.page);
            slot.pending = Some(request);
            return Admission::Deferred;
        }

        slot.in_flight = true;
        self.progress.reset_recognition();
        if request.force {
            self.progress
                .log(format!("Force re-running OCR on page {}", request.page));
        } else {
            self.progress.log(format!("Starting OCR on page {}", request.page));
        }
        Admission::Execute(Job {
            request,
            fingerprint,
            engine,
        })
    }

    /// Put `request` back unless a newer one already took the slot
    fn requeue(&self, request: RecognitionRequest) {
        let mut slot = self.slot.lock();
        if slot.pending.is_none() {
            slot.pending = Some(request);
        }
    }

    async fn recognize(
        &self,
        engine: Arc<dyn RecognitionEngine>,
        request: &RecognitionRequest,
    ) -> Result<String> {
        let preprocessor = self.preprocessor.clone();
        let surface = Arc::clone(&request.surface);
        let prepared = tokio::task::spawn_blocking(move || -> Result<Arc<RasterSurface>> {
            Ok(match preprocessor.prepare(&surface)? {
                Cow::Borrowed(_) => Arc::clone(&surface),
                Cow::Owned(scaled) => Arc::new(scaled),
            })
        })
        .await
        .map_err(|e| OcrError::Recognition(format!("preprocessing task failed: {}", e)))??;

        let recognition = engine.recognize(&prepared);
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, recognition)
                .await
                .map_err(|_| OcrError::Timeout(limit.as_secs()))?,
            None => recognition.await,
        }
    }

    fn complete(&self) {
        let admission = {
            let mut slot = self.slot.lock();
            slot.in_flight = false;
            self.progress.reset_recognition();
            match slot.pending.take() {
                Some(request) => self.admit(&mut slot, request),
                None => return,
            }
        };

        if let Admission::Execute(job) = admission {
            if let Err(mpsc::error::SendError(job)) = self.drain_tx.send(job) {
                warn!(
                    "Dispatcher stopped, dropping request for page {}",
                    job.request.page
                );
                self.slot.lock().in_flight = false;
            }
        }
    }
}
