//! Engine lifecycle
//!
//! Owns the single live recognition engine. Readiness is published on a
//! `watch` channel so the dispatcher can replay deferred work when the engine
//! becomes ready.

use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use super::events::{publish, EventSender, OcrEvent};
use super::progress::ProgressReporter;
use crate::language::Language;
use crate::vision::{RecognitionBackend, RecognitionEngine, StatusCallback};

/// Engine readiness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    #[default]
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::Initializing => "initializing",
            EngineState::Ready => "ready",
            EngineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

struct EngineSlot {
    state: EngineState,
    engine: Option<Arc<dyn RecognitionEngine>>,
    /// Language the current or upcoming engine is bound to
    language: Language,
}

/// Creates, replaces and tears down the recognition engine
pub struct EngineLifecycle {
    backend: Arc<dyn RecognitionBackend>,
    progress: Arc<ProgressReporter>,
    events: EventSender,
    slot: RwLock<EngineSlot>,
    /// Bumped by every initialize/teardown; older creations are discarded
    generation: AtomicU64,
    state_tx: watch::Sender<EngineState>,
}

impl EngineLifecycle {
    pub fn new(
        backend: Arc<dyn RecognitionBackend>,
        language: Language,
        progress: Arc<ProgressReporter>,
        events: EventSender,
    ) -> Self {
        let (state_tx, _) = watch::channel(EngineState::Uninitialized);
        Self {
            backend,
            progress,
            events,
            slot: RwLock::new(EngineSlot {
                state: EngineState::Uninitialized,
                engine: None,
                language,
            }),
            generation: AtomicU64::new(0),
            state_tx,
        }
    }

    /// Tear down any existing engine and build a new one for `language`.
    ///
    /// Always rebuilds, even for the current language. Failures leave the
    /// state at [`EngineState::Failed`] until the next call; nothing retries
    /// on its own.
    pub async fn initialize(&self, language: Language) -> EngineState {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let previous = {
            let mut slot = self.slot.write();
            let previous = slot.engine.take();
            if previous.is_some() {
                self.transition(&mut slot, EngineState::Uninitialized);
            }
            slot.language = language.clone();
            previous
        };
        if let Some(engine) = previous {
            self.terminate(engine).await;
        }

        {
            let mut slot = self.slot.write();
            if !self.is_current(generation) {
                return slot.state;
            }
            self.transition(&mut slot, EngineState::Initializing);
        }
        self.progress.begin_initialization();
        self.progress.log(format!(
            "Initializing OCR engine ({})",
            language.display_name()
        ));

        let progress = Arc::clone(&self.progress);
        let status: StatusCallback =
            Arc::new(move |key: &str, fraction: f32| progress.on_engine_event(key, fraction));

        match self.backend.create_engine(&language, status).await {
            Ok(engine) => {
                let installed = {
                    let mut slot = self.slot.write();
                    let current = self.is_current(generation);
                    if current {
                        // progress settles before the dispatcher sees Ready
                        self.progress.reset_recognition();
                        self.progress.mark_ready();
                        self.progress
                            .log(format!("OCR engine ready ({})", language.display_name()));
                        slot.engine = Some(Arc::clone(&engine));
                        self.transition(&mut slot, EngineState::Ready);
                    }
                    current
                };
                if !installed {
                    debug!("Discarding superseded {} engine", language);
                    self.terminate(engine).await;
                    return self.state();
                }
                EngineState::Ready
            }
            Err(e) => {
                let failed = {
                    let mut slot = self.slot.write();
                    let current = self.is_current(generation);
                    if current {
                        self.transition(&mut slot, EngineState::Failed);
                    }
                    current
                };
                if !failed {
                    return self.state();
                }

                error!("Engine initialization failed for {}: {}", language, e);
                self.progress.mark_failed();
                self.progress.log(format!("OCR initialization failed: {}", e));
                EngineState::Failed
            }
        }
    }

    /// Release the engine, interrupting any recognition it is running
    pub async fn teardown(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let previous = {
            let mut slot = self.slot.write();
            let previous = slot.engine.take();
            self.transition(&mut slot, EngineState::Uninitialized);
            previous
        };
        if let Some(engine) = previous {
            self.terminate(engine).await;
            self.progress.log("OCR engine released");
        }
    }

    /// The engine, only while it is ready
    pub fn engine(&self) -> Option<Arc<dyn RecognitionEngine>> {
        let slot = self.slot.read();
        match slot.state {
            EngineState::Ready => slot.engine.clone(),
            _ => None,
        }
    }

    /// `engine` is still the live, ready engine
    pub fn is_live(&self, engine: &Arc<dyn RecognitionEngine>) -> bool {
        self.engine().is_some_and(|live| Arc::ptr_eq(&live, engine))
    }

    pub fn state(&self) -> EngineState {
        self.slot.read().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == EngineState::Ready
    }

    /// Language of the live engine, or of the one being built
    pub fn language(&self) -> Language {
        self.slot.read().language.clone()
    }

    /// Watch readiness transitions
    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.state_tx.subscribe()
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn transition(&self, slot: &mut EngineSlot, state: EngineState) {
        if slot.state == state {
            return;
        }
        debug!("Engine {} -> {}", slot.state, state);
        slot.state = state;
        self.state_tx.send_replace(state);
        publish(
            &self.events,
            OcrEvent::EngineStateChanged {
                state,
                language: slot.language.clone(),
            },
        );
    }

    /// Best effort; errors are logged and dropped
    async fn terminate(&self, engine: Arc<dyn RecognitionEngine>) {
        if let Err(e) = engine.terminate().await {
            warn!("Ignoring teardown error for {} engine: {}", engine.language(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{OcrError, Result};
    use crate::ocr::events;
    use crate::ocr::progress::{status, LABEL_FAILED, LABEL_READY};
    use crate::surface::RasterSurface;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct FakeEngine {
        language: Language,
        terminated: Arc<AtomicUsize>,
        fail_terminate: bool,
    }

    #[async_trait]
    impl RecognitionEngine for FakeEngine {
        fn language(&self) -> &Language {
            &self.language
        }

        async fn recognize(&self, _surface: &RasterSurface) -> Result<String> {
            Ok(String::new())
        }

        async fn terminate(&self) -> Result<()> {
            self.terminated.fetch_add(1, Ordering::SeqCst);
            if self.fail_terminate {
                return Err(OcrError::Recognition("worker already gone".to_string()));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeBackend {
        fail_for: Option<&'static str>,
        fail_terminate: bool,
        created: AtomicUsize,
        terminated: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RecognitionBackend for FakeBackend {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn create_engine(
            &self,
            language: &Language,
            status: StatusCallback,
        ) -> Result<Arc<dyn RecognitionEngine>> {
            status(status::LOADING_LANGUAGE, 0.5);
            if self.fail_for == Some(language.code()) {
                return Err(OcrError::EngineInit("traineddata missing".to_string()));
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FakeEngine {
                language: language.clone(),
                terminated: Arc::clone(&self.terminated),
                fail_terminate: self.fail_terminate,
            }))
        }
    }

    fn lifecycle(backend: Arc<FakeBackend>) -> EngineLifecycle {
        let events = events::channel();
        let progress = Arc::new(ProgressReporter::new(50, events.clone()));
        EngineLifecycle::new(backend, Language::default(), progress, events)
    }

    fn lang(code: &str) -> Language {
        Language::new(code).unwrap()
    }

    #[tokio::test]
    async fn test_starts_uninitialized() {
        let lifecycle = lifecycle(Arc::new(FakeBackend::default()));
        assert_eq!(lifecycle.state(), EngineState::Uninitialized);
        assert!(lifecycle.engine().is_none());
    }

    #[tokio::test]
    async fn test_initialize_reaches_ready() {
        let lifecycle = lifecycle(Arc::new(FakeBackend::default()));
        let mut states = lifecycle.subscribe_state();

        assert_eq!(lifecycle.initialize(lang("eng")).await, EngineState::Ready);
        assert!(lifecycle.is_ready());
        assert_eq!(lifecycle.engine().unwrap().language().code(), "eng");
        assert_eq!(*states.borrow_and_update(), EngineState::Ready);

        let init = lifecycle.progress.init_progress();
        assert_eq!(init.percent, 100);
        assert_eq!(init.label, LABEL_READY);
    }

    #[tokio::test]
    async fn test_failed_initialization() {
        let backend = Arc::new(FakeBackend {
            fail_for: Some("eng"),
            ..Default::default()
        });
        let lifecycle = lifecycle(backend);

        assert_eq!(lifecycle.initialize(lang("eng")).await, EngineState::Failed);
        assert!(!lifecycle.is_ready());
        assert!(lifecycle.engine().is_none());

        let init = lifecycle.progress.init_progress();
        assert_eq!(init.percent, 0);
        assert_eq!(init.label, LABEL_FAILED);
        assert!(lifecycle.progress.entries()[0].message.contains("traineddata missing"));
    }

    #[tokio::test]
    async fn test_reinitialize_terminates_previous_engine() {
        let backend = Arc::new(FakeBackend::default());
        let lifecycle = lifecycle(Arc::clone(&backend));

        lifecycle.initialize(lang("eng")).await;
        lifecycle.initialize(lang("fra")).await;

        assert_eq!(backend.created.load(Ordering::SeqCst), 2);
        assert_eq!(backend.terminated.load(Ordering::SeqCst), 1);
        assert_eq!(lifecycle.language().code(), "fra");
        assert_eq!(lifecycle.engine().unwrap().language().code(), "fra");
    }

    #[tokio::test]
    async fn test_teardown_errors_do_not_block_rebuild() {
        let backend = Arc::new(FakeBackend {
            fail_terminate: true,
            ..Default::default()
        });
        let lifecycle = lifecycle(Arc::clone(&backend));

        lifecycle.initialize(lang("eng")).await;
        assert_eq!(lifecycle.initialize(lang("deu")).await, EngineState::Ready);
        assert_eq!(backend.terminated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovery_after_failure() {
        let backend = Arc::new(FakeBackend {
            fail_for: Some("jpn"),
            ..Default::default()
        });
        let lifecycle = lifecycle(backend);

        assert_eq!(lifecycle.initialize(lang("jpn")).await, EngineState::Failed);
        assert_eq!(lifecycle.initialize(lang("eng")).await, EngineState::Ready);
    }

    #[tokio::test]
    async fn test_progress_settles_before_ready_is_published() {
        let lifecycle = lifecycle(Arc::new(FakeBackend::default()));
        let mut events = lifecycle.events.subscribe();
        lifecycle.initialize(lang("eng")).await;

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            match event {
                OcrEvent::InitProgress(progress) if progress.percent == 100 => seen.push("100%"),
                OcrEvent::Log(entry) if entry.message.starts_with("OCR engine ready") => {
                    seen.push("ready log")
                }
                OcrEvent::EngineStateChanged {
                    state: EngineState::Ready,
                    ..
                } => seen.push("ready state"),
                _ => {}
            }
        }
        assert_eq!(seen, vec!["100%", "ready log", "ready state"]);
    }

    #[tokio::test]
    async fn test_replaced_engine_reports_its_own_language() {
        let lifecycle = lifecycle(Arc::new(FakeBackend::default()));
        lifecycle.initialize(lang("eng")).await;
        let old = lifecycle.engine().unwrap();
        let mut events = lifecycle.events.subscribe();

        lifecycle.initialize(lang("spa")).await;
        assert!(!lifecycle.is_live(&old));
        assert!(lifecycle.is_live(&lifecycle.engine().unwrap()));

        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let OcrEvent::EngineStateChanged { state, language } = event {
                states.push((state, language.code().to_string()));
            }
        }
        assert_eq!(states[0], (EngineState::Uninitialized, "eng".to_string()));
        assert_eq!(states[1], (EngineState::Initializing, "spa".to_string()));
    }

    #[tokio::test]
    async fn test_teardown_returns_to_uninitialized() {
        let backend = Arc::new(FakeBackend::default());
        let lifecycle = lifecycle(Arc::clone(&backend));

        lifecycle.initialize(lang("eng")).await;
        lifecycle.teardown().await;

        assert_eq!(lifecycle.state(), EngineState::Uninitialized);
        assert!(lifecycle.engine().is_none());
        assert_eq!(backend.terminated.load(Ordering::SeqCst), 1);
    }
}
