//! Scripted recognition backend for integration tests
//!
//! Pages are identified by a tag stored in the red channel of their first
//! pixel. The engine answers `"<lang> text <tag>"` unless the script says
//! otherwise, and can be told to hold recognitions or initializations until
//! the test releases them.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio_util::sync::CancellationToken;

use pagelens::ocr::progress::status;
use pagelens::vision::{RecognitionBackend, RecognitionEngine, StatusCallback};
use pagelens::{Language, OcrConfig, OcrError, OcrEvent, OcrService, RasterSurface, Result};

const WAIT: Duration = Duration::from_secs(5);

pub struct Script {
    overrides: Mutex<HashMap<u8, String>>,
    failing: Mutex<HashSet<u8>>,
    fail_init: AtomicBool,
    hold_init: AtomicBool,
    init_gate: Semaphore,
    hold_recognition: AtomicBool,
    recognition_gate: Semaphore,
    init_calls: AtomicUsize,
    invocations: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    terminated: AtomicUsize,
    recognized: Mutex<Vec<(String, u8)>>,
}

impl Script {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            overrides: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            fail_init: AtomicBool::new(false),
            hold_init: AtomicBool::new(false),
            init_gate: Semaphore::new(0),
            hold_recognition: AtomicBool::new(false),
            recognition_gate: Semaphore::new(0),
            init_calls: AtomicUsize::new(0),
            invocations: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            terminated: AtomicUsize::new(0),
            recognized: Mutex::new(Vec::new()),
        })
    }

    pub fn backend(self: &Arc<Self>) -> Arc<dyn RecognitionBackend> {
        Arc::new(ScriptedBackend(Arc::clone(self)))
    }

    /// Answer `text` for pages tagged `tag`
    pub fn set_text(&self, tag: u8, text: &str) {
        self.overrides.lock().insert(tag, text.to_string());
    }

    pub fn set_failing(&self, tag: u8, failing: bool) {
        let mut set = self.failing.lock();
        if failing {
            set.insert(tag);
        } else {
            set.remove(&tag);
        }
    }

    pub fn fail_init(&self, fail: bool) {
        self.fail_init.store(fail, Ordering::SeqCst);
    }

    /// Block engine creation until [`Script::release_init`]
    pub fn hold_init(&self, hold: bool) {
        self.hold_init.store(hold, Ordering::SeqCst);
    }

    pub fn release_init(&self, count: usize) {
        self.init_gate.add_permits(count);
    }

    /// Block recognitions until [`Script::release_recognitions`]
    pub fn hold_recognitions(&self, hold: bool) {
        self.hold_recognition.store(hold, Ordering::SeqCst);
    }

    pub fn release_recognitions(&self, count: usize) {
        self.recognition_gate.add_permits(count);
    }

    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    /// Recognitions started, including failed ones
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Most recognitions ever running at once
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn terminated(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }

    /// `(language, tag)` of every successful recognition, in order
    pub fn recognized(&self) -> Vec<(String, u8)> {
        self.recognized.lock().clone()
    }
}

struct ScriptedBackend(Arc<Script>);

#[async_trait]
impl RecognitionBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn create_engine(
        &self,
        language: &Language,
        status: StatusCallback,
    ) -> Result<Arc<dyn RecognitionEngine>> {
        let script = &self.0;
        script.init_calls.fetch_add(1, Ordering::SeqCst);

        status(status::LOADING_CORE, 0.5);
        status(status::LOADING_CORE, 1.0);
        status("warming up caches", 0.3);
        status(status::CORE_READY, 1.0);
        status(status::LOADING_LANGUAGE, 0.5);
        status(status::LANGUAGE_READY, 1.0);

        if script.hold_init.load(Ordering::SeqCst) {
            if let Ok(permit) = script.init_gate.acquire().await {
                permit.forget();
            }
        }
        if script.fail_init.load(Ordering::SeqCst) {
            return Err(OcrError::EngineInit("scripted init failure".to_string()));
        }

        status(status::API_READY, 1.0);
        Ok(Arc::new(ScriptedEngine {
            script: Arc::clone(script),
            language: language.clone(),
            status,
            cancel: CancellationToken::new(),
        }))
    }
}

struct ScriptedEngine {
    script: Arc<Script>,
    language: Language,
    status: StatusCallback,
    cancel: CancellationToken,
}

impl ScriptedEngine {
    async fn answer(&self, tag: u8) -> Result<String> {
        let script = &self.script;
        if script.hold_recognition.load(Ordering::SeqCst) {
            tokio::select! {
                permit = script.recognition_gate.acquire() => {
                    if let Ok(permit) = permit {
                        permit.forget();
                    }
                }
                _ = self.cancel.cancelled() => return Err(OcrError::Terminated),
            }
        }
        if self.cancel.is_cancelled() {
            return Err(OcrError::Terminated);
        }
        if script.failing.lock().contains(&tag) {
            return Err(OcrError::Recognition(format!("scripted failure on {}", tag)));
        }

        (self.status)(status::RECOGNIZING_TEXT, 1.0);
        let language = self.language.code().to_string();
        script.recognized.lock().push((language.clone(), tag));
        Ok(script
            .overrides
            .lock()
            .get(&tag)
            .cloned()
            .unwrap_or_else(|| format!("{} text {}\n", language, tag)))
    }
}

#[async_trait]
impl RecognitionEngine for ScriptedEngine {
    fn language(&self) -> &Language {
        &self.language
    }

    async fn recognize(&self, surface: &RasterSurface) -> Result<String> {
        let tag = surface.data.first().copied().unwrap_or_default();
        let script = &self.script;
        script.invocations.fetch_add(1, Ordering::SeqCst);
        let active = script.active.fetch_add(1, Ordering::SeqCst) + 1;
        script.max_active.fetch_max(active, Ordering::SeqCst);

        (self.status)(status::RECOGNIZING_TEXT, 0.0);
        let result = self.answer(tag).await;

        script.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn terminate(&self) -> Result<()> {
        self.cancel.cancel();
        self.script.terminated.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A small rendered page carrying `tag`
pub fn page_surface(tag: u8) -> RasterSurface {
    RasterSurface::filled(32, 32, [tag, 0, 0, 255])
}

pub fn lang(code: &str) -> Language {
    Language::new(code).unwrap()
}

pub fn service(script: &Arc<Script>) -> Arc<OcrService> {
    service_with(OcrConfig::default(), script)
}

pub fn service_with(config: OcrConfig, script: &Arc<Script>) -> Arc<OcrService> {
    Arc::new(OcrService::new(&config, script.backend()))
}

/// Poll `condition` until it holds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}

/// Next event matching `predicate`
pub async fn next_event(
    events: &mut broadcast::Receiver<OcrEvent>,
    mut predicate: impl FnMut(&OcrEvent) -> bool,
) -> OcrEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("expected event never arrived")
}

/// Wait for a fresh (non-cached) result for `fingerprint`, returning its text
pub async fn recognized(events: &mut broadcast::Receiver<OcrEvent>, fingerprint: &str) -> String {
    let event = next_event(events, |event| {
        matches!(
            event,
            OcrEvent::Recognized { fingerprint: f, cached: false, .. } if f.to_string() == fingerprint
        )
    })
    .await;
    match event {
        OcrEvent::Recognized { text, .. } => text,
        _ => unreachable!(),
    }
}
