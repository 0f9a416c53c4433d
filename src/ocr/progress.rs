//! Two-phase progress model and rolling status log
//!
//! Engines emit `(status_key, fraction)` pairs. During initialization each
//! status names a phase with its own 0..1 sub-progress, which on its own is not
//! monotonic across phases. [`INIT_PHASES`] gives every phase a fixed band of
//! the overall percentage so the combined number only moves forward.

use chrono::{DateTime, Local};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, info};

use super::events::{publish, EventSender, OcrEvent};

/// Status keys engines report
pub mod status {
    pub const LOADING_CORE: &str = "loading tesseract core";
    pub const INITIALIZING_CORE: &str = "initializing tesseract";
    pub const CORE_READY: &str = "initialized tesseract";
    pub const LOADING_LANGUAGE: &str = "loading language traineddata";
    pub const LANGUAGE_READY: &str = "loaded language traineddata";
    pub const STARTING_API: &str = "initializing api";
    pub const API_READY: &str = "initialized api";
    pub const RECOGNIZING_TEXT: &str = "recognizing text";
}

/// One initialization phase and its share of the overall percentage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitPhase {
    /// Lowercase status key prefix
    pub key: &'static str,
    /// Label shown next to the progress bar
    pub label: &'static str,
    pub from: u8,
    pub to: u8,
}

/// Ordered initialization phases; bands never overlap or regress
pub const INIT_PHASES: &[InitPhase] = &[
    InitPhase { key: status::LOADING_CORE, label: "Loading OCR core", from: 0, to: 20 },
    InitPhase { key: status::INITIALIZING_CORE, label: "Initializing OCR core", from: 20, to: 40 },
    InitPhase { key: status::CORE_READY, label: "OCR core ready", from: 40, to: 50 },
    InitPhase { key: status::LOADING_LANGUAGE, label: "Loading language data", from: 50, to: 85 },
    InitPhase { key: status::LANGUAGE_READY, label: "Language data ready", from: 85, to: 90 },
    InitPhase { key: status::STARTING_API, label: "Starting recognition engine", from: 90, to: 99 },
    InitPhase { key: status::API_READY, label: "Recognition engine ready", from: 99, to: 99 },
];

pub const LABEL_IDLE: &str = "Not started";
pub const LABEL_STARTING: &str = "Initializing";
pub const LABEL_READY: &str = "Ready";
pub const LABEL_FAILED: &str = "Failed";

/// Find the phase a status key belongs to
pub fn match_phase(status_key: &str) -> Option<&'static InitPhase> {
    let key = status_key.trim().to_lowercase();
    INIT_PHASES.iter().find(|phase| key.starts_with(phase.key))
}

/// Overall percentage for a fraction of `phase`
pub fn phase_percent(phase: &InitPhase, fraction: f32) -> u8 {
    let span = (phase.to - phase.from) as f32;
    (phase.from as f32 + span * fraction.clamp(0.0, 1.0)).round() as u8
}

/// Engine initialization progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitProgress {
    /// 0-100
    pub percent: u8,
    pub label: String,
}

impl InitProgress {
    fn new(percent: u8, label: &str) -> Self {
        Self {
            percent,
            label: label.to_string(),
        }
    }
}

impl Default for InitProgress {
    fn default() -> Self {
        Self::new(0, LABEL_IDLE)
    }
}

/// Timestamped log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub at: DateTime<Local>,
    pub message: String,
}

impl LogEntry {
    /// `HH:MM:SS`, 24-hour
    pub fn timestamp(&self) -> String {
        self.at.format("%H:%M:%S").to_string()
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp(), self.message)
    }
}

#[derive(Debug, Default)]
struct ProgressState {
    init: InitProgress,
    recognition: u8,
}

/// Normalizes engine status events and keeps the rolling log
pub struct ProgressReporter {
    state: RwLock<ProgressState>,
    /// Newest first
    log: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
    events: EventSender,
}

impl ProgressReporter {
    pub fn new(capacity: usize, events: EventSender) -> Self {
        Self {
            state: RwLock::new(ProgressState::default()),
            log: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            events,
        }
    }

    /// Feed one engine status event. Unknown keys and non-finite fractions are ignored.
    pub fn on_engine_event(&self, status_key: &str, fraction: f32) {
        if !fraction.is_finite() {
            debug!("Ignoring status {:?} with fraction {}", status_key, fraction);
            return;
        }

        if status_key.trim().eq_ignore_ascii_case(status::RECOGNIZING_TEXT) {
            let percent = (fraction * 100.0).round().clamp(0.0, 100.0) as u8;
            self.set_recognition_progress(percent);
            return;
        }

        match match_phase(status_key) {
            Some(phase) => self.set_init_progress(InitProgress::new(
                phase_percent(phase, fraction),
                phase.label,
            )),
            None => debug!("Ignoring unknown engine status {:?}", status_key),
        }
    }

    /// Append a timestamped entry, dropping the oldest past capacity
    pub fn log(&self, message: impl Into<String>) {
        let entry = LogEntry {
            at: Local::now(),
            message: message.into(),
        };
        info!("{}", entry.message);
        {
            let mut log = self.log.lock();
            log.push_front(entry.clone());
            log.truncate(self.capacity);
        }
        publish(&self.events, OcrEvent::Log(entry));
    }

    /// Log entries, newest first
    pub fn entries(&self) -> Vec<LogEntry> {
        self.log.lock().iter().cloned().collect()
    }

    pub fn init_progress(&self) -> InitProgress {
        self.state.read().init.clone()
    }

    pub fn recognition_progress(&self) -> u8 {
        self.state.read().recognition
    }

    pub(crate) fn begin_initialization(&self) {
        self.set_init_progress(InitProgress::new(0, LABEL_STARTING));
    }

    pub(crate) fn mark_ready(&self) {
        self.set_init_progress(InitProgress::new(100, LABEL_READY));
    }

    pub(crate) fn mark_failed(&self) {
        self.set_init_progress(InitProgress::new(0, LABEL_FAILED));
    }

    pub(crate) fn reset_recognition(&self) {
        self.set_recognition_progress(0);
    }

    fn set_init_progress(&self, progress: InitProgress) {
        {
            let mut state = self.state.write();
            if state.init == progress {
                return;
            }
            state.init = progress.clone();
        }
        publish(&self.events, OcrEvent::InitProgress(progress));
    }

    fn set_recognition_progress(&self, percent: u8) {
        {
            let mut state = self.state.write();
            if state.recognition == percent {
                return;
            }
            state.recognition = percent;
        }
        publish(&self.events, OcrEvent::RecognitionProgress(percent));
    }
}
