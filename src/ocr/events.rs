//! Observable OCR events
//!
//! The UI layer subscribes to these instead of polling. Results of replayed
//! and drained requests are only ever reported here, since their original
//! callers already got `None` back.

use tokio::sync::broadcast;

use super::fingerprint::Fingerprint;
use super::lifecycle::EngineState;
use super::progress::{InitProgress, LogEntry};
use crate::language::Language;

/// Buffered events per subscriber before the slowest one starts lagging
pub const EVENT_CAPACITY: usize = 256;

/// Something observable changed in the OCR core
#[derive(Debug, Clone)]
pub enum OcrEvent {
    /// Engine lifecycle transition
    EngineStateChanged {
        state: EngineState,
        language: Language,
    },
    /// Initialization progress moved
    InitProgress(InitProgress),
    /// Recognition progress moved (0-100)
    RecognitionProgress(u8),
    /// A line was added to the rolling log
    Log(LogEntry),
    /// Text is available for a fingerprint
    Recognized {
        fingerprint: Fingerprint,
        text: String,
        /// Served from the cache without touching the engine
        cached: bool,
    },
    /// A recognition attempt failed; nothing was cached
    RecognitionFailed {
        fingerprint: Fingerprint,
        message: String,
    },
}

pub type EventSender = broadcast::Sender<OcrEvent>;

/// Create the broadcast channel shared by the OCR components
pub fn channel() -> EventSender {
    let (tx, _) = broadcast::channel(EVENT_CAPACITY);
    tx
}

/// Publish to whoever is listening; having no subscribers is fine
pub(crate) fn publish(events: &EventSender, event: OcrEvent) {
    let _ = events.send(event);
}
