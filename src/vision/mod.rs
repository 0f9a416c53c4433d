//! Vision Layer
//!
//! Recognition engines and the surface preprocessing that runs before them.
//! Supported backends:
//! - Tesseract command-line tool (all platforms)
//! - Windows OCR API (Windows only)

pub mod engine;
pub mod preprocess;
pub mod tesseract;
#[cfg(windows)]
pub mod windows_ocr;

use std::sync::Arc;

use crate::config::{BackendKind, OcrConfig};
use crate::error::{OcrError, Result};

pub use engine::{silent_status, RecognitionBackend, RecognitionEngine, StatusCallback};
pub use preprocess::ImagePreprocessor;
pub use tesseract::TesseractBackend;
#[cfg(windows)]
pub use windows_ocr::WindowsOcrBackend;

/// Build the backend selected in the configuration
pub fn backend_from_config(config: &OcrConfig) -> Result<Arc<dyn RecognitionBackend>> {
    match config.recognition.backend {
        BackendKind::Tesseract => Ok(Arc::new(TesseractBackend::new(config.tesseract.clone()))),
        #[cfg(windows)]
        BackendKind::WindowsOcr => Ok(Arc::new(WindowsOcrBackend)),
        #[cfg(not(windows))]
        BackendKind::WindowsOcr => Err(OcrError::EngineUnavailable(
            "Windows OCR is only available on Windows".to_string(),
        )),
    }
}
