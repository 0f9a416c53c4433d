//! Error types for the OCR core

use thiserror::Error;

/// Errors raised by engines, preprocessing and configuration checks.
///
/// None of these escape [`crate::ocr::OcrService::run_ocr`]; the coordinator
/// turns them into a `None` result plus a log entry.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Engine not available: {0}")]
    EngineUnavailable(String),

    #[error("Engine initialization failed: {0}")]
    EngineInit(String),

    #[error("Recognition failed: {0}")]
    Recognition(String),

    #[error("Engine was terminated")]
    Terminated,

    #[error("Recognition timed out after {0}s")]
    Timeout(u64),

    #[error("No document is open")]
    NoDocument,

    #[error("Page {page} is out of range (document has {page_count} pages)")]
    PageOutOfRange { page: u32, page_count: u32 },

    #[error("Invalid raster surface: {0}")]
    InvalidSurface(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, OcrError>;
