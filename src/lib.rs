//! PageLens - OCR orchestration for a paginated document viewer
//!
//! Manages a single recognition engine, coalesces page recognition requests
//! against it and caches results by page, scale and language.

pub mod config;
pub mod error;
pub mod language;
pub mod ocr;
pub mod session;
pub mod storage;
pub mod surface;
pub mod vision;

pub use config::OcrConfig;
pub use error::{OcrError, Result};
pub use language::Language;
pub use ocr::{EngineState, Fingerprint, OcrEvent, OcrService, PageId};
pub use session::ViewerSession;
pub use surface::RasterSurface;
