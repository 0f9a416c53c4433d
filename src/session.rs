//! Viewer session
//!
//! The document and settings side of the viewer: knows which document is open
//! and which language is selected, and owns the rules for when cached results
//! become invalid.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::error::{OcrError, Result};
use crate::language::Language;
use crate::ocr::{EngineState, OcrService};
use crate::surface::RasterSurface;

/// The open document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentInfo {
    pub name: String,
    pub page_count: u32,
}

/// Ties document and language changes to the OCR service
pub struct ViewerSession {
    service: Arc<OcrService>,
    document: RwLock<Option<DocumentInfo>>,
    language: Mutex<Language>,
}

impl ViewerSession {
    pub fn new(service: Arc<OcrService>) -> Self {
        let language = service.active_language();
        Self {
            service,
            document: RwLock::new(None),
            language: Mutex::new(language),
        }
    }

    pub fn service(&self) -> &Arc<OcrService> {
        &self.service
    }

    /// Switch to a new document; results for the previous one are dropped
    pub fn open_document(&self, name: impl Into<String>, page_count: u32) {
        let document = DocumentInfo {
            name: name.into(),
            page_count,
        };
        info!("Opened {} ({} pages)", document.name, document.page_count);
        *self.document.write() = Some(document);
        self.service.clear_cache();
    }

    pub fn close_document(&self) {
        *self.document.write() = None;
        self.service.clear_cache();
    }

    pub fn document(&self) -> Option<DocumentInfo> {
        self.document.read().clone()
    }

    pub fn language(&self) -> Language {
        self.language.lock().clone()
    }

    /// Select a recognition language.
    ///
    /// Only an actual change clears the cache and rebuilds the engine.
    pub async fn set_language(&self, language: Language) -> EngineState {
        {
            let mut current = self.language.lock();
            if *current == language {
                return self.service.engine_state();
            }
            *current = language.clone();
        }
        info!("Language changed to {}", language.display_name());
        self.service.clear_cache();
        self.service.initialize(language).await
    }

    /// Build the engine for the selected language, or rebuild it after a failure
    pub async fn retry_engine(&self) -> EngineState {
        let language = self.language();
        self.service.initialize(language).await
    }

    /// Recognize a page that just finished rendering
    pub async fn show_page(
        &self,
        page: u32,
        surface: impl Into<Arc<RasterSurface>>,
        scale: f64,
    ) -> Result<Option<String>> {
        self.check_page(page)?;
        Ok(self.service.run_ocr(surface, page, scale, false).await)
    }

    /// Recognize a page again even if a result is cached
    pub async fn rerun_page(
        &self,
        page: u32,
        surface: impl Into<Arc<RasterSurface>>,
        scale: f64,
    ) -> Result<Option<String>> {
        self.check_page(page)?;
        Ok(self.service.run_ocr(surface, page, scale, true).await)
    }

    /// Pages are numbered from 1
    fn check_page(&self, page: u32) -> Result<()> {
        let document = self.document.read();
        let document = document.as_ref().ok_or(OcrError::NoDocument)?;
        if page == 0 || page > document.page_count {
            return Err(OcrError::PageOutOfRange {
                page,
                page_count: document.page_count,
            });
        }
        Ok(())
    }
}
