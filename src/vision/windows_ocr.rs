//! Windows OCR API backend
//!
//! Uses the built-in Windows OCR (Media.Ocr). Engines are bound to the BCP-47
//! tag matching the viewer's language code; there is no fallback to the user
//! profile language because results are cached per language.

use anyhow::Context;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use windows::{
    core::HSTRING,
    Globalization::Language as WinLanguage,
    Graphics::Imaging::{BitmapPixelFormat, SoftwareBitmap},
    Media::Ocr::OcrEngine as WinOcrEngine,
    Storage::Streams::{DataReader, DataWriter, InMemoryRandomAccessStream},
};

use super::engine::{RecognitionBackend, RecognitionEngine, StatusCallback};
use crate::error::{OcrError, Result};
use crate::language::Language;
use crate::ocr::progress::status;
use crate::surface::RasterSurface;

/// Map a viewer language code to the tag Windows OCR expects
pub fn language_tag(language: &Language) -> &'static str {
    match language.code() {
        "fra" => "fr-FR",
        "deu" => "de-DE",
        "spa" => "es-ES",
        "ita" => "it-IT",
        "por" => "pt-PT",
        "nld" => "nl-NL",
        "rus" => "ru-RU",
        "ara" => "ar-SA",
        "hin" => "hi-IN",
        "jpn" => "ja-JP",
        "kor" => "ko-KR",
        "chi_sim" => "zh-Hans-CN",
        "chi_tra" => "zh-Hant-TW",
        _ => "en-US",
    }
}

/// Builds [`WindowsOcrEngine`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsOcrBackend;

impl WindowsOcrBackend {
    /// Get available OCR languages on this system
    pub fn available_languages() -> anyhow::Result<Vec<String>> {
        let languages = WinOcrEngine::AvailableRecognizerLanguages()
            .context("Failed to get available languages")?;

        let mut result = Vec::new();
        for i in 0..languages.Size().context("Failed to get languages size")? {
            if let Ok(lang) = languages.GetAt(i) {
                if let Ok(tag) = lang.LanguageTag() {
                    result.push(tag.to_string());
                }
            }
        }

        Ok(result)
    }
}

#[async_trait]
impl RecognitionBackend for WindowsOcrBackend {
    fn name(&self) -> &'static str {
        "windows_ocr"
    }

    async fn create_engine(
        &self,
        language: &Language,
        status: StatusCallback,
    ) -> Result<Arc<dyn RecognitionEngine>> {
        let tag = language_tag(language);
        info!("Initializing Windows OCR engine with language: {}", tag);

        status(status::LOADING_CORE, 1.0);
        status(status::INITIALIZING_CORE, 1.0);
        status(status::CORE_READY, 1.0);
        status(status::LOADING_LANGUAGE, 0.0);

        let engine = tokio::task::spawn_blocking(move || create_win_engine(tag))
            .await
            .map_err(|e| OcrError::EngineInit(e.to_string()))?
            .map_err(|e| OcrError::EngineInit(format!("{:#}", e)))?;

        status(status::LOADING_LANGUAGE, 1.0);
        status(status::LANGUAGE_READY, 1.0);
        status(status::STARTING_API, 1.0);
        status(status::API_READY, 1.0);
        info!("Windows OCR initialized successfully");

        Ok(Arc::new(WindowsOcrEngine {
            engine,
            language: language.clone(),
            status,
            terminated: AtomicBool::new(false),
        }))
    }
}

fn create_win_engine(tag: &str) -> anyhow::Result<WinOcrEngine> {
    let language = WinLanguage::CreateLanguage(&HSTRING::from(tag))
        .context("Failed to create language")?;

    if !WinOcrEngine::IsLanguageSupported(&language)
        .context("Failed to check language support")?
    {
        anyhow::bail!("OCR language pack '{}' is not installed", tag);
    }

    WinOcrEngine::TryCreateFromLanguage(&language)
        .context("Failed to create OCR engine for language")
}

/// Windows OCR engine bound to one language
pub struct WindowsOcrEngine {
    engine: WinOcrEngine,
    language: Language,
    status: StatusCallback,
    terminated: AtomicBool,
}

#[async_trait]
impl RecognitionEngine for WindowsOcrEngine {
    fn language(&self) -> &Language {
        &self.language
    }

    async fn recognize(&self, surface: &RasterSurface) -> Result<String> {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(OcrError::Terminated);
        }
        (self.status)(status::RECOGNIZING_TEXT, 0.0);

        let engine = self.engine.clone();
        let bgra = rgba_to_bgra(&surface.data);
        let (width, height) = surface.dimensions();
        debug!("Windows OCR: Processing {}x{} image", width, height);

        // RecognizeAsync().get() blocks, keep it off the async workers
        let text = tokio::task::spawn_blocking(move || -> anyhow::Result<String> {
            let bitmap = create_software_bitmap(&bgra, width, height)?;
            let result = engine
                .RecognizeAsync(&bitmap)
                .context("Failed to start OCR recognition")?
                .get()
                .context("OCR recognition failed")?;
            Ok(result.Text().context("Failed to get OCR text")?.to_string())
        })
        .await
        .map_err(|e| OcrError::Recognition(e.to_string()))?
        .map_err(|e| OcrError::Recognition(format!("{:#}", e)))?;

        // the blocking call cannot be interrupted; drop its result instead
        if self.terminated.load(Ordering::SeqCst) {
            return Err(OcrError::Terminated);
        }
        (self.status)(status::RECOGNIZING_TEXT, 1.0);
        Ok(text)
    }

    async fn terminate(&self) -> Result<()> {
        self.terminated.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Convert RGBA to BGRA (Windows expects BGRA)
fn rgba_to_bgra(rgba: &[u8]) -> Vec<u8> {
    let mut bgra = rgba.to_vec();
    for chunk in bgra.chunks_exact_mut(4) {
        chunk.swap(0, 2);
    }
    bgra
}

/// Create a SoftwareBitmap from BGRA data using CopyFromBuffer
fn create_software_bitmap(bgra_data: &[u8], width: u32, height: u32) -> anyhow::Result<SoftwareBitmap> {
    let stream = InMemoryRandomAccessStream::new().context("Failed to create in-memory stream")?;
    let writer = DataWriter::CreateDataWriter(&stream).context("Failed to create data writer")?;

    writer.WriteBytes(bgra_data).context("Failed to write pixel data")?;
    writer
        .StoreAsync()
        .context("Failed to start store operation")?
        .get()
        .context("Failed to store data")?;
    writer
        .FlushAsync()
        .context("Failed to start flush operation")?
        .get()
        .context("Failed to flush data")?;

    let bitmap = SoftwareBitmap::Create(BitmapPixelFormat::Bgra8, width as i32, height as i32)
        .context("Failed to create SoftwareBitmap")?;

    let input_stream = stream.GetInputStreamAt(0).context("Failed to get input stream")?;
    let reader = DataReader::CreateDataReader(&input_stream).context("Failed to create data reader")?;
    reader
        .LoadAsync(bgra_data.len() as u32)
        .context("Failed to start load operation")?
        .get()
        .context("Failed to load data")?;
    let buffer = reader
        .ReadBuffer(bgra_data.len() as u32)
        .context("Failed to read buffer")?;

    bitmap.CopyFromBuffer(&buffer).context("Failed to copy buffer to bitmap")?;

    Ok(bitmap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_tags() {
        assert_eq!(language_tag(&Language::new("eng").unwrap()), "en-US");
        assert_eq!(language_tag(&Language::new("chi_sim").unwrap()), "zh-Hans-CN");
    }

    #[test]
    fn test_rgba_to_bgra() {
        assert_eq!(rgba_to_bgra(&[1, 2, 3, 4]), vec![3, 2, 1, 4]);
    }

    #[test]
    #[ignore = "requires an installed Windows OCR language pack"]
    fn test_available_languages() {
        let langs = WindowsOcrBackend::available_languages().unwrap();
        assert!(!langs.is_empty());
    }
}
