//! Application Configuration
//!
//! OCR settings stored in TOML format.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::language::Language;

/// OCR core settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// General settings
    pub general: GeneralConfig,
    /// Surface preprocessing settings
    pub preprocess: PreprocessSettings,
    /// Progress and log settings
    pub progress: ProgressSettings,
    /// Recognition engine settings
    pub recognition: RecognitionSettings,
    /// Tesseract backend settings
    pub tesseract: TesseractSettings,
}

/// General settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Active recognition language
    pub language: Language,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            language: Language::default(),
        }
    }
}

/// Surface preprocessing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessSettings {
    /// Largest width or height handed to the engine
    pub max_dimension: u32,
    /// Contrast factor applied to downscaled surfaces (1.0 = unchanged)
    pub contrast: f32,
    /// Convert downscaled surfaces to grayscale
    pub grayscale: bool,
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        Self {
            max_dimension: 2400,
            contrast: 1.2,
            grayscale: true,
        }
    }
}

/// Progress and log settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressSettings {
    /// Number of entries kept in the rolling log
    pub log_capacity: usize,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self { log_capacity: 50 }
    }
}

/// Which recognition engine to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Tesseract command-line tool
    #[default]
    Tesseract,
    /// Windows built-in OCR
    WindowsOcr,
}

/// Recognition engine settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionSettings {
    /// Engine backend
    pub backend: BackendKind,
    /// Give up on a single recognition after this many seconds
    pub timeout_secs: Option<u64>,
}

/// Tesseract backend settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseractSettings {
    /// Executable name or path
    pub binary: PathBuf,
    /// Directory holding `*.traineddata` files
    pub tessdata_dir: Option<PathBuf>,
    /// Page segmentation mode passed as `--psm`
    pub page_segmentation_mode: Option<u8>,
}

impl Default for TesseractSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            tessdata_dir: None,
            page_segmentation_mode: None,
        }
    }
}

impl OcrConfig {
    /// Reject settings the core cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.preprocess.max_dimension == 0 {
            bail!("preprocess.max_dimension must be greater than zero");
        }
        if self.preprocess.contrast.is_nan() || self.preprocess.contrast <= 0.0 {
            bail!("preprocess.contrast must be positive");
        }
        if self.progress.log_capacity == 0 {
            bail!("progress.log_capacity must be greater than zero");
        }
        if self.recognition.timeout_secs == Some(0) {
            bail!("recognition.timeout_secs must be greater than zero when set");
        }
        if let Some(psm) = self.tesseract.page_segmentation_mode {
            if psm > 13 {
                bail!("tesseract.page_segmentation_mode must be between 0 and 13");
            }
        }
        Ok(())
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<OcrConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: OcrConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &OcrConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
