//! Tesseract backend
//!
//! Drives the `tesseract` command-line tool. Initialization checks that the
//! binary runs and that traineddata for the requested language is installed;
//! each recognition writes the surface as PNG into a scratch directory and
//! reads the text back from stdout.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::sync::Arc;
use tokio::process::Command;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::engine::{RecognitionBackend, RecognitionEngine, StatusCallback};
use crate::config::TesseractSettings;
use crate::error::{OcrError, Result};
use crate::language::Language;
use crate::ocr::progress::status;
use crate::surface::RasterSurface;

/// Builds [`TesseractEngine`]s
#[derive(Debug, Clone, Default)]
pub struct TesseractBackend {
    settings: TesseractSettings,
}

impl TesseractBackend {
    pub fn new(settings: TesseractSettings) -> Self {
        Self { settings }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.settings.binary);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        let mut command = self.command();
        command.args(args);
        if let Some(dir) = &self.settings.tessdata_dir {
            command.arg("--tessdata-dir").arg(dir);
        }
        command.output().await.map_err(|e| self.spawn_error(e))
    }

    fn spawn_error(&self, error: std::io::Error) -> OcrError {
        if error.kind() == std::io::ErrorKind::NotFound {
            OcrError::EngineUnavailable(format!(
                "{} not found (install tesseract-ocr)",
                self.settings.binary.display()
            ))
        } else {
            OcrError::Io(error)
        }
    }

    /// Languages with traineddata installed
    pub async fn installed_languages(&self) -> Result<Vec<String>> {
        let output = self.run(&["--list-langs"]).await?;
        if !output.status.success() {
            return Err(OcrError::EngineInit(format!(
                "tesseract --list-langs failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(parse_language_list(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[async_trait]
impl RecognitionBackend for TesseractBackend {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    async fn create_engine(
        &self,
        language: &Language,
        status: StatusCallback,
    ) -> Result<Arc<dyn RecognitionEngine>> {
        status(status::LOADING_CORE, 0.0);
        let output = self.run(&["--version"]).await?;
        if !output.status.success() {
            return Err(OcrError::EngineInit(format!(
                "tesseract --version exited with {}",
                output.status
            )));
        }
        // Tesseract 4 prints its version on stderr, 5 on stdout
        let banner = if output.stdout.is_empty() { &output.stderr } else { &output.stdout };
        let version = String::from_utf8_lossy(banner)
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
        status(status::LOADING_CORE, 1.0);

        status(status::INITIALIZING_CORE, 1.0);
        status(status::CORE_READY, 1.0);
        debug!("Found {}", version);

        status(status::LOADING_LANGUAGE, 0.0);
        let installed = self.installed_languages().await?;
        if !installed.iter().any(|code| code == language.code()) {
            return Err(OcrError::EngineInit(format!(
                "no traineddata installed for '{}'",
                language
            )));
        }
        status(status::LOADING_LANGUAGE, 1.0);
        status(status::LANGUAGE_READY, 1.0);

        status(status::STARTING_API, 1.0);
        status(status::API_READY, 1.0);
        info!("Tesseract engine ready for {} ({})", language.display_name(), version);

        Ok(Arc::new(TesseractEngine {
            settings: self.settings.clone(),
            language: language.clone(),
            status,
            cancel: CancellationToken::new(),
        }))
    }
}

/// One language-bound Tesseract engine
pub struct TesseractEngine {
    settings: TesseractSettings,
    language: Language,
    status: StatusCallback,
    cancel: CancellationToken,
}

#[async_trait]
impl RecognitionEngine for TesseractEngine {
    fn language(&self) -> &Language {
        &self.language
    }

    async fn recognize(&self, surface: &RasterSurface) -> Result<String> {
        if self.cancel.is_cancelled() {
            return Err(OcrError::Terminated);
        }
        (self.status)(status::RECOGNIZING_TEXT, 0.0);

        // scratch is removed when dropped
        let (_scratch, input) = stage_page(surface.clone()).await?;
        (self.status)(status::RECOGNIZING_TEXT, 0.1);

        let mut command = Command::new(&self.settings.binary);
        command
            .arg(&input)
            .arg("stdout")
            .args(["-l", self.language.code()]);
        if let Some(dir) = &self.settings.tessdata_dir {
            command.arg("--tessdata-dir").arg(dir);
        }
        if let Some(psm) = self.settings.page_segmentation_mode {
            command.args(["--psm", &psm.to_string()]);
        }
        let child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // dropping the wait future kills the child
        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            _ = self.cancel.cancelled() => return Err(OcrError::Terminated),
        };

        if !output.status.success() {
            return Err(OcrError::Recognition(format!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        (self.status)(status::RECOGNIZING_TEXT, 1.0);
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn terminate(&self) -> Result<()> {
        debug!("Terminating tesseract engine for {}", self.language);
        self.cancel.cancel();
        Ok(())
    }
}

/// Encode `surface` as PNG into a fresh scratch directory, off the async workers
async fn stage_page(surface: RasterSurface) -> Result<(TempDir, PathBuf)> {
    tokio::task::spawn_blocking(move || -> Result<(TempDir, PathBuf)> {
        let scratch = tempfile::Builder::new().prefix("pagelens").tempdir()?;
        let input = scratch.path().join("page.png");
        std::fs::write(&input, surface.to_png()?)?;
        Ok((scratch, input))
    })
    .await
    .map_err(|e| OcrError::Recognition(format!("page encoding task failed: {}", e)))?
}

/// Parse `tesseract --list-langs` output, skipping the header line
fn parse_language_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("List of available languages"))
        .map(str::to_string)
        .collect()
}
