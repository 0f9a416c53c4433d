//! PageLens - recognize text on rendered document pages
//!
//! Each image given on the command line is treated as one rendered page of a
//! document, in order.

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use pagelens::config::{self, BackendKind, OcrConfig};
use pagelens::language::SUPPORTED_LANGUAGES;
use pagelens::vision::{self, TesseractBackend};
use pagelens::{EngineState, Language, OcrService, RasterSurface, ViewerSession};

/// PageLens - OCR for rendered document pages
#[derive(Parser, Debug)]
#[command(name = "pagelens")]
#[command(about = "Recognize text on rendered document pages")]
struct Args {
    /// Page images, one per page in document order
    #[arg(required_unless_present = "list_languages")]
    pages: Vec<PathBuf>,

    /// Recognition language code (eng, fra, chi_sim, ...)
    #[arg(short, long)]
    language: Option<Language>,

    /// Render scale the pages were produced at
    #[arg(short, long, default_value = "1.0")]
    scale: f64,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// List supported languages and exit
    #[arg(long)]
    list_languages: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Serialize)]
struct PageResult {
    page: u32,
    file: PathBuf,
    fingerprint: String,
    text: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = load_or_default_config(args.config.as_deref())?;
    if let Some(language) = args.language.clone() {
        config.general.language = language;
    }

    if args.list_languages {
        return list_languages(&config).await;
    }

    let backend = vision::backend_from_config(&config)?;
    let service = Arc::new(OcrService::new(&config, backend));
    let session = ViewerSession::new(Arc::clone(&service));

    let page_count = u32::try_from(args.pages.len()).context("Too many pages")?;
    session.open_document("command line", page_count);

    if session.retry_engine().await != EngineState::Ready {
        for entry in service.log_entries().iter().rev() {
            eprintln!("{}", entry);
        }
        bail!("OCR engine failed to initialize");
    }

    let mut results = Vec::with_capacity(args.pages.len());
    for (page, path) in (1..=page_count).zip(&args.pages) {
        let surface = RasterSurface::open(path)
            .with_context(|| format!("Failed to load {}", path.display()))?;
        let text = session.show_page(page, surface, args.scale).await?;
        if text.is_none() {
            warn!("No result for page {} ({})", page, path.display());
        }
        results.push(PageResult {
            page,
            file: path.clone(),
            fingerprint: service.fingerprint(page, args.scale).to_string(),
            text,
        });
    }

    service.shutdown().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for result in &results {
            println!("=== Page {} ({}) ===", result.page, result.file.display());
            match result.text.as_deref() {
                Some("") => println!("(no text found)"),
                Some(text) => println!("{}", text),
                None => println!("(recognition failed)"),
            }
        }
    }

    info!("Processed {} pages", results.len());
    Ok(())
}

/// Load configuration from `path`, the platform config file, or defaults
fn load_or_default_config(path: Option<&Path>) -> Result<OcrConfig> {
    if let Some(path) = path {
        let config = config::load_config(path)
            .with_context(|| format!("Failed to load {}", path.display()))?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }

    if let Ok(config_path) = pagelens::storage::default_config_path() {
        if config_path.exists() {
            match config::load_config(&config_path) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", config_path);
                    return Ok(config);
                }
                Err(e) => warn!("Ignoring invalid {:?}: {:#}", config_path, e),
            }
        }
    }
    info!("Using default configuration");
    Ok(OcrConfig::default())
}

async fn list_languages(config: &OcrConfig) -> Result<()> {
    let installed = match config.recognition.backend {
        BackendKind::Tesseract => TesseractBackend::new(config.tesseract.clone())
            .installed_languages()
            .await
            .map_err(|e| warn!("Could not query tesseract: {}", e))
            .ok(),
        BackendKind::WindowsOcr => None,
    };

    println!("Supported languages:");
    for (code, name) in SUPPORTED_LANGUAGES {
        let marker = match &installed {
            Some(codes) if codes.iter().any(|c| c == code) => " (installed)",
            _ => "",
        };
        println!("  {:<8} {}{}", code, name, marker);
    }
    Ok(())
}
