//! Cache keys for recognition results

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::language::Language;

/// Identifies a page within the open document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PageId {
    /// Page number
    Number(u32),
    /// Stable caller-supplied key
    Key(String),
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageId::Number(n) => write!(f, "{}", n),
            PageId::Key(key) => f.write_str(key),
        }
    }
}

impl From<u32> for PageId {
    fn from(page: u32) -> Self {
        PageId::Number(page)
    }
}

impl From<&str> for PageId {
    fn from(key: &str) -> Self {
        PageId::Key(key.to_string())
    }
}

impl From<String> for PageId {
    fn from(key: String) -> Self {
        PageId::Key(key)
    }
}

/// `(page, scale to 2 decimals, language)` key for one recognition result.
///
/// Equal inputs always give equal fingerprints. The string form is only
/// stable across runs when callers use stable page identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Fingerprint {
    page: PageId,
    scale: String,
    language: String,
}

impl Fingerprint {
    pub fn new(page: &PageId, scale: f64, language: &Language) -> Self {
        Self {
            page: page.clone(),
            scale: format!("{:.2}", scale),
            language: language.code().to_string(),
        }
    }

    pub fn page(&self) -> &PageId {
        &self.page
    }

    /// Scale as rendered into the key, e.g. `"1.00"`
    pub fn scale(&self) -> &str {
        &self.scale
    }

    pub fn language(&self) -> &str {
        &self.language
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.page, self.scale, self.language)
    }
}
