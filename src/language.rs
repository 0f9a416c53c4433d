//! Recognition languages
//!
//! Codes follow Tesseract's traineddata naming (`eng`, `fra`, `chi_sim`...).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::OcrError;

/// Languages the viewer offers, as (code, display name).
pub const SUPPORTED_LANGUAGES: &[(&str, &str)] = &[
    ("eng", "English"),
    ("fra", "French"),
    ("deu", "German"),
    ("spa", "Spanish"),
    ("ita", "Italian"),
    ("por", "Portuguese"),
    ("nld", "Dutch"),
    ("rus", "Russian"),
    ("ara", "Arabic"),
    ("hin", "Hindi"),
    ("jpn", "Japanese"),
    ("kor", "Korean"),
    ("chi_sim", "Chinese (Simplified)"),
    ("chi_tra", "Chinese (Traditional)"),
];

/// A language code from [`SUPPORTED_LANGUAGES`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Language(String);

impl Language {
    /// Validate and wrap a language code
    pub fn new(code: &str) -> Result<Self, OcrError> {
        let code = code.trim();
        SUPPORTED_LANGUAGES
            .iter()
            .find(|(c, _)| c.eq_ignore_ascii_case(code))
            .map(|(c, _)| Self((*c).to_string()))
            .ok_or_else(|| OcrError::UnsupportedLanguage(code.to_string()))
    }

    pub fn code(&self) -> &str {
        &self.0
    }

    /// Human readable name for menus and logs
    pub fn display_name(&self) -> &'static str {
        SUPPORTED_LANGUAGES
            .iter()
            .find(|(c, _)| *c == self.0)
            .map(|(_, name)| *name)
            .unwrap_or("Unknown")
    }
}

impl Default for Language {
    fn default() -> Self {
        Self("eng".to_string())
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Language {
    type Err = OcrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Language {
    type Error = OcrError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Language> for String {
    fn from(language: Language) -> Self {
        language.0
    }
}
