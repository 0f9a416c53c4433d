//! Recognition result cache
//!
//! A missing key means the page was never processed; an empty string means it
//! was processed and no text was found. There is no eviction: the document and
//! settings layers clear the whole cache when the document or language changes.

use parking_lot::RwLock;
use std::collections::HashMap;

use super::fingerprint::Fingerprint;

/// Fingerprint-keyed store of recognized text
#[derive(Debug, Default)]
pub struct FingerprintCache {
    entries: RwLock<HashMap<Fingerprint, String>>,
}

impl FingerprintCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<String> {
        self.entries.read().get(fingerprint).cloned()
    }

    pub fn set(&self, fingerprint: Fingerprint, text: String) {
        self.entries.write().insert(fingerprint, text);
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.read().contains_key(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Copy of every entry, for display
    pub fn snapshot(&self) -> HashMap<Fingerprint, String> {
        self.entries.read().clone()
    }
}
