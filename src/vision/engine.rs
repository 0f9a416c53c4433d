//! Recognition capability seams
//!
//! A [`RecognitionBackend`] knows how to build an engine for one language; the
//! resulting [`RecognitionEngine`] is bound to that language for its whole life.
//! Both report progress through a [`StatusCallback`] using the phase names in
//! [`crate::ocr::progress`].

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::language::Language;
use crate::surface::RasterSurface;

/// Receives `(status_key, fraction)` pairs while an engine initializes or recognizes
pub type StatusCallback = Arc<dyn Fn(&str, f32) + Send + Sync>;

/// A status callback that drops everything
pub fn silent_status() -> StatusCallback {
    Arc::new(|_, _| {})
}

/// Factory for language-bound recognition engines
#[async_trait]
pub trait RecognitionBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Build an engine for `language`, streaming initialization phases to `status`.
    ///
    /// The same callback keeps receiving recognition progress for the lifetime
    /// of the returned engine.
    async fn create_engine(
        &self,
        language: &Language,
        status: StatusCallback,
    ) -> Result<Arc<dyn RecognitionEngine>>;
}

/// A live recognition engine
#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    /// Language this engine was built for
    fn language(&self) -> &Language;

    /// Extract the text on `surface`
    async fn recognize(&self, surface: &RasterSurface) -> Result<String>;

    /// Stop any in-progress recognition and release the engine.
    ///
    /// Callers treat teardown as best effort: an error here is logged and
    /// never blocks building a replacement engine.
    async fn terminate(&self) -> Result<()>;
}
