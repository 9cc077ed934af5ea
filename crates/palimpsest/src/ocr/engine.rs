//! Recognition engine contract.

use crate::Result;
use crate::ocr::hocr::HocrPage;
use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// What the engine is asked to recognize.
#[derive(Debug, Clone, Copy)]
pub struct OcrRequest<'a> {
    /// Raster to recognize.
    pub image: &'a Path,
    /// Language code(s), e.g. `eng+deu`.
    pub language: &'a str,
    /// One-based page number.
    pub page_number: usize,
    /// Resolution of `image`.
    pub dpi: f64,
}

/// A recognition engine that turns a page raster into hOCR.
///
/// Engines report failures as [`PalimpsestError::Engine`](crate::PalimpsestError::Engine),
/// which the page stage treats as recoverable. Engines must check `cancel` before starting
/// expensive work and return [`PalimpsestError::Cancelled`](crate::PalimpsestError::Cancelled)
/// if it is set.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Name used by `ocr.engine` and `choose-ocr-engine`.
    fn name(&self) -> &str;

    async fn recognize(&self, request: &OcrRequest<'_>, cancel: &CancellationToken) -> Result<HocrPage>;
}
