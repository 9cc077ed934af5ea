//! Engine that replays hOCR produced earlier.
//!
//! Looks for `page-NNNN.hocr` (one-based, zero-padded) in a directory, or for an `.hocr` file
//! next to the page image.

use crate::ocr::engine::{OcrEngine, OcrRequest};
use crate::ocr::hocr::HocrPage;
use crate::{PalimpsestError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

pub const SIDECAR_ENGINE: &str = "sidecar";

/// File name of the sidecar for a one-based page number.
pub fn sidecar_path(dir: &Path, page_number: usize) -> PathBuf {
    dir.join(format!("page-{:04}.hocr", page_number))
}

#[derive(Debug, Clone, Default)]
pub struct SidecarEngine {
    dir: Option<PathBuf>,
}

impl SidecarEngine {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    fn locate(&self, request: &OcrRequest<'_>) -> Option<PathBuf> {
        if let Some(dir) = &self.dir {
            let path = sidecar_path(dir, request.page_number);
            if path.is_file() {
                return Some(path);
            }
        }
        let beside = request.image.with_extension("hocr");
        beside.is_file().then_some(beside)
    }
}

#[async_trait]
impl OcrEngine for SidecarEngine {
    fn name(&self) -> &str {
        SIDECAR_ENGINE
    }

    async fn recognize(&self, request: &OcrRequest<'_>, cancel: &CancellationToken) -> Result<HocrPage> {
        if cancel.is_cancelled() {
            return Err(PalimpsestError::cancelled("before recognition"));
        }

        let path = self.locate(request).ok_or_else(|| {
            PalimpsestError::engine(format!("No hOCR sidecar found for page {}", request.page_number))
        })?;

        tracing::debug!(page = request.page_number, path = %path.display(), "Reading hOCR sidecar");
        let hocr = tokio::fs::read_to_string(&path).await?;
        HocrPage::parse(&hocr)
    }
}
