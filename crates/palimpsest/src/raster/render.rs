//! Page rasterization.

use crate::core::config::RenderConfig;
use crate::types::PageSource;
use crate::utils::{run_tool, stderr_tail};
use crate::{PalimpsestError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

/// What to render and where.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    pub source: &'a PageSource,
    pub dpi: u32,
    /// Leave vector text out of the raster.
    pub filter_text: bool,
    /// Where a rendered PNG is written.
    pub output: &'a Path,
}

/// A raster of the displayed page.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPage {
    pub path: PathBuf,
    pub dpi: f64,
}

#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn render(&self, request: &RenderRequest<'_>, cancel: &CancellationToken) -> Result<RenderedPage>;
}

/// Renders PDF pages with Ghostscript. Image pages are used as they are.
#[derive(Debug, Clone)]
pub struct GhostscriptRasterizer {
    program: String,
    timeout: Duration,
}

impl GhostscriptRasterizer {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn from_config(config: &RenderConfig) -> Self {
        Self::new(config.ghostscript_program.clone(), Duration::from_secs(config.timeout_secs))
    }

    fn args(input: &Path, page_number: u32, request: &RenderRequest<'_>) -> Vec<String> {
        let mut args = vec![
            "-dQUIET".to_string(),
            "-dSAFER".to_string(),
            "-dBATCH".to_string(),
            "-dNOPAUSE".to_string(),
            "-sDEVICE=png16m".to_string(),
            format!("-r{}", request.dpi),
            format!("-dFirstPage={}", page_number),
            format!("-dLastPage={}", page_number),
        ];
        if request.filter_text {
            args.push("-dFILTERTEXT".to_string());
        }
        args.push("-o".to_string());
        args.push(request.output.display().to_string());
        args.push(input.display().to_string());
        args
    }
}

#[async_trait]
impl Rasterizer for GhostscriptRasterizer {
    async fn render(&self, request: &RenderRequest<'_>, cancel: &CancellationToken) -> Result<RenderedPage> {
        let (path, page_number) = match request.source {
            PageSource::Image { path, dpi } => {
                return Ok(RenderedPage {
                    path: path.clone(),
                    dpi: *dpi,
                });
            }
            PageSource::PdfPage { path, page_number } => (path, *page_number),
        };

        if cancel.is_cancelled() {
            return Err(PalimpsestError::cancelled("before rasterization"));
        }

        tracing::debug!(page = page_number, dpi = request.dpi, filter_text = request.filter_text, "Rasterizing page");
        let output = run_tool(&self.program, Self::args(path, page_number, request), self.timeout, cancel).await?;

        if !output.success || !request.output.is_file() {
            return Err(PalimpsestError::engine(format!(
                "{} could not rasterize page {}: {}",
                self.program,
                page_number,
                stderr_tail(&output.stderr, 5)
            )));
        }

        Ok(RenderedPage {
            path: request.output.to_path_buf(),
            dpi: f64::from(request.dpi),
        })
    }
}
