//! Tesseract command-line engine.

use crate::core::config::OcrConfig;
use crate::ocr::engine::{OcrEngine, OcrRequest};
use crate::ocr::hocr::HocrPage;
use crate::utils::{run_tool, stderr_tail};
use crate::{PalimpsestError, Result};
use async_trait::async_trait;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

pub const TESSERACT_ENGINE: &str = "tesseract";

/// Runs `tesseract <image> stdout -l <lang> --dpi <dpi> hocr`.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    program: String,
    timeout: Duration,
}

impl TesseractEngine {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn from_config(config: &OcrConfig) -> Self {
        Self::new(config.tesseract_program.clone(), Duration::from_secs(config.timeout_secs))
    }

    fn args(request: &OcrRequest<'_>) -> Vec<String> {
        vec![
            request.image.display().to_string(),
            "stdout".to_string(),
            "-l".to_string(),
            request.language.to_string(),
            "--dpi".to_string(),
            format!("{}", request.dpi.round() as u32),
            "hocr".to_string(),
        ]
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        TESSERACT_ENGINE
    }

    async fn recognize(&self, request: &OcrRequest<'_>, cancel: &CancellationToken) -> Result<HocrPage> {
        if cancel.is_cancelled() {
            return Err(PalimpsestError::cancelled("before recognition"));
        }

        tracing::debug!(page = request.page_number, language = request.language, "Running tesseract");
        let output = run_tool(&self.program, Self::args(request), self.timeout, cancel).await?;

        if !output.success {
            let stderr = stderr_tail(&output.stderr, 5);
            let lower = stderr.to_lowercase();
            if lower.contains("failed loading language") || lower.contains("could not initialize tesseract") {
                return Err(PalimpsestError::MissingDependency(format!(
                    "tesseract language data for '{}' is not installed: {}",
                    request.language, stderr
                )));
            }
            return Err(PalimpsestError::engine(format!(
                "tesseract failed on page {} (exit code {:?}): {}",
                request.page_number, output.code, stderr
            )));
        }

        HocrPage::parse(&output.stdout_lossy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_args_request_hocr_on_stdout() {
        let request = OcrRequest {
            image: Path::new("/tmp/page-0001.png"),
            language: "eng+deu",
            page_number: 1,
            dpi: 299.6,
        };
        let args = TesseractEngine::args(&request);
        assert_eq!(
            args,
            vec!["/tmp/page-0001.png", "stdout", "-l", "eng+deu", "--dpi", "300", "hocr"]
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let engine = TesseractEngine::new("palimpsest-no-such-tesseract", Duration::from_secs(1));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let request = OcrRequest {
            image: Path::new("page.png"),
            language: "eng",
            page_number: 1,
            dpi: 300.0,
        };
        let err = engine.recognize(&request, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_missing_binary_is_missing_dependency() {
        let engine = TesseractEngine::new("palimpsest-no-such-tesseract", Duration::from_secs(1));
        let request = OcrRequest {
            image: Path::new("page.png"),
            language: "eng",
            page_number: 1,
            dpi: 300.0,
        };
        let err = engine.recognize(&request, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, PalimpsestError::MissingDependency(_)));
    }
}
