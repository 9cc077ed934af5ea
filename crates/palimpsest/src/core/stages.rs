//! Per-page stage functions.
//!
//! A page moves through `Pending → Classified → (SkippedCopy | OcrInvoked → TextLayerSynthesized)
//! → CompressionChosen → Validated → Done`, or ends in `Failed`. [`classify`] decides the branch;
//! [`PageProcessor`] runs the rest and is what executors call for every page.

use crate::core::config::PipelineConfig;
use crate::core::executor::{PageJob, PageWork};
use crate::error::ErrorClass;
use crate::ocr::{EngineSet, OcrEngine, OcrRequest};
use crate::pdf::text_layer::{RasterTransform, synthesize};
use crate::plugins::registry::HookFailure;
use crate::plugins::{HookRegistry, PageHookContext, PluginCatalog};
use crate::raster::{BitonalEncoder, GhostscriptRasterizer, Jbig2Encoder, Rasterizer, RenderRequest, choose_compression};
use crate::types::{
    CompressionChoice, Diagnostic, OcrPolicy, PageFailure, PageMode, PageResult, PageState, PageUnit,
};
use crate::{PalimpsestError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Message attached to pages that already carry text when no policy was given.
pub const PAGE_HAS_TEXT: &str = "page already has text";

/// Outcome of classifying a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub mode: PageMode,
    /// Keep vector text out of the raster handed to the engine.
    pub filter_text: bool,
    /// Set when the page conflicts with the requested policy.
    pub conflict: Option<String>,
}

impl Decision {
    fn new(mode: PageMode, filter_text: bool) -> Self {
        Self {
            mode,
            filter_text,
            conflict: None,
        }
    }
}

/// Decide how a page is handled. Depends only on the unit.
pub fn classify(unit: &PageUnit) -> Decision {
    match unit.policy {
        Some(OcrPolicy::ForceOcr) => Decision::new(PageMode::Rasterize, false),
        Some(OcrPolicy::SkipText) if unit.has_existing_text => Decision::new(PageMode::Copy, false),
        Some(OcrPolicy::RedoOcr) if unit.has_existing_ocr_text => Decision::new(PageMode::RedoOcr, true),
        Some(OcrPolicy::RedoOcr) if unit.has_existing_text => Decision::new(PageMode::Ocr, true),
        None if unit.has_existing_text => Decision {
            mode: PageMode::Copy,
            filter_text: false,
            conflict: Some(PAGE_HAS_TEXT.to_string()),
        },
        _ => Decision::new(PageMode::Ocr, false),
    }
}

/// Return `Cancelled` once the token has fired.
pub fn checkpoint(cancel: &CancellationToken, name: &str) -> Result<()> {
    if cancel.is_cancelled() {
        Err(PalimpsestError::cancelled(name))
    } else {
        Ok(())
    }
}

fn advance(page: usize, state: &mut PageState, next: PageState) {
    tracing::trace!(page, from = ?state, to = ?next, "Page state");
    *state = next;
}

/// Runs the stage functions for one page.
///
/// Everything it needs is built from the pipeline configuration, so worker processes construct
/// an equivalent processor from the configuration they receive.
pub struct PageProcessor {
    config: Arc<PipelineConfig>,
    registry: Arc<HookRegistry>,
    engines: EngineSet,
    rasterizer: Arc<dyn Rasterizer>,
    encoder: Arc<dyn BitonalEncoder>,
}

impl PageProcessor {
    pub fn new(config: Arc<PipelineConfig>, registry: Arc<HookRegistry>) -> Self {
        Self {
            engines: EngineSet::from_config(&config.ocr),
            rasterizer: Arc::new(GhostscriptRasterizer::from_config(&config.render)),
            encoder: Arc::new(Jbig2Encoder::from_config(&config.compression)),
            config,
            registry,
        }
    }

    /// Build a processor, loading the plugins named in the configuration.
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        let registry = PluginCatalog::builtin().build_registry(&config)?;
        Ok(Self::new(Arc::new(config), Arc::new(registry)))
    }

    /// Add an engine or replace the one with the same name.
    pub fn with_engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.engines.insert(engine);
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn BitonalEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<HookRegistry> {
        &self.registry
    }

    /// Rasterize, run the page hooks, recognize and build the text layer.
    async fn recognize(
        &self,
        job: &PageJob,
        decision: &Decision,
        compression: CompressionChoice,
        cancel: &CancellationToken,
    ) -> Result<PageResult> {
        let unit = &job.unit;
        let page = unit.page_number();
        let mut state = PageState::Classified;
        let mut diagnostics = Vec::new();
        let engines = self.engines.names();

        checkpoint(cancel, "before rasterization")?;
        let raster = job.work_dir.join(format!("page-{:04}.png", page));
        let rendered = self
            .rasterizer
            .render(
                &RenderRequest {
                    source: &unit.source,
                    dpi: self.config.render.dpi,
                    filter_text: decision.filter_text,
                    output: &raster,
                },
                cancel,
            )
            .await?;

        let ctx = PageHookContext {
            unit,
            image: &rendered.path,
            work_dir: &job.work_dir,
            engines: &engines,
            config: &self.config,
        };

        if let Some(failure) = self.registry.validate_before_ocr(&ctx).failures.into_iter().next() {
            return Err(failure.into_error());
        }

        let page_image = if decision.mode == PageMode::Rasterize {
            let chosen = self.registry.filter_page_image(&ctx, || Ok(rendered.path.clone()))?;
            note_failures(&mut diagnostics, chosen.failures);
            Some(chosen.value)
        } else {
            None
        };

        let ctx = PageHookContext {
            image: page_image.as_deref().unwrap_or(rendered.path.as_path()),
            ..ctx
        };
        let ocr_image = self.registry.filter_ocr_image(&ctx, || Ok(ctx.image.to_path_buf()))?;
        note_failures(&mut diagnostics, ocr_image.failures);

        let engine_choice = self
            .registry
            .choose_ocr_engine(&ctx, || Ok(self.config.ocr.engine.clone()))?;
        note_failures(&mut diagnostics, engine_choice.failures);
        let engine = self.engines.get(&engine_choice.value).ok_or_else(|| {
            PalimpsestError::MissingDependency(format!(
                "OCR engine '{}' is not available (known: {})",
                engine_choice.value,
                engines.join(", ")
            ))
        })?;

        checkpoint(cancel, "before recognition")?;
        advance(page, &mut state, PageState::OcrInvoked);
        tracing::debug!(page, engine = engine.name(), mode = ?decision.mode, "Recognizing page");
        let hocr = engine
            .recognize(
                &OcrRequest {
                    image: &ocr_image.value,
                    language: &self.config.ocr.language,
                    page_number: page,
                    dpi: rendered.dpi,
                },
                cancel,
            )
            .await?;

        let transform = RasterTransform::for_page(unit.geometry, hocr.page_bbox(), rendered.dpi);
        let text_layer = synthesize(&hocr, &transform)?;
        advance(page, &mut state, PageState::TextLayerSynthesized);

        if text_layer.is_empty() {
            diagnostics.push(Diagnostic::info(format!("no text recognized on page {}", page)));
        }

        advance(page, &mut state, PageState::CompressionChosen);
        advance(page, &mut state, PageState::Validated);

        Ok(PageResult {
            index: unit.index,
            mode: decision.mode,
            state,
            text_layer: Some(text_layer),
            compression,
            engine: Some(engine.name().to_string()),
            page_image,
            text: Some(hocr.plain_text()),
            diagnostics,
            error: None,
        })
    }
}

fn note_failures(diagnostics: &mut Vec<Diagnostic>, failures: Vec<HookFailure>) {
    for failure in failures {
        tracing::warn!(plugin = %failure.plugin_id, hook = %failure.hook_point, "{}", failure.message);
        diagnostics.push(Diagnostic::warning(ErrorClass::Plugin, failure.to_string()).with_plugin(failure.plugin_id));
    }
}

#[async_trait]
impl PageWork for PageProcessor {
    async fn run(&self, job: PageJob, cancel: CancellationToken) -> Result<PageResult> {
        let unit = &job.unit;
        let page = unit.page_number();

        checkpoint(&cancel, "before classification")?;
        tokio::fs::create_dir_all(&job.work_dir).await?;

        let decision = classify(unit);
        tracing::debug!(page, mode = ?decision.mode, "Classified page");
        let compression = choose_compression(&self.config.compression, self.encoder.as_ref()).await;

        if decision.mode == PageMode::Copy {
            let mut result = PageResult::copied(unit.index, compression);
            if let Some(message) = decision.conflict {
                let error = PalimpsestError::classification(page, message);
                tracing::warn!(page, "{}", error);
                result.error = Some(PageFailure::from(&error));
            }
            checkpoint(&cancel, "before commit")?;
            return Ok(result);
        }

        let first = match self.recognize(&job, &decision, compression, &cancel).await {
            Ok(mut result) => {
                checkpoint(&cancel, "before commit")?;
                advance(page, &mut result.state, PageState::Done);
                return Ok(result);
            }
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => e,
        };

        let retry = matches!(first, PalimpsestError::Engine { .. }) && self.config.ocr.fallback_retry;
        if !retry {
            tracing::warn!(page, error = %first, "Page failed");
            return Ok(PageResult::failed(unit.index, decision.mode, compression, PageFailure::from(&first)));
        }

        tracing::warn!(page, error = %first, "Recognition failed, retrying with rasterize-first fallback");
        let fallback = Decision::new(PageMode::Rasterize, false);
        match self.recognize(&job, &fallback, compression, &cancel).await {
            Ok(mut result) => {
                checkpoint(&cancel, "before commit")?;
                result.diagnostics.insert(
                    0,
                    Diagnostic::warning(
                        ErrorClass::Engine,
                        format!("recovered with rasterize-first fallback after: {}", first),
                    ),
                );
                advance(page, &mut result.state, PageState::Done);
                Ok(result)
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                tracing::warn!(page, error = %e, "Fallback failed");
                Ok(PageResult::failed(unit.index, fallback.mode, compression, PageFailure::from(&e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::HocrPage;
    use crate::plugins::{HookImpl, HookPoint};
    use crate::raster::{EncoderMode, RenderedPage};
    use crate::types::{PageGeometry, PageSource, Rotation};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    const HOCR: &str = r#"<html><body><div class="ocr_page" title="bbox 0 0 2550 3300">
<span class="ocr_line" title="bbox 300 300 900 360; baseline 0 -10">
<span class="ocrx_word" title="bbox 300 300 600 360; x_wconf 95">Hello</span>
<span class="ocrx_word" title="bbox 620 300 900 360; x_wconf 93">world</span>
</span></div></body></html>"#;

    fn unit(policy: Option<OcrPolicy>, has_text: bool, has_ocr_text: bool) -> PageUnit {
        PageUnit {
            index: 0,
            source: PageSource::PdfPage {
                path: PathBuf::from("in.pdf"),
                page_number: 1,
            },
            geometry: PageGeometry::new(612.0, 792.0, Rotation::Deg0),
            has_existing_text: has_text,
            has_existing_ocr_text: has_ocr_text,
            policy,
        }
    }

    struct NoRender;

    #[async_trait]
    impl Rasterizer for NoRender {
        async fn render(&self, request: &RenderRequest<'_>, _cancel: &CancellationToken) -> Result<RenderedPage> {
            Ok(RenderedPage {
                path: request.output.to_path_buf(),
                dpi: 300.0,
            })
        }
    }

    struct NoEncoder;

    #[async_trait]
    impl BitonalEncoder for NoEncoder {
        fn name(&self) -> &str {
            "none"
        }

        async fn is_available(&self, _mode: EncoderMode) -> bool {
            false
        }
    }

    /// Fails the first `failures` calls, then returns [`HOCR`].
    struct FlakyEngine {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OcrEngine for FlakyEngine {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn recognize(&self, _request: &OcrRequest<'_>, cancel: &CancellationToken) -> Result<HocrPage> {
            checkpoint(cancel, "before recognition")?;
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(PalimpsestError::engine("engine crashed"));
            }
            HocrPage::parse(HOCR)
        }
    }

    fn processor(registry: HookRegistry, failures: usize) -> (PageProcessor, Arc<FlakyEngine>) {
        let engine = Arc::new(FlakyEngine {
            failures,
            calls: AtomicUsize::new(0),
        });
        let config = PipelineConfig {
            ocr: crate::core::config::OcrConfig {
                engine: "flaky".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let processor = PageProcessor::new(Arc::new(config), Arc::new(registry))
            .with_engine(engine.clone())
            .with_rasterizer(Arc::new(NoRender))
            .with_encoder(Arc::new(NoEncoder));
        (processor, engine)
    }

    fn job(unit: PageUnit, dir: &std::path::Path) -> PageJob {
        PageJob {
            unit,
            work_dir: dir.join("page-0001"),
        }
    }

    #[test]
    fn test_classify_follows_policy() {
        assert_eq!(classify(&unit(Some(OcrPolicy::ForceOcr), true, false)).mode, PageMode::Rasterize);
        assert_eq!(classify(&unit(Some(OcrPolicy::SkipText), true, false)).mode, PageMode::Copy);
        assert_eq!(classify(&unit(Some(OcrPolicy::SkipText), false, false)).mode, PageMode::Ocr);

        let redo = classify(&unit(Some(OcrPolicy::RedoOcr), true, true));
        assert_eq!(redo.mode, PageMode::RedoOcr);
        assert!(redo.filter_text);

        let vector_only = classify(&unit(Some(OcrPolicy::RedoOcr), true, false));
        assert_eq!(vector_only.mode, PageMode::Ocr);
        assert!(vector_only.filter_text);

        let conflict = classify(&unit(None, true, false));
        assert_eq!(conflict.mode, PageMode::Copy);
        assert_eq!(conflict.conflict.as_deref(), Some(PAGE_HAS_TEXT));

        assert_eq!(classify(&unit(None, false, false)), Decision::new(PageMode::Ocr, false));
    }

    #[test]
    fn test_classify_is_idempotent() {
        let policies = [None, Some(OcrPolicy::SkipText), Some(OcrPolicy::ForceOcr), Some(OcrPolicy::RedoOcr)];
        for policy in policies {
            for (has_text, has_ocr_text) in [(false, false), (true, false), (true, true)] {
                let page = unit(policy, has_text, has_ocr_text);
                assert_eq!(classify(&page), classify(&page.clone()));
            }
        }
    }

    #[tokio::test]
    async fn test_force_ocr_invokes_engine_on_page_with_text() {
        let dir = tempdir().unwrap();
        let (processor, engine) = processor(HookRegistry::new(), 0);

        let result = processor
            .run(job(unit(Some(OcrPolicy::ForceOcr), true, false), dir.path()), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.mode, PageMode::Rasterize);
        assert_eq!(result.state, PageState::Done);
        assert_eq!(result.engine.as_deref(), Some("flaky"));
        assert_eq!(result.text.as_deref(), Some("Hello world\n"));
        assert!(result.page_image.is_some());
        assert_eq!(result.text_layer.as_ref().map(|l| l.word_count), Some(2));
        assert_eq!(result.compression, CompressionChoice::CcittG4);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_page_with_text_is_copied_with_classification_error() {
        let dir = tempdir().unwrap();
        let (processor, engine) = processor(HookRegistry::new(), 0);

        let result = processor
            .run(job(unit(None, true, false), dir.path()), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.mode, PageMode::Copy);
        assert_eq!(result.error.as_ref().map(|e| e.class), Some(ErrorClass::Classification));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_engine_error_retried_once_with_fallback() {
        let dir = tempdir().unwrap();
        let (processor, engine) = processor(HookRegistry::new(), 1);

        let result = processor
            .run(job(unit(None, false, false), dir.path()), CancellationToken::new())
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.mode, PageMode::Rasterize);
        assert_eq!(result.diagnostics[0].class, Some(ErrorClass::Engine));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_page_fails_after_fallback_fails() {
        let dir = tempdir().unwrap();
        let (processor, engine) = processor(HookRegistry::new(), 5);

        let result = processor
            .run(job(unit(None, false, false), dir.path()), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.state, PageState::Failed);
        assert_eq!(result.error.as_ref().map(|e| e.class), Some(ErrorClass::Engine));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rejecting_plugin_fails_page_with_attribution() {
        let dir = tempdir().unwrap();
        let mut registry = HookRegistry::new();
        registry
            .register(
                HookPoint::ValidateBeforeOcr,
                "blank-page-check",
                HookImpl::validate_before_ocr(|_ctx| Err(PalimpsestError::validation("page is blank"))),
            )
            .unwrap();
        let (processor, engine) = processor(registry, 0);

        let result = processor
            .run(job(unit(None, false, false), dir.path()), CancellationToken::new())
            .await
            .unwrap();

        let error = result.error.unwrap();
        assert_eq!(error.class, ErrorClass::Plugin);
        assert_eq!(error.plugin.as_deref(), Some("blank-page-check"));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failing_engine_choice_falls_back_to_default() {
        let dir = tempdir().unwrap();
        let mut registry = HookRegistry::new();
        registry
            .register(
                HookPoint::ChooseOcrEngine,
                "broken-chooser",
                HookImpl::choose_ocr_engine(|_ctx| Err(PalimpsestError::validation("no opinion"))),
            )
            .unwrap();
        let (processor, _engine) = processor(registry, 0);

        let result = processor
            .run(job(unit(None, false, false), dir.path()), CancellationToken::new())
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.engine.as_deref(), Some("flaky"));
        assert_eq!(result.diagnostics[0].plugin.as_deref(), Some("broken-chooser"));
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_work() {
        let dir = tempdir().unwrap();
        let (processor, engine) = processor(HookRegistry::new(), 0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = processor
            .run(job(unit(None, false, false), dir.path()), cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }
}
