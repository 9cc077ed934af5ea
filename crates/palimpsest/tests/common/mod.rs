//! Fixtures and scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use image::{GrayImage, Luma};
use lopdf::{Document, Object, Stream, dictionary};
use palimpsest::core::config::{PipelineConfig, ValidatorKind};
use palimpsest::ocr::{HocrPage, OcrEngine, OcrRequest};
use palimpsest::raster::{BitonalEncoder, EncoderMode, Rasterizer, RenderRequest, RenderedPage};
use palimpsest::{HookRegistry, PageProcessor, Result};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

pub const VECTOR_TEXT: &[u8] = b"BT /F1 12 Tf 72 720 Td (Printed) Tj ET";

/// hOCR for a Letter page rendered at 300 DPI with one line of two words.
pub fn hocr(word: &str) -> String {
    format!(
        r#"<html><body><div class="ocr_page" title="bbox 0 0 2550 3300">
<span class="ocr_line" title="bbox 300 300 1000 360; baseline 0 -10">
<span class="ocrx_word" title="bbox 300 300 600 360; x_wconf 95">{}</span>
<span class="ocrx_word" title="bbox 620 300 1000 360; x_wconf 91">page</span>
</span></div></body></html>"#,
        word
    )
}

/// Write a Letter-sized PDF with one page per content stream.
pub fn write_pdf(path: &Path, pages: &[&[u8]]) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut kids = Vec::new();
    for content in pages {
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.to_vec()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}

/// Write a small white PNG page.
pub fn write_png(path: &Path) {
    GrayImage::from_pixel(170, 220, Luma([255u8])).save(path).unwrap();
}

/// Renders every page as a blank PNG at 300 DPI.
pub struct BlankRasterizer;

#[async_trait]
impl Rasterizer for BlankRasterizer {
    async fn render(&self, request: &RenderRequest<'_>, _cancel: &CancellationToken) -> Result<RenderedPage> {
        write_png(request.output);
        Ok(RenderedPage {
            path: request.output.to_path_buf(),
            dpi: 300.0,
        })
    }
}

pub struct NoJbig2;

#[async_trait]
impl BitonalEncoder for NoJbig2 {
    fn name(&self) -> &str {
        "none"
    }

    async fn is_available(&self, _mode: EncoderMode) -> bool {
        false
    }
}

/// Recognizes "page-N" on every page and counts its calls.
#[derive(Default)]
pub struct CountingEngine {
    pub calls: AtomicUsize,
}

impl CountingEngine {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrEngine for CountingEngine {
    fn name(&self) -> &str {
        "counting"
    }

    async fn recognize(&self, request: &OcrRequest<'_>, cancel: &CancellationToken) -> Result<HocrPage> {
        if cancel.is_cancelled() {
            return Err(palimpsest::PalimpsestError::cancelled("before recognition"));
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        HocrPage::parse(&hocr(&format!("page-{}", request.page_number)))
    }
}

pub fn config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.ocr.engine = "counting".to_string();
    config.compliance.validator = ValidatorKind::None;
    config.executor.max_workers = Some(2);
    config
}

/// A page processor using the scripted collaborators above.
pub fn processor(config: &PipelineConfig, engine: Arc<CountingEngine>) -> PageProcessor {
    PageProcessor::new(Arc::new(config.clone()), Arc::new(HookRegistry::new()))
        .with_engine(engine)
        .with_rasterizer(Arc::new(BlankRasterizer))
        .with_encoder(Arc::new(NoJbig2))
}
