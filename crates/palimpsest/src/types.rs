use crate::error::{ErrorClass, ExitCode, PalimpsestError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ============================================================================
// Page units
// ============================================================================

/// OCR policy requested for a document.
///
/// The three policies are mutually exclusive; `None` at the call site means the default
/// behaviour (OCR pages without text, flag pages that already have text).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrPolicy {
    /// Copy pages that already contain text unmodified.
    SkipText,
    /// Rasterize every page and OCR the raster, replacing existing content.
    ForceOcr,
    /// Strip previous OCR text and recognize again, keeping printable vector text.
    RedoOcr,
}

impl std::fmt::Display for OcrPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            OcrPolicy::SkipText => "skip-text",
            OcrPolicy::ForceOcr => "force-ocr",
            OcrPolicy::RedoOcr => "redo-ocr",
        })
    }
}

/// Page rotation as stored in the PDF `/Rotate` entry (clockwise).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Normalize an arbitrary `/Rotate` value. Values that are not multiples of 90 are
    /// rounded down to the previous quarter turn.
    pub fn from_degrees(degrees: i64) -> Self {
        match degrees.rem_euclid(360) / 90 {
            1 => Rotation::Deg90,
            2 => Rotation::Deg180,
            3 => Rotation::Deg270,
            _ => Rotation::Deg0,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Whether the displayed page swaps width and height.
    pub fn is_quarter_turn(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

/// Physical geometry of a page in PDF user space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageGeometry {
    /// Media box width in points.
    pub width_pt: f64,
    /// Media box height in points.
    pub height_pt: f64,
    pub rotation: Rotation,
}

impl PageGeometry {
    pub fn new(width_pt: f64, height_pt: f64, rotation: Rotation) -> Self {
        Self {
            width_pt,
            height_pt,
            rotation,
        }
    }

    /// Width and height of the page as displayed, after applying `/Rotate`.
    pub fn displayed_size(&self) -> (f64, f64) {
        if self.rotation.is_quarter_turn() {
            (self.height_pt, self.width_pt)
        } else {
            (self.width_pt, self.height_pt)
        }
    }
}

/// Where the pixels of a page come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageSource {
    /// A page inside a PDF file, 1-indexed as in the page tree.
    PdfPage { path: PathBuf, page_number: u32 },
    /// A standalone page image with its resolution.
    Image { path: PathBuf, dpi: f64 },
}

impl PageSource {
    pub fn path(&self) -> &Path {
        match self {
            PageSource::PdfPage { path, .. } | PageSource::Image { path, .. } => path,
        }
    }
}

/// Immutable description of one page's work.
///
/// Built once per document before any worker starts and handed to exactly one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageUnit {
    /// Zero-based page index.
    pub index: usize,
    pub source: PageSource,
    pub geometry: PageGeometry,
    /// Page shows text through any text operator.
    pub has_existing_text: bool,
    /// Page carries invisible (render mode 3) text left by an earlier OCR run.
    pub has_existing_ocr_text: bool,
    pub policy: Option<OcrPolicy>,
}

impl PageUnit {
    /// One-based page number for messages.
    pub fn page_number(&self) -> usize {
        self.index + 1
    }
}

// ============================================================================
// Per-page results
// ============================================================================

/// What the classifier decided to do with a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageMode {
    /// Copy the page unmodified.
    Copy,
    /// Keep page content and add an invisible text layer.
    Ocr,
    /// Strip old OCR text, keep vector text, add a new text layer.
    RedoOcr,
    /// Replace page content with a raster of the page plus a text layer.
    Rasterize,
}

impl PageMode {
    pub fn invokes_ocr(self) -> bool {
        !matches!(self, PageMode::Copy)
    }
}

/// Per-page stage state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageState {
    Pending,
    Classified,
    SkippedCopy,
    OcrInvoked,
    TextLayerSynthesized,
    CompressionChosen,
    Validated,
    Done,
    Failed,
}

/// Image codec selected for a page's bitonal content.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "codec", rename_all = "snake_case")]
pub enum CompressionChoice {
    Jbig2Lossy { threshold: f32 },
    Jbig2Lossless,
    CcittG4,
}

impl std::fmt::Display for CompressionChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompressionChoice::Jbig2Lossy { threshold } => write!(f, "jbig2-lossy(threshold={})", threshold),
            CompressionChoice::Jbig2Lossless => f.write_str("jbig2-lossless"),
            CompressionChoice::CcittG4 => f.write_str("ccitt-g4"),
        }
    }
}

/// Content stream that paints a page's invisible text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextLayer {
    /// Encoded content stream operations.
    pub content: Vec<u8>,
    /// Number of positioned words.
    pub word_count: usize,
}

impl TextLayer {
    pub fn is_empty(&self) -> bool {
        self.word_count == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticLevel {
    Info,
    Warning,
    Error,
}

/// Structured message attached to a page or a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<ErrorClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    pub message: String,
}

impl Diagnostic {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Info,
            class: None,
            plugin: None,
            message: message.into(),
        }
    }

    pub fn warning(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Warning,
            class: Some(class),
            plugin: None,
            message: message.into(),
        }
    }

    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = Some(plugin.into());
        self
    }

    /// Warnings and errors; anything above informational.
    pub fn is_warning(&self) -> bool {
        self.level != DiagnosticLevel::Info
    }
}

/// Serializable record of why a page failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageFailure {
    pub class: ErrorClass,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
}

impl PageFailure {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            plugin: None,
        }
    }
}

impl From<&PalimpsestError> for PageFailure {
    fn from(err: &PalimpsestError) -> Self {
        let plugin = match err {
            PalimpsestError::Plugin { plugin_name, .. } => Some(plugin_name.clone()),
            _ => None,
        };
        Self {
            class: err.class(),
            message: err.to_string(),
            plugin,
        }
    }
}

impl std::fmt::Display for PageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.plugin {
            Some(plugin) => write!(f, "[{}] {} ({})", self.class, self.message, plugin),
            None => write!(f, "[{}] {}", self.class, self.message),
        }
    }
}

/// Outcome of processing one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    pub index: usize,
    pub mode: PageMode,
    pub state: PageState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_layer: Option<TextLayer>,
    pub compression: CompressionChoice,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    /// Raster that replaces the visible page content, for rasterized pages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_image: Option<PathBuf>,
    /// Recognized plain text, one line per hOCR line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PageFailure>,
}

impl PageResult {
    /// A page that passes through unchanged.
    pub fn copied(index: usize, compression: CompressionChoice) -> Self {
        Self {
            index,
            mode: PageMode::Copy,
            state: PageState::Done,
            text_layer: None,
            compression,
            engine: None,
            page_image: None,
            text: None,
            diagnostics: Vec::new(),
            error: None,
        }
    }

    /// A page that could not be produced.
    pub fn failed(index: usize, mode: PageMode, compression: CompressionChoice, failure: PageFailure) -> Self {
        Self {
            index,
            mode,
            state: PageState::Failed,
            text_layer: None,
            compression,
            engine: None,
            page_image: None,
            text: None,
            diagnostics: Vec::new(),
            error: Some(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.state == PageState::Done
    }

    pub fn page_number(&self) -> usize {
        self.index + 1
    }
}

// ============================================================================
// Document outcome
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Success,
    SuccessWithWarnings,
    Fatal,
    Interrupted,
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PipelineStatus::Success => "success",
            PipelineStatus::SuccessWithWarnings => "success-with-warnings",
            PipelineStatus::Fatal => "fatal",
            PipelineStatus::Interrupted => "interrupted",
        })
    }
}

/// Archival profile the output is validated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComplianceProfile {
    /// Plain PDF, no validation.
    Pdf,
    #[serde(rename = "pdfa-1b")]
    PdfA1b,
    #[default]
    #[serde(rename = "pdfa-2b")]
    PdfA2b,
    #[serde(rename = "pdfa-3b")]
    PdfA3b,
}

impl ComplianceProfile {
    /// PDF/A part number, or `None` for plain PDF.
    pub fn pdfa_part(self) -> Option<u8> {
        match self {
            ComplianceProfile::Pdf => None,
            ComplianceProfile::PdfA1b => Some(1),
            ComplianceProfile::PdfA2b => Some(2),
            ComplianceProfile::PdfA3b => Some(3),
        }
    }

    /// PDF header version written for this profile.
    pub fn pdf_version(self) -> &'static str {
        match self {
            ComplianceProfile::PdfA1b => "1.4",
            _ => "1.7",
        }
    }
}

impl std::fmt::Display for ComplianceProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ComplianceProfile::Pdf => "pdf",
            ComplianceProfile::PdfA1b => "pdfa-1b",
            ComplianceProfile::PdfA2b => "pdfa-2b",
            ComplianceProfile::PdfA3b => "pdfa-3b",
        })
    }
}

impl std::str::FromStr for ComplianceProfile {
    type Err = PalimpsestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pdf" => Ok(ComplianceProfile::Pdf),
            "pdfa-1b" | "pdfa-1" => Ok(ComplianceProfile::PdfA1b),
            "pdfa-2b" | "pdfa-2" | "pdfa" => Ok(ComplianceProfile::PdfA2b),
            "pdfa-3b" | "pdfa-3" => Ok(ComplianceProfile::PdfA3b),
            other => Err(PalimpsestError::validation(format!("Unknown output profile '{}'", other))),
        }
    }
}

/// Result of the document-level compliance loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub profile: ComplianceProfile,
    /// Number of generated candidates.
    pub attempts: u32,
    /// Number of corrective passes after the first candidate.
    pub retries: u32,
    pub passed: bool,
    /// Violations reported for the returned candidate.
    #[serde(default)]
    pub violations: Vec<String>,
}

/// Terminal result of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub status: PipelineStatus,
    pub page_count: usize,
    /// Page results in ascending index order.
    pub pages: Vec<PageResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compliance: Option<ComplianceReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
    /// Reason for a `Fatal` status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal: Option<PageFailure>,
}

impl PipelineOutcome {
    pub fn page(&self, index: usize) -> Option<&PageResult> {
        self.pages.iter().find(|p| p.index == index)
    }

    /// Recognized text of all pages, separated by form feeds.
    pub fn sidecar_text(&self) -> String {
        let mut out = String::new();
        for (position, page) in self.pages.iter().enumerate() {
            if position > 0 {
                out.push('\x0c');
            }
            match (&page.text, page.mode) {
                (Some(text), _) => out.push_str(text),
                (None, PageMode::Copy) => out.push_str("[page already contains text; OCR skipped]\n"),
                (None, _) => out.push_str("[no text recognized]\n"),
            }
        }
        out
    }

    pub fn exit_code(&self) -> ExitCode {
        match self.status {
            PipelineStatus::Success => ExitCode::Ok,
            PipelineStatus::Interrupted => ExitCode::Interrupted,
            PipelineStatus::Fatal => self
                .fatal
                .as_ref()
                .map(|f| ExitCode::from(f.class))
                .unwrap_or(ExitCode::OtherError),
            // Compliance is never fatal, so its code also only ever marks a completed run.
            PipelineStatus::SuccessWithWarnings if self.compliance.as_ref().is_some_and(|c| !c.passed) => {
                ExitCode::ComplianceFailed
            }
            PipelineStatus::SuccessWithWarnings => ExitCode::CompletedWithWarnings,
        }
    }
}
