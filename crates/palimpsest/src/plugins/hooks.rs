//! Hook points and hook implementation types.
//!
//! Each [`HookPoint`] declares how it is dispatched:
//!
//! - [`DispatchMode::CollectAll`] runs every implementation in registration order and gathers
//!   all results.
//! - [`DispatchMode::FirstResult`] runs implementations in reverse registration order and stops
//!   at the first one that returns `Some`. Plugins registered later therefore override earlier
//!   ones, and the caller-supplied default runs only when nobody answers.

use crate::Result;
use crate::core::config::PipelineConfig;
use crate::pdf::assemble::GenerationPass;
use crate::pdf::loader::InputDocument;
use crate::types::{ComplianceProfile, PageResult, PageUnit};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Extension sites of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookPoint {
    AddOptions,
    CheckOptions,
    ValidateBeforeOcr,
    FilterPageImage,
    FilterOcrImage,
    ChooseOcrEngine,
    GenerateCompliantOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchMode {
    CollectAll,
    FirstResult,
}

impl HookPoint {
    pub const ALL: [HookPoint; 7] = [
        HookPoint::AddOptions,
        HookPoint::CheckOptions,
        HookPoint::ValidateBeforeOcr,
        HookPoint::FilterPageImage,
        HookPoint::FilterOcrImage,
        HookPoint::ChooseOcrEngine,
        HookPoint::GenerateCompliantOutput,
    ];

    pub fn dispatch_mode(self) -> DispatchMode {
        match self {
            HookPoint::AddOptions | HookPoint::CheckOptions | HookPoint::ValidateBeforeOcr => DispatchMode::CollectAll,
            HookPoint::FilterPageImage
            | HookPoint::FilterOcrImage
            | HookPoint::ChooseOcrEngine
            | HookPoint::GenerateCompliantOutput => DispatchMode::FirstResult,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HookPoint::AddOptions => "add-options",
            HookPoint::CheckOptions => "check-options",
            HookPoint::ValidateBeforeOcr => "validate-before-ocr",
            HookPoint::FilterPageImage => "filter-page-image",
            HookPoint::FilterOcrImage => "filter-ocr-image",
            HookPoint::ChooseOcrEngine => "choose-ocr-engine",
            HookPoint::GenerateCompliantOutput => "generate-compliant-output",
        }
    }
}

impl std::fmt::Display for HookPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A plugin option contributed through `add-options`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionSpec {
    /// Key used in `plugin_options` and with `-O key=value`.
    pub name: String,
    pub help: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl OptionSpec {
    pub fn new(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            default: None,
        }
    }
}

/// Arguments for page-scoped hooks.
#[derive(Debug, Clone, Copy)]
pub struct PageHookContext<'a> {
    pub unit: &'a PageUnit,
    /// Image the hook is about: the page raster or the OCR input.
    pub image: &'a Path,
    /// Per-page scratch directory for derived files.
    pub work_dir: &'a Path,
    /// Engine names available to `choose-ocr-engine`.
    pub engines: &'a [String],
    pub config: &'a PipelineConfig,
}

/// Arguments for `generate-compliant-output`.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub document: &'a InputDocument,
    /// Page results in ascending index order.
    pub pages: &'a [PageResult],
    pub pass: &'a GenerationPass,
    pub profile: ComplianceProfile,
    /// Path the candidate document should be written to.
    pub candidate: &'a Path,
    pub config: &'a PipelineConfig,
}

pub type AddOptionsFn = Arc<dyn Fn() -> Result<Vec<OptionSpec>> + Send + Sync>;
pub type CheckOptionsFn = Arc<dyn Fn(&PipelineConfig) -> Result<()> + Send + Sync>;
pub type PageCheckFn = Arc<dyn Fn(&PageHookContext<'_>) -> Result<()> + Send + Sync>;
pub type ImageFilterFn = Arc<dyn Fn(&PageHookContext<'_>) -> Result<Option<PathBuf>> + Send + Sync>;
pub type EngineChoiceFn = Arc<dyn Fn(&PageHookContext<'_>) -> Result<Option<String>> + Send + Sync>;
pub type GenerateOutputFn = Arc<dyn Fn(&GenerationRequest<'_>) -> Result<Option<PathBuf>> + Send + Sync>;

/// A hook implementation, tagged with the hook point it serves.
#[derive(Clone)]
pub enum HookImpl {
    AddOptions(AddOptionsFn),
    CheckOptions(CheckOptionsFn),
    ValidateBeforeOcr(PageCheckFn),
    FilterPageImage(ImageFilterFn),
    FilterOcrImage(ImageFilterFn),
    ChooseOcrEngine(EngineChoiceFn),
    GenerateCompliantOutput(GenerateOutputFn),
}

impl HookImpl {
    pub fn point(&self) -> HookPoint {
        match self {
            HookImpl::AddOptions(_) => HookPoint::AddOptions,
            HookImpl::CheckOptions(_) => HookPoint::CheckOptions,
            HookImpl::ValidateBeforeOcr(_) => HookPoint::ValidateBeforeOcr,
            HookImpl::FilterPageImage(_) => HookPoint::FilterPageImage,
            HookImpl::FilterOcrImage(_) => HookPoint::FilterOcrImage,
            HookImpl::ChooseOcrEngine(_) => HookPoint::ChooseOcrEngine,
            HookImpl::GenerateCompliantOutput(_) => HookPoint::GenerateCompliantOutput,
        }
    }

    pub fn add_options<F>(f: F) -> Self
    where
        F: Fn() -> Result<Vec<OptionSpec>> + Send + Sync + 'static,
    {
        HookImpl::AddOptions(Arc::new(f))
    }

    pub fn check_options<F>(f: F) -> Self
    where
        F: Fn(&PipelineConfig) -> Result<()> + Send + Sync + 'static,
    {
        HookImpl::CheckOptions(Arc::new(f))
    }

    pub fn validate_before_ocr<F>(f: F) -> Self
    where
        F: Fn(&PageHookContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        HookImpl::ValidateBeforeOcr(Arc::new(f))
    }

    pub fn filter_page_image<F>(f: F) -> Self
    where
        F: Fn(&PageHookContext<'_>) -> Result<Option<PathBuf>> + Send + Sync + 'static,
    {
        HookImpl::FilterPageImage(Arc::new(f))
    }

    pub fn filter_ocr_image<F>(f: F) -> Self
    where
        F: Fn(&PageHookContext<'_>) -> Result<Option<PathBuf>> + Send + Sync + 'static,
    {
        HookImpl::FilterOcrImage(Arc::new(f))
    }

    pub fn choose_ocr_engine<F>(f: F) -> Self
    where
        F: Fn(&PageHookContext<'_>) -> Result<Option<String>> + Send + Sync + 'static,
    {
        HookImpl::ChooseOcrEngine(Arc::new(f))
    }

    pub fn generate_compliant_output<F>(f: F) -> Self
    where
        F: Fn(&GenerationRequest<'_>) -> Result<Option<PathBuf>> + Send + Sync + 'static,
    {
        HookImpl::GenerateCompliantOutput(Arc::new(f))
    }
}

impl std::fmt::Debug for HookImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("HookImpl").field(&self.point()).finish()
    }
}
