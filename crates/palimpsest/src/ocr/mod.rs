//! Optical character recognition.
//!
//! Engines implement [`OcrEngine`] and return an [`HocrPage`]. The page stage picks an engine
//! by name (see the `choose-ocr-engine` hook) from an [`EngineSet`].

pub mod engine;
pub mod hocr;
pub mod sidecar;
pub mod tesseract;

pub use engine::{OcrEngine, OcrRequest};
pub use hocr::{BBox, Baseline, HocrPage, TextElement};
pub use sidecar::{SIDECAR_ENGINE, SidecarEngine};
pub use tesseract::{TESSERACT_ENGINE, TesseractEngine};

use crate::core::config::OcrConfig;
use indexmap::IndexMap;
use std::sync::Arc;

/// Engines available to a worker, keyed by name in registration order.
#[derive(Clone, Default)]
pub struct EngineSet {
    engines: IndexMap<String, Arc<dyn OcrEngine>>,
}

impl EngineSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tesseract plus the sidecar engine.
    pub fn from_config(config: &OcrConfig) -> Self {
        let mut set = Self::new();
        set.insert(Arc::new(TesseractEngine::from_config(config)));
        set.insert(Arc::new(SidecarEngine::new(config.hocr_dir.clone())));
        set
    }

    /// Add or replace an engine under its own name.
    pub fn insert(&mut self, engine: Arc<dyn OcrEngine>) {
        self.engines.insert(engine.name().to_string(), engine);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn OcrEngine>> {
        self.engines.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.engines.keys().cloned().collect()
    }
}

impl std::fmt::Debug for EngineSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.engines.keys()).finish()
    }
}
