//! Pipeline configuration.
//!
//! Configuration can be built in code, loaded from TOML/YAML/JSON, or discovered as
//! `palimpsest.toml` in the current directory or one of its parents. Worker processes receive
//! the same structure over the wire, so everything here is plain serializable data.

use crate::types::{ComplianceProfile, OcrPolicy};
use crate::{PalimpsestError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Name of the configuration file picked up by [`PipelineConfig::discover`].
pub const CONFIG_FILE_NAME: &str = "palimpsest.toml";

pub const MIN_RENDER_DPI: u32 = 72;
pub const MAX_RENDER_DPI: u32 = 1200;

/// Tesseract language list such as `eng`, `chi_sim` or `eng+deu+script/Latin`.
static LANGUAGE_LIST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_/]+(\+[A-Za-z0-9_/]+)*$").expect("Language list regex pattern is valid and should compile")
});

/// Plugin option keys such as `grayscale-ocr-image.threshold`.
static OPTION_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z][a-z0-9_-]*(\.[a-z0-9_-]+)*$").expect("Option key regex pattern is valid and should compile")
});

/// Main pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// OCR policy applied to every page.
    #[serde(default)]
    pub policy: Option<OcrPolicy>,

    /// Treat pages that already contain text as a fatal error.
    #[serde(default)]
    pub strict: bool,

    #[serde(default)]
    pub ocr: OcrConfig,

    #[serde(default)]
    pub render: RenderConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub compression: CompressionConfig,

    #[serde(default)]
    pub compliance: ComplianceConfig,

    /// Built-in plugins to load, in registration order.
    #[serde(default)]
    pub plugins: Vec<String>,

    /// Options contributed by plugins, as `key = value` strings.
    #[serde(default)]
    pub plugin_options: BTreeMap<String, String>,
}

/// Recognition engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrConfig {
    /// Default engine name (`tesseract` or `sidecar`).
    #[serde(default = "default_engine")]
    pub engine: String,

    /// Language code(s) passed to the engine, e.g. `eng` or `eng+deu`.
    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default = "default_tesseract_program")]
    pub tesseract_program: String,

    /// Per-page recognition timeout.
    #[serde(default = "default_ocr_timeout")]
    pub timeout_secs: u64,

    /// Directory holding `page-NNNN.hocr` files for the sidecar engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hocr_dir: Option<PathBuf>,

    /// Retry a failed page once with the rasterize-first fallback.
    #[serde(default = "default_true")]
    pub fallback_retry: bool,
}

/// Rasterization configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Resolution used to render PDF pages for recognition.
    #[serde(default = "default_render_dpi")]
    pub dpi: u32,

    /// Resolution assumed for image inputs.
    #[serde(default = "default_image_dpi")]
    pub image_dpi: f64,

    #[serde(default = "default_ghostscript_program")]
    pub ghostscript_program: String,

    #[serde(default = "default_render_timeout")]
    pub timeout_secs: u64,
}

/// Worker backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorMode {
    /// Tokio tasks inside the coordinator process.
    #[default]
    Threads,
    /// Isolated worker processes speaking the framed worker protocol.
    Processes,
}

impl std::str::FromStr for ExecutorMode {
    type Err = PalimpsestError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "threads" | "thread" => Ok(ExecutorMode::Threads),
            "processes" | "process" => Ok(ExecutorMode::Processes),
            other => Err(PalimpsestError::validation(format!("Unknown worker mode '{}'", other))),
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub mode: ExecutorMode,

    /// Maximum concurrent pages. `None` or `0` uses the number of CPUs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,

    /// Program started for each worker process. Defaults to the current executable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_program: Option<PathBuf>,

    /// Arguments passed to the worker program.
    #[serde(default)]
    pub worker_args: Vec<String>,
}

impl ExecutorConfig {
    /// Effective worker count.
    pub fn resolved_workers(&self) -> usize {
        match self.max_workers {
            Some(n) if n > 0 => n,
            _ => num_cpus::get().max(1),
        }
    }
}

/// Bitonal image compression configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Use JBIG2 when the encoder is installed.
    #[serde(default = "default_true")]
    pub jbig2: bool,

    /// Allow lossy JBIG2 symbol matching.
    #[serde(default)]
    pub jbig2_lossy: bool,

    /// Symbol similarity threshold for lossy mode. `None` disables lossy matching.
    #[serde(default = "default_jbig2_threshold")]
    pub jbig2_threshold: Option<f32>,

    #[serde(default = "default_jbig2_program")]
    pub jbig2_program: String,
}

/// Which validator checks the assembled document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorKind {
    /// Built-in structural checks.
    #[default]
    Structural,
    /// External veraPDF validator.
    Verapdf,
    /// Skip validation.
    None,
}

/// Output compliance configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceConfig {
    #[serde(default)]
    pub profile: ComplianceProfile,

    #[serde(default)]
    pub validator: ValidatorKind,

    /// Corrective passes after the first failing candidate.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_verapdf_program")]
    pub verapdf_program: String,

    #[serde(default = "default_validator_timeout")]
    pub timeout_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_engine() -> String {
    "tesseract".to_string()
}
fn default_language() -> String {
    "eng".to_string()
}
fn default_tesseract_program() -> String {
    "tesseract".to_string()
}
fn default_ocr_timeout() -> u64 {
    180
}
fn default_render_dpi() -> u32 {
    300
}
fn default_image_dpi() -> f64 {
    300.0
}
fn default_ghostscript_program() -> String {
    "gs".to_string()
}
fn default_render_timeout() -> u64 {
    120
}
fn default_jbig2_threshold() -> Option<f32> {
    Some(0.85)
}
fn default_jbig2_program() -> String {
    "jbig2".to_string()
}
fn default_max_retries() -> u32 {
    2
}
fn default_verapdf_program() -> String {
    "verapdf".to_string()
}
fn default_validator_timeout() -> u64 {
    300
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            policy: None,
            strict: false,
            ocr: OcrConfig::default(),
            render: RenderConfig::default(),
            executor: ExecutorConfig::default(),
            compression: CompressionConfig::default(),
            compliance: ComplianceConfig::default(),
            plugins: Vec::new(),
            plugin_options: BTreeMap::new(),
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            language: default_language(),
            tesseract_program: default_tesseract_program(),
            timeout_secs: default_ocr_timeout(),
            hocr_dir: None,
            fallback_retry: true,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            dpi: default_render_dpi(),
            image_dpi: default_image_dpi(),
            ghostscript_program: default_ghostscript_program(),
            timeout_secs: default_render_timeout(),
        }
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            jbig2: true,
            jbig2_lossy: false,
            jbig2_threshold: default_jbig2_threshold(),
            jbig2_program: default_jbig2_program(),
        }
    }
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            profile: ComplianceProfile::default(),
            validator: ValidatorKind::default(),
            max_retries: default_max_retries(),
            verapdf_program: default_verapdf_program(),
            timeout_secs: default_validator_timeout(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            PalimpsestError::validation(format!("Failed to read config file {}: {}", path.as_ref().display(), e))
        })?;

        toml::from_str(&content)
            .map_err(|e| PalimpsestError::validation(format!("Invalid TOML in {}: {}", path.as_ref().display(), e)))
    }

    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            PalimpsestError::validation(format!("Failed to read config file {}: {}", path.as_ref().display(), e))
        })?;

        serde_yaml_ng::from_str(&content)
            .map_err(|e| PalimpsestError::validation(format!("Invalid YAML in {}: {}", path.as_ref().display(), e)))
    }

    /// Load configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            PalimpsestError::validation(format!("Failed to read config file {}: {}", path.as_ref().display(), e))
        })?;

        serde_json::from_str(&content)
            .map_err(|e| PalimpsestError::validation(format!("Invalid JSON in {}: {}", path.as_ref().display(), e)))
    }

    /// Load a configuration file, picking the format from its extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
            Some("toml") => Self::from_toml_file(path),
            Some("yaml") | Some("yml") => Self::from_yaml_file(path),
            Some("json") => Self::from_json_file(path),
            _ => Err(PalimpsestError::validation(format!(
                "Unsupported config file format: {} (expected .toml, .yaml or .json)",
                path.display()
            ))),
        }
    }

    /// Discover `palimpsest.toml` in the current directory or its parents.
    pub fn discover() -> Result<Option<Self>> {
        let current = std::env::current_dir().map_err(PalimpsestError::Io)?;
        Self::discover_from(&current)
    }

    /// Discover `palimpsest.toml` starting at `start`.
    pub fn discover_from(start: &Path) -> Result<Option<Self>> {
        let mut current = start.to_path_buf();

        loop {
            let candidate = current.join(CONFIG_FILE_NAME);
            if candidate.exists() {
                return Ok(Some(Self::from_toml_file(candidate)?));
            }

            if let Some(parent) = current.parent() {
                current = parent.to_path_buf();
            } else {
                break;
            }
        }

        Ok(None)
    }

    /// Collapse the three CLI policy switches into a single policy.
    pub fn policy_from_flags(skip_text: bool, force_ocr: bool, redo_ocr: bool) -> Result<Option<OcrPolicy>> {
        let selected: Vec<OcrPolicy> = [
            (skip_text, OcrPolicy::SkipText),
            (force_ocr, OcrPolicy::ForceOcr),
            (redo_ocr, OcrPolicy::RedoOcr),
        ]
        .into_iter()
        .filter_map(|(on, policy)| on.then_some(policy))
        .collect();

        match selected.as_slice() {
            [] => Ok(None),
            [single] => Ok(Some(*single)),
            many => Err(PalimpsestError::validation(format!(
                "Options {} are mutually exclusive",
                many.iter().map(|p| format!("--{}", p)).collect::<Vec<_>>().join(", ")
            ))),
        }
    }

    /// Check value ranges before any work starts.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_RENDER_DPI..=MAX_RENDER_DPI).contains(&self.render.dpi) {
            return Err(PalimpsestError::validation(format!(
                "render.dpi must be between {} and {}, got {}",
                MIN_RENDER_DPI, MAX_RENDER_DPI, self.render.dpi
            )));
        }

        if !(self.render.image_dpi.is_finite() && self.render.image_dpi > 0.0) {
            return Err(PalimpsestError::validation(format!(
                "render.image_dpi must be positive, got {}",
                self.render.image_dpi
            )));
        }

        if self.ocr.language.trim().is_empty() {
            return Err(PalimpsestError::validation("ocr.language cannot be empty"));
        }

        if !LANGUAGE_LIST.is_match(&self.ocr.language) {
            return Err(PalimpsestError::validation(format!(
                "ocr.language must be codes joined by '+', got '{}'",
                self.ocr.language
            )));
        }

        if self.ocr.timeout_secs == 0 {
            return Err(PalimpsestError::validation("ocr.timeout_secs must be greater than zero"));
        }

        if let Some(threshold) = self.compression.jbig2_threshold
            && !(threshold > 0.0 && threshold <= 1.0)
        {
            return Err(PalimpsestError::validation(format!(
                "compression.jbig2_threshold must be in (0, 1], got {}",
                threshold
            )));
        }

        for name in &self.plugins {
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(PalimpsestError::validation(format!("Invalid plugin name '{}'", name)));
            }
        }

        if let Some(key) = self.plugin_options.keys().find(|k| !OPTION_KEY.is_match(k)) {
            return Err(PalimpsestError::validation(format!("Invalid plugin option name '{}'", key)));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert!(config.policy.is_none());
        assert_eq!(config.render.dpi, 300);
        assert_eq!(config.compression.jbig2_threshold, Some(0.85));
        assert_eq!(config.compliance.max_retries, 2);
        assert_eq!(config.executor.mode, ExecutorMode::Threads);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("palimpsest.toml");

        fs::write(
            &config_path,
            r#"
policy = "redo_ocr"
strict = true
plugins = ["grayscale-ocr-image"]

[ocr]
language = "eng+deu"

[executor]
mode = "processes"
max_workers = 3

[compression]
jbig2_lossy = true

[compliance]
profile = "pdfa-1b"
max_retries = 4
        "#,
        )
        .unwrap();

        let config = PipelineConfig::from_toml_file(&config_path).unwrap();
        assert_eq!(config.policy, Some(OcrPolicy::RedoOcr));
        assert!(config.strict);
        assert_eq!(config.ocr.language, "eng+deu");
        assert_eq!(config.ocr.engine, "tesseract");
        assert_eq!(config.executor.mode, ExecutorMode::Processes);
        assert_eq!(config.executor.resolved_workers(), 3);
        assert!(config.compression.jbig2_lossy);
        assert_eq!(config.compliance.profile, ComplianceProfile::PdfA1b);
        assert_eq!(config.compliance.max_retries, 4);
        assert_eq!(config.plugins, vec!["grayscale-ocr-image".to_string()]);
    }

    #[test]
    fn test_from_yaml_and_json_files() {
        let dir = tempdir().unwrap();
        let yaml_path = dir.path().join("config.yaml");
        fs::write(&yaml_path, "ocr:\n  engine: sidecar\nrender:\n  dpi: 400\n").unwrap();
        let config = PipelineConfig::from_file(&yaml_path).unwrap();
        assert_eq!(config.ocr.engine, "sidecar");
        assert_eq!(config.render.dpi, 400);

        let json_path = dir.path().join("config.json");
        fs::write(&json_path, r#"{"policy": "force_ocr", "executor": {"max_workers": 0}}"#).unwrap();
        let config = PipelineConfig::from_file(&json_path).unwrap();
        assert_eq!(config.policy, Some(OcrPolicy::ForceOcr));
        assert!(config.executor.resolved_workers() >= 1);
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let err = PipelineConfig::from_file("settings.ini").unwrap_err();
        assert!(matches!(err, PalimpsestError::Validation { .. }));
    }

    #[test]
    fn test_discover_from_parent_directory() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "strict = true\n").unwrap();
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        let config = PipelineConfig::discover_from(&nested).unwrap().expect("config should be found");
        assert!(config.strict);
    }

    #[test]
    fn test_policy_flags_are_mutually_exclusive() {
        assert_eq!(PipelineConfig::policy_from_flags(false, false, false).unwrap(), None);
        assert_eq!(
            PipelineConfig::policy_from_flags(false, true, false).unwrap(),
            Some(OcrPolicy::ForceOcr)
        );
        let err = PipelineConfig::policy_from_flags(true, true, false).unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        let mut config = PipelineConfig::default();
        config.render.dpi = 20;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.compression.jbig2_threshold = Some(1.5);
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.plugins.push("bad name".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_language_and_option_names() {
        let mut config = PipelineConfig::default();
        config.ocr.language = "eng+chi_sim+script/Latin".to_string();
        config
            .plugin_options
            .insert("grayscale-ocr-image.threshold".to_string(), "0.5".to_string());
        assert!(config.validate().is_ok());

        config.ocr.language = "eng --psm 3".to_string();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.plugin_options.insert("Bad Key".to_string(), "1".to_string());
        assert!(config.validate().is_err());
    }
}
