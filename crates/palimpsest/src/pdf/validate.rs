//! Compliance validation of assembled documents.

use crate::core::config::{ComplianceConfig, ValidatorKind};
use crate::pdf::assemble::declared_pdfa_part;
use crate::types::ComplianceProfile;
use crate::utils::{run_tool, stderr_tail};
use crate::{PalimpsestError, Result};
use async_trait::async_trait;
use lopdf::{Document, Object};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio::time::Duration;

/// Verdict for one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub passed: bool,
    #[serde(default)]
    pub violations: Vec<String>,
}

impl ValidationReport {
    pub fn pass() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    pub fn from_violations(violations: Vec<String>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }
}

/// Checks a candidate document against a compliance profile.
///
/// A failing check is a report with `passed == false`; `Err` means the validator itself could
/// not run. External validators stop when `cancel` fires.
#[async_trait]
pub trait ComplianceValidator: Send + Sync {
    fn name(&self) -> &str;

    async fn validate(
        &self,
        candidate: &Path,
        profile: ComplianceProfile,
        cancel: &CancellationToken,
    ) -> Result<ValidationReport>;
}

/// Build the validator selected in configuration.
pub fn validator_for(config: &ComplianceConfig) -> Arc<dyn ComplianceValidator> {
    match config.validator {
        ValidatorKind::Structural => Arc::new(StructuralValidator),
        ValidatorKind::Verapdf => Arc::new(VeraPdfValidator::new(
            config.verapdf_program.clone(),
            Duration::from_secs(config.timeout_secs),
        )),
        ValidatorKind::None => Arc::new(AcceptAll),
    }
}

/// Built-in checks of the properties the assembler controls.
#[derive(Debug, Clone, Default)]
pub struct StructuralValidator;

impl StructuralValidator {
    pub fn check(doc: &Document, profile: ComplianceProfile) -> Vec<String> {
        let mut violations = Vec::new();

        if doc.trailer.get(b"Encrypt").is_ok() {
            violations.push("document is encrypted".to_string());
        }

        let pages = doc.get_pages();
        if pages.is_empty() {
            violations.push("document has no pages".to_string());
        }

        let Some(part) = profile.pdfa_part() else {
            return violations;
        };

        if profile == ComplianceProfile::PdfA1b && doc.version.as_str() > "1.4" {
            violations.push(format!("PDF/A-1 requires PDF 1.4 or earlier, found {}", doc.version));
        }

        match declared_pdfa_part(doc) {
            Some(declared) if declared == part => {}
            Some(declared) => violations.push(format!("metadata declares PDF/A-{}, expected PDF/A-{}", declared, part)),
            None => violations.push("missing PDF/A identification in XMP metadata".to_string()),
        }

        if let Ok(catalog) = doc.catalog() {
            if catalog.get(b"AA").is_ok() {
                violations.push("catalog has additional actions".to_string());
            }
            if has_javascript(doc, catalog.get(b"OpenAction").ok()) {
                violations.push("open action runs JavaScript".to_string());
            }
            let names = catalog.get(b"Names").ok().map(|o| resolve(doc, o));
            if let Some(Object::Dictionary(names)) = names
                && names.get(b"JavaScript").is_ok()
            {
                violations.push("document-level JavaScript is present".to_string());
            }
        }

        for (number, id) in pages {
            let Ok(page) = doc.get_dictionary(id) else {
                continue;
            };
            if page.get(b"AA").is_ok() {
                violations.push(format!("page {} has additional actions", number));
            }
            if profile == ComplianceProfile::PdfA1b && page.get(b"Group").is_ok() {
                violations.push(format!("page {} uses a transparency group", number));
            }
        }

        violations
    }
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> &'a Object {
    match object {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(object),
        _ => object,
    }
}

fn has_javascript(doc: &Document, action: Option<&Object>) -> bool {
    match action.map(|o| resolve(doc, o)) {
        Some(Object::Dictionary(dict)) => dict
            .get(b"S")
            .and_then(Object::as_name)
            .is_ok_and(|name| name == b"JavaScript"),
        _ => false,
    }
}

#[async_trait]
impl ComplianceValidator for StructuralValidator {
    fn name(&self) -> &str {
        "structural"
    }

    async fn validate(
        &self,
        candidate: &Path,
        profile: ComplianceProfile,
        _cancel: &CancellationToken,
    ) -> Result<ValidationReport> {
        let path = candidate.to_path_buf();
        tokio::task::spawn_blocking(move || match Document::load(&path) {
            Ok(doc) => ValidationReport::from_violations(Self::check(&doc, profile)),
            Err(e) => ValidationReport::from_violations(vec![format!("not a valid PDF: {}", e)]),
        })
        .await
        .map_err(|e| PalimpsestError::Other(format!("Validation task failed: {}", e)))
    }
}

/// Runs the veraPDF command-line validator.
#[derive(Debug, Clone)]
pub struct VeraPdfValidator {
    program: String,
    timeout: Duration,
}

impl VeraPdfValidator {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn flavour(profile: ComplianceProfile) -> Option<String> {
        profile.pdfa_part().map(|part| format!("{}b", part))
    }

    /// Parse `--format text` output: one `PASS <file>` or `FAIL <file>` line, followed by rule
    /// failures when verbose.
    fn parse(stdout: &str) -> Option<ValidationReport> {
        let mut verdict = None;
        let mut violations = Vec::new();

        for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if line.starts_with("PASS ") {
                verdict = Some(true);
            } else if line.starts_with("FAIL ") {
                verdict = Some(false);
            } else if verdict.is_some() {
                violations.push(line.to_string());
            }
        }

        verdict.map(|passed| ValidationReport {
            passed,
            violations: if passed { Vec::new() } else { violations },
        })
    }
}

#[async_trait]
impl ComplianceValidator for VeraPdfValidator {
    fn name(&self) -> &str {
        "verapdf"
    }

    async fn validate(
        &self,
        candidate: &Path,
        profile: ComplianceProfile,
        cancel: &CancellationToken,
    ) -> Result<ValidationReport> {
        let Some(flavour) = Self::flavour(profile) else {
            return Ok(ValidationReport::pass());
        };

        let args: Vec<PathBuf> = vec![
            "--flavour".into(),
            flavour.into(),
            "--format".into(),
            "text".into(),
            "--verbose".into(),
            candidate.to_path_buf(),
        ];
        let output = run_tool(&self.program, &args, self.timeout, cancel).await?;

        Self::parse(&output.stdout_lossy()).ok_or_else(|| {
            PalimpsestError::compliance(format!(
                "{} produced no verdict (exit code {:?}): {}",
                self.program,
                output.code,
                stderr_tail(&output.stderr, 5)
            ))
        })
    }
}

/// Accepts every candidate.
#[derive(Debug, Clone, Default)]
pub struct AcceptAll;

#[async_trait]
impl ComplianceValidator for AcceptAll {
    fn name(&self) -> &str {
        "none"
    }

    async fn validate(
        &self,
        _candidate: &Path,
        _profile: ComplianceProfile,
        _cancel: &CancellationToken,
    ) -> Result<ValidationReport> {
        Ok(ValidationReport::pass())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RenderConfig;
    use crate::pdf::assemble::{GenerationPass, LopdfAssembler, OutputAssembler};
    use crate::pdf::loader::{AutoLoader, DocumentLoader};
    use crate::types::{CompressionChoice, PageResult};
    use tempfile::tempdir;

    async fn candidate(dir: &Path, profile: ComplianceProfile) -> PathBuf {
        let image = dir.join("page.png");
        image::GrayImage::new(50, 50).save(&image).unwrap();
        let document = AutoLoader::new(&RenderConfig::default()).load(&image).unwrap();
        let out = dir.join(format!("{}.pdf", profile));
        LopdfAssembler
            .assemble(
                &document,
                &[PageResult::copied(0, CompressionChoice::CcittG4)],
                &GenerationPass::for_attempt(0),
                profile,
                &out,
            )
            .unwrap();
        out
    }

    #[tokio::test]
    async fn test_structural_validator_accepts_assembled_output() {
        let dir = tempdir().unwrap();
        for profile in [ComplianceProfile::PdfA1b, ComplianceProfile::PdfA2b, ComplianceProfile::Pdf] {
            let path = candidate(dir.path(), profile).await;
            let report = StructuralValidator.validate(&path, profile, &CancellationToken::new()).await.unwrap();
            assert!(report.passed, "{}: {:?}", profile, report.violations);
        }
    }

    #[tokio::test]
    async fn test_structural_validator_reports_profile_mismatch() {
        let dir = tempdir().unwrap();
        let path = candidate(dir.path(), ComplianceProfile::Pdf).await;
        let report = StructuralValidator
            .validate(&path, ComplianceProfile::PdfA2b, &CancellationToken::new())
            .await.unwrap();
        assert!(!report.passed);
        assert!(report.violations.iter().any(|v| v.contains("XMP")));
    }

    #[tokio::test]
    async fn test_structural_validator_reports_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"%PDF-1.7 broken").unwrap();
        let report = StructuralValidator
            .validate(&path, ComplianceProfile::PdfA2b, &CancellationToken::new())
            .await.unwrap();
        assert!(!report.passed);
    }

    #[test]
    fn test_verapdf_output_parsing() {
        let report = VeraPdfValidator::parse("PASS /tmp/out.pdf\n").unwrap();
        assert!(report.passed);

        let report = VeraPdfValidator::parse("FAIL /tmp/out.pdf\n  6.1.3-1 trailer has Encrypt\n").unwrap();
        assert!(!report.passed);
        assert_eq!(report.violations, vec!["6.1.3-1 trailer has Encrypt".to_string()]);

        assert!(VeraPdfValidator::parse("java.lang.OutOfMemoryError").is_none());
    }

    #[tokio::test]
    async fn test_validator_selection() {
        let mut config = ComplianceConfig::default();
        assert_eq!(validator_for(&config).name(), "structural");
        config.validator = ValidatorKind::None;
        let validator = validator_for(&config);
        assert_eq!(validator.name(), "none");
        let report = validator
            .validate(Path::new("/nonexistent.pdf"), ComplianceProfile::PdfA2b, &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.passed);
    }
}
