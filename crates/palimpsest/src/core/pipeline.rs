//! Pipeline orchestration.
//!
//! A run goes through these steps:
//! 1. Check the configuration and plugin options
//! 2. Load the input and build one [`PageUnit`](crate::types::PageUnit) per page
//! 3. Submit every page to the executor as a single batch
//! 4. Reassemble results by page index
//! 5. Generate and validate candidates, retrying with more conservative passes
//! 6. Move the chosen candidate to the output path in one rename
//!
//! # Errors
//!
//! - Configuration problems are returned as `Err` before any work starts
//! - Input errors, strict-mode conflicts and documents where no page could be produced end in a
//!   `fatal` outcome
//! - Page errors and compliance failures are reported on the outcome and never abort the run
//! - Cancellation yields an `interrupted` outcome with the pages that completed, and no output

use crate::core::config::{ExecutorMode, PipelineConfig};
use crate::core::executor::{Executor, Outcome, PageJob, PageWork, ProcessExecutor, ThreadExecutor};
use crate::core::stages::{PageProcessor, classify};
use crate::error::ErrorClass;
use crate::pdf::{
    AutoLoader, ComplianceValidator, DocumentLoader, GenerationPass, InputDocument, LopdfAssembler, OutputAssembler,
    validator_for,
};
use crate::plugins::{GenerationRequest, HookRegistry, PluginCatalog};
use crate::types::{
    ComplianceReport, CompressionChoice, Diagnostic, PageFailure, PageResult, PageState, PipelineOutcome,
    PipelineStatus,
};
use crate::{PalimpsestError, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Warning attached when no candidate passed validation.
pub const BEST_EFFORT_WARNING: &str = "could not produce compliant output, returning best-effort result";

/// Coordinates one document from input to output.
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    registry: Arc<HookRegistry>,
    loader: Arc<dyn DocumentLoader>,
    assembler: Arc<dyn OutputAssembler>,
    validator: Arc<dyn ComplianceValidator>,
    page_work: Option<Arc<dyn PageWork>>,
    executor: Option<Arc<dyn Executor>>,
}

impl Pipeline {
    /// Build a pipeline with the built-in plugins named in `config.plugins`.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let registry = PluginCatalog::builtin().build_registry(&config)?;
        Ok(Self::with_registry(config, registry))
    }

    /// Build a pipeline around an already populated registry.
    ///
    /// Plugins registered here reach worker processes only if they are also named in
    /// `config.plugins`; [`Pipeline::run`] rejects anything else in process mode.
    pub fn with_registry(config: PipelineConfig, registry: HookRegistry) -> Self {
        Self {
            loader: Arc::new(AutoLoader::new(&config.render)),
            assembler: Arc::new(LopdfAssembler),
            validator: validator_for(&config.compliance),
            config: Arc::new(config),
            registry: Arc::new(registry),
            page_work: None,
            executor: None,
        }
    }

    pub fn with_loader(mut self, loader: Arc<dyn DocumentLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_assembler(mut self, assembler: Arc<dyn OutputAssembler>) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn ComplianceValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Page work used by the thread executor instead of the default [`PageProcessor`].
    pub fn with_page_work(mut self, work: Arc<dyn PageWork>) -> Self {
        self.page_work = Some(work);
        self
    }

    /// Replace the executor chosen from `executor.mode`.
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<HookRegistry> {
        &self.registry
    }

    /// Shut down the registered plugins.
    pub fn shutdown(&self) {
        self.registry.shutdown();
    }

    fn executor(&self) -> Arc<dyn Executor> {
        if let Some(executor) = &self.executor {
            return Arc::clone(executor);
        }

        match self.config.executor.mode {
            ExecutorMode::Threads => {
                let work = self.page_work.clone().unwrap_or_else(|| {
                    Arc::new(PageProcessor::new(Arc::clone(&self.config), Arc::clone(&self.registry)))
                });
                Arc::new(ThreadExecutor::new(work, self.config.executor.resolved_workers()))
            }
            ExecutorMode::Processes => Arc::new(ProcessExecutor::from_config(&self.config)),
        }
    }

    /// Reject configuration problems before any page is touched.
    pub fn check_config(&self) -> Result<()> {
        self.config.validate()?;

        if let Some(failure) = self.registry.check_options(&self.config).failures.into_iter().next() {
            return Err(PalimpsestError::validation(failure.to_string()));
        }

        let declared = self.registry.add_options();
        if let Some(failure) = declared.failures.into_iter().next() {
            return Err(PalimpsestError::validation(failure.to_string()));
        }
        let known: HashSet<String> = declared
            .results
            .into_iter()
            .flat_map(|(_, specs)| specs.into_iter().map(|spec| spec.name))
            .collect();
        if let Some(unknown) = self.config.plugin_options.keys().find(|key| !known.contains(*key)) {
            return Err(PalimpsestError::validation(format!("Unknown plugin option '{}'", unknown)));
        }

        if self.executor.is_none() && self.config.executor.mode == ExecutorMode::Processes {
            for id in self.registry.plugin_ids() {
                if !self.config.plugins.contains(&id) {
                    return Err(PalimpsestError::validation(format!(
                        "Plugin '{}' cannot be loaded by worker processes; list it in `plugins` or use the thread executor",
                        id
                    )));
                }
            }
        }

        Ok(())
    }

    /// Process `input` and write the result to `output`.
    #[tracing::instrument(skip_all, fields(input = %input.display(), output = %output.display()))]
    pub async fn run(&self, input: &Path, output: &Path, cancel: &CancellationToken) -> Result<PipelineOutcome> {
        self.check_config()?;

        let loader = Arc::clone(&self.loader);
        let input_path = input.to_path_buf();
        let loaded = tokio::task::spawn_blocking(move || loader.load(&input_path))
            .await
            .map_err(|e| PalimpsestError::Other(format!("Loader task failed: {}", e)))?;

        let document = match loaded {
            Ok(document) => Arc::new(document),
            Err(e) if e.class() == ErrorClass::Input => {
                tracing::error!(error = %e, "Cannot open input");
                return Ok(fatal(0, Vec::new(), Vec::new(), PageFailure::from(&e)));
            }
            Err(e) => return Err(e),
        };

        let page_count = document.page_count();
        let units = document.page_units(self.config.policy);
        let scratch = tempfile::Builder::new().prefix("palimpsest-").tempdir()?;
        let jobs: Vec<PageJob> = units
            .iter()
            .map(|unit| PageJob {
                work_dir: scratch.path().join(format!("page-{:04}", unit.page_number())),
                unit: unit.clone(),
            })
            .collect();

        let executor = self.executor();
        tracing::info!(
            pages = page_count,
            mode = ?executor.mode(),
            workers = executor.max_workers(),
            "Processing pages"
        );

        let outcomes = executor.submit(jobs, cancel).await?;
        if outcomes.len() != page_count {
            return Err(PalimpsestError::Other(format!(
                "Executor returned {} outcomes for {} pages",
                outcomes.len(),
                page_count
            )));
        }

        let mut diagnostics = Vec::new();

        if cancel.is_cancelled() || outcomes.iter().any(|o| matches!(o, Outcome::Cancelled)) {
            let pages: Vec<PageResult> = outcomes.into_iter().filter_map(Outcome::completed).collect();
            return Ok(interrupted(page_count, pages, diagnostics));
        }

        let mut pages = Vec::with_capacity(page_count);
        for ((index, outcome), unit) in outcomes.into_iter().enumerate().zip(&units) {
            let page = match outcome {
                Outcome::Completed(result) => result,
                Outcome::Failed(failure) => {
                    PageResult::failed(index, classify(unit).mode, CompressionChoice::CcittG4, failure)
                }
                Outcome::Cancelled | Outcome::NotStarted => PageResult::failed(
                    index,
                    classify(unit).mode,
                    CompressionChoice::CcittG4,
                    PageFailure::new(ErrorClass::Other, "page was never processed"),
                ),
            };
            if page.index != index {
                return Err(PalimpsestError::Other(format!(
                    "Result for page {} arrived in slot {}",
                    page.page_number(),
                    index + 1
                )));
            }
            pages.push(page);
        }

        for page in &pages {
            if let Some(error) = &page.error {
                tracing::warn!(page = page.page_number(), class = %error.class, "{}", error.message);
            }
        }

        if self.config.strict
            && let Some(conflict) = pages
                .iter()
                .filter_map(|p| p.error.as_ref())
                .find(|e| e.class == ErrorClass::Classification)
        {
            let failure = conflict.clone();
            tracing::error!(error = %failure, "Strict mode: page conflicts with the OCR policy");
            return Ok(fatal(page_count, pages, diagnostics, failure));
        }

        if pages.iter().all(|p| p.state == PageState::Failed) {
            let failure = pages
                .iter()
                .find_map(|p| p.error.clone())
                .unwrap_or_else(|| PageFailure::new(ErrorClass::Other, "no page could be produced"));
            tracing::error!(error = %failure, "No page could be produced");
            return Ok(fatal(page_count, pages, diagnostics, failure));
        }

        let pages = Arc::new(pages);
        let (best, compliance) = match self
            .produce_compliant(&document, &pages, scratch.path(), cancel, &mut diagnostics)
            .await
        {
            Ok(produced) => produced,
            Err(e) if e.is_cancelled() => {
                return Ok(interrupted(page_count, unwrap_pages(pages), diagnostics));
            }
            Err(e) => {
                tracing::error!(error = %e, "Could not generate output");
                return Ok(fatal(page_count, unwrap_pages(pages), diagnostics, PageFailure::from(&e)));
            }
        };
        let pages = unwrap_pages(pages);

        if cancel.is_cancelled() {
            return Ok(interrupted(page_count, pages, diagnostics));
        }

        let destination = output.to_path_buf();
        tokio::task::spawn_blocking(move || persist(&best, &destination))
            .await
            .map_err(|e| PalimpsestError::Other(format!("Output task failed: {}", e)))??;

        let status = completed_status(&compliance, &pages, &diagnostics);

        tracing::info!(
            %status,
            pages = page_count,
            attempts = compliance.attempts,
            compliant = compliance.passed,
            "Pipeline finished"
        );

        Ok(PipelineOutcome {
            status,
            page_count,
            pages,
            compliance: Some(compliance),
            output: Some(output.to_path_buf()),
            diagnostics,
            fatal: None,
        })
    }

    /// Generate candidates until one validates or the retry bound is reached.
    ///
    /// Returns the last candidate produced, which is the most conservative one.
    async fn produce_compliant(
        &self,
        document: &Arc<InputDocument>,
        pages: &Arc<Vec<PageResult>>,
        scratch: &Path,
        cancel: &CancellationToken,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<(PathBuf, ComplianceReport)> {
        let profile = self.config.compliance.profile;
        let max_attempts = self.config.compliance.max_retries.saturating_add(1);
        let mut report = ComplianceReport {
            profile,
            attempts: 0,
            retries: 0,
            passed: false,
            violations: Vec::new(),
        };
        let mut best: Option<PathBuf> = None;

        for attempt in 0..max_attempts {
            if cancel.is_cancelled() {
                return Err(PalimpsestError::cancelled("before candidate generation"));
            }

            let pass = GenerationPass::for_attempt(attempt);
            let candidate = scratch.join(format!("candidate-{}.pdf", attempt));
            let generated = {
                let registry = Arc::clone(&self.registry);
                let assembler = Arc::clone(&self.assembler);
                let config = Arc::clone(&self.config);
                let document = Arc::clone(document);
                let pages = Arc::clone(pages);
                tokio::task::spawn_blocking(move || {
                    let request = GenerationRequest {
                        document: &document,
                        pages: &pages,
                        pass: &pass,
                        profile,
                        candidate: &candidate,
                        config: &config,
                    };
                    registry.generate_compliant_output(&request, || {
                        assembler.assemble(&document, &pages, &pass, profile, &candidate)?;
                        Ok(candidate.clone())
                    })
                })
                .await
                .map_err(|e| PalimpsestError::Other(format!("Generation task failed: {}", e)))?
            };

            let dispatched = match generated {
                Ok(dispatched) => dispatched,
                Err(e) if best.is_some() => {
                    tracing::warn!(attempt, error = %e, "Corrective pass failed, keeping previous candidate");
                    diagnostics.push(Diagnostic::warning(
                        ErrorClass::Compliance,
                        format!("corrective pass {} failed: {}", attempt, e),
                    ));
                    break;
                }
                Err(e) => return Err(e),
            };

            for failure in dispatched.failures {
                diagnostics
                    .push(Diagnostic::warning(ErrorClass::Plugin, failure.to_string()).with_plugin(failure.plugin_id));
            }
            if let Some(plugin) = &dispatched.provided_by {
                tracing::debug!(attempt, plugin = %plugin, "Candidate generated by plugin");
            }

            report.attempts = attempt + 1;
            let verdict = self.validator.validate(&dispatched.value, profile, cancel).await;
            best = Some(dispatched.value);

            match verdict {
                Err(e) if e.is_cancelled() => return Err(e),
                Ok(verdict) if verdict.passed => {
                    report.passed = true;
                    report.violations.clear();
                    break;
                }
                Ok(verdict) => {
                    tracing::warn!(
                        attempt,
                        violations = verdict.violations.len(),
                        validator = self.validator.name(),
                        "Candidate failed validation"
                    );
                    report.violations = verdict.violations;
                }
                Err(e) => {
                    tracing::warn!(validator = self.validator.name(), error = %e, "Validator could not run");
                    diagnostics.push(Diagnostic::warning(
                        ErrorClass::Compliance,
                        format!("validator '{}' could not run: {}", self.validator.name(), e),
                    ));
                    report.violations = vec![e.to_string()];
                    break;
                }
            }
        }

        report.retries = report.attempts.saturating_sub(1);
        if !report.passed {
            tracing::warn!(profile = %profile, "{}", BEST_EFFORT_WARNING);
            diagnostics.push(Diagnostic::warning(ErrorClass::Compliance, BEST_EFFORT_WARNING));
        }

        let best = best.ok_or_else(|| PalimpsestError::Other("No candidate document was generated".to_string()))?;
        Ok((best, report))
    }
}

fn unwrap_pages(pages: Arc<Vec<PageResult>>) -> Vec<PageResult> {
    Arc::try_unwrap(pages).unwrap_or_else(|shared| (*shared).clone())
}

fn fatal(page_count: usize, pages: Vec<PageResult>, diagnostics: Vec<Diagnostic>, failure: PageFailure) -> PipelineOutcome {
    PipelineOutcome {
        status: PipelineStatus::Fatal,
        page_count,
        pages,
        compliance: None,
        output: None,
        diagnostics,
        fatal: Some(failure),
    }
}

/// Status of a run that produced output.
///
/// Any page error, page warning or run warning, including best-effort compliance, makes it
/// `success-with-warnings`.
fn completed_status(compliance: &ComplianceReport, pages: &[PageResult], diagnostics: &[Diagnostic]) -> PipelineStatus {
    let page_warned = pages
        .iter()
        .any(|p| p.error.is_some() || p.diagnostics.iter().any(Diagnostic::is_warning));
    if compliance.passed && !page_warned && !diagnostics.iter().any(Diagnostic::is_warning) {
        PipelineStatus::Success
    } else {
        PipelineStatus::SuccessWithWarnings
    }
}

/// Cancellation is its own outcome, not a failure: `fatal` stays empty.
fn interrupted(page_count: usize, pages: Vec<PageResult>, mut diagnostics: Vec<Diagnostic>) -> PipelineOutcome {
    tracing::warn!(completed = pages.len(), pages = page_count, "Run interrupted");
    diagnostics.push(Diagnostic::warning(
        ErrorClass::Cancelled,
        format!("run interrupted after {} of {} pages", pages.len(), page_count),
    ));
    PipelineOutcome {
        status: PipelineStatus::Interrupted,
        page_count,
        pages,
        compliance: None,
        output: None,
        diagnostics,
        fatal: None,
    }
}

/// Copy `candidate` next to `output` and rename it into place.
fn persist(candidate: &Path, output: &Path) -> Result<()> {
    let parent = output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut staged = tempfile::Builder::new()
        .prefix(".palimpsest-")
        .suffix(".pdf")
        .tempfile_in(parent)?;
    let mut source = std::fs::File::open(candidate)?;
    std::io::copy(&mut source, staged.as_file_mut())?;
    staged.as_file().sync_all()?;
    staged.persist(output).map_err(|e| PalimpsestError::Io(e.error))?;

    tracing::debug!(output = %output.display(), "Output written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ValidatorKind;
    use crate::pdf::ValidationReport;
    use crate::types::{ComplianceProfile, PageMode};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct FailingChecks {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ComplianceValidator for FailingChecks {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn validate(
            &self,
            candidate: &Path,
            _profile: ComplianceProfile,
            _cancel: &CancellationToken,
        ) -> Result<ValidationReport> {
            assert!(candidate.is_file());
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                Ok(ValidationReport::from_violations(vec!["metadata missing".to_string()]))
            } else {
                Ok(ValidationReport::pass())
            }
        }
    }

    struct CopyPages;

    #[async_trait]
    impl PageWork for CopyPages {
        async fn run(&self, job: PageJob, _cancel: CancellationToken) -> Result<PageResult> {
            Ok(PageResult::copied(job.unit.index, CompressionChoice::CcittG4))
        }
    }

    fn pdf_input(dir: &Path) -> PathBuf {
        let input = dir.join("in.pdf");
        crate::pdf::fixtures::write_pdf(&input, &[(Vec::new(), 0), (Vec::new(), 0)]);
        input
    }

    fn pipeline(config: PipelineConfig, failures: usize) -> (Pipeline, Arc<FailingChecks>) {
        let validator = Arc::new(FailingChecks {
            failures,
            calls: AtomicUsize::new(0),
        });
        let pipeline = Pipeline::new(config)
            .unwrap()
            .with_page_work(Arc::new(CopyPages))
            .with_validator(validator.clone());
        (pipeline, validator)
    }

    #[test]
    fn test_page_and_run_warnings_downgrade_success() {
        let passed = ComplianceReport {
            profile: ComplianceProfile::PdfA2b,
            attempts: 1,
            retries: 0,
            passed: true,
            violations: Vec::new(),
        };
        let clean = vec![PageResult::copied(0, CompressionChoice::CcittG4)];
        let mut noted = clean.clone();
        noted[0].diagnostics.push(Diagnostic::info("no text recognized on page 1"));
        assert_eq!(completed_status(&passed, &clean, &[]), PipelineStatus::Success);
        assert_eq!(completed_status(&passed, &noted, &[]), PipelineStatus::Success);

        let mut recovered = clean.clone();
        recovered[0]
            .diagnostics
            .push(Diagnostic::warning(ErrorClass::Engine, "recovered with rasterize-first fallback"));
        assert_eq!(completed_status(&passed, &recovered, &[]), PipelineStatus::SuccessWithWarnings);

        let hook = Diagnostic::warning(ErrorClass::Plugin, "hook failed").with_plugin("tidy");
        assert_eq!(completed_status(&passed, &clean, &[hook]), PipelineStatus::SuccessWithWarnings);

        let best_effort = ComplianceReport { passed: false, ..passed };
        assert_eq!(completed_status(&best_effort, &clean, &[]), PipelineStatus::SuccessWithWarnings);
    }

    #[tokio::test]
    async fn test_retries_until_candidate_validates() {
        let dir = tempdir().unwrap();
        let input = pdf_input(dir.path());
        let output = dir.path().join("out.pdf");
        let (pipeline, validator) = pipeline(PipelineConfig::default(), 2);

        let outcome = pipeline.run(&input, &output, &CancellationToken::new()).await.unwrap();

        assert_eq!(outcome.status, PipelineStatus::Success);
        let compliance = outcome.compliance.unwrap();
        assert!(compliance.passed);
        assert_eq!(compliance.attempts, 3);
        assert_eq!(compliance.retries, 2);
        assert_eq!(validator.calls.load(Ordering::SeqCst), 3);
        assert!(output.is_file());
    }

    #[tokio::test]
    async fn test_retry_bound_yields_best_effort() {
        let dir = tempdir().unwrap();
        let input = pdf_input(dir.path());
        let output = dir.path().join("out.pdf");
        let mut config = PipelineConfig::default();
        config.compliance.max_retries = 1;
        let (pipeline, validator) = pipeline(config, usize::MAX);

        let outcome = pipeline.run(&input, &output, &CancellationToken::new()).await.unwrap();

        assert_eq!(outcome.status, PipelineStatus::SuccessWithWarnings);
        let compliance = outcome.compliance.as_ref().unwrap();
        assert!(!compliance.passed);
        assert_eq!(compliance.attempts, 2);
        assert_eq!(validator.calls.load(Ordering::SeqCst), 2);
        assert!(outcome.diagnostics.iter().any(|d| d.message == BEST_EFFORT_WARNING));
        assert_eq!(outcome.exit_code(), crate::error::ExitCode::ComplianceFailed);
        assert!(output.is_file());
    }

    #[tokio::test]
    async fn test_missing_input_is_fatal() {
        let dir = tempdir().unwrap();
        let (pipeline, _) = pipeline(PipelineConfig::default(), 0);

        let outcome = pipeline
            .run(&dir.path().join("missing.pdf"), &dir.path().join("out.pdf"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, PipelineStatus::Fatal);
        assert_eq!(outcome.fatal.unwrap().class, ErrorClass::Input);
        assert!(!dir.path().join("out.pdf").exists());
    }

    #[tokio::test]
    async fn test_unknown_plugin_option_is_rejected() {
        let dir = tempdir().unwrap();
        let input = pdf_input(dir.path());
        let mut config = PipelineConfig::default();
        config.plugin_options.insert("nobody.declares".to_string(), "1".to_string());
        let (pipeline, _) = pipeline(config, 0);

        let err = pipeline
            .run(&input, &dir.path().join("out.pdf"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PalimpsestError::Validation { .. }));
    }

    #[test]
    fn test_unnamed_plugin_rejected_in_process_mode() {
        let mut registry = HookRegistry::new();
        registry
            .register(
                crate::plugins::HookPoint::ChooseOcrEngine,
                "in-memory-only",
                crate::plugins::HookImpl::choose_ocr_engine(|_ctx| Ok(None)),
            )
            .unwrap();
        let mut config = PipelineConfig::default();
        config.executor.mode = ExecutorMode::Processes;

        let err = Pipeline::with_registry(config, registry).check_config().unwrap_err();
        assert!(err.to_string().contains("in-memory-only"));
    }

    #[tokio::test]
    async fn test_all_pages_failed_is_fatal() {
        struct Broken;

        #[async_trait]
        impl PageWork for Broken {
            async fn run(&self, _job: PageJob, _cancel: CancellationToken) -> Result<PageResult> {
                Err(PalimpsestError::engine("engine missing"))
            }
        }

        let dir = tempdir().unwrap();
        let input = pdf_input(dir.path());
        let mut config = PipelineConfig::default();
        config.compliance.validator = ValidatorKind::None;
        let pipeline = Pipeline::new(config).unwrap().with_page_work(Arc::new(Broken));

        let outcome = pipeline
            .run(&input, &dir.path().join("out.pdf"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, PipelineStatus::Fatal);
        assert_eq!(outcome.fatal.as_ref().map(|f| f.class), Some(ErrorClass::Engine));
        assert_eq!(outcome.pages.len(), 2);
        assert!(outcome.pages.iter().all(|p| p.mode == PageMode::Ocr));
    }

    #[test]
    fn test_persist_replaces_output() {
        let dir = tempdir().unwrap();
        let candidate = dir.path().join("candidate.pdf");
        let output = dir.path().join("out.pdf");
        std::fs::write(&candidate, b"%PDF-1.7 new").unwrap();
        std::fs::write(&output, b"old").unwrap();

        persist(&candidate, &output).unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"%PDF-1.7 new");
    }
}
