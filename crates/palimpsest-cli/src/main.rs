//! Palimpsest CLI - add a searchable text layer to scanned PDFs.
//!
//! ```text
//! palimpsest ocr scan.pdf out.pdf --skip-text --output-type pdfa-2b --jobs 4
//! palimpsest ocr pages/ out.pdf --engine sidecar --hocr-dir hocr/
//! palimpsest plugins
//! ```
//!
//! The process exits with the code of the pipeline outcome (see `palimpsest::ExitCode`).

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use palimpsest::core::config::ValidatorKind;
use palimpsest::plugins::HookPoint;
use palimpsest::{
    ComplianceProfile, ExecutorMode, ExitCode, PalimpsestError, Pipeline, PipelineConfig, PipelineOutcome, PluginCatalog,
};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "palimpsest")]
#[command(about = "Page-parallel OCR for scanned PDFs and page images", long_about = None)]
#[command(version)]
struct Cli {
    /// Log debug output (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Add a text layer to a PDF or a set of page images
    Ocr(OcrArgs),
    /// List available plugins and their hook registrations
    Plugins(PluginsArgs),
    /// Serve the worker protocol on stdin/stdout
    #[command(hide = true)]
    Worker,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum WorkerKind {
    Threads,
    Processes,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ValidatorArg {
    Structural,
    Verapdf,
    None,
}

#[derive(Args)]
struct OcrArgs {
    /// Input PDF, page image, or directory of page images
    input: PathBuf,

    /// Output PDF
    output: PathBuf,

    /// Configuration file (.toml, .yaml or .json); palimpsest.toml is discovered otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Copy pages that already contain text
    #[arg(long)]
    skip_text: bool,

    /// Rasterize and OCR every page, replacing existing content
    #[arg(long)]
    force_ocr: bool,

    /// Replace existing OCR text while keeping printed vector text
    #[arg(long)]
    redo_ocr: bool,

    /// Fail when a page already contains text and no policy was given
    #[arg(long)]
    strict: bool,

    /// OCR language(s), e.g. eng or eng+deu
    #[arg(short, long)]
    language: Option<String>,

    /// OCR engine (tesseract or sidecar)
    #[arg(long)]
    engine: Option<String>,

    /// Directory with page-NNNN.hocr files for the sidecar engine
    #[arg(long)]
    hocr_dir: Option<PathBuf>,

    /// Rendering resolution for PDF pages
    #[arg(long)]
    dpi: Option<u32>,

    /// Maximum pages processed at once (0 = number of CPUs)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Worker backend
    #[arg(long, value_enum)]
    workers: Option<WorkerKind>,

    /// Output profile: pdf, pdfa-1b, pdfa-2b or pdfa-3b
    #[arg(long)]
    output_type: Option<ComplianceProfile>,

    /// Validator used on candidate outputs
    #[arg(long, value_enum)]
    validator: Option<ValidatorArg>,

    /// Corrective passes after a candidate fails validation
    #[arg(long)]
    max_retries: Option<u32>,

    /// Allow lossy JBIG2 symbol matching
    #[arg(long)]
    jbig2_lossy: bool,

    /// Never use JBIG2
    #[arg(long, conflicts_with = "jbig2_lossy")]
    no_jbig2: bool,

    /// Enable a built-in plugin (repeatable)
    #[arg(long = "plugin")]
    plugins: Vec<String>,

    /// Plugin option as key=value (repeatable)
    #[arg(short = 'O', value_parser = parse_option)]
    options: Vec<(String, String)>,

    /// Write recognized text, one form-feed separated page each
    #[arg(long)]
    sidecar: Option<PathBuf>,

    /// Print the outcome as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct PluginsArgs {
    /// Configuration file used to resolve plugin options
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn parse_option(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_file(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(PipelineConfig::discover()?.unwrap_or_default()),
    }
}

/// Layer command-line flags over the loaded configuration.
fn apply_args(config: &mut PipelineConfig, args: &OcrArgs) -> Result<()> {
    if let Some(policy) = PipelineConfig::policy_from_flags(args.skip_text, args.force_ocr, args.redo_ocr)? {
        config.policy = Some(policy);
    }
    config.strict |= args.strict;

    if let Some(language) = &args.language {
        config.ocr.language = language.clone();
    }
    if let Some(engine) = &args.engine {
        config.ocr.engine = engine.clone();
    }
    if let Some(dir) = &args.hocr_dir {
        config.ocr.hocr_dir = Some(dir.clone());
    }
    if let Some(dpi) = args.dpi {
        config.render.dpi = dpi;
    }
    if let Some(jobs) = args.jobs {
        config.executor.max_workers = Some(jobs);
    }
    if let Some(kind) = args.workers {
        config.executor.mode = match kind {
            WorkerKind::Threads => ExecutorMode::Threads,
            WorkerKind::Processes => ExecutorMode::Processes,
        };
    }
    if config.executor.mode == ExecutorMode::Processes && config.executor.worker_program.is_none() {
        config.executor.worker_program = Some(std::env::current_exe().context("locating the palimpsest binary")?);
        config.executor.worker_args = vec!["worker".to_string()];
    }
    if let Some(profile) = args.output_type {
        config.compliance.profile = profile;
    }
    if let Some(validator) = args.validator {
        config.compliance.validator = match validator {
            ValidatorArg::Structural => ValidatorKind::Structural,
            ValidatorArg::Verapdf => ValidatorKind::Verapdf,
            ValidatorArg::None => ValidatorKind::None,
        };
    }
    if let Some(retries) = args.max_retries {
        config.compliance.max_retries = retries;
    }
    if args.jbig2_lossy {
        config.compression.jbig2_lossy = true;
    }
    if args.no_jbig2 {
        config.compression.jbig2 = false;
    }
    for plugin in &args.plugins {
        if !config.plugins.contains(plugin) {
            config.plugins.push(plugin.clone());
        }
    }
    for (key, value) in &args.options {
        config.plugin_options.insert(key.clone(), value.clone());
    }
    Ok(())
}

async fn run_ocr(args: OcrArgs) -> Result<ExitCode> {
    let mut config = load_config(args.config.as_deref())?;
    apply_args(&mut config, &args)?;

    let pipeline = Pipeline::new(config)?;
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing pages in progress");
            on_signal.cancel();
        }
    });

    let outcome = pipeline.run(&args.input, &args.output, &cancel).await;
    pipeline.shutdown();
    let outcome = outcome?;

    if let Some(path) = &args.sidecar
        && !outcome.pages.is_empty()
    {
        std::fs::write(path, outcome.sidecar_text()).with_context(|| format!("writing {}", path.display()))?;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_summary(&outcome);
    }

    Ok(outcome.exit_code())
}

fn print_summary(outcome: &PipelineOutcome) {
    for page in &outcome.pages {
        match &page.error {
            Some(error) => eprintln!("page {:>4}: {:?} - {}", page.page_number(), page.mode, error),
            None => eprintln!("page {:>4}: {:?}", page.page_number(), page.mode),
        }
    }
    for diagnostic in &outcome.diagnostics {
        eprintln!("{:?}: {}", diagnostic.level, diagnostic.message);
    }
    if let Some(compliance) = &outcome.compliance {
        eprintln!(
            "{}: {} after {} attempt(s)",
            compliance.profile,
            if compliance.passed { "valid" } else { "not valid" },
            compliance.attempts
        );
    }
    if let Some(fatal) = &outcome.fatal {
        eprintln!("{}", fatal);
    }
    eprintln!("{} ({} pages)", outcome.status, outcome.page_count);
}

fn run_plugins(args: PluginsArgs) -> Result<ExitCode> {
    let mut config = load_config(args.config.as_deref())?;
    let catalog = PluginCatalog::builtin();
    config.plugins = catalog.names().map(str::to_string).collect();
    let registry = catalog.build_registry(&config)?;

    println!("plugins: {}", registry.plugin_names().join(", "));
    for point in HookPoint::ALL {
        let registered = registry.registrations(point);
        println!(
            "{:<26} {:<13} {}",
            point.name(),
            format!("{:?}", point.dispatch_mode()),
            if registered.is_empty() { "-".to_string() } else { registered.join(", ") }
        );
    }
    for (plugin, specs) in registry.add_options().results {
        for spec in specs {
            println!("  -O {} ({}): {}", spec.name, plugin, spec.help);
        }
    }
    registry.shutdown();
    Ok(ExitCode::Ok)
}

fn exit_code_for(error: &anyhow::Error) -> ExitCode {
    error
        .downcast_ref::<PalimpsestError>()
        .map(PalimpsestError::exit_code)
        .unwrap_or(ExitCode::OtherError)
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            let code = if e.use_stderr() { ExitCode::BadArgs } else { ExitCode::Ok };
            std::process::exit(code.code());
        }
    };

    let default_filter = if cli.verbose { "palimpsest=debug" } else { "palimpsest=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let result = match cli.command {
        Command::Ocr(args) => run_ocr(args).await,
        Command::Plugins(args) => run_plugins(args),
        Command::Worker => palimpsest::serve_stdio_worker()
            .await
            .map(|_| ExitCode::Ok)
            .map_err(anyhow::Error::from),
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            exit_code_for(&e)
        }
    };
    std::process::exit(code.code());
}
