//! Pipeline orchestration.
//!
//! - **Configuration** (`config`): loading, discovery and validation of [`PipelineConfig`]
//! - **Stages** (`stages`): classification and the per-page stage functions
//! - **Executor** (`executor`): bounded page execution on tasks or worker processes
//! - **Pipeline** (`pipeline`): load, fan out, reassemble, validate, write
//!
//! # Example
//!
//! ```rust,no_run
//! use palimpsest::core::config::PipelineConfig;
//! use palimpsest::core::pipeline::Pipeline;
//! use std::path::Path;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> palimpsest::Result<()> {
//! let pipeline = Pipeline::new(PipelineConfig::default())?;
//! let outcome = pipeline
//!     .run(Path::new("scan.pdf"), Path::new("searchable.pdf"), &CancellationToken::new())
//!     .await?;
//! println!("{}: {} pages", outcome.status, outcome.page_count);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod executor;
pub mod pipeline;
pub mod stages;

pub use config::{
    CompressionConfig, ComplianceConfig, ExecutorConfig, ExecutorMode, OcrConfig, PipelineConfig, RenderConfig,
    ValidatorKind,
};
pub use executor::{Executor, Outcome, PageJob, PageWork, ProcessExecutor, ThreadExecutor};
pub use pipeline::Pipeline;
pub use stages::{Decision, PageProcessor, classify};

use executor::process::serve_worker;
use std::sync::Arc;

/// Serve the worker protocol on stdin/stdout until the coordinator shuts this process down.
///
/// The page work is a [`PageProcessor`] built from the configuration sent by the coordinator.
pub async fn serve_stdio_worker() -> crate::Result<()> {
    serve_worker(tokio::io::stdin(), tokio::io::stdout(), |config| {
        let processor = PageProcessor::from_config(config)?;
        tracing::debug!(plugins = ?processor.registry().plugin_names(), "Worker configured");
        Ok(Arc::new(processor) as Arc<dyn PageWork>)
    })
    .await
}
