//! Palimpsest - page-parallel OCR for PDFs and page images
//!
//! Palimpsest turns scanned PDFs (or sets of page images) into searchable PDFs with an invisible
//! text layer, optionally conforming to PDF/A. Pages are classified, rasterized, recognized and
//! turned into text layers independently and in parallel; the results are reassembled in page
//! order and validated against the requested output profile.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use palimpsest::{OcrPolicy, Pipeline, PipelineConfig};
//! use std::path::Path;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> palimpsest::Result<()> {
//! let config = PipelineConfig {
//!     policy: Some(OcrPolicy::SkipText),
//!     ..Default::default()
//! };
//! let outcome = Pipeline::new(config)?
//!     .run(Path::new("scan.pdf"), Path::new("out.pdf"), &CancellationToken::new())
//!     .await?;
//! std::process::exit(outcome.exit_code().code());
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Core Module** (`core`): configuration, stage functions, executors and the pipeline
//! - **Plugin System** (`plugins`): hook registry with collect-all and first-result dispatch
//! - **OCR** (`ocr`): engines producing hOCR (Tesseract, hOCR sidecars)
//! - **PDF** (`pdf`): input analysis, text layer synthesis, assembly and validation
//! - **Raster** (`raster`): page rendering and bitonal compression selection

#![deny(unsafe_code)]

pub mod core;
pub mod error;
pub mod ocr;
pub mod pdf;
pub mod plugins;
pub mod raster;
pub mod types;
pub mod utils;

pub use error::{ErrorClass, ExitCode, PalimpsestError, Result};
pub use types::*;

pub use core::config::{ExecutorMode, PipelineConfig};
pub use core::pipeline::Pipeline;
pub use core::serve_stdio_worker;
pub use core::stages::{PageProcessor, classify};

pub use plugins::{HookRegistry, PluginCatalog};
