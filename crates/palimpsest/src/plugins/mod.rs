//! Plugin system for extending the OCR pipeline.
//!
//! Plugins implement [`PipelinePlugin`] and contribute [`HookImpl`]s for a fixed set of
//! [`HookPoint`]s. The [`HookRegistry`] stores them in registration order and dispatches them
//! with the mode each hook point declares.
//!
//! # Lifecycle Pattern
//!
//! ```rust
//! use palimpsest::plugins::{HookImpl, HookRegistry, PipelinePlugin, Plugin};
//! use std::sync::Arc;
//!
//! struct PreferSidecar;
//!
//! impl Plugin for PreferSidecar {
//!     fn name(&self) -> &str { "prefer-sidecar" }
//!     fn version(&self) -> String { "1.0.0".to_string() }
//!     fn initialize(&self) -> palimpsest::Result<()> { Ok(()) }
//!     fn shutdown(&self) -> palimpsest::Result<()> { Ok(()) }
//! }
//!
//! impl PipelinePlugin for PreferSidecar {
//!     fn hooks(&self) -> Vec<HookImpl> {
//!         vec![HookImpl::choose_ocr_engine(|_| Ok(Some("sidecar".to_string())))]
//!     }
//! }
//!
//! let mut registry = HookRegistry::new();
//! registry.register_plugin(Arc::new(PreferSidecar)).unwrap();
//! let registry = Arc::new(registry);
//! ```

pub mod builtin;
pub mod catalog;
pub mod hooks;
pub mod registry;
pub mod traits;

pub use catalog::PluginCatalog;
pub use hooks::{DispatchMode, GenerationRequest, HookImpl, HookPoint, OptionSpec, PageHookContext};
pub use registry::{Collected, Dispatched, HookFailure, HookRegistry};
pub use traits::{PipelinePlugin, Plugin};
