//! PDF input, text layers and output.
//!
//! - [`loader`] opens inputs and analyses pages (size, rotation, existing text)
//! - [`text_layer`] turns hOCR into invisible, positioned text
//! - [`assemble`] writes candidate documents
//! - [`validate`] checks candidates against a compliance profile

pub mod assemble;
pub mod error;
#[cfg(test)]
pub(crate) mod fixtures;
pub mod loader;
pub mod text_layer;
pub mod validate;

pub use assemble::{GenerationPass, LopdfAssembler, OutputAssembler};
pub use error::PdfError;
pub use loader::{AutoLoader, DocumentLoader, ImageSetLoader, InputDocument, InputKind, LopdfLoader, PageInfo};
pub use text_layer::{RasterTransform, synthesize};
pub use validate::{ComplianceValidator, StructuralValidator, ValidationReport, VeraPdfValidator, validator_for};
