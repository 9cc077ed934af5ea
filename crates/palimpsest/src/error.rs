//! Error types for Palimpsest.
//!
//! Every fallible operation in the library returns [`PalimpsestError`]. Variants follow the
//! pipeline's error taxonomy so callers (and the CLI) can map an outcome to an exit code:
//!
//! - `Input` - the document could not be opened or repaired; fatal, never retried
//! - `Classification` - a page conflicts with the requested OCR policy; page-level warning
//! - `Engine` - recognition or rasterization failed; page-level, retried once
//! - `Compliance` - the output does not validate against the archival profile; best-effort
//! - `Cancelled` - the run was interrupted; partial results are kept
//!
//! **System errors bubble up unchanged:** `PalimpsestError::Io` wraps `std::io::Error` from
//! file system access and is never rewrapped.
//!
//! # Example
//!
//! ```rust
//! use palimpsest::{PalimpsestError, Result};
//!
//! fn check_dpi(dpi: u32) -> Result<u32> {
//!     if dpi < 72 {
//!         return Err(PalimpsestError::validation(format!("DPI {} is below 72", dpi)));
//!     }
//!     Ok(dpi)
//! }
//! ```
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using `PalimpsestError`.
pub type Result<T> = std::result::Result<T, PalimpsestError>;

/// Main error type for all Palimpsest operations.
#[derive(Debug, Error)]
pub enum PalimpsestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Input error: {message}")]
    Input {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Page {page} classification error: {message}")]
    Classification { page: usize, message: String },

    #[error("Engine error: {message}")]
    Engine {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Compliance error: {message}")]
    Compliance {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    #[error("Plugin error in '{plugin_name}': {message}")]
    Plugin { message: String, plugin_name: String },

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("{0}")]
    Other(String),
}

/// Coarse error class used for page diagnostics and exit codes.
///
/// Unlike [`PalimpsestError`] this is plain data, so it survives the trip back from a worker
/// process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Input,
    Classification,
    Engine,
    Compliance,
    Cancelled,
    Plugin,
    Configuration,
    MissingDependency,
    Other,
}

impl ErrorClass {
    /// Returns `true` for classes that abort the whole document.
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorClass::Input | ErrorClass::Configuration)
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorClass::Input => "input",
            ErrorClass::Classification => "classification",
            ErrorClass::Engine => "engine",
            ErrorClass::Compliance => "compliance",
            ErrorClass::Cancelled => "cancelled",
            ErrorClass::Plugin => "plugin",
            ErrorClass::Configuration => "configuration",
            ErrorClass::MissingDependency => "missing-dependency",
            ErrorClass::Other => "other",
        };
        f.write_str(name)
    }
}

/// Process exit codes, one per outcome class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum ExitCode {
    Ok = 0,
    BadArgs = 1,
    InputFile = 2,
    MissingDependency = 3,
    FileAccess = 5,
    AlreadyDoneOcr = 6,
    ChildProcessError = 7,
    /// The run completed, but some pages or the output carry warnings.
    CompletedWithWarnings = 8,
    InvalidConfig = 9,
    ComplianceFailed = 10,
    OtherError = 15,
    Interrupted = 130,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl From<ErrorClass> for ExitCode {
    fn from(class: ErrorClass) -> Self {
        match class {
            ErrorClass::Input => ExitCode::InputFile,
            ErrorClass::Classification => ExitCode::AlreadyDoneOcr,
            ErrorClass::Engine => ExitCode::ChildProcessError,
            ErrorClass::Compliance => ExitCode::ComplianceFailed,
            ErrorClass::Cancelled => ExitCode::Interrupted,
            ErrorClass::Plugin => ExitCode::OtherError,
            ErrorClass::Configuration => ExitCode::InvalidConfig,
            ErrorClass::MissingDependency => ExitCode::MissingDependency,
            ErrorClass::Other => ExitCode::OtherError,
        }
    }
}

impl From<serde_json::Error> for PalimpsestError {
    fn from(err: serde_json::Error) -> Self {
        PalimpsestError::Serialization {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<rmp_serde::encode::Error> for PalimpsestError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        PalimpsestError::Serialization {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<rmp_serde::decode::Error> for PalimpsestError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        PalimpsestError::Serialization {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<image::ImageError> for PalimpsestError {
    fn from(err: image::ImageError) -> Self {
        PalimpsestError::Engine {
            message: format!("image processing failed: {}", err),
            source: Some(Box::new(err)),
        }
    }
}

impl From<crate::pdf::error::PdfError> for PalimpsestError {
    fn from(err: crate::pdf::error::PdfError) -> Self {
        PalimpsestError::Input {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

macro_rules! error_constructor {
    ($name:ident, $variant:ident) => {
        pastey::paste! {
            #[doc = "Create a " $variant " error"]
            pub fn $name<S: Into<String>>(message: S) -> Self {
                Self::$variant {
                    message: message.into(),
                    source: None,
                }
            }

            #[doc = "Create a " $variant " error with source"]
            pub fn [<$name _with_source>]<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
                message: S,
                source: E,
            ) -> Self {
                Self::$variant {
                    message: message.into(),
                    source: Some(Box::new(source)),
                }
            }
        }
    };
}

impl PalimpsestError {
    error_constructor!(input, Input);
    error_constructor!(engine, Engine);
    error_constructor!(compliance, Compliance);
    error_constructor!(validation, Validation);
    error_constructor!(serialization, Serialization);

    pub fn classification<S: Into<String>>(page: usize, message: S) -> Self {
        Self::Classification {
            page,
            message: message.into(),
        }
    }

    pub fn cancelled<S: Into<String>>(checkpoint: S) -> Self {
        Self::Cancelled(checkpoint.into())
    }

    pub fn plugin<S: Into<String>, P: Into<String>>(plugin_name: P, message: S) -> Self {
        Self::Plugin {
            message: message.into(),
            plugin_name: plugin_name.into(),
        }
    }

    /// Taxonomy class of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            PalimpsestError::Io(_) | PalimpsestError::Worker(_) | PalimpsestError::Other(_) => ErrorClass::Other,
            PalimpsestError::Serialization { .. } => ErrorClass::Other,
            PalimpsestError::Input { .. } => ErrorClass::Input,
            PalimpsestError::Classification { .. } => ErrorClass::Classification,
            PalimpsestError::Engine { .. } => ErrorClass::Engine,
            PalimpsestError::Compliance { .. } => ErrorClass::Compliance,
            PalimpsestError::Cancelled(_) => ErrorClass::Cancelled,
            PalimpsestError::Validation { .. } => ErrorClass::Configuration,
            PalimpsestError::MissingDependency(_) => ErrorClass::MissingDependency,
            PalimpsestError::Plugin { .. } => ErrorClass::Plugin,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PalimpsestError::Cancelled(_))
    }

    pub fn exit_code(&self) -> ExitCode {
        match self {
            PalimpsestError::Io(_) => ExitCode::FileAccess,
            PalimpsestError::Validation { .. } => ExitCode::BadArgs,
            other => other.class().into(),
        }
    }
}
