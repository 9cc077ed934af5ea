use std::fmt;

#[derive(Debug, Clone)]
pub enum PdfError {
    InvalidPdf(String),
    Encrypted,
    NoPages,
    PageNotFound(usize),
    AssemblyFailed(String),
    IOError(String),
}

impl fmt::Display for PdfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PdfError::InvalidPdf(msg) => write!(f, "Invalid PDF: {}", msg),
            PdfError::Encrypted => write!(f, "PDF is encrypted"),
            PdfError::NoPages => write!(f, "PDF has no pages"),
            PdfError::PageNotFound(page) => write!(f, "Page {} not found", page),
            PdfError::AssemblyFailed(msg) => write!(f, "Output assembly failed: {}", msg),
            PdfError::IOError(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for PdfError {}

// NOTE: No From<std::io::Error> impl - IO errors must bubble up unchanged per error handling policy

impl From<lopdf::Error> for PdfError {
    fn from(err: lopdf::Error) -> Self {
        match err {
            lopdf::Error::IO(io_err) => PdfError::IOError(io_err.to_string()),
            _ => PdfError::InvalidPdf(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, PdfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_pdf_error() {
        let err = PdfError::InvalidPdf("corrupted header".to_string());
        assert_eq!(err.to_string(), "Invalid PDF: corrupted header");
    }

    #[test]
    fn test_encrypted_error() {
        assert_eq!(PdfError::Encrypted.to_string(), "PDF is encrypted");
    }

    #[test]
    fn test_page_not_found_error() {
        assert_eq!(PdfError::PageNotFound(4).to_string(), "Page 4 not found");
    }

    #[test]
    fn test_lopdf_error_maps_to_invalid_pdf() {
        let lopdf_err = lopdf::Document::load_mem(b"definitely not a pdf").unwrap_err();
        let err: PdfError = lopdf_err.into();
        assert!(matches!(err, PdfError::InvalidPdf(_) | PdfError::IOError(_)));
    }
}
