use thiserror::Error;

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("Tesseract is not installed on the system")]
    TesseractNotInstalled,

    #[error("Tesseract language data not found for '{lang}'. Please install tesseract-ocr-{lang}")]
    LanguageDataNotFound { lang: String },

    #[error("OCR engine initialization failed: {details}")]
    InitializationFailed { details: String },

    #[error("Invalid PDF document: {details}")]
    InvalidPdf { details: String },

    #[error("Failed to render page {page}: {details}")]
    RenderFailed { page: usize, details: String },

    #[error("Text recognition failed: {details}")]
    RecognitionFailed { details: String },

    #[error("Invalid image format or corrupted image: {details}")]
    InvalidImageFormat { details: String },

    #[error("Permission denied accessing file: {path}")]
    PermissionDenied { path: String },

    #[error("Unsupported file type: {content_type}")]
    UnsupportedFileType { content_type: String },

    #[error("Background task failed: {details}")]
    TaskFailed { details: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OcrError {
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            OcrError::RenderFailed { .. }
                | OcrError::RecognitionFailed { .. }
                | OcrError::InvalidImageFormat { .. }
        )
    }

    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            OcrError::TesseractNotInstalled
                | OcrError::LanguageDataNotFound { .. }
                | OcrError::InitializationFailed { .. }
        )
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            OcrError::TesseractNotInstalled => "OCR_NOT_INSTALLED",
            OcrError::LanguageDataNotFound { .. } => "OCR_LANG_MISSING",
            OcrError::InitializationFailed { .. } => "OCR_INIT_FAILED",
            OcrError::InvalidPdf { .. } => "OCR_INVALID_PDF",
            OcrError::RenderFailed { .. } => "OCR_RENDER_FAILED",
            OcrError::RecognitionFailed { .. } => "OCR_RECOGNITION_FAILED",
            OcrError::InvalidImageFormat { .. } => "OCR_INVALID_FORMAT",
            OcrError::PermissionDenied { .. } => "OCR_PERMISSION_DENIED",
            OcrError::UnsupportedFileType { .. } => "OCR_UNSUPPORTED_TYPE",
            OcrError::TaskFailed { .. } => "OCR_TASK_FAILED",
            OcrError::Io(_) => "OCR_IO_ERROR",
            OcrError::Other(_) => "OCR_UNKNOWN_ERROR",
        }
    }

    /// Maps a join failure from `spawn_blocking` (panic or cancellation).
    pub fn from_join(err: tokio::task::JoinError) -> Self {
        OcrError::TaskFailed {
            details: err.to_string(),
        }
    }
}
