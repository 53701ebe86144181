use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::ocr::error::OcrError;

/// Which strategy produced an [`ExtractionResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionMethod {
    NativeText,
    RasterizeOcr,
    ImageOcr,
    BinaryFallback,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::NativeText => "native-text",
            ExtractionMethod::RasterizeOcr => "rasterize-ocr",
            ExtractionMethod::ImageOcr => "image-ocr",
            ExtractionMethod::BinaryFallback => "binary-fallback",
        }
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one `extract` call. Failure is carried as data: a confidence of
/// zero together with a non-empty `errors` list means every strategy failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub text: String,
    /// Normalized to `[0, 1]`.
    pub confidence: f32,
    /// `None` only when the input type was rejected before any strategy ran.
    pub method: Option<ExtractionMethod>,
    pub processing_time_ms: u64,
    pub errors: Vec<String>,
}

impl ExtractionResult {
    pub fn failed(method: Option<ExtractionMethod>, errors: Vec<String>) -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
            method,
            processing_time_ms: 0,
            errors,
        }
    }

    pub fn is_total_failure(&self) -> bool {
        self.confidence == 0.0 && !self.errors.is_empty()
    }

    /// True when the text is present and the confidence reaches the caller's threshold.
    pub fn is_reliable(&self, threshold: f32) -> bool {
        !self.text.trim().is_empty() && self.confidence >= threshold
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Recognized extraction options. Deserializing fills any missing field with
/// its default, so partial JSON objects merge over the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExtractionOptions {
    pub language: String,
    pub raster_scale: f32,
    pub max_pages: usize,
    /// Per-page OCR confidence on the 0-100 scale.
    pub min_confidence: f32,
    pub enable_preprocessing: bool,
}

pub const DEFAULT_LANGUAGE: &str = "eng";
pub const DEFAULT_RASTER_SCALE: f32 = 2.0;
pub const DEFAULT_MAX_PAGES: usize = 20;
pub const DEFAULT_MIN_CONFIDENCE: f32 = 30.0;

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_string(),
            raster_scale: DEFAULT_RASTER_SCALE,
            max_pages: DEFAULT_MAX_PAGES,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            enable_preprocessing: true,
        }
    }
}

impl ExtractionOptions {
    /// Clamps values that would make rendering or filtering meaningless.
    pub fn sanitized(mut self) -> Self {
        if self.language.trim().is_empty() {
            self.language = DEFAULT_LANGUAGE.to_string();
        }
        if !self.raster_scale.is_finite() || self.raster_scale <= 0.0 {
            self.raster_scale = DEFAULT_RASTER_SCALE;
        }
        self.raster_scale = self.raster_scale.clamp(0.1, 10.0);
        if !self.min_confidence.is_finite() {
            self.min_confidence = DEFAULT_MIN_CONFIDENCE;
        }
        self.min_confidence = self.min_confidence.clamp(0.0, 100.0);
        self
    }
}

/// Caller-supplied option overrides, merged over a base set of options.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionOverrides {
    pub language: Option<String>,
    pub raster_scale: Option<f32>,
    pub max_pages: Option<usize>,
    pub min_confidence: Option<f32>,
    pub enable_preprocessing: Option<bool>,
}

impl ExtractionOverrides {
    pub fn apply(self, base: ExtractionOptions) -> ExtractionOptions {
        ExtractionOptions {
            language: self.language.unwrap_or(base.language),
            raster_scale: self.raster_scale.unwrap_or(base.raster_scale),
            max_pages: self.max_pages.unwrap_or(base.max_pages),
            min_confidence: self.min_confidence.unwrap_or(base.min_confidence),
            enable_preprocessing: self.enable_preprocessing.unwrap_or(base.enable_preprocessing),
        }
    }
}

#[derive(Debug, Clone)]
pub enum FileSource {
    Memory(Vec<u8>),
    Path(PathBuf),
}

/// An uploaded document: a declared content type plus lazily read bytes.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: Option<String>,
    pub content_type: String,
    pub source: FileSource,
}

impl UploadedFile {
    pub fn from_bytes(name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: Some(name.into()),
            content_type: content_type.into(),
            source: FileSource::Memory(bytes),
        }
    }

    pub fn from_path(path: impl AsRef<Path>, content_type: impl Into<String>) -> Self {
        let path = path.as_ref();
        Self {
            name: path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.to_string()),
            content_type: content_type.into(),
            source: FileSource::Path(path.to_path_buf()),
        }
    }

    pub async fn read_bytes(&self) -> Result<Vec<u8>, OcrError> {
        match &self.source {
            FileSource::Memory(bytes) => Ok(bytes.clone()),
            FileSource::Path(path) => tokio::fs::read(path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::PermissionDenied {
                    OcrError::PermissionDenied {
                        path: path.display().to_string(),
                    }
                } else {
                    OcrError::Io(e)
                }
            }),
        }
    }
}
