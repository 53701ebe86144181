//! Content-type resolution for uploaded documents.
//!
//! The declared type wins unless it is one of the generic placeholders that
//! browsers and storage layers send when they do not know better. In that
//! case the file signature is consulted first and the file name second.
use std::path::Path;
use tracing::debug;

pub const PDF_MIME_TYPE: &str = "application/pdf";
pub const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// What the pipeline does with a resolved content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Image,
    Unsupported,
}

impl DocumentKind {
    pub fn classify(mime_type: &str) -> Self {
        let mime_type = normalize_mime_type(mime_type);
        if mime_type == PDF_MIME_TYPE {
            DocumentKind::Pdf
        } else if mime_type.starts_with("image/") {
            DocumentKind::Image
        } else {
            DocumentKind::Unsupported
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DetectionMethod {
    /// The uploader's content type was specific enough to use as is
    Declared,
    /// File signature
    MagicBytes,
    /// File name extension
    Extension,
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MimeDetectionResult {
    pub mime_type: String,
    pub detection_method: DetectionMethod,
}

impl MimeDetectionResult {
    fn new(mime_type: impl Into<String>, detection_method: DetectionMethod) -> Self {
        Self {
            mime_type: normalize_mime_type(&mime_type.into()),
            detection_method,
        }
    }

    pub fn kind(&self) -> DocumentKind {
        DocumentKind::classify(&self.mime_type)
    }
}

/// Lower-cases, drops parameters such as `; charset=binary`, and maps the
/// non-standard `image/jpg` to `image/jpeg`.
pub fn normalize_mime_type(mime_type: &str) -> String {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match essence.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        "image/tif" => "image/tiff".to_string(),
        _ => essence,
    }
}

/// Placeholder types that carry no information about the content.
pub fn is_generic_mime_type(mime_type: &str) -> bool {
    matches!(
        normalize_mime_type(mime_type).as_str(),
        "application/octet-stream" | "application/binary" | "binary/octet-stream" | "" | "unknown"
    )
}

pub fn resolve_content_type(
    declared: &str,
    filename: Option<&str>,
    content: &[u8],
) -> MimeDetectionResult {
    if !is_generic_mime_type(declared) {
        return MimeDetectionResult::new(declared, DetectionMethod::Declared);
    }

    debug!(
        "Declared type '{}' is generic, inspecting {} bytes of content",
        declared,
        content.len()
    );

    if let Some(detected) = infer::get(content) {
        debug!("Magic bytes detected MIME type: {}", detected.mime_type());
        return MimeDetectionResult::new(detected.mime_type(), DetectionMethod::MagicBytes);
    }

    if let Some(guess) = filename.and_then(|name| mime_guess::from_path(Path::new(name)).first()) {
        debug!("Extension-based detection: {:?} -> {}", filename, guess);
        return MimeDetectionResult::new(guess.essence_str(), DetectionMethod::Extension);
    }

    MimeDetectionResult::new(FALLBACK_MIME_TYPE, DetectionMethod::Fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_type_is_trusted() {
        // Even when the bytes say otherwise
        let result = resolve_content_type("image/png", Some("scan.pdf"), b"%PDF-1.4");
        assert_eq!(result.mime_type, "image/png");
        assert_eq!(result.detection_method, DetectionMethod::Declared);
        assert_eq!(result.kind(), DocumentKind::Image);
    }

    #[test]
    fn test_generic_type_uses_magic_bytes() {
        let result = resolve_content_type("application/octet-stream", None, b"%PDF-1.7\n");
        assert_eq!(result.mime_type, "application/pdf");
        assert_eq!(result.detection_method, DetectionMethod::MagicBytes);

        let jpeg_header = [0xFF, 0xD8, 0xFF, 0xE0];
        let result = resolve_content_type("", Some("photo"), &jpeg_header);
        assert_eq!(result.mime_type, "image/jpeg");
    }

    #[test]
    fn test_generic_type_falls_back_to_extension() {
        let result = resolve_content_type("unknown", Some("statement.pdf"), b"no signature");
        assert_eq!(result.mime_type, "application/pdf");
        assert_eq!(result.detection_method, DetectionMethod::Extension);
    }

    #[test]
    fn test_nothing_known() {
        let result = resolve_content_type("binary/octet-stream", None, b"");
        assert_eq!(result.mime_type, FALLBACK_MIME_TYPE);
        assert_eq!(result.detection_method, DetectionMethod::Fallback);
        assert_eq!(result.kind(), DocumentKind::Unsupported);
    }

    #[test]
    fn test_normalization() {
        assert_eq!(normalize_mime_type("Image/JPG"), "image/jpeg");
        assert_eq!(normalize_mime_type("application/pdf; charset=binary"), "application/pdf");
        assert_eq!(normalize_mime_type("image/tif"), "image/tiff");
    }

    #[test]
    fn test_classify() {
        assert_eq!(DocumentKind::classify("application/pdf"), DocumentKind::Pdf);
        assert_eq!(DocumentKind::classify("image/webp"), DocumentKind::Image);
        assert_eq!(DocumentKind::classify("text/plain"), DocumentKind::Unsupported);
        assert_eq!(
            DocumentKind::classify("application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
            DocumentKind::Unsupported
        );
    }

    #[test]
    fn test_generic_types() {
        assert!(is_generic_mime_type("application/octet-stream"));
        assert!(is_generic_mime_type("APPLICATION/BINARY"));
        assert!(is_generic_mime_type(""));
        assert!(!is_generic_mime_type("application/pdf"));
    }
}
