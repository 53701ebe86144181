use async_trait::async_trait;
use lopdf::Document;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::ocr::error::OcrError;

/// Reads the embedded text layer, one entry per page in page order. Pages
/// whose content cannot be decoded are logged and skipped.
pub fn extract_page_texts(bytes: &[u8]) -> Result<Vec<String>, OcrError> {
    let document = load_document(bytes)?;
    let pages = document.get_pages();
    debug!("PDF has {} pages in its page tree", pages.len());

    let mut page_texts = Vec::with_capacity(pages.len());
    for page_number in pages.keys() {
        match document.extract_text(&[*page_number]) {
            Ok(text) => page_texts.push(text),
            Err(e) => warn!("Failed to extract text from page {}: {}", page_number, e),
        }
    }
    Ok(page_texts)
}

/// Page texts joined with newlines.
pub fn extract_native_text(bytes: &[u8]) -> Result<String, OcrError> {
    Ok(extract_page_texts(bytes)?.join("\n"))
}

pub fn count_pages(bytes: &[u8]) -> Result<usize, OcrError> {
    Ok(load_document(bytes)?.get_pages().len())
}

fn load_document(bytes: &[u8]) -> Result<Document, OcrError> {
    if bytes.is_empty() {
        return Err(OcrError::InvalidPdf {
            details: "file is empty".to_string(),
        });
    }
    Document::load_mem(bytes).map_err(|e| OcrError::InvalidPdf {
        details: e.to_string(),
    })
}

/// Turns PDF pages into images for OCR.
#[async_trait]
pub trait PageRasterizer: Send + Sync {
    /// Parses the document; failure here aborts the whole rasterize step.
    async fn open(&self, pdf: Arc<Vec<u8>>) -> Result<Box<dyn RasterDocument>, OcrError>;
}

#[async_trait]
pub trait RasterDocument: Send + Sync {
    fn page_count(&self) -> usize;

    /// Renders a 1-based page to encoded image bytes. `scale` 1.0 is 72 DPI.
    async fn render_page(&self, page_number: usize, scale: f32) -> Result<Vec<u8>, OcrError>;
}

pub fn scale_to_dpi(scale: f32) -> u32 {
    (72.0 * scale).round().max(1.0) as u32
}

/// Rasterizes pages with poppler's `pdftoppm`, one page per invocation.
pub struct PdftoppmRasterizer {
    binary: String,
    temp_dir: PathBuf,
}

impl PdftoppmRasterizer {
    pub fn new(binary: impl Into<String>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            temp_dir: temp_dir.into(),
        }
    }
}

#[async_trait]
impl PageRasterizer for PdftoppmRasterizer {
    async fn open(&self, pdf: Arc<Vec<u8>>) -> Result<Box<dyn RasterDocument>, OcrError> {
        let counted = Arc::clone(&pdf);
        let pages = tokio::task::spawn_blocking(move || count_pages(&counted))
            .await
            .map_err(OcrError::from_join)??;

        let workdir = tempfile::Builder::new()
            .prefix("iams-raster-")
            .tempdir_in(&self.temp_dir)?;
        let source = workdir.path().join("source.pdf");
        tokio::fs::write(&source, pdf.as_slice()).await?;

        debug!("Prepared {} for rasterization ({} pages)", source.display(), pages);
        Ok(Box::new(PdftoppmDocument {
            binary: self.binary.clone(),
            workdir,
            source,
            pages,
        }))
    }
}

struct PdftoppmDocument {
    binary: String,
    workdir: TempDir,
    source: PathBuf,
    pages: usize,
}

impl PdftoppmDocument {
    fn output_prefix(&self, page_number: usize) -> PathBuf {
        self.workdir.path().join(format!("page-{}", page_number))
    }
}

#[async_trait]
impl RasterDocument for PdftoppmDocument {
    fn page_count(&self) -> usize {
        self.pages
    }

    async fn render_page(&self, page_number: usize, scale: f32) -> Result<Vec<u8>, OcrError> {
        let prefix = self.output_prefix(page_number);
        let page = page_number.to_string();

        let output = tokio::process::Command::new(&self.binary)
            .arg("-png")
            .arg("-r")
            .arg(scale_to_dpi(scale).to_string())
            .arg("-f")
            .arg(&page)
            .arg("-l")
            .arg(&page)
            .arg("-singlefile")
            .arg(&self.source)
            .arg(&prefix)
            .output()
            .await
            .map_err(|e| OcrError::RenderFailed {
                page: page_number,
                details: format!("could not run {}: {}", self.binary, e),
            })?;

        if !output.status.success() {
            return Err(OcrError::RenderFailed {
                page: page_number,
                details: format!(
                    "{} exited with {}: {}",
                    self.binary,
                    output.status.code().unwrap_or(-1),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let image_path = with_png_extension(&prefix);
        let image = tokio::fs::read(&image_path).await.map_err(|e| OcrError::RenderFailed {
            page: page_number,
            details: format!("missing rendered image {}: {}", image_path.display(), e),
        })?;
        let _ = tokio::fs::remove_file(&image_path).await;

        Ok(image)
    }
}

fn with_png_extension(prefix: &Path) -> PathBuf {
    let mut path = prefix.as_os_str().to_owned();
    path.push(".png");
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{build_empty_pdf, build_text_pdf};

    #[test]
    fn test_extracts_text_layer_in_page_order() {
        let pdf = build_text_pdf(&["First page heading", "Second page body"]);
        let pages = extract_page_texts(&pdf).unwrap();

        assert_eq!(pages.len(), 2);
        assert!(pages[0].contains("First page heading"));
        assert!(pages[1].contains("Second page body"));

        let joined = extract_native_text(&pdf).unwrap();
        let first = joined.find("First").unwrap();
        let second = joined.find("Second").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_zero_page_document() {
        let pdf = build_empty_pdf();
        assert_eq!(count_pages(&pdf).unwrap(), 0);
        assert_eq!(extract_native_text(&pdf).unwrap(), "");
    }

    #[test]
    fn test_empty_bytes_are_invalid() {
        let err = extract_native_text(&[]).unwrap_err();
        assert_eq!(err.error_code(), "OCR_INVALID_PDF");
    }

    #[test]
    fn test_garbage_is_invalid() {
        let err = count_pages(b"this was a word document renamed to .pdf").unwrap_err();
        assert!(matches!(err, OcrError::InvalidPdf { .. }));
    }

    #[test]
    fn test_scale_to_dpi() {
        assert_eq!(scale_to_dpi(1.0), 72);
        assert_eq!(scale_to_dpi(2.0), 144);
        assert_eq!(scale_to_dpi(0.001), 1);
    }

    #[test]
    fn test_png_extension_appended_to_prefix() {
        let path = with_png_extension(Path::new("/tmp/work/page-3"));
        assert_eq!(path, PathBuf::from("/tmp/work/page-3.png"));
    }

    #[tokio::test]
    async fn test_pdftoppm_open_rejects_invalid_document() {
        let dir = tempfile::tempdir().unwrap();
        let rasterizer = PdftoppmRasterizer::new("pdftoppm", dir.path());
        let err = rasterizer
            .open(Arc::new(b"not a pdf".to_vec()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, OcrError::InvalidPdf { .. }));
    }

    #[tokio::test]
    async fn test_missing_binary_reports_render_failure() {
        let dir = tempfile::tempdir().unwrap();
        let rasterizer = PdftoppmRasterizer::new("iams-no-such-pdftoppm", dir.path());
        let document = rasterizer
            .open(Arc::new(build_text_pdf(&["Only page"])))
            .await
            .ok()
            .unwrap();

        assert_eq!(document.page_count(), 1);
        let err = document.render_page(1, 2.0).await.unwrap_err();
        assert!(matches!(err, OcrError::RenderFailed { page: 1, .. }));
    }
}
