use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::mime_detection::{self, DocumentKind};
use crate::ocr::engine::SharedOcrEngine;
use crate::ocr::error::OcrError;
use crate::ocr::pdf::{PageRasterizer, PdftoppmRasterizer};
use crate::ocr::preprocess::preprocess_image_async;
use crate::ocr::quality::{MeaningfulText, TextQualityGate};
use crate::ocr::strategies::{
    BinaryFallbackStrategy, ExtractionStrategy, NativeTextStrategy, PdfContext,
    RasterizeOcrStrategy, StrategyOutcome,
};
use crate::ocr::types::{ExtractionMethod, ExtractionOptions, ExtractionResult, UploadedFile};

pub const ALL_PDF_METHODS_FAILED: &str = "All PDF processing methods failed";

/// Turns an uploaded PDF or image into text, trying progressively more
/// expensive methods.
///
/// `extract` never returns an error: every failure, including a panic inside
/// a strategy, is reported through [`ExtractionResult::errors`].
pub struct DocumentExtractor {
    engine: Arc<SharedOcrEngine>,
    rasterizer: Arc<dyn PageRasterizer>,
    gate: Arc<dyn TextQualityGate>,
}

impl DocumentExtractor {
    pub fn new(engine: Arc<SharedOcrEngine>, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        Self {
            engine,
            rasterizer,
            gate: Arc::new(MeaningfulText::default()),
        }
    }

    pub fn with_quality_gate(mut self, gate: Arc<dyn TextQualityGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn from_config(config: &Config) -> Self {
        let engine = SharedOcrEngine::system_default(config.tessdata_prefix.clone());
        let rasterizer = PdftoppmRasterizer::new(config.pdftoppm_path.clone(), &config.temp_dir);
        Self::new(Arc::new(engine), Arc::new(rasterizer))
    }

    pub fn engine(&self) -> &Arc<SharedOcrEngine> {
        &self.engine
    }

    /// PDF strategies in the order they are tried.
    pub fn pdf_strategies(&self) -> Vec<Box<dyn ExtractionStrategy>> {
        vec![
            Box::new(NativeTextStrategy::new(Arc::clone(&self.gate))),
            Box::new(RasterizeOcrStrategy::new(
                Arc::clone(&self.engine),
                Arc::clone(&self.rasterizer),
            )),
            Box::new(BinaryFallbackStrategy),
        ]
    }

    pub async fn extract(&self, file: &UploadedFile, options: &ExtractionOptions) -> ExtractionResult {
        let start = Instant::now();

        let mut result = match AssertUnwindSafe(self.run(file, options)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("Document processing panicked: {}", message);
                ExtractionResult::failed(None, vec![format!("Processing failed: {}", message)])
            }
        };

        result.processing_time_ms = start.elapsed().as_millis() as u64;
        info!(
            "Extraction finished in {}ms: method={}, confidence={:.2}, {} words, {} notes",
            result.processing_time_ms,
            result
                .method
                .map(|m| m.as_str())
                .unwrap_or("none"),
            result.confidence,
            result.word_count(),
            result.errors.len()
        );
        result
    }

    async fn run(&self, file: &UploadedFile, options: &ExtractionOptions) -> ExtractionResult {
        let options = options.clone().sanitized();

        let declared = mime_detection::normalize_mime_type(&file.content_type);
        if !mime_detection::is_generic_mime_type(&declared)
            && DocumentKind::classify(&declared) == DocumentKind::Unsupported
        {
            return unsupported(&file.content_type);
        }

        let bytes = match file.read_bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to read uploaded file: {}", e);
                return ExtractionResult::failed(None, vec![format!("Failed to read file: {}", e)]);
            }
        };

        let resolved =
            mime_detection::resolve_content_type(&file.content_type, file.name.as_deref(), &bytes);
        info!(
            "Processing {} ({} bytes) as {} via {:?}",
            file.name.as_deref().unwrap_or("upload"),
            bytes.len(),
            resolved.mime_type,
            resolved.detection_method
        );

        match DocumentKind::classify(&resolved.mime_type) {
            DocumentKind::Pdf => self.extract_pdf(bytes, options).await,
            DocumentKind::Image => self.extract_image(bytes, &options).await,
            DocumentKind::Unsupported => unsupported(&resolved.mime_type),
        }
    }

    async fn extract_pdf(&self, bytes: Vec<u8>, options: ExtractionOptions) -> ExtractionResult {
        let context = PdfContext {
            bytes: Arc::new(bytes),
            options,
        };
        run_strategies(self.pdf_strategies(), &context).await
    }

    async fn extract_image(&self, bytes: Vec<u8>, options: &ExtractionOptions) -> ExtractionResult {
        let mut errors = Vec::new();

        let image = if options.enable_preprocessing {
            match preprocess_image_async(bytes.clone()).await {
                Ok(processed) => processed,
                Err(e) => {
                    warn!("Image preprocessing failed, using original image: {}", e);
                    errors.push(format!("Image preprocessing failed: {}", e));
                    bytes
                }
            }
        } else {
            bytes
        };

        let recognized = match self.engine.acquire(&options.language).await {
            Ok(engine) => engine.recognize(image).await,
            Err(e) => Err(e),
        };

        match recognized {
            Ok(output) => {
                info!("Image OCR confidence {:.1}", output.confidence);
                ExtractionResult {
                    text: output.text,
                    confidence: output.confidence / 100.0,
                    method: Some(ExtractionMethod::ImageOcr),
                    processing_time_ms: 0,
                    errors,
                }
            }
            Err(e) => {
                if e.is_configuration_error() {
                    error!("OCR engine unavailable ({}): {}", e.error_code(), e);
                } else {
                    warn!("Image OCR failed: {}", e);
                }
                errors.push(format!("Image OCR failed: {}", e));
                ExtractionResult::failed(Some(ExtractionMethod::ImageOcr), errors)
            }
        }
    }
}

/// Tries `strategies` in order and returns the first accepted extraction,
/// carrying the notes of every strategy that declined before it.
async fn run_strategies(
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    context: &PdfContext,
) -> ExtractionResult {
    let mut errors = Vec::new();
    for strategy in strategies {
        match strategy.attempt(context).await {
            StrategyOutcome::Accepted(extraction) => {
                errors.extend(extraction.notes);
                return ExtractionResult {
                    text: extraction.text,
                    confidence: extraction.confidence,
                    method: Some(extraction.method),
                    processing_time_ms: 0,
                    errors,
                };
            }
            StrategyOutcome::Declined(note) => {
                info!("{} declined: {}", strategy.method(), note);
                errors.push(note);
            }
        }
    }

    errors.push(ALL_PDF_METHODS_FAILED.to_string());
    ExtractionResult::failed(Some(ExtractionMethod::RasterizeOcr), errors)
}

fn unsupported(content_type: &str) -> ExtractionResult {
    warn!("Rejecting unsupported file type: {}", content_type);
    let error = OcrError::UnsupportedFileType {
        content_type: content_type.to_string(),
    };
    ExtractionResult::failed(None, vec![error.to_string()])
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
