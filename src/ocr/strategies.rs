use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{debug, error, info, warn};

use crate::ocr::engine::SharedOcrEngine;
use crate::ocr::error::OcrError;
use crate::ocr::pdf::{self, PageRasterizer};
use crate::ocr::quality::{normalize_whitespace, TextQualityGate};
use crate::ocr::types::{ExtractionMethod, ExtractionOptions};

pub const NATIVE_TEXT_CONFIDENCE: f32 = 0.95;
pub const BINARY_FALLBACK_CONFIDENCE: f32 = 0.3;
pub const MIN_PRINTABLE_RUN: usize = 10;

pub const BINARY_FALLBACK_NOTE: &str = "Binary fallback extraction used (last resort method)";

static PRINTABLE_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[A-Za-z0-9 .,;:!?()\-'"/@#$%&*+=]{10,}"#).expect("printable run pattern")
});

/// Text produced by a strategy that passed its own acceptance check.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub text: String,
    pub confidence: f32,
    pub method: ExtractionMethod,
    /// Notes that accompany a successful extraction.
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StrategyOutcome {
    Accepted(Extraction),
    Declined(String),
}

/// Input shared by every PDF strategy of one call.
pub struct PdfContext {
    pub bytes: Arc<Vec<u8>>,
    pub options: ExtractionOptions,
}

#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    fn method(&self) -> ExtractionMethod;

    async fn attempt(&self, context: &PdfContext) -> StrategyOutcome;
}

/// Reads the embedded text layer and accepts it when the quality gate does.
pub struct NativeTextStrategy {
    gate: Arc<dyn TextQualityGate>,
}

impl NativeTextStrategy {
    pub fn new(gate: Arc<dyn TextQualityGate>) -> Self {
        Self { gate }
    }
}

#[async_trait]
impl ExtractionStrategy for NativeTextStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::NativeText
    }

    async fn attempt(&self, context: &PdfContext) -> StrategyOutcome {
        info!("Attempting native PDF text extraction");
        let bytes = Arc::clone(&context.bytes);
        let extracted = tokio::task::spawn_blocking(move || pdf::extract_native_text(&bytes))
            .await
            .map_err(OcrError::from_join)
            .and_then(|result| result);

        match extracted {
            Ok(text) if self.gate.accepts(&text) => {
                info!(
                    "Native PDF extraction succeeded with {} words",
                    text.split_whitespace().count()
                );
                StrategyOutcome::Accepted(Extraction {
                    text,
                    confidence: NATIVE_TEXT_CONFIDENCE,
                    method: ExtractionMethod::NativeText,
                    notes: Vec::new(),
                })
            }
            Ok(text) => {
                debug!(
                    "Native PDF text rejected by quality gate ({} chars)",
                    text.chars().count()
                );
                StrategyOutcome::Declined(
                    "Native PDF extraction yielded insufficient text".to_string(),
                )
            }
            Err(e) => {
                warn!("Native PDF extraction failed: {}", e);
                StrategyOutcome::Declined(format!("Native PDF extraction failed: {}", e))
            }
        }
    }
}

/// Renders pages and runs them through the shared OCR engine.
pub struct RasterizeOcrStrategy {
    engine: Arc<SharedOcrEngine>,
    rasterizer: Arc<dyn PageRasterizer>,
}

/// Per-page OCR outcome for pages that passed the confidence filter.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub page_number: usize,
    pub text: String,
    /// 0-100 scale.
    pub confidence: f32,
}

impl RasterizeOcrStrategy {
    pub fn new(engine: Arc<SharedOcrEngine>, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        Self { engine, rasterizer }
    }

    /// OCRs the first `max_pages` pages in order, keeping pages above
    /// `min_confidence`. Only errors that stop the whole step are returned.
    pub async fn ocr_pages(&self, context: &PdfContext) -> Result<Vec<PageText>, OcrError> {
        let options = &context.options;
        let document = self.rasterizer.open(Arc::clone(&context.bytes)).await?;

        let total = document.page_count().min(options.max_pages);
        info!(
            "Rasterizing {} of {} PDF pages for OCR",
            total,
            document.page_count()
        );
        if total == 0 {
            return Ok(Vec::new());
        }

        let engine = self.engine.acquire(&options.language).await?;

        let mut pages = Vec::new();
        for page_number in 1..=total {
            let image = match document.render_page(page_number, options.raster_scale).await {
                Ok(image) => image,
                Err(e) => {
                    warn!("Skipping page {}: {}", page_number, e);
                    continue;
                }
            };

            let output = match engine.recognize(image).await {
                Ok(output) => output,
                Err(e) if e.is_recoverable() => {
                    warn!("OCR failed on page {}: {}", page_number, e);
                    continue;
                }
                Err(e) => {
                    error!("OCR engine error on page {} ({}): {}", page_number, e.error_code(), e);
                    continue;
                }
            };

            if output.confidence > options.min_confidence {
                debug!(
                    "Page {} accepted with confidence {:.1}",
                    page_number, output.confidence
                );
                pages.push(PageText {
                    page_number,
                    text: output.text,
                    confidence: output.confidence,
                });
            } else {
                debug!(
                    "Page {} dropped: confidence {:.1} <= {:.1}",
                    page_number, output.confidence, options.min_confidence
                );
            }
        }

        Ok(pages)
    }
}

/// Joins accepted pages with their 1-based page markers.
pub fn format_pages(pages: &[PageText]) -> String {
    pages
        .iter()
        .map(|page| format!("\n--- Page {} ---\n{}\n", page.page_number, page.text))
        .collect()
}

/// Mean page confidence scaled to `[0, 1]`, or 0 when there are no pages.
pub fn mean_confidence(pages: &[PageText]) -> f32 {
    if pages.is_empty() {
        return 0.0;
    }
    let total: f32 = pages.iter().map(|page| page.confidence).sum();
    total / pages.len() as f32 / 100.0
}

#[async_trait]
impl ExtractionStrategy for RasterizeOcrStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::RasterizeOcr
    }

    async fn attempt(&self, context: &PdfContext) -> StrategyOutcome {
        info!("Attempting PDF OCR");
        match self.ocr_pages(context).await {
            Ok(pages) if !pages.is_empty() => {
                let confidence = mean_confidence(&pages);
                info!(
                    "PDF OCR accepted {} pages, mean confidence {:.2}",
                    pages.len(),
                    confidence
                );
                StrategyOutcome::Accepted(Extraction {
                    text: format_pages(&pages),
                    confidence,
                    method: ExtractionMethod::RasterizeOcr,
                    notes: Vec::new(),
                })
            }
            Ok(_) => StrategyOutcome::Declined(
                "PDF OCR produced no pages above minimum confidence".to_string(),
            ),
            Err(e) => {
                warn!("PDF OCR failed: {}", e);
                StrategyOutcome::Declined(format!("PDF OCR failed: {}", e))
            }
        }
    }
}

/// Scrapes printable ASCII runs out of the raw file bytes.
pub struct BinaryFallbackStrategy;

/// Printable runs of at least [`MIN_PRINTABLE_RUN`] characters, trimmed,
/// space-joined and whitespace-collapsed.
pub fn scrape_printable_text(bytes: &[u8]) -> String {
    let decoded = String::from_utf8_lossy(bytes);
    let runs: Vec<&str> = PRINTABLE_RUN
        .find_iter(&decoded)
        .map(|m| m.as_str().trim())
        .filter(|run| run.chars().count() >= MIN_PRINTABLE_RUN)
        .collect();
    normalize_whitespace(&runs.join(" "))
}

#[async_trait]
impl ExtractionStrategy for BinaryFallbackStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::BinaryFallback
    }

    async fn attempt(&self, context: &PdfContext) -> StrategyOutcome {
        info!("Attempting binary fallback extraction");
        let bytes = Arc::clone(&context.bytes);
        let scraped = tokio::task::spawn_blocking(move || scrape_printable_text(&bytes))
            .await
            .map_err(OcrError::from_join);

        // An empty scrape is still this step's answer
        match scraped {
            Ok(text) => {
                warn!("Using binary fallback text ({} chars)", text.len());
                StrategyOutcome::Accepted(Extraction {
                    text,
                    confidence: BINARY_FALLBACK_CONFIDENCE,
                    method: ExtractionMethod::BinaryFallback,
                    notes: vec![BINARY_FALLBACK_NOTE.to_string()],
                })
            }
            Err(e) => StrategyOutcome::Declined(format!("Binary fallback failed: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::quality::MeaningfulText;
    use crate::test_utils::{build_text_pdf, FakeEngineFactory, FakeOcrEngine, FakeRasterizer};

    fn context(bytes: Vec<u8>) -> PdfContext {
        PdfContext {
            bytes: Arc::new(bytes),
            options: ExtractionOptions::default(),
        }
    }

    fn ocr_strategy(
        engine: FakeOcrEngine,
        rasterizer: FakeRasterizer,
    ) -> (Arc<FakeEngineFactory>, RasterizeOcrStrategy) {
        let factory = Arc::new(FakeEngineFactory::new(engine));
        let shared = Arc::new(SharedOcrEngine::new(factory.clone()));
        (factory, RasterizeOcrStrategy::new(shared, Arc::new(rasterizer)))
    }

    #[test]
    fn test_scrape_keeps_long_runs_only() {
        let mut bytes = b"%PDF-1.4\n\x00\x01".to_vec();
        bytes.extend_from_slice(b"Outstanding Balance: 4,500\xff\xfeshort\x00");
        bytes.extend_from_slice(b"   Student Name Jane   \x02");

        let text = scrape_printable_text(&bytes);
        assert_eq!(text, "Outstanding Balance: 4,500 Student Name Jane");
    }

    #[test]
    fn test_scrape_drops_runs_shorter_after_trim() {
        // Ten characters before trimming, five after
        let bytes = b"\x00  abcde   \x00".to_vec();
        assert_eq!(scrape_printable_text(&bytes), "");
    }

    #[test]
    fn test_format_pages_and_mean_confidence() {
        let pages = vec![
            PageText {
                page_number: 1,
                text: "alpha".to_string(),
                confidence: 80.0,
            },
            PageText {
                page_number: 3,
                text: "gamma".to_string(),
                confidence: 60.0,
            },
        ];
        assert_eq!(
            format_pages(&pages),
            "\n--- Page 1 ---\nalpha\n\n--- Page 3 ---\ngamma\n"
        );
        assert!((mean_confidence(&pages) - 0.7).abs() < 1e-6);
        assert_eq!(mean_confidence(&[]), 0.0);
    }

    #[tokio::test]
    async fn test_native_strategy_declines_thin_text_layer() {
        let strategy = NativeTextStrategy::new(Arc::new(MeaningfulText::default()));
        let outcome = strategy.attempt(&context(build_text_pdf(&["Scanned"]))).await;
        assert_eq!(
            outcome,
            StrategyOutcome::Declined("Native PDF extraction yielded insufficient text".to_string())
        );
    }

    #[tokio::test]
    async fn test_native_strategy_reports_parse_errors() {
        let strategy = NativeTextStrategy::new(Arc::new(MeaningfulText::default()));
        match strategy.attempt(&context(b"garbage".to_vec())).await {
            StrategyOutcome::Declined(note) => {
                assert!(note.starts_with("Native PDF extraction failed: "))
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_native_strategy_uses_injected_gate() {
        let gate = |text: &str| text.contains("Statement");
        let strategy = NativeTextStrategy::new(Arc::new(gate));
        match strategy.attempt(&context(build_text_pdf(&["Fee Statement"]))).await {
            StrategyOutcome::Accepted(extraction) => {
                assert_eq!(extraction.confidence, NATIVE_TEXT_CONFIDENCE);
                assert_eq!(extraction.method, ExtractionMethod::NativeText);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ocr_respects_max_pages_and_threshold() {
        let engine = FakeOcrEngine::scripted(vec![
            (b"page-1".to_vec(), "first", 90.0),
            (b"page-2".to_vec(), "second", 30.0),
            (b"page-3".to_vec(), "third", 70.0),
            (b"page-4".to_vec(), "fourth", 99.0),
        ]);
        let (_, strategy) = ocr_strategy(engine.clone(), FakeRasterizer::with_pages(4));

        let mut ctx = context(b"%PDF-1.4 scanned".to_vec());
        ctx.options.max_pages = 3;

        let pages = strategy.ocr_pages(&ctx).await.unwrap();
        let numbers: Vec<usize> = pages.iter().map(|p| p.page_number).collect();
        // Page 2 sits exactly on the threshold, page 4 is past the cap
        assert_eq!(numbers, vec![1, 3]);
        assert_eq!(engine.call_count(), 3);
    }

    #[tokio::test]
    async fn test_ocr_skips_pages_that_fail_to_render() {
        let engine = FakeOcrEngine::fixed("page text", 85.0);
        let rasterizer = FakeRasterizer::with_pages(3).failing_page(2);
        let (_, strategy) = ocr_strategy(engine, rasterizer);

        match strategy.attempt(&context(b"%PDF-1.4".to_vec())).await {
            StrategyOutcome::Accepted(extraction) => {
                assert!(extraction.text.contains("--- Page 1 ---"));
                assert!(!extraction.text.contains("--- Page 2 ---"));
                assert!(extraction.text.contains("--- Page 3 ---"));
                assert!((extraction.confidence - 0.85).abs() < 1e-6);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_pages_never_touch_the_engine() {
        let (factory, strategy) = ocr_strategy(
            FakeOcrEngine::fixed("unused", 90.0),
            FakeRasterizer::with_pages(0),
        );
        let outcome = strategy.attempt(&context(b"%PDF-1.4".to_vec())).await;

        assert_eq!(
            outcome,
            StrategyOutcome::Declined(
                "PDF OCR produced no pages above minimum confidence".to_string()
            )
        );
        assert!(factory.attempted_profiles().is_empty());
    }

    #[tokio::test]
    async fn test_engine_failure_declines_step() {
        let factory = Arc::new(
            FakeEngineFactory::new(FakeOcrEngine::fixed("unused", 90.0))
                .failing_full()
                .failing_minimal(),
        );
        let strategy = RasterizeOcrStrategy::new(
            Arc::new(SharedOcrEngine::new(factory)),
            Arc::new(FakeRasterizer::with_pages(2)),
        );

        match strategy.attempt(&context(b"%PDF-1.4".to_vec())).await {
            StrategyOutcome::Declined(note) => {
                assert!(note.starts_with("PDF OCR failed: OCR engine initialization failed"))
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_binary_fallback_outcomes() {
        let outcome = BinaryFallbackStrategy
            .attempt(&context(b"\x00\x01Readable payload text\x02".to_vec()))
            .await;
        assert_eq!(
            outcome,
            StrategyOutcome::Accepted(Extraction {
                text: "Readable payload text".to_string(),
                confidence: BINARY_FALLBACK_CONFIDENCE,
                method: ExtractionMethod::BinaryFallback,
                notes: vec![BINARY_FALLBACK_NOTE.to_string()],
            })
        );

        let outcome = BinaryFallbackStrategy.attempt(&context(vec![0u8; 64])).await;
        assert_eq!(
            outcome,
            StrategyOutcome::Accepted(Extraction {
                text: String::new(),
                confidence: BINARY_FALLBACK_CONFIDENCE,
                method: ExtractionMethod::BinaryFallback,
                notes: vec![BINARY_FALLBACK_NOTE.to_string()],
            })
        );
    }
}
