//! Test doubles and fixtures shared by unit and integration tests.
//!
//! PDFs are generated with lopdf so the native text path runs against real
//! documents, while OCR and rasterization are replaced by scripted fakes.

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::ocr::engine::{EngineConfig, EngineProfile, OcrEngine, OcrEngineFactory, OcrOutput};
use crate::ocr::error::OcrError;
use crate::ocr::pdf::{PageRasterizer, RasterDocument};

/// A PDF with one page per entry. Each line of an entry becomes its own text
/// line in Courier 12pt.
pub fn build_text_pdf(pages: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    for page in pages {
        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("Td", vec![50.into(), 780.into()]),
        ];
        for line in page.lines() {
            // Trailing space keeps words on adjacent lines apart
            operations.push(Operation::new(
                "Tj",
                vec![Object::string_literal(format!("{} ", line))],
            ));
            operations.push(Operation::new("Td", vec![0.into(), (-14).into()]));
        }
        operations.push(Operation::new("ET", vec![]));

        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("encode page content"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("serialize test PDF");
    bytes
}

/// A structurally valid PDF whose page tree is empty.
pub fn build_empty_pdf() -> Vec<u8> {
    build_text_pdf(&[])
}

/// A page of ordinary prose long enough to pass the default quality gate.
pub fn invoice_page(extra: &str) -> String {
    format!(
        "University of Nairobi Finance Office\n\
         Student fee statement for the industrial attachment semester\n\
         Tuition fees, examination fees and library charges are listed below\n\
         Payments received through the bank have been applied to the account\n\
         {}",
        extra
    )
}

struct FakeEngineState {
    default: Option<OcrOutput>,
    scripted: HashMap<Vec<u8>, OcrOutput>,
    failure: Option<String>,
    calls: AtomicUsize,
    seen: Mutex<Vec<Vec<u8>>>,
}

/// Scripted OCR engine. Clones share call counters and recorded images.
#[derive(Clone)]
pub struct FakeOcrEngine {
    state: Arc<FakeEngineState>,
}

impl FakeOcrEngine {
    fn with_state(
        default: Option<OcrOutput>,
        scripted: HashMap<Vec<u8>, OcrOutput>,
        failure: Option<String>,
    ) -> Self {
        Self {
            state: Arc::new(FakeEngineState {
                default,
                scripted,
                failure,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Returns the same output for every image.
    pub fn fixed(text: &str, confidence: f32) -> Self {
        Self::with_state(
            Some(OcrOutput {
                text: text.to_string(),
                confidence,
            }),
            HashMap::new(),
            None,
        )
    }

    /// Output keyed by the exact image bytes; unknown images fail recognition.
    pub fn scripted(responses: Vec<(Vec<u8>, &str, f32)>) -> Self {
        let scripted = responses
            .into_iter()
            .map(|(image, text, confidence)| {
                (
                    image,
                    OcrOutput {
                        text: text.to_string(),
                        confidence,
                    },
                )
            })
            .collect();
        Self::with_state(None, scripted, None)
    }

    pub fn failing(details: &str) -> Self {
        Self::with_state(None, HashMap::new(), Some(details.to_string()))
    }

    pub fn call_count(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    pub fn seen_images(&self) -> Vec<Vec<u8>> {
        self.state.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl OcrEngine for FakeOcrEngine {
    async fn recognize(&self, image: Vec<u8>) -> Result<OcrOutput, OcrError> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        self.state.seen.lock().unwrap().push(image.clone());

        if let Some(details) = &self.state.failure {
            return Err(OcrError::RecognitionFailed {
                details: details.clone(),
            });
        }
        if let Some(output) = self.state.scripted.get(&image) {
            return Ok(output.clone());
        }
        self.state
            .default
            .clone()
            .ok_or_else(|| OcrError::RecognitionFailed {
                details: format!("no scripted output for {} byte image", image.len()),
            })
    }
}

/// Factory that hands out a [`FakeOcrEngine`] and records every attempt.
pub struct FakeEngineFactory {
    engine: FakeOcrEngine,
    delay: Option<Duration>,
    failing: HashSet<EngineProfile>,
    attempts: Mutex<Vec<EngineConfig>>,
}

impl FakeEngineFactory {
    pub fn new(engine: FakeOcrEngine) -> Self {
        Self {
            engine,
            delay: None,
            failing: HashSet::new(),
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Blocks each `create` call, widening the window for concurrent callers.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_full(mut self) -> Self {
        self.failing.insert(EngineProfile::Full);
        self
    }

    pub fn failing_minimal(mut self) -> Self {
        self.failing.insert(EngineProfile::Minimal);
        self
    }

    pub fn attempted_profiles(&self) -> Vec<EngineProfile> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .map(|config| config.profile)
            .collect()
    }

    pub fn attempted_languages(&self) -> Vec<String> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .map(|config| config.language.clone())
            .collect()
    }
}

impl OcrEngineFactory for FakeEngineFactory {
    fn create(&self, config: &EngineConfig) -> Result<Arc<dyn OcrEngine>, OcrError> {
        self.attempts.lock().unwrap().push(config.clone());
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.failing.contains(&config.profile) {
            return Err(OcrError::InitializationFailed {
                details: format!("{:?} profile unavailable for '{}'", config.profile, config.language),
            });
        }
        Ok(Arc::new(self.engine.clone()))
    }
}

/// Rasterizer with a fixed page count. Page `n` renders to the bytes
/// `page-n`, so scripted engines can key their output by page.
#[derive(Clone, Default)]
pub struct FakeRasterizer {
    pages: usize,
    failing_pages: HashSet<usize>,
}

impl FakeRasterizer {
    pub fn with_pages(pages: usize) -> Self {
        Self {
            pages,
            failing_pages: HashSet::new(),
        }
    }

    pub fn failing_page(mut self, page_number: usize) -> Self {
        self.failing_pages.insert(page_number);
        self
    }
}

pub fn page_image(page_number: usize) -> Vec<u8> {
    format!("page-{}", page_number).into_bytes()
}

#[async_trait]
impl PageRasterizer for FakeRasterizer {
    async fn open(&self, pdf: Arc<Vec<u8>>) -> Result<Box<dyn RasterDocument>, OcrError> {
        if !pdf.starts_with(b"%PDF") {
            return Err(OcrError::InvalidPdf {
                details: "missing %PDF header".to_string(),
            });
        }
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl RasterDocument for FakeRasterizer {
    fn page_count(&self) -> usize {
        self.pages
    }

    async fn render_page(&self, page_number: usize, _scale: f32) -> Result<Vec<u8>, OcrError> {
        if self.failing_pages.contains(&page_number) {
            return Err(OcrError::RenderFailed {
                page: page_number,
                details: "scripted render failure".to_string(),
            });
        }
        Ok(page_image(page_number))
    }
}
