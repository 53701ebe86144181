pub mod engine;
pub mod error;
pub mod health;
pub mod pdf;
pub mod pipeline;
pub mod preprocess;
pub mod quality;
pub mod strategies;
#[cfg(feature = "ocr")]
pub mod tesseract_engine;
pub mod types;


pub use engine::{EngineProfile, EngineStatus, OcrEngine, OcrEngineFactory, SharedOcrEngine};
pub use error::OcrError;
pub use pipeline::DocumentExtractor;
pub use quality::{MeaningfulText, TextQualityGate};
pub use types::{ExtractionMethod, ExtractionOptions, ExtractionResult, UploadedFile};
