pub mod balance;
pub mod config;
pub mod docx;
pub mod mime_detection;
pub mod ocr;
pub mod transcript;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use balance::{parse_balance, FeeStatement};
pub use config::Config;
pub use docx::{extract_header_footer, HeaderFooter};
pub use ocr::{DocumentExtractor, ExtractionMethod, ExtractionOptions, ExtractionResult, UploadedFile};
pub use transcript::{names_match, TranscriptSummary};
