use async_trait::async_trait;
use std::sync::Arc;
use tesseract::{OcrEngineMode, PageSegMode, Tesseract};
use tracing::debug;

use crate::ocr::engine::{
    EngineConfig, EngineProfile, OcrEngine, OcrEngineFactory, OcrOutput, CHAR_WHITELIST,
};
use crate::ocr::error::OcrError;

/// Tesseract recognizer. The underlying API handle is consumed by every
/// recognition, so the engine keeps the validated configuration and builds a
/// fresh handle on the blocking pool for each image.
pub struct TesseractEngine {
    config: EngineConfig,
}

impl TesseractEngine {
    fn build(config: &EngineConfig) -> Result<Tesseract, OcrError> {
        let datapath = config.datapath.as_deref();
        let language = Some(config.language.as_str());

        match config.profile {
            EngineProfile::Full => {
                let mut tesseract =
                    Tesseract::new_with_oem(datapath, language, OcrEngineMode::LstmOnly)
                        .map_err(|e| OcrError::InitializationFailed {
                            details: e.to_string(),
                        })?;
                tesseract.set_page_seg_mode(PageSegMode::PsmAutoOsd);

                tesseract
                    .set_variable("tessedit_char_whitelist", CHAR_WHITELIST)
                    .and_then(|t| t.set_variable("preserve_interword_spaces", "1"))
                    .map_err(|e| OcrError::InitializationFailed {
                        details: e.to_string(),
                    })
            }
            EngineProfile::Minimal => {
                Tesseract::new(datapath, language).map_err(|e| OcrError::InitializationFailed {
                    details: e.to_string(),
                })
            }
        }
    }

    fn recognize_blocking(config: &EngineConfig, image: &[u8]) -> Result<OcrOutput, OcrError> {
        let mut tesseract = Self::build(config)?
            .set_image_from_mem(image)
            .map_err(|e| OcrError::InvalidImageFormat {
                details: e.to_string(),
            })?
            .recognize()
            .map_err(|e| OcrError::RecognitionFailed {
                details: e.to_string(),
            })?;

        let text = tesseract
            .get_text()
            .map_err(|e| OcrError::RecognitionFailed {
                details: format!("Failed to extract text: {}", e),
            })?;

        let confidence = (tesseract.mean_text_conf() as f32).clamp(0.0, 100.0);
        debug!("Tesseract confidence: {:.1}%", confidence);

        Ok(OcrOutput {
            text: text.trim().to_string(),
            confidence,
        })
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    async fn recognize(&self, image: Vec<u8>) -> Result<OcrOutput, OcrError> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || TesseractEngine::recognize_blocking(&config, &image))
            .await
            .map_err(OcrError::from_join)?
    }
}

pub struct TesseractEngineFactory;

impl OcrEngineFactory for TesseractEngineFactory {
    fn create(&self, config: &EngineConfig) -> Result<Arc<dyn OcrEngine>, OcrError> {
        // Fails here when language data or OSD models are missing
        TesseractEngine::build(config)?;
        Ok(Arc::new(TesseractEngine {
            config: config.clone(),
        }))
    }
}
