use anyhow::Result;
use std::env;
use std::path::PathBuf;

use crate::ocr::types::{
    ExtractionOptions, DEFAULT_LANGUAGE, DEFAULT_MAX_PAGES, DEFAULT_MIN_CONFIDENCE,
    DEFAULT_RASTER_SCALE,
};

#[derive(Clone, Debug)]
pub struct Config {
    pub ocr_language: String,
    pub raster_scale: f32,
    pub max_pages: usize,
    pub min_confidence: f32,
    pub enable_preprocessing: bool,
    pub tessdata_prefix: Option<String>,
    pub pdftoppm_path: String,
    pub temp_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Builds the configuration from any variable lookup. Unparseable values
    /// fall back to their defaults.
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Config {
            ocr_language: var("OCR_LANGUAGE")
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            raster_scale: var("OCR_RASTER_SCALE")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(DEFAULT_RASTER_SCALE),
            max_pages: var("OCR_MAX_PAGES")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(DEFAULT_MAX_PAGES),
            min_confidence: var("OCR_MIN_CONFIDENCE")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(DEFAULT_MIN_CONFIDENCE),
            enable_preprocessing: var("OCR_ENABLE_PREPROCESSING")
                .and_then(|s| parse_bool(&s))
                .unwrap_or(true),
            tessdata_prefix: var("TESSDATA_PREFIX").filter(|s| !s.trim().is_empty()),
            pdftoppm_path: var("PDFTOPPM_PATH")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "pdftoppm".to_string()),
            temp_dir: var("TEMP_DIR")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(env::temp_dir),
        })
    }

    pub fn default_options(&self) -> ExtractionOptions {
        ExtractionOptions {
            language: self.ocr_language.clone(),
            raster_scale: self.raster_scale,
            max_pages: self.max_pages,
            min_confidence: self.min_confidence,
            enable_preprocessing: self.enable_preprocessing,
        }
        .sanitized()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
