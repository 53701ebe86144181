use anyhow::anyhow;
use serde::Serialize;
use std::process::Command;

use crate::ocr::error::OcrError;

/// Checks the external programs the extraction pipeline relies on.
pub struct OcrHealthChecker {
    tesseract_binary: String,
    pdftoppm_binary: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub tesseract_version: Option<String>,
    pub available_languages: Vec<String>,
    pub requested_language: String,
    pub requested_language_available: bool,
    pub pdftoppm_version: Option<String>,
    pub ocr_backend_compiled: bool,
    pub problems: Vec<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.problems.is_empty()
    }
}

impl Default for OcrHealthChecker {
    fn default() -> Self {
        Self::new("pdftoppm")
    }
}

impl OcrHealthChecker {
    pub fn new(pdftoppm_binary: impl Into<String>) -> Self {
        Self {
            tesseract_binary: "tesseract".to_string(),
            pdftoppm_binary: pdftoppm_binary.into(),
        }
    }

    pub fn check_tesseract_installation(&self) -> Result<String, OcrError> {
        let output = Command::new(&self.tesseract_binary)
            .arg("--version")
            .output()
            .map_err(|_| OcrError::TesseractNotInstalled)?;

        if !output.status.success() {
            return Err(OcrError::TesseractNotInstalled);
        }

        // Older releases print the version banner on stderr
        let banner = if output.stdout.is_empty() {
            String::from_utf8_lossy(&output.stderr).into_owned()
        } else {
            String::from_utf8_lossy(&output.stdout).into_owned()
        };
        Ok(first_line(&banner))
    }

    pub fn get_available_languages(&self) -> Result<Vec<String>, OcrError> {
        let output = Command::new(&self.tesseract_binary)
            .arg("--list-langs")
            .output()
            .map_err(|_| OcrError::TesseractNotInstalled)?;

        if !output.status.success() {
            return Err(OcrError::TesseractNotInstalled);
        }

        Ok(parse_language_list(&String::from_utf8_lossy(&output.stdout)))
    }

    pub fn check_pdftoppm_installation(&self) -> Result<String, OcrError> {
        let output = Command::new(&self.pdftoppm_binary)
            .arg("-v")
            .output()
            .map_err(|e| {
                OcrError::Other(anyhow!("{} is not available: {}", self.pdftoppm_binary, e))
            })?;

        // pdftoppm prints its version to stderr
        Ok(first_line(&String::from_utf8_lossy(&output.stderr)))
    }

    pub fn perform_full_health_check(&self, language: &str) -> HealthReport {
        let mut problems = Vec::new();

        let tesseract_version = match self.check_tesseract_installation() {
            Ok(version) => Some(version),
            Err(e) => {
                problems.push(e.to_string());
                None
            }
        };

        let available_languages = if tesseract_version.is_some() {
            self.get_available_languages().unwrap_or_default()
        } else {
            Vec::new()
        };

        let requested_language_available = match check_languages(language, &available_languages) {
            Ok(()) => true,
            Err(e) => {
                if tesseract_version.is_some() {
                    problems.push(e.to_string());
                }
                false
            }
        };

        let pdftoppm_version = match self.check_pdftoppm_installation() {
            Ok(version) => Some(version),
            Err(e) => {
                problems.push(e.to_string());
                None
            }
        };

        let ocr_backend_compiled = cfg!(feature = "ocr");
        if !ocr_backend_compiled {
            problems.push("built without the `ocr` feature; OCR strategies are disabled".to_string());
        }

        HealthReport {
            tesseract_version,
            available_languages,
            requested_language: language.to_string(),
            requested_language_available,
            pdftoppm_version,
            ocr_backend_compiled,
            problems,
        }
    }
}

/// Parses `tesseract --list-langs`, skipping the "List of available
/// languages" header and the `osd` pseudo-language.
pub fn parse_language_list(output: &str) -> Vec<String> {
    let mut languages: Vec<String> = output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.to_ascii_lowercase().starts_with("list of available languages"))
        .filter(|line| *line != "osd")
        .map(str::to_string)
        .collect();
    languages.sort();
    languages
}

/// Accepts a single code or a `+` separated combination such as `eng+swa`.
fn check_languages(language: &str, available: &[String]) -> Result<(), OcrError> {
    if language.trim().is_empty() {
        return Err(OcrError::LanguageDataNotFound {
            lang: "empty".to_string(),
        });
    }

    for lang in language.split('+').map(str::trim) {
        if !available.iter().any(|known| known == lang) {
            return Err(OcrError::LanguageDataNotFound {
                lang: lang.to_string(),
            });
        }
    }
    Ok(())
}

fn first_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("Unknown")
        .to_string()
}
