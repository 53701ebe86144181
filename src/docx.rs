//! Header and footer text of DOCX letter templates.

use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde::Serialize;
use std::io::{Cursor, Read};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::debug;
use zip::ZipArchive;

static HEADER_PART: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^word/header\d*\.xml$").expect("header part pattern"));
static FOOTER_PART: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^word/footer\d*\.xml$").expect("footer part pattern"));

#[derive(Error, Debug)]
pub enum DocxError {
    #[error("Not a valid DOCX archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Failed to read {part}: {source}")]
    Read {
        part: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed XML in {part}: {details}")]
    Xml { part: String, details: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HeaderFooter {
    pub header: String,
    pub footer: String,
}

pub fn extract_header_footer(bytes: &[u8]) -> Result<HeaderFooter, DocxError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    let mut header_parts = Vec::new();
    let mut footer_parts = Vec::new();
    for name in archive.file_names() {
        if HEADER_PART.is_match(name) {
            header_parts.push(name.to_string());
        } else if FOOTER_PART.is_match(name) {
            footer_parts.push(name.to_string());
        }
    }
    header_parts.sort();
    footer_parts.sort();
    debug!(
        "DOCX has {} header and {} footer parts",
        header_parts.len(),
        footer_parts.len()
    );

    Ok(HeaderFooter {
        header: collect_parts(&mut archive, &header_parts)?,
        footer: collect_parts(&mut archive, &footer_parts)?,
    })
}

fn collect_parts(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    parts: &[String],
) -> Result<String, DocxError> {
    let mut texts = Vec::new();
    for part in parts {
        let xml = read_part(archive, part)?;
        let text = part_text(&xml).map_err(|details| DocxError::Xml {
            part: part.clone(),
            details,
        })?;
        if !text.is_empty() {
            texts.push(text);
        }
    }
    Ok(texts.join("\n"))
}

fn read_part(archive: &mut ZipArchive<Cursor<&[u8]>>, part: &str) -> Result<String, DocxError> {
    let mut file = archive.by_name(part)?;
    let mut xml = String::new();
    file.read_to_string(&mut xml).map_err(|source| DocxError::Read {
        part: part.to_string(),
        source,
    })?;
    Ok(xml)
}

/// Text of the `w:t` runs, one line per paragraph. Parts without any run
/// fall back to every text node in the document.
pub fn part_text(xml: &str) -> Result<String, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut paragraphs: Vec<String> = Vec::new();
    let mut paragraph = String::new();
    let mut saw_run = false;
    let mut in_run = false;
    let mut loose_text: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"w:t" => {
                in_run = true;
                saw_run = true;
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:t" => in_run = false,
                b"w:p" => {
                    let line = paragraph.trim().to_string();
                    if !line.is_empty() {
                        paragraphs.push(line);
                    }
                    paragraph.clear();
                }
                _ => {}
            },
            Ok(Event::Text(e)) => {
                let text = e.unescape().map_err(|e| e.to_string())?;
                if in_run {
                    paragraph.push_str(&text);
                } else if !text.trim().is_empty() {
                    loose_text.push(text.trim().to_string());
                }
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(&e).trim().to_string();
                if !text.is_empty() {
                    loose_text.push(text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(format!(
                    "error at position {}: {}",
                    reader.error_position(),
                    e
                ))
            }
            _ => {}
        }
    }

    let tail = paragraph.trim();
    if !tail.is_empty() {
        paragraphs.push(tail.to_string());
    }

    if saw_run {
        Ok(paragraphs.join("\n"))
    } else {
        Ok(loose_text.join(" "))
    }
}
