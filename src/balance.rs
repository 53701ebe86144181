//! Fee-statement balance detection over extracted text.
//!
//! Works on any text regardless of which extraction method produced it.
//! Zero indicators win over numbers: a statement that says "fully paid"
//! anywhere is treated as cleared even if other amounts appear.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use tracing::debug;

use crate::ocr::types::{ExtractionMethod, ExtractionResult};

const KEYWORDS: &str = r"(?:outstanding balance|balance|amount due|total due|arrears)";
const NUMBER: &str = r"([0-9][0-9,]*(?:\.[0-9]+)?)";

static ZERO_INDICATORS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"balance\s*:?\s*(?:kshs|ksh|kes)?\.?\s*0+(?:\.0+)?(?:\s|$)",
        r"\bnil balance\b",
        r"\bbalance nil\b",
        r"\bfully paid\b",
        r"\bno outstanding balance\b",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("zero indicator pattern"))
    .collect()
});

/// "cleared" with an optional negation in front; a captured negation means
/// the statement is not cleared.
static CLEARED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\b(not(?:\s+yet)?|un)[\s-]*)?\bcleared\b").expect("cleared pattern")
});

/// Dates and numeric ranges, e.g. `31/12/2024`, `2024-01-15`, `31.12.2024`.
static DATE_LIKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9][0-9,]*(?:[/-][0-9][0-9,]*)+|\b[0-9]{1,2}\.[0-9]{1,2}\.[0-9]{2,4}\b")
        .expect("date pattern")
});

static CANDIDATES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        format!(r"{}[^0-9]{{0,40}}?{}", KEYWORDS, NUMBER),
        format!(r"\b(?:kshs|ksh|kes)\.?\s*{}", NUMBER),
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("balance candidate pattern"))
    .collect()
});

static LINE_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(KEYWORDS).expect("balance keyword pattern"));

static FIRST_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(NUMBER).expect("number pattern"));

/// `nil` or a lone dash as the final token of a line.
static LINE_ZERO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[\s:])(?:nil|-)$").expect("line zero pattern"));

/// Returns the outstanding balance found in `text`, `Some(0.0)` when the text
/// says the balance is cleared, or `None` when nothing balance-like is present.
pub fn parse_balance(text: &str) -> Option<f64> {
    let normalized = text
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    if let Some(indicator) = ZERO_INDICATORS.iter().find(|re| re.is_match(&normalized)) {
        debug!("Zero balance indicator matched: {}", indicator.as_str());
        return Some(0.0);
    }
    if says_cleared(&normalized) {
        debug!("Statement marked as cleared");
        return Some(0.0);
    }
    if balance_lines(text).any(|line| LINE_ZERO.is_match(&line)) {
        debug!("Balance line ends with a zero marker");
        return Some(0.0);
    }

    let without_dates = DATE_LIKE.replace_all(&normalized, " ");
    let candidates: Vec<f64> = CANDIDATES
        .iter()
        .flat_map(|re| re.captures_iter(&without_dates))
        .filter_map(|caps| caps.get(1).and_then(|m| parse_amount(m.as_str())))
        .collect();

    if let Some(min) = candidates.iter().copied().reduce(f64::min) {
        debug!("Balance candidates {:?}, using {}", candidates, min);
        return Some(min);
    }

    scan_lines(text)
}

fn says_cleared(normalized: &str) -> bool {
    CLEARED
        .captures_iter(normalized)
        .any(|caps| caps.get(1).is_none())
}

/// Lower-cased, whitespace-collapsed lines that mention a balance keyword.
fn balance_lines(text: &str) -> impl Iterator<Item = String> + '_ {
    text.lines()
        .map(|line| {
            line.to_lowercase()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|line| LINE_KEYWORD.is_match(line))
}

fn scan_lines(text: &str) -> Option<f64> {
    balance_lines(text).find_map(|line| {
        let line = DATE_LIKE.replace_all(&line, " ");
        FIRST_NUMBER
            .captures(&line)
            .and_then(|caps| caps.get(1))
            .and_then(|m| parse_amount(m.as_str()))
    })
}

fn parse_amount(raw: &str) -> Option<f64> {
    raw.trim_end_matches(',').replace(',', "").parse().ok()
}

/// Formats an amount the way fee statements print it, e.g. `KSH 4,500.00`.
pub fn format_ksh(amount: f64) -> String {
    let fixed = format!("{:.2}", amount.abs());
    let (whole, cents) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if amount < 0.0 { "-" } else { "" };
    format!("KSH {}{}.{}", sign, grouped, cents)
}

/// Balance verdict for one extracted fee statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeStatement {
    pub balance: Option<f64>,
    pub balance_display: String,
    pub balance_cleared: bool,
    pub confidence: f32,
    pub method: Option<ExtractionMethod>,
}

impl FeeStatement {
    pub fn from_extraction(result: &ExtractionResult) -> Self {
        let balance = parse_balance(&result.text);
        Self {
            balance,
            balance_display: balance
                .map(format_ksh)
                .unwrap_or_else(|| "Unable to determine".to_string()),
            balance_cleared: balance == Some(0.0),
            confidence: result.confidence,
            method: result.method,
        }
    }
}
