//! Academic transcript analysis over extracted text: who the transcript
//! belongs to and which units were completed.

use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::debug;

use crate::ocr::types::{ExtractionMethod, ExtractionResult};

pub const UNKNOWN_STUDENT: &str = "Unknown Student";

/// Minimum share of words two names must have in common to match.
pub const NAME_MATCH_RATIO: f64 = 0.6;

const EXCLUDED_NAME_WORDS: &[&str] = &[
    "UNIT", "CODE", "DESCRIPTION", "GRADE", "CREDIT", "OBJECT", "ORIENTED", "PROGRAMMING",
    "COMPUTER", "SCIENCE", "BACHELOR", "EASTERN", "AFRICA", "CATHOLIC", "UNIVERSITY",
    "ACADEMIC", "REGISTRAR", "TRANSCRIPT", "STUDENT", "NUMBER", "STAGE", "SEMESTER", "YEAR",
    "MARKS", "POINTS",
];

/// Tried in order; the first candidate that looks like a person's name wins.
static NAME_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Name printed directly above the student number
        r"(?im)([A-Z]+\s+[A-Z]+\s+[A-Z]+)\s*\n\s*\d{6,8}",
        r"(?im)([A-Z][A-Z\s]+[A-Z])\s*\n\s*\d{7,}",
        r"(?im)\b([A-Z]{3,}\s+[A-Z]{3,}\s+[A-Z]{3,})\b",
        r"(?im)([A-Z][A-Z\s]+[A-Z])\s*(?:ID|STUDENT|REG|ADMISSION)",
        r"(?im)(?:student\s+name|name\s+of\s+student|full\s+name)[:\s]*([^\n\r]{5,50})",
        r"(?im)name[:\s]*([A-Z][a-z]+(?:\s+[A-Z][a-z]+){1,3})",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("student name pattern"))
    .collect()
});

static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s]").expect("non-word pattern"));

static FILE_EXTENSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.[^.]*$").expect("extension pattern"));

static FILENAME_NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:transcript|record|academic|student|attachment|eligibility)\b")
        .expect("filename noise pattern")
});

/// Where in a unit pattern's captures the course, units and grade sit.
struct UnitPattern {
    regex: Regex,
    course: Option<usize>,
    units: usize,
    grade: usize,
}

static UNIT_PATTERNS: LazyLock<Vec<UnitPattern>> = LazyLock::new(|| {
    // Grades are matched case-sensitively so ordinary words do not read as grades
    let grade = r"(?-i:([A-F][+-]?|[IXZ]))";
    [
        (
            format!(
                r"(?i)credit\s*(?:hours?|units?)?\s*:?\s*(\d+)\s*.*?grade\s*:?\s*{}(?:\s|$)",
                grade
            ),
            None,
            1,
            2,
        ),
        (
            format!(
                r"(?i)\b([A-Z]{{2,4}}\s*\d{{3,4}})\s+.*?\b(\d+)\s*(?:units?|credits?|hrs?)\b.*?(?:^|\s){}(?:\s|$)",
                grade
            ),
            Some(1),
            2,
            3,
        ),
        (
            format!(r"(?i)(?:^|\s){}\s+.*?\b(\d+)\s*(?:units?|credits?)\b", grade),
            None,
            2,
            1,
        ),
    ]
    .into_iter()
    .map(|(pattern, course, units, grade)| UnitPattern {
        regex: Regex::new(&pattern).expect("unit pattern"),
        course,
        units,
        grade,
    })
    .collect()
});

static UNIT_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:total|completed|earned)\s*(?:units?|credits?|hours?)[:\s]*(\d+)")
        .expect("unit summary pattern")
});

static PASSING_GRADE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-E][+-]?$").expect("passing grade pattern"));

static INCOMPLETE_GRADE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[IXZ]$").expect("incomplete grade pattern"));

/// Finds the student's name in transcript text, falling back to the file name
/// and finally to [`UNKNOWN_STUDENT`].
pub fn extract_student_name(text: &str, filename: &str) -> String {
    for pattern in NAME_PATTERNS.iter() {
        for caps in pattern.captures_iter(text) {
            let Some(candidate) = caps.get(1).map(|m| m.as_str().trim()) else {
                continue;
            };
            if is_valid_name(candidate) {
                debug!("Student name matched by {}", pattern.as_str());
                return clean_name(candidate);
            }
        }
    }
    name_from_filename(filename)
}

/// Two to four alphabetic words, each capitalized or all upper case, none of
/// them a word that commonly appears in transcript headings.
pub fn is_valid_name(candidate: &str) -> bool {
    let length = candidate.chars().count();
    if !(5..=50).contains(&length) {
        return false;
    }

    let words: Vec<&str> = candidate.split_whitespace().collect();
    if !(2..=4).contains(&words.len()) {
        return false;
    }

    if words
        .iter()
        .any(|word| EXCLUDED_NAME_WORDS.contains(&word.to_uppercase().as_str()))
    {
        return false;
    }

    words.iter().all(|word| {
        let letters = word.chars().count();
        let starts_upper = word.chars().next().is_some_and(char::is_uppercase);
        word.chars().all(char::is_alphabetic)
            && (2..=15).contains(&letters)
            && (starts_upper || word.chars().all(char::is_uppercase))
    })
}

/// Strips punctuation and title-cases each word.
pub fn clean_name(name: &str) -> String {
    NON_WORD
        .replace_all(name, "")
        .split_whitespace()
        .map(title_case)
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn name_from_filename(filename: &str) -> String {
    let stem = FILE_EXTENSION.replace(filename, "").replace(['_', '-'], " ");
    let cleaned = clean_name(&FILENAME_NOISE.replace_all(&stem, " "));
    if cleaned.is_empty() {
        UNKNOWN_STUDENT.to_string()
    } else {
        cleaned
    }
}

/// Case-insensitive name comparison: exact, one containing the other, or at
/// least [`NAME_MATCH_RATIO`] of the words shared.
pub fn names_match(provided: &str, extracted: &str) -> bool {
    let provided = provided.trim().to_lowercase();
    let extracted = extracted.trim().to_lowercase();
    if provided.is_empty() || extracted.is_empty() {
        return false;
    }
    if provided == extracted || provided.contains(&extracted) || extracted.contains(&provided) {
        return true;
    }

    let provided_words: HashSet<&str> = provided.split_whitespace().collect();
    let extracted_words: HashSet<&str> = extracted.split_whitespace().collect();
    let shared = provided_words.intersection(&extracted_words).count();
    let ratio = shared as f64 / provided_words.len().max(extracted_words.len()) as f64;
    ratio >= NAME_MATCH_RATIO
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitRecord {
    pub course: String,
    pub units: u32,
    pub grade: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitAnalysis {
    pub completed_units: u32,
    pub has_incomplete_units: bool,
    pub unit_details: Vec<UnitRecord>,
}

/// Counts units with a passing grade and flags incomplete (`I`, `X`, `Z`)
/// grades. A stated total such as "Total credits: 36" overrides a smaller
/// line-by-line count.
pub fn analyze_units(text: &str) -> UnitAnalysis {
    let mut analysis = UnitAnalysis::default();

    for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let Some(record) = UNIT_PATTERNS.iter().find_map(|pattern| unit_record(pattern, line))
        else {
            continue;
        };

        if PASSING_GRADE.is_match(&record.grade) {
            analysis.completed_units += record.units;
        } else if INCOMPLETE_GRADE.is_match(&record.grade) {
            analysis.has_incomplete_units = true;
        }
        analysis.unit_details.push(record);
    }

    for caps in text.lines().filter_map(|line| UNIT_SUMMARY.captures(line)) {
        if let Some(total) = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) {
            if (10..=200).contains(&total) {
                analysis.completed_units = analysis.completed_units.max(total);
            }
        }
    }

    debug!(
        "Transcript units: {} completed, {} rows, incomplete={}",
        analysis.completed_units,
        analysis.unit_details.len(),
        analysis.has_incomplete_units
    );
    analysis
}

fn unit_record(pattern: &UnitPattern, line: &str) -> Option<UnitRecord> {
    let caps = pattern.regex.captures(line)?;
    let units: u32 = caps.get(pattern.units)?.as_str().parse().ok()?;
    if !(1..=10).contains(&units) {
        return None;
    }
    let course = pattern
        .course
        .and_then(|index| caps.get(index))
        .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase())
        .unwrap_or_else(|| "Course".to_string());

    Some(UnitRecord {
        course,
        units,
        grade: caps.get(pattern.grade)?.as_str().to_uppercase(),
    })
}

/// Transcript verdict for one extraction, optionally checked against the
/// name the student registered with.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSummary {
    pub student_name: String,
    pub name_matches: Option<bool>,
    pub units: UnitAnalysis,
    pub confidence: f32,
    pub method: Option<ExtractionMethod>,
}

impl TranscriptSummary {
    pub fn from_extraction(
        result: &ExtractionResult,
        filename: &str,
        registered_name: Option<&str>,
    ) -> Self {
        let student_name = extract_student_name(&result.text, filename);
        Self {
            name_matches: registered_name.map(|name| names_match(name, &student_name)),
            units: analyze_units(&result.text),
            student_name,
            confidence: result.confidence,
            method: result.method,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CUEA_TRANSCRIPT: &str = "THE CATHOLIC UNIVERSITY OF EASTERN AFRICA\n\
        ACADEMIC TRANSCRIPT\n\
        EASTON MICHURA OCHIENG\n\
        1046098\n\
        Programme: Bachelor of Science in Computer Science\n\
        CSC 101 Introduction to Programming 3 units A\n\
        MAT 120 Calculus 4 units B+\n\
        CSC 205 Data Structures 3 units I\n\
        PHY 110 Physics 3 units F\n";

    #[test]
    fn test_name_above_student_number() {
        assert_eq!(extract_student_name(CUEA_TRANSCRIPT, ""), "Easton Michura Ochieng");
    }

    #[test]
    fn test_name_field() {
        let text = "Student Name: Jane Wanjiku Doe\nCourse: BSc IT";
        assert_eq!(extract_student_name(text, "scan.pdf"), "Jane Wanjiku Doe");
    }

    #[test]
    fn test_heading_words_are_not_names() {
        let text = "COMPUTER SCIENCE DEPARTMENT\nUnit Code Description Grade";
        assert_eq!(extract_student_name(text, ""), UNKNOWN_STUDENT);
    }

    #[test]
    fn test_filename_fallback() {
        assert_eq!(extract_student_name("", "john_kamau_transcript.pdf"), "John Kamau");
        assert_eq!(extract_student_name("", "academic-record.pdf"), UNKNOWN_STUDENT);
    }

    #[test]
    fn test_name_validity() {
        assert!(is_valid_name("Easton Michura"));
        assert!(is_valid_name("EASTON MICHURA OCHIENG"));
        assert!(!is_valid_name("Easton"));
        assert!(!is_valid_name("easton michura"));
        assert!(!is_valid_name("One Two Three Four Five"));
        assert!(!is_valid_name("Jane Doe2"));
        assert!(!is_valid_name("Registrar Office Stamp"));
    }

    #[test]
    fn test_units_are_counted_per_grade() {
        let analysis = analyze_units(CUEA_TRANSCRIPT);
        assert_eq!(analysis.completed_units, 7);
        assert!(analysis.has_incomplete_units);
        assert_eq!(analysis.unit_details.len(), 4);
        assert_eq!(
            analysis.unit_details[1],
            UnitRecord {
                course: "MAT 120".to_string(),
                units: 4,
                grade: "B+".to_string(),
            }
        );
    }

    #[test]
    fn test_credit_and_grade_fields() {
        let analysis = analyze_units("Credit Hours: 3 Grade: B\nA 2 credits\n");
        assert_eq!(analysis.completed_units, 5);
        assert!(!analysis.has_incomplete_units);
        assert_eq!(analysis.unit_details[0].course, "Course");
    }

    #[test]
    fn test_summary_total_overrides_smaller_count() {
        let text = "CSC 101 Introduction to Programming 3 units A\nTotal credits: 36\n";
        assert_eq!(analyze_units(text).completed_units, 36);

        // Out of range totals are ignored
        let text = "CSC 101 Introduction to Programming 3 units A\nTotal credits: 500\n";
        assert_eq!(analyze_units(text).completed_units, 3);
    }

    #[test]
    fn test_implausible_unit_counts_are_skipped() {
        let analysis = analyze_units("CSC 499 Final Year Project 12 units A");
        assert!(analysis.unit_details.is_empty());
        assert_eq!(analysis.completed_units, 0);
    }

    #[test]
    fn test_names_match() {
        assert!(names_match("Easton Michura Ochieng", "EASTON MICHURA OCHIENG"));
        assert!(names_match("Easton Ochieng", "easton ochieng kamau"));
        assert!(names_match("Jane Wanjiku Doe", "Doe Jane Achieng"));
        assert!(!names_match("Jane Wanjiku Doe", "Jane Otieno Kamau"));
        assert!(!names_match("Jane Doe", "Jane Wanjiku Doe Mary Smith"));
        assert!(!names_match("", "Jane Doe"));
    }

    #[test]
    fn test_summary_from_extraction() {
        let result = ExtractionResult {
            text: CUEA_TRANSCRIPT.to_string(),
            confidence: 0.95,
            method: Some(ExtractionMethod::NativeText),
            processing_time_ms: 5,
            errors: vec![],
        };
        let summary = TranscriptSummary::from_extraction(&result, "t.pdf", Some("Easton Ochieng"));
        assert_eq!(summary.student_name, "Easton Michura Ochieng");
        assert_eq!(summary.name_matches, Some(true));
        assert_eq!(summary.units.completed_units, 7);

        let summary = TranscriptSummary::from_extraction(&result, "t.pdf", Some("Mary Achieng"));
        assert_eq!(summary.name_matches, Some(false));

        let summary = TranscriptSummary::from_extraction(&result, "t.pdf", None);
        assert_eq!(summary.name_matches, None);
    }
}
