use chrono::{Datelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

/// Confidence assigned to a fully clean answer before any penalties.
pub const BASE_CONFIDENCE: f32 = 0.95;

const INVALID_MARKER_PENALTY: f32 = 0.20;
const INVALID_STATUTE_PENALTY: f32 = 0.05;
const IMPLAUSIBLE_YEAR_PENALTY: f32 = 0.01;

/// The Indian Penal Code runs from Section 1 to Section 511.
const IPC_SECTION_RANGE: std::ops::RangeInclusive<u32> = 1..=511;
/// The Constitution of India has Articles 1 through 395.
const ARTICLE_RANGE: std::ops::RangeInclusive<u32> = 1..=395;
/// No cited judgment or statute predates independence.
const EARLIEST_PLAUSIBLE_YEAR: i32 = 1947;

static MARKER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\d+)\]").unwrap_or_else(|_| unreachable!()));
static IPC_SECTION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bsection\s+(\d+)[A-Z]?\s+(?:of\s+the\s+)?(?:Indian\s+Penal\s+Code|IPC)")
        .unwrap_or_else(|_| unreachable!())
});
static ARTICLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\barticle\s+(\d+)").unwrap_or_else(|_| unreachable!()));
static YEAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(1[89]\d\d|20\d\d)\b").unwrap_or_else(|_| unreachable!()));

/// Outcome of structural answer validation, with the penalized confidence.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub confidence: f32,
    /// Citation markers that do not resolve to a supplied source.
    pub invalid_markers: Vec<usize>,
    /// Statute or article references outside their legal range.
    pub invalid_statutes: Vec<String>,
    /// Years before independence or in the future.
    pub implausible_years: Vec<i32>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.invalid_markers.is_empty()
            && self.invalid_statutes.is_empty()
            && self.implausible_years.is_empty()
    }
}

/// Citation markers appearing in the answer, in order of appearance.
pub fn extract_markers(text: &str) -> Vec<usize> {
    let mut markers = Vec::new();
    for capture in MARKER_PATTERN.captures_iter(text) {
        if let Some(marker) = capture.get(1).and_then(|m| m.as_str().parse::<usize>().ok()) {
            if !markers.contains(&marker) {
                markers.push(marker);
            }
        }
    }
    markers
}

/// Validate an answer against the markers that actually have sources behind
/// them. Each defect class carries its own penalty off [`BASE_CONFIDENCE`];
/// the result never goes below zero.
pub fn validate_answer(answer_text: &str, available_markers: &[usize]) -> ValidationReport {
    let mut report = ValidationReport::default();

    for marker in extract_markers(answer_text) {
        if !available_markers.contains(&marker) {
            report.invalid_markers.push(marker);
        }
    }

    for capture in IPC_SECTION_PATTERN.captures_iter(answer_text) {
        if let (Some(full), Some(number)) = (capture.get(0), capture.get(1)) {
            match number.as_str().parse::<u32>() {
                Ok(section) if IPC_SECTION_RANGE.contains(&section) => {}
                _ => report.invalid_statutes.push(full.as_str().to_string()),
            }
        }
    }
    for capture in ARTICLE_PATTERN.captures_iter(answer_text) {
        if let (Some(full), Some(number)) = (capture.get(0), capture.get(1)) {
            match number.as_str().parse::<u32>() {
                Ok(article) if ARTICLE_RANGE.contains(&article) => {}
                _ => report.invalid_statutes.push(full.as_str().to_string()),
            }
        }
    }

    let current_year = Utc::now().year();
    for capture in YEAR_PATTERN.captures_iter(answer_text) {
        if let Some(year) = capture.get(1).and_then(|m| m.as_str().parse::<i32>().ok()) {
            if !(EARLIEST_PLAUSIBLE_YEAR..=current_year).contains(&year)
                && !report.implausible_years.contains(&year)
            {
                report.implausible_years.push(year);
            }
        }
    }

    let mut confidence = BASE_CONFIDENCE;
    confidence -= INVALID_MARKER_PENALTY * report.invalid_markers.len() as f32;
    confidence -= INVALID_STATUTE_PENALTY * report.invalid_statutes.len() as f32;
    confidence -= IMPLAUSIBLE_YEAR_PENALTY * report.implausible_years.len() as f32;
    report.confidence = confidence.max(0.0);

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_answer_keeps_base_confidence() {
        let report = validate_answer(
            "Section 302 of the Indian Penal Code prescribes the punishment for murder [1]. \
             The provision was interpreted in Bachan Singh (1980) [2].",
            &[1, 2],
        );
        assert!(report.is_clean());
        assert!((report.confidence - BASE_CONFIDENCE).abs() < f32::EPSILON);
    }

    #[test]
    fn orphan_marker_costs_twenty_points() {
        let report = validate_answer("Murder carries life imprisonment [3].", &[1, 2]);
        assert_eq!(report.invalid_markers, vec![3]);
        assert!((report.confidence - (BASE_CONFIDENCE - 0.20)).abs() < 1e-6);
    }

    #[test]
    fn out_of_range_section_is_flagged() {
        let report = validate_answer(
            "Section 999 of the Indian Penal Code covers this [1].",
            &[1],
        );
        assert_eq!(report.invalid_statutes.len(), 1);
        assert!((report.confidence - (BASE_CONFIDENCE - 0.05)).abs() < 1e-6);
    }

    #[test]
    fn out_of_range_article_is_flagged() {
        let report = validate_answer("Article 400 guarantees this right [1].", &[1]);
        assert_eq!(report.invalid_statutes.len(), 1);
    }

    #[test]
    fn pre_independence_year_is_a_minor_defect() {
        let report = validate_answer("The statute was enacted in 1860 [1].", &[1]);
        assert_eq!(report.implausible_years, vec![1860]);
        assert!((report.confidence - (BASE_CONFIDENCE - 0.01)).abs() < 1e-6);
    }

    #[test]
    fn markers_are_extracted_in_order() {
        assert_eq!(extract_markers("see [2] and [1], also [2]"), vec![2, 1]);
    }

    #[test]
    fn confidence_never_goes_negative() {
        let report = validate_answer(
            "[5] [6] [7] [8] [9] all say Section 900 of the IPC applies.",
            &[],
        );
        assert!(report.confidence >= 0.0);
    }
}
