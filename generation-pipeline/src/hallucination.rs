use once_cell::sync::Lazy;
use regex::Regex;

use crate::validator::extract_markers;

/// Maximum distance, in characters, between a legal claim and the citation
/// marker that covers it.
const ATTRIBUTION_WINDOW: usize = 150;
/// Share of a sentence's significant words that must appear in the context
/// for the sentence to count as supported.
const SUPPORT_OVERLAP: f32 = 0.40;
/// The knowledge-base consistency check weighs double: contradicting a known
/// graph fact is the worst failure mode.
const KB_WEIGHT: f32 = 2.0;

static CLAIM_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(section\s+\d+[A-Z]?|article\s+\d+|[A-Z][\w.]+\s+v\.?\s+[A-Z][\w.]+)")
        .unwrap_or_else(|_| unreachable!())
});
static MARKER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\d+)\]").unwrap_or_else(|_| unreachable!()));
static YEAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(1[89]\d\d|20\d\d)\b").unwrap_or_else(|_| unreachable!()));
static SECTION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bsection\s+(\d+)[A-Z]?\s+(?:of\s+the\s+)?(?:Indian\s+Penal\s+Code|IPC)")
        .unwrap_or_else(|_| unreachable!())
});
static ARTICLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\barticle\s+(\d+)").unwrap_or_else(|_| unreachable!()));

static VALIDITY_ASSERTIONS: &[&str] = &[
    "is valid",
    "remains valid",
    "in force",
    "currently applies",
    "can be invoked",
    "is enforceable",
    "punishable under",
    "good law",
];
static INVALIDITY_SIGNALS: &[&str] = &[
    "struck down",
    "unconstitutional",
    "invalid",
    "repealed",
    "no longer",
    "was held void",
];

/// Per-check scores, each in [0,1] where 1.0 is fully clean.
#[derive(Debug, Clone, Copy)]
pub struct CheckScores {
    pub claim_support: f32,
    pub citation_attribution: f32,
    pub year_plausibility: f32,
    pub statute_ranges: f32,
    pub kb_consistency: f32,
}

/// Combined hallucination verdict. `score` is 0.0 for a clean answer and
/// grows toward 1.0 as checks fail.
#[derive(Debug, Clone, Copy)]
pub struct HallucinationReport {
    pub score: f32,
    pub is_safe: bool,
    pub checks: CheckScores,
}

fn split_sentences(text: &str) -> Vec<&str> {
    text.split(|c| matches!(c, '.' | '?' | '!'))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn significant_words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|word| {
            word.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|word| word.len() > 3)
        .collect()
}

/// Check 1: each answer sentence must share enough vocabulary with the
/// retrieved context to count as supported.
pub fn claim_support(answer: &str, contexts: &[String]) -> f32 {
    let sentences = split_sentences(answer);
    if sentences.is_empty() {
        return 1.0;
    }
    let context_words: std::collections::HashSet<String> = contexts
        .iter()
        .flat_map(|context| significant_words(context))
        .collect();

    let mut supported = 0usize;
    for sentence in &sentences {
        let words = significant_words(sentence);
        if words.is_empty() {
            supported += 1;
            continue;
        }
        let hits = words
            .iter()
            .filter(|word| context_words.contains(*word))
            .count();
        if hits as f32 / words.len() as f32 >= SUPPORT_OVERLAP {
            supported += 1;
        }
    }
    supported as f32 / sentences.len() as f32
}

/// Check 2: every legal claim needs a citation marker within the attribution
/// window.
pub fn citation_attribution(answer: &str) -> f32 {
    let claims: Vec<usize> = CLAIM_PATTERN
        .find_iter(answer)
        .map(|claim| claim.start())
        .collect();
    if claims.is_empty() {
        return 1.0;
    }
    let markers: Vec<usize> = MARKER_PATTERN
        .find_iter(answer)
        .map(|marker| marker.start())
        .collect();

    let attributed = claims
        .iter()
        .filter(|claim_pos| {
            markers
                .iter()
                .any(|marker_pos| claim_pos.abs_diff(*marker_pos) <= ATTRIBUTION_WINDOW)
        })
        .count();
    attributed as f32 / claims.len() as f32
}

/// Check 3: cited years must fall between independence and today.
pub fn year_plausibility(answer: &str, current_year: i32) -> f32 {
    let years: Vec<i32> = YEAR_PATTERN
        .captures_iter(answer)
        .filter_map(|capture| capture.get(1)?.as_str().parse().ok())
        .collect();
    if years.is_empty() {
        return 1.0;
    }
    let plausible = years
        .iter()
        .filter(|year| (1947..=current_year).contains(*year))
        .count();
    plausible as f32 / years.len() as f32
}

/// Check 4: statute and article numbers must exist.
pub fn statute_ranges(answer: &str) -> f32 {
    let mut total = 0usize;
    let mut valid = 0usize;

    for capture in SECTION_PATTERN.captures_iter(answer) {
        total += 1;
        if let Some(section) = capture.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) {
            if (1..=511).contains(&section) {
                valid += 1;
            }
        }
    }
    for capture in ARTICLE_PATTERN.captures_iter(answer) {
        total += 1;
        if let Some(article) = capture.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) {
            if (1..=395).contains(&article) {
                valid += 1;
            }
        }
    }

    if total == 0 {
        1.0
    } else {
        valid as f32 / total as f32
    }
}

/// Check 5: the answer must not present a struck-down provision as good law.
/// `struck_down` holds provision names taken from STRUCK_DOWN_BY graph edges.
pub fn kb_consistency(answer: &str, struck_down: &[String]) -> f32 {
    let lowered = answer.to_lowercase();
    let mut mentions = 0usize;
    let mut contradictions = 0usize;

    for provision in struck_down {
        let provision_lower = provision.to_lowercase();
        if !lowered.contains(&provision_lower) {
            continue;
        }
        mentions += 1;

        for sentence in split_sentences(&lowered) {
            if !sentence.contains(&provision_lower) {
                continue;
            }
            let asserts_validity = VALIDITY_ASSERTIONS
                .iter()
                .any(|phrase| sentence.contains(phrase));
            let acknowledges_invalidity = INVALIDITY_SIGNALS
                .iter()
                .any(|phrase| sentence.contains(phrase));
            if asserts_validity && !acknowledges_invalidity {
                contradictions += 1;
                break;
            }
        }
    }

    if mentions == 0 {
        1.0
    } else {
        1.0 - contradictions as f32 / mentions as f32
    }
}

/// Run all five checks and fold them into a single hallucination score.
pub fn detect(
    answer: &str,
    contexts: &[String],
    struck_down: &[String],
    current_year: i32,
    safety_threshold: f32,
) -> HallucinationReport {
    let checks = CheckScores {
        claim_support: claim_support(answer, contexts),
        citation_attribution: citation_attribution(answer),
        year_plausibility: year_plausibility(answer, current_year),
        statute_ranges: statute_ranges(answer),
        kb_consistency: kb_consistency(answer, struck_down),
    };

    let weighted_sum = checks.claim_support
        + checks.citation_attribution
        + checks.year_plausibility
        + checks.statute_ranges
        + KB_WEIGHT * checks.kb_consistency;
    let weight_total = 4.0 + KB_WEIGHT;
    let score = (1.0 - weighted_sum / weight_total).clamp(0.0, 1.0);

    HallucinationReport {
        score,
        is_safe: score < safety_threshold,
        checks,
    }
}

/// Markers cited in the answer that have no source behind them.
pub fn orphan_markers(answer: &str, available: &[usize]) -> Vec<usize> {
    extract_markers(answer)
        .into_iter()
        .filter(|marker| !available.contains(marker))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CURRENT_YEAR: i32 = 2026;

    fn contexts() -> Vec<String> {
        vec![
            "Section 302 of the Indian Penal Code prescribes punishment for murder: death or \
             imprisonment for life, and a fine."
                .to_string(),
            "Article 19 guarantees all citizens the right to freedom of speech and expression."
                .to_string(),
        ]
    }

    #[test]
    fn supported_answer_scores_clean() {
        let report = detect(
            "Section 302 of the Indian Penal Code prescribes punishment for murder [1]. The \
             punishment is death or imprisonment for life [1].",
            &contexts(),
            &[],
            CURRENT_YEAR,
            0.10,
        );
        assert!(report.is_safe, "score was {}", report.score);
        assert!(report.checks.claim_support > 0.9);
    }

    #[test]
    fn unsupported_claims_raise_the_score() {
        let fabricated = "The Lunar Property Act of 2019 transfers all moon plots to the \
                          federal telescope registry without compensation whatsoever.";
        let supported = claim_support(fabricated, &contexts());
        assert!(supported < 0.5);
    }

    #[test]
    fn uncited_claims_fail_attribution() {
        let text_with = "Section 302 applies here [1].";
        let text_without = format!("Section 302 applies here.{}", " filler".repeat(40));
        assert!((citation_attribution(text_with) - 1.0).abs() < f32::EPSILON);
        assert!(citation_attribution(&text_without) < 1.0);
    }

    #[test]
    fn future_years_are_implausible() {
        assert!(year_plausibility("decided in 2099", CURRENT_YEAR) < 1.0);
        assert!((year_plausibility("decided in 1973", CURRENT_YEAR) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn nonexistent_sections_fail_the_range_check() {
        assert!(statute_ranges("Section 900 of the IPC") < 1.0);
        assert!((statute_ranges("Section 302 of the IPC") - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn asserting_a_struck_down_provision_contradicts_the_kb() {
        let struck = vec!["Section 66A".to_string()];
        let bad = "Section 66A is enforceable and prosecutions punishable under it continue.";
        let good = "Section 66A was struck down in Shreya Singhal and is no longer in force.";
        assert!(kb_consistency(bad, &struck) < 1.0);
        assert!((kb_consistency(good, &struck) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn kb_contradiction_weighs_double() {
        let struck = vec!["Section 66A".to_string()];
        let answer = "Section 66A is enforceable and punishable under current law [1].";
        let report = detect(answer, &contexts(), &struck, CURRENT_YEAR, 0.10);
        // a single failed check with weight 2 of 6 pushes the score well past
        // the safety threshold
        assert!(!report.is_safe);
        assert!(report.score > 0.10);
    }

    #[test]
    fn orphan_markers_are_reported() {
        assert_eq!(orphan_markers("see [1] and [4]", &[1, 2]), vec![4]);
    }
}
