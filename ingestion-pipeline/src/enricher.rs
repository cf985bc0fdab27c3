use common::storage::types::legal_document::DocumentType;

/// Metadata inferred from document text before storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Enrichment {
    pub category: String,
    pub tags: Vec<String>,
    /// Editorial weight in [0,1]; landmark language raises it above the
    /// 0.5 baseline.
    pub importance: f32,
}

const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "criminal",
        &[
            "murder",
            "homicide",
            "punishment",
            "imprisonment",
            "offence",
            "penal",
        ],
    ),
    (
        "constitutional",
        &[
            "fundamental right",
            "constitution",
            "article",
            "freedom of speech",
            "equality",
        ],
    ),
    (
        "cyber",
        &["electronic", "computer", "online", "information technology"],
    ),
    (
        "procedural",
        &["procedure", "bail", "appeal", "jurisdiction", "warrant"],
    ),
    (
        "evidence",
        &["evidence", "witness", "testimony", "burden of proof", "admissible"],
    ),
];

const LANDMARK_KEYWORDS: &[&str] = &[
    "struck down",
    "landmark",
    "overruled",
    "constitution bench",
    "fundamental right",
];

const BASE_IMPORTANCE: f32 = 0.5;
const LANDMARK_BONUS: f32 = 0.15;

const TAG_KEYWORDS: &[&str] = &[
    "murder",
    "bail",
    "freedom of speech",
    "privacy",
    "defamation",
    "sedition",
    "due process",
];

/// Pick the category whose keywords dominate the text, falling back on the
/// document type and then "general".
pub fn enrich(content: &str, doc_type: &DocumentType) -> Enrichment {
    let lowered = content.to_lowercase();

    let mut best: Option<(&str, usize)> = None;
    for (category, keywords) in CATEGORY_KEYWORDS {
        let hits = keywords
            .iter()
            .filter(|keyword| lowered.contains(*keyword))
            .count();
        if hits > 0 && best.is_none_or(|(_, best_hits)| hits > best_hits) {
            best = Some((category, hits));
        }
    }

    let category = match best {
        Some((category, _)) => category.to_string(),
        None => match doc_type {
            DocumentType::Constitution => "constitutional".to_string(),
            DocumentType::Judgment => "case_law".to_string(),
            DocumentType::Act | DocumentType::Article => "general".to_string(),
        },
    };

    let tags = TAG_KEYWORDS
        .iter()
        .filter(|keyword| lowered.contains(*keyword))
        .map(|keyword| (*keyword).to_string())
        .collect();

    let landmark_hits = LANDMARK_KEYWORDS
        .iter()
        .filter(|keyword| lowered.contains(*keyword))
        .count();
    let importance = (BASE_IMPORTANCE + landmark_hits as f32 * LANDMARK_BONUS).clamp(0.0, 1.0);

    Enrichment {
        category,
        tags,
        importance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn penal_text_is_criminal() {
        let enrichment = enrich(
            "Punishment for murder: imprisonment for life under the Penal Code.",
            &DocumentType::Act,
        );
        assert_eq!(enrichment.category, "criminal");
        assert!(enrichment.tags.contains(&"murder".to_string()));
    }

    #[test]
    fn constitutional_text_wins_on_keyword_count() {
        let enrichment = enrich(
            "Article 19 of the Constitution guarantees the fundamental right to freedom of \
             speech.",
            &DocumentType::Constitution,
        );
        assert_eq!(enrichment.category, "constitutional");
    }

    #[test]
    fn unmatched_text_falls_back_on_document_type() {
        let enrichment = enrich("Short preamble.", &DocumentType::Judgment);
        assert_eq!(enrichment.category, "case_law");
        assert!(enrichment.tags.is_empty());
        assert!((enrichment.importance - BASE_IMPORTANCE).abs() < f32::EPSILON);
    }

    #[test]
    fn landmark_language_raises_importance() {
        let plain = enrich("Procedure for appeal.", &DocumentType::Act);
        let landmark = enrich(
            "A landmark judgment by a constitution bench struck down the provision.",
            &DocumentType::Judgment,
        );
        assert!(landmark.importance > plain.importance);
        assert!(landmark.importance <= 1.0);
    }
}
