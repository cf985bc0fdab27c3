use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use common::{
    error::AppError,
    utils::{
        embedding::{average_embeddings, EmbeddingProvider},
        llm::LlmClient,
    },
};

static SECTION_FILTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bsection\s+(\d+[A-Z]?)").unwrap_or_else(|_| unreachable!()));
static ARTICLE_FILTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\barticle\s+(\d+)").unwrap_or_else(|_| unreachable!()));
static CASE_FILTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([A-Z][\w.]*(?:\s+[A-Z][\w.]*)*)\s+v\.?\s+([A-Z][\w.]*(?:\s+[\w.]+)*)")
        .unwrap_or_else(|_| unreachable!())
});
static YEAR_FILTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(19[4-9]\d|20\d\d)\b").unwrap_or_else(|_| unreachable!()));

const REFORMULATION_SYSTEM_PROMPT: &str = "You rewrite legal research questions. Produce \
alternative phrasings that preserve the original meaning, vary the legal terminology, and \
stay answerable from Indian statutes, the Constitution of India, and case law. Reply with a \
numbered list only.";

/// Prompt angles for hypothetical-answer drafting. Rotated so the sampled
/// passages cover different registers of legal writing.
const HYDE_ANGLES: [&str; 3] = [
    "Write a short, direct passage answering the question as a legal reference work would.",
    "Write a short passage answering the question from a constitutional-law perspective, \
     citing the relevant articles.",
    "Write a short passage answering the question the way a case-law digest would, naming \
     the controlling judgments.",
];

/// Keyword cues that hint at a document type the asker cares about.
const DOC_TYPE_HINTS: &[(&str, &[&str])] = &[
    ("constitution", &["constitution", "fundamental right"]),
    ("act", &["act", "penal code", "statute", "section"]),
    ("judgment", &["judgment", "case law", "ruling", "held that", " v. "]),
];

/// Structured hints pulled from the raw query text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryFilters {
    pub sections: Vec<String>,
    pub articles: Vec<String>,
    pub cases: Vec<String>,
    pub years: Vec<i32>,
    pub doc_types: Vec<String>,
}

impl QueryFilters {
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
            && self.articles.is_empty()
            && self.cases.is_empty()
            && self.years.is_empty()
            && self.doc_types.is_empty()
    }

    /// Graph seed names implied by the filters: provision numbers rendered
    /// the way entities are stored, case names as captured.
    pub fn entity_mentions(&self) -> Vec<String> {
        let mut mentions: Vec<String> = self
            .sections
            .iter()
            .map(|section| format!("Section {section}"))
            .collect();
        mentions.extend(self.articles.iter().map(|article| format!("Article {article}")));
        mentions.extend(self.cases.iter().cloned());
        mentions
    }
}

/// Everything the retrieval stages need to know about a query: the original
/// text, its reformulations (original always first), the query embedding, an
/// optional hypothetical-answer embedding, and extracted filters.
#[derive(Debug, Clone)]
pub struct ProcessedQuery {
    pub original: String,
    pub reformulations: Vec<String>,
    pub embedding: Vec<f32>,
    pub hyde_embedding: Option<Vec<f32>>,
    pub filters: QueryFilters,
}

impl ProcessedQuery {
    /// The embedding the dense strategy should search with. The hypothetical
    /// answer wins when drafting succeeded.
    pub fn search_embedding(&self) -> &[f32] {
        self.hyde_embedding.as_deref().unwrap_or(&self.embedding)
    }
}

/// Extract statute sections, constitution articles, case names and years.
pub fn extract_filters(query: &str) -> QueryFilters {
    let mut filters = QueryFilters::default();

    for capture in SECTION_FILTER.captures_iter(query) {
        if let Some(number) = capture.get(1) {
            let section = number.as_str().to_uppercase();
            if !filters.sections.contains(&section) {
                filters.sections.push(section);
            }
        }
    }
    for capture in ARTICLE_FILTER.captures_iter(query) {
        if let Some(number) = capture.get(1) {
            let article = number.as_str().to_string();
            if !filters.articles.contains(&article) {
                filters.articles.push(article);
            }
        }
    }
    for capture in CASE_FILTER.captures_iter(query) {
        if let Some(full) = capture.get(0) {
            let case = full.as_str().trim().to_string();
            if !filters.cases.contains(&case) {
                filters.cases.push(case);
            }
        }
    }
    for capture in YEAR_FILTER.captures_iter(query) {
        if let Some(year) = capture.get(1).and_then(|m| m.as_str().parse::<i32>().ok()) {
            if !filters.years.contains(&year) {
                filters.years.push(year);
            }
        }
    }
    let lowered = query.to_lowercase();
    for (doc_type, cues) in DOC_TYPE_HINTS {
        if cues.iter().any(|cue| lowered.contains(cue)) {
            filters.doc_types.push((*doc_type).to_string());
        }
    }

    filters
}

/// Parse a numbered-list LLM reply into clean reformulations.
fn parse_numbered_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == '-' || c == ')')
                .trim()
        })
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Ask the LLM for alternative phrasings. The original query is always the
/// first entry; on LLM failure the original alone is returned.
pub async fn reformulate_query(
    llm: &LlmClient,
    query: &str,
    num_reformulations: usize,
) -> Vec<String> {
    let mut reformulations = vec![query.to_owned()];
    if num_reformulations == 0 {
        return reformulations;
    }

    let user_message = format!(
        "Rewrite the following question in {num_reformulations} different ways:\n\n{query}"
    );
    match llm
        .complete(REFORMULATION_SYSTEM_PROMPT, &user_message, Some(0.7))
        .await
    {
        Ok(content) => {
            for candidate in parse_numbered_list(&content)
                .into_iter()
                .take(num_reformulations)
            {
                if !reformulations
                    .iter()
                    .any(|existing| existing.eq_ignore_ascii_case(&candidate))
                {
                    reformulations.push(candidate);
                }
            }
        }
        Err(err) => {
            warn!(error = %err, "query reformulation failed, continuing with the original only");
        }
    }

    reformulations
}

/// Hypothetical-answer embedding: draft up to `samples` passages from rotating
/// prompt angles, embed each, and average. Returns `None` when drafting or
/// embedding fails, leaving the caller on the plain query embedding.
pub async fn hyde_embedding(
    llm: &LlmClient,
    embedder: &EmbeddingProvider,
    query: &str,
    samples: usize,
) -> Option<Vec<f32>> {
    if samples == 0 {
        return None;
    }

    let mut passages = Vec::with_capacity(samples);
    for index in 0..samples {
        let angle = HYDE_ANGLES[index % HYDE_ANGLES.len()];
        match llm.complete(angle, query, Some(0.7)).await {
            Ok(passage) if !passage.trim().is_empty() => passages.push(passage),
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, sample = index, "hypothetical answer drafting failed");
            }
        }
    }
    if passages.is_empty() {
        return None;
    }

    match embedder.embed_batch(passages).await {
        Ok(embeddings) => average_embeddings(&embeddings),
        Err(err) => {
            warn!(error = %err, "failed to embed hypothetical answers");
            None
        }
    }
}

/// Run the full query processing step.
pub async fn process_query(
    llm: &LlmClient,
    embedder: &EmbeddingProvider,
    query: &str,
    num_reformulations: usize,
    hyde_samples: usize,
) -> Result<ProcessedQuery, AppError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("query must not be empty".to_string()));
    }

    let reformulations = reformulate_query(llm, trimmed, num_reformulations).await;
    let embedding = embedder.embed(trimmed).await?;
    let hyde = hyde_embedding(llm, embedder, trimmed, hyde_samples).await;
    let filters = extract_filters(trimmed);

    Ok(ProcessedQuery {
        original: trimmed.to_owned(),
        reformulations,
        embedding,
        hyde_embedding: hyde,
        filters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::utils::llm::{ScriptRule, ScriptedResponse};

    #[test]
    fn numbered_lists_are_stripped() {
        let parsed = parse_numbered_list(
            "1. What does Article 21 protect?\n2) Scope of the right to life?\n- Personal liberty under the Constitution?",
        );
        assert_eq!(
            parsed,
            vec![
                "What does Article 21 protect?",
                "Scope of the right to life?",
                "Personal liberty under the Constitution?"
            ]
        );
    }

    #[test]
    fn filters_capture_sections_articles_cases_and_years() {
        let filters = extract_filters(
            "Did Kesavananda Bharati v. State of Kerala in 1973 limit Article 368, \
             and does Section 124A survive?",
        );
        assert_eq!(filters.sections, vec!["124A"]);
        assert_eq!(filters.articles, vec!["368"]);
        assert_eq!(filters.years, vec![1973]);
        assert!(filters.cases[0].contains("Kesavananda Bharati"));
        assert!(filters.doc_types.contains(&"act".to_string()));
        assert!(filters.doc_types.contains(&"judgment".to_string()));
    }

    #[test]
    fn empty_query_has_empty_filters() {
        assert!(extract_filters("what is bail").is_empty());
    }

    #[test]
    fn filters_render_graph_seed_mentions() {
        let filters = extract_filters("Did Shreya Singhal v. Union of India bury Section 66A?");
        let mentions = filters.entity_mentions();
        assert!(mentions.iter().any(|m| m == "Section 66A"));
        assert!(mentions.iter().any(|m| m.contains("Shreya Singhal")));
    }

    #[tokio::test]
    async fn reformulation_keeps_the_original_first() {
        let llm = LlmClient::scripted(vec![ScriptRule {
            trigger: "Rewrite".into(),
            response: ScriptedResponse::Text(
                "1. What is the punishment for murder?\n2. How is murder sentenced?".into(),
            ),
        }]);

        let reformulations = reformulate_query(&llm, "What is the penalty for murder?", 3).await;
        assert_eq!(reformulations[0], "What is the penalty for murder?");
        assert_eq!(reformulations.len(), 3);
    }

    #[tokio::test]
    async fn reformulation_failure_falls_back_to_the_original() {
        let llm = LlmClient::scripted(vec![ScriptRule {
            trigger: "".into(),
            response: ScriptedResponse::TransientFailure,
        }]);

        let reformulations = reformulate_query(&llm, "What is culpable homicide?", 3).await;
        assert_eq!(reformulations, vec!["What is culpable homicide?"]);
    }

    #[tokio::test]
    async fn hyde_produces_a_unit_embedding() {
        let llm = LlmClient::scripted(vec![ScriptRule {
            trigger: "".into(),
            response: ScriptedResponse::Text(
                "Murder is punished under Section 302 of the Indian Penal Code.".into(),
            ),
        }]);
        let embedder = EmbeddingProvider::new_hashed(32).expect("hashed provider");

        let embedding = hyde_embedding(&llm, &embedder, "punishment for murder", 3)
            .await
            .expect("expected a hypothetical embedding");
        let norm: f32 = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn hyde_failure_returns_none() {
        let llm = LlmClient::scripted(vec![ScriptRule {
            trigger: "".into(),
            response: ScriptedResponse::TransientFailure,
        }]);
        let embedder = EmbeddingProvider::new_hashed(32).expect("hashed provider");

        assert!(hyde_embedding(&llm, &embedder, "anything", 3).await.is_none());
    }

    #[tokio::test]
    async fn process_query_rejects_empty_input() {
        let llm = LlmClient::scripted(vec![]);
        let embedder = EmbeddingProvider::new_hashed(32).expect("hashed provider");
        let err = process_query(&llm, &embedder, "   ", 0, 0)
            .await
            .expect_err("expected validation error");
        assert!(matches!(err, AppError::Validation(_)));
    }
}
