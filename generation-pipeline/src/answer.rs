use serde::{Deserialize, Serialize};

/// A single `[n]` marker in the answer resolved to its source chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    /// The bracketed number as it appears in the answer text.
    pub marker: usize,
    pub chunk_id: String,
    pub document_id: String,
    pub source: String,
    pub snippet: String,
}

/// The final answer returned to the caller. `uncertainty_flags` carries
/// human-readable degradation notices such as "self-verification unavailable".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub query: String,
    pub answer: String,
    /// Distinct provenance names of the cited material, in citation order.
    pub sources: Vec<String>,
    pub citations: Vec<Citation>,
    pub confidence: f32,
    pub hallucination_score: f32,
    pub is_safe: bool,
    pub degraded: bool,
    pub uncertainty_flags: Vec<String>,
    pub corrective_rounds: u32,
    pub processing_time_ms: u64,
    pub retrieval_time_ms: u64,
    pub generation_time_ms: u64,
}

/// Distinct source names in first-citation order.
pub fn distinct_sources(citations: &[Citation]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for citation in citations {
        if !sources.contains(&citation.source) {
            sources.push(citation.source.clone());
        }
    }
    sources
}

impl Answer {
    /// Answer returned when retrieval produced nothing usable. Refusal is a
    /// first-class outcome, not an error.
    pub fn insufficient_evidence(query: String) -> Self {
        Self {
            query,
            answer: "I could not find sufficient supporting material in the corpus to answer \
                     this question reliably."
                .to_string(),
            sources: Vec::new(),
            citations: Vec::new(),
            confidence: 0.0,
            hallucination_score: 0.0,
            is_safe: true,
            degraded: false,
            uncertainty_flags: vec!["insufficient evidence".to_string()],
            corrective_rounds: 0,
            processing_time_ms: 0,
            retrieval_time_ms: 0,
            generation_time_ms: 0,
        }
    }
}
