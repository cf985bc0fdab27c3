use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use common::{
    error::AppError,
    storage::types::document_chunk::DocumentChunk,
    utils::llm::{parse_llm_content, with_single_retry, LlmClient},
};
use retrieval_pipeline::scoring::FusedCandidate;

use crate::{
    answer::Citation,
    validator::{extract_markers, validate_answer},
};

/// Confidence when the critique found nothing to improve.
pub const UNIMPROVED_CONFIDENCE: f32 = 0.92;
/// Confidence when the verification reply could not be parsed as JSON.
pub const VERIFY_PARSE_FALLBACK_CONFIDENCE: f32 = 0.85;
/// Ceiling applied when self-verification was unavailable entirely.
pub const DEGRADED_CONFIDENCE_CAP: f32 = 0.5;

const DRAFT_SYSTEM_PROMPT: &str = "You are a legal research assistant answering questions \
about Indian law. Answer strictly from the numbered source passages provided. Cite every \
legal claim with the bracketed number of its supporting passage, like [1]. If the passages \
do not contain the answer, say so plainly.";

const CRITIQUE_SYSTEM_PROMPT: &str = "You critique draft answers to legal questions against \
their source passages. Point out incorrect statements, missing citations, unsupported claims \
and contradictions. If the draft is sound, reply exactly: No issues found.";

const IMPROVE_SYSTEM_PROMPT: &str = "You revise draft legal answers using a critique. Fix \
every issue the critique raises, keep citations in [n] form, and change nothing that was not \
criticized.";

const VERIFY_SYSTEM_PROMPT: &str = "You verify a final legal answer against its source \
passages and report your confidence.";

const CLEAN_CRITIQUE_PHRASES: &[&str] =
    &["no issues found", "accurate", "well supported", "well-grounded"];
const ISSUE_CRITIQUE_PHRASES: &[&str] = &["incorrect", "missing", "unsupported", "contradict"];

const IMPROVE_TEMPERATURE: f32 = 0.2;

#[derive(Debug, Deserialize)]
struct VerifyReply {
    confidence: f32,
    verified: bool,
    #[allow(dead_code)]
    notes: String,
}

fn verify_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "confidence": { "type": "number" },
            "verified": { "type": "boolean" },
            "notes": { "type": "string" }
        },
        "required": ["confidence", "verified", "notes"],
        "additionalProperties": false
    })
}

/// What generation produced, before hallucination detection.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub answer_text: String,
    pub citations: Vec<Citation>,
    pub confidence: f32,
    pub verified: bool,
    pub degraded: bool,
    pub flags: Vec<String>,
}

/// Number the candidate passages the way the prompts and citations expect.
pub fn build_numbered_context(candidates: &[FusedCandidate<DocumentChunk>]) -> String {
    let mut context = String::new();
    for (index, candidate) in candidates.iter().enumerate() {
        context.push_str(&format!(
            "[{}] ({}) {}\n\n",
            index + 1,
            candidate.item.source,
            candidate.item.content
        ));
    }
    context
}

fn critique_is_clean(critique: &str) -> bool {
    let lowered = critique.to_lowercase();
    let mentions_issue = ISSUE_CRITIQUE_PHRASES
        .iter()
        .any(|phrase| lowered.contains(phrase));
    let sounds_clean = CLEAN_CRITIQUE_PHRASES
        .iter()
        .any(|phrase| lowered.contains(phrase));
    sounds_clean && !mentions_issue
}

/// Last-resort answer assembled directly from the top sources.
fn summary_of_sources(candidates: &[FusedCandidate<DocumentChunk>]) -> String {
    let mut summary =
        String::from("Answer generation was unavailable; the most relevant sources say:\n");
    for (index, candidate) in candidates.iter().take(3).enumerate() {
        let snippet: String = candidate.item.content.chars().take(300).collect();
        summary.push_str(&format!("[{}] {}\n", index + 1, snippet));
    }
    summary
}

/// Resolve `[n]` markers against the numbered candidates. Markers without a
/// matching passage are dropped from the citation list; the validator has
/// already penalized them.
pub fn resolve_citations(
    answer_text: &str,
    candidates: &[FusedCandidate<DocumentChunk>],
) -> Vec<Citation> {
    let mut citations = Vec::new();
    for marker in extract_markers(answer_text) {
        match marker.checked_sub(1).and_then(|index| candidates.get(index)) {
            Some(candidate) => {
                let snippet: String = candidate.item.content.chars().take(200).collect();
                citations.push(Citation {
                    marker,
                    chunk_id: candidate.item.id.clone(),
                    document_id: candidate.item.document_id.clone(),
                    source: candidate.item.source.clone(),
                    snippet,
                });
            }
            None => {
                warn!(marker, "dropping citation marker with no backing passage");
            }
        }
    }
    citations
}

/// Run the generation stages: draft, critique, improve, verify, validate,
/// finalize. Critique through verify are skipped when `use_self_reflection`
/// is off; each LLM stage gets one retry before the stage degrades.
pub async fn generate(
    llm: &LlmClient,
    query: &str,
    candidates: &[FusedCandidate<DocumentChunk>],
    use_self_reflection: bool,
) -> Result<GenerationOutcome, AppError> {
    let context = build_numbered_context(candidates);
    let available_markers: Vec<usize> = (1..=candidates.len()).collect();
    let mut flags: Vec<String> = Vec::new();
    let mut degraded = false;
    let mut verified = false;

    // Stage 1: draft.
    let draft_request = format!("Question: {query}\n\nSources:\n{context}");
    let mut answer_text =
        match with_single_retry(|| llm.complete(DRAFT_SYSTEM_PROMPT, &draft_request, None)).await {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "answer drafting failed, falling back to a source summary");
                flags.push("answer drafted from source summaries".to_string());
                let summary = summary_of_sources(candidates);
                let citations = resolve_citations(&summary, candidates);
                return Ok(GenerationOutcome {
                    answer_text: summary,
                    citations,
                    confidence: DEGRADED_CONFIDENCE_CAP,
                    verified: false,
                    degraded: true,
                    flags,
                });
            }
        };

    let mut confidence = UNIMPROVED_CONFIDENCE;

    if use_self_reflection {
        // Stage 2: critique.
        let critique_request =
            format!("Question: {query}\n\nSources:\n{context}\nDraft answer:\n{answer_text}");
        let critique =
            match with_single_retry(|| llm.complete(CRITIQUE_SYSTEM_PROMPT, &critique_request, None))
                .await
            {
                Ok(critique) => Some(critique),
                Err(err) => {
                    warn!(error = %err, "critique stage failed, keeping the draft");
                    None
                }
            };

        // Stage 3: improve, only when the critique found something. Each
        // issue line the critique raised is surfaced as an uncertainty flag.
        if let Some(critique) = critique {
            if critique_is_clean(&critique) {
                debug!("critique found no issues, skipping improvement");
            } else {
                for line in critique.lines() {
                    let lowered = line.to_lowercase();
                    if ISSUE_CRITIQUE_PHRASES
                        .iter()
                        .any(|phrase| lowered.contains(phrase))
                    {
                        flags.push(line.trim().to_string());
                    }
                }
                let improve_request = format!(
                    "Question: {query}\n\nSources:\n{context}\nDraft answer:\n{answer_text}\n\n\
                     Critique:\n{critique}"
                );
                match with_single_retry(|| {
                    llm.complete(
                        IMPROVE_SYSTEM_PROMPT,
                        &improve_request,
                        Some(IMPROVE_TEMPERATURE),
                    )
                })
                .await
                {
                    Ok(improved) => answer_text = improved,
                    Err(err) => {
                        warn!(error = %err, "improvement stage failed, keeping the draft");
                    }
                }
            }
        }

        // Stage 4: verify with a strict JSON reply.
        let verify_request =
            format!("Question: {query}\n\nSources:\n{context}\nFinal answer:\n{answer_text}");
        match with_single_retry(|| {
            llm.complete_json(
                VERIFY_SYSTEM_PROMPT,
                &verify_request,
                "answer_verification",
                verify_schema(),
            )
        })
        .await
        {
            Ok(content) => match parse_llm_content::<VerifyReply>(&content) {
                Ok(reply) => {
                    confidence = reply.confidence.clamp(0.0, 1.0);
                    verified = reply.verified;
                }
                Err(err) => {
                    warn!(error = %err, "verification reply was not valid JSON");
                    flags.push("verification reply unparseable".to_string());
                    confidence = VERIFY_PARSE_FALLBACK_CONFIDENCE;
                }
            },
            Err(err) => {
                warn!(error = %err, "self-verification unavailable");
                flags.push("self-verification unavailable".to_string());
                degraded = true;
                confidence = confidence.min(DEGRADED_CONFIDENCE_CAP);
            }
        }
    }

    // Stage 5: structural validation caps the confidence.
    let report = validate_answer(&answer_text, &available_markers);
    if !report.is_clean() {
        debug!(
            invalid_markers = report.invalid_markers.len(),
            invalid_statutes = report.invalid_statutes.len(),
            implausible_years = report.implausible_years.len(),
            "answer validation found defects"
        );
    }
    confidence = confidence.min(report.confidence);

    // Stage 6: finalize citations.
    let citations = resolve_citations(&answer_text, candidates);

    Ok(GenerationOutcome {
        answer_text,
        citations,
        confidence,
        verified,
        degraded,
        flags,
    })
}
