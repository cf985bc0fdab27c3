pub mod answer;
pub mod corrective;
pub mod generator;
pub mod hallucination;
pub mod state;
pub mod validator;

use std::time::Instant;

use chrono::{Datelike, Utc};
use tracing::{info, instrument, warn};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            graph_entity::GraphEntity,
            graph_relationship::{GraphRelationship, PREDICATE_STRUCK_DOWN_BY},
            query_record::QueryRecord,
        },
    },
    utils::{config::AppConfig, embedding::EmbeddingProvider, llm::LlmClient},
};
use retrieval_pipeline::{reranking::RerankerLease, retrieve, RetrievalConfig};

pub use answer::{Answer, Citation};
pub use corrective::CorrectiveOutcome;
pub use generator::GenerationOutcome;
pub use hallucination::HallucinationReport;

/// Per-request switches for the answer flow.
#[derive(Debug, Clone)]
pub struct AnswerOptions {
    pub use_corrective_rag: bool,
    pub use_self_reflection: bool,
    pub detect_hallucinations: bool,
    pub top_k: Option<usize>,
}

impl Default for AnswerOptions {
    fn default() -> Self {
        Self {
            use_corrective_rag: true,
            use_self_reflection: true,
            detect_hallucinations: true,
            top_k: None,
        }
    }
}

/// Provision names the knowledge graph records as struck down. Resolved from
/// STRUCK_DOWN_BY edges; the `in` side is the invalidated provision.
async fn struck_down_provisions(db: &SurrealDbClient) -> Result<Vec<String>, AppError> {
    let edges = GraphRelationship::find_by_predicate(PREDICATE_STRUCK_DOWN_BY, db).await?;
    let mut names = Vec::with_capacity(edges.len());
    for edge in edges {
        if let Some(entity) = db.get_item::<GraphEntity>(&edge.in_).await? {
            names.push(entity.name);
        }
    }
    Ok(names)
}

/// Answer a legal question end to end: retrieve, correct, generate, check,
/// and record. Refusal on insufficient evidence is a normal outcome.
#[instrument(skip_all, fields(query_chars = query.chars().count()))]
pub async fn answer_query(
    db: &SurrealDbClient,
    llm: &LlmClient,
    embedder: &EmbeddingProvider,
    reranker: Option<RerankerLease>,
    config: &AppConfig,
    query: &str,
    options: AnswerOptions,
) -> Result<Answer, AppError> {
    let total_start = Instant::now();

    let mut retrieval_config = RetrievalConfig::from_settings(&config.retrieval);
    if let Some(top_k) = options.top_k {
        retrieval_config = retrieval_config.with_top_k(top_k);
    }
    let tuning = retrieval_config.tuning.clone();

    let retrieval_start = Instant::now();
    let run = retrieve(db, llm, embedder, query, retrieval_config, reranker).await?;
    let mut candidates = run.candidates;
    let mut retrieval_degraded = run.diagnostics.degraded;
    let mut corrective_rounds = 0u32;
    let mut corrective_exhausted = false;

    if options.use_corrective_rag && !candidates.is_empty() {
        let outcome = corrective::corrective_retrieve(
            db,
            llm,
            embedder,
            query,
            candidates,
            &config.generation,
            &tuning,
        )
        .await?;
        candidates = outcome.candidates;
        corrective_rounds = outcome.rounds;
        if !outcome.accepted {
            retrieval_degraded = true;
            corrective_exhausted = true;
        }
    }
    let retrieval_time_ms = retrieval_start.elapsed().as_millis() as u64;

    if candidates.is_empty() {
        info!("no supporting material retrieved, refusing to answer");
        let mut refusal = Answer::insufficient_evidence(query.to_owned());
        refusal.retrieval_time_ms = retrieval_time_ms;
        refusal.processing_time_ms = total_start.elapsed().as_millis() as u64;
        record_query(db, &refusal).await;
        return Ok(refusal);
    }

    let generation_start = Instant::now();
    let generation =
        generator::generate(llm, query, &candidates, options.use_self_reflection).await?;
    let generation_time_ms = generation_start.elapsed().as_millis() as u64;

    // An exhausted corrective loop means the grader never accepted the
    // evidence; the answer carries that doubt instead of full confidence.
    let mut confidence = generation.confidence;
    let mut uncertainty_flags = generation.flags;
    if corrective_exhausted {
        uncertainty_flags
            .push("retrieval quality stayed below threshold after expansion".to_string());
        confidence = confidence.min(config.generation.quality_threshold);
    }

    let (hallucination_score, is_safe) = if options.detect_hallucinations {
        let contexts: Vec<String> = candidates
            .iter()
            .map(|candidate| candidate.item.content.clone())
            .collect();
        let struck_down = struck_down_provisions(db).await?;
        let report = hallucination::detect(
            &generation.answer_text,
            &contexts,
            &struck_down,
            Utc::now().year(),
            config.generation.hallucination_threshold,
        );
        (report.score, report.is_safe)
    } else {
        (0.0, true)
    };

    let answer = Answer {
        query: query.to_owned(),
        answer: generation.answer_text,
        sources: answer::distinct_sources(&generation.citations),
        citations: generation.citations,
        confidence,
        hallucination_score,
        is_safe,
        degraded: generation.degraded || retrieval_degraded,
        uncertainty_flags,
        corrective_rounds,
        processing_time_ms: total_start.elapsed().as_millis() as u64,
        retrieval_time_ms,
        generation_time_ms,
    };

    record_query(db, &answer).await;
    Ok(answer)
}

/// Append the query outcome to the audit log. The answer is already final;
/// an audit write failure is logged, not surfaced.
async fn record_query(db: &SurrealDbClient, answer: &Answer) {
    let record = QueryRecord::new(
        answer.query.clone(),
        answer.answer.clone(),
        answer.confidence,
        answer.hallucination_score,
        answer.is_safe,
        answer.corrective_rounds,
        answer.degraded,
        answer.processing_time_ms,
        answer.retrieval_time_ms,
        answer.generation_time_ms,
    );
    if let Err(err) = record.append(db).await {
        warn!(error = %err, "failed to append query record");
    }
}
