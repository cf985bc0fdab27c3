use once_cell::sync::Lazy;
use regex::Regex;
use state_machines::core::GuardError;
use tracing::{debug, warn};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{document_chunk::DocumentChunk, graph_entity::GraphEntity, StoredObject},
    },
    utils::{config::GenerationSettings, embedding::EmbeddingProvider, llm::LlmClient},
};
use retrieval_pipeline::{
    graph::{chunks_for_hits, traverse},
    pipeline::RetrievalTuning,
    scoring::{reciprocal_rank_fusion, FusedCandidate, Scored},
};

use crate::state::assessing;

/// When the grader's reply cannot be parsed the pool is treated as borderline.
const DEFAULT_QUALITY: f32 = 0.5;

static QUALITY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(0?\.\d+|[01]\b)").unwrap_or_else(|_| unreachable!()));

const GRADER_SYSTEM_PROMPT: &str = "You grade whether retrieved legal passages are sufficient \
to answer a question. Reply with a single sufficiency score between 0.0 and 1.0, where 1.0 \
means the passages fully answer the question, followed by a one-line reason.";

/// Result of the corrective loop: the (possibly expanded) candidate pool and
/// how it got there.
#[derive(Debug)]
pub struct CorrectiveOutcome {
    pub candidates: Vec<FusedCandidate<DocumentChunk>>,
    pub rounds: u32,
    pub quality: f32,
    pub accepted: bool,
}

/// Pull the first float out of a grader reply.
pub fn parse_quality_score(content: &str) -> f32 {
    QUALITY_PATTERN
        .find(content)
        .and_then(|m| m.as_str().parse::<f32>().ok())
        .map_or(DEFAULT_QUALITY, |score| score.clamp(0.0, 1.0))
}

async fn assess_quality(
    llm: &LlmClient,
    query: &str,
    candidates: &[FusedCandidate<DocumentChunk>],
) -> f32 {
    if candidates.is_empty() {
        return 0.0;
    }
    let mut context = String::new();
    for (index, candidate) in candidates.iter().take(8).enumerate() {
        let snippet: String = candidate.item.content.chars().take(400).collect();
        context.push_str(&format!("[{}] {}\n", index + 1, snippet));
    }
    let user_message = format!("Question: {query}\n\nPassages:\n{context}");

    match llm.complete(GRADER_SYSTEM_PROMPT, &user_message, None).await {
        Ok(reply) => parse_quality_score(&reply),
        Err(err) => {
            warn!(error = %err, "sufficiency grading failed, assuming borderline quality");
            DEFAULT_QUALITY
        }
    }
}

/// Widen the pool: graph neighbours of the current documents plus a relaxed
/// hybrid search, re-fused with the existing candidates.
async fn expand_pool(
    db: &SurrealDbClient,
    embedder: &EmbeddingProvider,
    query: &str,
    current: Vec<FusedCandidate<DocumentChunk>>,
    tuning: &RetrievalTuning,
) -> Result<Vec<FusedCandidate<DocumentChunk>>, AppError> {
    let mut lists: Vec<Vec<Scored<DocumentChunk>>> = Vec::new();

    // Existing ranking stays the strongest signal.
    lists.push(
        current
            .iter()
            .map(|candidate| {
                let mut scored = Scored::new(candidate.item.clone());
                scored.scores = candidate.scores;
                scored
            })
            .collect(),
    );

    // Graph neighbours one hop out from the documents already in the pool.
    let document_ids: Vec<String> = current
        .iter()
        .map(|candidate| candidate.item.document_id.clone())
        .collect();
    if !document_ids.is_empty() {
        let mut response = db
            .query("SELECT * FROM graph_entity WHERE document_id IN $document_ids")
            .bind(("document_ids", document_ids))
            .await?;
        let seeds: Vec<GraphEntity> = response.take(0)?;
        if !seeds.is_empty() {
            let hits = traverse(db, seeds, 1).await?;
            let graph_chunks = chunks_for_hits(db, &hits, tuning.max_chunks_per_entity).await?;
            if !graph_chunks.is_empty() {
                lists.push(graph_chunks);
            }
        }
    }

    // Relaxed dense pass with a doubled pool.
    let embedding = embedder.embed(query).await?;
    let rows = db
        .hybrid_search(
            embedding,
            query,
            tuning.k_rerank * 2,
            tuning.dense_weight,
            tuning.fts_weight,
        )
        .await?;
    if !rows.is_empty() {
        let mut relaxed = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(chunk) = db.get_item::<DocumentChunk>(&row.chunk_id).await? {
                relaxed.push(Scored::new(chunk).with_dense_score(row.final_score));
            }
        }
        lists.push(relaxed);
    }

    let mut fused = reciprocal_rank_fusion(lists, tuning.rrf_c);
    fused.truncate(tuning.k_rerank);
    Ok(fused)
}

/// Assess the candidate pool and expand it until it is good enough or the
/// round budget runs out. The state machine enforces the legal transitions;
/// the round budget refuses any expansion past `max_corrective_rounds`.
pub async fn corrective_retrieve(
    db: &SurrealDbClient,
    llm: &LlmClient,
    embedder: &EmbeddingProvider,
    query: &str,
    initial: Vec<FusedCandidate<DocumentChunk>>,
    generation: &GenerationSettings,
    tuning: &RetrievalTuning,
) -> Result<CorrectiveOutcome, AppError> {
    let mut machine = assessing();
    let mut candidates = initial;
    let mut rounds = 0u32;

    loop {
        let quality = assess_quality(llm, query, &candidates).await;
        debug!(rounds, quality, "corrective assessment");

        if quality >= generation.quality_threshold {
            machine
                .accept()
                .map_err(|(_, guard)| map_guard_error("accept", &guard))?;
            return Ok(CorrectiveOutcome {
                candidates,
                rounds,
                quality,
                accepted: true,
            });
        }

        if rounds >= generation.max_corrective_rounds {
            machine
                .exhaust()
                .map_err(|(_, guard)| map_guard_error("exhaust", &guard))?;
            return Ok(CorrectiveOutcome {
                candidates,
                rounds,
                quality,
                accepted: false,
            });
        }

        let expanding = machine
            .expand()
            .map_err(|(_, guard)| map_guard_error("expand", &guard))?;
        candidates = expand_pool(db, embedder, query, candidates, tuning).await?;
        rounds += 1;
        machine = expanding
            .reassess()
            .map_err(|(_, guard)| map_guard_error("reassess", &guard))?;
    }
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid corrective transition during {event}: {guard:?}"
    ))
}
