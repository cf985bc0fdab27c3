use std::collections::HashMap;
use std::future::Future;

use async_trait::async_trait;
use futures::future::join_all;
use surrealdb::sql::Thing;
use tokio::time::timeout;
use tracing::{debug, warn};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{document_chunk::DocumentChunk, StoredObject},
    },
    utils::{embedding::EmbeddingProvider, llm::LlmClient},
};

use crate::{
    fts::find_items_by_fts,
    graph::graph_search,
    pipeline::{
        config::RetrievalConfig, PipelineDiagnostics, PipelineStage, PipelineStageTimings,
        StageKind, StrategyKind,
    },
    query::{process_query, ProcessedQuery, QueryFilters},
    reranking::RerankerLease,
    scoring::{
        clamp_unit, min_max_normalize, reciprocal_rank_fusion, FusedCandidate, Scored,
    },
};

/// Mutable state threaded through the retrieval stages.
pub struct PipelineContext<'a> {
    pub db: &'a SurrealDbClient,
    pub llm: &'a LlmClient,
    pub embedder: &'a EmbeddingProvider,
    pub reranker: Option<RerankerLease>,
    pub config: RetrievalConfig,
    pub input_text: String,
    pub processed: Option<ProcessedQuery>,
    pub strategy_lists: Vec<(StrategyKind, Vec<Scored<DocumentChunk>>)>,
    pub fused: Vec<FusedCandidate<DocumentChunk>>,
    diagnostics: PipelineDiagnostics,
    timings: PipelineStageTimings,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        db: &'a SurrealDbClient,
        llm: &'a LlmClient,
        embedder: &'a EmbeddingProvider,
        input_text: String,
        config: RetrievalConfig,
        reranker: Option<RerankerLease>,
    ) -> Self {
        Self {
            db,
            llm,
            embedder,
            reranker,
            config,
            input_text,
            processed: None,
            strategy_lists: Vec::new(),
            fused: Vec::new(),
            diagnostics: PipelineDiagnostics::default(),
            timings: PipelineStageTimings::default(),
        }
    }

    pub fn record_stage_duration(&mut self, kind: StageKind, duration: std::time::Duration) {
        self.timings.record(kind, duration);
    }

    pub fn diagnostics_mut(&mut self) -> &mut PipelineDiagnostics {
        &mut self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> PipelineDiagnostics {
        std::mem::take(&mut self.diagnostics)
    }

    pub fn take_stage_timings(&mut self) -> PipelineStageTimings {
        std::mem::take(&mut self.timings)
    }
}

/// Stage 1: reformulations, embeddings and filters for the raw query.
pub struct ProcessQueryStage;

#[async_trait]
impl PipelineStage for ProcessQueryStage {
    fn kind(&self) -> StageKind {
        StageKind::ProcessQuery
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        let tuning = &ctx.config.tuning;
        let processed = process_query(
            ctx.llm,
            ctx.embedder,
            &ctx.input_text,
            tuning.num_reformulations,
            tuning.hyde_samples,
        )
        .await?;
        debug!(
            reformulations = processed.reformulations.len(),
            hyde = processed.hyde_embedding.is_some(),
            "query processed"
        );
        ctx.processed = Some(processed);
        Ok(())
    }
}

/// Stage 2: run the dense, sparse and graph strategies, each under its own
/// timeout. A failed or slow strategy degrades the run instead of failing it.
pub struct CollectStage;

#[async_trait]
impl PipelineStage for CollectStage {
    fn kind(&self) -> StageKind {
        StageKind::Collect
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        let processed = ctx
            .processed
            .clone()
            .ok_or_else(|| AppError::InternalError("collect stage ran before query processing".into()))?;
        let tuning = ctx.config.tuning.clone();
        let db = ctx.db;
        let embedder = ctx.embedder;
        let mentions = processed.filters.entity_mentions();

        // Dense hybrid search, once per phrasing. The first phrasing is the
        // original query and searches with the hypothetical-answer embedding
        // when one exists.
        let dense_arms: Vec<_> = processed
            .reformulations
            .iter()
            .enumerate()
            .map(|(index, phrasing)| {
                let tuning = &tuning;
                let processed = &processed;
                async move {
                    let embedding = if index == 0 {
                        processed.search_embedding().to_vec()
                    } else {
                        match embedder.embed(phrasing).await {
                            Ok(embedding) => embedding,
                            Err(err) => {
                                warn!(error = %err, "failed to embed reformulation, skipping it");
                                return None;
                            }
                        }
                    };
                    Some(
                        timeout(
                            tuning.strategy_timeout,
                            dense_list(db, embedding, phrasing, tuning.k_rerank, tuning),
                        )
                        .await,
                    )
                }
            })
            .collect();

        // Sparse keyword search on the original query.
        let sparse_arm = timeout(
            tuning.strategy_timeout,
            sparse_list(db, &processed.original, tuning.k_rerank),
        );

        // Graph traversal seeded from the entities the query filters named.
        let graph_arm = timeout(
            tuning.strategy_timeout,
            graph_search(
                db,
                &mentions,
                tuning.graph_seed_limit,
                tuning.graph_max_depth,
                tuning.max_chunks_per_entity,
            ),
        );

        let (dense_outcomes, sparse, graph) =
            run_strategy_arms(dense_arms, sparse_arm, graph_arm).await;

        for dense in dense_outcomes.into_iter().flatten() {
            record_strategy_outcome(ctx, StrategyKind::Dense, dense);
        }
        record_strategy_outcome(ctx, StrategyKind::Sparse, sparse);
        record_strategy_outcome(ctx, StrategyKind::Graph, graph);

        if ctx.strategy_lists.iter().all(|(_, list)| list.is_empty()) {
            debug!("no retrieval strategy produced candidates");
        }
        Ok(())
    }
}

type StrategyOutcome =
    Result<Result<Vec<Scored<DocumentChunk>>, AppError>, tokio::time::error::Elapsed>;

/// Fan the strategy arms out together. A stalled backend burns its own
/// timeout without holding up the other strategies behind it.
async fn run_strategy_arms<D, S, G>(
    dense: Vec<D>,
    sparse: S,
    graph: G,
) -> (Vec<Option<StrategyOutcome>>, StrategyOutcome, StrategyOutcome)
where
    D: Future<Output = Option<StrategyOutcome>>,
    S: Future<Output = StrategyOutcome>,
    G: Future<Output = StrategyOutcome>,
{
    tokio::join!(join_all(dense), sparse, graph)
}

/// Stage 3: reciprocal rank fusion across strategy lists, then graph boosts.
pub struct FuseStage;

#[async_trait]
impl PipelineStage for FuseStage {
    fn kind(&self) -> StageKind {
        StageKind::Fuse
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        let tuning = ctx.config.tuning.clone();
        let lists: Vec<Vec<Scored<DocumentChunk>>> = ctx
            .strategy_lists
            .drain(..)
            .map(|(_, list)| list)
            .collect();

        let mut fused = reciprocal_rank_fusion(lists, tuning.rrf_c);

        // Graph agreement boosts. A candidate the graph reached gets a flat
        // boost scaled by its graph score; one the graph and another strategy
        // both reached gets the larger merge boost on top.
        for candidate in &mut fused {
            if let Some(graph_score) = candidate.scores.graph {
                candidate.fused += tuning.graph_boost * clamp_unit(graph_score);
                if candidate.contributing_lists > 1 {
                    candidate.fused += tuning.graph_merge_boost * clamp_unit(graph_score);
                }
            }
        }
        if let Some(processed) = &ctx.processed {
            apply_filter_boosts(&mut fused, &processed.filters);
        }
        fused.sort_by(|a, b| {
            b.fused
                .partial_cmp(&a.fused)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.item.id.cmp(&b.item.id))
        });
        fused.truncate(tuning.k_rerank);

        ctx.fused = fused;
        Ok(())
    }
}

/// Stage 4: cross-encoder rerank of the fused pool, blended with the fused
/// score. Skipped cleanly when no reranker is available.
pub struct RerankStage;

#[async_trait]
impl PipelineStage for RerankStage {
    fn kind(&self) -> StageKind {
        StageKind::Rerank
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        let tuning = ctx.config.tuning.clone();
        let Some(lease) = ctx.reranker.take() else {
            ctx.fused.truncate(tuning.top_k);
            return Ok(());
        };
        if ctx.fused.is_empty() {
            return Ok(());
        }

        let query = ctx.input_text.clone();
        let documents: Vec<String> = ctx
            .fused
            .iter()
            .map(|candidate| candidate.item.content.clone())
            .collect();

        match lease.rerank(&query, documents).await {
            Ok(results) => {
                let mut rerank_scores = vec![0.0f32; ctx.fused.len()];
                for result in results {
                    if let Some(slot) = rerank_scores.get_mut(result.index) {
                        *slot = result.score;
                    }
                }
                let rerank_norm = min_max_normalize(&rerank_scores);
                let fused_scores: Vec<f32> =
                    ctx.fused.iter().map(|candidate| candidate.fused).collect();
                let fused_norm = min_max_normalize(&fused_scores);

                for (index, candidate) in ctx.fused.iter_mut().enumerate() {
                    candidate.fused = tuning.rerank_blend * fused_norm[index]
                        + (1.0 - tuning.rerank_blend) * rerank_norm[index];
                }
                ctx.fused.sort_by(|a, b| {
                    b.fused
                        .partial_cmp(&a.fused)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.item.id.cmp(&b.item.id))
                });
                ctx.diagnostics_mut().rerank_applied = true;
            }
            Err(err) => {
                warn!(error = %err, "rerank failed, keeping fused ordering");
                ctx.diagnostics_mut().degraded = true;
            }
        }

        ctx.fused.truncate(tuning.top_k);
        Ok(())
    }
}

/// Flat nudge for candidates matching a document-type or year hint pulled
/// from the query text. Hints reorder near-ties; they never filter.
const FILTER_HINT_BOOST: f32 = 0.05;

fn apply_filter_boosts(fused: &mut [FusedCandidate<DocumentChunk>], filters: &QueryFilters) {
    if filters.doc_types.is_empty() && filters.years.is_empty() {
        return;
    }
    for candidate in fused {
        let doc_type_match = filters
            .doc_types
            .iter()
            .any(|hint| hint == candidate.item.doc_type.as_str());
        let year_match = filters
            .years
            .iter()
            .any(|year| candidate.item.content.contains(&year.to_string()));
        if doc_type_match || year_match {
            candidate.fused += FILTER_HINT_BOOST;
        }
    }
}

fn record_strategy_outcome(
    ctx: &mut PipelineContext<'_>,
    strategy: StrategyKind,
    outcome: Result<Result<Vec<Scored<DocumentChunk>>, AppError>, tokio::time::error::Elapsed>,
) {
    match outcome {
        Ok(Ok(list)) => {
            ctx.diagnostics_mut()
                .strategy_list_sizes
                .push((strategy.to_string(), list.len()));
            ctx.strategy_lists.push((strategy, list));
        }
        Ok(Err(err)) => {
            warn!(strategy = %strategy, error = %err, "retrieval strategy failed");
            let diagnostics = ctx.diagnostics_mut();
            diagnostics.failed_strategies.push(strategy.to_string());
            diagnostics.degraded = true;
        }
        Err(_) => {
            warn!(strategy = %strategy, "retrieval strategy timed out");
            let diagnostics = ctx.diagnostics_mut();
            diagnostics.timed_out_strategies.push(strategy.to_string());
            diagnostics.degraded = true;
        }
    }
}

async fn dense_list(
    db: &SurrealDbClient,
    embedding: Vec<f32>,
    query_text: &str,
    take: usize,
    tuning: &crate::pipeline::config::RetrievalTuning,
) -> Result<Vec<Scored<DocumentChunk>>, AppError> {
    let rows = db
        .hybrid_search(
            embedding,
            query_text,
            take,
            tuning.dense_weight,
            tuning.fts_weight,
        )
        .await?;
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let thing_ids: Vec<Thing> = rows
        .iter()
        .map(|row| Thing::from((DocumentChunk::table_name(), row.chunk_id.as_str())))
        .collect();
    let mut response = db
        .query("SELECT * FROM document_chunk WHERE id IN $things")
        .bind(("things", thing_ids))
        .await?;
    let chunks: Vec<DocumentChunk> = response.take(0)?;
    let mut by_id: HashMap<String, DocumentChunk> = chunks
        .into_iter()
        .map(|chunk| (chunk.get_id().to_owned(), chunk))
        .collect();

    let mut scored = Vec::with_capacity(rows.len());
    for row in rows {
        if let Some(chunk) = by_id.remove(&row.chunk_id) {
            scored.push(
                Scored::new(chunk)
                    .with_dense_score(row.final_score)
                    .with_fts_score(row.fts_score),
            );
        }
    }
    Ok(scored)
}

async fn sparse_list(
    db: &SurrealDbClient,
    query: &str,
    take: usize,
) -> Result<Vec<Scored<DocumentChunk>>, AppError> {
    find_items_by_fts::<DocumentChunk>(take, query, db, DocumentChunk::table_name()).await
}
