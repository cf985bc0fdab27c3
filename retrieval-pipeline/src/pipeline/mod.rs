pub mod config;
mod stages;

pub use config::{RetrievalConfig, RetrievalTuning};
pub use stages::PipelineContext;

use std::{
    fmt,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::document_chunk::DocumentChunk},
    utils::{embedding::EmbeddingProvider, llm::LlmClient},
};

use crate::{reranking::RerankerLease, scoring::FusedCandidate};
use stages::{CollectStage, FuseStage, ProcessQueryStage, RerankStage};

/// Stage type enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    ProcessQuery,
    Collect,
    Fuse,
    Rerank,
}

/// The individual retrieval strategies the collect stage runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Dense,
    Sparse,
    Graph,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StrategyKind::Dense => "dense",
            StrategyKind::Sparse => "sparse",
            StrategyKind::Graph => "graph",
        };
        f.write_str(label)
    }
}

// Pipeline stage trait
#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn kind(&self) -> StageKind;
    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError>;
}

pub type BoxedStage = Box<dyn PipelineStage>;

/// Pipeline stage timings tracker
#[derive(Debug, Default, Clone)]
pub struct PipelineStageTimings {
    timings: Vec<(StageKind, Duration)>,
}

impl PipelineStageTimings {
    pub fn record(&mut self, kind: StageKind, duration: Duration) {
        self.timings.push((kind, duration));
    }

    pub fn into_vec(self) -> Vec<(StageKind, Duration)> {
        self.timings
    }

    fn get_stage_ms(&self, kind: StageKind) -> u128 {
        self.timings
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, d)| d.as_millis())
            .unwrap_or(0)
    }

    pub fn process_query_ms(&self) -> u128 {
        self.get_stage_ms(StageKind::ProcessQuery)
    }

    pub fn collect_ms(&self) -> u128 {
        self.get_stage_ms(StageKind::Collect)
    }

    pub fn fuse_ms(&self) -> u128 {
        self.get_stage_ms(StageKind::Fuse)
    }

    pub fn rerank_ms(&self) -> u128 {
        self.get_stage_ms(StageKind::Rerank)
    }

    pub fn total_ms(&self) -> u128 {
        self.timings.iter().map(|(_, d)| d.as_millis()).sum()
    }
}

/// What happened while retrieving: which strategies ran short, whether the
/// run degraded, and whether reranking was applied.
#[derive(Debug, Default, Clone, Serialize)]
pub struct PipelineDiagnostics {
    pub degraded: bool,
    pub timed_out_strategies: Vec<String>,
    pub failed_strategies: Vec<String>,
    pub strategy_list_sizes: Vec<(String, usize)>,
    pub rerank_applied: bool,
}

pub struct RetrievalRunOutput {
    pub candidates: Vec<FusedCandidate<DocumentChunk>>,
    pub diagnostics: PipelineDiagnostics,
    pub stage_timings: PipelineStageTimings,
}

fn pipeline_stages() -> Vec<BoxedStage> {
    vec![
        Box::new(ProcessQueryStage),
        Box::new(CollectStage),
        Box::new(FuseStage),
        Box::new(RerankStage),
    ]
}

/// Run the retrieval pipeline end to end and return the candidate pool with
/// run diagnostics.
pub async fn run_retrieval(
    db: &SurrealDbClient,
    llm: &LlmClient,
    embedder: &EmbeddingProvider,
    input_text: &str,
    config: RetrievalConfig,
    reranker: Option<RerankerLease>,
) -> Result<RetrievalRunOutput, AppError> {
    let input_chars = input_text.chars().count();
    let preview: String = input_text.chars().take(120).collect();
    info!(
        input_chars,
        preview = %preview.replace('\n', " "),
        "Starting retrieval pipeline"
    );

    let mut ctx = PipelineContext::new(
        db,
        llm,
        embedder,
        input_text.to_owned(),
        config,
        reranker,
    );

    for stage in pipeline_stages() {
        let start = Instant::now();
        stage.execute(&mut ctx).await?;
        ctx.record_stage_duration(stage.kind(), start.elapsed());
    }

    let diagnostics = ctx.take_diagnostics();
    let stage_timings = ctx.take_stage_timings();
    let candidates = std::mem::take(&mut ctx.fused);

    info!(
        candidates = candidates.len(),
        degraded = diagnostics.degraded,
        total_ms = stage_timings.total_ms() as u64,
        "Retrieval pipeline finished"
    );

    Ok(RetrievalRunOutput {
        candidates,
        diagnostics,
        stage_timings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::indexes::{ensure_runtime_indexes, rebuild_fts_indexes};
    use common::storage::types::legal_document::DocumentType;
    use common::utils::llm::{ScriptRule, ScriptedResponse};
    use uuid::Uuid;

    const DIM: usize = 32;

    async fn seeded_db(embedder: &EmbeddingProvider) -> SurrealDbClient {
        let db = SurrealDbClient::memory("pipeline_test", &Uuid::new_v4().to_string())
            .await
            .expect("failed to start in-memory surrealdb");
        ensure_runtime_indexes(&db, DIM)
            .await
            .expect("failed to build indexes");

        let contents = [
            (
                "ipc_section_302",
                0u32,
                "Section 302 of the Indian Penal Code prescribes the punishment for murder: \
                 death or imprisonment for life, and a fine.",
            ),
            (
                "constitution_article_19",
                0u32,
                "Article 19 guarantees all citizens the right to freedom of speech and \
                 expression.",
            ),
            (
                "ipc_section_304",
                0u32,
                "Section 304 covers punishment for culpable homicide not amounting to murder.",
            ),
        ];
        for (doc_id, index, content) in contents {
            let embedding = embedder.embed(content).await.expect("embed failed");
            let chunk = DocumentChunk::new(
                doc_id.to_string(),
                index,
                content.to_string(),
                None,
                doc_id.to_string(),
                DocumentType::Act,
                embedding,
            );
            db.store_item(chunk).await.expect("failed to store chunk");
        }
        rebuild_fts_indexes(&db)
            .await
            .expect("failed to rebuild fts");
        db
    }

    fn offline_llm() -> LlmClient {
        LlmClient::scripted(vec![ScriptRule {
            trigger: "".into(),
            response: ScriptedResponse::TransientFailure,
        }])
    }

    fn tuning() -> RetrievalTuning {
        let mut tuning = RetrievalTuning::default();
        tuning.num_reformulations = 0;
        tuning.hyde_samples = 0;
        tuning
    }

    #[tokio::test]
    async fn pipeline_returns_relevant_candidates() {
        let embedder = EmbeddingProvider::new_hashed(DIM).expect("hashed provider");
        let db = seeded_db(&embedder).await;
        let llm = offline_llm();

        let output = run_retrieval(
            &db,
            &llm,
            &embedder,
            "What is the punishment for murder under Section 302?",
            RetrievalConfig::new(tuning()),
            None,
        )
        .await
        .expect("pipeline failed");

        assert!(!output.candidates.is_empty());
        assert_eq!(output.candidates[0].item.document_id, "ipc_section_302");
        assert!(output.stage_timings.total_ms() < 10_000);
    }

    #[tokio::test]
    async fn candidate_pool_is_deduplicated_and_bounded() {
        let embedder = EmbeddingProvider::new_hashed(DIM).expect("hashed provider");
        let db = seeded_db(&embedder).await;
        let llm = offline_llm();

        let mut t = tuning();
        t.top_k = 2;
        t.k_rerank = 2;

        let output = run_retrieval(
            &db,
            &llm,
            &embedder,
            "punishment for murder and culpable homicide",
            RetrievalConfig::new(t),
            None,
        )
        .await
        .expect("pipeline failed");

        assert!(output.candidates.len() <= 2);
        let mut ids: Vec<&str> = output
            .candidates
            .iter()
            .map(|c| c.item.id.as_str())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), output.candidates.len());
    }

    #[tokio::test]
    async fn slow_strategies_degrade_instead_of_failing() {
        let embedder = EmbeddingProvider::new_hashed(DIM).expect("hashed provider");
        let db = seeded_db(&embedder).await;
        let llm = offline_llm();

        let mut t = tuning();
        t.strategy_timeout = Duration::ZERO;

        let output = run_retrieval(
            &db,
            &llm,
            &embedder,
            "What does Article 19 guarantee?",
            RetrievalConfig::new(t),
            None,
        )
        .await
        .expect("pipeline should degrade, not fail");

        assert!(output.diagnostics.degraded);
        assert!(!output.diagnostics.timed_out_strategies.is_empty());
    }
}
