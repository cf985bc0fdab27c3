pub mod fts;
pub mod graph;
pub mod pipeline;
pub mod query;
pub mod reranking;
pub mod scoring;

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::document_chunk::DocumentChunk},
    utils::{embedding::EmbeddingProvider, llm::LlmClient},
};
use reranking::RerankerLease;
use tracing::instrument;

pub use pipeline::{
    PipelineDiagnostics, PipelineStageTimings, RetrievalConfig, RetrievalRunOutput,
    RetrievalTuning,
};
pub use scoring::FusedCandidate;

/// A supporting chunk plus its final retrieval score, shaped for downstream
/// prompt assembly.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk: DocumentChunk,
    pub score: f32,
}

impl From<&FusedCandidate<DocumentChunk>> for RetrievedChunk {
    fn from(candidate: &FusedCandidate<DocumentChunk>) -> Self {
        Self {
            chunk: candidate.item.clone(),
            score: candidate.fused,
        }
    }
}

/// Primary orchestrator for retrieving document chunks relevant to a query.
#[instrument(skip_all)]
pub async fn retrieve(
    db: &SurrealDbClient,
    llm: &LlmClient,
    embedder: &EmbeddingProvider,
    input_text: &str,
    config: RetrievalConfig,
    reranker: Option<RerankerLease>,
) -> Result<RetrievalRunOutput, AppError> {
    pipeline::run_retrieval(db, llm, embedder, input_text, config, reranker).await
}
