use std::sync::Arc;

use common::{
    storage::db::SurrealDbClient,
    utils::{config::AppConfig, embedding::EmbeddingProvider, llm::LlmClient},
};
use retrieval_pipeline::reranking::RerankerPool;

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub llm: LlmClient,
    pub embedder: Arc<EmbeddingProvider>,
    pub reranker: Option<Arc<RerankerPool>>,
    pub config: AppConfig,
}

impl ApiState {
    pub fn new(
        db: Arc<SurrealDbClient>,
        llm: LlmClient,
        embedder: Arc<EmbeddingProvider>,
        reranker: Option<Arc<RerankerPool>>,
        config: AppConfig,
    ) -> Self {
        Self {
            db,
            llm,
            embedder,
            reranker,
            config,
        }
    }
}
