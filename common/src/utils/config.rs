use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::error::AppError;

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    pub http_port: u16,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_query_model")]
    pub query_model: String,
    #[serde(default = "default_embedding_backend")]
    pub embedding_backend: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default)]
    pub reranker_enabled: bool,
    #[serde(default = "default_reranker_pool_size")]
    pub reranker_pool_size: usize,
    #[serde(default)]
    pub reranker_model: Option<String>,
    #[serde(default = "default_retrieval")]
    pub retrieval: RetrievalSettings,
    #[serde(default = "default_generation")]
    pub generation: GenerationSettings,
}

#[derive(Clone, Deserialize, Debug)]
pub struct RetrievalSettings {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_k_rerank")]
    pub k_rerank: usize,
    #[serde(default = "default_dense_weight")]
    pub dense_weight: f32,
    #[serde(default = "default_fts_weight")]
    pub fts_weight: f32,
    #[serde(default = "default_rrf_c")]
    pub rrf_c: f32,
    #[serde(default = "default_strategy_timeout_ms")]
    pub strategy_timeout_ms: u64,
    #[serde(default = "default_graph_max_depth")]
    pub graph_max_depth: usize,
    #[serde(default = "default_graph_boost")]
    pub graph_boost: f32,
    #[serde(default = "default_graph_merge_boost")]
    pub graph_merge_boost: f32,
    #[serde(default = "default_rerank_blend")]
    pub rerank_blend: f32,
    #[serde(default = "default_num_reformulations")]
    pub num_reformulations: usize,
    #[serde(default = "default_hyde_samples")]
    pub hyde_samples: usize,
}

#[derive(Clone, Deserialize, Debug)]
pub struct GenerationSettings {
    #[serde(default = "default_max_corrective_rounds")]
    pub max_corrective_rounds: u32,
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f32,
    #[serde(default = "default_hallucination_threshold")]
    pub hallucination_threshold: f32,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_query_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_backend() -> String {
    "fastembed".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

const fn default_embedding_dimensions() -> u32 {
    1536
}

const fn default_reranker_pool_size() -> usize {
    2
}

const fn default_top_k() -> usize {
    10
}

const fn default_k_rerank() -> usize {
    20
}

const fn default_dense_weight() -> f32 {
    0.6
}

const fn default_fts_weight() -> f32 {
    0.4
}

const fn default_rrf_c() -> f32 {
    60.0
}

const fn default_strategy_timeout_ms() -> u64 {
    2000
}

const fn default_graph_max_depth() -> usize {
    2
}

const fn default_graph_boost() -> f32 {
    0.2
}

const fn default_graph_merge_boost() -> f32 {
    0.3
}

const fn default_rerank_blend() -> f32 {
    0.6
}

const fn default_num_reformulations() -> usize {
    3
}

const fn default_hyde_samples() -> usize {
    3
}

const fn default_max_corrective_rounds() -> u32 {
    2
}

const fn default_quality_threshold() -> f32 {
    0.6
}

const fn default_hallucination_threshold() -> f32 {
    0.10
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        default_retrieval()
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        default_generation()
    }
}

fn default_retrieval() -> RetrievalSettings {
    RetrievalSettings {
        top_k: default_top_k(),
        k_rerank: default_k_rerank(),
        dense_weight: default_dense_weight(),
        fts_weight: default_fts_weight(),
        rrf_c: default_rrf_c(),
        strategy_timeout_ms: default_strategy_timeout_ms(),
        graph_max_depth: default_graph_max_depth(),
        graph_boost: default_graph_boost(),
        graph_merge_boost: default_graph_merge_boost(),
        rerank_blend: default_rerank_blend(),
        num_reformulations: default_num_reformulations(),
        hyde_samples: default_hyde_samples(),
    }
}

fn default_generation() -> GenerationSettings {
    GenerationSettings {
        max_corrective_rounds: default_max_corrective_rounds(),
        quality_threshold: default_quality_threshold(),
        hallucination_threshold: default_hallucination_threshold(),
    }
}

impl AppConfig {
    /// Pre-flight validation. A bad tunable here is fatal before serving.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.retrieval.top_k == 0 {
            return Err(AppError::Config("retrieval.top_k must be >= 1".into()));
        }
        if self.retrieval.k_rerank < self.retrieval.top_k {
            return Err(AppError::Config(
                "retrieval.k_rerank must be >= retrieval.top_k".into(),
            ));
        }
        for (name, value) in [
            ("retrieval.dense_weight", self.retrieval.dense_weight),
            ("retrieval.fts_weight", self.retrieval.fts_weight),
            ("retrieval.rerank_blend", self.retrieval.rerank_blend),
            (
                "generation.quality_threshold",
                self.generation.quality_threshold,
            ),
            (
                "generation.hallucination_threshold",
                self.generation.hallucination_threshold,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(AppError::Config(format!("{name} must be within [0,1]")));
            }
        }
        if self.retrieval.rrf_c <= 0.0 {
            return Err(AppError::Config("retrieval.rrf_c must be positive".into()));
        }
        if self.query_model.trim().is_empty() {
            return Err(AppError::Config("query_model must not be empty".into()));
        }
        Ok(())
    }

    /// A config wired for offline tests: hashed embeddings, no reranker.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn for_tests() -> Self {
        Self {
            openai_api_key: "test".into(),
            surrealdb_address: "mem://".into(),
            surrealdb_username: "root".into(),
            surrealdb_password: "root".into(),
            surrealdb_namespace: "ns".into(),
            surrealdb_database: "db".into(),
            http_port: 3000,
            openai_base_url: default_base_url(),
            query_model: default_query_model(),
            embedding_backend: "hashed".into(),
            embedding_model: default_embedding_model(),
            embedding_dimensions: 64,
            reranker_enabled: false,
            reranker_pool_size: default_reranker_pool_size(),
            reranker_model: None,
            retrieval: default_retrieval(),
            generation: default_generation(),
        }
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default().separator("__"))
        .build()?;

    config.try_deserialize()
}
