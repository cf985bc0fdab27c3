use std::time::Duration;

use serde::{Deserialize, Serialize};

use common::utils::config::RetrievalSettings;

/// Tunable parameters that govern each retrieval stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalTuning {
    /// Final number of candidates handed to generation.
    pub top_k: usize,
    /// Pool size entering the rerank stage.
    pub k_rerank: usize,
    /// Weight on vector similarity inside the hybrid store query.
    pub dense_weight: f32,
    /// Weight on BM25 inside the hybrid store query.
    pub fts_weight: f32,
    /// Reciprocal rank fusion constant.
    pub rrf_c: f32,
    /// Budget for each retrieval strategy before it is abandoned.
    pub strategy_timeout: Duration,
    /// How many graph entities seed the traversal.
    pub graph_seed_limit: usize,
    /// Maximum traversal distance from a seed entity.
    pub graph_max_depth: usize,
    /// Chunks attached per graph entity.
    pub max_chunks_per_entity: usize,
    /// Added to the fused score when the graph strategy found the candidate.
    pub graph_boost: f32,
    /// Added when the graph strategy agrees with at least one other strategy.
    pub graph_merge_boost: f32,
    /// Share of the blended score taken from the fused score; the remainder
    /// comes from the cross-encoder.
    pub rerank_blend: f32,
    /// Alternative query phrasings to search with.
    pub num_reformulations: usize,
    /// Hypothetical answer drafts averaged into the search embedding.
    pub hyde_samples: usize,
}

impl Default for RetrievalTuning {
    fn default() -> Self {
        Self::from(&RetrievalSettings::default())
    }
}

impl From<&RetrievalSettings> for RetrievalTuning {
    fn from(settings: &RetrievalSettings) -> Self {
        Self {
            top_k: settings.top_k,
            k_rerank: settings.k_rerank,
            dense_weight: settings.dense_weight,
            fts_weight: settings.fts_weight,
            rrf_c: settings.rrf_c,
            strategy_timeout: Duration::from_millis(settings.strategy_timeout_ms),
            graph_seed_limit: 5,
            graph_max_depth: settings.graph_max_depth,
            max_chunks_per_entity: 4,
            graph_boost: settings.graph_boost,
            graph_merge_boost: settings.graph_merge_boost,
            rerank_blend: settings.rerank_blend,
            num_reformulations: settings.num_reformulations,
            hyde_samples: settings.hyde_samples,
        }
    }
}

/// Per-run retrieval configuration: tuning plus request-level overrides.
#[derive(Debug, Clone, Default)]
pub struct RetrievalConfig {
    pub tuning: RetrievalTuning,
}

impl RetrievalConfig {
    pub const fn new(tuning: RetrievalTuning) -> Self {
        Self { tuning }
    }

    pub fn from_settings(settings: &RetrievalSettings) -> Self {
        Self::new(RetrievalTuning::from(settings))
    }

    /// Override the final candidate count for a single request, keeping the
    /// rerank pool at least as large.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.tuning.top_k = top_k;
        self.tuning.k_rerank = self.tuning.k_rerank.max(top_k);
        self
    }
}
