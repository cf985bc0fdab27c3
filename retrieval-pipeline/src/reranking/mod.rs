use std::{
    env, fs,
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use common::{error::AppError, utils::config::AppConfig};
use fastembed::{RerankInitOptions, RerankResult, RerankerModel, TextRerank};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

static NEXT_ENGINE: AtomicUsize = AtomicUsize::new(0);

fn pick_engine_index(pool_len: usize) -> usize {
    let n = NEXT_ENGINE.fetch_add(1, Ordering::Relaxed);
    n % pool_len
}

/// Bounded pool of cross-encoder rerank engines. The semaphore enforces
/// backpressure and engines are handed out round-robin.
pub struct RerankerPool {
    engines: Vec<Arc<Mutex<TextRerank>>>,
    semaphore: Arc<Semaphore>,
}

impl RerankerPool {
    /// Build the pool at startup.
    /// `pool_size` controls max parallel reranks.
    pub fn new(pool_size: usize) -> Result<Arc<Self>, AppError> {
        Self::new_with_options(pool_size, RerankInitOptions::default())
    }

    fn new_with_options(
        pool_size: usize,
        init_options: RerankInitOptions,
    ) -> Result<Arc<Self>, AppError> {
        if pool_size == 0 {
            return Err(AppError::Validation(
                "reranker pool size must be greater than zero".to_string(),
            ));
        }

        fs::create_dir_all(&init_options.cache_dir)?;

        let mut engines = Vec::with_capacity(pool_size);
        for x in 0..pool_size {
            debug!("Creating reranking engine: {x}");
            let model = TextRerank::try_new(init_options.clone())
                .map_err(|e| AppError::InternalError(e.to_string()))?;
            engines.push(Arc::new(Mutex::new(model)));
        }

        Ok(Arc::new(Self {
            engines,
            semaphore: Arc::new(Semaphore::new(pool_size)),
        }))
    }

    /// Initialize a pool from application configuration. Returns `None` when
    /// reranking is disabled; retrieval then ranks on fused scores alone.
    pub fn maybe_from_config(config: &AppConfig) -> Result<Option<Arc<Self>>, AppError> {
        if !config.reranker_enabled {
            return Ok(None);
        }

        let mut options = RerankInitOptions::default();
        if let Some(model) = config.reranker_model.as_deref() {
            options.model_name = resolve_reranker_model(model)?;
        }
        if let Ok(cache_dir) = env::var("FASTEMBED_CACHE_DIR") {
            options.cache_dir = PathBuf::from(cache_dir);
        }

        Self::new_with_options(config.reranker_pool_size, options).map(Some)
    }

    /// Check out capacity + pick an engine.
    /// This returns a lease that can perform rerank().
    pub async fn checkout(self: &Arc<Self>) -> Result<RerankerLease, AppError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::InternalError("reranker pool closed".to_string()))?;

        // Naive engine choice: a modulo counter so we do not always pick
        // index 0.
        let idx = pick_engine_index(self.engines.len());
        let engine = self.engines[idx].clone();

        Ok(RerankerLease {
            _permit: permit,
            engine,
        })
    }
}

fn resolve_reranker_model(name: &str) -> Result<RerankerModel, AppError> {
    match name {
        "bge-reranker-base" => Ok(RerankerModel::BGERerankerBase),
        "bge-reranker-v2-m3" => Ok(RerankerModel::BGERerankerV2M3),
        other => Err(AppError::Config(format!("unknown reranker model '{other}'"))),
    }
}

/// Active lease on a single TextRerank instance.
pub struct RerankerLease {
    // When this drops the semaphore permit is released.
    _permit: OwnedSemaphorePermit,
    engine: Arc<Mutex<TextRerank>>,
}

impl RerankerLease {
    pub async fn rerank(
        &self,
        query: &str,
        documents: Vec<String>,
    ) -> Result<Vec<RerankResult>, AppError> {
        // Lock this specific engine so we get &mut TextRerank
        let mut guard = self.engine.lock().await;

        guard
            .rerank(query.to_owned(), documents, false, None)
            .map_err(|e| AppError::InternalError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_picks_rotate() {
        let a = pick_engine_index(3);
        let b = pick_engine_index(3);
        assert_ne!(a, b);
    }

    #[test]
    fn unknown_model_name_is_a_config_error() {
        let err = resolve_reranker_model("colbert-v9").expect_err("expected config error");
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn disabled_config_builds_no_pool() {
        let config = AppConfig::for_tests();
        let pool = RerankerPool::maybe_from_config(&config).expect("disabled pool should be ok");
        assert!(pool.is_none());
    }
}
