use std::sync::Arc;

use api_router::{api_routes_v1, api_state::ApiState};
use axum::Router;
use common::{
    storage::{db::SurrealDbClient, indexes::ensure_runtime_indexes},
    utils::{config::get_config, embedding::EmbeddingProvider, llm::LlmClient},
};
use ingestion_pipeline::seed_known_relationships;
use retrieval_pipeline::reranking::RerankerPool;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // A bad tunable is fatal before serving anything
    let config = get_config()?;
    config.validate()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );

    // HNSW and BM25 indexes must exist before the first query
    ensure_runtime_indexes(&db, config.embedding_dimensions as usize).await?;

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    let embedding_provider =
        Arc::new(EmbeddingProvider::from_config(&config, Some(openai_client.clone())).await?);
    info!(
        embedding_backend = ?config.embedding_backend,
        embedding_dimension = embedding_provider.dimension(),
        "Embedding provider initialized"
    );

    let llm = LlmClient::from_config(&config, openai_client);
    let reranker_pool = RerankerPool::maybe_from_config(&config)?;
    info!(
        reranker_enabled = reranker_pool.is_some(),
        "Reranker pool initialized"
    );

    // Canonical graph edges that chunk-level extraction cannot infer
    let seeded = seed_known_relationships(&db, &embedding_provider).await?;
    if seeded > 0 {
        info!(edges = seeded, "Seeded canonical graph relationships");
    }

    let api_state = ApiState::new(
        db,
        llm,
        embedding_provider,
        reranker_pool,
        config.clone(),
    );

    let app = Router::new()
        .nest("/api/v1", api_routes_v1())
        .with_state(api_state);

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
