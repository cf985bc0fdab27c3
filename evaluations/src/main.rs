mod args;
mod question_bank;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use common::{
    storage::{db::SurrealDbClient, indexes::ensure_runtime_indexes, types::legal_document::DocumentType},
    utils::{
        config::RetrievalSettings,
        embedding::EmbeddingProvider,
        llm::{LlmClient, ScriptRule, ScriptedResponse},
    },
};
use ingestion_pipeline::{ingest_document, seed_known_relationships, DocumentInput};
use retrieval_pipeline::{retrieve, RetrievalConfig};

use crate::question_bank::{FixtureQuestion, QuestionBank};

#[derive(Debug, Default)]
struct RunTally {
    answerable: usize,
    hits: usize,
    reciprocal_rank_sum: f64,
    fragment_hits: usize,
    impossible: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = args::parse()?;
    let bank = QuestionBank::load(&config.fixture)?;
    info!(
        documents = bank.documents.len(),
        questions = bank.questions.len(),
        "question bank loaded"
    );

    let embedder = EmbeddingProvider::new_hashed(config.embedding_dimensions)
        .context("building hashed embedding provider")?;
    // Fresh namespace per run so repeated invocations never see stale state
    let db = SurrealDbClient::memory("evaluations", &Uuid::new_v4().to_string())
        .await
        .context("starting in-memory store")?;
    ensure_runtime_indexes(&db, config.embedding_dimensions)
        .await
        .context("building indexes")?;

    for document in &bank.documents {
        let report = ingest_document(
            &db,
            &embedder,
            DocumentInput {
                id: document.id.clone(),
                source: document.source.clone(),
                content: document.content.clone(),
                doc_type: DocumentType::from(document.doc_type.clone()),
                jurisdiction: document.jurisdiction.clone(),
                year: document.year,
            },
        )
        .await
        .with_context(|| format!("ingesting {}", document.id))?;
        info!(
            document_id = %report.document_id,
            chunks = report.chunks,
            "document ingested"
        );
    }
    seed_known_relationships(&db, &embedder)
        .await
        .context("seeding canonical graph edges")?;

    // No live model in the harness: reformulation and hypothetical drafting
    // degrade gracefully, and the tuning below disables them anyway.
    let llm = LlmClient::scripted(vec![ScriptRule {
        trigger: String::new(),
        response: ScriptedResponse::TransientFailure,
    }]);
    let settings = RetrievalSettings {
        num_reformulations: 0,
        hyde_samples: 0,
        ..RetrievalSettings::default()
    };

    let questions: Vec<&FixtureQuestion> = match config.limit {
        Some(limit) => bank.questions.iter().take(limit).collect(),
        None => bank.questions.iter().collect(),
    };

    let mut tally = RunTally::default();
    for question in questions {
        let retrieval_config = RetrievalConfig::from_settings(&settings).with_top_k(config.k);
        let run = retrieve(&db, &llm, &embedder, &question.query, retrieval_config, None)
            .await
            .with_context(|| format!("retrieving for {}", question.id))?;

        if question.is_impossible {
            tally.impossible += 1;
            continue;
        }
        tally.answerable += 1;

        let rank = run.candidates.iter().position(|candidate| {
            question
                .expected_document_ids
                .contains(&candidate.item.document_id)
        });
        match rank {
            Some(position) if position < config.k => {
                tally.hits += 1;
                tally.reciprocal_rank_sum += 1.0 / (position as f64 + 1.0);
            }
            Some(position) => {
                tally.reciprocal_rank_sum += 1.0 / (position as f64 + 1.0);
            }
            None => {
                info!(question = %question.id, "no expected document retrieved");
            }
        }

        let fragment_found = question.expected_fragments.iter().any(|fragment| {
            run.candidates.iter().any(|candidate| {
                candidate
                    .item
                    .content
                    .to_lowercase()
                    .contains(&fragment.to_lowercase())
            })
        });
        if fragment_found || question.expected_fragments.is_empty() {
            tally.fragment_hits += 1;
        }
    }

    let hit_rate = if tally.answerable > 0 {
        tally.hits as f64 / tally.answerable as f64
    } else {
        0.0
    };
    let mrr = if tally.answerable > 0 {
        tally.reciprocal_rank_sum / tally.answerable as f64
    } else {
        0.0
    };

    if let Some(label) = &config.label {
        println!("run: {label}");
    }
    println!("questions evaluated: {}", tally.answerable);
    println!("impossible questions skipped: {}", tally.impossible);
    println!("hit rate @{}: {hit_rate:.3}", config.k);
    println!("mrr: {mrr:.3}");
    println!(
        "fragment coverage: {:.3}",
        if tally.answerable > 0 {
            tally.fragment_hits as f64 / tally.answerable as f64
        } else {
            0.0
        }
    );

    Ok(())
}
