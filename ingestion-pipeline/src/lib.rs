pub mod chunker;
pub mod enricher;
pub mod graph;
mod state;

use state_machines::core::GuardError;
use tracing::{info, instrument};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        indexes::rebuild_fts_indexes,
        types::{
            document_chunk::DocumentChunk,
            graph_relationship::GraphRelationship,
            legal_document::{DocumentType, LegalDocument},
        },
    },
    utils::embedding::{average_embeddings, EmbeddingProvider},
};

use crate::state::ready;

pub use crate::chunker::{chunk_document, ChunkPiece};
pub use crate::enricher::{enrich, Enrichment};
pub use crate::graph::seed_known_relationships;

/// A document handed to ingestion. Ids are caller-supplied and stable so
/// citations survive re-ingestion.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub id: String,
    pub source: String,
    pub content: String,
    pub doc_type: DocumentType,
    pub jurisdiction: String,
    pub year: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct IngestReport {
    pub document_id: String,
    pub chunks: usize,
    pub entities: usize,
    pub relationships: usize,
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid ingestion transition during {event}: {guard:?}"
    ))
}

/// Ingest one document: chunk along its structure, enrich with category and
/// tags, embed, persist, and update the citation graph. Re-ingesting the same
/// document id replaces its chunks and document-scoped edges instead of
/// duplicating them.
#[instrument(skip_all, fields(document_id = %input.id))]
pub async fn ingest_document(
    db: &SurrealDbClient,
    embedder: &EmbeddingProvider,
    input: DocumentInput,
) -> Result<IngestReport, AppError> {
    if input.id.trim().is_empty() {
        return Err(AppError::Validation("document id must not be empty".into()));
    }
    let machine = ready();

    let pieces = chunker::chunk_document(&input.content);
    if pieces.is_empty() {
        machine
            .abort()
            .map_err(|(_, guard)| map_guard_error("abort", &guard))?;
        return Err(AppError::Validation(format!(
            "document {} contains no ingestible text",
            input.id
        )));
    }
    let machine = machine
        .chunk()
        .map_err(|(_, guard)| map_guard_error("chunk", &guard))?;

    let enrichment = enricher::enrich(&input.content, &input.doc_type);
    let machine = machine
        .enrich()
        .map_err(|(_, guard)| map_guard_error("enrich", &guard))?;

    let contents: Vec<String> = pieces.iter().map(|piece| piece.content.clone()).collect();
    let embeddings = embedder
        .embed_batch(contents)
        .await
        .map_err(|error| AppError::InternalError(format!("embedding failed: {error}")))?;
    if embeddings.len() != pieces.len() {
        return Err(AppError::InternalError(format!(
            "embedding batch returned {} vectors for {} chunks",
            embeddings.len(),
            pieces.len()
        )));
    }
    let document_embedding = average_embeddings(&embeddings).ok_or_else(|| {
        AppError::InternalError("cannot average embeddings of mismatched dimensions".into())
    })?;

    // Replace any previous rendition of this document before storing.
    db.delete_item::<LegalDocument>(&input.id).await?;
    DocumentChunk::delete_by_document_id(&input.id, db).await?;
    GraphRelationship::delete_by_document_id(&input.id, db).await?;

    let mut tags = enrichment.tags.clone();
    if enrichment.importance >= 0.8 && !tags.iter().any(|tag| tag == "landmark") {
        tags.push("landmark".to_string());
    }
    let document = LegalDocument::new(
        input.id.clone(),
        input.source.clone(),
        input.content.clone(),
        input.doc_type,
        input.jurisdiction.clone(),
        input.year,
        enrichment.category.clone(),
        tags,
        document_embedding,
    );
    db.store_item(document).await?;

    let total = pieces.len();
    let mut entities = 0usize;
    let mut relationships = 0usize;
    for (index, (piece, embedding)) in pieces.into_iter().zip(embeddings).enumerate() {
        let index = index as u32;
        let mut chunk = DocumentChunk::new(
            input.id.clone(),
            index,
            piece.content.clone(),
            piece.parent_section,
            input.source.clone(),
            input.doc_type,
            embedding,
        );
        if index > 0 {
            chunk.prev_chunk_id = Some(DocumentChunk::chunk_id(&input.id, index - 1));
        }
        if (index as usize) + 1 < total {
            chunk.next_chunk_id = Some(DocumentChunk::chunk_id(&input.id, index + 1));
        }
        db.store_item(chunk).await?;

        let update = graph::update_graph_for_chunk(db, embedder, &input.id, &piece.content).await?;
        entities += update.entities;
        relationships += update.relationships;
    }

    rebuild_fts_indexes(db).await?;

    machine
        .persist()
        .map_err(|(_, guard)| map_guard_error("persist", &guard))?;

    info!(
        document_id = %input.id,
        chunks = total,
        entities,
        relationships,
        category = %enrichment.category,
        "document ingested"
    );

    Ok(IngestReport {
        document_id: input.id,
        chunks: total,
        entities,
        relationships,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::indexes::ensure_runtime_indexes;
    use common::storage::types::graph_relationship::PREDICATE_PRESCRIBES_PENALTY;
    use uuid::Uuid;

    const DIM: usize = 16;

    async fn memory_db(test: &str) -> SurrealDbClient {
        let db = SurrealDbClient::memory(test, &Uuid::new_v4().to_string())
            .await
            .expect("failed to start in-memory surrealdb");
        ensure_runtime_indexes(&db, DIM)
            .await
            .expect("failed to build indexes");
        db
    }

    fn ipc_input() -> DocumentInput {
        DocumentInput {
            id: "ipc_section_302".to_string(),
            source: "Indian Penal Code".to_string(),
            content: "Section 302\nWhoever commits murder shall be punished with death, or \
                      imprisonment for life, and shall also be liable to fine."
                .to_string(),
            doc_type: DocumentType::Act,
            jurisdiction: "india".to_string(),
            year: Some(1860),
        }
    }

    #[tokio::test]
    async fn ingestion_persists_document_chunks_and_graph() {
        let db = memory_db("ingest_full").await;
        let embedder = EmbeddingProvider::new_hashed(DIM).expect("hashed provider");

        let report = ingest_document(&db, &embedder, ipc_input())
            .await
            .expect("ingestion failed");

        assert_eq!(report.document_id, "ipc_section_302");
        assert_eq!(report.chunks, 1);
        assert!(report.entities >= 1);

        let document: Option<LegalDocument> = db
            .get_item("ipc_section_302")
            .await
            .expect("select failed");
        let document = document.expect("document missing");
        assert_eq!(document.category, "criminal");

        let chunks = DocumentChunk::find_by_document_id("ipc_section_302", &db)
            .await
            .expect("query failed");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].parent_section.as_deref(), Some("Section 302"));

        let edges = GraphRelationship::find_by_predicate(PREDICATE_PRESCRIBES_PENALTY, &db)
            .await
            .expect("edge query failed");
        assert_eq!(edges.len(), 1);
    }

    #[tokio::test]
    async fn re_ingestion_replaces_instead_of_duplicating() {
        let db = memory_db("ingest_idempotent").await;
        let embedder = EmbeddingProvider::new_hashed(DIM).expect("hashed provider");

        ingest_document(&db, &embedder, ipc_input())
            .await
            .expect("first ingestion failed");
        let mut updated = ipc_input();
        updated.content = "Section 302\nPunishment for murder, revised text.".to_string();
        ingest_document(&db, &embedder, updated)
            .await
            .expect("second ingestion failed");

        let chunks = DocumentChunk::find_by_document_id("ipc_section_302", &db)
            .await
            .expect("query failed");
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.contains("revised text"));

        let documents = db
            .get_all_stored_items::<LegalDocument>()
            .await
            .expect("select failed");
        assert_eq!(documents.len(), 1);
    }

    #[tokio::test]
    async fn neighbour_links_are_wired_on_multi_chunk_documents() {
        let db = memory_db("ingest_links").await;
        let embedder = EmbeddingProvider::new_hashed(DIM).expect("hashed provider");

        let body: String = (0..600).map(|i| format!("clause{i} ")).collect();
        let input = DocumentInput {
            id: "constitution_article_21".to_string(),
            source: "Constitution of India".to_string(),
            content: format!("Article 21\n{body}"),
            doc_type: DocumentType::Constitution,
            jurisdiction: "india".to_string(),
            year: Some(1950),
        };

        let report = ingest_document(&db, &embedder, input)
            .await
            .expect("ingestion failed");
        assert!(report.chunks > 1);

        let chunks = DocumentChunk::find_by_document_id("constitution_article_21", &db)
            .await
            .expect("query failed");
        assert_eq!(chunks[0].prev_chunk_id, None);
        assert_eq!(
            chunks[0].next_chunk_id.as_deref(),
            Some("constitution_article_21_chunk_1")
        );
        let last = chunks.last().expect("no chunks");
        assert_eq!(last.next_chunk_id, None);
        assert!(last.prev_chunk_id.is_some());
    }

    #[tokio::test]
    async fn empty_document_is_rejected() {
        let db = memory_db("ingest_empty").await;
        let embedder = EmbeddingProvider::new_hashed(DIM).expect("hashed provider");

        let input = DocumentInput {
            id: "blank".to_string(),
            source: "Nowhere".to_string(),
            content: "   \n ".to_string(),
            doc_type: DocumentType::Article,
            jurisdiction: "india".to_string(),
            year: None,
        };

        let error = ingest_document(&db, &embedder, input)
            .await
            .expect_err("empty document should be rejected");
        assert!(matches!(error, AppError::Validation(_)));
    }
}
