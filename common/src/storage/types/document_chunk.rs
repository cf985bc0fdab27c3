use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::legal_document::DocumentType;

stored_object!(DocumentChunk, "document_chunk", {
    document_id: String,
    chunk_index: u32,
    content: String,
    prev_chunk_id: Option<String>,
    next_chunk_id: Option<String>,
    parent_section: Option<String>,
    source: String,
    doc_type: DocumentType,
    embedding: Vec<f32>
});

impl DocumentChunk {
    /// Chunk ids are derived from the parent document id and the chunk index so
    /// neighbour links can be computed without a lookup.
    pub fn chunk_id(document_id: &str, chunk_index: u32) -> String {
        format!("{document_id}_chunk_{chunk_index}")
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        document_id: String,
        chunk_index: u32,
        content: String,
        parent_section: Option<String>,
        source: String,
        doc_type: DocumentType,
        embedding: Vec<f32>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Self::chunk_id(&document_id, chunk_index),
            created_at: now,
            updated_at: now,
            document_id,
            chunk_index,
            content,
            prev_chunk_id: None,
            next_chunk_id: None,
            parent_section,
            source,
            doc_type,
            embedding,
        }
    }

    pub async fn delete_by_document_id(
        document_id: &str,
        db_client: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let query = format!(
            "DELETE {} WHERE document_id = '{}'",
            Self::table_name(),
            document_id
        );
        db_client.query(query).await?;

        Ok(())
    }

    pub async fn find_by_document_id(
        document_id: &str,
        db_client: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db_client
            .query(format!(
                "SELECT * FROM {} WHERE document_id = $document_id ORDER BY chunk_index",
                Self::table_name()
            ))
            .bind(("document_id", document_id.to_owned()))
            .await?;
        let chunks: Vec<Self> = response.take(0)?;
        Ok(chunks)
    }
}
