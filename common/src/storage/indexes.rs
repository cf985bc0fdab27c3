use crate::{error::AppError, storage::db::SurrealDbClient};

const FTS_ANALYZER_NAME: &str = "legal_en_fts_analyzer";

#[derive(Clone, Copy)]
struct HnswIndexSpec {
    index_name: &'static str,
    table: &'static str,
}

impl HnswIndexSpec {
    fn definition(&self, dimension: usize) -> String {
        format!(
            "DEFINE INDEX OVERWRITE {index} ON TABLE {table} \
             FIELDS embedding HNSW DIMENSION {dimension} DIST COSINE TYPE F32 EFC 100 M 8;",
            index = self.index_name,
            table = self.table,
            dimension = dimension,
        )
    }
}

#[derive(Clone, Copy)]
struct FtsIndexSpec {
    index_name: &'static str,
    table: &'static str,
    field: &'static str,
}

impl FtsIndexSpec {
    fn definition(&self) -> String {
        format!(
            "DEFINE INDEX IF NOT EXISTS {index} ON TABLE {table} FIELDS {field} \
             SEARCH ANALYZER {analyzer} BM25;",
            index = self.index_name,
            table = self.table,
            field = self.field,
            analyzer = FTS_ANALYZER_NAME,
        )
    }
}

const fn hnsw_index_specs() -> [HnswIndexSpec; 3] {
    [
        HnswIndexSpec {
            index_name: "idx_embedding_document_chunk",
            table: "document_chunk",
        },
        HnswIndexSpec {
            index_name: "idx_embedding_legal_document",
            table: "legal_document",
        },
        HnswIndexSpec {
            index_name: "idx_embedding_graph_entity",
            table: "graph_entity",
        },
    ]
}

const fn fts_index_specs() -> [FtsIndexSpec; 3] {
    [
        FtsIndexSpec {
            index_name: "idx_fts_document_chunk_content",
            table: "document_chunk",
            field: "content",
        },
        FtsIndexSpec {
            index_name: "idx_fts_graph_entity_name",
            table: "graph_entity",
            field: "name",
        },
        FtsIndexSpec {
            index_name: "idx_fts_graph_entity_description",
            table: "graph_entity",
            field: "description",
        },
    ]
}

/// Build runtime Surreal indexes (FTS + HNSW).
/// Idempotent: safe to call multiple times; HNSW definitions are overwritten
/// so a changed embedding dimension takes effect.
pub async fn ensure_runtime_indexes(
    db: &SurrealDbClient,
    embedding_dimension: usize,
) -> Result<(), AppError> {
    create_fts_analyzer(db).await?;

    for spec in hnsw_index_specs() {
        db.client.query(spec.definition(embedding_dimension)).await?;
    }
    for spec in fts_index_specs() {
        db.client.query(spec.definition()).await?;
    }

    Ok(())
}

/// FTS indexes over freshly written rows need an explicit rebuild on the
/// in-memory engine before search::score sees them.
pub async fn rebuild_fts_indexes(db: &SurrealDbClient) -> Result<(), AppError> {
    for spec in fts_index_specs() {
        db.client
            .query(format!(
                "REBUILD INDEX IF EXISTS {} ON {}",
                spec.index_name, spec.table
            ))
            .await?;
    }
    Ok(())
}

async fn create_fts_analyzer(db: &SurrealDbClient) -> Result<(), AppError> {
    let analyzer_query = format!(
        "DEFINE ANALYZER IF NOT EXISTS {analyzer}
            TOKENIZERS class
            FILTERS lowercase, ascii, snowball(english);",
        analyzer = FTS_ANALYZER_NAME
    );

    let res = db.client.query(analyzer_query).await?;
    res.check()
        .map_err(|err| AppError::InternalError(format!("failed to create FTS analyzer: {err}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn ensure_runtime_indexes_is_idempotent() {
        let db = SurrealDbClient::memory("idx_ns", &Uuid::new_v4().to_string())
            .await
            .expect("failed to start in-memory surrealdb");

        ensure_runtime_indexes(&db, 8)
            .await
            .expect("first index build failed");
        ensure_runtime_indexes(&db, 8)
            .await
            .expect("second index build failed");
        rebuild_fts_indexes(&db).await.expect("rebuild failed");
    }
}
