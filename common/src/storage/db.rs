use crate::error::AppError;

use super::types::StoredObject;
use serde::Deserialize;
use std::{collections::HashMap, ops::Deref};
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};
use tracing::debug;

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

/// One row of the store-level hybrid search over `document_chunk`.
///
/// `dense_score` and `fts_score` are min-max normalized within the result set;
/// a chunk found by only one side carries 0.0 for the other.
#[derive(Debug, Clone, PartialEq)]
pub struct HybridSearchRow {
    pub chunk_id: String,
    pub doc_id: String,
    pub source: String,
    pub content: String,
    pub dense_score: f32,
    pub fts_score: f32,
    pub final_score: f32,
}

#[derive(Debug, Deserialize)]
struct DenseRow {
    #[serde(deserialize_with = "super::types::legal_document::deserialize_flexible_id")]
    id: String,
    document_id: String,
    source: String,
    content: String,
    distance: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct FtsRow {
    #[serde(deserialize_with = "super::types::legal_document::deserialize_flexible_id")]
    id: String,
    document_id: String,
    source: String,
    content: String,
    fts_score: Option<f32>,
}

impl SurrealDbClient {
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        // Sign in to database
        db.signin(Root { username, password }).await?;

        // Set namespace
        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// Operation to store a object in SurrealDB, requires the struct to implement StoredObject
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    /// Operation to retrieve all objects from a certain table
    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select(T::table_name()).await
    }

    /// Operation to retrieve a single object by its ID
    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }

    /// Operation to delete a single object by its ID
    pub async fn delete_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.delete((T::table_name(), id)).await
    }

    /// Weighted dense + sparse search over `document_chunk`, joined full-outer
    /// by chunk id. Both sides are normalized before mixing so the weights act
    /// on comparable ranges.
    pub async fn hybrid_search(
        &self,
        query_embedding: Vec<f32>,
        query_text: &str,
        top_k: usize,
        dense_weight: f32,
        fts_weight: f32,
    ) -> Result<Vec<HybridSearchRow>, AppError> {
        if top_k == 0 {
            return Err(AppError::Config("hybrid_search top_k must be >= 1".into()));
        }

        let dense_query = format!(
            "SELECT id, document_id, source, content, vector::distance::knn() AS distance \
             FROM document_chunk \
             WHERE embedding <|{top_k},40|> $embedding \
             ORDER BY distance"
        );
        let mut dense_response = self
            .client
            .query(dense_query)
            .bind(("embedding", query_embedding))
            .await?;
        let dense_rows: Vec<DenseRow> = dense_response.take(0)?;

        let mut fts_response = self
            .client
            .query(
                "SELECT id, document_id, source, content, \
                 (IF search::score(0) != NONE THEN search::score(0) ELSE 0 END) AS fts_score \
                 FROM document_chunk \
                 WHERE content @0@ $terms \
                 ORDER BY fts_score DESC \
                 LIMIT $limit",
            )
            .bind(("terms", query_text.to_owned()))
            .bind(("limit", top_k as i64))
            .await?;
        let fts_rows: Vec<FtsRow> = fts_response.take(0)?;

        debug!(
            dense_hits = dense_rows.len(),
            fts_hits = fts_rows.len(),
            "hybrid search collected both sides"
        );

        Ok(join_hybrid_sides(
            dense_rows,
            fts_rows,
            top_k,
            dense_weight,
            fts_weight,
        ))
    }
}

/// Full outer join of the dense and sparse result sets with weighted mixing.
fn join_hybrid_sides(
    dense_rows: Vec<DenseRow>,
    fts_rows: Vec<FtsRow>,
    top_k: usize,
    dense_weight: f32,
    fts_weight: f32,
) -> Vec<HybridSearchRow> {
    let dense_similarities: Vec<f32> = dense_rows
        .iter()
        .map(|row| 1.0 / (1.0 + row.distance.unwrap_or(f32::MAX).max(0.0)))
        .collect();
    let dense_norm = min_max(&dense_similarities);
    let fts_scores: Vec<f32> = fts_rows
        .iter()
        .map(|row| row.fts_score.unwrap_or_default())
        .collect();
    let fts_norm = min_max(&fts_scores);

    let mut joined: HashMap<String, HybridSearchRow> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for (row, score) in dense_rows.into_iter().zip(dense_norm) {
        order.push(row.id.clone());
        joined.insert(
            row.id.clone(),
            HybridSearchRow {
                chunk_id: row.id,
                doc_id: row.document_id,
                source: row.source,
                content: row.content,
                dense_score: score,
                fts_score: 0.0,
                final_score: 0.0,
            },
        );
    }
    for (row, score) in fts_rows.into_iter().zip(fts_norm) {
        if let Some(existing) = joined.get_mut(&row.id) {
            existing.fts_score = score;
        } else {
            order.push(row.id.clone());
            joined.insert(
                row.id.clone(),
                HybridSearchRow {
                    chunk_id: row.id,
                    doc_id: row.document_id,
                    source: row.source,
                    content: row.content,
                    dense_score: 0.0,
                    fts_score: score,
                    final_score: 0.0,
                },
            );
        }
    }

    let mut rows: Vec<HybridSearchRow> = order
        .into_iter()
        .filter_map(|id| joined.remove(&id))
        .map(|mut row| {
            row.final_score = dense_weight * row.dense_score + fts_weight * row.fts_score;
            row
        })
        .collect();

    rows.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    rows.truncate(top_k);
    rows
}

fn min_max(values: &[f32]) -> Vec<f32> {
    let Some(max) = values.iter().copied().reduce(f32::max) else {
        return Vec::new();
    };
    let min = values.iter().copied().fold(max, f32::min);
    let range = max - min;
    if range <= f32::EPSILON {
        // A single hit (or identical scores) still counts as a full-strength match.
        return values.iter().map(|_| 1.0).collect();
    }
    values.iter().map(|v| (v - min) / range).collect()
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}
