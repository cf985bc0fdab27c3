use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

stored_object!(QueryRecord, "query_record", {
    query: String,
    answer: String,
    confidence: f32,
    hallucination_score: f32,
    is_safe: bool,
    corrective_rounds: u32,
    degraded: bool,
    processing_time_ms: u64,
    retrieval_time_ms: u64,
    generation_time_ms: u64
});

impl QueryRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        query: String,
        answer: String,
        confidence: f32,
        hallucination_score: f32,
        is_safe: bool,
        corrective_rounds: u32,
        degraded: bool,
        processing_time_ms: u64,
        retrieval_time_ms: u64,
        generation_time_ms: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            query,
            answer,
            confidence,
            hallucination_score,
            is_safe,
            corrective_rounds,
            degraded,
            processing_time_ms,
            retrieval_time_ms,
            generation_time_ms,
        }
    }

    /// History is append-only: records are stored once and never mutated.
    pub async fn append(&self, db_client: &SurrealDbClient) -> Result<(), AppError> {
        db_client.store_item(self.clone()).await?;
        Ok(())
    }

    pub async fn recent(limit: usize, db_client: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let mut response = db_client
            .query(format!(
                "SELECT * FROM {} ORDER BY created_at DESC LIMIT $limit",
                Self::table_name()
            ))
            .bind(("limit", limit as i64))
            .await?;
        let records: Vec<Self> = response.take(0)?;
        Ok(records)
    }
}
