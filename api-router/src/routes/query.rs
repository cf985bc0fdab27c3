use axum::{extract::State, Json};
use generation_pipeline::{answer_query, Answer, AnswerOptions};
use serde::Deserialize;
use tracing::warn;

use crate::{api_state::ApiState, error::ApiError};

/// Callers may request up to this many chunks per answer.
const MAX_TOP_K: usize = 50;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub use_corrective_rag: Option<bool>,
    #[serde(default)]
    pub use_self_reflection: Option<bool>,
    #[serde(default)]
    pub detect_hallucinations: Option<bool>,
    #[serde(default)]
    pub top_k: Option<usize>,
}

impl QueryRequest {
    fn validate(&self) -> Result<(), ApiError> {
        if self.query.trim().is_empty() {
            return Err(ApiError::ValidationError(
                "query must not be empty".to_string(),
            ));
        }
        if let Some(top_k) = self.top_k {
            if top_k == 0 || top_k > MAX_TOP_K {
                return Err(ApiError::ValidationError(format!(
                    "top_k must be within 1..={MAX_TOP_K}"
                )));
            }
        }
        Ok(())
    }

    fn options(&self) -> AnswerOptions {
        let defaults = AnswerOptions::default();
        AnswerOptions {
            use_corrective_rag: self.use_corrective_rag.unwrap_or(defaults.use_corrective_rag),
            use_self_reflection: self
                .use_self_reflection
                .unwrap_or(defaults.use_self_reflection),
            detect_hallucinations: self
                .detect_hallucinations
                .unwrap_or(defaults.detect_hallucinations),
            top_k: self.top_k,
        }
    }
}

/// Answer a legal research question. A refusal for lack of evidence is a
/// 200 with `confidence` 0 and an "insufficient evidence" flag, not an error.
pub async fn post_query(
    State(state): State<ApiState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<Answer>, ApiError> {
    request.validate()?;

    // A pool under pressure degrades to blended-score ordering rather than
    // failing the request.
    let lease = match &state.reranker {
        Some(pool) => match pool.checkout().await {
            Ok(lease) => Some(lease),
            Err(error) => {
                warn!(%error, "reranker checkout failed, serving without rerank");
                None
            }
        },
        None => None,
    };

    let answer = answer_query(
        &state.db,
        &state.llm,
        &state.embedder,
        lease,
        &state.config,
        request.query.trim(),
        request.options(),
    )
    .await?;

    Ok(Json(answer))
}
