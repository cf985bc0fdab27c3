use std::collections::HashMap;

use serde::Deserialize;
use tracing::debug;

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::StoredObject},
};

use crate::scoring::Scored;
use common::storage::types::legal_document::deserialize_flexible_id;
use surrealdb::sql::Thing;

#[derive(Debug, Deserialize)]
struct FtsScoreRow {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    id: String,
    fts_score: Option<f32>,
}

/// Executes a full-text search query against SurrealDB and returns scored results.
///
/// The function expects FTS indexes to exist for the provided table. Currently supports
/// `document_chunk` (content) and `graph_entity` (name + description).
pub async fn find_items_by_fts<T>(
    take: usize,
    query: &str,
    db_client: &SurrealDbClient,
    table: &str,
) -> Result<Vec<Scored<T>>, AppError>
where
    T: for<'de> serde::Deserialize<'de> + StoredObject,
{
    let (filter_clause, score_clause) = match table {
        "graph_entity" => (
            "(name @0@ $terms OR description @1@ $terms)",
            "(IF search::score(0) != NONE THEN search::score(0) ELSE 0 END) + \
             (IF search::score(1) != NONE THEN search::score(1) ELSE 0 END)",
        ),
        "document_chunk" => (
            "(content @0@ $terms)",
            "IF search::score(0) != NONE THEN search::score(0) ELSE 0 END",
        ),
        _ => {
            return Err(AppError::Validation(format!(
                "FTS not configured for table '{table}'"
            )))
        }
    };

    let sql = format!(
        "SELECT id, {score_clause} AS fts_score \
         FROM {table} \
         WHERE {filter_clause} \
         ORDER BY fts_score DESC \
         LIMIT $limit",
        table = table,
        filter_clause = filter_clause,
        score_clause = score_clause
    );

    debug!(
        table = table,
        limit = take,
        "Executing FTS query with filter clause: {}",
        filter_clause
    );

    let mut response = db_client
        .query(sql)
        .bind(("terms", query.to_owned()))
        .bind(("limit", take as i64))
        .await?;

    let score_rows: Vec<FtsScoreRow> = response.take(0)?;

    if score_rows.is_empty() {
        return Ok(Vec::new());
    }

    let thing_ids: Vec<Thing> = score_rows
        .iter()
        .map(|row| Thing::from((table, row.id.as_str())))
        .collect();

    let mut items_response = db_client
        .query("SELECT * FROM type::table($table) WHERE id IN $things")
        .bind(("table", table.to_owned()))
        .bind(("things", thing_ids))
        .await?;

    let items: Vec<T> = items_response.take(0)?;

    let mut item_map: HashMap<String, T> = items
        .into_iter()
        .map(|item| (item.get_id().to_owned(), item))
        .collect();

    let mut results = Vec::with_capacity(score_rows.len());
    for row in score_rows {
        if let Some(item) = item_map.remove(&row.id) {
            let score = row.fts_score.unwrap_or_default();
            results.push(Scored::new(item).with_fts_score(score));
        }
    }

    Ok(results)
}
