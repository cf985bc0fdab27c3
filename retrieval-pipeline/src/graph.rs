use std::collections::{HashMap, HashSet};

use tracing::debug;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            document_chunk::DocumentChunk,
            graph_entity::GraphEntity,
            graph_relationship::GraphRelationship,
            StoredObject,
        },
    },
};

use crate::scoring::{clamp_unit, Scored};

/// An entity reached during graph traversal, scored by edge weight decayed
/// with distance from the seed.
#[derive(Debug, Clone)]
pub struct GraphHit {
    pub entity: GraphEntity,
    pub score: f32,
    pub depth: usize,
}

/// Resolve entity mentions to stored graph entities. A mention matches when
/// the entity name contains it (case-insensitive).
pub async fn find_seed_entities(
    db: &SurrealDbClient,
    mentions: &[String],
    limit: usize,
) -> Result<Vec<GraphEntity>, AppError> {
    if mentions.is_empty() {
        return Ok(Vec::new());
    }

    let mut seeds: Vec<GraphEntity> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for mention in mentions {
        let mut response = db
            .query(
                "SELECT * FROM graph_entity \
                 WHERE string::lowercase(name) CONTAINS string::lowercase($mention) \
                 LIMIT $limit",
            )
            .bind(("mention", mention.clone()))
            .bind(("limit", limit as i64))
            .await?;
        let matches: Vec<GraphEntity> = response.take(0)?;
        for entity in matches {
            if seen.insert(entity.id.clone()) {
                seeds.push(entity);
            }
        }
        if seeds.len() >= limit {
            break;
        }
    }

    seeds.truncate(limit);
    Ok(seeds)
}

/// Breadth-first traversal over `relates_to`, bounded by `max_depth`.
/// Seeds carry full score; a neighbour at distance d scores
/// `edge_weight / (1 + d)`.
pub async fn traverse(
    db: &SurrealDbClient,
    seeds: Vec<GraphEntity>,
    max_depth: usize,
) -> Result<Vec<GraphHit>, AppError> {
    let mut visited: HashSet<String> = seeds.iter().map(|e| e.id.clone()).collect();
    let mut hits: Vec<GraphHit> = seeds
        .into_iter()
        .map(|entity| GraphHit {
            entity,
            score: 1.0,
            depth: 0,
        })
        .collect();

    let mut frontier: Vec<(String, f32)> = hits
        .iter()
        .map(|hit| (hit.entity.id.clone(), hit.score))
        .collect();

    for depth in 1..=max_depth {
        let mut next_frontier: Vec<(String, f32)> = Vec::new();

        for (entity_id, upstream_score) in frontier {
            let edges = GraphRelationship::edges_for_entity(&entity_id, db).await?;
            for edge in edges {
                let neighbour_id = if edge.in_ == entity_id {
                    edge.out.clone()
                } else {
                    edge.in_.clone()
                };
                if !visited.insert(neighbour_id.clone()) {
                    continue;
                }
                let Some(entity) = db.get_item::<GraphEntity>(&neighbour_id).await? else {
                    continue;
                };
                let score = clamp_unit(
                    upstream_score * edge.metadata.weight / (1.0 + depth as f32),
                );
                next_frontier.push((neighbour_id, score));
                hits.push(GraphHit {
                    entity,
                    score,
                    depth,
                });
            }
        }

        if next_frontier.is_empty() {
            break;
        }
        frontier = next_frontier;
    }

    Ok(hits)
}

/// Map graph hits back to document chunks; the chunk inherits the entity's
/// graph score. Hits without a document reference contribute nothing.
pub async fn chunks_for_hits(
    db: &SurrealDbClient,
    hits: &[GraphHit],
    max_chunks_per_entity: usize,
) -> Result<Vec<Scored<DocumentChunk>>, AppError> {
    let mut best: HashMap<String, Scored<DocumentChunk>> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for hit in hits {
        let Some(document_id) = hit.entity.document_id.as_deref() else {
            continue;
        };
        let chunks = DocumentChunk::find_by_document_id(document_id, db).await?;
        for chunk in chunks.into_iter().take(max_chunks_per_entity) {
            let id = chunk.get_id().to_owned();
            match best.get_mut(&id) {
                Some(existing) => {
                    let current = existing.scores.graph.unwrap_or(0.0);
                    if hit.score > current {
                        existing.scores.graph = Some(hit.score);
                    }
                }
                None => {
                    order.push(id.clone());
                    best.insert(id, Scored::new(chunk).with_graph_score(hit.score));
                }
            }
        }
    }

    let mut results: Vec<Scored<DocumentChunk>> = order
        .into_iter()
        .filter_map(|id| best.remove(&id))
        .collect();
    results.sort_by(|a, b| {
        b.scores
            .graph
            .unwrap_or(0.0)
            .partial_cmp(&a.scores.graph.unwrap_or(0.0))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.item.id.cmp(&b.item.id))
    });
    Ok(results)
}

/// Full graph retrieval strategy: mentions -> seeds -> bounded traversal ->
/// chunk mapping. Mentions come from the query filters.
pub async fn graph_search(
    db: &SurrealDbClient,
    mentions: &[String],
    seed_limit: usize,
    max_depth: usize,
    max_chunks_per_entity: usize,
) -> Result<Vec<Scored<DocumentChunk>>, AppError> {
    let seeds = find_seed_entities(db, mentions, seed_limit).await?;
    if seeds.is_empty() {
        debug!("no graph seeds matched the query");
        return Ok(Vec::new());
    }
    let hits = traverse(db, seeds, max_depth).await?;
    chunks_for_hits(db, &hits, max_chunks_per_entity).await
}
