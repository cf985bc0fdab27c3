use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            graph_entity::{GraphEntity, GraphEntityType},
            graph_relationship::{
                GraphRelationship, PREDICATE_GUARANTEES, PREDICATE_INTERPRETED_BY,
                PREDICATE_PRESCRIBES_PENALTY, PREDICATE_STRUCK_DOWN_BY,
            },
        },
    },
    utils::embedding::EmbeddingProvider,
};

/// Co-mention of a provision and a judgment in the same chunk.
const INTERPRETED_BY_WEIGHT: f32 = 0.7;
/// A provision stating its own punishment.
const PRESCRIBES_PENALTY_WEIGHT: f32 = 0.75;

static SECTION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bsection\s+(\d+[A-Z]?)").unwrap_or_else(|_| unreachable!())
});
static ARTICLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\barticle\s+(\d+)").unwrap_or_else(|_| unreachable!()));
static CASE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([A-Z][\w.]*(?:\s+[A-Z][\w.]*)*)\s+v\.?\s+([A-Z][\w.]*(?:\s+[\w.]+)*)")
        .unwrap_or_else(|_| unreachable!())
});
static PENALTY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(punish(?:ed|able|ment)|imprisonment|fine|death\s+penalty)\b")
        .unwrap_or_else(|_| unreachable!())
});

#[derive(Debug, Clone, PartialEq)]
pub struct EntityMention {
    pub name: String,
    pub entity_type: GraphEntityType,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GraphUpdate {
    pub entities: usize,
    pub relationships: usize,
}

/// Pull statute sections, constitution articles and case names out of a chunk.
pub fn extract_entities(text: &str) -> Vec<EntityMention> {
    let mut mentions = Vec::new();
    let mut seen = HashSet::new();

    for capture in SECTION_PATTERN.captures_iter(text) {
        if let Some(number) = capture.get(1) {
            let name = format!("Section {}", number.as_str().to_uppercase());
            if seen.insert(name.to_lowercase()) {
                mentions.push(EntityMention {
                    name,
                    entity_type: GraphEntityType::StatuteSection,
                });
            }
        }
    }
    for capture in ARTICLE_PATTERN.captures_iter(text) {
        if let Some(number) = capture.get(1) {
            let name = format!("Article {}", number.as_str());
            if seen.insert(name.to_lowercase()) {
                mentions.push(EntityMention {
                    name,
                    entity_type: GraphEntityType::ConstitutionArticle,
                });
            }
        }
    }
    for capture in CASE_PATTERN.captures_iter(text) {
        if let Some(full) = capture.get(0) {
            let name = full.as_str().trim().to_string();
            if seen.insert(name.to_lowercase()) {
                mentions.push(EntityMention {
                    name,
                    entity_type: GraphEntityType::Case,
                });
            }
        }
    }

    mentions
}

fn is_provision(entity_type: &GraphEntityType) -> bool {
    matches!(
        entity_type,
        GraphEntityType::StatuteSection | GraphEntityType::ConstitutionArticle
    )
}

async fn edge_exists(
    db: &SurrealDbClient,
    in_: &str,
    out: &str,
    predicate: &str,
) -> Result<bool, AppError> {
    let edges = GraphRelationship::find_by_predicate(predicate, db).await?;
    Ok(edges
        .iter()
        .any(|edge| edge.in_ == in_ && edge.out == out))
}

async fn store_edge_once(
    db: &SurrealDbClient,
    in_: &str,
    out: &str,
    predicate: &str,
    weight: f32,
    document_id: Option<&str>,
) -> Result<bool, AppError> {
    if edge_exists(db, in_, out, predicate).await? {
        return Ok(false);
    }
    GraphRelationship::new(
        in_.to_string(),
        out.to_string(),
        predicate.to_string(),
        weight,
        document_id.map(str::to_owned),
    )
    .store_relationship(db)
    .await?;
    Ok(true)
}

/// Extract entities from a chunk, upsert them, and wire co-mention edges:
/// a provision co-mentioned with a case is `INTERPRETED_BY` it, and a
/// provision whose chunk speaks of punishment gets a `PRESCRIBES_PENALTY`
/// edge to a shared Penalty node.
pub async fn update_graph_for_chunk(
    db: &SurrealDbClient,
    embedder: &EmbeddingProvider,
    document_id: &str,
    chunk_content: &str,
) -> Result<GraphUpdate, AppError> {
    let mentions = extract_entities(chunk_content);
    if mentions.is_empty() {
        return Ok(GraphUpdate::default());
    }

    let mut update = GraphUpdate::default();
    let mut stored: Vec<(GraphEntity, GraphEntityType)> = Vec::new();
    for mention in mentions {
        let embedding = match embedder.embed(&mention.name).await {
            Ok(embedding) => embedding,
            Err(error) => {
                warn!(name = %mention.name, %error, "skipping entity, embedding failed");
                continue;
            }
        };
        let entity = GraphEntity::find_or_create(
            mention.name.clone(),
            mention.entity_type.clone(),
            format!("Mentioned in {document_id}"),
            Some(document_id.to_string()),
            embedding,
            db,
        )
        .await?;
        update.entities += 1;
        stored.push((entity, mention.entity_type));
    }

    for (provision, provision_type) in &stored {
        if !is_provision(provision_type) {
            continue;
        }
        for (case, case_type) in &stored {
            if !matches!(case_type, GraphEntityType::Case) {
                continue;
            }
            if store_edge_once(
                db,
                &provision.id,
                &case.id,
                PREDICATE_INTERPRETED_BY,
                INTERPRETED_BY_WEIGHT,
                Some(document_id),
            )
            .await?
            {
                update.relationships += 1;
            }
        }
    }

    if PENALTY_PATTERN.is_match(chunk_content) {
        if let Some((provision, _)) = stored
            .iter()
            .find(|(_, entity_type)| is_provision(entity_type))
        {
            let penalty = GraphEntity::find_or_create(
                "Penalty".to_string(),
                GraphEntityType::Penalty,
                "Statutory punishment".to_string(),
                None,
                embedder.embed("Penalty").await.map_err(|error| {
                    AppError::InternalError(format!("embedding failed: {error}"))
                })?,
                db,
            )
            .await?;
            if store_edge_once(
                db,
                &provision.id,
                &penalty.id,
                PREDICATE_PRESCRIBES_PENALTY,
                PRESCRIBES_PENALTY_WEIGHT,
                Some(document_id),
            )
            .await?
            {
                update.relationships += 1;
            }
        }
    }

    debug!(
        document_id,
        entities = update.entities,
        relationships = update.relationships,
        "graph updated for chunk"
    );
    Ok(update)
}

/// Canonical edges that regex co-mention extraction cannot infer. Idempotent,
/// safe to run on every startup and after every ingestion batch.
pub async fn seed_known_relationships(
    db: &SurrealDbClient,
    embedder: &EmbeddingProvider,
) -> Result<usize, AppError> {
    let mut seeded = 0usize;

    let embed = |text: String| async move {
        embedder
            .embed(&text)
            .await
            .map_err(|error| AppError::InternalError(format!("embedding failed: {error}")))
    };

    let article_19 = GraphEntity::find_or_create(
        "Article 19".to_string(),
        GraphEntityType::ConstitutionArticle,
        "Protection of certain rights regarding freedom of speech".to_string(),
        Some("constitution_article_19".to_string()),
        embed("Article 19".to_string()).await?,
        db,
    )
    .await?;
    let free_speech = GraphEntity::find_or_create(
        "Freedom of Speech".to_string(),
        GraphEntityType::Concept,
        "Fundamental right to free expression".to_string(),
        None,
        embed("Freedom of Speech".to_string()).await?,
        db,
    )
    .await?;
    if store_edge_once(
        db,
        &article_19.id,
        &free_speech.id,
        PREDICATE_GUARANTEES,
        0.95,
        Some("constitution_article_19"),
    )
    .await?
    {
        seeded += 1;
    }

    let section_66a = GraphEntity::find_or_create(
        "Section 66A".to_string(),
        GraphEntityType::StatuteSection,
        "Offensive electronic messages, Information Technology Act".to_string(),
        Some("it_act_section_66a".to_string()),
        embed("Section 66A".to_string()).await?,
        db,
    )
    .await?;
    let shreya_singhal = GraphEntity::find_or_create(
        "Shreya Singhal v. Union of India".to_string(),
        GraphEntityType::Case,
        "2015 judgment striking down Section 66A".to_string(),
        None,
        embed("Shreya Singhal v. Union of India".to_string()).await?,
        db,
    )
    .await?;
    if store_edge_once(
        db,
        &section_66a.id,
        &shreya_singhal.id,
        PREDICATE_STRUCK_DOWN_BY,
        0.88,
        Some("it_act_section_66a"),
    )
    .await?
    {
        seeded += 1;
    }

    Ok(seeded)
}
