use crate::storage::types::legal_document::deserialize_flexible_id;
use crate::{error::AppError, storage::db::SurrealDbClient};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RelationshipMetadata {
    pub document_id: Option<String>,
    pub predicate: String,
    pub weight: f32,
}

/// Weighted edge in the `relates_to` table, e.g.
/// `Article 19 -> GUARANTEES (0.95) -> Freedom of Speech` or
/// `Section 66A IT Act -> STRUCK_DOWN_BY (0.88) -> Shreya Singhal v. Union of India`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GraphRelationship {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub id: String,
    #[serde(rename = "in", deserialize_with = "deserialize_flexible_id")]
    pub in_: String,
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub out: String,
    pub metadata: RelationshipMetadata,
}

pub const PREDICATE_GUARANTEES: &str = "GUARANTEES";
pub const PREDICATE_STRUCK_DOWN_BY: &str = "STRUCK_DOWN_BY";
pub const PREDICATE_PRESCRIBES_PENALTY: &str = "PRESCRIBES_PENALTY";
pub const PREDICATE_INTERPRETED_BY: &str = "INTERPRETED_BY";

impl GraphRelationship {
    pub fn new(
        in_: String,
        out: String,
        predicate: String,
        weight: f32,
        document_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            in_,
            out,
            metadata: RelationshipMetadata {
                document_id,
                predicate,
                weight: weight.clamp(0.0, 1.0),
            },
        }
    }

    pub async fn store_relationship(&self, db_client: &SurrealDbClient) -> Result<(), AppError> {
        db_client
            .query("RELATE $in_entity->relates_to->$out_entity SET metadata = $metadata")
            .bind((
                "in_entity",
                Thing::from(("graph_entity", self.in_.as_str())),
            ))
            .bind((
                "out_entity",
                Thing::from(("graph_entity", self.out.as_str())),
            ))
            .bind(("metadata", self.metadata.clone()))
            .await?;

        Ok(())
    }

    pub async fn delete_by_document_id(
        document_id: &str,
        db_client: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db_client
            .query("DELETE relates_to WHERE metadata.document_id = $document_id")
            .bind(("document_id", document_id.to_owned()))
            .await?;

        Ok(())
    }

    /// All edges carrying the given predicate.
    pub async fn find_by_predicate(
        predicate: &str,
        db_client: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db_client
            .query("SELECT * FROM relates_to WHERE metadata.predicate = $predicate")
            .bind(("predicate", predicate.to_owned()))
            .await?;
        let edges: Vec<Self> = response.take(0)?;
        Ok(edges)
    }

    /// Edges touching the given entity in either direction.
    pub async fn edges_for_entity(
        entity_id: &str,
        db_client: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db_client
            .query("SELECT * FROM relates_to WHERE in = $entity OR out = $entity")
            .bind(("entity", Thing::from(("graph_entity", entity_id))))
            .await?;
        let edges: Vec<Self> = response.take(0)?;
        Ok(edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::graph_entity::{GraphEntity, GraphEntityType};

    async fn create_test_entity(name: &str, db_client: &SurrealDbClient) -> String {
        let entity = GraphEntity::new(
            name.to_string(),
            GraphEntityType::Concept,
            format!("Description for {name}"),
            None,
            vec![0.0; 8],
        );
        let id = entity.id.clone();
        db_client
            .store_item(entity)
            .await
            .expect("failed to store entity");
        id
    }

    #[test]
    fn weight_is_clamped_to_unit_interval() {
        let relationship = GraphRelationship::new(
            "a".to_string(),
            "b".to_string(),
            PREDICATE_GUARANTEES.to_string(),
            1.7,
            None,
        );
        assert!((relationship.metadata.weight - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn stored_edges_are_visible_in_both_directions() {
        let db = SurrealDbClient::memory("graph_rel_ns", &uuid::Uuid::new_v4().to_string())
            .await
            .expect("failed to start in-memory surrealdb");

        let article = create_test_entity("Article 19", &db).await;
        let concept = create_test_entity("Freedom of Speech", &db).await;

        GraphRelationship::new(
            article.clone(),
            concept.clone(),
            PREDICATE_GUARANTEES.to_string(),
            0.95,
            Some("constitution_article_19".to_string()),
        )
        .store_relationship(&db)
        .await
        .expect("failed to store relationship");

        let from_article = GraphRelationship::edges_for_entity(&article, &db)
            .await
            .expect("edge query failed");
        let from_concept = GraphRelationship::edges_for_entity(&concept, &db)
            .await
            .expect("edge query failed");

        assert_eq!(from_article.len(), 1);
        assert_eq!(from_concept.len(), 1);
        assert_eq!(from_article[0].metadata.predicate, PREDICATE_GUARANTEES);
    }

    #[tokio::test]
    async fn document_scoped_deletes_treat_ids_as_data() {
        let db = SurrealDbClient::memory("graph_rel_del_ns", &uuid::Uuid::new_v4().to_string())
            .await
            .expect("failed to start in-memory surrealdb");

        let section = create_test_entity("Section 66A", &db).await;
        let case = create_test_entity("Shreya Singhal v. Union of India", &db).await;
        let awkward_id = "doc'with\" quotes";

        GraphRelationship::new(
            section.clone(),
            case,
            PREDICATE_STRUCK_DOWN_BY.to_string(),
            0.88,
            Some(awkward_id.to_string()),
        )
        .store_relationship(&db)
        .await
        .expect("failed to store relationship");

        GraphRelationship::delete_by_document_id(awkward_id, &db)
            .await
            .expect("delete failed");

        let remaining = GraphRelationship::edges_for_entity(&section, &db)
            .await
            .expect("edge query failed");
        assert!(remaining.is_empty());
    }
}
