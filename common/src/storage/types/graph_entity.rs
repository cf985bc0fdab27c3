use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum GraphEntityType {
    StatuteSection,
    ConstitutionArticle,
    Case,
    Concept,
    Penalty,
}

impl From<String> for GraphEntityType {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "statute_section" => GraphEntityType::StatuteSection,
            "constitution_article" => GraphEntityType::ConstitutionArticle,
            "case" => GraphEntityType::Case,
            "penalty" => GraphEntityType::Penalty,
            _ => GraphEntityType::Concept,
        }
    }
}

stored_object!(GraphEntity, "graph_entity", {
    name: String,
    entity_type: GraphEntityType,
    description: String,
    // Weak reference: the entity outlives the document it was extracted from.
    document_id: Option<String>,
    embedding: Vec<f32>
});

impl GraphEntity {
    pub fn new(
        name: String,
        entity_type: GraphEntityType,
        description: String,
        document_id: Option<String>,
        embedding: Vec<f32>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            name,
            entity_type,
            description,
            document_id,
            embedding,
        }
    }

    pub async fn find_by_name(
        name: &str,
        db_client: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db_client
            .query(format!(
                "SELECT * FROM {} WHERE string::lowercase(name) = string::lowercase($name) LIMIT 1",
                Self::table_name()
            ))
            .bind(("name", name.to_owned()))
            .await?;
        let entity: Option<Self> = response.take(0)?;
        Ok(entity)
    }

    /// Upsert by name so repeated ingestion of overlapping documents does not
    /// duplicate the graph.
    pub async fn find_or_create(
        name: String,
        entity_type: GraphEntityType,
        description: String,
        document_id: Option<String>,
        embedding: Vec<f32>,
        db_client: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        if let Some(existing) = Self::find_by_name(&name, db_client).await? {
            return Ok(existing);
        }
        let entity = Self::new(name, entity_type, description, document_id, embedding);
        let stored = db_client.store_item(entity).await?;
        stored.ok_or_else(|| AppError::InternalError("failed to store graph entity".into()))
    }
}
