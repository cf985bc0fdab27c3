use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Constitution,
    Act,
    Judgment,
    Article,
}

impl DocumentType {
    pub fn variants() -> &'static [&'static str] {
        &["constitution", "act", "judgment", "article"]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Constitution => "constitution",
            DocumentType::Act => "act",
            DocumentType::Judgment => "judgment",
            DocumentType::Article => "article",
        }
    }
}

impl From<String> for DocumentType {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "constitution" => DocumentType::Constitution,
            "act" => DocumentType::Act,
            "judgment" => DocumentType::Judgment,
            _ => DocumentType::Article,
        }
    }
}

stored_object!(LegalDocument, "legal_document", {
    source: String,
    content: String,
    doc_type: DocumentType,
    jurisdiction: String,
    year: Option<i32>,
    category: String,
    tags: Vec<String>,
    embedding: Vec<f32>
});

impl LegalDocument {
    /// Document ids are caller-supplied and stable (e.g. `constitution_article_19`)
    /// so citations can refer to them across re-ingestions.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        source: String,
        content: String,
        doc_type: DocumentType,
        jurisdiction: String,
        year: Option<i32>,
        category: String,
        tags: Vec<String>,
        embedding: Vec<f32>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            source,
            content,
            doc_type,
            jurisdiction,
            year,
            category,
            tags,
            embedding,
        }
    }

    pub async fn find_by_category(
        category: &str,
        db_client: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db_client
            .query(format!(
                "SELECT * FROM {} WHERE category = $category",
                Self::table_name()
            ))
            .bind(("category", category.to_owned()))
            .await?;
        let documents: Vec<Self> = response.take(0)?;
        Ok(documents)
    }
}
