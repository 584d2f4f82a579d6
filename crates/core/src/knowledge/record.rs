use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const INDEX_FILE_NAME: &str = "vector_data.json";

/// Origin of a knowledge document.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Architecture,
    Blueprint,
    Chapter,
    CharacterState,
    GlobalSummary,
    Knowledge,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    #[serde(rename = "type")]
    pub doc_type: DocumentType,
    #[serde(alias = "novelId")]
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl DocumentMetadata {
    pub fn new(doc_type: DocumentType, project_id: impl Into<String>) -> Self {
        Self {
            doc_type,
            project_id: project_id.into(),
            chapter_number: None,
            filename: None,
        }
    }

    pub fn with_chapter(mut self, chapter_number: u32) -> Self {
        self.chapter_number = Some(chapter_number);
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

/// A retrieved document. `score` is the cosine similarity when the hit came
/// from a vector strategy and `None` for plain text matches.
#[derive(Clone, Debug, PartialEq)]
pub struct KnowledgeDocument {
    pub content: String,
    pub metadata: DocumentMetadata,
    pub score: Option<f32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct StoredDocument {
    #[serde(rename = "pageContent")]
    pub content: String,
    pub metadata: DocumentMetadata,
    #[serde(default)]
    pub vector: Vec<f32>,
}

impl StoredDocument {
    pub fn to_document(&self, score: Option<f32>) -> KnowledgeDocument {
        KnowledgeDocument {
            content: self.content.clone(),
            metadata: self.metadata.clone(),
            score,
        }
    }
}

/// On-disk layout of `vector_data.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IndexFile {
    #[serde(alias = "novelId")]
    pub project_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub documents: Vec<StoredDocument>,
}

impl IndexFile {
    pub fn empty(project_id: &str, embedding_model: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            project_id: project_id.to_string(),
            created_at: now,
            updated_at: now,
            embedding_model,
            documents: Vec::new(),
        }
    }

    /// Dimension shared by the stored vectors, if any are stored.
    pub fn dimension(&self) -> Option<usize> {
        self.documents
            .iter()
            .map(|doc| doc.vector.len())
            .find(|len| *len > 0)
    }
}
