//! Content store data model: `Document`, `Version`, and `Dependency`. These
//! three types are owned exclusively by this crate — every other crate only
//! ever sees them through `ContentStore`'s methods.

use chrono::{DateTime, Utc};
use isocrates_common::AuthorType;
use serde::{Deserialize, Serialize};

pub const CONTENT_PREVIEW_LENGTH: usize = 500;

/// Truncate content to the stored preview length, on a char boundary.
pub fn generate_content_preview(content: &str) -> String {
    if content.chars().count() <= CONTENT_PREVIEW_LENGTH {
        return content.to_string();
    }
    content.chars().take(CONTENT_PREVIEW_LENGTH).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub repo_url: Option<String>,
    pub repo_name: Option<String>,
    pub doc_type: Option<String>,
    pub path: String,
    pub title: String,
    pub content: String,
    pub content_preview: String,
    pub description: Option<String>,
    pub keywords: Vec<String>,
    pub version: i32,
    pub generation_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub embedding_model: Option<String>,
}

impl Document {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version {
    pub id: String,
    pub doc_id: String,
    pub content: String,
    pub content_hash: String,
    pub author_type: AuthorType,
    pub author_metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependency {
    pub from_doc_id: String,
    pub to_doc_id: String,
    pub link_type: String,
    pub link_text: String,
    pub section: Option<String>,
}

/// Input to `ContentStore::create_or_update`.
#[derive(Debug, Clone)]
pub struct DocumentWrite {
    pub repo_url: Option<String>,
    pub repo_name: Option<String>,
    pub doc_type: Option<String>,
    pub path: String,
    pub title: String,
    pub content: String,
    pub description: Option<String>,
    pub keywords: Vec<String>,
    pub author_type: AuthorType,
    pub author_metadata: serde_json::Value,
}

/// Input to `ContentStore::update`.
#[derive(Debug, Clone)]
pub struct DocumentUpdate {
    pub content: String,
    pub description: Option<String>,
    pub version: Option<i32>,
    pub author_type: AuthorType,
    pub author_metadata: serde_json::Value,
}
