//! API request/response models for articles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::pagination::Pagination;
use crate::db::models::articles::ArticleDBResponse;
use crate::types::{AccessLevel, ArticleId, UserId};

/// Publication state of an article
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(type_name = "article_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ArticleStatus {
    Draft,
    Published,
    Archived,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ArticleCreate {
    pub title: String,
    pub summary: Option<String>,
    /// Rich text; sanitized before storage
    pub body: String,
    /// Defaults to `draft`
    pub status: Option<ArticleStatus>,
    /// Defaults to `public`
    pub visibility: Option<AccessLevel>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ArticleUpdate {
    /// Changing the title keeps the existing slug
    pub title: Option<String>,
    /// Explicit new slug; normalised the same way titles are
    pub slug: Option<String>,
    pub summary: Option<String>,
    pub body: Option<String>,
    pub status: Option<ArticleStatus>,
    pub visibility: Option<AccessLevel>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ArticleResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: ArticleId,
    #[schema(value_type = String, format = "uuid")]
    pub author_id: UserId,
    pub author_name: String,
    pub title: String,
    pub slug: String,
    pub summary: Option<String>,
    pub body_html: String,
    pub status: ArticleStatus,
    pub visibility: AccessLevel,
    pub tags: Vec<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ArticleDBResponse> for ArticleResponse {
    fn from(db: ArticleDBResponse) -> Self {
        Self {
            id: db.id,
            author_id: db.author_id,
            author_name: db.author_name,
            title: db.title,
            slug: db.slug,
            summary: db.summary,
            body_html: db.body_html,
            status: db.status,
            visibility: db.visibility,
            tags: db.tags,
            published_at: db.published_at,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ListArticlesQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,

    /// Only honoured for editors; everyone else sees published articles
    pub status: Option<ArticleStatus>,

    /// Only articles carrying this tag
    pub tag: Option<String>,
}
