//! Database models for articles.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::api::models::articles::ArticleStatus;
use crate::types::{AccessLevel, ArticleId, UserId};

/// Article to insert. `body_html` must already be sanitized and `slug` is the preferred slug,
/// which gets a numeric suffix if taken.
#[derive(Debug, Clone)]
pub struct ArticleCreateDBRequest {
    pub author_id: UserId,
    pub title: String,
    pub slug: String,
    pub summary: Option<String>,
    pub body_html: String,
    pub status: ArticleStatus,
    pub visibility: AccessLevel,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ArticleUpdateDBRequest {
    pub title: Option<String>,
    pub slug: Option<String>,
    pub summary: Option<String>,
    pub body_html: Option<String>,
    pub status: Option<ArticleStatus>,
    pub visibility: Option<AccessLevel>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ArticleDBResponse {
    pub id: ArticleId,
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

#[derive(Debug, Clone)]
pub struct ArticleFilter {
    pub skip: i64,
    pub limit: i64,
    pub status: Option<ArticleStatus>,
    /// Hide articles whose visibility is above this level
    pub max_visibility: Option<AccessLevel>,
    pub tag: Option<String>,
}

impl ArticleFilter {
    pub fn new(skip: i64, limit: i64) -> Self {
        Self {
            skip,
            limit,
            status: None,
            max_visibility: None,
            tag: None,
        }
    }
}
