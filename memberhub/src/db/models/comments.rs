//! Database models for comments on forum threads and articles.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::types::{ArticleId, CommentId, PostId, UserId};

/// What a comment is attached to. Exactly one of `post_id`/`article_id` is set per row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentTarget {
    Post(PostId),
    Article(ArticleId),
}

impl CommentTarget {
    pub fn post_id(&self) -> Option<PostId> {
        match self {
            CommentTarget::Post(id) => Some(*id),
            CommentTarget::Article(_) => None,
        }
    }

    pub fn article_id(&self) -> Option<ArticleId> {
        match self {
            CommentTarget::Article(id) => Some(*id),
            CommentTarget::Post(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommentCreateDBRequest {
    pub target: CommentTarget,
    pub author_id: UserId,
    pub body_html: String,
}

#[derive(Debug, Clone)]
pub struct CommentUpdateDBRequest {
    pub body_html: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct CommentDBResponse {
    pub id: CommentId,
    pub post_id: Option<PostId>,
    pub article_id: Option<ArticleId>,
    pub author_id: UserId,
    pub author_name: String,
    pub body_html: String,
    pub is_hidden: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CommentDBResponse {
    pub fn target(&self) -> Option<CommentTarget> {
        match (self.post_id, self.article_id) {
            (Some(post_id), None) => Some(CommentTarget::Post(post_id)),
            (None, Some(article_id)) => Some(CommentTarget::Article(article_id)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommentFilter {
    pub target: CommentTarget,
    pub skip: i64,
    pub limit: i64,
    pub include_hidden: bool,
}

impl CommentFilter {
    pub fn new(target: CommentTarget, skip: i64, limit: i64) -> Self {
        Self {
            target,
            skip,
            limit,
            include_hidden: false,
        }
    }
}
