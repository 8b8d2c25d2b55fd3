//! Database models for forum threads.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::types::{ForumId, PostId, UserId};

/// New thread. `title` is plain text and `body_html` sanitized HTML.
#[derive(Debug, Clone)]
pub struct PostCreateDBRequest {
    pub forum_id: ForumId,
    pub author_id: UserId,
    pub title: String,
    pub body_html: String,
}

#[derive(Debug, Clone, Default)]
pub struct PostUpdateDBRequest {
    pub title: Option<String>,
    pub body_html: Option<String>,
}

/// Moderator flags; `None` leaves a flag unchanged
#[derive(Debug, Clone, Default)]
pub struct PostModerationDBRequest {
    pub is_pinned: Option<bool>,
    pub is_locked: Option<bool>,
    pub is_hidden: Option<bool>,
}

#[derive(Debug, Clone, FromRow)]
pub struct PostDBResponse {
    pub id: PostId,
    pub forum_id: ForumId,
    pub author_id: UserId,
    pub author_name: String,
    pub title: String,
    pub body_html: String,
    pub is_pinned: bool,
    pub is_locked: bool,
    pub is_hidden: bool,
    pub comment_count: i32,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PostFilter {
    pub skip: i64,
    pub limit: i64,
    pub forum_id: Option<ForumId>,
    pub include_hidden: bool,
}

impl PostFilter {
    pub fn new(skip: i64, limit: i64) -> Self {
        Self {
            skip,
            limit,
            forum_id: None,
            include_hidden: false,
        }
    }
}
