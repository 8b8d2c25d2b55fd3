//! API request/response models for forums and their threads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::pagination::Pagination;
use crate::db::models::{forums::ForumDBResponse, posts::PostDBResponse};
use crate::types::{AccessLevel, ForumId, PostId, UserId};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ForumCreate {
    pub name: String,
    /// Derived from the name when omitted
    pub slug: Option<String>,
    pub description: Option<String>,
    /// Defaults to `members`
    pub visibility: Option<AccessLevel>,
    pub position: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ForumUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub visibility: Option<AccessLevel>,
    pub position: Option<i32>,
    pub is_locked: Option<bool>,
}

/// Moderator controls on a forum
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ForumModeration {
    pub locked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ForumResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: ForumId,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub visibility: AccessLevel,
    pub is_locked: bool,
    pub position: i32,
    pub post_count: i64,
    pub created_at: DateTime<Utc>,
}

impl From<ForumDBResponse> for ForumResponse {
    fn from(db: ForumDBResponse) -> Self {
        Self {
            id: db.id,
            name: db.name,
            slug: db.slug,
            description: db.description,
            visibility: db.visibility,
            is_locked: db.is_locked,
            position: db.position,
            post_count: db.post_count,
            created_at: db.created_at,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ListForumsQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PostCreate {
    /// Plain text; markup is stripped
    pub title: String,
    /// Rich text; sanitized before storage
    pub body: String,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct PostUpdate {
    pub title: Option<String>,
    pub body: Option<String>,
}

/// Moderator controls on a thread. Omitted flags are left unchanged.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct PostModeration {
    pub pinned: Option<bool>,
    pub locked: Option<bool>,
    pub hidden: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PostResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: PostId,
    #[schema(value_type = String, format = "uuid")]
    pub forum_id: ForumId,
    #[schema(value_type = String, format = "uuid")]
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

impl From<PostDBResponse> for PostResponse {
    fn from(db: PostDBResponse) -> Self {
        Self {
            id: db.id,
            forum_id: db.forum_id,
            author_id: db.author_id,
            author_name: db.author_name,
            title: db.title,
            body_html: db.body_html,
            is_pinned: db.is_pinned,
            is_locked: db.is_locked,
            is_hidden: db.is_hidden,
            comment_count: db.comment_count,
            last_activity_at: db.last_activity_at,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ListPostsQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,
}
