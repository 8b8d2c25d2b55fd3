//! API request/response models for comments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::pagination::Pagination;
use crate::db::models::comments::CommentDBResponse;
use crate::types::{ArticleId, CommentId, PostId, UserId};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CommentCreate {
    /// Rich text; sanitized before storage
    pub body: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CommentUpdate {
    pub body: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CommentModeration {
    pub hidden: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CommentResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: CommentId,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub post_id: Option<PostId>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub article_id: Option<ArticleId>,
    #[schema(value_type = String, format = "uuid")]
    pub author_id: UserId,
    pub author_name: String,
    pub body_html: String,
    pub is_hidden: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<CommentDBResponse> for CommentResponse {
    fn from(db: CommentDBResponse) -> Self {
        Self {
            id: db.id,
            post_id: db.post_id,
            article_id: db.article_id,
            author_id: db.author_id,
            author_name: db.author_name,
            body_html: db.body_html,
            is_hidden: db.is_hidden,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ListCommentsQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,
}
