//! Database models for forums.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::types::{AccessLevel, ForumId};

#[derive(Debug, Clone)]
pub struct ForumCreateDBRequest {
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub visibility: AccessLevel,
    pub position: i32,
}

#[derive(Debug, Clone, Default)]
pub struct ForumUpdateDBRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub visibility: Option<AccessLevel>,
    pub is_locked: Option<bool>,
    pub position: Option<i32>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ForumDBResponse {
    pub id: ForumId,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub visibility: AccessLevel,
    pub is_locked: bool,
    pub position: i32,
    /// Threads that are not hidden
    pub post_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ForumFilter {
    pub skip: i64,
    pub limit: i64,
    pub max_visibility: Option<AccessLevel>,
}

impl ForumFilter {
    pub fn new(skip: i64, limit: i64) -> Self {
        Self {
            skip,
            limit,
            max_visibility: None,
        }
    }
}
