//! Database repository for forums.

use std::collections::HashMap;

use sqlx::{PgConnection, QueryBuilder};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    db::{
        errors::{DbError, Result},
        handlers::repository::Repository,
        models::forums::{ForumCreateDBRequest, ForumDBResponse, ForumFilter, ForumUpdateDBRequest},
    },
    types::{ForumId, abbrev_uuid},
};

const FORUM_COLUMNS: &str = r#"
    f.id, f.name, f.slug, f.description, f.visibility, f.is_locked, f.position, f.created_at,
    (SELECT COUNT(*) FROM posts p WHERE p.forum_id = f.id AND NOT p.is_hidden) AS post_count
"#;

pub struct Forums<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Forums<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, filter), err)]
    pub async fn count(&mut self, filter: &ForumFilter) -> Result<i64> {
        let mut query = QueryBuilder::new("SELECT COUNT(*) FROM forums f WHERE 1=1");
        if let Some(level) = filter.max_visibility {
            query.push(" AND f.visibility <= ");
            query.push_bind(level);
        }
        let count: (i64,) = query.build_query_as().fetch_one(&mut *self.db).await?;
        Ok(count.0)
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_slug(&mut self, slug: &str) -> Result<Option<ForumDBResponse>> {
        let forum = sqlx::query_as::<_, ForumDBResponse>(&format!("SELECT {FORUM_COLUMNS} FROM forums f WHERE f.slug = $1"))
            .bind(slug)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(forum)
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Forums<'c> {
    type CreateRequest = ForumCreateDBRequest;
    type UpdateRequest = ForumUpdateDBRequest;
    type Response = ForumDBResponse;
    type Id = ForumId;
    type Filter = ForumFilter;

    #[instrument(skip(self, request), fields(slug = %request.slug), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let forum = sqlx::query_as::<_, ForumDBResponse>(&format!(
            r#"
            WITH f AS (
                INSERT INTO forums (id, name, slug, description, visibility, position)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING *
            )
            SELECT {FORUM_COLUMNS} FROM f
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(request.name.trim())
        .bind(&request.slug)
        .bind(&request.description)
        .bind(request.visibility)
        .bind(request.position)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(forum)
    }

    #[instrument(skip(self), fields(forum_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let forum = sqlx::query_as::<_, ForumDBResponse>(&format!("SELECT {FORUM_COLUMNS} FROM forums f WHERE f.id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(forum)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn get_bulk(&mut self, ids: Vec<ForumId>) -> Result<HashMap<Self::Id, ForumDBResponse>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let forums = sqlx::query_as::<_, ForumDBResponse>(&format!("SELECT {FORUM_COLUMNS} FROM forums f WHERE f.id = ANY($1)"))
            .bind(&ids)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(forums.into_iter().map(|f| (f.id, f)).collect())
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut query = QueryBuilder::new(format!("SELECT {FORUM_COLUMNS} FROM forums f WHERE 1=1"));
        if let Some(level) = filter.max_visibility {
            query.push(" AND f.visibility <= ");
            query.push_bind(level);
        }
        query.push(" ORDER BY f.position ASC, f.name ASC LIMIT ");
        query.push_bind(filter.limit);
        query.push(" OFFSET ");
        query.push_bind(filter.skip);

        let forums = query.build_query_as::<ForumDBResponse>().fetch_all(&mut *self.db).await?;
        Ok(forums)
    }

    #[instrument(skip(self), fields(forum_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM forums WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(forum_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let forum = sqlx::query_as::<_, ForumDBResponse>(&format!(
            r#"
            WITH f AS (
                UPDATE forums SET
                    name = COALESCE($2, name),
                    description = COALESCE($3, description),
                    visibility = COALESCE($4, visibility),
                    is_locked = COALESCE($5, is_locked),
                    position = COALESCE($6, position)
                WHERE id = $1
                RETURNING *
            )
            SELECT {FORUM_COLUMNS} FROM f
            "#
        ))
        .bind(id)
        .bind(request.name.as_deref().map(str::trim))
        .bind(&request.description)
        .bind(request.visibility)
        .bind(request.is_locked)
        .bind(request.position)
        .fetch_optional(&mut *self.db)
        .await?;

        forum.ok_or(DbError::NotFound)
    }
}
