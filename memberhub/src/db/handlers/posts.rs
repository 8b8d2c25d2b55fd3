//! Database repository for forum threads.

use std::collections::HashMap;

use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    db::{
        errors::{DbError, Result},
        handlers::repository::Repository,
        models::posts::{PostCreateDBRequest, PostDBResponse, PostFilter, PostModerationDBRequest, PostUpdateDBRequest},
    },
    types::{PostId, abbrev_uuid},
};

const POST_COLUMNS: &str = r#"
    p.id, p.forum_id, p.author_id, u.display_name AS author_name, p.title, p.body_html,
    p.is_pinned, p.is_locked, p.is_hidden, p.comment_count, p.last_activity_at,
    p.created_at, p.updated_at
"#;

pub struct Posts<'c> {
    db: &'c mut PgConnection,
}

fn push_filter_conditions(query: &mut QueryBuilder<'_, Postgres>, filter: &PostFilter) {
    if let Some(forum_id) = filter.forum_id {
        query.push(" AND p.forum_id = ");
        query.push_bind(forum_id);
    }
    if !filter.include_hidden {
        query.push(" AND NOT p.is_hidden");
    }
}

impl<'c> Posts<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, filter), err)]
    pub async fn count(&mut self, filter: &PostFilter) -> Result<i64> {
        let mut query = QueryBuilder::new("SELECT COUNT(*) FROM posts p WHERE 1=1");
        push_filter_conditions(&mut query, filter);
        let count: (i64,) = query.build_query_as().fetch_one(&mut *self.db).await?;
        Ok(count.0)
    }

    /// Set pin/lock/hide flags without touching `updated_at`, which tracks author edits
    #[instrument(skip(self, request), fields(post_id = %abbrev_uuid(&id)), err)]
    pub async fn moderate(&mut self, id: PostId, request: &PostModerationDBRequest) -> Result<PostDBResponse> {
        let updated: Option<PostId> = sqlx::query_scalar(
            r#"
            UPDATE posts SET
                is_pinned = COALESCE($2, is_pinned),
                is_locked = COALESCE($3, is_locked),
                is_hidden = COALESCE($4, is_hidden)
            WHERE id = $1
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(request.is_pinned)
        .bind(request.is_locked)
        .bind(request.is_hidden)
        .fetch_optional(&mut *self.db)
        .await?;

        match updated {
            Some(id) => self.fetch(id).await?.ok_or(DbError::NotFound),
            None => Err(DbError::NotFound),
        }
    }

    /// Record a new comment on the thread
    #[instrument(skip(self), fields(post_id = %abbrev_uuid(&id)), err)]
    pub async fn record_comment(&mut self, id: PostId) -> Result<()> {
        sqlx::query("UPDATE posts SET comment_count = comment_count + 1, last_activity_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(())
    }

    /// Record a deleted comment. Activity time is left alone.
    #[instrument(skip(self), fields(post_id = %abbrev_uuid(&id)), err)]
    pub async fn forget_comment(&mut self, id: PostId) -> Result<()> {
        sqlx::query("UPDATE posts SET comment_count = GREATEST(comment_count - 1, 0) WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(())
    }

    async fn fetch(&mut self, id: PostId) -> Result<Option<PostDBResponse>> {
        let post = sqlx::query_as::<_, PostDBResponse>(&format!(
            "SELECT {POST_COLUMNS} FROM posts p JOIN users u ON u.id = p.author_id WHERE p.id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(post)
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Posts<'c> {
    type CreateRequest = PostCreateDBRequest;
    type UpdateRequest = PostUpdateDBRequest;
    type Response = PostDBResponse;
    type Id = PostId;
    type Filter = PostFilter;

    #[instrument(skip(self, request), fields(forum_id = %abbrev_uuid(&request.forum_id)), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let id: PostId = sqlx::query_scalar(
            r#"
            INSERT INTO posts (id, forum_id, author_id, title, body_html)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.forum_id)
        .bind(request.author_id)
        .bind(&request.title)
        .bind(&request.body_html)
        .fetch_one(&mut *self.db)
        .await?;

        self.fetch(id).await?.ok_or(DbError::NotFound)
    }

    #[instrument(skip(self), fields(post_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        self.fetch(id).await
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn get_bulk(&mut self, ids: Vec<PostId>) -> Result<HashMap<Self::Id, PostDBResponse>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let posts = sqlx::query_as::<_, PostDBResponse>(&format!(
            "SELECT {POST_COLUMNS} FROM posts p JOIN users u ON u.id = p.author_id WHERE p.id = ANY($1)"
        ))
        .bind(&ids)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(posts.into_iter().map(|p| (p.id, p)).collect())
    }

    /// Pinned threads first, then most recently active
    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut query = QueryBuilder::new(format!(
            "SELECT {POST_COLUMNS} FROM posts p JOIN users u ON u.id = p.author_id WHERE 1=1"
        ));
        push_filter_conditions(&mut query, filter);
        query.push(" ORDER BY p.is_pinned DESC, p.last_activity_at DESC, p.id LIMIT ");
        query.push_bind(filter.limit);
        query.push(" OFFSET ");
        query.push_bind(filter.skip);

        let posts = query.build_query_as::<PostDBResponse>().fetch_all(&mut *self.db).await?;
        Ok(posts)
    }

    #[instrument(skip(self), fields(post_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(post_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let updated: Option<PostId> = sqlx::query_scalar(
            r#"
            UPDATE posts SET
                title = COALESCE($2, title),
                body_html = COALESCE($3, body_html),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(&request.title)
        .bind(&request.body_html)
        .fetch_optional(&mut *self.db)
        .await?;

        match updated {
            Some(id) => self.fetch(id).await?.ok_or(DbError::NotFound),
            None => Err(DbError::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::users::Role;
    use crate::test_utils::{create_test_forum, create_test_user};
    use sqlx::PgPool;

    fn create_request(forum_id: Uuid, author_id: Uuid, title: &str) -> PostCreateDBRequest {
        PostCreateDBRequest {
            forum_id,
            author_id,
            title: title.to_string(),
            body_html: "<p>body</p>".to_string(),
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_pinned_first_then_recent_activity(pool: PgPool) {
        let author = create_test_user(&pool, Role::Member).await;
        let forum = create_test_forum(&pool, "general").await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Posts::new(&mut conn);

        let old = repo.create(&create_request(forum.id, author.id, "old")).await.unwrap();
        let pinned = repo.create(&create_request(forum.id, author.id, "pinned")).await.unwrap();
        repo.create(&create_request(forum.id, author.id, "newer")).await.unwrap();

        repo.moderate(
            pinned.id,
            &PostModerationDBRequest {
                is_pinned: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        // A comment bumps the oldest thread above the newer one
        repo.record_comment(old.id).await.unwrap();

        let filter = PostFilter {
            forum_id: Some(forum.id),
            ..PostFilter::new(0, 10)
        };
        let titles: Vec<String> = repo.list(&filter).await.unwrap().into_iter().map(|p| p.title).collect();
        assert_eq!(titles, vec!["pinned", "old", "newer"]);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_hidden_posts_are_filtered(pool: PgPool) {
        let author = create_test_user(&pool, Role::Member).await;
        let forum = create_test_forum(&pool, "general").await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Posts::new(&mut conn);

        let post = repo.create(&create_request(forum.id, author.id, "spam")).await.unwrap();
        let hidden = repo
            .moderate(
                post.id,
                &PostModerationDBRequest {
                    is_hidden: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(hidden.is_hidden);
        assert!(!hidden.is_pinned);

        let filter = PostFilter {
            forum_id: Some(forum.id),
            ..PostFilter::new(0, 10)
        };
        assert_eq!(repo.count(&filter).await.unwrap(), 0);
        let moderator_view = PostFilter {
            include_hidden: true,
            ..filter
        };
        assert_eq!(repo.count(&moderator_view).await.unwrap(), 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_comment_counter(pool: PgPool) {
        let author = create_test_user(&pool, Role::Member).await;
        let forum = create_test_forum(&pool, "general").await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Posts::new(&mut conn);

        let post = repo.create(&create_request(forum.id, author.id, "thread")).await.unwrap();
        repo.record_comment(post.id).await.unwrap();
        repo.record_comment(post.id).await.unwrap();
        repo.forget_comment(post.id).await.unwrap();
        assert_eq!(repo.get_by_id(post.id).await.unwrap().unwrap().comment_count, 1);

        repo.forget_comment(post.id).await.unwrap();
        repo.forget_comment(post.id).await.unwrap();
        assert_eq!(repo.get_by_id(post.id).await.unwrap().unwrap().comment_count, 0);
    }
}
