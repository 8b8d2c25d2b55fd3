//! Database repository for comments.
//!
//! Comments on forum threads keep the thread's `comment_count` and `last_activity_at` current;
//! the counter changes in the same transaction as the comment row.

use std::collections::HashMap;

use sqlx::{Connection, PgConnection, Postgres, QueryBuilder};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    db::{
        errors::{DbError, Result},
        handlers::{posts::Posts, repository::Repository},
        models::comments::{CommentCreateDBRequest, CommentDBResponse, CommentFilter, CommentTarget, CommentUpdateDBRequest},
    },
    types::{CommentId, abbrev_uuid},
};

const COMMENT_COLUMNS: &str = r#"
    c.id, c.post_id, c.article_id, c.author_id, u.display_name AS author_name, c.body_html,
    c.is_hidden, c.created_at, c.updated_at
"#;

pub struct Comments<'c> {
    db: &'c mut PgConnection,
}

fn push_filter_conditions(query: &mut QueryBuilder<'_, Postgres>, filter: &CommentFilter) {
    match filter.target {
        CommentTarget::Post(post_id) => {
            query.push(" AND c.post_id = ");
            query.push_bind(post_id);
        }
        CommentTarget::Article(article_id) => {
            query.push(" AND c.article_id = ");
            query.push_bind(article_id);
        }
    }
    if !filter.include_hidden {
        query.push(" AND NOT c.is_hidden");
    }
}

impl<'c> Comments<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, filter), err)]
    pub async fn count(&mut self, filter: &CommentFilter) -> Result<i64> {
        let mut query = QueryBuilder::new("SELECT COUNT(*) FROM comments c WHERE 1=1");
        push_filter_conditions(&mut query, filter);
        let count: (i64,) = query.build_query_as().fetch_one(&mut *self.db).await?;
        Ok(count.0)
    }

    #[instrument(skip(self), fields(comment_id = %abbrev_uuid(&id)), err)]
    pub async fn set_hidden(&mut self, id: CommentId, hidden: bool) -> Result<CommentDBResponse> {
        let updated: Option<CommentId> = sqlx::query_scalar("UPDATE comments SET is_hidden = $2 WHERE id = $1 RETURNING id")
            .bind(id)
            .bind(hidden)
            .fetch_optional(&mut *self.db)
            .await?;

        match updated {
            Some(id) => self.fetch(id).await?.ok_or(DbError::NotFound),
            None => Err(DbError::NotFound),
        }
    }

    async fn fetch(&mut self, id: CommentId) -> Result<Option<CommentDBResponse>> {
        let comment = sqlx::query_as::<_, CommentDBResponse>(&format!(
            "SELECT {COMMENT_COLUMNS} FROM comments c JOIN users u ON u.id = c.author_id WHERE c.id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(comment)
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Comments<'c> {
    type CreateRequest = CommentCreateDBRequest;
    type UpdateRequest = CommentUpdateDBRequest;
    type Response = CommentDBResponse;
    type Id = CommentId;
    type Filter = CommentFilter;

    #[instrument(skip(self, request), fields(author_id = %abbrev_uuid(&request.author_id)), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let id = Uuid::new_v4();
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO comments (id, post_id, article_id, author_id, body_html)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id)
        .bind(request.target.post_id())
        .bind(request.target.article_id())
        .bind(request.author_id)
        .bind(&request.body_html)
        .execute(&mut *tx)
        .await?;

        if let CommentTarget::Post(post_id) = request.target {
            Posts::new(&mut tx).record_comment(post_id).await?;
        }

        tx.commit().await?;
        self.fetch(id).await?.ok_or(DbError::NotFound)
    }

    #[instrument(skip(self), fields(comment_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        self.fetch(id).await
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn get_bulk(&mut self, ids: Vec<CommentId>) -> Result<HashMap<Self::Id, CommentDBResponse>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let comments = sqlx::query_as::<_, CommentDBResponse>(&format!(
            "SELECT {COMMENT_COLUMNS} FROM comments c JOIN users u ON u.id = c.author_id WHERE c.id = ANY($1)"
        ))
        .bind(&ids)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(comments.into_iter().map(|c| (c.id, c)).collect())
    }

    /// Oldest first, so a thread reads top to bottom
    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut query = QueryBuilder::new(format!(
            "SELECT {COMMENT_COLUMNS} FROM comments c JOIN users u ON u.id = c.author_id WHERE 1=1"
        ));
        push_filter_conditions(&mut query, filter);
        query.push(" ORDER BY c.created_at ASC, c.id LIMIT ");
        query.push_bind(filter.limit);
        query.push(" OFFSET ");
        query.push_bind(filter.skip);

        let comments = query.build_query_as::<CommentDBResponse>().fetch_all(&mut *self.db).await?;
        Ok(comments)
    }

    #[instrument(skip(self), fields(comment_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let mut tx = self.db.begin().await?;

        let post_id: Option<Option<Uuid>> = sqlx::query_scalar("DELETE FROM comments WHERE id = $1 RETURNING post_id")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(post_id) = post_id else {
            return Ok(false);
        };
        if let Some(post_id) = post_id {
            Posts::new(&mut tx).forget_comment(post_id).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    #[instrument(skip(self, request), fields(comment_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let updated: Option<CommentId> =
            sqlx::query_scalar("UPDATE comments SET body_html = $2, updated_at = NOW() WHERE id = $1 RETURNING id")
                .bind(id)
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
    use crate::db::models::posts::PostCreateDBRequest;
    use crate::test_utils::{create_test_forum, create_test_user};
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_comments_track_post_counter(pool: PgPool) {
        let author = create_test_user(&pool, Role::Member).await;
        let forum = create_test_forum(&pool, "general").await;
        let mut conn = pool.acquire().await.unwrap();

        let post = Posts::new(&mut conn)
            .create(&PostCreateDBRequest {
                forum_id: forum.id,
                author_id: author.id,
                title: "thread".to_string(),
                body_html: "<p>first</p>".to_string(),
            })
            .await
            .unwrap();

        let mut repo = Comments::new(&mut conn);
        let target = CommentTarget::Post(post.id);
        let first = repo
            .create(&CommentCreateDBRequest {
                target,
                author_id: author.id,
                body_html: "<p>one</p>".to_string(),
            })
            .await
            .unwrap();
        repo.create(&CommentCreateDBRequest {
            target,
            author_id: author.id,
            body_html: "<p>two</p>".to_string(),
        })
        .await
        .unwrap();
        assert_eq!(first.target(), Some(target));
        assert_eq!(first.author_name, author.display_name);

        let post_after = Posts::new(&mut conn).get_by_id(post.id).await.unwrap().unwrap();
        assert_eq!(post_after.comment_count, 2);
        assert!(post_after.last_activity_at > post.last_activity_at);

        let mut repo = Comments::new(&mut conn);
        assert!(repo.delete(first.id).await.unwrap());
        assert!(!repo.delete(first.id).await.unwrap());
        let post_after = Posts::new(&mut conn).get_by_id(post.id).await.unwrap().unwrap();
        assert_eq!(post_after.comment_count, 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_hidden_comments_and_ordering(pool: PgPool) {
        let editor = create_test_user(&pool, Role::Editor).await;
        let article = crate::test_utils::create_test_article(&pool, &editor, "news").await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Comments::new(&mut conn);

        let target = CommentTarget::Article(article.id);
        for body in ["a", "b", "c"] {
            repo.create(&CommentCreateDBRequest {
                target,
                author_id: editor.id,
                body_html: body.to_string(),
            })
            .await
            .unwrap();
        }
        let listed = repo.list(&CommentFilter::new(target, 0, 10)).await.unwrap();
        assert_eq!(listed.iter().map(|c| c.body_html.as_str()).collect::<Vec<_>>(), vec!["a", "b", "c"]);

        repo.set_hidden(listed[1].id, true).await.unwrap();
        assert_eq!(repo.count(&CommentFilter::new(target, 0, 10)).await.unwrap(), 2);
        let moderator_view = CommentFilter {
            include_hidden: true,
            ..CommentFilter::new(target, 0, 10)
        };
        assert_eq!(repo.count(&moderator_view).await.unwrap(), 3);
    }
}
