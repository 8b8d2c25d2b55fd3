//! Database repository for articles.

use std::collections::{HashMap, HashSet};

use sqlx::{Connection, PgConnection, Postgres, QueryBuilder};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    api::models::articles::ArticleStatus,
    content::sanitize::MAX_SLUG_LENGTH,
    db::{
        errors::{DbError, Result},
        handlers::repository::Repository,
        models::articles::{ArticleCreateDBRequest, ArticleDBResponse, ArticleFilter, ArticleUpdateDBRequest},
    },
    types::{ArticleId, abbrev_uuid},
};

const ARTICLE_COLUMNS: &str = r#"
    a.id, a.author_id, u.display_name AS author_name, a.title, a.slug, a.summary, a.body_html,
    a.status, a.visibility, a.tags, a.published_at, a.created_at, a.updated_at
"#;

/// Attempts at inserting with a fresh slug before giving up on a racing writer
const SLUG_ATTEMPTS: usize = 5;

pub struct Articles<'c> {
    db: &'c mut PgConnection,
}

fn push_filter_conditions(query: &mut QueryBuilder<'_, Postgres>, filter: &ArticleFilter) {
    if let Some(status) = filter.status {
        query.push(" AND a.status = ");
        query.push_bind(status);
    }
    if let Some(level) = filter.max_visibility {
        query.push(" AND a.visibility <= ");
        query.push_bind(level);
    }
    if let Some(ref tag) = filter.tag {
        query.push(" AND ");
        query.push_bind(tag.clone());
        query.push(" = ANY(a.tags)");
    }
}

/// `base` with a `-n` suffix, trimmed so the result still fits in a slug
fn suffixed_slug(base: &str, n: usize) -> String {
    let suffix = format!("-{n}");
    let keep = MAX_SLUG_LENGTH.saturating_sub(suffix.len()).min(base.len());
    format!("{}{suffix}", base[..keep].trim_end_matches('-'))
}

/// First of `base`, `base-2`, `base-3`... not in `taken`
fn first_free_slug(base: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| suffixed_slug(base, n))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| format!("{base}-{}", Uuid::new_v4().simple()))
}

fn is_slug_conflict(err: &DbError) -> bool {
    matches!(err, DbError::UniqueViolation { constraint: Some(c), .. } if c == "articles_slug_unique")
}

fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut tags: Vec<String> = tags
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    tags.sort();
    tags.dedup();
    tags
}

impl<'c> Articles<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, filter), err)]
    pub async fn count(&mut self, filter: &ArticleFilter) -> Result<i64> {
        let mut query = QueryBuilder::new("SELECT COUNT(*) FROM articles a WHERE 1=1");
        push_filter_conditions(&mut query, filter);
        let count: (i64,) = query.build_query_as().fetch_one(&mut *self.db).await?;
        Ok(count.0)
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_slug(&mut self, slug: &str) -> Result<Option<ArticleDBResponse>> {
        let article = sqlx::query_as::<_, ArticleDBResponse>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles a JOIN users u ON u.id = a.author_id WHERE a.slug = $1"
        ))
        .bind(slug)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(article)
    }

    /// Slugs already used by `base` or its numbered variants
    async fn taken_slugs(&mut self, base: &str) -> Result<HashSet<String>> {
        let slugs: Vec<String> = sqlx::query_scalar("SELECT slug FROM articles WHERE slug = $1 OR slug LIKE $1 || '-%'")
            .bind(base)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(slugs.into_iter().collect())
    }

    async fn fetch(&mut self, id: ArticleId) -> Result<Option<ArticleDBResponse>> {
        let article = sqlx::query_as::<_, ArticleDBResponse>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles a JOIN users u ON u.id = a.author_id WHERE a.id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(article)
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Articles<'c> {
    type CreateRequest = ArticleCreateDBRequest;
    type UpdateRequest = ArticleUpdateDBRequest;
    type Response = ArticleDBResponse;
    type Id = ArticleId;
    type Filter = ArticleFilter;

    /// Insert an article, suffixing the slug (`-2`, `-3`...) until it is unique.
    #[instrument(skip(self, request), fields(slug = %request.slug), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let id = Uuid::new_v4();
        let published_at = (request.status == ArticleStatus::Published).then(chrono::Utc::now);
        let tags = normalize_tags(&request.tags);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let taken = self.taken_slugs(&request.slug).await?;
            let slug = first_free_slug(&request.slug, &taken);

            // Savepoint, so a slug race does not poison the caller's transaction
            let mut savepoint = self.db.begin().await?;
            let inserted = sqlx::query(
                r#"
                INSERT INTO articles
                    (id, author_id, title, slug, summary, body_html, status, visibility, tags, published_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(id)
            .bind(request.author_id)
            .bind(request.title.trim())
            .bind(&slug)
            .bind(&request.summary)
            .bind(&request.body_html)
            .bind(request.status)
            .bind(request.visibility)
            .bind(&tags)
            .bind(published_at)
            .execute(&mut *savepoint)
            .await
            .map_err(DbError::from);

            match inserted {
                Ok(_) => {
                    savepoint.commit().await?;
                    break;
                }
                Err(e) if is_slug_conflict(&e) && attempt < SLUG_ATTEMPTS => {
                    savepoint.rollback().await?;
                    tracing::debug!("Slug {} was taken concurrently, retrying", slug);
                }
                Err(e) => return Err(e),
            }
        }

        self.fetch(id).await?.ok_or(DbError::NotFound)
    }

    #[instrument(skip(self), fields(article_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        self.fetch(id).await
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn get_bulk(&mut self, ids: Vec<ArticleId>) -> Result<HashMap<Self::Id, ArticleDBResponse>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let articles = sqlx::query_as::<_, ArticleDBResponse>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles a JOIN users u ON u.id = a.author_id WHERE a.id = ANY($1)"
        ))
        .bind(&ids)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(articles.into_iter().map(|a| (a.id, a)).collect())
    }

    /// Newest first: published articles by publication time, drafts by creation time
    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut query = QueryBuilder::new(format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles a JOIN users u ON u.id = a.author_id WHERE 1=1"
        ));
        push_filter_conditions(&mut query, filter);
        query.push(" ORDER BY COALESCE(a.published_at, a.created_at) DESC, a.id LIMIT ");
        query.push_bind(filter.limit);
        query.push(" OFFSET ");
        query.push_bind(filter.skip);

        let articles = query.build_query_as::<ArticleDBResponse>().fetch_all(&mut *self.db).await?;
        Ok(articles)
    }

    #[instrument(skip(self), fields(article_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM articles WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Partial update. `published_at` is only ever set by the first transition to published, so
    /// unpublishing and republishing keep the original date.
    #[instrument(skip(self, request), fields(article_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let tags = request.tags.as_deref().map(normalize_tags);

        let updated: Option<ArticleId> = sqlx::query_scalar(
            r#"
            UPDATE articles SET
                title = COALESCE($2, title),
                slug = COALESCE($3, slug),
                summary = COALESCE($4, summary),
                body_html = COALESCE($5, body_html),
                status = COALESCE($6, status),
                visibility = COALESCE($7, visibility),
                tags = COALESCE($8, tags),
                published_at = CASE
                    WHEN COALESCE($6, status) = 'published' AND published_at IS NULL THEN NOW()
                    ELSE published_at
                END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(request.title.as_deref().map(str::trim))
        .bind(&request.slug)
        .bind(&request.summary)
        .bind(&request.body_html)
        .bind(request.status)
        .bind(request.visibility)
        .bind(tags)
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
    use crate::test_utils::create_test_user;
    use crate::types::AccessLevel;
    use sqlx::PgPool;

    fn create_request(author_id: Uuid, slug: &str, status: ArticleStatus) -> ArticleCreateDBRequest {
        ArticleCreateDBRequest {
            author_id,
            title: "Hello World".to_string(),
            slug: slug.to_string(),
            summary: None,
            body_html: "<p>Hi</p>".to_string(),
            status,
            visibility: AccessLevel::Public,
            tags: vec!["News".to_string(), " news ".to_string(), "rust".to_string()],
        }
    }

    #[test]
    fn test_first_free_slug() {
        let taken: HashSet<String> = ["hello", "hello-2"].iter().map(|s| s.to_string()).collect();
        assert_eq!(first_free_slug("fresh", &taken), "fresh");
        assert_eq!(first_free_slug("hello", &taken), "hello-3");
    }

    #[test]
    fn test_suffixed_slug_stays_within_limit() {
        let base = "a".repeat(MAX_SLUG_LENGTH);
        let slug = suffixed_slug(&base, 12);
        assert_eq!(slug.len(), MAX_SLUG_LENGTH);
        assert!(slug.ends_with("-12"));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_colliding_slugs_get_suffixes(pool: PgPool) {
        let author = create_test_user(&pool, Role::Editor).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Articles::new(&mut conn);

        let first = repo.create(&create_request(author.id, "hello-world", ArticleStatus::Draft)).await.unwrap();
        let second = repo.create(&create_request(author.id, "hello-world", ArticleStatus::Draft)).await.unwrap();
        let third = repo.create(&create_request(author.id, "hello-world", ArticleStatus::Draft)).await.unwrap();

        assert_eq!(first.slug, "hello-world");
        assert_eq!(second.slug, "hello-world-2");
        assert_eq!(third.slug, "hello-world-3");
        assert_eq!(first.tags, vec!["news".to_string(), "rust".to_string()]);
        assert_eq!(first.author_name, author.display_name);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_published_at_is_set_once(pool: PgPool) {
        let author = create_test_user(&pool, Role::Editor).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Articles::new(&mut conn);

        let draft = repo.create(&create_request(author.id, "post", ArticleStatus::Draft)).await.unwrap();
        assert!(draft.published_at.is_none());

        let publish = ArticleUpdateDBRequest {
            status: Some(ArticleStatus::Published),
            ..Default::default()
        };
        let published = repo.update(draft.id, &publish).await.unwrap();
        let first_published_at = published.published_at.unwrap();

        let unpublished = repo
            .update(
                draft.id,
                &ArticleUpdateDBRequest {
                    status: Some(ArticleStatus::Draft),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(unpublished.published_at, Some(first_published_at));

        let republished = repo.update(draft.id, &publish).await.unwrap();
        assert_eq!(republished.published_at, Some(first_published_at));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_list_filters_by_visibility_status_and_tag(pool: PgPool) {
        let author = create_test_user(&pool, Role::Editor).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Articles::new(&mut conn);

        repo.create(&create_request(author.id, "public", ArticleStatus::Published)).await.unwrap();
        repo.create(&ArticleCreateDBRequest {
            visibility: AccessLevel::Subscribers,
            tags: vec!["premium".to_string()],
            ..create_request(author.id, "premium", ArticleStatus::Published)
        })
        .await
        .unwrap();
        repo.create(&create_request(author.id, "draft", ArticleStatus::Draft)).await.unwrap();

        let members_view = ArticleFilter {
            status: Some(ArticleStatus::Published),
            max_visibility: Some(AccessLevel::Members),
            ..ArticleFilter::new(0, 10)
        };
        let visible = repo.list(&members_view).await.unwrap();
        assert_eq!(visible.iter().map(|a| a.slug.as_str()).collect::<Vec<_>>(), vec!["public"]);
        assert_eq!(repo.count(&members_view).await.unwrap(), 1);

        let tagged = ArticleFilter {
            tag: Some("premium".to_string()),
            ..ArticleFilter::new(0, 10)
        };
        assert_eq!(repo.count(&tagged).await.unwrap(), 1);
        assert_eq!(repo.count(&ArticleFilter::new(0, 10)).await.unwrap(), 3);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_explicit_slug_conflict_is_unique_violation(pool: PgPool) {
        let author = create_test_user(&pool, Role::Editor).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Articles::new(&mut conn);

        repo.create(&create_request(author.id, "taken", ArticleStatus::Draft)).await.unwrap();
        let other = repo.create(&create_request(author.id, "other", ArticleStatus::Draft)).await.unwrap();

        let err = repo
            .update(
                other.id,
                &ArticleUpdateDBRequest {
                    slug: Some("taken".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(is_slug_conflict(&err));
        assert!(repo.get_by_slug("other").await.unwrap().is_some());
    }
}
