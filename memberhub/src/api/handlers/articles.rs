use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use tracing::info;

use crate::{
    AppState,
    api::models::{
        articles::{ArticleCreate, ArticleResponse, ArticleStatus, ArticleUpdate, ListArticlesQuery},
        pagination::PaginatedResponse,
    },
    auth::{
        current_user::OptionalUser,
        permissions::{can_read_all_resources, operation, require_visibility, resource, RequiresPermission},
    },
    content::{plain_text, prepare_body, prepare_title, slugify},
    db::{
        handlers::{Articles, Repository},
        models::articles::{ArticleCreateDBRequest, ArticleFilter, ArticleUpdateDBRequest},
    },
    errors::{Error, Result},
    types::{AccessLevel, ArticleId, Resource},
};

fn article_not_found(id: impl ToString) -> Error {
    Error::NotFound {
        resource: "Article".to_string(),
        id: id.to_string(),
    }
}

/// Empty summaries are stored as NULL
fn prepare_summary(summary: Option<&str>) -> Option<String> {
    summary.map(plain_text).filter(|s| !s.is_empty())
}

/// List articles.
///
/// Readers see published articles at or below their access level. Editors see everything and
/// may filter by status.
#[utoipa::path(
    get,
    path = "/articles",
    tag = "articles",
    summary = "List articles",
    params(ListArticlesQuery),
    responses(
        (status = 200, description = "Page of articles, newest first", body = PaginatedResponse<ArticleResponse>),
    ),
    security((), ("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_articles(
    State(state): State<AppState>,
    OptionalUser(current_user): OptionalUser,
    Query(query): Query<ListArticlesQuery>,
) -> Result<Json<PaginatedResponse<ArticleResponse>>> {
    let (skip, limit) = query.pagination.content_params(&state.config.content);
    let tag = query.tag.as_deref().map(|t| t.trim().to_lowercase()).filter(|t| !t.is_empty());

    let is_editor = current_user
        .as_ref()
        .is_some_and(|user| can_read_all_resources(user, Resource::Articles));
    let filter = if is_editor {
        ArticleFilter {
            status: query.status,
            tag,
            ..ArticleFilter::new(skip, limit)
        }
    } else {
        ArticleFilter {
            status: Some(ArticleStatus::Published),
            max_visibility: Some(current_user.as_ref().map_or(AccessLevel::Public, |u| u.access_level())),
            tag,
            ..ArticleFilter::new(skip, limit)
        }
    };

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Articles::new(&mut conn);
    let articles = repo.list(&filter).await?;
    let total_count = repo.count(&filter).await?;

    Ok(Json(PaginatedResponse::new(
        articles.into_iter().map(ArticleResponse::from).collect(),
        total_count,
        skip,
        limit,
    )))
}

/// Read one article by its slug. The article ID is accepted too.
#[utoipa::path(
    get,
    path = "/articles/{id}",
    tag = "articles",
    summary = "Get an article",
    params(("id" = String, Path, description = "Article slug or ID")),
    responses(
        (status = 200, description = "The article", body = ArticleResponse),
        (status = 401, description = "Sign in to read this article"),
        (status = 403, description = "The article is above your access level"),
        (status = 404, description = "No such published article"),
    ),
    security((), ("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_article(
    State(state): State<AppState>,
    OptionalUser(current_user): OptionalUser,
    Path(slug): Path<String>,
) -> Result<Json<ArticleResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Articles::new(&mut conn);
    // A slug may itself look like a UUID, so an id miss falls back to the slug
    let by_id = match slug.parse::<ArticleId>() {
        Ok(id) => repo.get_by_id(id).await?,
        Err(_) => None,
    };
    let article = match by_id {
        Some(article) => article,
        None => repo.get_by_slug(&slug).await?.ok_or_else(|| article_not_found(&slug))?,
    };

    let is_editor = current_user
        .as_ref()
        .is_some_and(|user| can_read_all_resources(user, Resource::Articles));
    if !is_editor {
        // Unpublished articles do not exist as far as readers are concerned
        if article.status != ArticleStatus::Published {
            return Err(article_not_found(&slug));
        }
        require_visibility(current_user.as_ref(), article.visibility, "article")?;
    }

    Ok(Json(ArticleResponse::from(article)))
}

/// Write a new article
#[utoipa::path(
    post,
    path = "/articles",
    tag = "articles",
    summary = "Create an article",
    request_body = ArticleCreate,
    responses(
        (status = 201, description = "Article created", body = ArticleResponse),
        (status = 400, description = "Empty or oversized title or body"),
        (status = 403, description = "Requires the editor role"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_article(
    State(state): State<AppState>,
    current_user: RequiresPermission<resource::Articles, operation::CreateAll>,
    Json(request): Json<ArticleCreate>,
) -> Result<(StatusCode, Json<ArticleResponse>)> {
    let title = prepare_title(&request.title)?;
    let body_html = prepare_body(&request.body, &state.config.content)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let article = Articles::new(&mut conn)
        .create(&ArticleCreateDBRequest {
            author_id: current_user.id,
            slug: slugify(&title),
            title,
            summary: prepare_summary(request.summary.as_deref()),
            body_html,
            status: request.status.unwrap_or(ArticleStatus::Draft),
            visibility: request.visibility.unwrap_or(AccessLevel::Public),
            tags: request.tags,
        })
        .await?;

    info!("User {} created article {} ({})", current_user.id, article.id, article.slug);
    Ok((StatusCode::CREATED, Json(ArticleResponse::from(article))))
}

/// Edit an article. The slug only changes when one is given explicitly.
#[utoipa::path(
    patch,
    path = "/articles/{id}",
    tag = "articles",
    summary = "Update an article",
    request_body = ArticleUpdate,
    params(("id" = uuid::Uuid, Path, description = "Article ID")),
    responses(
        (status = 200, description = "Article updated", body = ArticleResponse),
        (status = 400, description = "Empty or oversized title or body"),
        (status = 403, description = "Requires the editor role"),
        (status = 404, description = "No such article"),
        (status = 409, description = "The slug is taken"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_article(
    State(state): State<AppState>,
    Path(id): Path<ArticleId>,
    current_user: RequiresPermission<resource::Articles, operation::UpdateAll>,
    Json(request): Json<ArticleUpdate>,
) -> Result<Json<ArticleResponse>> {
    let update = ArticleUpdateDBRequest {
        title: request.title.as_deref().map(prepare_title).transpose()?,
        slug: request.slug.as_deref().map(slugify),
        summary: request.summary.as_deref().map(plain_text),
        body_html: request
            .body
            .as_deref()
            .map(|body| prepare_body(body, &state.config.content))
            .transpose()?,
        status: request.status,
        visibility: request.visibility,
        tags: request.tags,
    };

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let article = Articles::new(&mut conn).update(id, &update).await.map_err(|e| match e {
        crate::db::errors::DbError::NotFound => article_not_found(id),
        other => Error::Database(other),
    })?;

    info!("User {} updated article {}", current_user.id, id);
    Ok(Json(ArticleResponse::from(article)))
}

/// Delete an article along with its comments
#[utoipa::path(
    delete,
    path = "/articles/{id}",
    tag = "articles",
    summary = "Delete an article",
    params(("id" = uuid::Uuid, Path, description = "Article ID")),
    responses(
        (status = 204, description = "Article deleted"),
        (status = 403, description = "Requires the editor role"),
        (status = 404, description = "No such article"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn delete_article(
    State(state): State<AppState>,
    Path(id): Path<ArticleId>,
    current_user: RequiresPermission<resource::Articles, operation::DeleteAll>,
) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    if !Articles::new(&mut conn).delete(id).await? {
        return Err(article_not_found(id));
    }

    info!("User {} deleted article {}", current_user.id, id);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::users::Role;
    use crate::test_utils::{create_test_app, create_test_article, create_test_user, session_cookie_for};
    use axum::http::header;
    use serde_json::json;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_editor_creates_article_with_sanitized_body(pool: PgPool) {
        let (server, config) = create_test_app(pool.clone()).await;
        let editor = create_test_user(&pool, Role::Editor).await;

        let response = server
            .post("/api/v1/articles")
            .add_header(header::COOKIE, session_cookie_for(&editor, &config))
            .json(&json!({
                "title": "Hello, World!",
                "body": "<p onclick=\"x()\">Hi<script>alert(1)</script></p>",
                "tags": ["News", " news ", "Rust"],
                "status": "published",
            }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let article: ArticleResponse = response.json();
        assert_eq!(article.slug, "hello-world");
        assert_eq!(article.body_html, "<p>Hi</p>");
        assert_eq!(article.tags, vec!["news", "rust"]);
        assert_eq!(article.visibility, AccessLevel::Public);
        assert!(article.published_at.is_some());

        // Same title again gets a numbered slug
        let second: ArticleResponse = server
            .post("/api/v1/articles")
            .add_header(header::COOKIE, session_cookie_for(&editor, &config))
            .json(&json!({"title": "Hello, World!", "body": "Again"}))
            .await
            .json();
        assert_eq!(second.slug, "hello-world-2");
        assert_eq!(second.status, ArticleStatus::Draft);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_members_cannot_write_articles(pool: PgPool) {
        let (server, config) = create_test_app(pool.clone()).await;
        let member = create_test_user(&pool, Role::Member).await;

        server
            .post("/api/v1/articles")
            .add_header(header::COOKIE, session_cookie_for(&member, &config))
            .json(&json!({"title": "Mine", "body": "text"}))
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_article_visibility_by_access_level(pool: PgPool) {
        let (server, config) = create_test_app(pool.clone()).await;
        let editor = create_test_user(&pool, Role::Editor).await;
        let member = create_test_user(&pool, Role::Member).await;
        let subscriber = create_test_user(&pool, Role::Subscriber).await;
        let article = create_test_article(&pool, &editor, "premium").await;

        let mut conn = pool.acquire().await.unwrap();
        Articles::new(&mut conn)
            .update(
                article.id,
                &ArticleUpdateDBRequest {
                    visibility: Some(AccessLevel::Subscribers),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        server
            .get("/api/v1/articles/premium")
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
        server
            .get("/api/v1/articles/premium")
            .add_header(header::COOKIE, session_cookie_for(&member, &config))
            .await
            .assert_status(StatusCode::FORBIDDEN);
        server
            .get("/api/v1/articles/premium")
            .add_header(header::COOKIE, session_cookie_for(&subscriber, &config))
            .await
            .assert_status_ok();

        // Listings leave out what the caller cannot read
        let page: PaginatedResponse<ArticleResponse> = server.get("/api/v1/articles").await.json();
        assert_eq!(page.total_count, 0);
        let page: PaginatedResponse<ArticleResponse> = server
            .get("/api/v1/articles")
            .add_header(header::COOKIE, session_cookie_for(&subscriber, &config))
            .await
            .json();
        assert_eq!(page.total_count, 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_drafts_hidden_from_readers(pool: PgPool) {
        let (server, config) = create_test_app(pool.clone()).await;
        let editor = create_test_user(&pool, Role::Editor).await;
        let article = create_test_article(&pool, &editor, "work-in-progress").await;

        server
            .patch(&format!("/api/v1/articles/{}", article.id))
            .add_header(header::COOKIE, session_cookie_for(&editor, &config))
            .json(&json!({"status": "draft"}))
            .await
            .assert_status_ok();

        server
            .get("/api/v1/articles/work-in-progress")
            .await
            .assert_status(StatusCode::NOT_FOUND);
        server
            .get("/api/v1/articles/work-in-progress")
            .add_header(header::COOKIE, session_cookie_for(&editor, &config))
            .await
            .assert_status_ok();
        server
            .get(&format!("/api/v1/articles/{}", article.id))
            .add_header(header::COOKIE, session_cookie_for(&editor, &config))
            .await
            .assert_status_ok();

        let page: PaginatedResponse<ArticleResponse> = server
            .get("/api/v1/articles?status=draft")
            .add_header(header::COOKIE, session_cookie_for(&editor, &config))
            .await
            .json();
        assert_eq!(page.total_count, 1);
        // Readers cannot ask for drafts
        let page: PaginatedResponse<ArticleResponse> = server.get("/api/v1/articles?status=draft").await.json();
        assert_eq!(page.total_count, 0);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_title_change_keeps_slug_and_explicit_slug_conflicts(pool: PgPool) {
        let (server, config) = create_test_app(pool.clone()).await;
        let editor = create_test_user(&pool, Role::Editor).await;
        let first = create_test_article(&pool, &editor, "first").await;
        create_test_article(&pool, &editor, "second").await;

        let updated: ArticleResponse = server
            .patch(&format!("/api/v1/articles/{}", first.id))
            .add_header(header::COOKIE, session_cookie_for(&editor, &config))
            .json(&json!({"title": "A Brand New Title"}))
            .await
            .json();
        assert_eq!(updated.slug, "first");
        assert_eq!(updated.title, "A Brand New Title");

        server
            .patch(&format!("/api/v1/articles/{}", first.id))
            .add_header(header::COOKIE, session_cookie_for(&editor, &config))
            .json(&json!({"slug": "Second"}))
            .await
            .assert_status(StatusCode::CONFLICT);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_filter_by_tag_and_delete(pool: PgPool) {
        let (server, config) = create_test_app(pool.clone()).await;
        let editor = create_test_user(&pool, Role::Editor).await;
        let tagged = create_test_article(&pool, &editor, "tagged").await;
        create_test_article(&pool, &editor, "untagged").await;

        server
            .patch(&format!("/api/v1/articles/{}", tagged.id))
            .add_header(header::COOKIE, session_cookie_for(&editor, &config))
            .json(&json!({"tags": ["Release"]}))
            .await
            .assert_status_ok();

        let page: PaginatedResponse<ArticleResponse> = server.get("/api/v1/articles?tag=release").await.json();
        assert_eq!(page.total_count, 1);
        assert_eq!(page.data[0].id, tagged.id);

        server
            .delete(&format!("/api/v1/articles/{}", tagged.id))
            .add_header(header::COOKIE, session_cookie_for(&editor, &config))
            .await
            .assert_status(StatusCode::NO_CONTENT);
        server
            .delete(&format!("/api/v1/articles/{}", tagged.id))
            .add_header(header::COOKIE, session_cookie_for(&editor, &config))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_get_article_by_id_or_uuid_shaped_slug(pool: PgPool) {
        let (server, _config) = create_test_app(pool.clone()).await;
        let author = create_test_user(&pool, Role::Editor).await;
        let slug = uuid::Uuid::new_v4().to_string();
        let article = create_test_article(&pool, &author, &slug).await;

        let by_slug: ArticleResponse = server.get(&format!("/api/v1/articles/{slug}")).await.json();
        assert_eq!(by_slug.id, article.id);
        assert_eq!(by_slug.slug, slug);

        let by_id: ArticleResponse = server.get(&format!("/api/v1/articles/{}", article.id)).await.json();
        assert_eq!(by_id.id, article.id);

        server
            .get(&format!("/api/v1/articles/{}", uuid::Uuid::new_v4()))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }
}
