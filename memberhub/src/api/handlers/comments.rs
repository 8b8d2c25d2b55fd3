//! Comments on forum threads and on articles.
//!
//! Both targets share one table and one set of rules. Reading requires that the caller can read
//! the target, and hidden comments are only listed for moderators.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use sqlx::PgConnection;
use tracing::info;

use crate::{
    AppState,
    api::{
        handlers::posts::visible_post,
        models::{
            articles::ArticleStatus,
            comments::{CommentCreate, CommentModeration, CommentResponse, CommentUpdate, ListCommentsQuery},
            pagination::PaginatedResponse,
            users::CurrentUser,
        },
    },
    auth::{
        current_user::OptionalUser,
        permissions::{
            can_read_all_resources, has_permission, operation, require_owner_or, require_visibility, resource, RequiresPermission,
        },
    },
    content::prepare_body,
    db::{
        errors::DbError,
        handlers::{Articles, Comments, Repository},
        models::comments::{CommentCreateDBRequest, CommentFilter, CommentTarget, CommentUpdateDBRequest},
    },
    errors::{Error, Result},
    types::{ArticleId, CommentId, Operation, Permission, PostId, Resource},
};

fn comment_not_found(id: CommentId) -> Error {
    Error::NotFound {
        resource: "Comment".to_string(),
        id: id.to_string(),
    }
}

fn is_comment_moderator(user: Option<&CurrentUser>) -> bool {
    user.is_some_and(|u| has_permission(u, Resource::Comments, Operation::Moderate))
}

/// Check that an article exists, is published and is visible to the caller
async fn check_article_readable(conn: &mut PgConnection, user: Option<&CurrentUser>, id: ArticleId) -> Result<()> {
    let not_found = || Error::NotFound {
        resource: "Article".to_string(),
        id: id.to_string(),
    };
    let article = Articles::new(conn).get_by_id(id).await?.ok_or_else(not_found)?;

    if user.is_some_and(|u| can_read_all_resources(u, Resource::Articles)) {
        return Ok(());
    }
    if article.status != ArticleStatus::Published {
        return Err(not_found());
    }
    require_visibility(user, article.visibility, "article")
}

/// Resolve a comment target the caller can read. Returns whether new comments are closed,
/// which only applies to locked threads.
async fn readable_target(conn: &mut PgConnection, user: Option<&CurrentUser>, target: CommentTarget) -> Result<bool> {
    match target {
        CommentTarget::Post(post_id) => Ok(visible_post(conn, user, post_id).await?.is_locked),
        CommentTarget::Article(article_id) => {
            check_article_readable(conn, user, article_id).await?;
            Ok(false)
        }
    }
}

async fn list_for_target(
    state: &AppState,
    user: Option<&CurrentUser>,
    target: CommentTarget,
    query: &ListCommentsQuery,
) -> Result<PaginatedResponse<CommentResponse>> {
    let (skip, limit) = query.pagination.content_params(&state.config.content);

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    readable_target(&mut conn, user, target).await?;

    let filter = CommentFilter {
        include_hidden: is_comment_moderator(user),
        ..CommentFilter::new(target, skip, limit)
    };
    let mut repo = Comments::new(&mut conn);
    let comments = repo.list(&filter).await?;
    let total_count = repo.count(&filter).await?;

    Ok(PaginatedResponse::new(
        comments.into_iter().map(CommentResponse::from).collect(),
        total_count,
        skip,
        limit,
    ))
}

async fn create_for_target(
    state: &AppState,
    user: &CurrentUser,
    target: CommentTarget,
    request: &CommentCreate,
) -> Result<CommentResponse> {
    let body_html = prepare_body(&request.body, &state.config.content)?;

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let closed = readable_target(&mut tx, Some(user), target).await?;
    if closed && !is_comment_moderator(Some(user)) {
        return Err(Error::InsufficientPermissions {
            required: Permission::Allow(Resource::Comments, Operation::Moderate),
            action: Operation::CreateOwn,
            resource: "comments on a locked thread".to_string(),
        });
    }

    let comment = Comments::new(&mut tx)
        .create(&CommentCreateDBRequest {
            target,
            author_id: user.id,
            body_html,
        })
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    info!("User {} commented {} on {:?}", user.id, comment.id, target);
    Ok(CommentResponse::from(comment))
}

/// Comments on a thread, oldest first
#[utoipa::path(
    get,
    path = "/posts/{id}/comments",
    tag = "comments",
    summary = "List comments on a thread",
    params(("id" = uuid::Uuid, Path, description = "Post ID"), ListCommentsQuery),
    responses(
        (status = 200, description = "Page of comments", body = PaginatedResponse<CommentResponse>),
        (status = 401, description = "Sign in to read this forum"),
        (status = 403, description = "The forum is above your access level"),
        (status = 404, description = "No such thread"),
    ),
    security((), ("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_post_comments(
    State(state): State<AppState>,
    OptionalUser(current_user): OptionalUser,
    Path(post_id): Path<PostId>,
    Query(query): Query<ListCommentsQuery>,
) -> Result<Json<PaginatedResponse<CommentResponse>>> {
    let page = list_for_target(&state, current_user.as_ref(), CommentTarget::Post(post_id), &query).await?;
    Ok(Json(page))
}

/// Reply to a thread
#[utoipa::path(
    post,
    path = "/posts/{id}/comments",
    tag = "comments",
    summary = "Comment on a thread",
    request_body = CommentCreate,
    params(("id" = uuid::Uuid, Path, description = "Post ID")),
    responses(
        (status = 201, description = "Comment created", body = CommentResponse),
        (status = 400, description = "Empty or oversized body"),
        (status = 403, description = "The thread is locked or above your access level"),
        (status = 404, description = "No such thread"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_post_comment(
    State(state): State<AppState>,
    Path(post_id): Path<PostId>,
    current_user: RequiresPermission<resource::Comments, operation::CreateOwn>,
    Json(request): Json<CommentCreate>,
) -> Result<(StatusCode, Json<CommentResponse>)> {
    let comment = create_for_target(&state, &current_user, CommentTarget::Post(post_id), &request).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

/// Comments on an article, oldest first
#[utoipa::path(
    get,
    path = "/articles/{id}/comments",
    tag = "comments",
    summary = "List comments on an article",
    params(("id" = uuid::Uuid, Path, description = "Article ID"), ListCommentsQuery),
    responses(
        (status = 200, description = "Page of comments", body = PaginatedResponse<CommentResponse>),
        (status = 401, description = "Sign in to read this article"),
        (status = 403, description = "The article is above your access level"),
        (status = 404, description = "No such published article"),
    ),
    security((), ("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_article_comments(
    State(state): State<AppState>,
    OptionalUser(current_user): OptionalUser,
    Path(article_id): Path<ArticleId>,
    Query(query): Query<ListCommentsQuery>,
) -> Result<Json<PaginatedResponse<CommentResponse>>> {
    let page = list_for_target(&state, current_user.as_ref(), CommentTarget::Article(article_id), &query).await?;
    Ok(Json(page))
}

#[utoipa::path(
    post,
    path = "/articles/{id}/comments",
    tag = "comments",
    summary = "Comment on an article",
    request_body = CommentCreate,
    params(("id" = uuid::Uuid, Path, description = "Article ID")),
    responses(
        (status = 201, description = "Comment created", body = CommentResponse),
        (status = 400, description = "Empty or oversized body"),
        (status = 403, description = "The article is above your access level"),
        (status = 404, description = "No such published article"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_article_comment(
    State(state): State<AppState>,
    Path(article_id): Path<ArticleId>,
    current_user: RequiresPermission<resource::Comments, operation::CreateOwn>,
    Json(request): Json<CommentCreate>,
) -> Result<(StatusCode, Json<CommentResponse>)> {
    let comment = create_for_target(&state, &current_user, CommentTarget::Article(article_id), &request).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

#[utoipa::path(
    patch,
    path = "/comments/{id}",
    tag = "comments",
    summary = "Edit a comment",
    request_body = CommentUpdate,
    params(("id" = uuid::Uuid, Path, description = "Comment ID")),
    responses(
        (status = 200, description = "Comment updated", body = CommentResponse),
        (status = 400, description = "Empty or oversized body"),
        (status = 403, description = "Not your comment"),
        (status = 404, description = "No such comment"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_comment(
    State(state): State<AppState>,
    Path(id): Path<CommentId>,
    current_user: CurrentUser,
    Json(request): Json<CommentUpdate>,
) -> Result<Json<CommentResponse>> {
    let body_html = prepare_body(&request.body, &state.config.content)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Comments::new(&mut conn);
    let comment = repo.get_by_id(id).await?.ok_or_else(|| comment_not_found(id))?;
    require_owner_or(&current_user, comment.author_id, Resource::Comments, Operation::UpdateAll)?;

    let comment = repo
        .update(id, &CommentUpdateDBRequest { body_html })
        .await
        .map_err(|e| match e {
            DbError::NotFound => comment_not_found(id),
            other => Error::Database(other),
        })?;
    Ok(Json(CommentResponse::from(comment)))
}

#[utoipa::path(
    delete,
    path = "/comments/{id}",
    tag = "comments",
    summary = "Delete a comment",
    params(("id" = uuid::Uuid, Path, description = "Comment ID")),
    responses(
        (status = 204, description = "Comment deleted"),
        (status = 403, description = "Not your comment"),
        (status = 404, description = "No such comment"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn delete_comment(State(state): State<AppState>, Path(id): Path<CommentId>, current_user: CurrentUser) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Comments::new(&mut conn);
    let comment = repo.get_by_id(id).await?.ok_or_else(|| comment_not_found(id))?;
    require_owner_or(&current_user, comment.author_id, Resource::Comments, Operation::DeleteAll)?;

    if !repo.delete(id).await? {
        return Err(comment_not_found(id));
    }

    info!("User {} deleted comment {}", current_user.id, id);
    Ok(StatusCode::NO_CONTENT)
}

/// Hide or unhide a comment
#[utoipa::path(
    post,
    path = "/comments/{id}/moderation",
    tag = "comments",
    summary = "Moderate a comment",
    request_body = CommentModeration,
    params(("id" = uuid::Uuid, Path, description = "Comment ID")),
    responses(
        (status = 200, description = "Comment updated", body = CommentResponse),
        (status = 403, description = "Requires the moderator role"),
        (status = 404, description = "No such comment"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn moderate_comment(
    State(state): State<AppState>,
    Path(id): Path<CommentId>,
    current_user: RequiresPermission<resource::Comments, operation::Moderate>,
    Json(request): Json<CommentModeration>,
) -> Result<Json<CommentResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let comment = Comments::new(&mut conn)
        .set_hidden(id, request.hidden)
        .await
        .map_err(|e| match e {
            DbError::NotFound => comment_not_found(id),
            other => Error::Database(other),
        })?;

    info!("User {} set comment {} hidden={}", current_user.id, id, request.hidden);
    Ok(Json(CommentResponse::from(comment)))
}
