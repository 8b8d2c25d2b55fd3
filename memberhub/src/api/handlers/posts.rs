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
        handlers::forums::visible_forum,
        models::{
            forums::{ListPostsQuery, PostCreate, PostModeration, PostResponse, PostUpdate},
            pagination::PaginatedResponse,
            users::CurrentUser,
        },
    },
    auth::{
        current_user::OptionalUser,
        permissions::{has_permission, operation, require_owner_or, resource, RequiresPermission},
    },
    content::{prepare_body, prepare_title},
    db::{
        errors::DbError,
        handlers::{Posts, Repository},
        models::posts::{PostCreateDBRequest, PostDBResponse, PostFilter, PostModerationDBRequest, PostUpdateDBRequest},
    },
    errors::{Error, Result},
    types::{ForumId, Operation, Permission, PostId, Resource},
};

fn post_not_found(id: PostId) -> Error {
    Error::NotFound {
        resource: "Post".to_string(),
        id: id.to_string(),
    }
}

fn map_post_error(id: PostId) -> impl FnOnce(DbError) -> Error {
    move |e| match e {
        DbError::NotFound => post_not_found(id),
        other => Error::Database(other),
    }
}

fn is_post_moderator(user: Option<&CurrentUser>) -> bool {
    user.is_some_and(|u| has_permission(u, Resource::Posts, Operation::Moderate))
}

/// Load a thread the caller may read: its forum must be visible to them, and hidden threads
/// only exist for moderators.
pub(crate) async fn visible_post(conn: &mut PgConnection, user: Option<&CurrentUser>, id: PostId) -> Result<PostDBResponse> {
    let post = Posts::new(conn).get_by_id(id).await?.ok_or_else(|| post_not_found(id))?;
    if post.is_hidden && !is_post_moderator(user) {
        return Err(post_not_found(id));
    }
    visible_forum(conn, user, post.forum_id).await?;
    Ok(post)
}

/// Threads in a forum, pinned first and then by latest activity
#[utoipa::path(
    get,
    path = "/forums/{id}/posts",
    tag = "forums",
    summary = "List threads in a forum",
    params(("id" = uuid::Uuid, Path, description = "Forum ID"), ListPostsQuery),
    responses(
        (status = 200, description = "Page of threads", body = PaginatedResponse<PostResponse>),
        (status = 401, description = "Sign in to read this forum"),
        (status = 403, description = "The forum is above your access level"),
        (status = 404, description = "No such forum"),
    ),
    security((), ("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_posts(
    State(state): State<AppState>,
    OptionalUser(current_user): OptionalUser,
    Path(forum_id): Path<ForumId>,
    Query(query): Query<ListPostsQuery>,
) -> Result<Json<PaginatedResponse<PostResponse>>> {
    let (skip, limit) = query.pagination.content_params(&state.config.content);

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    visible_forum(&mut conn, current_user.as_ref(), forum_id).await?;

    let filter = PostFilter {
        forum_id: Some(forum_id),
        include_hidden: is_post_moderator(current_user.as_ref()),
        ..PostFilter::new(skip, limit)
    };
    let mut repo = Posts::new(&mut conn);
    let posts = repo.list(&filter).await?;
    let total_count = repo.count(&filter).await?;

    Ok(Json(PaginatedResponse::new(
        posts.into_iter().map(PostResponse::from).collect(),
        total_count,
        skip,
        limit,
    )))
}

/// Start a thread
#[utoipa::path(
    post,
    path = "/forums/{id}/posts",
    tag = "forums",
    summary = "Create a thread",
    request_body = PostCreate,
    params(("id" = uuid::Uuid, Path, description = "Forum ID")),
    responses(
        (status = 201, description = "Thread created", body = PostResponse),
        (status = 400, description = "Empty or oversized title or body"),
        (status = 403, description = "The forum is locked or above your access level"),
        (status = 404, description = "No such forum"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_post(
    State(state): State<AppState>,
    Path(forum_id): Path<ForumId>,
    current_user: RequiresPermission<resource::Posts, operation::CreateOwn>,
    Json(request): Json<PostCreate>,
) -> Result<(StatusCode, Json<PostResponse>)> {
    let title = prepare_title(&request.title)?;
    let body_html = prepare_body(&request.body, &state.config.content)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let forum = visible_forum(&mut conn, Some(&current_user.user), forum_id).await?;
    if forum.is_locked && !is_post_moderator(Some(&current_user.user)) {
        return Err(Error::InsufficientPermissions {
            required: Permission::Allow(Resource::Posts, Operation::Moderate),
            action: Operation::CreateOwn,
            resource: format!("posts in the locked forum {}", forum.name),
        });
    }

    let post = Posts::new(&mut conn)
        .create(&PostCreateDBRequest {
            forum_id,
            author_id: current_user.id,
            title,
            body_html,
        })
        .await?;

    info!("User {} started thread {} in forum {}", current_user.id, post.id, forum_id);
    Ok((StatusCode::CREATED, Json(PostResponse::from(post))))
}

#[utoipa::path(
    get,
    path = "/posts/{id}",
    tag = "forums",
    summary = "Get a thread",
    params(("id" = uuid::Uuid, Path, description = "Post ID")),
    responses(
        (status = 200, description = "The thread", body = PostResponse),
        (status = 401, description = "Sign in to read this forum"),
        (status = 403, description = "The forum is above your access level"),
        (status = 404, description = "No such thread"),
    ),
    security((), ("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_post(
    State(state): State<AppState>,
    OptionalUser(current_user): OptionalUser,
    Path(id): Path<PostId>,
) -> Result<Json<PostResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let post = visible_post(&mut conn, current_user.as_ref(), id).await?;
    Ok(Json(PostResponse::from(post)))
}

/// Edit a thread. Authors may edit their own; moderators may edit any.
#[utoipa::path(
    patch,
    path = "/posts/{id}",
    tag = "forums",
    summary = "Update a thread",
    request_body = PostUpdate,
    params(("id" = uuid::Uuid, Path, description = "Post ID")),
    responses(
        (status = 200, description = "Thread updated", body = PostResponse),
        (status = 400, description = "Empty or oversized title or body"),
        (status = 403, description = "Not your thread"),
        (status = 404, description = "No such thread"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_post(
    State(state): State<AppState>,
    Path(id): Path<PostId>,
    current_user: CurrentUser,
    Json(request): Json<PostUpdate>,
) -> Result<Json<PostResponse>> {
    let update = PostUpdateDBRequest {
        title: request.title.as_deref().map(prepare_title).transpose()?,
        body_html: request
            .body
            .as_deref()
            .map(|body| prepare_body(body, &state.config.content))
            .transpose()?,
    };

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let post = visible_post(&mut conn, Some(&current_user), id).await?;
    require_owner_or(&current_user, post.author_id, Resource::Posts, Operation::UpdateAll)?;

    let post = Posts::new(&mut conn).update(id, &update).await.map_err(map_post_error(id))?;
    Ok(Json(PostResponse::from(post)))
}

/// Delete a thread and its comments
#[utoipa::path(
    delete,
    path = "/posts/{id}",
    tag = "forums",
    summary = "Delete a thread",
    params(("id" = uuid::Uuid, Path, description = "Post ID")),
    responses(
        (status = 204, description = "Thread deleted"),
        (status = 403, description = "Not your thread"),
        (status = 404, description = "No such thread"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn delete_post(State(state): State<AppState>, Path(id): Path<PostId>, current_user: CurrentUser) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let post = visible_post(&mut conn, Some(&current_user), id).await?;
    require_owner_or(&current_user, post.author_id, Resource::Posts, Operation::DeleteAll)?;

    if !Posts::new(&mut conn).delete(id).await? {
        return Err(post_not_found(id));
    }

    info!("User {} deleted thread {}", current_user.id, id);
    Ok(StatusCode::NO_CONTENT)
}

/// Pin, lock or hide a thread. Omitted flags are left as they are.
#[utoipa::path(
    post,
    path = "/posts/{id}/moderation",
    tag = "forums",
    summary = "Moderate a thread",
    request_body = PostModeration,
    params(("id" = uuid::Uuid, Path, description = "Post ID")),
    responses(
        (status = 200, description = "Thread updated", body = PostResponse),
        (status = 403, description = "Requires the moderator role"),
        (status = 404, description = "No such thread"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn moderate_post(
    State(state): State<AppState>,
    Path(id): Path<PostId>,
    current_user: RequiresPermission<resource::Posts, operation::Moderate>,
    Json(request): Json<PostModeration>,
) -> Result<Json<PostResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let post = Posts::new(&mut conn)
        .moderate(
            id,
            &PostModerationDBRequest {
                is_pinned: request.pinned,
                is_locked: request.locked,
                is_hidden: request.hidden,
            },
        )
        .await
        .map_err(map_post_error(id))?;

    info!(
        "User {} moderated thread {}: pinned={} locked={} hidden={}",
        current_user.id, id, post.is_pinned, post.is_locked, post.is_hidden
    );
    Ok(Json(PostResponse::from(post)))
}
