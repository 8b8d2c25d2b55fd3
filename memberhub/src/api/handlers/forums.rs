use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use sqlx::PgConnection;
use tracing::info;

use crate::{
    AppState,
    api::models::{
        forums::{ForumCreate, ForumModeration, ForumResponse, ForumUpdate, ListForumsQuery},
        pagination::PaginatedResponse,
        users::CurrentUser,
    },
    auth::{
        current_user::OptionalUser,
        permissions::{operation, require_visibility, resource, RequiresPermission},
    },
    content::{plain_text, slugify},
    db::{
        errors::DbError,
        handlers::{Forums, Repository},
        models::forums::{ForumCreateDBRequest, ForumDBResponse, ForumFilter, ForumUpdateDBRequest},
    },
    errors::{Error, Result},
    types::{AccessLevel, ForumId},
};

const MAX_NAME_LENGTH: usize = 100;

fn forum_not_found(id: ForumId) -> Error {
    Error::NotFound {
        resource: "Forum".to_string(),
        id: id.to_string(),
    }
}

fn map_forum_error(id: ForumId) -> impl FnOnce(DbError) -> Error {
    move |e| match e {
        DbError::NotFound => forum_not_found(id),
        other => Error::Database(other),
    }
}

fn prepare_name(name: &str) -> Result<String> {
    let name = plain_text(name);
    if name.is_empty() {
        return Err(Error::BadRequest {
            message: "Forum name must not be empty".to_string(),
        });
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(Error::BadRequest {
            message: format!("Forum name must be no more than {MAX_NAME_LENGTH} characters"),
        });
    }
    Ok(name)
}

/// Load a forum the caller is allowed to read
pub(crate) async fn visible_forum(conn: &mut PgConnection, user: Option<&CurrentUser>, id: ForumId) -> Result<ForumDBResponse> {
    let forum = Forums::new(conn).get_by_id(id).await?.ok_or_else(|| forum_not_found(id))?;
    require_visibility(user, forum.visibility, "forum")?;
    Ok(forum)
}

/// List the forums the caller can read, in display order
#[utoipa::path(
    get,
    path = "/forums",
    tag = "forums",
    summary = "List forums",
    params(ListForumsQuery),
    responses(
        (status = 200, description = "Page of forums", body = PaginatedResponse<ForumResponse>),
    ),
    security((), ("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_forums(
    State(state): State<AppState>,
    OptionalUser(current_user): OptionalUser,
    Query(query): Query<ListForumsQuery>,
) -> Result<Json<PaginatedResponse<ForumResponse>>> {
    let (skip, limit) = query.pagination.content_params(&state.config.content);
    let filter = ForumFilter {
        max_visibility: Some(current_user.as_ref().map_or(AccessLevel::Public, |u| u.access_level())),
        ..ForumFilter::new(skip, limit)
    };

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Forums::new(&mut conn);
    let forums = repo.list(&filter).await?;
    let total_count = repo.count(&filter).await?;

    Ok(Json(PaginatedResponse::new(
        forums.into_iter().map(ForumResponse::from).collect(),
        total_count,
        skip,
        limit,
    )))
}

#[utoipa::path(
    get,
    path = "/forums/{id}",
    tag = "forums",
    summary = "Get a forum",
    params(("id" = uuid::Uuid, Path, description = "Forum ID")),
    responses(
        (status = 200, description = "The forum", body = ForumResponse),
        (status = 401, description = "Sign in to read this forum"),
        (status = 403, description = "The forum is above your access level"),
        (status = 404, description = "No such forum"),
    ),
    security((), ("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_forum(
    State(state): State<AppState>,
    OptionalUser(current_user): OptionalUser,
    Path(id): Path<ForumId>,
) -> Result<Json<ForumResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let forum = visible_forum(&mut conn, current_user.as_ref(), id).await?;
    Ok(Json(ForumResponse::from(forum)))
}

#[utoipa::path(
    post,
    path = "/forums",
    tag = "forums",
    summary = "Create a forum",
    request_body = ForumCreate,
    responses(
        (status = 201, description = "Forum created", body = ForumResponse),
        (status = 400, description = "Invalid name"),
        (status = 403, description = "Requires the editor role"),
        (status = 409, description = "The slug is taken"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_forum(
    State(state): State<AppState>,
    current_user: RequiresPermission<resource::Forums, operation::CreateAll>,
    Json(request): Json<ForumCreate>,
) -> Result<(StatusCode, Json<ForumResponse>)> {
    let name = prepare_name(&request.name)?;
    let slug = slugify(request.slug.as_deref().unwrap_or(&name));

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let forum = Forums::new(&mut conn)
        .create(&ForumCreateDBRequest {
            name,
            slug,
            description: request.description.as_deref().map(plain_text).filter(|d| !d.is_empty()),
            visibility: request.visibility.unwrap_or(AccessLevel::Members),
            position: request.position.unwrap_or(0),
        })
        .await?;

    info!("User {} created forum {} ({})", current_user.id, forum.id, forum.slug);
    Ok((StatusCode::CREATED, Json(ForumResponse::from(forum))))
}

#[utoipa::path(
    patch,
    path = "/forums/{id}",
    tag = "forums",
    summary = "Update a forum",
    request_body = ForumUpdate,
    params(("id" = uuid::Uuid, Path, description = "Forum ID")),
    responses(
        (status = 200, description = "Forum updated", body = ForumResponse),
        (status = 400, description = "Invalid name"),
        (status = 403, description = "Requires the editor role"),
        (status = 404, description = "No such forum"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_forum(
    State(state): State<AppState>,
    Path(id): Path<ForumId>,
    current_user: RequiresPermission<resource::Forums, operation::UpdateAll>,
    Json(request): Json<ForumUpdate>,
) -> Result<Json<ForumResponse>> {
    let update = ForumUpdateDBRequest {
        name: request.name.as_deref().map(prepare_name).transpose()?,
        description: request.description.as_deref().map(plain_text),
        visibility: request.visibility,
        is_locked: request.is_locked,
        position: request.position,
    };

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let forum = Forums::new(&mut conn).update(id, &update).await.map_err(map_forum_error(id))?;

    info!("User {} updated forum {}", current_user.id, id);
    Ok(Json(ForumResponse::from(forum)))
}

/// Delete a forum with all of its threads
#[utoipa::path(
    delete,
    path = "/forums/{id}",
    tag = "forums",
    summary = "Delete a forum",
    params(("id" = uuid::Uuid, Path, description = "Forum ID")),
    responses(
        (status = 204, description = "Forum deleted"),
        (status = 403, description = "Requires admin"),
        (status = 404, description = "No such forum"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn delete_forum(
    State(state): State<AppState>,
    Path(id): Path<ForumId>,
    current_user: RequiresPermission<resource::Forums, operation::DeleteAll>,
) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    if !Forums::new(&mut conn).delete(id).await? {
        return Err(forum_not_found(id));
    }

    info!("User {} deleted forum {}", current_user.id, id);
    Ok(StatusCode::NO_CONTENT)
}

/// Lock or unlock a forum. Locked forums only accept new threads from moderators.
#[utoipa::path(
    post,
    path = "/forums/{id}/moderation",
    tag = "forums",
    summary = "Moderate a forum",
    request_body = ForumModeration,
    params(("id" = uuid::Uuid, Path, description = "Forum ID")),
    responses(
        (status = 200, description = "Forum updated", body = ForumResponse),
        (status = 403, description = "Requires the moderator role"),
        (status = 404, description = "No such forum"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn moderate_forum(
    State(state): State<AppState>,
    Path(id): Path<ForumId>,
    current_user: RequiresPermission<resource::Forums, operation::Moderate>,
    Json(request): Json<ForumModeration>,
) -> Result<Json<ForumResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let forum = Forums::new(&mut conn)
        .update(
            id,
            &ForumUpdateDBRequest {
                is_locked: Some(request.locked),
                ..Default::default()
            },
        )
        .await
        .map_err(map_forum_error(id))?;

    info!("User {} set forum {} locked={}", current_user.id, id, request.locked);
    Ok(Json(ForumResponse::from(forum)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::users::Role;
    use crate::test_utils::{create_test_admin_user, create_test_app, create_test_forum, create_test_user, session_cookie_for};
    use axum::http::header;
    use serde_json::json;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_forum_listing_respects_visibility(pool: PgPool) {
        let (server, config) = create_test_app(pool.clone()).await;
        let editor = create_test_user(&pool, Role::Editor).await;
        let member = create_test_user(&pool, Role::Member).await;

        for (name, visibility) in [("Lobby", "public"), ("Members", "members"), ("Backstage", "subscribers")] {
            server
                .post("/api/v1/forums")
                .add_header(header::COOKIE, session_cookie_for(&editor, &config))
                .json(&json!({"name": name, "visibility": visibility}))
                .await
                .assert_status(StatusCode::CREATED);
        }

        let anonymous: PaginatedResponse<ForumResponse> = server.get("/api/v1/forums").await.json();
        assert_eq!(anonymous.total_count, 1);
        assert_eq!(anonymous.data[0].slug, "lobby");

        let members: PaginatedResponse<ForumResponse> = server
            .get("/api/v1/forums")
            .add_header(header::COOKIE, session_cookie_for(&member, &config))
            .await
            .json();
        assert_eq!(members.total_count, 2);

        let staff: PaginatedResponse<ForumResponse> = server
            .get("/api/v1/forums")
            .add_header(header::COOKIE, session_cookie_for(&editor, &config))
            .await
            .json();
        assert_eq!(staff.total_count, 3);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_get_forum_above_access_level(pool: PgPool) {
        let (server, config) = create_test_app(pool.clone()).await;
        let member = create_test_user(&pool, Role::Member).await;
        let forum = create_test_forum(&pool, "general").await;

        // Test forums are members-only
        server
            .get(&format!("/api/v1/forums/{}", forum.id))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
        server
            .get(&format!("/api/v1/forums/{}", forum.id))
            .add_header(header::COOKIE, session_cookie_for(&member, &config))
            .await
            .assert_status_ok();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_duplicate_slug_conflicts(pool: PgPool) {
        let (server, config) = create_test_app(pool.clone()).await;
        let editor = create_test_user(&pool, Role::Editor).await;
        create_test_forum(&pool, "general").await;

        server
            .post("/api/v1/forums")
            .add_header(header::COOKIE, session_cookie_for(&editor, &config))
            .json(&json!({"name": "General"}))
            .await
            .assert_status(StatusCode::CONFLICT);

        server
            .post("/api/v1/forums")
            .add_header(header::COOKIE, session_cookie_for(&editor, &config))
            .json(&json!({"name": "General", "slug": "General Chat"}))
            .await
            .assert_status(StatusCode::CREATED);

        server
            .post("/api/v1/forums")
            .add_header(header::COOKIE, session_cookie_for(&editor, &config))
            .json(&json!({"name": "  <b></b> "}))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_update_moderate_and_delete_permissions(pool: PgPool) {
        let (server, config) = create_test_app(pool.clone()).await;
        let editor = create_test_user(&pool, Role::Editor).await;
        let moderator = create_test_user(&pool, Role::Moderator).await;
        let admin = create_test_admin_user(&pool).await;
        let forum = create_test_forum(&pool, "general").await;

        let updated: ForumResponse = server
            .patch(&format!("/api/v1/forums/{}", forum.id))
            .add_header(header::COOKIE, session_cookie_for(&editor, &config))
            .json(&json!({"description": "Talk about <i>anything</i>", "position": 3}))
            .await
            .json();
        assert_eq!(updated.description.as_deref(), Some("Talk about anything"));
        assert_eq!(updated.position, 3);

        server
            .patch(&format!("/api/v1/forums/{}", forum.id))
            .add_header(header::COOKIE, session_cookie_for(&moderator, &config))
            .json(&json!({"position": 1}))
            .await
            .assert_status(StatusCode::FORBIDDEN);

        let locked: ForumResponse = server
            .post(&format!("/api/v1/forums/{}/moderation", forum.id))
            .add_header(header::COOKIE, session_cookie_for(&moderator, &config))
            .json(&json!({"locked": true}))
            .await
            .json();
        assert!(locked.is_locked);

        server
            .delete(&format!("/api/v1/forums/{}", forum.id))
            .add_header(header::COOKIE, session_cookie_for(&editor, &config))
            .await
            .assert_status(StatusCode::FORBIDDEN);
        server
            .delete(&format!("/api/v1/forums/{}", forum.id))
            .add_header(header::COOKIE, session_cookie_for(&admin, &config))
            .await
            .assert_status(StatusCode::NO_CONTENT);
        server
            .patch(&format!("/api/v1/forums/{}", forum.id))
            .add_header(header::COOKIE, session_cookie_for(&admin, &config))
            .json(&json!({"position": 1}))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }
}
