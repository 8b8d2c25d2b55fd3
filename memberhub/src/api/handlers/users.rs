use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use tracing::info;

use crate::{
    AppState,
    api::models::{
        pagination::PaginatedResponse,
        users::{CurrentUser, ListUsersQuery, Role, UserResponse, UserUpdate},
    },
    auth::{
        entitlements::merge_admin_role_update,
        permissions::{authorize, operation, require_owner_or, resource, RequiresPermission},
    },
    db::{
        handlers::{Repository, Users},
        models::users::{UserFilter, UserUpdateDBRequest},
    },
    errors::{Error, Result},
    types::{Operation, Permission, Resource, UserId, UserIdOrCurrent},
};

/// List users
#[utoipa::path(
    get,
    path = "/users",
    tag = "users",
    summary = "List users",
    params(ListUsersQuery),
    responses(
        (status = 200, description = "Page of users", body = PaginatedResponse<UserResponse>),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Requires staff access"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_users(
    State(state): State<AppState>,
    _: RequiresPermission<resource::Users, operation::ReadAll>,
    Query(query): Query<ListUsersQuery>,
) -> Result<Json<PaginatedResponse<UserResponse>>> {
    let (skip, limit) = query.pagination.params();
    let filter = UserFilter {
        search: query.search.filter(|s| !s.trim().is_empty()),
        role: query.role,
        ..UserFilter::new(skip, limit)
    };

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Users::new(&mut conn);
    let users = repo.list(&filter).await?;
    let total_count = repo.count(&filter).await?;

    Ok(Json(PaginatedResponse::new(
        users.into_iter().map(UserResponse::from).collect(),
        total_count,
        skip,
        limit,
    )))
}

/// Get a user
#[utoipa::path(
    get,
    path = "/users/{user_id}",
    tag = "users",
    summary = "Get a user",
    params(("user_id" = String, Path, description = "User ID, or `current`")),
    responses(
        (status = 200, description = "User", body = UserResponse),
        (status = 403, description = "Not your account"),
        (status = 404, description = "No such user"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserIdOrCurrent>,
    current_user: CurrentUser,
) -> Result<Json<UserResponse>> {
    let user_id = user_id.resolve(current_user.id);
    require_owner_or(&current_user, user_id, Resource::Users, Operation::ReadAll)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut conn).get_by_id(user_id).await?.ok_or_else(|| Error::NotFound {
        resource: "User".to_string(),
        id: user_id.to_string(),
    })?;

    Ok(Json(UserResponse::from(user)))
}

/// Update a user.
///
/// Members may change their own display name. Suspending accounts and editing staff roles is for
/// admins; the billing-managed `Subscriber` role cannot be set here.
#[utoipa::path(
    patch,
    path = "/users/{user_id}",
    tag = "users",
    summary = "Update a user",
    request_body = UserUpdate,
    params(("user_id" = String, Path, description = "User ID, or `current`")),
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 400, description = "Invalid update"),
        (status = 403, description = "Insufficient permissions"),
        (status = 404, description = "No such user"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserIdOrCurrent>,
    current_user: CurrentUser,
    Json(request): Json<UserUpdate>,
) -> Result<Json<UserResponse>> {
    let user_id = user_id.resolve(current_user.id);
    require_owner_or(&current_user, user_id, Resource::Users, Operation::UpdateAll)?;

    if request.is_suspended.is_some() {
        authorize(
            &current_user,
            Permission::Allow(Resource::Users, Operation::UpdateAll),
            Operation::UpdateAll,
            "user suspension",
        )?;
        if user_id == current_user.id {
            return Err(Error::BadRequest {
                message: "You cannot suspend your own account".to_string(),
            });
        }
    }
    if request.roles.is_some() {
        authorize(
            &current_user,
            Permission::Allow(Resource::Roles, Operation::UpdateAll),
            Operation::UpdateAll,
            Resource::Roles.to_string(),
        )?;
    }

    let display_name = match request.display_name {
        Some(name) => {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(Error::BadRequest {
                    message: "Display name must not be empty".to_string(),
                });
            }
            Some(name)
        }
        None => None,
    };

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Users::new(&mut tx);

    let existing = repo.get_by_id(user_id).await?.ok_or_else(|| Error::NotFound {
        resource: "User".to_string(),
        id: user_id.to_string(),
    })?;
    if existing.is_protected && request.is_suspended == Some(true) {
        return Err(Error::BadRequest {
            message: "The initial admin account cannot be suspended".to_string(),
        });
    }

    let mut updated = repo
        .update(
            user_id,
            &UserUpdateDBRequest {
                display_name,
                is_suspended: request.is_suspended,
                password_hash: None,
            },
        )
        .await?;

    if let Some(requested) = request.roles {
        let roles = merge_admin_role_update(&existing.roles, &requested);
        let loses_admin = existing.roles.contains(&Role::Admin) && !roles.contains(&Role::Admin);
        if loses_admin && existing.is_protected {
            return Err(Error::BadRequest {
                message: "The initial admin account cannot lose the Admin role".to_string(),
            });
        }
        if loses_admin && user_id == current_user.id {
            return Err(Error::BadRequest {
                message: "You cannot remove your own Admin role".to_string(),
            });
        }
        updated.roles = repo.set_roles(user_id, &roles).await?;
        info!("User {} set roles of {} to {:?}", current_user.id, user_id, updated.roles);
    }

    tx.commit().await.map_err(|e| Error::Database(e.into()))?;
    Ok(Json(UserResponse::from(updated)))
}

/// Delete a user
#[utoipa::path(
    delete,
    path = "/users/{user_id}",
    tag = "users",
    summary = "Delete a user",
    params(("user_id" = uuid::Uuid, Path, description = "User ID")),
    responses(
        (status = 204, description = "User deleted"),
        (status = 400, description = "The user is protected"),
        (status = 403, description = "Requires admin"),
        (status = 404, description = "No such user"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    current_user: RequiresPermission<resource::Users, operation::DeleteAll>,
) -> Result<StatusCode> {
    if user_id == current_user.id {
        return Err(Error::BadRequest {
            message: "You cannot delete your own account".to_string(),
        });
    }

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    if !Users::new(&mut conn).delete(user_id).await? {
        return Err(Error::NotFound {
            resource: "User".to_string(),
            id: user_id.to_string(),
        });
    }

    info!("User {} deleted user {}", current_user.id, user_id);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_admin_user, create_test_app, create_test_user, session_cookie_for};
    use axum::http::header;
    use serde_json::json;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_list_users_requires_staff(pool: PgPool) {
        let (server, config) = create_test_app(pool.clone()).await;
        let member = create_test_user(&pool, Role::Member).await;
        let moderator = create_test_user(&pool, Role::Moderator).await;

        server
            .get("/api/v1/users")
            .add_header(header::COOKIE, session_cookie_for(&member, &config))
            .await
            .assert_status(StatusCode::FORBIDDEN);

        let response = server
            .get("/api/v1/users?limit=1")
            .add_header(header::COOKIE, session_cookie_for(&moderator, &config))
            .await;
        response.assert_status_ok();
        let page: PaginatedResponse<UserResponse> = response.json();
        assert_eq!(page.data.len(), 1);
        assert!(page.total_count >= 2);
        assert_eq!(page.limit, 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_list_users_filters_by_role(pool: PgPool) {
        let (server, config) = create_test_app(pool.clone()).await;
        let admin = create_test_admin_user(&pool).await;
        let editor = create_test_user(&pool, Role::Editor).await;
        create_test_user(&pool, Role::Member).await;

        let page: PaginatedResponse<UserResponse> = server
            .get("/api/v1/users?role=Editor")
            .add_header(header::COOKIE, session_cookie_for(&admin, &config))
            .await
            .json();
        assert_eq!(page.total_count, 1);
        assert_eq!(page.data[0].id, editor.id);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_get_user_own_or_staff(pool: PgPool) {
        let (server, config) = create_test_app(pool.clone()).await;
        let member = create_test_user(&pool, Role::Member).await;
        let other = create_test_user(&pool, Role::Member).await;
        let moderator = create_test_user(&pool, Role::Moderator).await;

        let me: UserResponse = server
            .get("/api/v1/users/current")
            .add_header(header::COOKIE, session_cookie_for(&member, &config))
            .await
            .json();
        assert_eq!(me.id, member.id);

        server
            .get(&format!("/api/v1/users/{}", other.id))
            .add_header(header::COOKIE, session_cookie_for(&member, &config))
            .await
            .assert_status(StatusCode::FORBIDDEN);

        server
            .get(&format!("/api/v1/users/{}", other.id))
            .add_header(header::COOKIE, session_cookie_for(&moderator, &config))
            .await
            .assert_status_ok();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_member_updates_own_display_name_only(pool: PgPool) {
        let (server, config) = create_test_app(pool.clone()).await;
        let member = create_test_user(&pool, Role::Member).await;
        let cookie = session_cookie_for(&member, &config);

        let updated: UserResponse = server
            .patch("/api/v1/users/current")
            .add_header(header::COOKIE, cookie.clone())
            .json(&json!({"display_name": "  New Name "}))
            .await
            .json();
        assert_eq!(updated.display_name, "New Name");

        server
            .patch("/api/v1/users/current")
            .add_header(header::COOKIE, cookie.clone())
            .json(&json!({"roles": ["Admin"]}))
            .await
            .assert_status(StatusCode::FORBIDDEN);

        server
            .patch("/api/v1/users/current")
            .add_header(header::COOKIE, cookie)
            .json(&json!({"display_name": "   "}))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_admin_role_edit_keeps_billing_roles(pool: PgPool) {
        let (server, config) = create_test_app(pool.clone()).await;
        let admin = create_test_admin_user(&pool).await;
        let subscriber = create_test_user(&pool, Role::Subscriber).await;

        let updated: UserResponse = server
            .patch(&format!("/api/v1/users/{}", subscriber.id))
            .add_header(header::COOKIE, session_cookie_for(&admin, &config))
            .json(&json!({"roles": ["Moderator"]}))
            .await
            .json();
        assert_eq!(updated.roles, vec![Role::Member, Role::Subscriber, Role::Moderator]);

        // Requesting Subscriber does not grant it either
        let member = create_test_user(&pool, Role::Member).await;
        let updated: UserResponse = server
            .patch(&format!("/api/v1/users/{}", member.id))
            .add_header(header::COOKIE, session_cookie_for(&admin, &config))
            .json(&json!({"roles": ["Subscriber", "Editor"]}))
            .await
            .json();
        assert_eq!(updated.roles, vec![Role::Member, Role::Editor]);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_admin_suspends_user(pool: PgPool) {
        let (server, config) = create_test_app(pool.clone()).await;
        let admin = create_test_admin_user(&pool).await;
        let member = create_test_user(&pool, Role::Member).await;
        let member_cookie = session_cookie_for(&member, &config);

        let updated: UserResponse = server
            .patch(&format!("/api/v1/users/{}", member.id))
            .add_header(header::COOKIE, session_cookie_for(&admin, &config))
            .json(&json!({"is_suspended": true}))
            .await
            .json();
        assert!(updated.is_suspended);

        server
            .get("/api/v1/users/current")
            .add_header(header::COOKIE, member_cookie)
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_delete_user(pool: PgPool) {
        let (server, config) = create_test_app(pool.clone()).await;
        let admin = create_test_admin_user(&pool).await;
        let member = create_test_user(&pool, Role::Member).await;
        let cookie = session_cookie_for(&admin, &config);

        server
            .delete(&format!("/api/v1/users/{}", member.id))
            .add_header(header::COOKIE, session_cookie_for(&member, &config))
            .await
            .assert_status(StatusCode::FORBIDDEN);

        server
            .delete(&format!("/api/v1/users/{}", member.id))
            .add_header(header::COOKIE, cookie.clone())
            .await
            .assert_status(StatusCode::NO_CONTENT);

        server
            .delete(&format!("/api/v1/users/{}", member.id))
            .add_header(header::COOKIE, cookie)
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_protected_admin_cannot_be_deleted(pool: PgPool) {
        let (server, config) = create_test_app(pool.clone()).await;
        let seeded = crate::create_initial_admin_user(
            "root@example.com",
            Some("password123"),
            crate::auth::password::Argon2Params::from(&config.auth.native.password),
            &pool,
        )
        .await
        .unwrap();
        let admin = create_test_admin_user(&pool).await;

        server
            .delete(&format!("/api/v1/users/{seeded}"))
            .add_header(header::COOKIE, session_cookie_for(&admin, &config))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_admin_role_cannot_be_removed_from_protected_or_self(pool: PgPool) {
        let (server, config) = create_test_app(pool.clone()).await;
        let seeded = crate::create_initial_admin_user(
            "root@example.com",
            Some("password123"),
            crate::auth::password::Argon2Params::from(&config.auth.native.password),
            &pool,
        )
        .await
        .unwrap();
        let admin = create_test_admin_user(&pool).await;
        let cookie = session_cookie_for(&admin, &config);

        server
            .patch(&format!("/api/v1/users/{seeded}"))
            .add_header(header::COOKIE, cookie.clone())
            .json(&json!({"roles": ["Editor"]}))
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        server
            .patch("/api/v1/users/current")
            .add_header(header::COOKIE, cookie.clone())
            .json(&json!({"roles": []}))
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        // Nothing was written by the rejected edits
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Users::new(&mut conn);
        assert!(repo.get_roles(seeded).await.unwrap().contains(&Role::Admin));
        assert!(repo.get_roles(admin.id).await.unwrap().contains(&Role::Admin));

        // Other admins can still be demoted
        let other = create_test_admin_user(&pool).await;
        let updated: UserResponse = server
            .patch(&format!("/api/v1/users/{}", other.id))
            .add_header(header::COOKIE, cookie)
            .json(&json!({"roles": ["Editor"]}))
            .await
            .json();
        assert_eq!(updated.roles, vec![Role::Member, Role::Editor]);
    }
}
