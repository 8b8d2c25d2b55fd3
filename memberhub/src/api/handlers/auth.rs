use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    AppState,
    api::models::{
        auth::{
            AuthResponse, AuthSuccessResponse, ChangePasswordRequest, LoginRequest, LoginResponse, LogoutResponse,
            PasswordResetConfirmRequest, PasswordResetRequest, RegisterRequest, RegisterResponse, RegistrationInfo,
        },
        users::CurrentUser,
    },
    auth::{
        password::{self, Argon2Params},
        session,
    },
    db::{
        handlers::{PasswordResetTokens, Repository, Users},
        models::users::UserCreateDBRequest,
    },
    errors::Error,
    types::{Operation, Permission},
};

const INVALID_CREDENTIALS: &str = "Invalid email or password";

fn require_native_auth(state: &AppState) -> Result<(), Error> {
    if state.config.auth.native.enabled {
        Ok(())
    } else {
        Err(Error::BadRequest {
            message: "Native authentication is disabled".to_string(),
        })
    }
}

/// Loose shape check: one `@`, something before it, and a dotted domain after it.
fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain.split('.').count() >= 2
        && domain.split('.').all(|label| !label.is_empty())
}

async fn hash_password(password: String, params: Argon2Params) -> Result<String, Error> {
    tokio::task::spawn_blocking(move || password::hash_string(&password, params))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password hashing task: {e}"),
        })?
}

async fn verify_password(password: String, hash: String) -> Result<bool, Error> {
    tokio::task::spawn_blocking(move || password::verify_string(&password, &hash))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password verification task: {e}"),
        })?
}

/// Get registration information
#[utoipa::path(
    get,
    path = "/authentication/register",
    tag = "authentication",
    responses(
        (status = 200, description = "Registration info", body = RegistrationInfo),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_registration_info(State(state): State<AppState>) -> Result<Json<RegistrationInfo>, Error> {
    let enabled = state.config.auth.native.enabled && state.config.auth.native.allow_registration;
    Ok(Json(RegistrationInfo {
        enabled,
        message: if enabled {
            "Registration is enabled".to_string()
        } else {
            "Registration is disabled".to_string()
        },
    }))
}

/// Register a new member account
#[utoipa::path(
    post,
    path = "/authentication/register",
    request_body = RegisterRequest,
    tag = "authentication",
    responses(
        (status = 201, description = "User registered successfully", body = AuthResponse),
        (status = 400, description = "Invalid input or registration disabled"),
        (status = 409, description = "An account with this email already exists"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn register(State(state): State<AppState>, Json(request): Json<RegisterRequest>) -> Result<RegisterResponse, Error> {
    require_native_auth(&state)?;
    if !state.config.auth.native.allow_registration {
        return Err(Error::BadRequest {
            message: "User registration is disabled".to_string(),
        });
    }

    let email = request.email.trim().to_lowercase();
    if !is_plausible_email(&email) {
        return Err(Error::BadRequest {
            message: "A valid email address is required".to_string(),
        });
    }
    password::validate_password(&request.password, &state.config.auth.native.password)?;

    let display_name = request
        .display_name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let mut user_repo = Users::new(&mut tx);
    if user_repo.get_user_by_email(&email).await?.is_some() {
        return Err(Error::Conflict {
            message: "An account with this email address already exists".to_string(),
        });
    }

    let password_hash = hash_password(request.password, Argon2Params::from(&state.config.auth.native.password)).await?;
    let created_user = user_repo
        .create(&UserCreateDBRequest {
            email,
            display_name,
            password_hash: Some(password_hash),
            roles: Vec::new(),
            is_protected: false,
        })
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    info!("Registered user {}", created_user.id);
    let user = CurrentUser::from(created_user);
    let token = session::create_session_token(&user, &state.config)?;

    Ok(RegisterResponse {
        status: StatusCode::CREATED,
        body: AuthResponse {
            user,
            message: "Registration successful".to_string(),
        },
        cookie: session::session_cookie(&token, &state.config),
    })
}

/// Login with email and password
#[utoipa::path(
    post,
    path = "/authentication/login",
    request_body = LoginRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Account suspended"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn login(State(state): State<AppState>, Json(request): Json<LoginRequest>) -> Result<LoginResponse, Error> {
    require_native_auth(&state)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut user_repo = Users::new(&mut conn);

    let invalid = || Error::Unauthenticated {
        message: Some(INVALID_CREDENTIALS.to_string()),
    };

    let user = user_repo.get_user_by_email(request.email.trim()).await?.ok_or_else(invalid)?;
    let hash = user.password_hash.clone().ok_or_else(invalid)?;
    if !verify_password(request.password, hash).await? {
        return Err(invalid());
    }

    // Only reveal the suspension once the password has been proven
    if user.is_suspended {
        return Err(Error::InsufficientPermissions {
            required: Permission::Granted,
            action: Operation::ReadOwn,
            resource: "account: it has been suspended".to_string(),
        });
    }

    user_repo.record_login(user.id).await?;

    let user = CurrentUser::from(user);
    let token = session::create_session_token(&user, &state.config)?;

    Ok(LoginResponse {
        status: StatusCode::OK,
        body: AuthResponse {
            user,
            message: "Login successful".to_string(),
        },
        cookie: session::session_cookie(&token, &state.config),
    })
}

/// Logout (clear the session cookie)
#[utoipa::path(
    post,
    path = "/authentication/logout",
    tag = "authentication",
    responses(
        (status = 200, description = "Logout successful", body = AuthSuccessResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn logout(State(state): State<AppState>) -> Result<LogoutResponse, Error> {
    Ok(LogoutResponse {
        status: StatusCode::OK,
        body: AuthSuccessResponse {
            message: "Logout successful".to_string(),
        },
        cookie: session::clear_session_cookie(&state.config),
    })
}

/// The signed-in user and their entitlements
#[utoipa::path(
    get,
    path = "/authentication/me",
    tag = "authentication",
    responses(
        (status = 200, description = "Current user", body = CurrentUser),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Account suspended"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn me(current_user: CurrentUser) -> Json<CurrentUser> {
    Json(current_user)
}

/// Request a password reset email
#[utoipa::path(
    post,
    path = "/authentication/password-resets",
    request_body = PasswordResetRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Reset email sent if the account exists", body = AuthSuccessResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(request): Json<PasswordResetRequest>,
) -> Result<Json<AuthSuccessResponse>, Error> {
    require_native_auth(&state)?;

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;

    // The response is the same whether or not the account exists
    let user = Users::new(&mut tx).get_user_by_email(request.email.trim()).await?;
    let issued = match user {
        Some(user) if user.password_hash.is_some() && !user.is_suspended => {
            let (raw_token, token) = PasswordResetTokens::new(&mut tx).create_for_user(user.id, &state.config).await?;
            Some((user, raw_token, token))
        }
        _ => None,
    };
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    if let Some((user, raw_token, token)) = issued
        && let Err(e) = state
            .email
            .send_password_reset(&user.email, &user.display_name, &token.id, &raw_token)
            .await
    {
        warn!("Failed to send password reset email to user {}: {e}", user.id);
    }

    Ok(Json(AuthSuccessResponse {
        message: "If an account with that email exists, a password reset link has been sent.".to_string(),
    }))
}

/// Confirm a password reset with the emailed token
#[utoipa::path(
    post,
    path = "/authentication/password-resets/{token_id}/confirm",
    request_body = PasswordResetConfirmRequest,
    tag = "authentication",
    params(("token_id" = uuid::Uuid, Path, description = "Reset token ID from the emailed link")),
    responses(
        (status = 200, description = "Password reset successful", body = AuthSuccessResponse),
        (status = 400, description = "Invalid or expired token"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn confirm_password_reset(
    State(state): State<AppState>,
    Path(token_id): Path<Uuid>,
    Json(request): Json<PasswordResetConfirmRequest>,
) -> Result<Json<AuthSuccessResponse>, Error> {
    require_native_auth(&state)?;
    password::validate_password(&request.new_password, &state.config.auth.native.password)?;

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let token = PasswordResetTokens::new(&mut tx)
        .find_valid_token_by_id(token_id, &request.token)
        .await?
        .ok_or_else(|| Error::BadRequest {
            message: "Invalid or expired reset token".to_string(),
        })?;

    let new_hash = hash_password(request.new_password, Argon2Params::from(&state.config.auth.native.password)).await?;
    Users::new(&mut tx).update_password(token.user_id, &new_hash).await?;

    // Marks this token used along with any other outstanding ones
    PasswordResetTokens::new(&mut tx).invalidate_for_user(token.user_id).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    info!("Password reset completed for user {}", token.user_id);
    Ok(Json(AuthSuccessResponse {
        message: "Password has been reset successfully".to_string(),
    }))
}

/// Change password for the signed-in user
#[utoipa::path(
    post,
    path = "/authentication/password-change",
    request_body = ChangePasswordRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Password changed successfully", body = AuthSuccessResponse),
        (status = 400, description = "New password rejected"),
        (status = 401, description = "Current password is incorrect"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn change_password(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<Json<AuthSuccessResponse>, Error> {
    require_native_auth(&state)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut user_repo = Users::new(&mut conn);
    let user = user_repo.get_by_id(current_user.id).await?.ok_or_else(|| Error::Unauthenticated {
        message: Some("User not found".to_string()),
    })?;

    let hash = user.password_hash.ok_or_else(|| Error::BadRequest {
        message: "This account has no password set".to_string(),
    })?;
    if !verify_password(request.current_password, hash).await? {
        return Err(Error::Unauthenticated {
            message: Some("Current password is incorrect".to_string()),
        });
    }

    password::validate_password(&request.new_password, &state.config.auth.native.password)?;
    let new_hash = hash_password(request.new_password, Argon2Params::from(&state.config.auth.native.password)).await?;
    user_repo.update_password(current_user.id, &new_hash).await?;

    Ok(Json(AuthSuccessResponse {
        message: "Password changed successfully".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::users::Role;
    use crate::db::models::users::UserUpdateDBRequest;
    use crate::test_utils::{create_test_app, create_test_config, create_test_user, create_test_user_with_password};
    use axum::http::header;
    use serde_json::json;
    use sqlx::PgPool;

    #[test]
    fn test_email_shape() {
        assert!(is_plausible_email("someone@example.com"));
        assert!(is_plausible_email("a.b+c@mail.example.org"));
        assert!(!is_plausible_email("no-at-sign"));
        assert!(!is_plausible_email("@example.com"));
        assert!(!is_plausible_email("a@localhost"));
        assert!(!is_plausible_email("a@b@c.com"));
        assert!(!is_plausible_email("a b@example.com"));
        assert!(!is_plausible_email("a@example..com"));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_register_success(pool: PgPool) {
        let (server, _) = create_test_app(pool).await;

        let response = server
            .post("/authentication/register")
            .json(&json!({"email": "New.Member@Example.com", "password": "password123"}))
            .await;

        response.assert_status(StatusCode::CREATED);
        let cookie = response.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap().to_string();
        assert!(cookie.starts_with("memberhub_session="));
        assert!(cookie.contains("HttpOnly"));

        let body: AuthResponse = response.json();
        assert_eq!(body.user.email, "new.member@example.com");
        assert_eq!(body.user.display_name, "new.member");
        assert_eq!(body.user.entitlements.roles, vec![Role::Member]);
        assert_eq!(body.message, "Registration successful");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_register_rejects_bad_input(pool: PgPool) {
        let (server, _) = create_test_app(pool).await;

        server
            .post("/authentication/register")
            .json(&json!({"email": "not-an-email", "password": "password123"}))
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        server
            .post("/authentication/register")
            .json(&json!({"email": "short@example.com", "password": "short"}))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_register_duplicate_email_conflicts(pool: PgPool) {
        let (server, _) = create_test_app(pool).await;
        let request = json!({"email": "dup@example.com", "password": "password123"});

        server.post("/authentication/register").json(&request).await.assert_status(StatusCode::CREATED);
        server
            .post("/authentication/register")
            .json(&json!({"email": "DUP@example.com", "password": "password123"}))
            .await
            .assert_status(StatusCode::CONFLICT);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_register_disabled(pool: PgPool) {
        let mut config = create_test_config();
        config.auth.native.allow_registration = false;
        let server = crate::test_utils::create_test_app_with_config(pool, config.clone()).await;

        let info: RegistrationInfo = server.get("/authentication/register").await.json();
        assert!(!info.enabled);

        server
            .post("/authentication/register")
            .json(&json!({"email": "x@example.com", "password": "password123"}))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_login_and_logout(pool: PgPool) {
        let (server, _) = create_test_app(pool.clone()).await;
        let user = create_test_user_with_password(&pool, "login@example.com", "password123").await;

        let response = server
            .post("/authentication/login")
            .json(&json!({"email": "login@example.com", "password": "password123"}))
            .await;
        response.assert_status_ok();
        let body: AuthResponse = response.json();
        assert_eq!(body.user.id, user.id);

        let mut conn = pool.acquire().await.unwrap();
        let stored = Users::new(&mut conn).get_by_id(user.id).await.unwrap().unwrap();
        assert!(stored.last_login.is_some());

        let response = server.post("/authentication/logout").await;
        response.assert_status_ok();
        let cookie = response.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.contains("Max-Age=0"));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_login_failures_are_generic(pool: PgPool) {
        let (server, _) = create_test_app(pool.clone()).await;
        create_test_user_with_password(&pool, "known@example.com", "password123").await;

        let wrong_password = server
            .post("/authentication/login")
            .json(&json!({"email": "known@example.com", "password": "wrong-password"}))
            .await;
        wrong_password.assert_status(StatusCode::UNAUTHORIZED);

        let unknown = server
            .post("/authentication/login")
            .json(&json!({"email": "unknown@example.com", "password": "password123"}))
            .await;
        unknown.assert_status(StatusCode::UNAUTHORIZED);
        assert_eq!(wrong_password.text(), unknown.text());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_login_suspended_user_forbidden(pool: PgPool) {
        let (server, _) = create_test_app(pool.clone()).await;
        let user = create_test_user_with_password(&pool, "gone@example.com", "password123").await;
        let mut conn = pool.acquire().await.unwrap();
        Users::new(&mut conn)
            .update(
                user.id,
                &UserUpdateDBRequest {
                    is_suspended: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        server
            .post("/authentication/login")
            .json(&json!({"email": "gone@example.com", "password": "password123"}))
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_password_reset_flow(pool: PgPool) {
        let (server, config) = create_test_app(pool.clone()).await;
        let user = create_test_user_with_password(&pool, "reset@example.com", "password123").await;

        // Unknown accounts get the same answer
        server
            .post("/authentication/password-resets")
            .json(&json!({"email": "nobody@example.com"}))
            .await
            .assert_status_ok();
        server
            .post("/authentication/password-resets")
            .json(&json!({"email": "reset@example.com"}))
            .await
            .assert_status_ok();

        let mut conn = pool.acquire().await.unwrap();
        let (raw_token, token) = PasswordResetTokens::new(&mut conn).create_for_user(user.id, &config).await.unwrap();

        server
            .post(&format!("/authentication/password-resets/{}/confirm", token.id))
            .json(&json!({"token": "wrong", "new_password": "brand-new-pass"}))
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        server
            .post(&format!("/authentication/password-resets/{}/confirm", token.id))
            .json(&json!({"token": raw_token, "new_password": "brand-new-pass"}))
            .await
            .assert_status_ok();

        // Tokens are single use
        server
            .post(&format!("/authentication/password-resets/{}/confirm", token.id))
            .json(&json!({"token": raw_token, "new_password": "another-pass"}))
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        server
            .post("/authentication/login")
            .json(&json!({"email": "reset@example.com", "password": "brand-new-pass"}))
            .await
            .assert_status_ok();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_change_password(pool: PgPool) {
        let (server, config) = create_test_app(pool.clone()).await;
        let user = create_test_user_with_password(&pool, "change@example.com", "password123").await;
        let cookie = crate::test_utils::session_cookie_for(&user, &config);

        server
            .post("/authentication/password-change")
            .add_header(header::COOKIE, cookie.clone())
            .json(&json!({"current_password": "wrong-password", "new_password": "new-password-1"}))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);

        server
            .post("/authentication/password-change")
            .add_header(header::COOKIE, cookie)
            .json(&json!({"current_password": "password123", "new_password": "new-password-1"}))
            .await
            .assert_status_ok();

        server
            .post("/authentication/login")
            .json(&json!({"email": "change@example.com", "password": "new-password-1"}))
            .await
            .assert_status_ok();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_password_change_requires_session(pool: PgPool) {
        let (server, _) = create_test_app(pool.clone()).await;
        create_test_user(&pool, Role::Member).await;

        server
            .post("/authentication/password-change")
            .json(&json!({"current_password": "a", "new_password": "b"}))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }
}
