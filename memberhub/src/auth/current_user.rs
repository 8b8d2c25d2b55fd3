//! Request extractors for the authenticated caller.
//!
//! The session token is read from the session cookie, falling back to an
//! `Authorization: Bearer <jwt>` header for non-browser clients. The token only identifies the
//! user: their roles are reloaded from the database so entitlements always reflect the current
//! `user_roles` rows.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use tracing::{debug, instrument, trace};

use crate::{
    AppState,
    api::models::users::CurrentUser,
    auth::session,
    config::Config,
    db::handlers::{Repository, Users},
    errors::{Error, Result},
    types::{Operation, Permission, UserId},
};

/// An authenticated caller, or `None` for anonymous visitors.
///
/// Used by endpoints that serve public content but show more to signed-in members. A missing,
/// expired or tampered token yields `None` rather than an error.
#[derive(Debug, Clone)]
pub struct OptionalUser(pub Option<CurrentUser>);

/// Pull the raw session token out of the request, if there is one
fn session_token<'a>(parts: &'a Parts, config: &Config) -> Result<Option<&'a str>> {
    if let Some(cookie_header) = parts.headers.get(header::COOKIE) {
        let cookie_str = cookie_header.to_str().map_err(|e| Error::BadRequest {
            message: format!("Invalid cookie header: {e}"),
        })?;
        if let Some(token) = session::token_from_cookie_header(cookie_str, &config.auth.native.session.cookie_name) {
            trace!("Found session cookie");
            return Ok(Some(token));
        }
    }

    if let Some(auth_header) = parts.headers.get(header::AUTHORIZATION) {
        let auth_str = auth_header.to_str().map_err(|e| Error::BadRequest {
            message: format!("Invalid authorization header: {e}"),
        })?;
        if let Some(token) = auth_str.strip_prefix("Bearer ") {
            trace!("Found bearer token");
            return Ok(Some(token.trim()));
        }
    }

    Ok(None)
}

/// Load the user behind a verified token and derive their entitlements
async fn load_user(state: &AppState, user_id: UserId) -> Result<CurrentUser> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut conn)
        .get_by_id(user_id)
        .await?
        .ok_or_else(|| Error::Unauthenticated {
            message: Some("Account no longer exists".to_string()),
        })?;

    if user.is_suspended {
        return Err(Error::InsufficientPermissions {
            required: Permission::Granted,
            action: Operation::ReadOwn,
            resource: "account: it has been suspended".to_string(),
        });
    }

    Ok(CurrentUser::from(user))
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        if !state.config.auth.native.enabled {
            return Err(Error::Unauthenticated {
                message: Some("Authentication is disabled".to_string()),
            });
        }

        let Some(token) = session_token(parts, &state.config)? else {
            return Err(Error::Unauthenticated { message: None });
        };

        let claims = session::verify_session_token(token, &state.config)?;
        let user = load_user(state, claims.sub).await?;
        debug!("Authenticated user {}", user.id);

        Ok(user)
    }
}

impl FromRequestParts<AppState> for OptionalUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        if !state.config.auth.native.enabled {
            return Ok(OptionalUser(None));
        }

        let Ok(Some(token)) = session_token(parts, &state.config) else {
            return Ok(OptionalUser(None));
        };

        let claims = match session::verify_session_token(token, &state.config) {
            Ok(claims) => claims,
            Err(e) => {
                trace!("Ignoring unusable session token: {e}");
                return Ok(OptionalUser(None));
            }
        };

        match load_user(state, claims.sub).await {
            Ok(user) => Ok(OptionalUser(Some(user))),
            Err(Error::Unauthenticated { .. } | Error::InsufficientPermissions { .. }) => Ok(OptionalUser(None)),
            Err(e) => Err(e),
        }
    }
}
