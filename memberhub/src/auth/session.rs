//! JWT session tokens and the session cookie that carries them.
//!
//! Claims are informational: the request extractor reloads the user and their roles from the
//! database on every request, so a role revoked by subscription sync takes effect immediately
//! even though older tokens still list it.

use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};

use crate::{
    api::models::users::{CurrentUser, Role},
    config::Config,
    errors::Error,
    types::UserId,
};

/// JWT session claims
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: UserId,
    pub email: String,
    pub display_name: String,
    pub roles: Vec<Role>,
    pub is_admin: bool,
    pub exp: i64,
    pub iat: i64,
}

impl SessionClaims {
    pub fn new(user: &CurrentUser, config: &Config) -> Self {
        let now = Utc::now();
        let exp = now + config.auth.security.jwt_expiry;

        Self {
            sub: user.id,
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            roles: user.roles().to_vec(),
            is_admin: user.is_admin(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        }
    }
}

fn secret_key(config: &Config) -> Result<&str, Error> {
    config.secret_key.as_deref().ok_or_else(|| Error::Internal {
        operation: "JWT sessions: secret_key is required".to_string(),
    })
}

/// Create a JWT token for a user session
pub fn create_session_token(user: &CurrentUser, config: &Config) -> Result<String, Error> {
    let claims = SessionClaims::new(user, config);
    let key = EncodingKey::from_secret(secret_key(config)?.as_bytes());

    encode(&Header::default(), &claims, &key).map_err(|e| Error::Internal {
        operation: format!("create JWT: {e}"),
    })
}

/// Verify and decode a JWT session token
pub fn verify_session_token(token: &str, config: &Config) -> Result<SessionClaims, Error> {
    let key = DecodingKey::from_secret(secret_key(config)?.as_bytes());

    let token_data = decode::<SessionClaims>(token, &key, &Validation::default()).map_err(|e| match e.kind() {
        // Client errors (401): malformed, tampered or expired tokens
        ErrorKind::InvalidToken
        | ErrorKind::InvalidSignature
        | ErrorKind::ExpiredSignature
        | ErrorKind::MissingRequiredClaim(_)
        | ErrorKind::InvalidIssuer
        | ErrorKind::InvalidAudience
        | ErrorKind::InvalidSubject
        | ErrorKind::ImmatureSignature
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_)
        | ErrorKind::InvalidAlgorithm => Error::Unauthenticated {
            message: Some("Session is invalid or has expired".to_string()),
        },

        // Server errors (500): key issues, internal failures
        _ => Error::Internal {
            operation: format!("JWT verification: {e}"),
        },
    })?;

    Ok(token_data.claims)
}

/// `Set-Cookie` value carrying a session token
pub fn session_cookie(token: &str, config: &Config) -> String {
    let session = &config.auth.native.session;
    let secure = if session.cookie_secure { "; Secure" } else { "" };

    format!(
        "{}={}; Path=/; HttpOnly; SameSite={}; Max-Age={}{}",
        session.cookie_name,
        token,
        session.cookie_same_site,
        session.timeout.as_secs(),
        secure
    )
}

/// `Set-Cookie` value that removes the session cookie
pub fn clear_session_cookie(config: &Config) -> String {
    let session = &config.auth.native.session;
    let secure = if session.cookie_secure { "; Secure" } else { "" };

    format!(
        "{}=; Path=/; HttpOnly; SameSite={}; Max-Age=0{}",
        session.cookie_name, session.cookie_same_site, secure
    )
}

/// Find the session token in a `Cookie` header value
pub fn token_from_cookie_header<'a>(cookie_header: &'a str, cookie_name: &str) -> Option<&'a str> {
    cookie_header
        .split(';')
        .filter_map(|cookie| cookie.trim().split_once('='))
        .find(|(name, value)| *name == cookie_name && !value.is_empty())
        .map(|(_, value)| value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::entitlements::Entitlements;
    use uuid::Uuid;

    fn config() -> Config {
        Config {
            secret_key: Some("test-secret-key-for-sessions".to_string()),
            ..Default::default()
        }
    }

    fn user() -> CurrentUser {
        CurrentUser {
            id: Uuid::new_v4(),
            email: "member@example.com".to_string(),
            display_name: "Member".to_string(),
            entitlements: Entitlements::derive(&[Role::Editor]),
            billing_customer_id: None,
        }
    }

    #[test]
    fn test_round_trip_claims() {
        let config = config();
        let user = user();
        let token = create_session_token(&user, &config).unwrap();
        let claims = verify_session_token(&token, &config).unwrap();

        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.email, "member@example.com");
        assert_eq!(claims.roles, vec![Role::Member, Role::Editor]);
        assert!(!claims.is_admin);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_wrong_secret_is_unauthenticated() {
        let token = create_session_token(&user(), &config()).unwrap();
        let other = Config {
            secret_key: Some("another-secret".to_string()),
            ..Default::default()
        };
        let err = verify_session_token(&token, &other).unwrap_err();
        assert!(matches!(err, Error::Unauthenticated { .. }));
    }

    #[test]
    fn test_expired_token_is_unauthenticated() {
        let config = config();
        let claims = SessionClaims {
            sub: Uuid::new_v4(),
            email: "old@example.com".to_string(),
            display_name: "Old".to_string(),
            roles: vec![Role::Member],
            is_admin: false,
            exp: (Utc::now() - chrono::Duration::hours(2)).timestamp(),
            iat: (Utc::now() - chrono::Duration::hours(3)).timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.secret_key.as_deref().unwrap().as_bytes()),
        )
        .unwrap();

        let err = verify_session_token(&token, &config).unwrap_err();
        assert!(matches!(err, Error::Unauthenticated { .. }));
    }

    #[test]
    fn test_garbage_token_is_unauthenticated() {
        let err = verify_session_token("not.a.jwt", &config()).unwrap_err();
        assert!(matches!(err, Error::Unauthenticated { .. }));
    }

    #[test]
    fn test_missing_secret_is_internal() {
        let err = create_session_token(&user(), &Config::default()).unwrap_err();
        assert!(matches!(err, Error::Internal { .. }));
    }

    #[test]
    fn test_cookie_formatting() {
        let mut config = config();
        let cookie = session_cookie("abc", &config);
        assert!(cookie.starts_with("memberhub_session=abc; Path=/; HttpOnly; SameSite=lax"));
        assert!(cookie.ends_with("; Secure"));

        config.auth.native.session.cookie_secure = false;
        assert!(!session_cookie("abc", &config).contains("Secure"));
        assert!(clear_session_cookie(&config).contains("Max-Age=0"));
    }

    #[test]
    fn test_token_from_cookie_header() {
        let header = "theme=dark; memberhub_session=tok123; other=1";
        assert_eq!(token_from_cookie_header(header, "memberhub_session"), Some("tok123"));
        assert_eq!(token_from_cookie_header("memberhub_session=", "memberhub_session"), None);
        assert_eq!(token_from_cookie_header("theme=dark", "memberhub_session"), None);
    }
}
