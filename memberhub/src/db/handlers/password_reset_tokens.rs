//! Database repository for password reset tokens.

use chrono::Utc;
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    auth::password::{self, Argon2Params},
    config::Config,
    db::{
        errors::{DbError, Result},
        models::password_reset_tokens::PasswordResetToken,
    },
    types::{UserId, abbrev_uuid},
};

const TOKEN_COLUMNS: &str = "id, user_id, token_hash, expires_at, created_at, used_at";

pub struct PasswordResetTokens<'c> {
    db: &'c mut PgConnection,
}

impl<'c> PasswordResetTokens<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Issue a new token for a user. Returns the raw token, which is only ever sent to the user,
    /// alongside the stored row.
    #[instrument(skip(self, config), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn create_for_user(&mut self, user_id: UserId, config: &Config) -> Result<(String, PasswordResetToken)> {
        let raw_token = password::generate_reset_token();
        let token_hash = password::hash_string(&raw_token, Argon2Params::from(&config.auth.native.password))
            .map_err(|e| DbError::Other(anyhow::anyhow!(e)))?;
        let expires_at = Utc::now()
            + chrono::Duration::from_std(config.auth.native.password_reset_token_duration).unwrap_or(chrono::Duration::minutes(30));

        let token = sqlx::query_as::<_, PasswordResetToken>(&format!(
            r#"
            INSERT INTO password_reset_tokens (user_id, token_hash, expires_at)
            VALUES ($1, $2, $3)
            RETURNING {TOKEN_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(token_hash)
        .bind(expires_at)
        .fetch_one(&mut *self.db)
        .await?;

        Ok((raw_token, token))
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_id(&mut self, id: Uuid) -> Result<Option<PasswordResetToken>> {
        let token = sqlx::query_as::<_, PasswordResetToken>(&format!("SELECT {TOKEN_COLUMNS} FROM password_reset_tokens WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(token)
    }

    /// Find a token that is unused, unexpired, and matches `raw_token`
    #[instrument(skip(self, raw_token), err)]
    pub async fn find_valid_token_by_id(&mut self, token_id: Uuid, raw_token: &str) -> Result<Option<PasswordResetToken>> {
        let Some(token) = self.get_by_id(token_id).await? else {
            return Ok(None);
        };

        if !token.is_usable(Utc::now()) {
            return Ok(None);
        }

        match password::verify_string(raw_token, &token.token_hash) {
            Ok(true) => Ok(Some(token)),
            Ok(false) => Ok(None),
            Err(e) => {
                tracing::error!("Token verification error for token {}: {:?}", token_id, e);
                Ok(None)
            }
        }
    }

    /// Mark every outstanding token of a user as used, e.g. after a successful reset
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn invalidate_for_user(&mut self, user_id: UserId) -> Result<u64> {
        let result = sqlx::query("UPDATE password_reset_tokens SET used_at = NOW() WHERE user_id = $1 AND used_at IS NULL")
            .bind(user_id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::users::Role;
    use crate::test_utils::{create_test_config, create_test_user};
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_token_lifecycle(pool: PgPool) {
        let config = create_test_config();
        let user = create_test_user(&pool, Role::Member).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut tokens = PasswordResetTokens::new(&mut conn);

        let (raw, token) = tokens.create_for_user(user.id, &config).await.unwrap();
        assert_ne!(raw, token.token_hash);

        assert!(tokens.find_valid_token_by_id(token.id, &raw).await.unwrap().is_some());
        assert!(tokens.find_valid_token_by_id(token.id, "wrong-token").await.unwrap().is_none());
        assert!(tokens.find_valid_token_by_id(Uuid::new_v4(), &raw).await.unwrap().is_none());

        assert_eq!(tokens.invalidate_for_user(user.id).await.unwrap(), 1);
        assert!(tokens.find_valid_token_by_id(token.id, &raw).await.unwrap().is_none());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_expired_token_is_rejected(pool: PgPool) {
        let config = create_test_config();
        let user = create_test_user(&pool, Role::Member).await;
        let mut conn = pool.acquire().await.unwrap();

        let (raw, token) = PasswordResetTokens::new(&mut conn).create_for_user(user.id, &config).await.unwrap();

        sqlx::query("UPDATE password_reset_tokens SET expires_at = NOW() - INTERVAL '1 minute' WHERE id = $1")
            .bind(token.id)
            .execute(&mut *conn)
            .await
            .unwrap();

        let found = PasswordResetTokens::new(&mut conn)
            .find_valid_token_by_id(token.id, &raw)
            .await
            .unwrap();
        assert!(found.is_none());
    }
}
