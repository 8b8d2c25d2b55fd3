//! Database repository for users and their role rows.

use std::collections::HashMap;

use sqlx::{Connection, PgConnection, Postgres, QueryBuilder};
use tracing::instrument;
use uuid::Uuid;

use crate::types::{Operation, UserId, abbrev_uuid};
use crate::{
    api::models::users::{BILLING_MANAGED_ROLES, Role},
    db::{
        errors::{DbError, Result},
        handlers::repository::Repository,
        models::users::{UserCreateDBRequest, UserDBResponse, UserFilter, UserUpdateDBRequest},
    },
};

/// Columns of `UserDBResponse`, with roles folded in as an ordered array.
const USER_COLUMNS: &str = r#"
    u.id, u.email, u.display_name, u.password_hash, u.is_suspended, u.is_protected,
    u.billing_customer_id, u.created_at, u.updated_at, u.last_login,
    ARRAY(SELECT r.role FROM user_roles r WHERE r.user_id = u.id ORDER BY r.role) AS roles
"#;

pub struct Users<'c> {
    db: &'c mut PgConnection,
}

fn push_filter_conditions(query: &mut QueryBuilder<'_, Postgres>, filter: &UserFilter) {
    if let Some(ref search) = filter.search {
        let pattern = format!("%{}%", search.to_lowercase());
        query.push(" AND (LOWER(u.email) LIKE ");
        query.push_bind(pattern.clone());
        query.push(" OR LOWER(u.display_name) LIKE ");
        query.push_bind(pattern);
        query.push(")");
    }

    if let Some(role) = filter.role {
        query.push(" AND EXISTS (SELECT 1 FROM user_roles r WHERE r.user_id = u.id AND r.role = ");
        query.push_bind(role);
        query.push(")");
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Users<'c> {
    type CreateRequest = UserCreateDBRequest;
    type UpdateRequest = UserUpdateDBRequest;
    type Response = UserDBResponse;
    type Id = UserId;
    type Filter = UserFilter;

    #[instrument(skip(self, request), fields(email = %request.email), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let user_id = Uuid::new_v4();

        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO users (id, email, display_name, password_hash, is_protected)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(user_id)
        .bind(request.email.trim())
        .bind(&request.display_name)
        .bind(&request.password_hash)
        .bind(request.is_protected)
        .execute(&mut *tx)
        .await?;

        let mut roles = request.roles.clone();
        roles.push(Role::Member);
        roles.sort();
        roles.dedup();
        for role in &roles {
            sqlx::query("INSERT INTO user_roles (user_id, role) VALUES ($1, $2)")
                .bind(user_id)
                .bind(role)
                .execute(&mut *tx)
                .await?;
        }

        let user = sqlx::query_as::<_, UserDBResponse>(&format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = $1"))
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(user)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let user = sqlx::query_as::<_, UserDBResponse>(&format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(user)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn get_bulk(&mut self, ids: Vec<UserId>) -> Result<HashMap<Self::Id, UserDBResponse>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let users = sqlx::query_as::<_, UserDBResponse>(&format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = ANY($1)"))
            .bind(&ids)
            .fetch_all(&mut *self.db)
            .await?;

        Ok(users.into_iter().map(|u| (u.id, u)).collect())
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut query = QueryBuilder::new(format!("SELECT {USER_COLUMNS} FROM users u WHERE 1=1"));
        push_filter_conditions(&mut query, filter);

        query.push(" ORDER BY u.created_at DESC, u.id LIMIT ");
        query.push_bind(filter.limit);
        query.push(" OFFSET ");
        query.push_bind(filter.skip);

        let users = query.build_query_as::<UserDBResponse>().fetch_all(&mut *self.db).await?;
        Ok(users)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let protected: Option<bool> = sqlx::query_scalar("SELECT is_protected FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        match protected {
            None => Ok(false),
            Some(true) => Err(DbError::ProtectedEntity {
                operation: Operation::DeleteAll,
                reason: "the initial admin account cannot be deleted".to_string(),
                entity_type: "user".to_string(),
                entity_id: Some(id.to_string()),
            }),
            Some(false) => {
                let result = sqlx::query("DELETE FROM users WHERE id = $1").bind(id).execute(&mut *self.db).await?;
                Ok(result.rows_affected() > 0)
            }
        }
    }

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let updated = sqlx::query(
            r#"
            UPDATE users SET
                display_name = COALESCE($2, display_name),
                is_suspended = COALESCE($3, is_suspended),
                password_hash = COALESCE($4, password_hash),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&request.display_name)
        .bind(request.is_suspended)
        .bind(&request.password_hash)
        .execute(&mut *self.db)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }

        self.get_by_id(id).await?.ok_or(DbError::NotFound)
    }
}

impl<'c> Users<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Count users matching the filter, ignoring its pagination
    #[instrument(skip(self, filter), err)]
    pub async fn count(&mut self, filter: &UserFilter) -> Result<i64> {
        let mut query = QueryBuilder::new("SELECT COUNT(*) FROM users u WHERE 1=1");
        push_filter_conditions(&mut query, filter);

        let count: (i64,) = query.build_query_as().fetch_one(&mut *self.db).await?;
        Ok(count.0)
    }

    /// Case-insensitive lookup by email
    #[instrument(skip(self, email), err)]
    pub async fn get_user_by_email(&mut self, email: &str) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, UserDBResponse>(&format!(
            "SELECT {USER_COLUMNS} FROM users u WHERE LOWER(u.email) = LOWER($1)"
        ))
        .bind(email.trim())
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(user)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    pub async fn get_roles(&mut self, id: UserId) -> Result<Vec<Role>> {
        let roles = sqlx::query_scalar::<_, Role>("SELECT role FROM user_roles WHERE user_id = $1 ORDER BY role")
            .bind(id)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(roles)
    }

    /// Replace a user's admin-managed role rows. `Member` is always written.
    ///
    /// Billing-managed roles are neither inserted nor deleted here, whatever `roles` says, so a
    /// subscription grant that commits while an admin edit is in flight survives it. Returns the
    /// user's full role set afterwards.
    #[instrument(skip(self, roles), fields(user_id = %abbrev_uuid(&id)), err)]
    pub async fn set_roles(&mut self, id: UserId, roles: &[Role]) -> Result<Vec<Role>> {
        let mut roles: Vec<Role> = roles.iter().copied().filter(|r| !r.is_billing_managed()).collect();
        roles.push(Role::Member);
        roles.sort();
        roles.dedup();
        let billing_managed: Vec<Role> = BILLING_MANAGED_ROLES.to_vec();

        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND NOT (role = ANY($2)) AND NOT (role = ANY($3))")
            .bind(id)
            .bind(&roles)
            .bind(&billing_managed)
            .execute(&mut *tx)
            .await?;

        for role in &roles {
            sqlx::query("INSERT INTO user_roles (user_id, role) VALUES ($1, $2) ON CONFLICT DO NOTHING")
                .bind(id)
                .bind(role)
                .execute(&mut *tx)
                .await?;
        }

        let current = sqlx::query_scalar::<_, Role>("SELECT role FROM user_roles WHERE user_id = $1 ORDER BY role")
            .bind(id)
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(current)
    }

    /// Add one role row. Returns whether the role was newly granted.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    pub async fn grant_role(&mut self, id: UserId, role: Role) -> Result<bool> {
        let result = sqlx::query("INSERT INTO user_roles (user_id, role) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(id)
            .bind(role)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove one role row. `Member` cannot be revoked.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    pub async fn revoke_role(&mut self, id: UserId, role: Role) -> Result<bool> {
        if role == Role::Member {
            return Ok(false);
        }
        let result = sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role = $2")
            .bind(id)
            .bind(role)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    pub async fn record_login(&mut self, id: UserId) -> Result<()> {
        sqlx::query("UPDATE users SET last_login = NOW() WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, customer_id), fields(user_id = %abbrev_uuid(&id)), err)]
    pub async fn set_billing_customer_id(&mut self, id: UserId, customer_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE users SET billing_customer_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(customer_id)
            .execute(&mut *self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_billing_customer_id(&mut self, customer_id: &str) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, UserDBResponse>(&format!(
            "SELECT {USER_COLUMNS} FROM users u WHERE u.billing_customer_id = $1"
        ))
        .bind(customer_id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(user)
    }

    #[instrument(skip(self, password_hash), fields(user_id = %abbrev_uuid(&id)), err)]
    pub async fn update_password(&mut self, id: UserId, password_hash: &str) -> Result<()> {
        let result = sqlx::query("UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&mut *self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }
}
