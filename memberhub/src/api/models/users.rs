//! API request/response models for users.

use super::pagination::Pagination;
use crate::auth::entitlements::Entitlements;
use crate::db::models::users::UserDBResponse;
use crate::types::{AccessLevel, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Roles a user can hold. Ordered from least to most privileged.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, PartialOrd, Ord, Hash, ToSchema)]
#[sqlx(type_name = "user_role", rename_all = "UPPERCASE")]
pub enum Role {
    Member,
    Subscriber,
    Moderator,
    Editor,
    Admin,
}

/// Roles owned by subscription sync rather than by admins.
pub const BILLING_MANAGED_ROLES: [Role; 1] = [Role::Subscriber];

impl Role {
    /// Roles owned by subscription sync rather than by admins.
    pub fn is_billing_managed(&self) -> bool {
        BILLING_MANAGED_ROLES.contains(self)
    }

    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Moderator | Role::Editor | Role::Admin)
    }
}

/// Partial update of a user. Members may only change their own display name; the other fields
/// require user management permissions.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UserUpdate {
    pub display_name: Option<String>,
    pub is_suspended: Option<bool>,
    /// Replacement staff roles. `Member` is always kept and `Subscriber` is managed by billing.
    pub roles: Option<Vec<Role>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub email: String,
    pub display_name: String,
    pub roles: Vec<Role>,
    pub is_suspended: bool,
    /// Whether the account is linked to a billing customer
    pub has_billing_customer: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl From<UserDBResponse> for UserResponse {
    fn from(db: UserDBResponse) -> Self {
        Self {
            id: db.id,
            email: db.email,
            display_name: db.display_name,
            roles: db.roles,
            is_suspended: db.is_suspended,
            has_billing_customer: db.billing_customer_id.is_some(),
            created_at: db.created_at,
            updated_at: db.updated_at,
            last_login: db.last_login,
        }
    }
}

/// Query parameters for listing users
#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ListUsersQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,

    /// Case-insensitive substring match on email or display name
    pub search: Option<String>,

    /// Only users holding this role
    pub role: Option<Role>,
}

/// The authenticated caller, with entitlements derived from their role rows.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CurrentUser {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub email: String,
    pub display_name: String,
    pub entitlements: Entitlements,
    #[serde(skip)]
    pub billing_customer_id: Option<String>,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.entitlements.is_admin
    }

    pub fn roles(&self) -> &[Role] {
        &self.entitlements.roles
    }

    pub fn access_level(&self) -> AccessLevel {
        self.entitlements.access_level
    }
}

impl From<UserDBResponse> for CurrentUser {
    fn from(db: UserDBResponse) -> Self {
        Self {
            id: db.id,
            email: db.email,
            display_name: db.display_name,
            entitlements: Entitlements::derive(&db.roles),
            billing_customer_id: db.billing_customer_id,
        }
    }
}
