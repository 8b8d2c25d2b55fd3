//! Role-derived entitlements.
//!
//! A user's effective rights are a pure function of their `user_roles` rows. Nothing here touches
//! the database: [`Entitlements::derive`] is evaluated whenever a request is authenticated and at
//! login, so role changes (including those made by subscription sync) apply on the next request.
//!
//! Roles fall in three groups:
//! - [`Role::Member`] is held by every account
//! - [`Role::Subscriber`] is billing-managed: only subscription sync grants or revokes it
//! - [`Role::Moderator`], [`Role::Editor`] and [`Role::Admin`] are staff roles assigned by admins

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::models::users::Role;
use crate::types::{AccessLevel, Operation, Resource};

use Operation::*;
use Resource::*;

const MEMBER_PERMISSIONS: &[(Resource, Operation)] = &[
    (Users, ReadOwn),
    (Users, UpdateOwn),
    (Tiers, ReadAll),
    (Subscriptions, ReadOwn),
    (Subscriptions, CreateOwn),
    (Billing, CreateOwn),
    (Posts, CreateOwn),
    (Posts, UpdateOwn),
    (Posts, DeleteOwn),
    (Comments, CreateOwn),
    (Comments, UpdateOwn),
    (Comments, DeleteOwn),
];

const MODERATOR_PERMISSIONS: &[(Resource, Operation)] = &[
    (Users, ReadAll),
    (Forums, Moderate),
    (Posts, ReadAll),
    (Posts, UpdateAll),
    (Posts, DeleteAll),
    (Posts, Moderate),
    (Comments, ReadAll),
    (Comments, UpdateAll),
    (Comments, DeleteAll),
    (Comments, Moderate),
];

const EDITOR_PERMISSIONS: &[(Resource, Operation)] = &[
    (Articles, CreateAll),
    (Articles, ReadAll),
    (Articles, UpdateAll),
    (Articles, DeleteAll),
    (Forums, CreateAll),
    (Forums, UpdateAll),
    (Comments, ReadAll),
    (Comments, Moderate),
];

/// The permission table. Subscribers have the member permissions; the role only raises their
/// [`AccessLevel`].
pub fn role_permissions(role: Role) -> &'static [(Resource, Operation)] {
    match role {
        Role::Member | Role::Subscriber => MEMBER_PERMISSIONS,
        Role::Moderator => MODERATOR_PERMISSIONS,
        Role::Editor => EDITOR_PERMISSIONS,
        // Admins are handled in `Entitlements::allows` and hold everything
        Role::Admin => &[],
    }
}

/// Effective rights of a user, derived from their role rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Entitlements {
    /// Deduplicated, sorted, always containing `Member`
    pub roles: Vec<Role>,
    /// Highest content visibility level the user can read
    pub access_level: AccessLevel,
    pub is_admin: bool,
}

impl Entitlements {
    pub fn derive(roles: &[Role]) -> Self {
        let mut roles: Vec<Role> = roles.to_vec();
        roles.push(Role::Member);
        roles.sort();
        roles.dedup();

        let access_level = if roles.iter().any(|r| *r == Role::Subscriber || r.is_staff()) {
            AccessLevel::Subscribers
        } else {
            AccessLevel::Members
        };

        Self {
            is_admin: roles.contains(&Role::Admin),
            roles,
            access_level,
        }
    }

    /// Entitlements of an unauthenticated visitor: no roles, public content only.
    pub fn anonymous() -> Self {
        Self {
            roles: Vec::new(),
            access_level: AccessLevel::Public,
            is_admin: false,
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Whether any held role grants `operation` on `resource`. Holding an `*All` operation
    /// implies the matching `*Own` one.
    pub fn allows(&self, resource: Resource, operation: Operation) -> bool {
        if self.is_admin {
            return true;
        }
        self.roles.iter().any(|role| {
            role_permissions(*role)
                .iter()
                .any(|(r, op)| *r == resource && (*op == operation || op.own_variant() == Some(operation)))
        })
    }

    pub fn can_view(&self, level: AccessLevel) -> bool {
        level <= self.access_level
    }
}

/// Apply an admin's role edit to a user's current roles.
///
/// `Member` is always kept. `Subscriber` keeps its current state whatever the request says, since
/// it belongs to subscription sync.
pub fn merge_admin_role_update(current: &[Role], requested: &[Role]) -> Vec<Role> {
    let mut roles: Vec<Role> = requested.iter().copied().filter(|r| !r.is_billing_managed()).collect();
    roles.extend(current.iter().copied().filter(|r| r.is_billing_managed()));
    roles.push(Role::Member);
    roles.sort();
    roles.dedup();
    roles
}
