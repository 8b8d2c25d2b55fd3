//! Common type definitions and permission system types.
//!
//! This module defines:
//! - Type aliases for entity IDs (UserId, TierId, etc.)
//! - Permission and authorization types
//! - Resource and operation enums for access control
//! - [`AccessLevel`], the visibility level of articles and forums
//!
//! # Permission System
//!
//! - [`Resource`]: What entity type is being accessed (Users, Articles, Posts, etc.)
//! - [`Operation`]: What action is being performed (Read, Create, Update, Delete, Moderate)
//! - [`Permission`]: Authorization requirement combining resource and operation
//!
//! Operations come in two flavors:
//! - **All**: Unrestricted access to all entities (e.g., `ReadAll`, `DeleteAll`)
//! - **Own**: Restricted to user's own entities (e.g., `ReadOwn`, `UpdateOwn`)
//!
//! ```ignore
//! use memberhub::types::{Permission, Resource, Operation};
//!
//! let required = Permission::Allow(Resource::Posts, Operation::Moderate);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

// Type aliases for IDs
pub type UserId = Uuid;
pub type TierId = Uuid;
pub type SubscriptionId = Uuid;
pub type ArticleId = Uuid;
pub type ForumId = Uuid;
pub type PostId = Uuid;
pub type CommentId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

// Common types for path parameters
#[derive(Debug, Clone, Deserialize)]
pub enum CurrentKeyword {
    #[serde(rename = "current")]
    Current,
}

/// Allows routes like /users/current and /users/{user_id} to hit the same handler.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UserIdOrCurrent {
    Current(CurrentKeyword),
    Id(UserId),
}

impl UserIdOrCurrent {
    /// Resolve to a concrete user id given the id of the caller.
    pub fn resolve(&self, current: UserId) -> UserId {
        match self {
            UserIdOrCurrent::Current(_) => current,
            UserIdOrCurrent::Id(id) => *id,
        }
    }
}

// Operations that can be performed on resources
// *-All means unrestricted access, *-Own means restricted to own resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    CreateAll,
    CreateOwn,
    ReadAll,
    ReadOwn,
    UpdateAll,
    UpdateOwn,
    DeleteAll,
    DeleteOwn,
    /// Pin, lock or hide content authored by others
    Moderate,
}

// Resources that can be operated on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    Users,
    Roles,
    Tiers,
    Subscriptions,
    Billing,
    Articles,
    Forums,
    Posts,
    Comments,
}

impl Resource {
    pub const ALL: [Resource; 9] = [
        Resource::Users,
        Resource::Roles,
        Resource::Tiers,
        Resource::Subscriptions,
        Resource::Billing,
        Resource::Articles,
        Resource::Forums,
        Resource::Posts,
        Resource::Comments,
    ];
}

impl Operation {
    pub const ALL: [Operation; 9] = [
        Operation::CreateAll,
        Operation::CreateOwn,
        Operation::ReadAll,
        Operation::ReadOwn,
        Operation::UpdateAll,
        Operation::UpdateOwn,
        Operation::DeleteAll,
        Operation::DeleteOwn,
        Operation::Moderate,
    ];

    /// The `*Own` counterpart of an `*All` operation. Holding the `All` variant implies
    /// the `Own` one.
    pub fn own_variant(self) -> Option<Operation> {
        match self {
            Operation::CreateAll => Some(Operation::CreateOwn),
            Operation::ReadAll => Some(Operation::ReadOwn),
            Operation::UpdateAll => Some(Operation::UpdateOwn),
            Operation::DeleteAll => Some(Operation::DeleteOwn),
            _ => None,
        }
    }
}

// Permission types for authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Permission {
    /// Simple permission: (Resource, Operation)
    Allow(Resource, Operation),
    /// User must have been granted access to a specific resource instance, e.g. by owning it
    Granted,
    /// Logical combinators
    Any(Vec<Permission>),
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::CreateAll | Operation::CreateOwn => write!(f, "Create"),
            Operation::ReadAll | Operation::ReadOwn => write!(f, "Read"),
            Operation::UpdateAll | Operation::UpdateOwn => write!(f, "Update"),
            Operation::DeleteAll | Operation::DeleteOwn => write!(f, "Delete"),
            Operation::Moderate => write!(f, "Moderate"),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resource::Users => "users",
            Resource::Roles => "roles",
            Resource::Tiers => "subscription tiers",
            Resource::Subscriptions => "subscriptions",
            Resource::Billing => "billing",
            Resource::Articles => "articles",
            Resource::Forums => "forums",
            Resource::Posts => "posts",
            Resource::Comments => "comments",
        };
        f.write_str(name)
    }
}

/// Who may see a piece of content. Ordered from least to most restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(type_name = "access_level", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    /// Anyone, including anonymous visitors
    Public,
    /// Any signed-in member
    Members,
    /// Members with an active subscription, and staff
    Subscribers,
}
