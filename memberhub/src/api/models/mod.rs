//! API request and response data models.
//!
//! These are distinct from the database records in [`crate::db::models`], so storage and the
//! public contract can change independently. Every model derives `utoipa::ToSchema`.

pub mod articles;
pub mod auth;
pub mod comments;
pub mod forums;
pub mod pagination;
pub mod subscriptions;
pub mod tiers;
pub mod users;
