//! Repository implementations for database access.
//!
//! Each repository wraps a `&mut PgConnection` and returns records from
//! [`crate::db::models`]. The generic CRUD surface lives on the [`Repository`] trait; anything
//! table specific is an inherent method.
//!
//! - [`Users`]: Accounts, roles and credentials
//! - [`SubscriptionTiers`]: The tier catalog
//! - [`Subscriptions`]: Provider subscriptions mirrored locally
//! - [`WebhookEvents`]: Processed provider event ids
//! - [`PasswordResetTokens`]: Password reset token lifecycle
//! - [`Articles`], [`Forums`], [`Posts`], [`Comments`]: Content

pub mod articles;
pub mod comments;
pub mod forums;
pub mod password_reset_tokens;
pub mod posts;
pub mod repository;
pub mod subscriptions;
pub mod tiers;
pub mod users;
pub mod webhook_events;

pub use articles::Articles;
pub use comments::Comments;
pub use forums::Forums;
pub use password_reset_tokens::PasswordResetTokens;
pub use posts::Posts;
pub use repository::Repository;
pub use subscriptions::Subscriptions;
pub use tiers::SubscriptionTiers;
pub use users::Users;
pub use webhook_events::WebhookEvents;
