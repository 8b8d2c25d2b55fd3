//! Database record models matching table schemas.
//!
//! Models derive `sqlx::FromRow` and convert into the API models with `From`.

pub mod articles;
pub mod comments;
pub mod forums;
pub mod password_reset_tokens;
pub mod posts;
pub mod subscriptions;
pub mod tiers;
pub mod users;
