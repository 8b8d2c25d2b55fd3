//! Database layer for data persistence and access.
//!
//! Built on SQLx with PostgreSQL, following the repository pattern:
//!
//! - [`handlers`]: Repository implementations for each table
//! - [`models`]: Database record structures matching table schemas
//! - [`errors`]: Database-specific error types
//!
//! Repositories borrow a connection, so the same code runs on a pooled connection or inside a
//! transaction:
//!
//! ```ignore
//! use memberhub::db::handlers::{Repository, Users};
//!
//! let mut tx = pool.begin().await?;
//! let user = Users::new(&mut tx).get_user_by_email("member@example.com").await?;
//! tx.commit().await?;
//! ```
//!
//! Migrations live in `migrations/` and are embedded through [`crate::migrator`].

pub mod errors;
pub mod handlers;
pub mod models;
