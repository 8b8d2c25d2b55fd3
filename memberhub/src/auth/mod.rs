//! Authentication and authorization.
//!
//! Members sign in with email and password at `/authentication/login`. A signed JWT is returned
//! in an HTTP-only session cookie; API clients may send the same token as a bearer token.
//!
//! Authorization is role based:
//! - [`entitlements`] maps a user's roles to what they may do and which content they may read
//! - [`permissions`] turns that into handler extractors and ownership checks
//!
//! ```ignore
//! use memberhub::auth::permissions::{RequiresPermission, operation, resource};
//!
//! async fn create_article(
//!     current_user: RequiresPermission<resource::Articles, operation::CreateAll>,
//! ) -> Result<Json<ArticleResponse>> { ... }
//! ```

pub mod current_user;
pub mod entitlements;
pub mod password;
pub mod permissions;
pub mod session;
