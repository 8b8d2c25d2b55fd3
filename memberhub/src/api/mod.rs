//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers for all API endpoints
//! - **[`models`]**: Request/response data structures for API communication
//!
//! # API Structure
//!
//! - **Authentication** (`/authentication/*`): Registration, login, password resets
//! - **Users** (`/api/v1/users/*`): Profiles, roles and suspension
//! - **Tiers and subscriptions** (`/api/v1/tiers/*`, `/api/v1/subscriptions`): The catalog and who is subscribed
//! - **Billing** (`/api/v1/billing/*`, `/webhooks/billing`): Checkout, the billing portal and provider events
//! - **Content** (`/api/v1/articles/*`, `/api/v1/forums/*`, `/api/v1/posts/*`, `/api/v1/comments/*`)
//!
//! All endpoints carry `utoipa` annotations; the rendered reference is served at `/docs`.

pub mod handlers;
pub mod models;
