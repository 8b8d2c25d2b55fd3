//! HTTP request handlers for all API endpoints.
//!
//! Each handler validates its input, checks permissions through the extractors in
//! [`crate::auth`], and works through the repositories in [`crate::db::handlers`].
//! Errors are returned as [`crate::errors::Error`], which renders the status code and a
//! user-safe message.
//!
//! - [`auth`]: Registration, login, logout and password management
//! - [`users`]: User listing, profiles, roles and suspension
//! - [`tiers`]: The subscription tier catalog
//! - [`subscriptions`]: Subscription listings and role reconciliation
//! - [`billing`]: Checkout and billing portal sessions
//! - [`webhooks`]: Inbound billing provider events
//! - [`articles`]: Blog articles
//! - [`forums`], [`posts`], [`comments`]: The discussion boards

pub mod articles;
pub mod auth;
pub mod billing;
pub mod comments;
pub mod forums;
pub mod posts;
pub mod subscriptions;
pub mod tiers;
pub mod users;
pub mod webhooks;
