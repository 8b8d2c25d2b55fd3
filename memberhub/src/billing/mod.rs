//! Billing provider abstraction.
//!
//! A [`BillingProvider`] creates hosted checkout and customer portal sessions and turns signed
//! webhook deliveries into [`BillingEvent`]s. Applying those events to the database lives in
//! [`webhooks`]; deciding which roles a subscription grants lives in [`sync`].

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use chrono::{DateTime, Utc};

use crate::{
    api::models::users::CurrentUser, billing::sync::SubscriptionStatus, config::BillingConfig, db::errors::DbError,
    db::models::tiers::TierDBResponse, types::UserId,
};

pub mod dummy;
pub mod stripe;
pub mod sync;
pub mod webhooks;

/// Create a billing provider from configuration
///
/// This is the single point where we convert config into provider instances.
pub fn create_provider(config: &BillingConfig) -> Result<Arc<dyn BillingProvider>> {
    match config {
        BillingConfig::Stripe(stripe_config) => Ok(Arc::new(stripe::StripeProvider::new(stripe_config.clone())?)),
        BillingConfig::Dummy(_) => Ok(Arc::new(dummy::DummyProvider::default())),
    }
}

/// Result type for billing operations
pub type Result<T> = std::result::Result<T, BillingError>;

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("Billing provider API error: {0}")]
    ProviderApi(String),

    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("No subscription tier uses provider price {0}")]
    UnknownTier(String),

    #[error("No user matches billing customer {0}")]
    UnknownUser(String),

    #[error("Billing is not configured")]
    NotConfigured,

    #[error(transparent)]
    Database(#[from] DbError),
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.into())
    }
}

impl BillingError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            BillingError::ProviderApi(_) => StatusCode::BAD_GATEWAY,
            BillingError::InvalidSignature(_) | BillingError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            // Returned to the provider so the delivery is retried once the tier or user exists
            BillingError::UnknownTier(_) | BillingError::UnknownUser(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BillingError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            BillingError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            BillingError::ProviderApi(_) => "The billing provider could not complete the request".to_string(),
            BillingError::Database(_) => "Database error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

/// A hosted checkout page the member is redirected to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

/// Subscription state as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSubscription {
    pub id: String,
    pub customer_id: String,
    pub status: SubscriptionStatus,
    pub price_id: String,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    /// Local user id, when the subscription was created through our checkout
    pub user_id: Option<UserId>,
}

/// A verified webhook delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingEvent {
    /// Provider event id, used for idempotency
    pub id: String,
    /// Provider event type, e.g. `customer.subscription.updated`
    pub event_type: String,
    /// When the provider created the event, used to drop out-of-order deliveries
    pub created_at: DateTime<Utc>,
    pub kind: BillingEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEventKind {
    /// A hosted checkout finished and the provider created a customer
    CheckoutCompleted {
        customer_id: String,
        subscription_id: Option<String>,
        user_id: Option<UserId>,
    },
    /// A subscription was created, changed or ended
    SubscriptionChanged(ProviderSubscription),
    /// An event type we record but do not act on
    Ignored,
}

/// Abstract billing provider interface
#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Create a hosted checkout session for `tier`.
    ///
    /// `customer_id` reuses an existing provider customer so repeat subscribers keep one billing
    /// record. The local user id must be attached so webhooks can be matched back to the user.
    async fn create_checkout_session(
        &self,
        user: &CurrentUser,
        tier: &TierDBResponse,
        customer_id: Option<&str>,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSession>;

    /// Create a self-service portal session and return its URL
    async fn create_portal_session(&self, customer_id: &str, return_url: &str) -> Result<String>;

    /// Fetch the current state of a subscription
    async fn fetch_subscription(&self, provider_subscription_id: &str) -> Result<ProviderSubscription>;

    /// Verify a webhook delivery and decode it.
    ///
    /// Returns `InvalidSignature` when the delivery cannot be authenticated.
    fn parse_webhook(&self, headers: &HeaderMap, body: &str) -> Result<BillingEvent>;
}
