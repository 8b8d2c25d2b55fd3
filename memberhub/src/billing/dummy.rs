//! Dummy billing provider for development and tests.
//!
//! Checkout completes instantly: the session immediately creates an active subscription held in
//! memory, and the member is sent straight to the success URL. Webhooks are unsigned JSON:
//!
//! ```json
//! {"id": "evt_1", "type": "subscription_changed", "created_at": "2025-01-01T00:00:00Z",
//!  "subscription": {"id": "dummy_sub_1", "customer_id": "dummy_cus_1", "status": "active",
//!                   "price_id": "price_gold", "user_id": "..."}}
//! ```

use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    api::models::users::CurrentUser,
    billing::{
        BillingError, BillingEvent, BillingEventKind, BillingProvider, CheckoutSession, ProviderSubscription, Result,
        sync::SubscriptionStatus,
    },
    db::models::tiers::TierDBResponse,
    types::UserId,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DummySubscription {
    pub id: String,
    pub customer_id: String,
    pub status: SubscriptionStatus,
    pub price_id: String,
    #[serde(default)]
    pub current_period_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub user_id: Option<UserId>,
}

impl From<DummySubscription> for ProviderSubscription {
    fn from(s: DummySubscription) -> Self {
        Self {
            id: s.id,
            customer_id: s.customer_id,
            status: s.status,
            price_id: s.price_id,
            current_period_end: s.current_period_end,
            cancel_at_period_end: s.cancel_at_period_end,
            user_id: s.user_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DummyPayload {
    CheckoutCompleted {
        customer_id: String,
        #[serde(default)]
        subscription_id: Option<String>,
        #[serde(default)]
        user_id: Option<UserId>,
    },
    SubscriptionChanged {
        subscription: DummySubscription,
    },
    #[serde(other)]
    Other,
}

/// Webhook body accepted by the dummy provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DummyWebhook {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: DummyPayload,
}

/// Provider that needs no external account
#[derive(Default)]
pub struct DummyProvider {
    subscriptions: Mutex<HashMap<String, ProviderSubscription>>,
}

impl DummyProvider {
    fn remember(&self, subscription: ProviderSubscription) {
        if let Ok(mut subscriptions) = self.subscriptions.lock() {
            subscriptions.insert(subscription.id.clone(), subscription);
        }
    }
}

#[async_trait]
impl BillingProvider for DummyProvider {
    async fn create_checkout_session(
        &self,
        user: &CurrentUser,
        tier: &TierDBResponse,
        customer_id: Option<&str>,
        success_url: &str,
        _cancel_url: &str,
    ) -> Result<CheckoutSession> {
        let session_id = format!("dummy_cs_{}", Uuid::new_v4().simple());
        let subscription = ProviderSubscription {
            id: format!("dummy_sub_{}", Uuid::new_v4().simple()),
            customer_id: customer_id.map(str::to_string).unwrap_or_else(|| format!("dummy_cus_{}", user.id.simple())),
            status: SubscriptionStatus::Active,
            price_id: tier.provider_price_id.clone(),
            current_period_end: Some(Utc::now() + Duration::days(30)),
            cancel_at_period_end: false,
            user_id: Some(user.id),
        };
        tracing::info!(
            "Dummy provider created checkout session {} with subscription {} for user {}",
            session_id,
            subscription.id,
            user.id
        );
        self.remember(subscription);

        Ok(CheckoutSession {
            url: success_url.replace("{CHECKOUT_SESSION_ID}", &session_id),
            id: session_id,
        })
    }

    async fn create_portal_session(&self, _customer_id: &str, return_url: &str) -> Result<String> {
        Ok(return_url.to_string())
    }

    async fn fetch_subscription(&self, provider_subscription_id: &str) -> Result<ProviderSubscription> {
        self.subscriptions
            .lock()
            .map_err(|_| BillingError::ProviderApi("dummy subscription store poisoned".to_string()))?
            .get(provider_subscription_id)
            .cloned()
            .ok_or_else(|| BillingError::ProviderApi(format!("unknown subscription {provider_subscription_id}")))
    }

    fn parse_webhook(&self, _headers: &HeaderMap, body: &str) -> Result<BillingEvent> {
        let webhook: DummyWebhook = serde_json::from_str(body).map_err(|e| BillingError::InvalidPayload(e.to_string()))?;

        let (event_type, kind) = match webhook.payload {
            DummyPayload::CheckoutCompleted {
                customer_id,
                subscription_id,
                user_id,
            } => (
                "checkout_completed",
                BillingEventKind::CheckoutCompleted {
                    customer_id,
                    subscription_id,
                    user_id,
                },
            ),
            DummyPayload::SubscriptionChanged { subscription } => {
                let subscription = ProviderSubscription::from(subscription);
                self.remember(subscription.clone());
                ("subscription_changed", BillingEventKind::SubscriptionChanged(subscription))
            }
            DummyPayload::Other => ("other", BillingEventKind::Ignored),
        };

        Ok(BillingEvent {
            id: webhook.id,
            event_type: event_type.to_string(),
            created_at: webhook.created_at,
            kind,
        })
    }
}
