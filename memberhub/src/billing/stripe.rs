//! Stripe billing provider, built on `async-stripe`.
//!
//! Webhook deliveries are authenticated with [`stripe_webhook::Webhook::construct_event`], then the
//! verified body is decoded into a [`BillingEvent`] reading only the fields we act on.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, de::DeserializeOwned};
use stripe::{Client, ClientBuilder};
use stripe_billing::{billing_portal_session::CreateBillingPortalSession, subscription::RetrieveSubscription};
use stripe_checkout::{
    CheckoutSessionMode,
    checkout_session::{CreateCheckoutSession, CreateCheckoutSessionLineItems, CreateCheckoutSessionSubscriptionData},
};
use stripe_webhook::Webhook;
use uuid::Uuid;

use crate::{
    api::models::users::CurrentUser,
    billing::{
        BillingError, BillingEvent, BillingEventKind, BillingProvider, CheckoutSession, ProviderSubscription, Result,
        sync::SubscriptionStatus,
    },
    config::StripeConfig,
    db::models::tiers::TierDBResponse,
};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Metadata key carrying the local user id on checkout sessions and subscriptions
const USER_ID_METADATA_KEY: &str = "memberhub_user_id";

pub struct StripeProvider {
    config: StripeConfig,
    client: Client,
}

impl StripeProvider {
    pub fn new(config: StripeConfig) -> Result<Self> {
        let client = ClientBuilder::new(config.api_key.as_str())
            .url(config.api_base.as_str())
            .build()
            .map_err(|e| BillingError::ProviderApi(format!("build Stripe client: {e}")))?;

        Ok(Self { config, client })
    }
}

fn provider_error(action: &str, err: impl std::fmt::Display) -> BillingError {
    tracing::error!("Stripe failed to {}: {}", action, err);
    BillingError::ProviderApi(format!("{action}: {err}"))
}

#[derive(Debug, Deserialize)]
struct StripeList<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct StripePrice {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StripeSubscriptionItem {
    price: StripePrice,
    current_period_end: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct StripeSubscription {
    id: String,
    customer: String,
    status: String,
    #[serde(default)]
    cancel_at_period_end: bool,
    current_period_end: Option<i64>,
    items: StripeList<StripeSubscriptionItem>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct StripeCheckoutObject {
    customer: Option<String>,
    subscription: Option<String>,
    client_reference_id: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created: i64,
    data: StripeEventData,
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| BillingError::InvalidPayload(format!("timestamp {secs} out of range")))
}

fn user_id_from(metadata: &HashMap<String, String>, reference: Option<&str>) -> Option<Uuid> {
    metadata
        .get(USER_ID_METADATA_KEY)
        .map(String::as_str)
        .or(reference)
        .and_then(|id| Uuid::parse_str(id).ok())
}

impl TryFrom<StripeSubscription> for ProviderSubscription {
    type Error = BillingError;

    fn try_from(subscription: StripeSubscription) -> Result<Self> {
        let item = subscription
            .items
            .data
            .first()
            .ok_or_else(|| BillingError::InvalidPayload(format!("subscription {} has no items", subscription.id)))?;

        // Newer API versions report the period on the item rather than the subscription
        let current_period_end = subscription
            .current_period_end
            .or(item.current_period_end)
            .map(timestamp)
            .transpose()?;

        Ok(ProviderSubscription {
            price_id: item.price.id.clone(),
            user_id: user_id_from(&subscription.metadata, None),
            status: SubscriptionStatus::from_provider(&subscription.status),
            id: subscription.id,
            customer_id: subscription.customer,
            current_period_end,
            cancel_at_period_end: subscription.cancel_at_period_end,
        })
    }
}

fn decode_object<T: DeserializeOwned>(object: serde_json::Value, event_type: &str) -> Result<T> {
    serde_json::from_value(object).map_err(|e| BillingError::InvalidPayload(format!("{event_type}: {e}")))
}

/// Decode a verified event body into a [`BillingEvent`]
fn parse_event(body: &str) -> Result<BillingEvent> {
    let event: StripeEvent = serde_json::from_str(body).map_err(|e| BillingError::InvalidPayload(e.to_string()))?;
    let created_at = timestamp(event.created)?;

    let kind = match event.event_type.as_str() {
        "checkout.session.completed" => {
            let session: StripeCheckoutObject = decode_object(event.data.object, &event.event_type)?;
            let customer_id = session
                .customer
                .ok_or_else(|| BillingError::InvalidPayload("checkout session has no customer".to_string()))?;
            BillingEventKind::CheckoutCompleted {
                user_id: user_id_from(&session.metadata, session.client_reference_id.as_deref()),
                customer_id,
                subscription_id: session.subscription,
            }
        }
        "customer.subscription.created" | "customer.subscription.updated" | "customer.subscription.deleted" => {
            let subscription: StripeSubscription = decode_object(event.data.object, &event.event_type)?;
            BillingEventKind::SubscriptionChanged(subscription.try_into()?)
        }
        _ => BillingEventKind::Ignored,
    };

    Ok(BillingEvent {
        id: event.id,
        event_type: event.event_type,
        created_at,
        kind,
    })
}

#[async_trait]
impl BillingProvider for StripeProvider {
    #[tracing::instrument(skip_all, fields(user_id = %user.id, tier = %tier.name))]
    async fn create_checkout_session(
        &self,
        user: &CurrentUser,
        tier: &TierDBResponse,
        customer_id: Option<&str>,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSession> {
        let user_id = user.id.to_string();
        let metadata = HashMap::from([(USER_ID_METADATA_KEY.to_string(), user_id.clone())]);

        let mut params = CreateCheckoutSession::new()
            .mode(CheckoutSessionMode::Subscription)
            .line_items(vec![CreateCheckoutSessionLineItems {
                price: Some(tier.provider_price_id.clone()),
                quantity: Some(1),
                ..Default::default()
            }])
            .success_url(success_url)
            .cancel_url(cancel_url)
            .client_reference_id(user_id.as_str())
            .metadata(metadata.clone())
            .subscription_data(CreateCheckoutSessionSubscriptionData {
                metadata: Some(metadata),
                ..Default::default()
            });

        // Repeat subscribers keep one Stripe customer
        params = match customer_id {
            Some(customer) => {
                tracing::info!("Using existing Stripe customer {} for user {}", customer, user.id);
                params.customer(customer)
            }
            None => params.customer_email(user.email.as_str()),
        };

        let session = params
            .send(&self.client)
            .await
            .map_err(|e| provider_error("create checkout session", e))?;
        let url = session
            .url
            .ok_or_else(|| BillingError::ProviderApi("checkout session has no URL".to_string()))?;

        tracing::info!("Created Stripe checkout session {}", session.id);
        Ok(CheckoutSession {
            id: session.id.to_string(),
            url,
        })
    }

    #[tracing::instrument(skip_all)]
    async fn create_portal_session(&self, customer_id: &str, return_url: &str) -> Result<String> {
        let session = CreateBillingPortalSession::new()
            .customer(customer_id)
            .return_url(return_url)
            .send(&self.client)
            .await
            .map_err(|e| provider_error("create portal session", e))?;
        Ok(session.url)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_subscription(&self, provider_subscription_id: &str) -> Result<ProviderSubscription> {
        let subscription = RetrieveSubscription::new(provider_subscription_id.to_string())
            .send(&self.client)
            .await
            .map_err(|e| provider_error("retrieve subscription", e))?;

        let item = subscription
            .items
            .data
            .first()
            .ok_or_else(|| BillingError::InvalidPayload(format!("subscription {} has no items", subscription.id)))?;

        Ok(ProviderSubscription {
            id: subscription.id.to_string(),
            customer_id: subscription.customer.id().to_string(),
            status: SubscriptionStatus::from_provider(subscription.status.as_str()),
            price_id: item.price.id.to_string(),
            current_period_end: Some(timestamp(item.current_period_end)?),
            cancel_at_period_end: subscription.cancel_at_period_end,
            user_id: user_id_from(&subscription.metadata, None),
        })
    }

    fn parse_webhook(&self, headers: &HeaderMap, body: &str) -> Result<BillingEvent> {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .ok_or_else(|| BillingError::InvalidSignature("missing Stripe-Signature header".to_string()))?
            .to_str()
            .map_err(|_| BillingError::InvalidSignature("unreadable Stripe-Signature header".to_string()))?;

        Webhook::construct_event(body, signature, &self.config.webhook_secret).map_err(|e| {
            tracing::warn!("Rejected Stripe webhook: {:?}", e);
            BillingError::InvalidSignature(e.to_string())
        })?;

        let event = parse_event(body)?;
        tracing::trace!("Validated Stripe webhook event {} ({})", event.id, event.event_type);
        Ok(event)
    }
}
