//! Applying verified billing events to the database.
//!
//! Every event is applied in one transaction together with its row in `billing_webhook_events`,
//! so a redelivered event is either fully applied once or reported as a duplicate. Provider API
//! calls happen before the transaction opens.

use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::{
    billing::{
        BillingError, BillingEvent, BillingEventKind, BillingProvider, ProviderSubscription, Result,
        sync::{RoleSyncPlan, SyncPolicy, reconcile_user_roles, should_apply_event},
    },
    db::{
        handlers::{Repository, SubscriptionTiers, Subscriptions, Users, WebhookEvents},
        models::{subscriptions::SubscriptionUpsertDBRequest, users::UserDBResponse},
    },
    types::{UserId, abbrev_uuid},
};

/// What happened to a delivered event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum WebhookOutcome {
    /// The event changed local state
    Processed,
    /// The event type is not acted on
    Ignored,
    /// A newer event for the same subscription was already applied
    Stale,
    /// The event id was seen before
    Duplicate,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Processed => "processed",
            WebhookOutcome::Ignored => "ignored",
            WebhookOutcome::Stale => "stale",
            WebhookOutcome::Duplicate => "duplicate",
        }
    }
}

/// Billing-managed roles that changed for one user
#[derive(Debug, Clone)]
pub struct RoleChange {
    pub user_id: UserId,
    pub email: String,
    pub display_name: String,
    pub tier_name: String,
    pub plan: RoleSyncPlan,
}

#[derive(Debug, Clone)]
pub struct ProcessedEvent {
    pub outcome: WebhookOutcome,
    /// Committed role changes, for notifications sent after the transaction
    pub role_changes: Vec<RoleChange>,
}

/// Resolve the local user a subscription belongs to: metadata first, then the customer id.
async fn resolve_user(
    conn: &mut PgConnection,
    subscription: &ProviderSubscription,
    known_user: Option<UserId>,
) -> Result<UserDBResponse> {
    let mut users = Users::new(conn);

    for candidate in [subscription.user_id, known_user].into_iter().flatten() {
        if let Some(user) = users.get_by_id(candidate).await? {
            return Ok(user);
        }
        warn!("Subscription {} names unknown user {}", subscription.id, abbrev_uuid(&candidate));
    }

    users
        .get_by_billing_customer_id(&subscription.customer_id)
        .await?
        .ok_or_else(|| BillingError::UnknownUser(subscription.customer_id.clone()))
}

/// Write provider subscription state and reconcile the owner's roles
#[instrument(skip(conn, subscription, policy), fields(provider_subscription_id = %subscription.id), err)]
pub async fn apply_subscription(
    conn: &mut PgConnection,
    subscription: &ProviderSubscription,
    event_at: chrono::DateTime<chrono::Utc>,
    known_user: Option<UserId>,
    policy: SyncPolicy,
) -> Result<(WebhookOutcome, Vec<RoleChange>)> {
    let user = resolve_user(&mut *conn, subscription, known_user).await?;

    let tier = SubscriptionTiers::new(&mut *conn)
        .get_by_provider_price_id(&subscription.price_id)
        .await?
        .ok_or_else(|| BillingError::UnknownTier(subscription.price_id.clone()))?;

    let mut subscriptions = Subscriptions::new(&mut *conn);
    let existing = subscriptions.get_by_provider_id(&subscription.id).await?;
    if let Some(existing) = &existing
        && !should_apply_event(existing.last_event_at, event_at)
    {
        info!(
            "Skipping stale event for subscription {} created at {}, last applied {:?}",
            subscription.id, event_at, existing.last_event_at
        );
        return Ok((WebhookOutcome::Stale, Vec::new()));
    }

    subscriptions
        .upsert_from_provider(&SubscriptionUpsertDBRequest {
            user_id: user.id,
            tier_id: tier.id,
            provider_subscription_id: subscription.id.clone(),
            provider_customer_id: subscription.customer_id.clone(),
            status: subscription.status,
            current_period_end: subscription.current_period_end,
            cancel_at_period_end: subscription.cancel_at_period_end,
            event_at,
        })
        .await?;

    if user.billing_customer_id.is_none() {
        Users::new(&mut *conn)
            .set_billing_customer_id(user.id, &subscription.customer_id)
            .await?;
    }

    let mut role_changes = Vec::new();
    let plan = reconcile_user_roles(&mut *conn, user.id, policy).await?;
    if !plan.is_empty() {
        role_changes.push(RoleChange {
            user_id: user.id,
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            tier_name: tier.name.clone(),
            plan,
        });
    }

    // The subscription moved between accounts; the previous owner may lose access
    if let Some(existing) = existing
        && existing.user_id != user.id
    {
        let plan = reconcile_user_roles(&mut *conn, existing.user_id, policy).await?;
        if !plan.is_empty()
            && let Some(previous) = Users::new(&mut *conn).get_by_id(existing.user_id).await?
        {
            role_changes.push(RoleChange {
                user_id: previous.id,
                email: previous.email,
                display_name: previous.display_name,
                tier_name: existing.tier_name,
                plan,
            });
        }
    }

    Ok((WebhookOutcome::Processed, role_changes))
}

/// Apply a verified event exactly once
#[instrument(skip_all, fields(event_id = %event.id, event_type = %event.event_type), err)]
pub async fn process_event(pool: &PgPool, provider: &dyn BillingProvider, policy: SyncPolicy, event: BillingEvent) -> Result<ProcessedEvent> {
    // Provider calls happen before the transaction opens
    let checkout_subscription = match &event.kind {
        BillingEventKind::CheckoutCompleted {
            subscription_id: Some(subscription_id),
            ..
        } => Some(provider.fetch_subscription(subscription_id).await?),
        _ => None,
    };

    let mut tx = pool.begin().await?;

    if !WebhookEvents::new(&mut tx).try_record(&event.id, &event.event_type).await? {
        info!("Event {} already processed", event.id);
        tx.rollback().await?;
        return Ok(ProcessedEvent {
            outcome: WebhookOutcome::Duplicate,
            role_changes: Vec::new(),
        });
    }

    let (outcome, role_changes) = match &event.kind {
        BillingEventKind::CheckoutCompleted {
            customer_id, user_id, ..
        } => {
            let mut users = Users::new(&mut tx);
            let user = match user_id {
                Some(id) => users.get_by_id(*id).await?,
                None => users.get_by_billing_customer_id(customer_id).await?,
            }
            .ok_or_else(|| BillingError::UnknownUser(customer_id.clone()))?;

            if user.billing_customer_id.as_deref() != Some(customer_id.as_str()) {
                users.set_billing_customer_id(user.id, customer_id).await?;
                info!("Linked user {} to billing customer {}", abbrev_uuid(&user.id), customer_id);
            }

            match &checkout_subscription {
                Some(subscription) => apply_subscription(&mut tx, subscription, event.created_at, Some(user.id), policy).await?,
                None => (WebhookOutcome::Processed, Vec::new()),
            }
        }
        BillingEventKind::SubscriptionChanged(subscription) => {
            apply_subscription(&mut tx, subscription, event.created_at, None, policy).await?
        }
        BillingEventKind::Ignored => (WebhookOutcome::Ignored, Vec::new()),
    };

    WebhookEvents::new(&mut tx).set_outcome(&event.id, outcome.as_str()).await?;
    tx.commit().await?;

    info!("Billing event {} {}", event.id, outcome.as_str());
    Ok(ProcessedEvent { outcome, role_changes })
}
