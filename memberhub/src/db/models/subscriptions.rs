//! Database models for provider subscriptions.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::billing::sync::SubscriptionStatus;
use crate::types::{SubscriptionId, TierId, UserId};

/// Provider state of a subscription, written on every accepted webhook
#[derive(Debug, Clone)]
pub struct SubscriptionUpsertDBRequest {
    pub user_id: UserId,
    pub tier_id: TierId,
    pub provider_subscription_id: String,
    pub provider_customer_id: String,
    pub status: SubscriptionStatus,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    /// Creation time of the provider event this state came from
    pub event_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionDBResponse {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub tier_id: TierId,
    pub tier_name: String,
    pub provider_subscription_id: String,
    pub provider_customer_id: String,
    pub status: SubscriptionStatus,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub last_event_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SubscriptionFilter {
    pub skip: i64,
    pub limit: i64,
    pub user_id: Option<UserId>,
    pub status: Option<SubscriptionStatus>,
}

impl SubscriptionFilter {
    pub fn new(skip: i64, limit: i64) -> Self {
        Self {
            skip,
            limit,
            user_id: None,
            status: None,
        }
    }
}
