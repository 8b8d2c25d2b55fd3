//! API request/response models for subscriptions and billing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::pagination::Pagination;
use crate::billing::sync::SubscriptionStatus;
use crate::db::models::subscriptions::SubscriptionDBResponse;
use crate::types::{SubscriptionId, TierId, UserId};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubscriptionResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: SubscriptionId,
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    #[schema(value_type = String, format = "uuid")]
    pub tier_id: TierId,
    pub tier_name: String,
    pub status: SubscriptionStatus,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<SubscriptionDBResponse> for SubscriptionResponse {
    fn from(db: SubscriptionDBResponse) -> Self {
        Self {
            id: db.id,
            user_id: db.user_id,
            tier_id: db.tier_id,
            tier_name: db.tier_name,
            status: db.status,
            current_period_end: db.current_period_end,
            cancel_at_period_end: db.cancel_at_period_end,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListSubscriptionsQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,

    pub status: Option<SubscriptionStatus>,

    #[param(value_type = Option<String>, format = "uuid")]
    pub user_id: Option<UserId>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    #[schema(value_type = String, format = "uuid")]
    pub tier_id: TierId,
}

/// Where to send the member's browser next
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RedirectResponse {
    pub url: String,
}

/// Billing-managed roles after an admin-triggered reconciliation
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReconcileResponse {
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    pub granted: Vec<super::users::Role>,
    pub revoked: Vec<super::users::Role>,
    pub roles: Vec<super::users::Role>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookResponse {
    pub status: crate::billing::webhooks::WebhookOutcome,
}
