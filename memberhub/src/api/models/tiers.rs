//! API request/response models for subscription tiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use utoipa::{IntoParams, ToSchema};

use super::pagination::Pagination;
use crate::db::models::tiers::TierDBResponse;
use crate::types::TierId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(type_name = "billing_interval", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    Month,
    Year,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct TierCreate {
    pub name: String,
    pub description: Option<String>,
    /// Price in the smallest currency unit
    pub price_cents: i64,
    /// ISO 4217 code, defaults to `usd`
    pub currency: Option<String>,
    pub billing_interval: Option<BillingInterval>,
    /// Price identifier at the billing provider, e.g. `price_1Nx...`
    pub provider_price_id: String,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct TierUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price_cents: Option<i64>,
    pub provider_price_id: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TierResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: TierId,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub currency: String,
    pub billing_interval: BillingInterval,
    /// Only shown to tier managers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_price_id: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TierResponse {
    /// Public view of a tier, without provider identifiers
    pub fn public(db: TierDBResponse) -> Self {
        Self {
            provider_price_id: None,
            ..Self::from(db)
        }
    }
}

impl From<TierDBResponse> for TierResponse {
    fn from(db: TierDBResponse) -> Self {
        Self {
            id: db.id,
            name: db.name,
            description: db.description,
            price_cents: db.price_cents,
            currency: db.currency,
            billing_interval: db.billing_interval,
            provider_price_id: Some(db.provider_price_id),
            is_active: db.is_active,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ListTiersQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,

    /// Include retired tiers (tier managers only)
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub include_inactive: Option<bool>,
}
