//! Database models for subscription tiers.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::api::models::tiers::BillingInterval;
use crate::types::TierId;

#[derive(Debug, Clone)]
pub struct TierCreateDBRequest {
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub currency: String,
    pub billing_interval: BillingInterval,
    pub provider_price_id: String,
    pub is_active: bool,
}

/// Partial tier update. `None` leaves a column unchanged.
#[derive(Debug, Clone, Default)]
pub struct TierUpdateDBRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price_cents: Option<i64>,
    pub provider_price_id: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TierDBResponse {
    pub id: TierId,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub currency: String,
    pub billing_interval: BillingInterval,
    pub provider_price_id: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TierFilter {
    pub skip: i64,
    pub limit: i64,
    pub include_inactive: bool,
}

impl TierFilter {
    pub fn new(skip: i64, limit: i64) -> Self {
        Self {
            skip,
            limit,
            include_inactive: false,
        }
    }
}
