//! Database repository for subscription tiers.

use std::collections::HashMap;

use sqlx::{PgConnection, QueryBuilder};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    db::{
        errors::{DbError, Result},
        handlers::repository::Repository,
        models::tiers::{TierCreateDBRequest, TierDBResponse, TierFilter, TierUpdateDBRequest},
    },
    types::{TierId, abbrev_uuid},
};

const TIER_COLUMNS: &str = r#"
    id, name, description, price_cents, currency, billing_interval, provider_price_id,
    is_active, created_at, updated_at
"#;

pub struct SubscriptionTiers<'c> {
    db: &'c mut PgConnection,
}

impl<'c> SubscriptionTiers<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, filter), err)]
    pub async fn count(&mut self, filter: &TierFilter) -> Result<i64> {
        let mut query = QueryBuilder::new("SELECT COUNT(*) FROM subscription_tiers WHERE 1=1");
        if !filter.include_inactive {
            query.push(" AND is_active");
        }
        let count: (i64,) = query.build_query_as().fetch_one(&mut *self.db).await?;
        Ok(count.0)
    }

    /// Look a tier up by the provider's price identifier, as carried on subscription events
    #[instrument(skip(self), err)]
    pub async fn get_by_provider_price_id(&mut self, price_id: &str) -> Result<Option<TierDBResponse>> {
        let tier = sqlx::query_as::<_, TierDBResponse>(&format!(
            "SELECT {TIER_COLUMNS} FROM subscription_tiers WHERE provider_price_id = $1"
        ))
        .bind(price_id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(tier)
    }
}

#[async_trait::async_trait]
impl<'c> Repository for SubscriptionTiers<'c> {
    type CreateRequest = TierCreateDBRequest;
    type UpdateRequest = TierUpdateDBRequest;
    type Response = TierDBResponse;
    type Id = TierId;
    type Filter = TierFilter;

    #[instrument(skip(self, request), fields(name = %request.name), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let tier = sqlx::query_as::<_, TierDBResponse>(&format!(
            r#"
            INSERT INTO subscription_tiers
                (id, name, description, price_cents, currency, billing_interval, provider_price_id, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {TIER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(request.name.trim())
        .bind(&request.description)
        .bind(request.price_cents)
        .bind(request.currency.to_lowercase())
        .bind(request.billing_interval)
        .bind(&request.provider_price_id)
        .bind(request.is_active)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(tier)
    }

    #[instrument(skip(self), fields(tier_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let tier = sqlx::query_as::<_, TierDBResponse>(&format!("SELECT {TIER_COLUMNS} FROM subscription_tiers WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(tier)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn get_bulk(&mut self, ids: Vec<TierId>) -> Result<HashMap<Self::Id, TierDBResponse>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let tiers = sqlx::query_as::<_, TierDBResponse>(&format!("SELECT {TIER_COLUMNS} FROM subscription_tiers WHERE id = ANY($1)"))
            .bind(&ids)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(tiers.into_iter().map(|t| (t.id, t)).collect())
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut query = QueryBuilder::new(format!("SELECT {TIER_COLUMNS} FROM subscription_tiers WHERE 1=1"));
        if !filter.include_inactive {
            query.push(" AND is_active");
        }
        query.push(" ORDER BY price_cents ASC, name ASC LIMIT ");
        query.push_bind(filter.limit);
        query.push(" OFFSET ");
        query.push_bind(filter.skip);

        let tiers = query.build_query_as::<TierDBResponse>().fetch_all(&mut *self.db).await?;
        Ok(tiers)
    }

    #[instrument(skip(self), fields(tier_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM subscription_tiers WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(tier_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let tier = sqlx::query_as::<_, TierDBResponse>(&format!(
            r#"
            UPDATE subscription_tiers SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                price_cents = COALESCE($4, price_cents),
                provider_price_id = COALESCE($5, provider_price_id),
                is_active = COALESCE($6, is_active),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {TIER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(request.name.as_deref().map(str::trim))
        .bind(&request.description)
        .bind(request.price_cents)
        .bind(&request.provider_price_id)
        .bind(request.is_active)
        .fetch_optional(&mut *self.db)
        .await?;

        tier.ok_or(DbError::NotFound)
    }
}
