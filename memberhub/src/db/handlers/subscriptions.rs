//! Database repository for provider subscriptions.
//!
//! Rows are only ever written from billing provider state, so there is no create/update pair:
//! [`Subscriptions::upsert_from_provider`] inserts or overwrites by provider subscription id.

use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    db::{
        errors::Result,
        models::subscriptions::{SubscriptionDBResponse, SubscriptionFilter, SubscriptionUpsertDBRequest},
    },
    types::{SubscriptionId, UserId, abbrev_uuid},
};

const SUBSCRIPTION_COLUMNS: &str = r#"
    s.id, s.user_id, s.tier_id, t.name AS tier_name, s.provider_subscription_id,
    s.provider_customer_id, s.status, s.current_period_end, s.cancel_at_period_end,
    s.last_event_at, s.created_at, s.updated_at
"#;

pub struct Subscriptions<'c> {
    db: &'c mut PgConnection,
}

fn push_filter_conditions(query: &mut QueryBuilder<'_, Postgres>, filter: &SubscriptionFilter) {
    if let Some(user_id) = filter.user_id {
        query.push(" AND s.user_id = ");
        query.push_bind(user_id);
    }
    if let Some(status) = filter.status {
        query.push(" AND s.status = ");
        query.push_bind(status);
    }
}

impl<'c> Subscriptions<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Insert or overwrite the row for `provider_subscription_id`
    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&request.user_id), provider_subscription_id = %request.provider_subscription_id), err)]
    pub async fn upsert_from_provider(&mut self, request: &SubscriptionUpsertDBRequest) -> Result<SubscriptionDBResponse> {
        let subscription = sqlx::query_as::<_, SubscriptionDBResponse>(&format!(
            r#"
            WITH s AS (
                INSERT INTO subscriptions (
                    id, user_id, tier_id, provider_subscription_id, provider_customer_id,
                    status, current_period_end, cancel_at_period_end, last_event_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (provider_subscription_id) DO UPDATE SET
                    user_id = EXCLUDED.user_id,
                    tier_id = EXCLUDED.tier_id,
                    provider_customer_id = EXCLUDED.provider_customer_id,
                    status = EXCLUDED.status,
                    current_period_end = EXCLUDED.current_period_end,
                    cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                    last_event_at = EXCLUDED.last_event_at,
                    updated_at = NOW()
                RETURNING *
            )
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM s
            JOIN subscription_tiers t ON t.id = s.tier_id
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(request.user_id)
        .bind(request.tier_id)
        .bind(&request.provider_subscription_id)
        .bind(&request.provider_customer_id)
        .bind(request.status)
        .bind(request.current_period_end)
        .bind(request.cancel_at_period_end)
        .bind(request.event_at)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(subscription)
    }

    #[instrument(skip(self), fields(subscription_id = %abbrev_uuid(&id)), err)]
    pub async fn get_by_id(&mut self, id: SubscriptionId) -> Result<Option<SubscriptionDBResponse>> {
        let subscription = sqlx::query_as::<_, SubscriptionDBResponse>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions s JOIN subscription_tiers t ON t.id = s.tier_id WHERE s.id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(subscription)
    }

    /// Fetch a subscription by provider id and lock its row until the transaction ends, so
    /// concurrent deliveries for one subscription apply in order.
    #[instrument(skip(self), err)]
    pub async fn get_by_provider_id(&mut self, provider_subscription_id: &str) -> Result<Option<SubscriptionDBResponse>> {
        let subscription = sqlx::query_as::<_, SubscriptionDBResponse>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions s
            JOIN subscription_tiers t ON t.id = s.tier_id
            WHERE s.provider_subscription_id = $1
            FOR UPDATE OF s
            "#
        ))
        .bind(provider_subscription_id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(subscription)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn list_for_user(&mut self, user_id: UserId) -> Result<Vec<SubscriptionDBResponse>> {
        let subscriptions = sqlx::query_as::<_, SubscriptionDBResponse>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions s
            JOIN subscription_tiers t ON t.id = s.tier_id
            WHERE s.user_id = $1
            ORDER BY s.created_at DESC
            "#
        ))
        .bind(user_id)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(subscriptions)
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    pub async fn list(&mut self, filter: &SubscriptionFilter) -> Result<Vec<SubscriptionDBResponse>> {
        let mut query = QueryBuilder::new(format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions s JOIN subscription_tiers t ON t.id = s.tier_id WHERE 1=1"
        ));
        push_filter_conditions(&mut query, filter);
        query.push(" ORDER BY s.updated_at DESC, s.id LIMIT ");
        query.push_bind(filter.limit);
        query.push(" OFFSET ");
        query.push_bind(filter.skip);

        let subscriptions = query.build_query_as::<SubscriptionDBResponse>().fetch_all(&mut *self.db).await?;
        Ok(subscriptions)
    }

    #[instrument(skip(self, filter), err)]
    pub async fn count(&mut self, filter: &SubscriptionFilter) -> Result<i64> {
        let mut query = QueryBuilder::new("SELECT COUNT(*) FROM subscriptions s WHERE 1=1");
        push_filter_conditions(&mut query, filter);
        let count: (i64,) = query.build_query_as().fetch_one(&mut *self.db).await?;
        Ok(count.0)
    }
}
