//! Idempotency ledger of processed billing webhook events.

use sqlx::PgConnection;
use tracing::instrument;

use crate::db::errors::Result;

pub struct WebhookEvents<'c> {
    db: &'c mut PgConnection,
}

impl<'c> WebhookEvents<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Claim an event id. Returns `false` if the event was already recorded, in which case the
    /// caller must not apply it again.
    #[instrument(skip(self), err)]
    pub async fn try_record(&mut self, event_id: &str, event_type: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO billing_webhook_events (event_id, event_type, outcome)
            VALUES ($1, $2, 'pending')
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    pub async fn set_outcome(&mut self, event_id: &str, outcome: &str) -> Result<()> {
        sqlx::query("UPDATE billing_webhook_events SET outcome = $2 WHERE event_id = $1")
            .bind(event_id)
            .bind(outcome)
            .execute(&mut *self.db)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn get_outcome(&mut self, event_id: &str) -> Result<Option<String>> {
        let outcome = sqlx::query_scalar("SELECT outcome FROM billing_webhook_events WHERE event_id = $1")
            .bind(event_id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(outcome)
    }
}
