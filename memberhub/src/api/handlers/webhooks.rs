//! Inbound billing provider webhooks.

use axum::{Json, extract::State, http::HeaderMap};
use tracing::{info, warn};

use crate::{
    AppState,
    api::models::subscriptions::WebhookResponse,
    billing::{
        BillingError,
        webhooks::{RoleChange, process_event},
    },
    email::EmailService,
    errors::{Error, Result},
};

/// Tell members about access they gained or lost. Runs after the commit, and a failed email
/// never fails the delivery.
async fn notify_role_changes(email: &EmailService, changes: &[RoleChange]) {
    for change in changes {
        let tier = Some(change.tier_name.as_str());
        let sent = if change.plan.grants_subscriber() {
            email.send_subscription_activated(&change.email, &change.display_name, tier).await
        } else if change.plan.revokes_subscriber() {
            email.send_subscription_ended(&change.email, &change.display_name, tier).await
        } else {
            continue;
        };

        if let Err(e) = sent {
            warn!("Failed to send subscription notice to user {}: {e}", change.user_id);
        }
    }
}

/// Receive a billing provider event.
///
/// The delivery is verified with the provider's signature scheme, then applied exactly once.
/// Redeliveries of an already-applied event return `duplicate`.
#[utoipa::path(
    post,
    path = "/webhooks/billing",
    tag = "billing",
    summary = "Billing provider webhook",
    request_body(content = String, description = "Raw provider event", content_type = "application/json"),
    responses(
        (status = 200, description = "Event accepted", body = WebhookResponse),
        (status = 400, description = "Bad signature or payload"),
        (status = 422, description = "The event names a tier or customer that does not exist yet"),
        (status = 503, description = "Billing is not configured"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn billing_webhook(State(state): State<AppState>, headers: HeaderMap, body: String) -> Result<Json<WebhookResponse>> {
    let Some(provider) = state.billing.clone() else {
        warn!("Billing webhook called but billing is not configured");
        return Err(Error::Billing(BillingError::NotConfigured));
    };
    let policy = state.config.billing.as_ref().map(|b| b.sync_policy()).unwrap_or_default();

    let event = provider.parse_webhook(&headers, &body)?;
    info!("Received billing event {} ({})", event.id, event.event_type);

    let processed = process_event(&state.db, provider.as_ref(), policy, event).await?;
    notify_role_changes(&state.email, &processed.role_changes).await;

    Ok(Json(WebhookResponse {
        status: processed.outcome,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::users::Role;
    use crate::billing::webhooks::WebhookOutcome;
    use crate::db::handlers::{Users, WebhookEvents};
    use crate::test_utils::{create_test_app, create_test_tier, create_test_user};
    use axum::http::StatusCode;
    use serde_json::json;
    use sqlx::PgPool;

    fn subscription_event(id: &str, user_id: uuid::Uuid, status: &str, created_at: &str) -> serde_json::Value {
        json!({
            "id": id,
            "type": "subscription_changed",
            "created_at": created_at,
            "subscription": {
                "id": "dummy_sub_1",
                "customer_id": "dummy_cus_1",
                "status": status,
                "price_id": "price_gold",
                "user_id": user_id,
            }
        })
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_webhook_grants_then_revokes_subscriber(pool: PgPool) {
        let (server, _) = create_test_app(pool.clone()).await;
        create_test_tier(&pool, "Gold", "price_gold").await;
        let member = create_test_user(&pool, Role::Member).await;

        let response = server
            .post("/webhooks/billing")
            .json(&subscription_event("evt_1", member.id, "active", "2025-01-01T00:00:00Z"))
            .await;
        response.assert_status_ok();
        let body: WebhookResponse = response.json();
        assert_eq!(body.status, WebhookOutcome::Processed);

        let mut conn = pool.acquire().await.unwrap();
        assert!(Users::new(&mut conn).get_roles(member.id).await.unwrap().contains(&Role::Subscriber));

        let body: WebhookResponse = server
            .post("/webhooks/billing")
            .json(&subscription_event("evt_2", member.id, "canceled", "2025-02-01T00:00:00Z"))
            .await
            .json();
        assert_eq!(body.status, WebhookOutcome::Processed);
        assert_eq!(Users::new(&mut conn).get_roles(member.id).await.unwrap(), vec![Role::Member]);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_redelivery_is_duplicate(pool: PgPool) {
        let (server, _) = create_test_app(pool.clone()).await;
        create_test_tier(&pool, "Gold", "price_gold").await;
        let member = create_test_user(&pool, Role::Member).await;
        let event = subscription_event("evt_dup", member.id, "active", "2025-01-01T00:00:00Z");

        server.post("/webhooks/billing").json(&event).await.assert_status_ok();
        let body: WebhookResponse = server.post("/webhooks/billing").json(&event).await.json();
        assert_eq!(body.status, WebhookOutcome::Duplicate);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_unknown_tier_is_retryable(pool: PgPool) {
        let (server, _) = create_test_app(pool.clone()).await;
        let member = create_test_user(&pool, Role::Member).await;

        server
            .post("/webhooks/billing")
            .json(&subscription_event("evt_early", member.id, "active", "2025-01-01T00:00:00Z"))
            .await
            .assert_status(StatusCode::UNPROCESSABLE_ENTITY);

        // The event id was not consumed, so a redelivery after the tier exists is applied
        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(WebhookEvents::new(&mut conn).get_outcome("evt_early").await.unwrap(), None);

        create_test_tier(&pool, "Gold", "price_gold").await;
        let body: WebhookResponse = server
            .post("/webhooks/billing")
            .json(&subscription_event("evt_early", member.id, "active", "2025-01-01T00:00:00Z"))
            .await
            .json();
        assert_eq!(body.status, WebhookOutcome::Processed);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_malformed_and_ignored_events(pool: PgPool) {
        let (server, _) = create_test_app(pool.clone()).await;

        server
            .post("/webhooks/billing")
            .text("not json")
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        let body: WebhookResponse = server
            .post("/webhooks/billing")
            .json(&json!({"id": "evt_other", "type": "invoice_created", "created_at": "2025-01-01T00:00:00Z"}))
            .await
            .json();
        assert_eq!(body.status, WebhookOutcome::Ignored);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_activation_email_is_written(pool: PgPool) {
        let (server, config) = create_test_app(pool.clone()).await;
        create_test_tier(&pool, "Gold", "price_gold").await;
        let member = create_test_user(&pool, Role::Member).await;

        server
            .post("/webhooks/billing")
            .json(&subscription_event("evt_mail", member.id, "active", "2025-01-01T00:00:00Z"))
            .await
            .assert_status_ok();

        let crate::config::EmailTransportConfig::File { path } = &config.email.transport else {
            panic!("test config should use the file transport");
        };
        let sent: Vec<String> = std::fs::read_dir(path)
            .unwrap()
            .filter_map(|entry| std::fs::read_to_string(entry.unwrap().path()).ok())
            .collect();
        assert!(sent.iter().any(|mail| mail.contains(&member.email) && mail.contains("Your subscription is active")));
    }
}
