use std::sync::Arc;

use axum::{Json, extract::State};
use tracing::info;

use crate::{
    AppState,
    api::models::subscriptions::{CheckoutRequest, RedirectResponse},
    auth::permissions::{operation, resource, RequiresPermission},
    billing::{BillingError, BillingProvider, sync::grants_access},
    db::handlers::{Repository, SubscriptionTiers, Subscriptions},
    errors::{Error, Result},
};

const CHECKOUT_SUCCESS_PATH: &str = "billing/success?session_id={CHECKOUT_SESSION_ID}";
const CHECKOUT_CANCEL_PATH: &str = "billing/cancelled";
const PORTAL_RETURN_PATH: &str = "account";

fn provider(state: &AppState) -> Result<Arc<dyn BillingProvider>> {
    state.billing.clone().ok_or(Error::Billing(BillingError::NotConfigured))
}

/// Start a hosted checkout for a tier
#[utoipa::path(
    post,
    path = "/billing/checkout",
    tag = "billing",
    summary = "Create a checkout session",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "URL of the hosted checkout page", body = RedirectResponse),
        (status = 400, description = "The tier is not available"),
        (status = 404, description = "No such tier"),
        (status = 409, description = "Already subscribed"),
        (status = 502, description = "The billing provider failed"),
        (status = 503, description = "Billing is not configured"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_checkout(
    State(state): State<AppState>,
    current_user: RequiresPermission<resource::Subscriptions, operation::CreateOwn>,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<RedirectResponse>> {
    let provider = provider(&state)?;
    let policy = state.config.billing.as_ref().map(|b| b.sync_policy()).unwrap_or_default();

    let tier = {
        let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
        let tier = SubscriptionTiers::new(&mut conn)
            .get_by_id(request.tier_id)
            .await?
            .ok_or_else(|| Error::NotFound {
                resource: "Tier".to_string(),
                id: request.tier_id.to_string(),
            })?;
        if !tier.is_active {
            return Err(Error::BadRequest {
                message: format!("The {} tier is no longer available", tier.name),
            });
        }

        let existing = Subscriptions::new(&mut conn).list_for_user(current_user.id).await?;
        if existing.iter().any(|s| grants_access(s.status, policy)) {
            return Err(Error::Conflict {
                message: "You already have an active subscription; manage it from the billing portal".to_string(),
            });
        }
        tier
    };

    let session = provider
        .create_checkout_session(
            &current_user,
            &tier,
            current_user.billing_customer_id.as_deref(),
            &state.config.public_link(CHECKOUT_SUCCESS_PATH),
            &state.config.public_link(CHECKOUT_CANCEL_PATH),
        )
        .await?;

    info!("Created checkout session {} for user {} on tier {}", session.id, current_user.id, tier.id);
    Ok(Json(RedirectResponse { url: session.url }))
}

/// Open the provider's self-service portal
#[utoipa::path(
    post,
    path = "/billing/portal",
    tag = "billing",
    summary = "Create a billing portal session",
    responses(
        (status = 200, description = "URL of the billing portal", body = RedirectResponse),
        (status = 400, description = "The user has no billing account yet"),
        (status = 502, description = "The billing provider failed"),
        (status = 503, description = "Billing is not configured"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_portal(
    State(state): State<AppState>,
    current_user: RequiresPermission<resource::Billing, operation::CreateOwn>,
) -> Result<Json<RedirectResponse>> {
    let provider = provider(&state)?;
    let customer_id = current_user.billing_customer_id.as_deref().ok_or_else(|| Error::BadRequest {
        message: "You do not have a billing account yet".to_string(),
    })?;

    let url = provider
        .create_portal_session(customer_id, &state.config.public_link(PORTAL_RETURN_PATH))
        .await?;

    Ok(Json(RedirectResponse { url }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::users::Role;
    use crate::db::handlers::Users;
    use crate::db::models::tiers::TierUpdateDBRequest;
    use crate::test_utils::{create_test_app, create_test_app_with_config, create_test_config, create_test_tier, create_test_user, session_cookie_for};
    use axum::http::{StatusCode, header};
    use serde_json::json;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_checkout_returns_redirect(pool: PgPool) {
        let (server, config) = create_test_app(pool.clone()).await;
        let member = create_test_user(&pool, Role::Member).await;
        let tier = create_test_tier(&pool, "Gold", "price_gold").await;

        let response = server
            .post("/api/v1/billing/checkout")
            .add_header(header::COOKIE, session_cookie_for(&member, &config))
            .json(&json!({"tier_id": tier.id}))
            .await;
        response.assert_status_ok();
        let body: RedirectResponse = response.json();
        assert!(body.url.starts_with(&config.public_link("billing/success?session_id=dummy_cs_")));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_checkout_rejects_inactive_and_unknown_tiers(pool: PgPool) {
        let (server, config) = create_test_app(pool.clone()).await;
        let member = create_test_user(&pool, Role::Member).await;
        let tier = create_test_tier(&pool, "Retired", "price_retired").await;
        let mut conn = pool.acquire().await.unwrap();
        SubscriptionTiers::new(&mut conn)
            .update(
                tier.id,
                &TierUpdateDBRequest {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        server
            .post("/api/v1/billing/checkout")
            .add_header(header::COOKIE, session_cookie_for(&member, &config))
            .json(&json!({"tier_id": tier.id}))
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        server
            .post("/api/v1/billing/checkout")
            .add_header(header::COOKIE, session_cookie_for(&member, &config))
            .json(&json!({"tier_id": uuid::Uuid::new_v4()}))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_checkout_requires_sign_in(pool: PgPool) {
        let (server, _) = create_test_app(pool.clone()).await;
        let tier = create_test_tier(&pool, "Gold", "price_gold").await;

        server
            .post("/api/v1/billing/checkout")
            .json(&json!({"tier_id": tier.id}))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_billing_not_configured(pool: PgPool) {
        let mut config = create_test_config();
        config.billing = None;
        let server = create_test_app_with_config(pool.clone(), config.clone()).await;
        let member = create_test_user(&pool, Role::Member).await;
        let tier = create_test_tier(&pool, "Gold", "price_gold").await;

        server
            .post("/api/v1/billing/checkout")
            .add_header(header::COOKIE, session_cookie_for(&member, &config))
            .json(&json!({"tier_id": tier.id}))
            .await
            .assert_status(StatusCode::SERVICE_UNAVAILABLE);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_portal_requires_billing_customer(pool: PgPool) {
        let (server, config) = create_test_app(pool.clone()).await;
        let member = create_test_user(&pool, Role::Member).await;

        server
            .post("/api/v1/billing/portal")
            .add_header(header::COOKIE, session_cookie_for(&member, &config))
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        let mut conn = pool.acquire().await.unwrap();
        Users::new(&mut conn).set_billing_customer_id(member.id, "dummy_cus_1").await.unwrap();

        let body: RedirectResponse = server
            .post("/api/v1/billing/portal")
            .add_header(header::COOKIE, session_cookie_for(&member, &config))
            .await
            .json();
        assert_eq!(body.url, config.public_link("account"));
    }
}
