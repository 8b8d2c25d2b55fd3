use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use tracing::info;

use crate::{
    AppState,
    api::models::{
        pagination::PaginatedResponse,
        tiers::{BillingInterval, ListTiersQuery, TierCreate, TierResponse, TierUpdate},
    },
    auth::{
        current_user::OptionalUser,
        permissions::{has_permission, operation, resource, RequiresPermission},
    },
    db::{
        handlers::{Repository, SubscriptionTiers},
        models::tiers::{TierCreateDBRequest, TierFilter, TierUpdateDBRequest},
    },
    errors::{Error, Result},
    types::{Operation, Resource, TierId},
};

const DEFAULT_CURRENCY: &str = "usd";

fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::BadRequest {
            message: "Tier name must not be empty".to_string(),
        });
    }
    Ok(name.to_string())
}

fn validate_price(price_cents: i64) -> Result<i64> {
    if price_cents < 0 {
        return Err(Error::BadRequest {
            message: "Price must not be negative".to_string(),
        });
    }
    Ok(price_cents)
}

fn validate_currency(currency: &str) -> Result<String> {
    let currency = currency.trim().to_ascii_lowercase();
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_lowercase()) {
        return Err(Error::BadRequest {
            message: "Currency must be a three letter ISO code".to_string(),
        });
    }
    Ok(currency)
}

fn validate_price_id(price_id: &str) -> Result<String> {
    let price_id = price_id.trim();
    if price_id.is_empty() {
        return Err(Error::BadRequest {
            message: "Provider price ID must not be empty".to_string(),
        });
    }
    Ok(price_id.to_string())
}

/// List subscription tiers.
///
/// Anyone may list the active tiers. Tier managers additionally see provider price IDs and may
/// pass `include_inactive=true`.
#[utoipa::path(
    get,
    path = "/tiers",
    tag = "tiers",
    summary = "List subscription tiers",
    params(ListTiersQuery),
    responses(
        (status = 200, description = "Page of tiers", body = PaginatedResponse<TierResponse>),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_tiers(
    State(state): State<AppState>,
    OptionalUser(current_user): OptionalUser,
    Query(query): Query<ListTiersQuery>,
) -> Result<Json<PaginatedResponse<TierResponse>>> {
    let is_manager = current_user
        .as_ref()
        .is_some_and(|user| has_permission(user, Resource::Tiers, Operation::UpdateAll));

    let (skip, limit) = query.pagination.params();
    let filter = TierFilter {
        include_inactive: is_manager && query.include_inactive.unwrap_or(false),
        ..TierFilter::new(skip, limit)
    };

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = SubscriptionTiers::new(&mut conn);
    let tiers = repo.list(&filter).await?;
    let total_count = repo.count(&filter).await?;

    let data = tiers
        .into_iter()
        .map(|tier| if is_manager { TierResponse::from(tier) } else { TierResponse::public(tier) })
        .collect();

    Ok(Json(PaginatedResponse::new(data, total_count, skip, limit)))
}

/// Create a subscription tier
#[utoipa::path(
    post,
    path = "/tiers",
    tag = "tiers",
    summary = "Create a subscription tier",
    request_body = TierCreate,
    responses(
        (status = 201, description = "Tier created", body = TierResponse),
        (status = 400, description = "Invalid tier"),
        (status = 403, description = "Requires admin"),
        (status = 409, description = "Name or provider price already in use"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_tier(
    State(state): State<AppState>,
    current_user: RequiresPermission<resource::Tiers, operation::CreateAll>,
    Json(request): Json<TierCreate>,
) -> Result<(StatusCode, Json<TierResponse>)> {
    let db_request = TierCreateDBRequest {
        name: validate_name(&request.name)?,
        description: request.description.filter(|d| !d.trim().is_empty()),
        price_cents: validate_price(request.price_cents)?,
        currency: validate_currency(request.currency.as_deref().unwrap_or(DEFAULT_CURRENCY))?,
        billing_interval: request.billing_interval.unwrap_or(BillingInterval::Month),
        provider_price_id: validate_price_id(&request.provider_price_id)?,
        is_active: request.is_active.unwrap_or(true),
    };

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let tier = SubscriptionTiers::new(&mut conn).create(&db_request).await?;
    info!("User {} created tier {} ({})", current_user.id, tier.id, tier.name);

    Ok((StatusCode::CREATED, Json(TierResponse::from(tier))))
}

/// Update a subscription tier
#[utoipa::path(
    patch,
    path = "/tiers/{tier_id}",
    tag = "tiers",
    summary = "Update a subscription tier",
    request_body = TierUpdate,
    params(("tier_id" = uuid::Uuid, Path, description = "Tier ID")),
    responses(
        (status = 200, description = "Tier updated", body = TierResponse),
        (status = 400, description = "Invalid tier"),
        (status = 403, description = "Requires admin"),
        (status = 404, description = "No such tier"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_tier(
    State(state): State<AppState>,
    Path(tier_id): Path<TierId>,
    _: RequiresPermission<resource::Tiers, operation::UpdateAll>,
    Json(request): Json<TierUpdate>,
) -> Result<Json<TierResponse>> {
    let db_request = TierUpdateDBRequest {
        name: request.name.as_deref().map(validate_name).transpose()?,
        description: request.description,
        price_cents: request.price_cents.map(validate_price).transpose()?,
        provider_price_id: request.provider_price_id.as_deref().map(validate_price_id).transpose()?,
        is_active: request.is_active,
    };

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let tier = SubscriptionTiers::new(&mut conn).update(tier_id, &db_request).await?;

    Ok(Json(TierResponse::from(tier)))
}

/// Delete a subscription tier.
///
/// Tiers that still have subscriptions cannot be deleted; deactivate them instead.
#[utoipa::path(
    delete,
    path = "/tiers/{tier_id}",
    tag = "tiers",
    summary = "Delete a subscription tier",
    params(("tier_id" = uuid::Uuid, Path, description = "Tier ID")),
    responses(
        (status = 204, description = "Tier deleted"),
        (status = 400, description = "The tier still has subscriptions"),
        (status = 403, description = "Requires admin"),
        (status = 404, description = "No such tier"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn delete_tier(
    State(state): State<AppState>,
    Path(tier_id): Path<TierId>,
    current_user: RequiresPermission<resource::Tiers, operation::DeleteAll>,
) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    if !SubscriptionTiers::new(&mut conn).delete(tier_id).await? {
        return Err(Error::NotFound {
            resource: "Tier".to_string(),
            id: tier_id.to_string(),
        });
    }

    info!("User {} deleted tier {}", current_user.id, tier_id);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::users::Role;
    use crate::test_utils::{create_test_admin_user, create_test_app, create_test_tier, create_test_user, session_cookie_for};
    use axum::http::header;
    use serde_json::json;
    use sqlx::PgPool;

    #[test]
    fn test_currency_validation() {
        assert_eq!(validate_currency(" EUR ").unwrap(), "eur");
        assert!(validate_currency("euro").is_err());
        assert!(validate_currency("e1r").is_err());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_public_listing_hides_inactive_and_price_ids(pool: PgPool) {
        let (server, config) = create_test_app(pool.clone()).await;
        create_test_tier(&pool, "Gold", "price_gold").await;
        let silver = create_test_tier(&pool, "Silver", "price_silver").await;

        let admin = create_test_admin_user(&pool).await;
        server
            .patch(&format!("/api/v1/tiers/{}", silver.id))
            .add_header(header::COOKIE, session_cookie_for(&admin, &config))
            .json(&json!({"is_active": false}))
            .await
            .assert_status_ok();

        let response = server.get("/api/v1/tiers").await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["total_count"], 1);
        assert_eq!(body["data"][0]["name"], "Gold");
        assert!(body["data"][0].get("provider_price_id").is_none());

        // Non-managers cannot see inactive tiers even when asking
        let member = create_test_user(&pool, Role::Member).await;
        let page: PaginatedResponse<TierResponse> = server
            .get("/api/v1/tiers?include_inactive=true")
            .add_header(header::COOKIE, session_cookie_for(&member, &config))
            .await
            .json();
        assert_eq!(page.total_count, 1);

        let page: PaginatedResponse<TierResponse> = server
            .get("/api/v1/tiers?include_inactive=true")
            .add_header(header::COOKIE, session_cookie_for(&admin, &config))
            .await
            .json();
        assert_eq!(page.total_count, 2);
        assert!(page.data.iter().all(|t| t.provider_price_id.is_some()));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_create_tier_requires_admin(pool: PgPool) {
        let (server, config) = create_test_app(pool.clone()).await;
        let editor = create_test_user(&pool, Role::Editor).await;
        let admin = create_test_admin_user(&pool).await;
        let request = json!({"name": "Gold", "price_cents": 1500, "provider_price_id": "price_gold"});

        server
            .post("/api/v1/tiers")
            .add_header(header::COOKIE, session_cookie_for(&editor, &config))
            .json(&request)
            .await
            .assert_status(StatusCode::FORBIDDEN);

        let response = server
            .post("/api/v1/tiers")
            .add_header(header::COOKIE, session_cookie_for(&admin, &config))
            .json(&request)
            .await;
        response.assert_status(StatusCode::CREATED);
        let tier: TierResponse = response.json();
        assert_eq!(tier.currency, "usd");
        assert_eq!(tier.billing_interval, BillingInterval::Month);
        assert!(tier.is_active);

        // Name is unique
        server
            .post("/api/v1/tiers")
            .add_header(header::COOKIE, session_cookie_for(&admin, &config))
            .json(&json!({"name": "Gold", "price_cents": 100, "provider_price_id": "price_other"}))
            .await
            .assert_status(StatusCode::CONFLICT);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_create_tier_validation(pool: PgPool) {
        let (server, config) = create_test_app(pool.clone()).await;
        let admin = create_test_admin_user(&pool).await;

        server
            .post("/api/v1/tiers")
            .add_header(header::COOKIE, session_cookie_for(&admin, &config))
            .json(&json!({"name": "Cheap", "price_cents": -1, "provider_price_id": "price_cheap"}))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_delete_tier(pool: PgPool) {
        let (server, config) = create_test_app(pool.clone()).await;
        let admin = create_test_admin_user(&pool).await;
        let tier = create_test_tier(&pool, "Bronze", "price_bronze").await;
        let cookie = session_cookie_for(&admin, &config);

        server
            .delete(&format!("/api/v1/tiers/{}", tier.id))
            .add_header(header::COOKIE, cookie.clone())
            .await
            .assert_status(StatusCode::NO_CONTENT);
        server
            .delete(&format!("/api/v1/tiers/{}", tier.id))
            .add_header(header::COOKIE, cookie)
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }
}
