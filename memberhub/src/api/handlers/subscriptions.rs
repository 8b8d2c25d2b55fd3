use axum::{
    Json,
    extract::{Path, Query, State},
};
use tracing::info;

use crate::{
    AppState,
    api::models::{
        pagination::PaginatedResponse,
        subscriptions::{ListSubscriptionsQuery, ReconcileResponse, SubscriptionResponse},
        users::CurrentUser,
    },
    auth::permissions::{operation, require_owner_or, resource, RequiresPermission},
    billing::sync::{SyncPolicy, reconcile_user_roles},
    db::{
        handlers::{Repository, Subscriptions, Users},
        models::subscriptions::SubscriptionFilter,
    },
    errors::{Error, Result},
    types::{Operation, Resource, UserId, UserIdOrCurrent},
};

/// Subscriptions of one user
#[utoipa::path(
    get,
    path = "/users/{user_id}/subscriptions",
    tag = "subscriptions",
    summary = "List a user's subscriptions",
    params(("user_id" = String, Path, description = "User ID, or `current`")),
    responses(
        (status = 200, description = "The user's subscriptions, newest first", body = [SubscriptionResponse]),
        (status = 403, description = "Not your account"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_user_subscriptions(
    State(state): State<AppState>,
    Path(user_id): Path<UserIdOrCurrent>,
    current_user: CurrentUser,
) -> Result<Json<Vec<SubscriptionResponse>>> {
    let user_id = user_id.resolve(current_user.id);
    require_owner_or(&current_user, user_id, Resource::Subscriptions, Operation::ReadAll)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let subscriptions = Subscriptions::new(&mut conn).list_for_user(user_id).await?;

    Ok(Json(subscriptions.into_iter().map(SubscriptionResponse::from).collect()))
}

/// All subscriptions
#[utoipa::path(
    get,
    path = "/subscriptions",
    tag = "subscriptions",
    summary = "List all subscriptions",
    params(ListSubscriptionsQuery),
    responses(
        (status = 200, description = "Page of subscriptions", body = PaginatedResponse<SubscriptionResponse>),
        (status = 403, description = "Requires admin"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_subscriptions(
    State(state): State<AppState>,
    _: RequiresPermission<resource::Subscriptions, operation::ReadAll>,
    Query(query): Query<ListSubscriptionsQuery>,
) -> Result<Json<PaginatedResponse<SubscriptionResponse>>> {
    let (skip, limit) = query.pagination.params();
    let filter = SubscriptionFilter {
        user_id: query.user_id,
        status: query.status,
        ..SubscriptionFilter::new(skip, limit)
    };

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Subscriptions::new(&mut conn);
    let subscriptions = repo.list(&filter).await?;
    let total_count = repo.count(&filter).await?;

    Ok(Json(PaginatedResponse::new(
        subscriptions.into_iter().map(SubscriptionResponse::from).collect(),
        total_count,
        skip,
        limit,
    )))
}

/// Re-run role sync for a user.
///
/// Grants or revokes billing-managed roles so they match the user's stored subscriptions, e.g.
/// after a webhook was lost or a role was edited by hand.
#[utoipa::path(
    post,
    path = "/users/{user_id}/subscriptions/reconcile",
    tag = "subscriptions",
    summary = "Reconcile a user's roles with their subscriptions",
    params(("user_id" = uuid::Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Roles after reconciliation", body = ReconcileResponse),
        (status = 403, description = "Requires admin"),
        (status = 404, description = "No such user"),
    ),
    security(("BearerAuth" = []), ("CookieAuth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn reconcile_subscriptions(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    current_user: RequiresPermission<resource::Subscriptions, operation::UpdateAll>,
) -> Result<Json<ReconcileResponse>> {
    let policy = state
        .config
        .billing
        .as_ref()
        .map(|billing| billing.sync_policy())
        .unwrap_or_else(SyncPolicy::default);

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    if Users::new(&mut tx).get_by_id(user_id).await?.is_none() {
        return Err(Error::NotFound {
            resource: "User".to_string(),
            id: user_id.to_string(),
        });
    }

    let plan = reconcile_user_roles(&mut tx, user_id, policy).await?;
    let roles = Users::new(&mut tx).get_roles(user_id).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    info!(
        "User {} reconciled roles of {}: granted {:?}, revoked {:?}",
        current_user.id, user_id, plan.grant, plan.revoke
    );

    Ok(Json(ReconcileResponse {
        user_id,
        granted: plan.grant,
        revoked: plan.revoke,
        roles,
    }))
}
