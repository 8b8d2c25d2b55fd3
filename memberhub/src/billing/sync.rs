//! Reconciliation of subscription state into billing-managed roles.
//!
//! The decision logic is pure: [`grants_access`], [`desired_billing_roles`] and
//! [`plan_role_sync`] compute what a user's billing-managed roles should be, and
//! [`reconcile_user_roles`] applies the difference inside the caller's transaction. Staff roles
//! are never touched here.

use std::{collections::BTreeSet, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use tracing::{info, instrument};
use utoipa::ToSchema;

use crate::{
    api::models::users::Role,
    db::{
        errors::Result,
        handlers::{Subscriptions, Users},
    },
    types::{UserId, abbrev_uuid},
};

/// Lifecycle state of a provider subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Incomplete,
    IncompleteExpired,
    Trialing,
    Active,
    PastDue,
    Canceled,
    Unpaid,
    Paused,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::IncompleteExpired => "incomplete_expired",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Unpaid => "unpaid",
            SubscriptionStatus::Paused => "paused",
        }
    }

    /// Parse a provider status string. Unknown statuses are treated as `incomplete`, which never
    /// grants access.
    pub fn from_provider(status: &str) -> Self {
        status.parse().unwrap_or(SubscriptionStatus::Incomplete)
    }
}

impl FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "incomplete" => Ok(SubscriptionStatus::Incomplete),
            "incomplete_expired" => Ok(SubscriptionStatus::IncompleteExpired),
            "trialing" => Ok(SubscriptionStatus::Trialing),
            "active" => Ok(SubscriptionStatus::Active),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            // Both spellings appear in provider payloads
            "canceled" | "cancelled" => Ok(SubscriptionStatus::Canceled),
            "unpaid" => Ok(SubscriptionStatus::Unpaid),
            "paused" => Ok(SubscriptionStatus::Paused),
            other => Err(format!("unknown subscription status '{other}'")),
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Knobs for how subscription states translate into access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    /// Keep access while the provider retries a failed renewal
    pub retain_access_when_past_due: bool,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            retain_access_when_past_due: true,
        }
    }
}

pub fn grants_access(status: SubscriptionStatus, policy: SyncPolicy) -> bool {
    match status {
        SubscriptionStatus::Active | SubscriptionStatus::Trialing => true,
        SubscriptionStatus::PastDue => policy.retain_access_when_past_due,
        SubscriptionStatus::Incomplete
        | SubscriptionStatus::IncompleteExpired
        | SubscriptionStatus::Canceled
        | SubscriptionStatus::Unpaid
        | SubscriptionStatus::Paused => false,
    }
}

/// Billing-managed roles a user should hold given all of their subscriptions
pub fn desired_billing_roles(statuses: impl IntoIterator<Item = SubscriptionStatus>, policy: SyncPolicy) -> BTreeSet<Role> {
    let mut roles = BTreeSet::new();
    if statuses.into_iter().any(|status| grants_access(status, policy)) {
        roles.insert(Role::Subscriber);
    }
    roles
}

/// Role rows to add and remove to bring a user in line with their subscriptions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RoleSyncPlan {
    pub grant: Vec<Role>,
    pub revoke: Vec<Role>,
}

impl RoleSyncPlan {
    pub fn is_empty(&self) -> bool {
        self.grant.is_empty() && self.revoke.is_empty()
    }

    pub fn grants_subscriber(&self) -> bool {
        self.grant.contains(&Role::Subscriber)
    }

    pub fn revokes_subscriber(&self) -> bool {
        self.revoke.contains(&Role::Subscriber)
    }
}

/// Diff current roles against the desired billing-managed set. Roles that are not billing-managed
/// never appear in the plan.
pub fn plan_role_sync(current_roles: &[Role], desired: &BTreeSet<Role>) -> RoleSyncPlan {
    let current: BTreeSet<Role> = current_roles.iter().copied().filter(Role::is_billing_managed).collect();
    let desired: BTreeSet<Role> = desired.iter().copied().filter(Role::is_billing_managed).collect();

    RoleSyncPlan {
        grant: desired.difference(&current).copied().collect(),
        revoke: current.difference(&desired).copied().collect(),
    }
}

/// Whether an event created at `event_at` may overwrite state last written by an event created
/// at `last_event_at`. Providers deliver out of order; older events are stale.
pub fn should_apply_event(last_event_at: Option<DateTime<Utc>>, event_at: DateTime<Utc>) -> bool {
    match last_event_at {
        Some(last) => event_at >= last,
        None => true,
    }
}

/// Load a user's subscriptions and roles, and grant or revoke billing-managed roles to match.
///
/// Runs on the caller's connection so it commits or rolls back with the subscription write that
/// triggered it.
#[instrument(skip(conn, policy), fields(user_id = %abbrev_uuid(&user_id)), err)]
pub async fn reconcile_user_roles(conn: &mut PgConnection, user_id: UserId, policy: SyncPolicy) -> Result<RoleSyncPlan> {
    let subscriptions = Subscriptions::new(&mut *conn).list_for_user(user_id).await?;
    let desired = desired_billing_roles(subscriptions.iter().map(|s| s.status), policy);

    let mut users = Users::new(&mut *conn);
    let current = users.get_roles(user_id).await?;
    let plan = plan_role_sync(&current, &desired);

    for role in &plan.grant {
        users.grant_role(user_id, *role).await?;
        info!("Granted {:?} to user {} from subscription state", role, abbrev_uuid(&user_id));
    }
    for role in &plan.revoke {
        users.revoke_role(user_id, *role).await?;
        info!("Revoked {:?} from user {} after subscription ended", role, abbrev_uuid(&user_id));
    }

    Ok(plan)
}
