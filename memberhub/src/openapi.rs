//! OpenAPI document for the HTTP API, rendered with Scalar at `/docs`.
//!
//! Handlers under `/api/v1` declare their paths relative to that prefix; [`ApiPrefixAddon`]
//! puts the prefix back so the document lists the URLs clients actually call.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::{api, billing, types};

pub const API_PREFIX: &str = "/api/v1";

/// Paths that are served outside [`API_PREFIX`]
const UNPREFIXED: &[&str] = &["/authentication/", "/webhooks/"];

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let Some(components) = openapi.components.as_mut() else {
            return;
        };
        components.security_schemes.insert(
            "BearerAuth".to_string(),
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .description(Some(
                        "The session token returned at login, sent as `Authorization: Bearer <token>`.",
                    ))
                    .build(),
            ),
        );
        components.security_schemes.insert(
            "CookieAuth".to_string(),
            SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::with_description(
                "memberhub_session",
                "Session cookie set by `/authentication/login`. The cookie name is configurable.",
            ))),
        );
    }
}

struct ApiPrefixAddon;

impl Modify for ApiPrefixAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let paths = std::mem::take(&mut openapi.paths.paths);
        openapi.paths.paths = paths
            .into_iter()
            .map(|(path, item)| {
                if UNPREFIXED.iter().any(|p| path.starts_with(p)) {
                    (path, item)
                } else {
                    (format!("{API_PREFIX}{path}"), item)
                }
            })
            .collect();
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "memberhub",
        description = "Membership site backend: accounts, paid subscription tiers, articles and forums."
    ),
    modifiers(&SecurityAddon, &ApiPrefixAddon),
    paths(
        api::handlers::auth::get_registration_info,
        api::handlers::auth::register,
        api::handlers::auth::login,
        api::handlers::auth::logout,
        api::handlers::auth::me,
        api::handlers::auth::request_password_reset,
        api::handlers::auth::confirm_password_reset,
        api::handlers::auth::change_password,
        api::handlers::users::list_users,
        api::handlers::users::get_user,
        api::handlers::users::update_user,
        api::handlers::users::delete_user,
        api::handlers::tiers::list_tiers,
        api::handlers::tiers::create_tier,
        api::handlers::tiers::update_tier,
        api::handlers::tiers::delete_tier,
        api::handlers::subscriptions::list_user_subscriptions,
        api::handlers::subscriptions::list_subscriptions,
        api::handlers::subscriptions::reconcile_subscriptions,
        api::handlers::billing::create_checkout,
        api::handlers::billing::create_portal,
        api::handlers::webhooks::billing_webhook,
        api::handlers::articles::list_articles,
        api::handlers::articles::get_article,
        api::handlers::articles::create_article,
        api::handlers::articles::update_article,
        api::handlers::articles::delete_article,
        api::handlers::forums::list_forums,
        api::handlers::forums::get_forum,
        api::handlers::forums::create_forum,
        api::handlers::forums::update_forum,
        api::handlers::forums::delete_forum,
        api::handlers::forums::moderate_forum,
        api::handlers::posts::list_posts,
        api::handlers::posts::create_post,
        api::handlers::posts::get_post,
        api::handlers::posts::update_post,
        api::handlers::posts::delete_post,
        api::handlers::posts::moderate_post,
        api::handlers::comments::list_post_comments,
        api::handlers::comments::create_post_comment,
        api::handlers::comments::list_article_comments,
        api::handlers::comments::create_article_comment,
        api::handlers::comments::update_comment,
        api::handlers::comments::delete_comment,
        api::handlers::comments::moderate_comment,
    ),
    components(
        schemas(
            types::AccessLevel,
            api::models::auth::RegisterRequest,
            api::models::auth::LoginRequest,
            api::models::auth::AuthResponse,
            api::models::auth::AuthSuccessResponse,
            api::models::auth::RegistrationInfo,
            api::models::auth::PasswordResetRequest,
            api::models::auth::PasswordResetConfirmRequest,
            api::models::auth::ChangePasswordRequest,
            api::models::users::Role,
            api::models::users::CurrentUser,
            api::models::users::UserUpdate,
            api::models::users::UserResponse,
            api::models::tiers::BillingInterval,
            api::models::tiers::TierCreate,
            api::models::tiers::TierUpdate,
            api::models::tiers::TierResponse,
            api::models::subscriptions::SubscriptionResponse,
            api::models::subscriptions::CheckoutRequest,
            api::models::subscriptions::RedirectResponse,
            api::models::subscriptions::ReconcileResponse,
            api::models::subscriptions::WebhookResponse,
            billing::sync::SubscriptionStatus,
            billing::webhooks::WebhookOutcome,
            api::models::articles::ArticleStatus,
            api::models::articles::ArticleCreate,
            api::models::articles::ArticleUpdate,
            api::models::articles::ArticleResponse,
            api::models::forums::ForumCreate,
            api::models::forums::ForumUpdate,
            api::models::forums::ForumModeration,
            api::models::forums::ForumResponse,
            api::models::forums::PostCreate,
            api::models::forums::PostUpdate,
            api::models::forums::PostModeration,
            api::models::forums::PostResponse,
            api::models::comments::CommentCreate,
            api::models::comments::CommentUpdate,
            api::models::comments::CommentModeration,
            api::models::comments::CommentResponse,
        )
    ),
    tags(
        (name = "authentication", description = "Registration, sign-in and passwords"),
        (name = "users", description = "Accounts, roles and suspension"),
        (name = "tiers", description = "Subscription tiers on offer"),
        (name = "subscriptions", description = "Subscriptions mirrored from the billing provider"),
        (name = "billing", description = "Checkout, the billing portal and provider webhooks"),
        (name = "articles", description = "Blog articles"),
        (name = "forums", description = "Forums and their threads"),
        (name = "comments", description = "Comments on threads and articles"),
    )
)]
pub struct ApiDoc;
