//! # memberhub: membership site backend
//!
//! `memberhub` serves the backend of a membership site: member accounts, paid subscription
//! tiers sold through a billing provider, a blog whose articles can be restricted to members or
//! subscribers, and discussion forums with threads and comments.
//!
//! ## Architecture
//!
//! The application is built on [Axum](https://github.com/tokio-rs/axum) for the HTTP layer and
//! keeps all state in PostgreSQL. There are three request surfaces:
//!
//! - `/authentication/*`: registration, login, logout and password resets. Successful logins
//!   set a JWT session cookie and also return the token for `Authorization: Bearer` use.
//! - `/api/v1/*`: the REST API for users, tiers, subscriptions, articles, forums, posts and
//!   comments. Handlers check permissions through the role table in [`auth::permissions`].
//! - `/webhooks/billing`: signed events from the billing provider. Subscriptions are only ever
//!   written from these events (or an explicit reconcile), never from the checkout redirect.
//!
//! ### Core Components
//!
//! The **authentication layer** ([`auth`]) resolves the caller from the session cookie or bearer
//! token, reloading their roles from the database on every request so that a subscription that
//! lapses takes effect immediately.
//!
//! The **billing layer** ([`billing`]) hides the provider behind the
//! [`billing::BillingProvider`] trait. Webhook events are deduplicated by event id and applied
//! in one transaction together with the role changes they cause.
//!
//! The **content layer** ([`content`]) sanitizes member-submitted HTML and derives slugs and
//! excerpts.
//!
//! The **database layer** ([`db`]) uses the repository pattern; each table has a repository
//! wrapping a `PgConnection`, so callers choose whether work happens inside a transaction.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use memberhub::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = memberhub::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     memberhub::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Database Setup
//!
//! Migrations are embedded in the binary and run on startup. The initial admin account named by
//! `admin_email` is created (or has its password reset to `admin_password`) on every start.

pub mod api;
pub mod auth;
pub mod billing;
pub mod config;
pub mod content;
pub mod db;
pub mod email;
pub mod errors;
pub mod openapi;
pub mod telemetry;
#[cfg(test)]
mod test_utils;
pub mod types;

use std::sync::Arc;

use axum::{
    Router,
    http::{self, HeaderValue},
    routing::{delete, get, patch, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
use sqlx::{PgPool, postgres::PgPoolOptions};
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub use config::Config;

use crate::{
    api::models::users::Role,
    auth::password::{self, Argon2Params},
    billing::BillingProvider,
    config::CorsOrigin,
    db::{
        handlers::{Repository, Users},
        models::users::UserCreateDBRequest,
    },
    email::EmailService,
    openapi::{API_PREFIX, ApiDoc},
    types::UserId,
};

/// Application state shared across all request handlers.
///
/// `billing` is `None` when no provider is configured; checkout, the portal and webhooks then
/// answer 503 while the rest of the site keeps working.
///
/// ```ignore
/// let state = AppState::builder()
///     .db(pool)
///     .config(config)
///     .email(Arc::new(email))
///     .maybe_billing(provider)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    pub billing: Option<Arc<dyn BillingProvider>>,
    pub email: Arc<EmailService>,
}

/// Get the memberhub database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Create the initial admin user if it doesn't exist.
///
/// Idempotent: an existing account keeps its id, gets the admin role back if it lost it, and
/// has its password replaced when one is given. New accounts are created protected, so they
/// cannot be deleted or suspended through the API.
#[instrument(skip_all)]
pub async fn create_initial_admin_user(
    email: &str,
    password: Option<&str>,
    params: Argon2Params,
    db: &PgPool,
) -> Result<UserId, sqlx::Error> {
    let password_hash = match password {
        Some(pwd) => Some(
            password::hash_string(pwd, params)
                .map_err(|e| sqlx::Error::Encode(format!("Failed to hash admin password: {e}").into()))?,
        ),
        None => None,
    };

    let mut tx = db.begin().await?;
    let mut user_repo = Users::new(&mut tx);

    if let Some(existing_user) = user_repo
        .get_user_by_email(email)
        .await
        .map_err(|e| sqlx::Error::Protocol(format!("Failed to check existing user: {e}")))?
    {
        if let Some(password_hash) = password_hash {
            user_repo
                .update_password(existing_user.id, &password_hash)
                .await
                .map_err(|e| sqlx::Error::Protocol(format!("Failed to update admin password: {e}")))?;
        }
        user_repo
            .grant_role(existing_user.id, Role::Admin)
            .await
            .map_err(|e| sqlx::Error::Protocol(format!("Failed to grant admin role: {e}")))?;
        tx.commit().await?;
        return Ok(existing_user.id);
    }

    let user_create = UserCreateDBRequest {
        email: email.to_string(),
        display_name: "Administrator".to_string(),
        password_hash,
        roles: vec![Role::Admin],
        is_protected: true,
    };

    let created_user = user_repo
        .create(&user_create)
        .await
        .map_err(|e| sqlx::Error::Protocol(format!("Failed to create admin user: {e}")))?;

    tx.commit().await?;
    info!("Created initial admin user {}", email);
    Ok(created_user.id)
}

/// Build the CORS layer from `auth.security.cors`.
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut origins = Vec::new();
    for origin in &config.auth.security.cors.allowed_origins {
        let header_value = match origin {
            CorsOrigin::Wildcard => "*".parse::<HeaderValue>()?,
            // Url serializes with a trailing slash, browsers send origins without one
            CorsOrigin::Url(url) => url.as_str().trim_end_matches('/').parse::<HeaderValue>()?,
        };
        origins.push(header_value);
    }

    let mut cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::PATCH,
            http::Method::DELETE,
        ])
        .allow_headers([http::header::CONTENT_TYPE, http::header::AUTHORIZATION])
        .allow_credentials(config.auth.security.cors.allow_credentials)
        .expose_headers(vec![http::header::LOCATION]);

    if let Some(max_age) = config.auth.security.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router with all endpoints and middleware.
///
/// Returns an error if the CORS configuration holds an origin that is not a valid header value.
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let enable_metrics = state.config.enable_metrics;
    let cors_layer = create_cors_layer(&state.config)?;

    // Authentication routes live at the root so a reverse proxy can mask them
    let auth_routes = Router::new()
        .route(
            "/authentication/register",
            get(api::handlers::auth::get_registration_info).post(api::handlers::auth::register),
        )
        .route("/authentication/login", post(api::handlers::auth::login))
        .route("/authentication/logout", post(api::handlers::auth::logout))
        .route("/authentication/me", get(api::handlers::auth::me))
        .route("/authentication/password-resets", post(api::handlers::auth::request_password_reset))
        .route(
            "/authentication/password-resets/{token_id}/confirm",
            post(api::handlers::auth::confirm_password_reset),
        )
        .route("/authentication/password-change", post(api::handlers::auth::change_password));

    let api_routes = Router::new()
        // Users (admin only, apart from reading yourself)
        .route("/users", get(api::handlers::users::list_users))
        .route(
            "/users/{user_id}",
            get(api::handlers::users::get_user)
                .patch(api::handlers::users::update_user)
                .delete(api::handlers::users::delete_user),
        )
        .route(
            "/users/{user_id}/subscriptions",
            get(api::handlers::subscriptions::list_user_subscriptions),
        )
        .route(
            "/users/{user_id}/subscriptions/reconcile",
            post(api::handlers::subscriptions::reconcile_subscriptions),
        )
        // Tiers and subscriptions
        .route(
            "/tiers",
            get(api::handlers::tiers::list_tiers).post(api::handlers::tiers::create_tier),
        )
        .route("/tiers/{tier_id}", patch(api::handlers::tiers::update_tier))
        .route("/tiers/{tier_id}", delete(api::handlers::tiers::delete_tier))
        .route("/subscriptions", get(api::handlers::subscriptions::list_subscriptions))
        .route("/billing/checkout", post(api::handlers::billing::create_checkout))
        .route("/billing/portal", post(api::handlers::billing::create_portal))
        // Articles
        .route(
            "/articles",
            get(api::handlers::articles::list_articles).post(api::handlers::articles::create_article),
        )
        .route(
            "/articles/{id}",
            get(api::handlers::articles::get_article)
                .patch(api::handlers::articles::update_article)
                .delete(api::handlers::articles::delete_article),
        )
        .route(
            "/articles/{id}/comments",
            get(api::handlers::comments::list_article_comments).post(api::handlers::comments::create_article_comment),
        )
        // Forums and threads
        .route(
            "/forums",
            get(api::handlers::forums::list_forums).post(api::handlers::forums::create_forum),
        )
        .route(
            "/forums/{id}",
            get(api::handlers::forums::get_forum)
                .patch(api::handlers::forums::update_forum)
                .delete(api::handlers::forums::delete_forum),
        )
        .route("/forums/{id}/moderation", post(api::handlers::forums::moderate_forum))
        .route(
            "/forums/{id}/posts",
            get(api::handlers::posts::list_posts).post(api::handlers::posts::create_post),
        )
        .route(
            "/posts/{id}",
            get(api::handlers::posts::get_post)
                .patch(api::handlers::posts::update_post)
                .delete(api::handlers::posts::delete_post),
        )
        .route("/posts/{id}/moderation", post(api::handlers::posts::moderate_post))
        .route(
            "/posts/{id}/comments",
            get(api::handlers::comments::list_post_comments).post(api::handlers::comments::create_post_comment),
        )
        // Comments
        .route(
            "/comments/{id}",
            patch(api::handlers::comments::update_comment).delete(api::handlers::comments::delete_comment),
        )
        .route("/comments/{id}/moderation", post(api::handlers::comments::moderate_comment));

    let mut router = Router::new()
        .merge(auth_routes)
        .nest(API_PREFIX, api_routes)
        .route("/webhooks/billing", post(api::handlers::webhooks::billing_webhook))
        .route("/healthz", get(|| async { "OK" }))
        .with_state(state)
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .layer(cors_layer);

    if enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(move || async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Connect to the database and bring the schema up to date.
async fn setup_database(config: &Config, pool: Option<PgPool>) -> anyhow::Result<PgPool> {
    let pool = match pool {
        Some(pool) => pool,
        None => {
            PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(&config.database_url)
                .await?
        }
    };

    migrator().run(&pool).await?;

    create_initial_admin_user(
        &config.admin_email,
        config.admin_password.as_deref(),
        Argon2Params::from(&config.auth.native.password),
        &pool,
    )
    .await?;

    Ok(pool)
}

/// The memberhub server.
///
/// 1. **Create**: [`Application::new`] connects to the database, runs migrations, seeds the
///    admin account and builds the billing provider and email service
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and handles requests until the
///    shutdown future resolves
pub struct Application {
    router: Router,
    config: Config,
    pool: PgPool,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        Self::new_with_pool(config, None).await
    }

    /// Create an application on an existing pool. Used by tests, where `sqlx::test` owns the
    /// database.
    pub async fn new_with_pool(config: Config, pool: Option<PgPool>) -> anyhow::Result<Self> {
        debug!("Starting memberhub on {}", config.bind_address());

        let pool = setup_database(&config, pool).await?;

        let billing = match &config.billing {
            Some(billing_config) => Some(billing::create_provider(billing_config)?),
            None => {
                info!("No billing provider configured; checkout and webhooks are disabled");
                None
            }
        };
        let email = Arc::new(EmailService::new(&config)?);

        let app_state = AppState::builder()
            .db(pool.clone())
            .config(config.clone())
            .maybe_billing(billing)
            .email(email)
            .build();

        let router = build_router(app_state)?;

        Ok(Self { router, config, pool })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("memberhub listening on http://{}, public URL {}", bind_addr, self.config.public_url);

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Closing database connections...");
        self.pool.close().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
