//! Test utilities for integration testing.

use axum_test::TestServer;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    api::models::{
        articles::ArticleStatus,
        tiers::BillingInterval,
        users::{CurrentUser, Role},
    },
    auth::{
        password::{self, Argon2Params},
        session,
    },
    config::{
        AuthConfig, BillingConfig, Config, DummyConfig, EmailConfig, EmailTransportConfig, NativeAuthConfig, PasswordConfig,
        SessionConfig,
    },
    db::{
        handlers::{Articles, Forums, Repository, SubscriptionTiers, Users},
        models::{
            articles::{ArticleCreateDBRequest, ArticleDBResponse},
            forums::{ForumCreateDBRequest, ForumDBResponse},
            tiers::{TierCreateDBRequest, TierDBResponse},
            users::{UserCreateDBRequest, UserDBResponse},
        },
    },
    types::AccessLevel,
};

pub async fn create_test_app(pool: PgPool) -> (TestServer, Config) {
    let config = create_test_config();
    let server = create_test_app_with_config(pool, config.clone()).await;
    (server, config)
}

pub async fn create_test_app_with_config(pool: PgPool, config: Config) -> TestServer {
    let app = crate::Application::new_with_pool(config, Some(pool))
        .await
        .expect("Failed to create application");

    app.into_test_server()
}

pub fn create_test_config() -> Config {
    // Each config gets its own mailbox so file-transport assertions don't see other tests' mail
    let email_dir = std::env::temp_dir().join(format!("memberhub-test-emails-{}-{}", std::process::id(), Uuid::new_v4()));

    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        public_url: "http://localhost:3001".to_string(),
        admin_email: "admin@test.com".to_string(),
        admin_password: None,
        secret_key: Some("test-secret-key-for-testing-only".to_string()),
        auth: AuthConfig {
            native: NativeAuthConfig {
                enabled: true,
                allow_registration: true,
                password: PasswordConfig {
                    argon2_memory_kib: 128,
                    argon2_iterations: 1,
                    argon2_parallelism: 1,
                    ..Default::default()
                },
                session: SessionConfig {
                    cookie_secure: false,
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        },
        billing: Some(BillingConfig::Dummy(DummyConfig {
            retain_access_when_past_due: true,
        })),
        email: EmailConfig {
            transport: EmailTransportConfig::File {
                path: email_dir.to_string_lossy().to_string(),
            },
            ..Default::default()
        },
        ..Default::default()
    }
}

fn test_params() -> Argon2Params {
    Argon2Params::from(&create_test_config().auth.native.password)
}

/// A user with a random email and the given role. Members get no extra role row.
pub async fn create_test_user(pool: &PgPool, role: Role) -> UserDBResponse {
    let id = Uuid::new_v4().simple().to_string();
    let roles = if role == Role::Member { vec![] } else { vec![role] };

    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Users::new(&mut conn)
        .create(&UserCreateDBRequest {
            email: format!("user-{id}@example.com"),
            display_name: format!("Test User {}", &id[..8]),
            password_hash: None,
            roles,
            is_protected: false,
        })
        .await
        .expect("Failed to create test user")
}

pub async fn create_test_user_with_password(pool: &PgPool, email: &str, password: &str) -> UserDBResponse {
    let password_hash = password::hash_string(password, test_params()).expect("Failed to hash password");

    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Users::new(&mut conn)
        .create(&UserCreateDBRequest {
            email: email.to_string(),
            display_name: "Password User".to_string(),
            password_hash: Some(password_hash),
            roles: vec![],
            is_protected: false,
        })
        .await
        .expect("Failed to create test user")
}

pub async fn create_test_admin_user(pool: &PgPool) -> UserDBResponse {
    create_test_user(pool, Role::Admin).await
}

pub async fn create_test_tier(pool: &PgPool, name: &str, price_id: &str) -> TierDBResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    SubscriptionTiers::new(&mut conn)
        .create(&TierCreateDBRequest {
            name: name.to_string(),
            description: Some(format!("The {name} plan")),
            price_cents: 900,
            currency: "usd".to_string(),
            billing_interval: BillingInterval::Month,
            provider_price_id: price_id.to_string(),
            is_active: true,
        })
        .await
        .expect("Failed to create test tier")
}

/// A members-only forum named after its slug.
pub async fn create_test_forum(pool: &PgPool, slug: &str) -> ForumDBResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Forums::new(&mut conn)
        .create(&ForumCreateDBRequest {
            name: slug.to_string(),
            slug: slug.to_string(),
            description: None,
            visibility: AccessLevel::Members,
            position: 0,
        })
        .await
        .expect("Failed to create test forum")
}

/// A published, public article whose title and slug are both `slug`.
pub async fn create_test_article(pool: &PgPool, author: &UserDBResponse, slug: &str) -> ArticleDBResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Articles::new(&mut conn)
        .create(&ArticleCreateDBRequest {
            author_id: author.id,
            title: slug.to_string(),
            slug: slug.to_string(),
            summary: None,
            body_html: "<p>Test article body</p>".to_string(),
            status: ArticleStatus::Published,
            visibility: AccessLevel::Public,
            tags: vec![],
        })
        .await
        .expect("Failed to create test article")
}

/// `Cookie` header value carrying a session for `user`.
pub fn session_cookie_for(user: &UserDBResponse, config: &Config) -> String {
    let current_user = CurrentUser::from(user.clone());
    let token = session::create_session_token(&current_user, config).expect("Failed to create session token");
    format!("{}={}", config.auth.native.session.cookie_name, token)
}
