//! Test utilities for integration testing (available with `test-utils` feature).

use crate::{
    AppState, Stores,
    api::models::auth::LoginResponse,
    auth::{password, session::TokenIssuer},
    config::{Config, DatabaseConfig, ExpirySweeperConfig},
    db::{
        handlers::{RoleStore, UserRoleStore, UserStore},
        memory::MemoryStore,
        models::{
            roles::{RoleCreateDBRequest, RoleDBResponse},
            user_roles::UserRoleCreateDBRequest,
            users::{UserCreateDBRequest, UserDBResponse, UserStatus},
        },
    },
    types::ADMIN_ROLE,
};
use axum_test::TestServer;
use serde_json::json;

pub fn create_test_config() -> Config {
    let mut config = Config {
        database: DatabaseConfig::Memory,
        host: "127.0.0.1".to_string(),
        port: 0,
        secret_key: Some("test-secret-key-for-testing-only".to_string()),
        ..Default::default()
    };

    // Cheap hashing so the suite stays fast
    config.auth.password.argon2_memory_kib = 1024;
    config.auth.password.argon2_iterations = 1;
    config.auth.password.argon2_parallelism = 1;
    config.background_services.expiry_sweeper = ExpirySweeperConfig {
        enabled: false,
        ..Default::default()
    };
    config
}

/// App state over a fresh in-memory store, with the store handle for seeding
pub fn create_test_state_with_config(config: Config) -> (AppState, MemoryStore) {
    let store = MemoryStore::new();
    let stores = Stores::memory(store.clone());
    let tokens = TokenIssuer::from_config(&config).expect("Failed to create token issuer");
    let dummy_hash = password::hash_password(&password::generate_password(), Some(config.auth.password.argon2_params()))
        .expect("Failed to hash dummy password");

    let state = AppState::builder()
        .config(config)
        .users(stores.users)
        .roles(stores.roles)
        .user_roles(stores.user_roles)
        .tokens(tokens)
        .dummy_hash(dummy_hash.into())
        .build();
    (state, store)
}

pub fn create_test_state() -> (AppState, MemoryStore) {
    create_test_state_with_config(create_test_config())
}

pub async fn create_test_app_with_config(config: Config) -> (TestServer, MemoryStore) {
    let (state, store) = create_test_state_with_config(config);
    let router = crate::build_router(state).expect("Failed to build router");
    let server = TestServer::new(router.into_make_service()).expect("Failed to create test server");
    (server, store)
}

/// Test server over the real router with no users or roles seeded
pub async fn create_test_app() -> (TestServer, MemoryStore) {
    create_test_app_with_config(create_test_config()).await
}

pub async fn seed_user(store: &MemoryStore, username: &str, password: &str, status: UserStatus) -> UserDBResponse {
    let password_hash =
        password::hash_password(password, Some(create_test_config().auth.password.argon2_params())).expect("Failed to hash password");

    store
        .create_user(&UserCreateDBRequest {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            phone: None,
            full_name: None,
            company_name: None,
            password_hash,
            status,
        })
        .await
        .expect("Failed to create test user")
}

pub async fn seed_role(store: &MemoryStore, name: &str) -> RoleDBResponse {
    store
        .create_role(&RoleCreateDBRequest {
            name: name.to_string(),
            description: None,
            is_active: true,
        })
        .await
        .expect("Failed to create test role")
}

/// An ACTIVE user holding `ADMIN`, plus the `ADMIN` role itself
pub async fn seed_admin(store: &MemoryStore, username: &str, password: &str) -> (UserDBResponse, RoleDBResponse) {
    let user = seed_user(store, username, password, UserStatus::Active).await;
    let role = match store.get_role_by_name(ADMIN_ROLE).await.expect("Failed to look up role") {
        Some(role) => role,
        None => seed_role(store, ADMIN_ROLE).await,
    };

    store
        .create_assignment(&UserRoleCreateDBRequest {
            user_id: user.id,
            role_id: role.id,
            assigned_by: "system".to_string(),
            is_active: true,
            expires_at: None,
            notes: None,
        })
        .await
        .expect("Failed to assign admin role");

    (user, role)
}

/// Log in through the API and return the bearer token
pub async fn login_token(server: &TestServer, username: &str, password: &str) -> String {
    let response = server
        .post("/api/auth/login")
        .json(&json!({"username": username, "password": password}))
        .await;
    response.assert_status_ok();
    response.json::<LoginResponse>().token
}
