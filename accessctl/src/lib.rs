//! # accessctl: user and role administration with token authentication
//!
//! `accessctl` is an HTTP service that owns principals (user accounts), role definitions and the
//! ledger of role assignments between them. Clients authenticate with a username and password and
//! receive a signed bearer token; every protected request is then admitted or refused according
//! to the roles the principal holds *at that moment*.
//!
//! ## Request Flow
//!
//! A login request reaches [`api::handlers::auth::login`], which hands the credentials to the
//! [`auth::authenticator::Authenticator`]. It looks the principal up by exact username, refuses
//! accounts that are not `ACTIVE`, checks the Argon2 hash and asks the
//! [`auth::session::TokenIssuer`] for an HS256 token. All refusals produce the same 401 body.
//!
//! Protected requests carry `Authorization: Bearer <token>`. The
//! [`api::models::users::CurrentUser`] extractor validates the token's signature and expiry and
//! then asks the [`auth::resolver::AuthorizationResolver`] for the principal's effective roles.
//! Handlers that need a role take [`auth::current_user::RequiresRole`], which answers 403 when the
//! role is missing. Because roles are resolved per request rather than baked into the token, a
//! grant or revocation applies to tokens that are already in circulation.
//!
//! ## Role Assignments
//!
//! Each assignment in the [`auth::ledger::RoleLedger`] has an active flag and an optional expiry,
//! and only assignments that are active and unexpired grant their role. An optional background
//! sweeper clears the active flag of lapsed assignments; authorization never waits for it.
//!
//! ## Storage
//!
//! The store traits in [`db::handlers`] have two implementations: PostgreSQL through `sqlx`
//! (`database.type: external`, or `DATABASE_URL`), and an in-process store for development and
//! tests (`database.type: memory`). Migrations live in `migrations/` and run on startup.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod telemetry;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use crate::{
    api::handlers,
    auth::{
        authenticator::{Authenticator, dummy_password_hash},
        ledger::{AssignRole, RoleLedger},
        password,
        resolver::AuthorizationResolver,
        session::TokenIssuer,
    },
    config::{CorsOrigin, DatabaseConfig},
    db::{
        handlers::{RoleStore, Roles, UserRoleStore, UserRoles, UserStore, Users},
        memory::MemoryStore,
        models::{
            roles::RoleCreateDBRequest,
            users::{UserCreateDBRequest, UserStatus, UserUpdateDBRequest},
        },
    },
    types::ADMIN_ROLE,
};
use axum::{
    Router,
    http::{self, HeaderValue},
    routing::{delete, get, patch, post, put},
};
use bon::Builder;
pub use config::Config;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info, instrument, warn};

pub use types::{RoleId, UserId, UserRoleId};

/// Application state shared across all request handlers.
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .users(users)
///     .roles(roles)
///     .user_roles(user_roles)
///     .tokens(TokenIssuer::from_config(&config)?)
///     .dummy_hash(dummy_password_hash(config.auth.password.argon2_params()).await?)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub users: Arc<dyn UserStore>,
    pub roles: Arc<dyn RoleStore>,
    pub user_roles: Arc<dyn UserRoleStore>,
    pub tokens: TokenIssuer,
    /// Verified against on refused logins, see [`Authenticator::authenticate`]
    pub dummy_hash: Arc<str>,
}

impl AppState {
    pub fn authenticator(&self) -> Authenticator {
        Authenticator::new(self.users.clone(), self.tokens.clone(), self.dummy_hash.clone())
    }

    pub fn resolver(&self) -> AuthorizationResolver {
        AuthorizationResolver::new(self.users.clone(), self.user_roles.clone())
    }

    pub fn ledger(&self) -> RoleLedger {
        RoleLedger::new(self.users.clone(), self.roles.clone(), self.user_roles.clone())
    }
}

/// The three stores behind one backend
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub roles: Arc<dyn RoleStore>,
    pub user_roles: Arc<dyn UserRoleStore>,
}

impl Stores {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            users: Arc::new(Users::new(pool.clone())),
            roles: Arc::new(Roles::new(pool.clone())),
            user_roles: Arc::new(UserRoles::new(pool)),
        }
    }

    pub fn memory(store: MemoryStore) -> Self {
        Self {
            users: Arc::new(store.clone()),
            roles: Arc::new(store.clone()),
            user_roles: Arc::new(store),
        }
    }
}

/// Get the accessctl database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Create the initial administrator if it doesn't exist, and make sure it holds `ADMIN`.
///
/// Idempotent. An existing account gets its password reset when one is configured. Without a
/// configured password no new account is created, since it could never log in.
#[instrument(skip_all, fields(username = %config.admin_username))]
pub async fn create_initial_admin_user(config: &Config, stores: &Stores) -> anyhow::Result<Option<UserId>> {
    let params = config.auth.password.argon2_params();
    let password_hash = match config.admin_password.clone() {
        Some(pwd) => Some(password::hash_password_blocking(pwd, params).await?),
        None => None,
    };

    let user = match stores.users.get_user_by_username(&config.admin_username).await? {
        Some(existing) => {
            if let Some(password_hash) = password_hash {
                stores
                    .users
                    .update_user(
                        existing.id,
                        &UserUpdateDBRequest {
                            password_hash: Some(password_hash),
                            status: Some(UserStatus::Active),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
            existing
        }
        None => {
            let Some(password_hash) = password_hash else {
                warn!("No admin_password configured, skipping initial admin user creation");
                return Ok(None);
            };
            let created = stores
                .users
                .create_user(&UserCreateDBRequest {
                    username: config.admin_username.clone(),
                    email: config.admin_email.clone(),
                    phone: None,
                    full_name: None,
                    company_name: None,
                    password_hash,
                    status: UserStatus::Active,
                })
                .await?;
            info!(user_id = created.id, "Created initial admin user");
            created
        }
    };

    let admin_role = match stores.roles.get_role_by_name(ADMIN_ROLE).await? {
        Some(role) => role,
        None => {
            stores
                .roles
                .create_role(&RoleCreateDBRequest {
                    name: ADMIN_ROLE.to_string(),
                    description: Some("Full administrative access".to_string()),
                    is_active: true,
                })
                .await?
        }
    };

    let ledger = RoleLedger::new(stores.users.clone(), stores.roles.clone(), stores.user_roles.clone());
    match stores.user_roles.get_assignment_by_pair(user.id, admin_role.id).await? {
        Some(existing) if existing.is_effective(chrono::Utc::now()) => {}
        Some(existing) => {
            ledger.reactivate(existing.id).await?;
            ledger.clear_expiry(existing.id).await?;
        }
        None => {
            ledger
                .assign(
                    AssignRole::builder()
                        .user_id(user.id)
                        .role_id(admin_role.id)
                        .assigned_by("system")
                        .notes("Initial administrator")
                        .build(),
                )
                .await?;
        }
    }

    Ok(Some(user.id))
}

/// Connect the configured backend, run migrations and seed the initial administrator.
async fn setup_database(config: &Config) -> anyhow::Result<(Stores, Option<PgPool>)> {
    let (stores, pool) = match &config.database {
        DatabaseConfig::External { url, pool: settings } => {
            info!("Using external database");
            let pool = PgPoolOptions::new()
                .max_connections(settings.max_connections)
                .min_connections(settings.min_connections)
                .acquire_timeout(std::time::Duration::from_secs(settings.acquire_timeout_secs))
                .connect(url)
                .await?;
            migrator().run(&pool).await?;
            (Stores::postgres(pool.clone()), Some(pool))
        }
        DatabaseConfig::Memory => {
            info!("Using in-memory store: data will be lost on shutdown");
            (Stores::memory(MemoryStore::new()), None)
        }
    };

    create_initial_admin_user(config, &stores)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create initial admin user: {}", e))?;

    Ok((stores, pool))
}

/// Create CORS layer from configuration
///
/// A wildcard entry admits any origin; tower-http refuses `*` inside an explicit origin list.
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let allowed = &config.auth.security.cors.allowed_origins;
    let allow_origin = if allowed.iter().any(|origin| matches!(origin, CorsOrigin::Wildcard)) {
        if config.auth.security.cors.allow_credentials {
            anyhow::bail!("CORS wildcard origin cannot be combined with allow_credentials");
        }
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in allowed {
            if let CorsOrigin::Url(url) = origin {
                origins.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::PUT,
            http::Method::PATCH,
            http::Method::DELETE,
        ])
        .allow_headers([http::header::AUTHORIZATION, http::header::CONTENT_TYPE])
        .allow_credentials(config.auth.security.cors.allow_credentials)
        .expose_headers(vec![http::header::LOCATION]);

    if let Some(max_age) = config.auth.security.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router with all endpoints, tracing and CORS.
#[instrument(skip_all)]
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let auth_routes = Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/profile/me", get(handlers::auth::get_profile))
        .route("/profile/password", put(handlers::auth::change_password));

    let admin_routes = Router::new()
        .route("/admin/users", get(handlers::users::list_users))
        .route("/admin/users", post(handlers::users::create_user))
        .route("/admin/users/{id}", get(handlers::users::get_user))
        .route("/admin/users/{id}", put(handlers::users::update_user))
        .route("/admin/users/{id}", delete(handlers::users::delete_user))
        .route("/admin/users/{id}/status", patch(handlers::users::update_user_status))
        .route("/roles", get(handlers::roles::list_roles))
        .route("/roles", post(handlers::roles::create_role))
        .route("/roles/{id}", get(handlers::roles::get_role))
        .route("/roles/{id}", put(handlers::roles::update_role))
        .route("/roles/{id}", delete(handlers::roles::delete_role));

    let user_role_routes = Router::new()
        .route("/user-roles", post(handlers::user_roles::assign_role))
        .route("/user-roles/expired", get(handlers::user_roles::list_expired))
        .route("/user-roles/deactivate-expired", post(handlers::user_roles::deactivate_expired))
        .route("/user-roles/transfer", post(handlers::user_roles::transfer_roles))
        .route("/user-roles/expiring-soon", get(handlers::user_roles::list_expiring_soon))
        .route("/user-roles/stats", get(handlers::user_roles::assignment_stats))
        .route("/user-roles/assigned-by/{assigned_by}", get(handlers::user_roles::list_by_grantor))
        .route("/user-roles/{id}", get(handlers::user_roles::get_assignment))
        .route("/user-roles/{id}", put(handlers::user_roles::update_assignment))
        .route("/user-roles/{id}", delete(handlers::user_roles::delete_assignment))
        .route("/user-roles/{id}/reactivate", post(handlers::user_roles::reactivate_assignment))
        .route("/user-roles/{id}/deactivate", post(handlers::user_roles::deactivate_assignment))
        .route("/user-roles/{id}/expiry", put(handlers::user_roles::set_expiry))
        .route("/user-roles/{id}/expiry", delete(handlers::user_roles::clear_expiry))
        .route("/user-roles/users/{user_id}", get(handlers::user_roles::list_user_assignments))
        .route("/user-roles/users/{user_id}/roles", get(handlers::user_roles::get_effective_roles))
        .route(
            "/user-roles/users/{user_id}/roles/{role_id}",
            delete(handlers::user_roles::remove_user_role),
        )
        .route(
            "/user-roles/users/{user_id}/has-role/{role_name}",
            get(handlers::user_roles::check_user_role),
        )
        .route(
            "/user-roles/users/{user_id}/deactivate-all",
            post(handlers::user_roles::deactivate_all_for_user),
        )
        .route("/user-roles/users/{user_id}/count", get(handlers::user_roles::count_user_roles))
        .route("/user-roles/users/{user_id}/batch-assign", post(handlers::user_roles::batch_assign))
        .route("/user-roles/users/{user_id}/batch-remove", post(handlers::user_roles::batch_remove))
        .route("/user-roles/roles/{role_id}", get(handlers::user_roles::list_role_assignments))
        .route("/user-roles/roles/{role_id}/count", get(handlers::user_roles::count_role_users))
        .route(
            "/user-roles/roles/{role_id}/deactivate-all",
            post(handlers::user_roles::deactivate_all_for_role),
        );

    let cors_layer = create_cors_layer(&state.config)?;

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .nest("/api", auth_routes.merge(admin_routes).merge(user_role_routes))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer);

    Ok(router)
}

/// Tasks running alongside the HTTP server.
///
/// [`shutdown`](BackgroundServices::shutdown) stops them gracefully. When dropped, the
/// `drop_guard` cancels the shutdown token, signaling all tasks to stop.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: tokio_util::sync::CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<tokio_util::sync::DropGuard>,
}

impl BackgroundServices {
    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();

        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

/// Periodically deactivate lapsed assignments until cancelled.
async fn run_expiry_sweeper(ledger: RoleLedger, interval: std::time::Duration, shutdown: tokio_util::sync::CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Expiry sweeper stopped");
                return;
            }
            _ = ticker.tick() => {
                match ledger.deactivate_expired(chrono::Utc::now()).await {
                    Ok(count) => debug!(count, "Expiry sweep complete"),
                    Err(e) => error!("Expiry sweep failed: {}", e),
                }
            }
        }
    }
}

fn setup_background_services(state: &AppState, shutdown_token: tokio_util::sync::CancellationToken) -> BackgroundServices {
    let drop_guard = shutdown_token.clone().drop_guard();
    let mut background_tasks = Vec::new();

    let sweeper = &state.config.background_services.expiry_sweeper;
    if sweeper.enabled {
        info!(interval = ?sweeper.interval, "Starting expiry sweeper");
        let handle = tokio::spawn(run_expiry_sweeper(state.ledger(), sweeper.interval, shutdown_token.clone()));
        background_tasks.push(handle);
    }

    BackgroundServices {
        background_tasks,
        shutdown_token,
        drop_guard: Some(drop_guard),
    }
}

/// Main application struct that owns all resources and lifecycle.
///
/// 1. **Create**: [`Application::new`] connects storage, runs migrations, seeds the initial
///    administrator and starts background services
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and handles requests until the
///    shutdown future resolves
pub struct Application {
    router: Router,
    config: Config,
    pool: Option<PgPool>,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting accessctl with configuration: {:#?}", config);

        let (stores, pool) = setup_database(&config).await?;
        let tokens = TokenIssuer::from_config(&config)?;
        let dummy_hash = dummy_password_hash(config.auth.password.argon2_params()).await?;

        let app_state = AppState::builder()
            .config(config.clone())
            .users(stores.users)
            .roles(stores.roles)
            .user_roles(stores.user_roles)
            .tokens(tokens)
            .dummy_hash(dummy_hash)
            .build();

        let shutdown_token = tokio_util::sync::CancellationToken::new();
        let bg_services = setup_background_services(&app_state, shutdown_token);

        let router = build_router(app_state)?;

        Ok(Self {
            router,
            config,
            pool,
            bg_services,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(any(test, feature = "test-utils"))]
    pub fn into_test_server(self) -> (axum_test::TestServer, BackgroundServices) {
        let server = axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server");
        (server, self.bg_services)
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "accessctl listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        self.bg_services.shutdown().await;

        if let Some(pool) = self.pool {
            info!("Closing database connections...");
            pool.close().await;
        }

        Ok(())
    }
}
