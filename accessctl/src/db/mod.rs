//! Storage layer for data persistence and access.
//!
//! ```text
//! ┌──────────────────┐
//! │ auth / api layer │  (authenticator, resolver, ledger, HTTP handlers)
//! └────────┬─────────┘
//!          │  Arc<dyn UserStore>, Arc<dyn RoleStore>, Arc<dyn UserRoleStore>
//!          ↓
//! ┌──────────────────┐      ┌──────────────┐
//! │ handlers (sqlx)  │  or  │ memory store │
//! └────────┬─────────┘      └──────────────┘
//!          ↓
//! ┌──────────────────┐
//! │    PostgreSQL    │
//! └──────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`handlers`]: store traits and their PostgreSQL implementations
//! - [`memory`]: in-process implementation of the same traits
//! - [`models`]: storage record structures matching table schemas
//! - [`errors`]: storage error type
//!
//! Both backends report uniqueness conflicts as [`errors::DbError::UniqueViolation`] carrying
//! one of the constraint names in [`constraints`], so callers can match on them regardless of
//! backend.
//!
//! # Migrations
//!
//! Migrations live in the `migrations/` directory and are applied on startup through
//! [`crate::migrator`].

pub mod errors;
pub mod handlers;
pub mod memory;
pub mod models;

/// Names of the uniqueness constraints declared in `migrations/`.
pub mod constraints {
    pub const USERS_USERNAME: &str = "users_username_unique";
    pub const USERS_EMAIL: &str = "users_email_unique";
    pub const USERS_PHONE: &str = "users_phone_unique";
    pub const ROLES_NAME: &str = "roles_name_unique";
    pub const USER_ROLES_PAIR: &str = "user_roles_user_role_unique";
}
