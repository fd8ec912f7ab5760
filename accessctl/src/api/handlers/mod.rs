//! Axum route handlers.
//!
//! - [`auth`]: login, registration, logout and the caller's own profile
//! - [`users`]: principal administration
//! - [`roles`]: role definitions
//! - [`user_roles`]: the role assignment ledger
//!
//! Handlers take [`crate::api::models::users::CurrentUser`] when any valid token will do, and
//! [`crate::auth::current_user::RequiresRole`] when a role is needed. Both reject before the
//! handler body runs.

pub mod auth;
pub mod roles;
pub mod user_roles;
pub mod users;
