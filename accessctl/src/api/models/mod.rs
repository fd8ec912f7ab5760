//! API request and response data models.
//!
//! These are distinct from the storage models in [`crate::db::models`]: password hashes never
//! appear here, and JSON field names are camelCase.
//!
//! - [`auth`]: login, registration and password change
//! - [`users`]: principal profiles and the per-request [`users::CurrentUser`]
//! - [`roles`]: role definitions
//! - [`user_roles`]: role assignments, transfers and listing filters

pub mod auth;
pub mod roles;
pub mod user_roles;
pub mod users;
