//! HTTP layer: axum handlers and their request/response models.
//!
//! - **Authentication** (`/api/auth/*`): login, registration, logout
//! - **Profile** (`/api/profile/*`): the calling principal and password change
//! - **Users** (`/api/admin/users/*`): principal administration, administrators only
//! - **Roles** (`/api/roles/*`): role definitions, administrators only
//! - **Assignments** (`/api/user-roles/*`): the role assignment ledger, administrators only

pub mod handlers;
pub mod models;
