//! Store traits and their PostgreSQL implementations.
//!
//! Each store owns a [`sqlx::PgPool`] and is shared behind an `Arc<dyn ...>` in
//! [`crate::AppState`]. Multi-row operations (such as transferring assignments) open their own
//! transaction.
//!
//! - [`Users`]: principals and credentials ([`UserStore`])
//! - [`Roles`]: role definitions ([`RoleStore`])
//! - [`UserRoles`]: the role assignment ledger ([`UserRoleStore`])

pub mod roles;
pub mod stores;
pub mod user_roles;
pub mod users;

pub use roles::Roles;
pub use stores::{RoleStore, UserRoleStore, UserStore};
pub use user_roles::UserRoles;
pub use users::Users;
