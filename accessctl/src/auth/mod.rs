//! Authentication and authorization.
//!
//! # Authentication
//!
//! Principals log in with username and password at `/api/auth/login`. The [`authenticator`]
//! checks the account status and the Argon2 hash, then the [`session`] issuer mints an HS256
//! bearer token valid for a fixed period (24 hours by default). Tokens are not stored, so the
//! only way a token stops working before its expiry is a change of server secret.
//!
//! Every failed login produces the same 401 response. The real cause (unknown user, wrong
//! password, non-active account) is only logged.
//!
//! # Authorization
//!
//! Authorization is role based. Roles are granted through the assignment [`ledger`], where each
//! assignment carries an active flag and an optional expiry. An assignment is *effective* when it
//! is active and unexpired, and the [`resolver`] derives a principal's roles from its effective
//! assignments on every request. Nothing is cached per token, so granting or revoking a role
//! changes what an already-issued token can do on its next request.
//!
//! Handlers declare the role they need with [`current_user::RequiresRole`]:
//!
//! ```ignore
//! async fn list_roles(_: RequiresRole<role::Admin>, State(state): State<AppState>) -> Result<Json<Vec<RoleResponse>>> {
//!     // only principals effectively holding ADMIN get here
//! }
//! ```

pub mod authenticator;
pub mod current_user;
pub mod ledger;
pub mod password;
pub mod resolver;
pub mod session;

use crate::types::normalize_role_name;

/// Authority string for a role name, e.g. `admin` becomes `ROLE_ADMIN`.
pub fn authority(role_name: &str) -> String {
    format!("ROLE_{}", normalize_role_name(role_name))
}
