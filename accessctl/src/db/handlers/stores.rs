//! Storage traits shared by the PostgreSQL and in-memory backends.

use chrono::{DateTime, Utc};

use crate::db::{
    errors::Result,
    models::{
        roles::{RoleCreateDBRequest, RoleDBResponse, RoleUpdateDBRequest},
        user_roles::{AssignmentStats, TransferOutcome, UserRoleCreateDBRequest, UserRoleDBResponse, UserRoleUpdateDBRequest},
        users::{UserCreateDBRequest, UserDBResponse, UserUpdateDBRequest},
    },
};
use crate::types::{RoleId, UserId, UserRoleId};

/// Persisted principals. Username, email and phone are unique.
#[async_trait::async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse>;

    async fn get_user(&self, id: UserId) -> Result<Option<UserDBResponse>>;

    /// Exact, case-sensitive match
    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserDBResponse>>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserDBResponse>>;

    /// All users ordered by id
    async fn list_users(&self) -> Result<Vec<UserDBResponse>>;

    /// Fails with `DbError::NotFound` if the user does not exist
    async fn update_user(&self, id: UserId, request: &UserUpdateDBRequest) -> Result<UserDBResponse>;

    /// Deletes the user and, by cascade, its assignments
    async fn delete_user(&self, id: UserId) -> Result<bool>;
}

/// Role definitions. Names are unique ignoring case.
#[async_trait::async_trait]
pub trait RoleStore: Send + Sync {
    async fn create_role(&self, request: &RoleCreateDBRequest) -> Result<RoleDBResponse>;

    async fn get_role(&self, id: RoleId) -> Result<Option<RoleDBResponse>>;

    /// Case-insensitive match
    async fn get_role_by_name(&self, name: &str) -> Result<Option<RoleDBResponse>>;

    /// All roles ordered by name
    async fn list_roles(&self) -> Result<Vec<RoleDBResponse>>;

    async fn update_role(&self, id: RoleId, request: &RoleUpdateDBRequest) -> Result<RoleDBResponse>;

    /// Fails with `DbError::ProtectedEntity` while any assignment references the role
    async fn delete_role(&self, id: RoleId) -> Result<bool>;
}

/// The role assignment ledger. At most one row exists per `(user_id, role_id)`.
#[async_trait::async_trait]
pub trait UserRoleStore: Send + Sync {
    /// Fails with a unique violation on [`crate::db::constraints::USER_ROLES_PAIR`] if the pair
    /// exists, and a foreign key violation if the user or role does not.
    async fn create_assignment(&self, request: &UserRoleCreateDBRequest) -> Result<UserRoleDBResponse>;

    async fn get_assignment(&self, id: UserRoleId) -> Result<Option<UserRoleDBResponse>>;

    async fn get_assignment_by_pair(&self, user_id: UserId, role_id: RoleId) -> Result<Option<UserRoleDBResponse>>;

    async fn update_assignment(&self, id: UserRoleId, request: &UserRoleUpdateDBRequest) -> Result<UserRoleDBResponse>;

    async fn delete_assignment(&self, id: UserRoleId) -> Result<bool>;

    async fn delete_assignment_by_pair(&self, user_id: UserId, role_id: RoleId) -> Result<bool>;

    /// Full history for a user, newest first
    async fn list_assignments_by_user(&self, user_id: UserId) -> Result<Vec<UserRoleDBResponse>>;

    /// All rows for a role, newest first
    async fn list_assignments_by_role(&self, role_id: RoleId) -> Result<Vec<UserRoleDBResponse>>;

    /// Rows whose expiry is at or before `now`, regardless of the active flag
    async fn list_expired_assignments(&self, now: DateTime<Utc>) -> Result<Vec<UserRoleDBResponse>>;

    /// Active rows whose expiry falls in `(from, until]`, soonest first
    async fn list_assignments_expiring_between(&self, from: DateTime<Utc>, until: DateTime<Utc>) -> Result<Vec<UserRoleDBResponse>>;

    /// Rows granted by `assigned_by` (exact match), newest first
    async fn list_assignments_by_grantor(&self, assigned_by: &str) -> Result<Vec<UserRoleDBResponse>>;

    async fn count_effective_by_user(&self, user_id: UserId, now: DateTime<Utc>) -> Result<u64>;

    async fn count_effective_by_role(&self, role_id: RoleId, now: DateTime<Utc>) -> Result<u64>;

    async fn assignment_stats(&self, now: DateTime<Utc>) -> Result<AssignmentStats>;

    /// Names of roles held through effective assignments, as stored
    async fn effective_role_names(&self, user_id: UserId, now: DateTime<Utc>) -> Result<Vec<String>>;

    /// Deactivates active rows with an expiry at or before `now`. Returns the number changed.
    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<u64>;

    async fn deactivate_all_for_user(&self, user_id: UserId) -> Result<u64>;

    async fn deactivate_all_for_role(&self, role_id: RoleId) -> Result<u64>;

    /// Atomically grants every role in `role_ids` the user has no row for yet, active and
    /// without expiry. Returns the rows created. Unknown roles fail the whole batch.
    async fn assign_many(&self, user_id: UserId, role_ids: &[RoleId], grantor: &str) -> Result<Vec<UserRoleDBResponse>>;

    /// Deletes the user's rows for the given roles. Returns the number removed.
    async fn delete_assignments_by_roles(&self, user_id: UserId, role_ids: &[RoleId]) -> Result<u64>;

    /// Atomically deactivates every effective assignment of `from` and grants the same roles to
    /// `to`, skipping roles `to` already has a row for.
    async fn transfer_assignments(&self, from: UserId, to: UserId, grantor: &str, now: DateTime<Utc>) -> Result<TransferOutcome>;
}
