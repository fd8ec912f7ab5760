//! Derivation of a principal's effective roles.
//!
//! Roles are read from the ledger on every call. Nothing is cached per principal or per token,
//! so a grant or revocation is visible to the very next request.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::instrument;

use crate::{
    api::models::users::CurrentUser,
    db::handlers::{UserRoleStore, UserStore},
    errors::Error,
    types::{RoleId, UserId, normalize_role_name},
};

#[derive(Clone)]
pub struct AuthorizationResolver {
    users: Arc<dyn UserStore>,
    user_roles: Arc<dyn UserRoleStore>,
}

impl AuthorizationResolver {
    pub fn new(users: Arc<dyn UserStore>, user_roles: Arc<dyn UserRoleStore>) -> Self {
        Self { users, user_roles }
    }

    /// Upper-cased names of roles held through assignments that are active and unexpired.
    /// Empty for a principal with no assignments.
    pub async fn effective_roles(&self, id: UserId) -> Result<BTreeSet<String>, Error> {
        self.effective_roles_at(id, Utc::now()).await
    }

    #[instrument(skip(self), err)]
    pub async fn effective_roles_at(&self, id: UserId, now: DateTime<Utc>) -> Result<BTreeSet<String>, Error> {
        let names = self.user_roles.effective_role_names(id, now).await?;
        Ok(names.iter().map(|n| normalize_role_name(n)).collect())
    }

    /// Case-insensitive check for an effectively held role
    pub async fn has_role(&self, id: UserId, role_name: &str) -> Result<bool, Error> {
        Ok(self.effective_roles(id).await?.contains(&normalize_role_name(role_name)))
    }

    /// Whether the principal's assignment of this role exists and is in effect
    #[instrument(skip(self), err)]
    pub async fn has_active_role(&self, id: UserId, role_id: RoleId) -> Result<bool, Error> {
        let assignment = self.user_roles.get_assignment_by_pair(id, role_id).await?;
        Ok(assignment.is_some_and(|a| a.is_effective(Utc::now())))
    }

    /// Load the principal and its effective roles. `None` if the principal no longer exists.
    #[instrument(skip(self), err)]
    pub async fn resolve(&self, id: UserId) -> Result<Option<CurrentUser>, Error> {
        let Some(user) = self.users.get_user(id).await? else {
            return Ok(None);
        };
        let roles = self.effective_roles(id).await?;

        Ok(Some(CurrentUser {
            id: user.id,
            username: user.username,
            email: user.email,
            status: user.status,
            roles,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        handlers::UserRoleStore,
        memory::MemoryStore,
        models::{user_roles::UserRoleCreateDBRequest, users::UserStatus},
    };
    use crate::test_utils::{seed_role, seed_user};
    use chrono::Duration;

    fn resolver(store: &MemoryStore) -> AuthorizationResolver {
        AuthorizationResolver::new(Arc::new(store.clone()), Arc::new(store.clone()))
    }

    fn grant(user_id: UserId, role_id: RoleId, is_active: bool, expires_at: Option<DateTime<Utc>>) -> UserRoleCreateDBRequest {
        UserRoleCreateDBRequest {
            user_id,
            role_id,
            assigned_by: "root".to_string(),
            is_active,
            expires_at,
            notes: None,
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_no_assignments_means_no_roles() {
        let store = MemoryStore::new();
        let alice = seed_user(&store, "alice", "Secret123", UserStatus::Active).await;

        assert!(resolver(&store).effective_roles(alice.id).await.unwrap().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_expired_and_inactive_assignments_excluded() {
        let store = MemoryStore::new();
        let alice = seed_user(&store, "alice", "Secret123", UserStatus::Active).await;
        let expired = seed_role(&store, "EXPIRED").await;
        let disabled = seed_role(&store, "DISABLED").await;
        let current = seed_role(&store, "current").await;
        let future = seed_role(&store, "FUTURE").await;
        let now = Utc::now();

        store
            .create_assignment(&grant(alice.id, expired.id, true, Some(now - Duration::minutes(1))))
            .await
            .unwrap();
        store.create_assignment(&grant(alice.id, disabled.id, false, None)).await.unwrap();
        store.create_assignment(&grant(alice.id, current.id, true, None)).await.unwrap();
        store
            .create_assignment(&grant(alice.id, future.id, true, Some(now + Duration::days(1))))
            .await
            .unwrap();

        let roles = resolver(&store).effective_roles_at(alice.id, now).await.unwrap();
        assert_eq!(roles, ["CURRENT".to_string(), "FUTURE".to_string()].into_iter().collect());
    }

    #[test_log::test(tokio::test)]
    async fn test_has_role_is_case_insensitive() {
        let store = MemoryStore::new();
        let alice = seed_user(&store, "alice", "Secret123", UserStatus::Active).await;
        let admin = seed_role(&store, "ADMIN").await;
        store.create_assignment(&grant(alice.id, admin.id, true, None)).await.unwrap();

        let resolver = resolver(&store);
        assert!(resolver.has_role(alice.id, "admin").await.unwrap());
        assert!(resolver.has_role(alice.id, "Admin").await.unwrap());
        assert!(!resolver.has_role(alice.id, "AUDITOR").await.unwrap());
        assert!(resolver.has_active_role(alice.id, admin.id).await.unwrap());
    }

    #[test_log::test(tokio::test)]
    async fn test_inactive_role_definition_does_not_revoke() {
        use crate::db::{handlers::RoleStore, models::roles::RoleUpdateDBRequest};

        let store = MemoryStore::new();
        let alice = seed_user(&store, "alice", "Secret123", UserStatus::Active).await;
        let admin = seed_role(&store, "ADMIN").await;
        store.create_assignment(&grant(alice.id, admin.id, true, None)).await.unwrap();
        store
            .update_role(
                admin.id,
                &RoleUpdateDBRequest {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(resolver(&store).has_role(alice.id, "ADMIN").await.unwrap());
    }

    #[test_log::test(tokio::test)]
    async fn test_resolve_reflects_changes_immediately() {
        let store = MemoryStore::new();
        let alice = seed_user(&store, "alice", "Secret123", UserStatus::Active).await;
        let admin = seed_role(&store, "ADMIN").await;
        let resolver = resolver(&store);

        let before = resolver.resolve(alice.id).await.unwrap().unwrap();
        assert!(!before.has_role("ADMIN"));

        let row = store.create_assignment(&grant(alice.id, admin.id, true, None)).await.unwrap();
        assert!(resolver.resolve(alice.id).await.unwrap().unwrap().has_role("ADMIN"));

        store.delete_assignment(row.id).await.unwrap();
        assert!(!resolver.resolve(alice.id).await.unwrap().unwrap().has_role("ADMIN"));

        assert!(resolver.resolve(9999).await.unwrap().is_none());
    }
}
