//! In-process implementation of the store traits.
//!
//! All three stores share one [`tokio::sync::RwLock`], so every mutation (including a transfer)
//! is serialized and observes a consistent view of users, roles and assignments. Uniqueness and
//! referential rules mirror the constraints declared in `migrations/` and are reported with the
//! same [`DbError`] variants and constraint names as the PostgreSQL backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::db::{
    constraints,
    errors::{DbError, Result},
    handlers::stores::{RoleStore, UserRoleStore, UserStore},
    models::{
        roles::{RoleCreateDBRequest, RoleDBResponse, RoleUpdateDBRequest},
        user_roles::{AssignmentStats, TransferOutcome, UserRoleCreateDBRequest, UserRoleDBResponse, UserRoleUpdateDBRequest},
        users::{UserCreateDBRequest, UserDBResponse, UserUpdateDBRequest},
    },
};
use crate::types::{RoleId, UserId, UserRoleId};

#[derive(Debug, Default)]
struct MemoryState {
    users: BTreeMap<UserId, UserDBResponse>,
    roles: BTreeMap<RoleId, RoleDBResponse>,
    user_roles: BTreeMap<UserRoleId, UserRoleDBResponse>,
    last_user_id: UserId,
    last_role_id: RoleId,
    last_user_role_id: UserRoleId,
}

fn unique_violation(table: &str, constraint: &str) -> DbError {
    DbError::UniqueViolation {
        constraint: Some(constraint.to_string()),
        table: Some(table.to_string()),
        message: format!("duplicate key value violates unique constraint \"{constraint}\""),
    }
}

fn foreign_key_violation(constraint: &str) -> DbError {
    DbError::ForeignKeyViolation {
        constraint: Some(constraint.to_string()),
        table: Some("user_roles".to_string()),
        message: format!("insert on table \"user_roles\" violates foreign key constraint \"{constraint}\""),
    }
}

fn newest_first(a: &UserRoleDBResponse, b: &UserRoleDBResponse) -> std::cmp::Ordering {
    b.assigned_at.cmp(&a.assigned_at).then(b.id.cmp(&a.id))
}

impl MemoryState {
    fn check_user_unique(&self, id: Option<UserId>, username: Option<&str>, email: Option<&str>, phone: Option<&str>) -> Result<()> {
        for user in self.users.values().filter(|u| Some(u.id) != id) {
            if username.is_some_and(|v| v == user.username) {
                return Err(unique_violation("users", constraints::USERS_USERNAME));
            }
            if email.is_some_and(|v| v == user.email) {
                return Err(unique_violation("users", constraints::USERS_EMAIL));
            }
            if phone.is_some() && phone == user.phone.as_deref() {
                return Err(unique_violation("users", constraints::USERS_PHONE));
            }
        }
        Ok(())
    }

    fn check_role_unique(&self, id: Option<RoleId>, name: &str) -> Result<()> {
        let lowered = name.to_lowercase();
        if self
            .roles
            .values()
            .any(|r| Some(r.id) != id && r.name.to_lowercase() == lowered)
        {
            return Err(unique_violation("roles", constraints::ROLES_NAME));
        }
        Ok(())
    }

    fn insert_assignment(&mut self, request: &UserRoleCreateDBRequest, now: DateTime<Utc>) -> Result<UserRoleDBResponse> {
        if !self.users.contains_key(&request.user_id) {
            return Err(foreign_key_violation("user_roles_user_id_fkey"));
        }
        if !self.roles.contains_key(&request.role_id) {
            return Err(foreign_key_violation("user_roles_role_id_fkey"));
        }
        if self
            .user_roles
            .values()
            .any(|a| a.user_id == request.user_id && a.role_id == request.role_id)
        {
            return Err(unique_violation("user_roles", constraints::USER_ROLES_PAIR));
        }

        self.last_user_role_id += 1;
        let assignment = UserRoleDBResponse {
            id: self.last_user_role_id,
            user_id: request.user_id,
            role_id: request.role_id,
            assigned_by: request.assigned_by.clone(),
            is_active: request.is_active,
            assigned_at: now,
            updated_at: now,
            expires_at: request.expires_at,
            notes: request.notes.clone(),
        };
        self.user_roles.insert(assignment.id, assignment.clone());
        Ok(assignment)
    }

    fn deactivate_where(&mut self, predicate: impl Fn(&UserRoleDBResponse) -> bool) -> u64 {
        let now = Utc::now();
        let mut changed = 0;
        for assignment in self.user_roles.values_mut().filter(|a| a.is_active && predicate(a)) {
            assignment.is_active = false;
            assignment.updated_at = now;
            changed += 1;
        }
        changed
    }
}

/// Shared in-memory backend. Cloning yields another handle to the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        let mut state = self.state.write().await;
        state.check_user_unique(
            None,
            Some(&request.username),
            Some(&request.email),
            request.phone.as_deref(),
        )?;

        let now = Utc::now();
        state.last_user_id += 1;
        let user = UserDBResponse {
            id: state.last_user_id,
            username: request.username.clone(),
            email: request.email.clone(),
            phone: request.phone.clone(),
            full_name: request.full_name.clone(),
            company_name: request.company_name.clone(),
            password_hash: request.password_hash.clone(),
            status: request.status,
            created_at: now,
            updated_at: now,
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: UserId) -> Result<Option<UserDBResponse>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserDBResponse>> {
        let state = self.state.read().await;
        Ok(state.users.values().find(|u| u.username == username).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserDBResponse>> {
        let state = self.state.read().await;
        Ok(state.users.values().find(|u| u.email == email).cloned())
    }

    async fn list_users(&self) -> Result<Vec<UserDBResponse>> {
        Ok(self.state.read().await.users.values().cloned().collect())
    }

    async fn update_user(&self, id: UserId, request: &UserUpdateDBRequest) -> Result<UserDBResponse> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(&id) {
            return Err(DbError::NotFound);
        }
        state.check_user_unique(Some(id), None, request.email.as_deref(), request.phone.as_deref())?;

        let user = state.users.get_mut(&id).ok_or(DbError::NotFound)?;
        if let Some(email) = &request.email {
            user.email = email.clone();
        }
        if let Some(phone) = &request.phone {
            user.phone = Some(phone.clone());
        }
        if let Some(full_name) = &request.full_name {
            user.full_name = Some(full_name.clone());
        }
        if let Some(company_name) = &request.company_name {
            user.company_name = Some(company_name.clone());
        }
        if let Some(password_hash) = &request.password_hash {
            user.password_hash = password_hash.clone();
        }
        if let Some(status) = request.status {
            user.status = status;
        }
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn delete_user(&self, id: UserId) -> Result<bool> {
        let mut state = self.state.write().await;
        let removed = state.users.remove(&id).is_some();
        if removed {
            // ON DELETE CASCADE
            state.user_roles.retain(|_, a| a.user_id != id);
        }
        Ok(removed)
    }
}

#[async_trait::async_trait]
impl RoleStore for MemoryStore {
    async fn create_role(&self, request: &RoleCreateDBRequest) -> Result<RoleDBResponse> {
        let mut state = self.state.write().await;
        state.check_role_unique(None, &request.name)?;

        let now = Utc::now();
        state.last_role_id += 1;
        let role = RoleDBResponse {
            id: state.last_role_id,
            name: request.name.clone(),
            description: request.description.clone(),
            is_active: request.is_active,
            created_at: now,
            updated_at: now,
        };
        state.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn get_role(&self, id: RoleId) -> Result<Option<RoleDBResponse>> {
        Ok(self.state.read().await.roles.get(&id).cloned())
    }

    async fn get_role_by_name(&self, name: &str) -> Result<Option<RoleDBResponse>> {
        let lowered = name.to_lowercase();
        let state = self.state.read().await;
        Ok(state.roles.values().find(|r| r.name.to_lowercase() == lowered).cloned())
    }

    async fn list_roles(&self) -> Result<Vec<RoleDBResponse>> {
        let mut roles: Vec<_> = self.state.read().await.roles.values().cloned().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn update_role(&self, id: RoleId, request: &RoleUpdateDBRequest) -> Result<RoleDBResponse> {
        let mut state = self.state.write().await;
        if !state.roles.contains_key(&id) {
            return Err(DbError::NotFound);
        }
        if let Some(name) = &request.name {
            state.check_role_unique(Some(id), name)?;
        }

        let role = state.roles.get_mut(&id).ok_or(DbError::NotFound)?;
        if let Some(name) = &request.name {
            role.name = name.clone();
        }
        if let Some(description) = &request.description {
            role.description = Some(description.clone());
        }
        if let Some(is_active) = request.is_active {
            role.is_active = is_active;
        }
        role.updated_at = Utc::now();
        Ok(role.clone())
    }

    async fn delete_role(&self, id: RoleId) -> Result<bool> {
        let mut state = self.state.write().await;
        let assignments = state.user_roles.values().filter(|a| a.role_id == id).count();
        if assignments > 0 {
            return Err(DbError::ProtectedEntity {
                operation: "deleted",
                reason: format!("{assignments} assignment(s) still reference it"),
                entity_type: "role",
                entity_id: id.to_string(),
            });
        }
        Ok(state.roles.remove(&id).is_some())
    }
}

#[async_trait::async_trait]
impl UserRoleStore for MemoryStore {
    async fn create_assignment(&self, request: &UserRoleCreateDBRequest) -> Result<UserRoleDBResponse> {
        self.state.write().await.insert_assignment(request, Utc::now())
    }

    async fn get_assignment(&self, id: UserRoleId) -> Result<Option<UserRoleDBResponse>> {
        Ok(self.state.read().await.user_roles.get(&id).cloned())
    }

    async fn get_assignment_by_pair(&self, user_id: UserId, role_id: RoleId) -> Result<Option<UserRoleDBResponse>> {
        let state = self.state.read().await;
        Ok(state
            .user_roles
            .values()
            .find(|a| a.user_id == user_id && a.role_id == role_id)
            .cloned())
    }

    async fn update_assignment(&self, id: UserRoleId, request: &UserRoleUpdateDBRequest) -> Result<UserRoleDBResponse> {
        let mut state = self.state.write().await;
        let assignment = state.user_roles.get_mut(&id).ok_or(DbError::NotFound)?;
        if let Some(assigned_by) = &request.assigned_by {
            assignment.assigned_by = assigned_by.clone();
        }
        if let Some(is_active) = request.is_active {
            assignment.is_active = is_active;
        }
        if let Some(expires_at) = request.expires_at {
            assignment.expires_at = expires_at;
        }
        if let Some(notes) = &request.notes {
            assignment.notes = Some(notes.clone());
        }
        assignment.updated_at = Utc::now();
        Ok(assignment.clone())
    }

    async fn delete_assignment(&self, id: UserRoleId) -> Result<bool> {
        Ok(self.state.write().await.user_roles.remove(&id).is_some())
    }

    async fn delete_assignment_by_pair(&self, user_id: UserId, role_id: RoleId) -> Result<bool> {
        let mut state = self.state.write().await;
        let before = state.user_roles.len();
        state.user_roles.retain(|_, a| !(a.user_id == user_id && a.role_id == role_id));
        Ok(state.user_roles.len() < before)
    }

    async fn list_assignments_by_user(&self, user_id: UserId) -> Result<Vec<UserRoleDBResponse>> {
        let state = self.state.read().await;
        let mut assignments: Vec<_> = state.user_roles.values().filter(|a| a.user_id == user_id).cloned().collect();
        assignments.sort_by(newest_first);
        Ok(assignments)
    }

    async fn list_assignments_by_role(&self, role_id: RoleId) -> Result<Vec<UserRoleDBResponse>> {
        let state = self.state.read().await;
        let mut assignments: Vec<_> = state.user_roles.values().filter(|a| a.role_id == role_id).cloned().collect();
        assignments.sort_by(newest_first);
        Ok(assignments)
    }

    async fn list_expired_assignments(&self, now: DateTime<Utc>) -> Result<Vec<UserRoleDBResponse>> {
        let state = self.state.read().await;
        let mut assignments: Vec<_> = state.user_roles.values().filter(|a| a.is_expired(now)).cloned().collect();
        assignments.sort_by(|a, b| a.expires_at.cmp(&b.expires_at).then(a.id.cmp(&b.id)));
        Ok(assignments)
    }

    async fn list_assignments_expiring_between(&self, from: DateTime<Utc>, until: DateTime<Utc>) -> Result<Vec<UserRoleDBResponse>> {
        let state = self.state.read().await;
        let mut assignments: Vec<_> = state
            .user_roles
            .values()
            .filter(|a| a.is_active && a.expires_at.is_some_and(|at| at > from && at <= until))
            .cloned()
            .collect();
        assignments.sort_by(|a, b| a.expires_at.cmp(&b.expires_at).then(a.id.cmp(&b.id)));
        Ok(assignments)
    }

    async fn list_assignments_by_grantor(&self, assigned_by: &str) -> Result<Vec<UserRoleDBResponse>> {
        let state = self.state.read().await;
        let mut assignments: Vec<_> = state
            .user_roles
            .values()
            .filter(|a| a.assigned_by == assigned_by)
            .cloned()
            .collect();
        assignments.sort_by(newest_first);
        Ok(assignments)
    }

    async fn count_effective_by_user(&self, user_id: UserId, now: DateTime<Utc>) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state
            .user_roles
            .values()
            .filter(|a| a.user_id == user_id && a.is_effective(now))
            .count() as u64)
    }

    async fn count_effective_by_role(&self, role_id: RoleId, now: DateTime<Utc>) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state
            .user_roles
            .values()
            .filter(|a| a.role_id == role_id && a.is_effective(now))
            .count() as u64)
    }

    async fn assignment_stats(&self, now: DateTime<Utc>) -> Result<AssignmentStats> {
        let state = self.state.read().await;
        let mut stats = AssignmentStats::default();
        for assignment in state.user_roles.values() {
            stats.total += 1;
            if assignment.is_active {
                stats.active += 1;
            } else {
                stats.inactive += 1;
            }
            if assignment.is_expired(now) {
                stats.expired += 1;
            }
            if assignment.is_effective(now) {
                stats.effective += 1;
            }
        }
        Ok(stats)
    }

    async fn effective_role_names(&self, user_id: UserId, now: DateTime<Utc>) -> Result<Vec<String>> {
        let state = self.state.read().await;
        let mut names: Vec<String> = state
            .user_roles
            .values()
            .filter(|a| a.user_id == user_id && a.is_effective(now))
            .filter_map(|a| state.roles.get(&a.role_id))
            .map(|r| r.name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        Ok(self.state.write().await.deactivate_where(|a| a.is_expired(now)))
    }

    async fn deactivate_all_for_user(&self, user_id: UserId) -> Result<u64> {
        Ok(self.state.write().await.deactivate_where(|a| a.user_id == user_id))
    }

    async fn deactivate_all_for_role(&self, role_id: RoleId) -> Result<u64> {
        Ok(self.state.write().await.deactivate_where(|a| a.role_id == role_id))
    }

    async fn assign_many(&self, user_id: UserId, role_ids: &[RoleId], grantor: &str) -> Result<Vec<UserRoleDBResponse>> {
        let mut state = self.state.write().await;
        // Check references up front so a bad id leaves nothing behind
        if !state.users.contains_key(&user_id) {
            return Err(foreign_key_violation("user_roles_user_id_fkey"));
        }
        if role_ids.iter().any(|id| !state.roles.contains_key(id)) {
            return Err(foreign_key_violation("user_roles_role_id_fkey"));
        }

        let now = Utc::now();
        let mut created = Vec::new();
        for &role_id in role_ids {
            let exists = state.user_roles.values().any(|a| a.user_id == user_id && a.role_id == role_id);
            if exists {
                continue;
            }
            created.push(state.insert_assignment(
                &UserRoleCreateDBRequest {
                    user_id,
                    role_id,
                    assigned_by: grantor.to_string(),
                    is_active: true,
                    expires_at: None,
                    notes: None,
                },
                now,
            )?);
        }
        Ok(created)
    }

    async fn delete_assignments_by_roles(&self, user_id: UserId, role_ids: &[RoleId]) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.user_roles.len();
        state
            .user_roles
            .retain(|_, a| !(a.user_id == user_id && role_ids.contains(&a.role_id)));
        Ok((before - state.user_roles.len()) as u64)
    }

    async fn transfer_assignments(&self, from: UserId, to: UserId, grantor: &str, now: DateTime<Utc>) -> Result<TransferOutcome> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(&to) {
            return Err(foreign_key_violation("user_roles_user_id_fkey"));
        }

        let source: Vec<UserRoleId> = state
            .user_roles
            .values()
            .filter(|a| a.user_id == from && a.is_effective(now))
            .map(|a| a.id)
            .collect();

        let notes = format!("Transferred from user {from}");
        let mut outcome = TransferOutcome::default();

        for id in source {
            let Some(assignment) = state.user_roles.get_mut(&id) else {
                continue;
            };
            assignment.is_active = false;
            assignment.updated_at = now;
            let role_id = assignment.role_id;
            outcome.deactivated += 1;

            let target_has_row = state.user_roles.values().any(|a| a.user_id == to && a.role_id == role_id);
            if target_has_row {
                outcome.skipped += 1;
                continue;
            }

            state.insert_assignment(
                &UserRoleCreateDBRequest {
                    user_id: to,
                    role_id,
                    assigned_by: grantor.to_string(),
                    is_active: true,
                    expires_at: None,
                    notes: Some(notes.clone()),
                },
                now,
            )?;
            outcome.created += 1;
        }

        Ok(outcome)
    }
}
