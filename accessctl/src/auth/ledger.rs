//! The role assignment ledger: granting, revoking and transferring roles.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, instrument};

use crate::{
    db::{
        constraints,
        errors::DbError,
        handlers::{RoleStore, UserRoleStore, UserStore},
        models::user_roles::{AssignmentStats, TransferOutcome, UserRoleCreateDBRequest, UserRoleDBResponse, UserRoleUpdateDBRequest},
    },
    errors::Error,
    types::{RoleId, UserId, UserRoleId},
};

/// Longest accepted assignment note
pub const MAX_NOTES_LENGTH: usize = 500;

/// A request to grant a role to a principal.
#[derive(Debug, Clone, bon::Builder)]
pub struct AssignRole {
    pub user_id: UserId,
    pub role_id: RoleId,
    #[builder(into)]
    pub assigned_by: String,
    #[builder(default = true)]
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    #[builder(into)]
    pub notes: Option<String>,
}

/// Partial update of an assignment. `expires_at: Some(None)` clears the expiry.
#[derive(Debug, Clone, Default)]
pub struct AssignmentChanges {
    pub assigned_by: Option<String>,
    pub is_active: Option<bool>,
    pub expires_at: Option<Option<DateTime<Utc>>>,
    pub notes: Option<String>,
}

#[derive(Clone)]
pub struct RoleLedger {
    users: Arc<dyn UserStore>,
    roles: Arc<dyn RoleStore>,
    user_roles: Arc<dyn UserRoleStore>,
}

fn validate_notes(notes: Option<&str>) -> Result<(), Error> {
    if notes.is_some_and(|n| n.chars().count() > MAX_NOTES_LENGTH) {
        return Err(Error::BadRequest {
            message: format!("Notes must be at most {MAX_NOTES_LENGTH} characters"),
        });
    }
    Ok(())
}

fn validate_grantor(assigned_by: &str) -> Result<(), Error> {
    if assigned_by.trim().is_empty() {
        return Err(Error::BadRequest {
            message: "assignedBy must not be blank".to_string(),
        });
    }
    Ok(())
}

impl RoleLedger {
    pub fn new(users: Arc<dyn UserStore>, roles: Arc<dyn RoleStore>, user_roles: Arc<dyn UserRoleStore>) -> Self {
        Self { users, roles, user_roles }
    }

    async fn require_user(&self, id: UserId) -> Result<(), Error> {
        match self.users.get_user(id).await? {
            Some(_) => Ok(()),
            None => Err(Error::not_found("User", id)),
        }
    }

    async fn require_role(&self, id: RoleId) -> Result<(), Error> {
        match self.roles.get_role(id).await? {
            Some(_) => Ok(()),
            None => Err(Error::not_found("Role", id)),
        }
    }

    /// Grant a role. Fails with [`Error::DuplicateAssignment`] if the principal already has a row
    /// for the role, active or not.
    #[instrument(skip(self, request), fields(user_id = request.user_id, role_id = request.role_id), err)]
    pub async fn assign(&self, request: AssignRole) -> Result<UserRoleDBResponse, Error> {
        validate_grantor(&request.assigned_by)?;
        validate_notes(request.notes.as_deref())?;
        self.require_user(request.user_id).await?;
        self.require_role(request.role_id).await?;

        if self
            .user_roles
            .get_assignment_by_pair(request.user_id, request.role_id)
            .await?
            .is_some()
        {
            return Err(Error::DuplicateAssignment {
                user_id: request.user_id,
                role_id: request.role_id,
            });
        }

        let created = self
            .user_roles
            .create_assignment(&UserRoleCreateDBRequest {
                user_id: request.user_id,
                role_id: request.role_id,
                assigned_by: request.assigned_by,
                is_active: request.is_active,
                expires_at: request.expires_at,
                notes: request.notes,
            })
            .await
            .map_err(|e| match e {
                // Lost a race with a concurrent grant of the same pair
                e if e.is_unique_violation_on(constraints::USER_ROLES_PAIR) => Error::DuplicateAssignment {
                    user_id: request.user_id,
                    role_id: request.role_id,
                },
                e => Error::Database(e),
            })?;

        info!(assignment_id = created.id, assigned_by = %created.assigned_by, "Role assigned");
        Ok(created)
    }

    pub async fn get(&self, id: UserRoleId) -> Result<UserRoleDBResponse, Error> {
        self.user_roles
            .get_assignment(id)
            .await?
            .ok_or_else(|| Error::not_found("UserRole", id))
    }

    #[instrument(skip(self, changes), err)]
    pub async fn update(&self, id: UserRoleId, changes: AssignmentChanges) -> Result<UserRoleDBResponse, Error> {
        if let Some(assigned_by) = &changes.assigned_by {
            validate_grantor(assigned_by)?;
        }
        validate_notes(changes.notes.as_deref())?;

        let request = UserRoleUpdateDBRequest {
            assigned_by: changes.assigned_by,
            is_active: changes.is_active,
            expires_at: changes.expires_at,
            notes: changes.notes,
        };

        self.user_roles.update_assignment(id, &request).await.map_err(|e| match e {
            DbError::NotFound => Error::not_found("UserRole", id),
            e => Error::Database(e),
        })
    }

    /// Set the active flag. Expiry is left alone, so reactivating a lapsed assignment does not
    /// make it effective until its expiry is cleared or extended.
    pub async fn reactivate(&self, id: UserRoleId) -> Result<UserRoleDBResponse, Error> {
        self.update(
            id,
            AssignmentChanges {
                is_active: Some(true),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn deactivate(&self, id: UserRoleId) -> Result<UserRoleDBResponse, Error> {
        self.update(
            id,
            AssignmentChanges {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn set_expiry(&self, id: UserRoleId, expires_at: DateTime<Utc>) -> Result<UserRoleDBResponse, Error> {
        self.update(
            id,
            AssignmentChanges {
                expires_at: Some(Some(expires_at)),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn clear_expiry(&self, id: UserRoleId) -> Result<UserRoleDBResponse, Error> {
        self.update(
            id,
            AssignmentChanges {
                expires_at: Some(None),
                ..Default::default()
            },
        )
        .await
    }

    #[instrument(skip(self), err)]
    pub async fn remove(&self, id: UserRoleId) -> Result<(), Error> {
        if !self.user_roles.delete_assignment(id).await? {
            return Err(Error::not_found("UserRole", id));
        }
        info!("Assignment removed");
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn remove_pair(&self, user_id: UserId, role_id: RoleId) -> Result<(), Error> {
        if !self.user_roles.delete_assignment_by_pair(user_id, role_id).await? {
            return Err(Error::not_found("UserRole", format!("{user_id}/{role_id}")));
        }
        info!("Assignment removed");
        Ok(())
    }

    /// Grant several roles to one principal in one step, active and without expiry.
    ///
    /// Roles the principal already has a row for are skipped. Every role must exist, otherwise
    /// nothing is granted. Returns the rows created.
    #[instrument(skip(self, role_ids), fields(roles = role_ids.len()), err)]
    pub async fn assign_many(&self, user_id: UserId, role_ids: &[RoleId], grantor: &str) -> Result<Vec<UserRoleDBResponse>, Error> {
        validate_grantor(grantor)?;
        self.require_user(user_id).await?;

        let mut unique = Vec::with_capacity(role_ids.len());
        for &role_id in role_ids {
            if !unique.contains(&role_id) {
                self.require_role(role_id).await?;
                unique.push(role_id);
            }
        }

        let created = self.user_roles.assign_many(user_id, &unique, grantor).await?;
        info!(
            created = created.len(),
            skipped = unique.len() - created.len(),
            "Roles assigned in batch"
        );
        Ok(created)
    }

    /// Delete the principal's assignments for several roles. Roles it has no row for are
    /// ignored. Returns the number removed.
    #[instrument(skip(self, role_ids), fields(roles = role_ids.len()), err)]
    pub async fn remove_many(&self, user_id: UserId, role_ids: &[RoleId]) -> Result<u64, Error> {
        self.require_user(user_id).await?;
        let removed = self.user_roles.delete_assignments_by_roles(user_id, role_ids).await?;
        info!(removed, "Roles removed in batch");
        Ok(removed)
    }

    /// Deactivate every active assignment whose expiry is at or before `now`.
    /// Running it again with the same `now` changes nothing.
    #[instrument(skip(self), err)]
    pub async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let count = self.user_roles.deactivate_expired(now).await?;
        if count > 0 {
            info!(count, "Deactivated expired assignments");
        }
        Ok(count)
    }

    #[instrument(skip(self), err)]
    pub async fn deactivate_all_for_user(&self, user_id: UserId) -> Result<u64, Error> {
        self.require_user(user_id).await?;
        Ok(self.user_roles.deactivate_all_for_user(user_id).await?)
    }

    #[instrument(skip(self), err)]
    pub async fn deactivate_all_for_role(&self, role_id: RoleId) -> Result<u64, Error> {
        self.require_role(role_id).await?;
        Ok(self.user_roles.deactivate_all_for_role(role_id).await?)
    }

    /// Move every effective assignment of `from` to `to`. Roles `to` already has a row for are
    /// skipped, and the whole move is atomic.
    #[instrument(skip(self), err)]
    pub async fn transfer(&self, from: UserId, to: UserId, grantor: &str) -> Result<TransferOutcome, Error> {
        if from == to {
            return Err(Error::BadRequest {
                message: "Cannot transfer roles from a user to itself".to_string(),
            });
        }
        validate_grantor(grantor)?;
        self.require_user(from).await?;
        self.require_user(to).await?;

        let outcome = self.user_roles.transfer_assignments(from, to, grantor, Utc::now()).await?;
        info!(
            deactivated = outcome.deactivated,
            created = outcome.created,
            skipped = outcome.skipped,
            "Roles transferred"
        );
        Ok(outcome)
    }

    /// Full assignment history of a principal, newest first
    pub async fn find_by_principal(&self, user_id: UserId) -> Result<Vec<UserRoleDBResponse>, Error> {
        self.require_user(user_id).await?;
        Ok(self.user_roles.list_assignments_by_user(user_id).await?)
    }

    pub async fn find_effective_by_principal(&self, user_id: UserId, now: DateTime<Utc>) -> Result<Vec<UserRoleDBResponse>, Error> {
        let rows = self.find_by_principal(user_id).await?;
        Ok(rows.into_iter().filter(|a| a.is_effective(now)).collect())
    }

    /// Assignments that grant nothing right now, because they are inactive or expired
    pub async fn find_inactive_by_principal(&self, user_id: UserId, now: DateTime<Utc>) -> Result<Vec<UserRoleDBResponse>, Error> {
        let rows = self.find_by_principal(user_id).await?;
        Ok(rows.into_iter().filter(|a| !a.is_effective(now)).collect())
    }

    pub async fn find_by_role(&self, role_id: RoleId) -> Result<Vec<UserRoleDBResponse>, Error> {
        self.require_role(role_id).await?;
        Ok(self.user_roles.list_assignments_by_role(role_id).await?)
    }

    pub async fn find_effective_by_role(&self, role_id: RoleId, now: DateTime<Utc>) -> Result<Vec<UserRoleDBResponse>, Error> {
        let rows = self.find_by_role(role_id).await?;
        Ok(rows.into_iter().filter(|a| a.is_effective(now)).collect())
    }

    pub async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<UserRoleDBResponse>, Error> {
        Ok(self.user_roles.list_expired_assignments(now).await?)
    }

    /// Active assignments that lapse after `now` but within `within`, soonest first
    pub async fn find_expiring_soon(&self, now: DateTime<Utc>, within: Duration) -> Result<Vec<UserRoleDBResponse>, Error> {
        if within < Duration::zero() {
            return Err(Error::BadRequest {
                message: "Look-ahead window must not be negative".to_string(),
            });
        }
        let until = now.checked_add_signed(within).ok_or_else(|| Error::BadRequest {
            message: "Look-ahead window is too large".to_string(),
        })?;
        Ok(self.user_roles.list_assignments_expiring_between(now, until).await?)
    }

    /// Assignments recorded with this grantor, newest first
    pub async fn find_by_grantor(&self, assigned_by: &str) -> Result<Vec<UserRoleDBResponse>, Error> {
        Ok(self.user_roles.list_assignments_by_grantor(assigned_by).await?)
    }

    /// Number of roles the principal effectively holds
    pub async fn count_effective_by_principal(&self, user_id: UserId, now: DateTime<Utc>) -> Result<u64, Error> {
        self.require_user(user_id).await?;
        Ok(self.user_roles.count_effective_by_user(user_id, now).await?)
    }

    /// Number of principals effectively holding the role
    pub async fn count_effective_by_role(&self, role_id: RoleId, now: DateTime<Utc>) -> Result<u64, Error> {
        self.require_role(role_id).await?;
        Ok(self.user_roles.count_effective_by_role(role_id, now).await?)
    }

    pub async fn stats(&self, now: DateTime<Utc>) -> Result<AssignmentStats, Error> {
        Ok(self.user_roles.assignment_stats(now).await?)
    }
}
