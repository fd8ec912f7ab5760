//! Storage models for role assignments.

use crate::types::{RoleId, UserId, UserRoleId};
use chrono::{DateTime, Utc};

/// Storage request for a new assignment
#[derive(Debug, Clone)]
pub struct UserRoleCreateDBRequest {
    pub user_id: UserId,
    pub role_id: RoleId,
    pub assigned_by: String,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// Storage request for updating an assignment. `None` leaves a field unchanged;
/// `expires_at: Some(None)` clears the expiry.
#[derive(Debug, Clone, Default)]
pub struct UserRoleUpdateDBRequest {
    pub assigned_by: Option<String>,
    pub is_active: Option<bool>,
    pub expires_at: Option<Option<DateTime<Utc>>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct UserRoleDBResponse {
    pub id: UserRoleId,
    pub user_id: UserId,
    pub role_id: RoleId,
    pub assigned_by: String,
    pub is_active: bool,
    pub assigned_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl UserRoleDBResponse {
    /// An assignment is expired once `now` reaches its expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Whether this assignment currently grants its role.
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_expired(now)
    }
}

/// Result of moving a principal's effective assignments to another principal
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Assignments deactivated on the source principal
    pub deactivated: u64,
    /// Assignments created on the target principal
    pub created: u64,
    /// Roles skipped because the target already had a row for them
    pub skipped: u64,
}

/// Ledger-wide assignment counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignmentStats {
    pub total: u64,
    /// Rows with the active flag set, expired or not
    pub active: u64,
    pub inactive: u64,
    /// Rows whose expiry has passed, active or not
    pub expired: u64,
    /// Rows that currently grant their role
    pub effective: u64,
}
