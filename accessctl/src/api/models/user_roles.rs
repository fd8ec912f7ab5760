//! API request/response models for role assignments.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    auth::ledger::AssignmentChanges,
    db::models::user_roles::{AssignmentStats, TransferOutcome, UserRoleDBResponse},
    types::{RoleId, UserId, UserRoleId},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRoleCreate {
    pub user_id: UserId,
    pub role_id: RoleId,
    /// Defaults to the calling administrator's username
    pub assigned_by: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Distinguishes an absent field from an explicit `null`.
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Partial update. `"expiresAt": null` clears the expiry, omitting it leaves it unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRoleUpdate {
    pub assigned_by: Option<String>,
    pub is_active: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub expires_at: Option<Option<DateTime<Utc>>>,
    pub notes: Option<String>,
}

impl From<UserRoleUpdate> for AssignmentChanges {
    fn from(update: UserRoleUpdate) -> Self {
        Self {
            assigned_by: update.assigned_by,
            is_active: update.is_active,
            expires_at: update.expires_at,
            notes: update.notes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiryUpdate {
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub from_user_id: UserId,
    pub to_user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResponse {
    pub deactivated: u64,
    pub created: u64,
    pub skipped: u64,
}

impl From<TransferOutcome> for TransferResponse {
    fn from(outcome: TransferOutcome) -> Self {
        Self {
            deactivated: outcome.deactivated,
            created: outcome.created,
            skipped: outcome.skipped,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffectedResponse {
    pub affected: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveRolesResponse {
    pub user_id: UserId,
    pub roles: BTreeSet<String>,
    /// The same roles as `ROLE_<NAME>` authorities
    pub authorities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HasRoleResponse {
    pub user_id: UserId,
    pub role: String,
    pub has_role: bool,
}

/// Filter for assignment listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentFilter {
    #[default]
    All,
    Effective,
    Inactive,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignmentListQuery {
    #[serde(default)]
    pub filter: AssignmentFilter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiringSoonQuery {
    #[serde(default = "default_days_ahead")]
    pub days_ahead: i64,
}

fn default_days_ahead() -> i64 {
    7
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchAssignQuery {
    /// Defaults to the calling administrator's username
    pub assigned_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRemoveResponse {
    pub user_id: UserId,
    pub requested: usize,
    pub removed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRoleCountResponse {
    pub user_id: UserId,
    pub role_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleUserCountResponse {
    pub role_id: RoleId,
    pub user_count: u64,
}

/// Ledger-wide assignment counts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentStatsResponse {
    pub total: u64,
    pub active: u64,
    pub inactive: u64,
    /// Rows whose expiry has passed, whether or not they were deactivated yet
    pub expired: u64,
    pub effective: u64,
}

impl From<AssignmentStats> for AssignmentStatsResponse {
    fn from(stats: AssignmentStats) -> Self {
        Self {
            total: stats.total,
            active: stats.active,
            inactive: stats.inactive,
            expired: stats.expired,
            effective: stats.effective,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRoleResponse {
    pub id: UserRoleId,
    pub user_id: UserId,
    pub role_id: RoleId,
    pub assigned_by: String,
    pub is_active: bool,
    /// Active and not expired at the time of the response
    pub effective: bool,
    pub assigned_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl From<UserRoleDBResponse> for UserRoleResponse {
    fn from(db: UserRoleDBResponse) -> Self {
        Self {
            effective: db.is_effective(Utc::now()),
            id: db.id,
            user_id: db.user_id,
            role_id: db.role_id,
            assigned_by: db.assigned_by,
            is_active: db.is_active,
            assigned_at: db.assigned_at,
            updated_at: db.updated_at,
            expires_at: db.expires_at,
            notes: db.notes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_distinguishes_null_from_absent() {
        let absent: UserRoleUpdate = serde_json::from_str(r#"{"isActive": true}"#).unwrap();
        assert_eq!(absent.expires_at, None);
        assert_eq!(absent.is_active, Some(true));

        let cleared: UserRoleUpdate = serde_json::from_str(r#"{"expiresAt": null}"#).unwrap();
        assert_eq!(cleared.expires_at, Some(None));

        let set: UserRoleUpdate = serde_json::from_str(r#"{"expiresAt": "2030-01-01T00:00:00Z"}"#).unwrap();
        assert!(matches!(set.expires_at, Some(Some(_))));
    }

    #[test]
    fn test_create_defaults_to_active() {
        let create: UserRoleCreate = serde_json::from_str(r#"{"userId": 1, "roleId": 2}"#).unwrap();
        assert!(create.is_active);
        assert!(create.assigned_by.is_none());
    }

    #[test]
    fn test_expiring_soon_defaults_to_a_week() {
        let query: ExpiringSoonQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.days_ahead, 7);
        let query: ExpiringSoonQuery = serde_json::from_str(r#"{"daysAhead": 30}"#).unwrap();
        assert_eq!(query.days_ahead, 30);
    }
}
