//! API request/response models for users.

use std::collections::BTreeSet;

use crate::db::models::users::{UserDBResponse, UserStatus};
use crate::types::{UserId, normalize_role_name};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Administrator request to create a user. A password is generated when none is given.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCreate {
    pub username: String,
    pub email: String,
    pub phone: Option<String>,
    pub full_name: Option<String>,
    pub company_name: Option<String>,
    pub password: Option<String>,
    pub status: Option<UserStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub full_name: Option<String>,
    pub company_name: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStatusUpdate {
    pub status: UserStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub phone: Option<String>,
    pub full_name: Option<String>,
    pub company_name: Option<String>,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Returned when an administrator creates a user without a password
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCreatedResponse {
    #[serde(flatten)]
    pub user: UserResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_password: Option<String>,
}

impl From<UserDBResponse> for UserResponse {
    fn from(db: UserDBResponse) -> Self {
        Self {
            id: db.id,
            username: db.username,
            email: db.email,
            phone: db.phone,
            full_name: db.full_name,
            company_name: db.company_name,
            status: db.status,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

/// The authenticated principal for one request, with roles resolved at request time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub status: UserStatus,
    /// Upper-cased names of effectively held roles
    pub roles: BTreeSet<String>,
}

impl CurrentUser {
    pub fn has_role(&self, name: &str) -> bool {
        self.roles.contains(&normalize_role_name(name))
    }

    /// Roles in `ROLE_<NAME>` authority form
    pub fn authorities(&self) -> Vec<String> {
        self.roles.iter().map(|r| crate::auth::authority(r)).collect()
    }
}
