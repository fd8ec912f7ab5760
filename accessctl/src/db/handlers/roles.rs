//! PostgreSQL store for roles.

use crate::db::{
    errors::{DbError, Result},
    handlers::stores::RoleStore,
    models::roles::{RoleCreateDBRequest, RoleDBResponse, RoleUpdateDBRequest},
};
use crate::types::RoleId;
use sqlx::PgPool;
use tracing::instrument;

#[derive(Clone)]
pub struct Roles {
    db: PgPool,
}

impl Roles {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl RoleStore for Roles {
    #[instrument(skip(self, request), fields(name = %request.name), err)]
    async fn create_role(&self, request: &RoleCreateDBRequest) -> Result<RoleDBResponse> {
        let role = sqlx::query_as::<_, RoleDBResponse>(
            "INSERT INTO roles (name, description, is_active) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(&request.name)
        .bind(&request.description)
        .bind(request.is_active)
        .fetch_one(&self.db)
        .await?;

        Ok(role)
    }

    #[instrument(skip(self), err)]
    async fn get_role(&self, id: RoleId) -> Result<Option<RoleDBResponse>> {
        let role = sqlx::query_as::<_, RoleDBResponse>("SELECT * FROM roles WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        Ok(role)
    }

    #[instrument(skip(self), err)]
    async fn get_role_by_name(&self, name: &str) -> Result<Option<RoleDBResponse>> {
        let role = sqlx::query_as::<_, RoleDBResponse>("SELECT * FROM roles WHERE LOWER(name) = LOWER($1)")
            .bind(name)
            .fetch_optional(&self.db)
            .await?;

        Ok(role)
    }

    #[instrument(skip(self), err)]
    async fn list_roles(&self) -> Result<Vec<RoleDBResponse>> {
        let roles = sqlx::query_as::<_, RoleDBResponse>("SELECT * FROM roles ORDER BY name")
            .fetch_all(&self.db)
            .await?;

        Ok(roles)
    }

    #[instrument(skip(self, request), err)]
    async fn update_role(&self, id: RoleId, request: &RoleUpdateDBRequest) -> Result<RoleDBResponse> {
        let role = sqlx::query_as::<_, RoleDBResponse>(
            r#"
            UPDATE roles SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                is_active = COALESCE($4, is_active),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&request.name)
        .bind(&request.description)
        .bind(request.is_active)
        .fetch_optional(&self.db)
        .await?
        .ok_or(DbError::NotFound)?;

        Ok(role)
    }

    #[instrument(skip(self), err)]
    async fn delete_role(&self, id: RoleId) -> Result<bool> {
        let mut tx = self.db.begin().await?;

        let assignments: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_roles WHERE role_id = $1")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        if assignments > 0 {
            return Err(DbError::ProtectedEntity {
                operation: "deleted",
                reason: format!("{assignments} assignment(s) still reference it"),
                entity_type: "role",
                entity_id: id.to_string(),
            });
        }

        let result = sqlx::query("DELETE FROM roles WHERE id = $1").bind(id).execute(&mut *tx).await?;
        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }
}
