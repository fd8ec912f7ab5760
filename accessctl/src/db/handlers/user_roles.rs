//! PostgreSQL store for role assignments.

use crate::db::{
    errors::{DbError, Result},
    handlers::stores::UserRoleStore,
    models::user_roles::{AssignmentStats, TransferOutcome, UserRoleCreateDBRequest, UserRoleDBResponse, UserRoleUpdateDBRequest},
};
use crate::types::{RoleId, UserId, UserRoleId};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, instrument};

#[derive(Clone)]
pub struct UserRoles {
    db: PgPool,
}

impl UserRoles {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl UserRoleStore for UserRoles {
    #[instrument(skip(self, request), fields(user_id = request.user_id, role_id = request.role_id), err)]
    async fn create_assignment(&self, request: &UserRoleCreateDBRequest) -> Result<UserRoleDBResponse> {
        let assignment = sqlx::query_as::<_, UserRoleDBResponse>(
            r#"
            INSERT INTO user_roles (user_id, role_id, assigned_by, is_active, expires_at, notes)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(request.user_id)
        .bind(request.role_id)
        .bind(&request.assigned_by)
        .bind(request.is_active)
        .bind(request.expires_at)
        .bind(&request.notes)
        .fetch_one(&self.db)
        .await?;

        Ok(assignment)
    }

    #[instrument(skip(self), err)]
    async fn get_assignment(&self, id: UserRoleId) -> Result<Option<UserRoleDBResponse>> {
        let assignment = sqlx::query_as::<_, UserRoleDBResponse>("SELECT * FROM user_roles WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        Ok(assignment)
    }

    #[instrument(skip(self), err)]
    async fn get_assignment_by_pair(&self, user_id: UserId, role_id: RoleId) -> Result<Option<UserRoleDBResponse>> {
        let assignment = sqlx::query_as::<_, UserRoleDBResponse>("SELECT * FROM user_roles WHERE user_id = $1 AND role_id = $2")
            .bind(user_id)
            .bind(role_id)
            .fetch_optional(&self.db)
            .await?;

        Ok(assignment)
    }

    #[instrument(skip(self, request), err)]
    async fn update_assignment(&self, id: UserRoleId, request: &UserRoleUpdateDBRequest) -> Result<UserRoleDBResponse> {
        let assignment = sqlx::query_as::<_, UserRoleDBResponse>(
            r#"
            UPDATE user_roles SET
                assigned_by = COALESCE($2, assigned_by),
                is_active = COALESCE($3, is_active),
                expires_at = CASE WHEN $4 THEN $5 ELSE expires_at END,
                notes = COALESCE($6, notes),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&request.assigned_by)
        .bind(request.is_active)
        .bind(request.expires_at.is_some())
        .bind(request.expires_at.flatten())
        .bind(&request.notes)
        .fetch_optional(&self.db)
        .await?
        .ok_or(DbError::NotFound)?;

        Ok(assignment)
    }

    #[instrument(skip(self), err)]
    async fn delete_assignment(&self, id: UserRoleId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM user_roles WHERE id = $1").bind(id).execute(&self.db).await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn delete_assignment_by_pair(&self, user_id: UserId, role_id: RoleId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role_id = $2")
            .bind(user_id)
            .bind(role_id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn list_assignments_by_user(&self, user_id: UserId) -> Result<Vec<UserRoleDBResponse>> {
        let assignments =
            sqlx::query_as::<_, UserRoleDBResponse>("SELECT * FROM user_roles WHERE user_id = $1 ORDER BY assigned_at DESC, id DESC")
                .bind(user_id)
                .fetch_all(&self.db)
                .await?;

        Ok(assignments)
    }

    #[instrument(skip(self), err)]
    async fn list_assignments_by_role(&self, role_id: RoleId) -> Result<Vec<UserRoleDBResponse>> {
        let assignments =
            sqlx::query_as::<_, UserRoleDBResponse>("SELECT * FROM user_roles WHERE role_id = $1 ORDER BY assigned_at DESC, id DESC")
                .bind(role_id)
                .fetch_all(&self.db)
                .await?;

        Ok(assignments)
    }

    #[instrument(skip(self), err)]
    async fn list_expired_assignments(&self, now: DateTime<Utc>) -> Result<Vec<UserRoleDBResponse>> {
        let assignments = sqlx::query_as::<_, UserRoleDBResponse>(
            "SELECT * FROM user_roles WHERE expires_at IS NOT NULL AND expires_at <= $1 ORDER BY expires_at, id",
        )
        .bind(now)
        .fetch_all(&self.db)
        .await?;

        Ok(assignments)
    }

    #[instrument(skip(self), err)]
    async fn list_assignments_expiring_between(&self, from: DateTime<Utc>, until: DateTime<Utc>) -> Result<Vec<UserRoleDBResponse>> {
        let assignments = sqlx::query_as::<_, UserRoleDBResponse>(
            r#"
            SELECT * FROM user_roles
            WHERE is_active AND expires_at > $1 AND expires_at <= $2
            ORDER BY expires_at, id
            "#,
        )
        .bind(from)
        .bind(until)
        .fetch_all(&self.db)
        .await?;

        Ok(assignments)
    }

    #[instrument(skip(self), err)]
    async fn list_assignments_by_grantor(&self, assigned_by: &str) -> Result<Vec<UserRoleDBResponse>> {
        let assignments =
            sqlx::query_as::<_, UserRoleDBResponse>("SELECT * FROM user_roles WHERE assigned_by = $1 ORDER BY assigned_at DESC, id DESC")
                .bind(assigned_by)
                .fetch_all(&self.db)
                .await?;

        Ok(assignments)
    }

    #[instrument(skip(self), err)]
    async fn count_effective_by_user(&self, user_id: UserId, now: DateTime<Utc>) -> Result<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM user_roles WHERE user_id = $1 AND is_active AND (expires_at IS NULL OR expires_at > $2)",
        )
        .bind(user_id)
        .bind(now)
        .fetch_one(&self.db)
        .await?;

        Ok(count as u64)
    }

    #[instrument(skip(self), err)]
    async fn count_effective_by_role(&self, role_id: RoleId, now: DateTime<Utc>) -> Result<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM user_roles WHERE role_id = $1 AND is_active AND (expires_at IS NULL OR expires_at > $2)",
        )
        .bind(role_id)
        .bind(now)
        .fetch_one(&self.db)
        .await?;

        Ok(count as u64)
    }

    #[instrument(skip(self), err)]
    async fn assignment_stats(&self, now: DateTime<Utc>) -> Result<AssignmentStats> {
        let (total, active, expired, effective) = sqlx::query_as::<_, (i64, i64, i64, i64)>(
            r#"
            SELECT
                COUNT(*),
                COUNT(*) FILTER (WHERE is_active),
                COUNT(*) FILTER (WHERE expires_at IS NOT NULL AND expires_at <= $1),
                COUNT(*) FILTER (WHERE is_active AND (expires_at IS NULL OR expires_at > $1))
            FROM user_roles
            "#,
        )
        .bind(now)
        .fetch_one(&self.db)
        .await?;

        Ok(AssignmentStats {
            total: total as u64,
            active: active as u64,
            inactive: (total - active) as u64,
            expired: expired as u64,
            effective: effective as u64,
        })
    }

    #[instrument(skip(self), err)]
    async fn effective_role_names(&self, user_id: UserId, now: DateTime<Utc>) -> Result<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>(
            r#"
            SELECT r.name
            FROM user_roles ur
            JOIN roles r ON r.id = ur.role_id
            WHERE ur.user_id = $1
              AND ur.is_active
              AND (ur.expires_at IS NULL OR ur.expires_at > $2)
            ORDER BY r.name
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_all(&self.db)
        .await?;

        Ok(names)
    }

    #[instrument(skip(self), err)]
    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE user_roles SET is_active = FALSE, updated_at = NOW()
            WHERE expires_at IS NOT NULL AND expires_at <= $1 AND is_active
            "#,
        )
        .bind(now)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    async fn deactivate_all_for_user(&self, user_id: UserId) -> Result<u64> {
        let result = sqlx::query("UPDATE user_roles SET is_active = FALSE, updated_at = NOW() WHERE user_id = $1 AND is_active")
            .bind(user_id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    async fn deactivate_all_for_role(&self, role_id: RoleId) -> Result<u64> {
        let result = sqlx::query("UPDATE user_roles SET is_active = FALSE, updated_at = NOW() WHERE role_id = $1 AND is_active")
            .bind(role_id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self, grantor), err)]
    async fn assign_many(&self, user_id: UserId, role_ids: &[RoleId], grantor: &str) -> Result<Vec<UserRoleDBResponse>> {
        let mut tx = self.db.begin().await?;
        let mut created = Vec::new();

        for role_id in role_ids {
            let inserted = sqlx::query_as::<_, UserRoleDBResponse>(
                r#"
                INSERT INTO user_roles (user_id, role_id, assigned_by, is_active, expires_at, notes)
                VALUES ($1, $2, $3, TRUE, NULL, NULL)
                ON CONFLICT (user_id, role_id) DO NOTHING
                RETURNING *
                "#,
            )
            .bind(user_id)
            .bind(role_id)
            .bind(grantor)
            .fetch_optional(&mut *tx)
            .await?;

            match inserted {
                Some(assignment) => created.push(assignment),
                None => debug!(role_id, "User already holds role, skipping"),
            }
        }

        tx.commit().await?;
        Ok(created)
    }

    #[instrument(skip(self), err)]
    async fn delete_assignments_by_roles(&self, user_id: UserId, role_ids: &[RoleId]) -> Result<u64> {
        let result = sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role_id = ANY($2)")
            .bind(user_id)
            .bind(role_ids)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self, grantor), err)]
    async fn transfer_assignments(&self, from: UserId, to: UserId, grantor: &str, now: DateTime<Utc>) -> Result<TransferOutcome> {
        let mut tx = self.db.begin().await?;

        // Lock the source rows so a concurrent assign/deactivate can't interleave
        let source = sqlx::query_as::<_, UserRoleDBResponse>(
            r#"
            SELECT * FROM user_roles
            WHERE user_id = $1 AND is_active AND (expires_at IS NULL OR expires_at > $2)
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(from)
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        let notes = format!("Transferred from user {from}");
        let mut outcome = TransferOutcome::default();

        for assignment in source {
            sqlx::query("UPDATE user_roles SET is_active = FALSE, updated_at = NOW() WHERE id = $1")
                .bind(assignment.id)
                .execute(&mut *tx)
                .await?;
            outcome.deactivated += 1;

            let inserted = sqlx::query(
                r#"
                INSERT INTO user_roles (user_id, role_id, assigned_by, is_active, expires_at, notes)
                VALUES ($1, $2, $3, TRUE, NULL, $4)
                ON CONFLICT (user_id, role_id) DO NOTHING
                "#,
            )
            .bind(to)
            .bind(assignment.role_id)
            .bind(grantor)
            .bind(&notes)
            .execute(&mut *tx)
            .await?;

            if inserted.rows_affected() > 0 {
                outcome.created += 1;
            } else {
                debug!(role_id = assignment.role_id, "Target already holds role, skipping");
                outcome.skipped += 1;
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }
}
