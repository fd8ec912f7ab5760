//! PostgreSQL store for users.

use crate::db::{
    errors::{DbError, Result},
    handlers::stores::UserStore,
    models::users::{UserCreateDBRequest, UserDBResponse, UserUpdateDBRequest},
};
use crate::types::UserId;
use sqlx::PgPool;
use tracing::instrument;

#[derive(Clone)]
pub struct Users {
    db: PgPool,
}

impl Users {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl UserStore for Users {
    #[instrument(skip(self, request), fields(username = %request.username), err)]
    async fn create_user(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        let user = sqlx::query_as::<_, UserDBResponse>(
            r#"
            INSERT INTO users (username, email, phone, full_name, company_name, password_hash, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(&request.username)
        .bind(&request.email)
        .bind(&request.phone)
        .bind(&request.full_name)
        .bind(&request.company_name)
        .bind(&request.password_hash)
        .bind(request.status)
        .fetch_one(&self.db)
        .await?;

        Ok(user)
    }

    #[instrument(skip(self), err)]
    async fn get_user(&self, id: UserId) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, UserDBResponse>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        Ok(user)
    }

    #[instrument(skip(self), err)]
    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, UserDBResponse>("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.db)
            .await?;

        Ok(user)
    }

    #[instrument(skip(self), err)]
    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, UserDBResponse>("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.db)
            .await?;

        Ok(user)
    }

    #[instrument(skip(self), err)]
    async fn list_users(&self) -> Result<Vec<UserDBResponse>> {
        let users = sqlx::query_as::<_, UserDBResponse>("SELECT * FROM users ORDER BY id")
            .fetch_all(&self.db)
            .await?;

        Ok(users)
    }

    #[instrument(skip(self, request), err)]
    async fn update_user(&self, id: UserId, request: &UserUpdateDBRequest) -> Result<UserDBResponse> {
        let user = sqlx::query_as::<_, UserDBResponse>(
            r#"
            UPDATE users SET
                email = COALESCE($2, email),
                phone = COALESCE($3, phone),
                full_name = COALESCE($4, full_name),
                company_name = COALESCE($5, company_name),
                password_hash = COALESCE($6, password_hash),
                status = COALESCE($7, status),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&request.email)
        .bind(&request.phone)
        .bind(&request.full_name)
        .bind(&request.company_name)
        .bind(&request.password_hash)
        .bind(request.status)
        .fetch_optional(&self.db)
        .await?
        .ok_or(DbError::NotFound)?;

        Ok(user)
    }

    #[instrument(skip(self), err)]
    async fn delete_user(&self, id: UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1").bind(id).execute(&self.db).await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::constraints;
    use crate::db::models::users::UserStatus;

    fn create_request(username: &str) -> UserCreateDBRequest {
        UserCreateDBRequest {
            username: username.to_string(),
            email: format!("{username}@example.com"),
            phone: None,
            full_name: Some(format!("{username} Example")),
            company_name: None,
            password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".to_string(),
            status: UserStatus::Active,
        }
    }

    #[sqlx::test]
    async fn test_create_and_lookup_user(pool: PgPool) {
        let users = Users::new(pool);
        let created = users.create_user(&create_request("alice")).await.unwrap();

        assert_eq!(created.status, UserStatus::Active);
        let by_name = users.get_user_by_username("alice").await.unwrap().unwrap();
        assert_eq!(by_name.id, created.id);
        let by_email = users.get_user_by_email("alice@example.com").await.unwrap().unwrap();
        assert_eq!(by_email.id, created.id);
        assert!(users.get_user_by_username("ALICE").await.unwrap().is_none());
    }

    #[sqlx::test]
    async fn test_duplicate_username_is_unique_violation(pool: PgPool) {
        let users = Users::new(pool);
        users.create_user(&create_request("bob")).await.unwrap();

        let mut duplicate = create_request("bob");
        duplicate.email = "other@example.com".to_string();
        let err = users.create_user(&duplicate).await.unwrap_err();
        assert!(err.is_unique_violation_on(constraints::USERS_USERNAME));
    }

    #[sqlx::test]
    async fn test_update_status_and_delete(pool: PgPool) {
        let users = Users::new(pool);
        let created = users.create_user(&create_request("carol")).await.unwrap();

        let updated = users
            .update_user(
                created.id,
                &UserUpdateDBRequest {
                    status: Some(UserStatus::Suspended),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, UserStatus::Suspended);
        assert_eq!(updated.email, created.email);

        assert!(users.delete_user(created.id).await.unwrap());
        assert!(!users.delete_user(created.id).await.unwrap());
        assert!(matches!(
            users.update_user(created.id, &UserUpdateDBRequest::default()).await,
            Err(DbError::NotFound)
        ));
    }
}
