use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::info;

use crate::{
    AppState,
    api::models::users::{UserCreate, UserCreatedResponse, UserResponse, UserStatusUpdate, UserUpdate},
    auth::{
        current_user::{RequiresRole, role},
        password,
    },
    db::models::users::{UserCreateDBRequest, UserStatus, UserUpdateDBRequest},
    errors::Error,
    types::UserId,
};

/// Create a user. When no password is supplied one is generated and returned once.
#[tracing::instrument(skip_all)]
pub async fn create_user(
    State(state): State<AppState>,
    _: RequiresRole<role::Admin>,
    Json(request): Json<UserCreate>,
) -> Result<(StatusCode, Json<UserCreatedResponse>), Error> {
    let password_config = &state.config.auth.password;
    let (plaintext, generated_password) = match request.password {
        Some(given) => {
            password::check_length(&given, password_config.min_length, password_config.max_length)?;
            (given, None)
        }
        None => {
            let generated = password::generate_password();
            (generated.clone(), Some(generated))
        }
    };

    let password_hash = password::hash_password_blocking(plaintext, password_config.argon2_params()).await?;
    let created = state
        .users
        .create_user(&UserCreateDBRequest {
            username: request.username,
            email: request.email,
            phone: request.phone,
            full_name: request.full_name,
            company_name: request.company_name,
            password_hash,
            status: request.status.unwrap_or(UserStatus::Active),
        })
        .await?;

    info!(user_id = created.id, "User created");
    Ok((
        StatusCode::CREATED,
        Json(UserCreatedResponse {
            user: created.into(),
            generated_password,
        }),
    ))
}

#[tracing::instrument(skip_all)]
pub async fn list_users(State(state): State<AppState>, _: RequiresRole<role::Admin>) -> Result<Json<Vec<UserResponse>>, Error> {
    let users = state.users.list_users().await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

#[tracing::instrument(skip_all)]
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    _: RequiresRole<role::Admin>,
) -> Result<Json<UserResponse>, Error> {
    let user = state
        .users
        .get_user(user_id)
        .await?
        .ok_or_else(|| Error::not_found("User", user_id))?;
    Ok(Json(user.into()))
}

#[tracing::instrument(skip_all)]
pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    _: RequiresRole<role::Admin>,
    Json(request): Json<UserUpdate>,
) -> Result<Json<UserResponse>, Error> {
    let password_hash = match request.password {
        Some(new_password) => {
            let password_config = &state.config.auth.password;
            password::check_length(&new_password, password_config.min_length, password_config.max_length)?;
            Some(password::hash_password_blocking(new_password, password_config.argon2_params()).await?)
        }
        None => None,
    };

    let updated = state
        .users
        .update_user(
            user_id,
            &UserUpdateDBRequest {
                email: request.email,
                phone: request.phone,
                full_name: request.full_name,
                company_name: request.company_name,
                password_hash,
                status: None,
            },
        )
        .await
        .map_err(|e| match e {
            crate::db::errors::DbError::NotFound => Error::not_found("User", user_id),
            e => Error::Database(e),
        })?;

    Ok(Json(updated.into()))
}

/// Change account status. Only ACTIVE principals can log in.
#[tracing::instrument(skip_all)]
pub async fn update_user_status(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    _: RequiresRole<role::Admin>,
    Json(request): Json<UserStatusUpdate>,
) -> Result<Json<UserResponse>, Error> {
    let updated = state
        .users
        .update_user(
            user_id,
            &UserUpdateDBRequest {
                status: Some(request.status),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| match e {
            crate::db::errors::DbError::NotFound => Error::not_found("User", user_id),
            e => Error::Database(e),
        })?;

    info!(user_id, status = %updated.status, "User status changed");
    Ok(Json(updated.into()))
}

/// Hard delete. Assignments of the user go with it.
#[tracing::instrument(skip_all)]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    RequiresRole { user: current_user, .. }: RequiresRole<role::Admin>,
) -> Result<StatusCode, Error> {
    if current_user.id == user_id {
        return Err(Error::BadRequest {
            message: "Cannot delete your own account".to_string(),
        });
    }

    if !state.users.delete_user(user_id).await? {
        return Err(Error::not_found("User", user_id));
    }

    info!(user_id, "User deleted");
    Ok(StatusCode::NO_CONTENT)
}
