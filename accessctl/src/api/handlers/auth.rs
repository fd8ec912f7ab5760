use axum::{Json, extract::State, http::StatusCode};
use tracing::info;

use crate::{
    AppState,
    api::models::{
        auth::{ChangePasswordRequest, LoginRequest, LoginResponse, MessageResponse, RegisterRequest, RegisterResponse},
        users::{CurrentUser, UserResponse},
    },
    auth::password,
    db::models::users::{UserCreateDBRequest, UserStatus, UserUpdateDBRequest},
    errors::Error,
};

/// Login with username and password
#[tracing::instrument(skip_all)]
pub async fn login(State(state): State<AppState>, Json(request): Json<LoginRequest>) -> Result<Json<LoginResponse>, Error> {
    let authenticated = state.authenticator().authenticate(&request.username, &request.password).await?;
    Ok(Json(authenticated.into()))
}

/// Self-service registration, when enabled
#[tracing::instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), Error> {
    if !state.config.auth.allow_registration {
        return Err(Error::BadRequest {
            message: "User registration is disabled".to_string(),
        });
    }

    let password_config = &state.config.auth.password;
    password::check_length(&request.password, password_config.min_length, password_config.max_length)?;

    let password_hash = password::hash_password_blocking(request.password, password_config.argon2_params()).await?;
    let created = state
        .users
        .create_user(&UserCreateDBRequest {
            username: request.username,
            email: request.email,
            phone: request.phone,
            full_name: request.full_name,
            company_name: request.company_name,
            password_hash,
            status: UserStatus::Active,
        })
        .await?;

    info!(user_id = created.id, "User registered");
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user: UserResponse::from(created),
            message: "Registration successful".to_string(),
        }),
    ))
}

/// Tokens are not tracked server-side; clients discard theirs.
#[tracing::instrument(skip_all)]
pub async fn logout() -> Json<MessageResponse> {
    Json(MessageResponse::new("Logout successful"))
}

/// The calling principal with its effective roles
#[tracing::instrument(skip_all)]
pub async fn get_profile(current_user: CurrentUser) -> Json<CurrentUser> {
    Json(current_user)
}

#[tracing::instrument(skip_all)]
pub async fn change_password(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, Error> {
    let user = state
        .users
        .get_user(current_user.id)
        .await?
        .ok_or_else(|| Error::not_found("User", current_user.id))?;

    if !password::verify_password_blocking(request.current_password, user.password_hash).await? {
        return Err(Error::BadRequest {
            message: "Current password is incorrect".to_string(),
        });
    }

    let password_config = &state.config.auth.password;
    password::check_length(&request.new_password, password_config.min_length, password_config.max_length)?;
    let password_hash = password::hash_password_blocking(request.new_password, password_config.argon2_params()).await?;

    state
        .users
        .update_user(
            user.id,
            &UserUpdateDBRequest {
                password_hash: Some(password_hash),
                ..Default::default()
            },
        )
        .await?;

    info!(user_id = user.id, "Password changed");
    Ok(Json(MessageResponse::new("Password changed")))
}
