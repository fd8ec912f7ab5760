use crate::auth::authenticator::AuthError;
use crate::auth::session::TokenError;
use crate::db::errors::DbError;
use crate::db::constraints;
use crate::types::{RoleId, UserId};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

/// Message returned for every failed login, whatever the underlying cause.
pub const LOGIN_FAILED_MESSAGE: &str = "Invalid username or password";

#[derive(ThisError, Debug)]
pub enum Error {
    /// Authentication required but not provided
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Login rejected
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Bearer token rejected
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Authenticated principal lacks the role the route requires
    #[error("Insufficient permissions: role {required} required")]
    InsufficientPermissions { required: String },

    /// Invalid request data or business rule violation
    #[error("{message}")]
    BadRequest { message: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// The principal already has a row for this role
    #[error("User {user_id} already has role {role_id}")]
    DuplicateAssignment { user_id: UserId, role_id: RoleId },

    /// Conflict with existing state
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Storage operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// JSON error body: `{ "error": "...", "message": "..." }`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl Error {
    pub fn not_found(resource: &str, id: impl ToString) -> Self {
        Error::NotFound {
            resource: resource.to_string(),
            id: id.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } | Error::Auth(_) | Error::Token(_) => StatusCode::UNAUTHORIZED,
            Error::InsufficientPermissions { .. } => StatusCode::FORBIDDEN,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::DuplicateAssignment { .. } | Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::ForeignKeyViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::CheckViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::ProtectedEntity { .. } => StatusCode::CONFLICT,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            // Both login failure causes look identical to the caller
            Error::Auth(_) => LOGIN_FAILED_MESSAGE.to_string(),
            Error::Token(TokenError::Expired) => "Token has expired, please log in again".to_string(),
            Error::Token(_) => "Invalid token".to_string(),
            Error::InsufficientPermissions { .. } => "Insufficient permissions".to_string(),
            Error::BadRequest { message } => message.clone(),
            Error::NotFound { resource, id } => format!("{resource} with ID {id} not found"),
            Error::DuplicateAssignment { user_id, role_id } => {
                format!("User {user_id} already has role {role_id} assigned")
            }
            Error::Conflict { message } => message.clone(),
            Error::Internal { .. } => "Internal server error".to_string(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { constraint, .. } => match constraint.as_deref() {
                    Some(constraints::USERS_USERNAME) => "This username is already taken".to_string(),
                    Some(constraints::USERS_EMAIL) => "An account with this email address already exists".to_string(),
                    Some(constraints::USERS_PHONE) => "An account with this phone number already exists".to_string(),
                    Some(constraints::ROLES_NAME) => "A role with this name already exists".to_string(),
                    Some(constraints::USER_ROLES_PAIR) => "The user already has this role assigned".to_string(),
                    _ => "Resource already exists".to_string(),
                },
                DbError::ForeignKeyViolation { .. } => "Invalid reference to related resource".to_string(),
                DbError::CheckViolation { .. } => "Invalid data provided".to_string(),
                DbError::ProtectedEntity {
                    operation,
                    entity_type,
                    reason,
                    ..
                } => format!("Cannot {operation} {entity_type}: {reason}"),
                DbError::Other(_) => "Database error occurred".to_string(),
            },
            Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details - different log levels based on severity
        match &self {
            Error::Database(DbError::Other(_)) | Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Database(_) | Error::Conflict { .. } | Error::DuplicateAssignment { .. } => {
                tracing::warn!("Conflict error: {}", self);
            }
            Error::Token(TokenError::Malformed | TokenError::BadSignature) => {
                tracing::warn!("Rejected suspicious token: {}", self);
            }
            Error::Unauthenticated { .. } | Error::Auth(_) | Error::Token(_) | Error::InsufficientPermissions { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::BadRequest { .. } | Error::NotFound { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let body = ErrorBody {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.user_message(),
        };

        (status, Json(body)).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
