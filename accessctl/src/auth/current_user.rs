use std::marker::PhantomData;

use crate::{
    AppState,
    api::models::users::CurrentUser,
    auth::session::TokenClaims,
    db::models::users::UserStatus,
    errors::{Error, Result},
};
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::{debug, info, instrument, trace};

/// Pull the bearer token out of the `Authorization` header.
fn bearer_token(parts: &Parts) -> Result<&str> {
    let header = parts.headers.get(AUTHORIZATION).ok_or(Error::Unauthenticated { message: None })?;

    let value = header.to_str().map_err(|_| Error::Unauthenticated {
        message: Some("Invalid authorization header".to_string()),
    })?;

    // The scheme name is case-insensitive
    match value.trim().split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("Bearer") && !token.trim().is_empty() => Ok(token.trim()),
        _ => Err(Error::Unauthenticated {
            message: Some("Expected a Bearer token".to_string()),
        }),
    }
}

/// Validate the bearer token on a request and return its claims.
pub fn authenticate_request(parts: &Parts, state: &AppState) -> Result<TokenClaims> {
    let token = bearer_token(parts)?;
    Ok(state.tokens.validate(token)?)
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let claims = authenticate_request(parts, state)?;
        trace!(user_id = claims.uid, "Bearer token accepted");

        // Roles and account status are re-read on every request and apply to tokens already issued
        match state.resolver().resolve(claims.uid).await? {
            Some(user) if user.status != UserStatus::Active => {
                info!(user_id = user.id, status = ?user.status, "Rejected token of non-active account");
                Err(Error::Unauthenticated {
                    message: Some("Account is not active".to_string()),
                })
            }
            Some(user) => {
                debug!(user_id = user.id, roles = ?user.roles, "Authenticated request");
                Ok(user)
            }
            None => Err(Error::Unauthenticated {
                message: Some("Account no longer exists".to_string()),
            }),
        }
    }
}

/// A role a route can demand through [`RequiresRole`].
pub trait RequiredRole: Send + Sync + 'static {
    const NAME: &'static str;
}

pub mod role {
    use super::RequiredRole;
    use crate::types::ADMIN_ROLE;

    /// Holders of the administrator role
    pub struct Admin;

    impl RequiredRole for Admin {
        const NAME: &'static str = ADMIN_ROLE;
    }
}

/// Extractor admitting only principals that effectively hold role `R`.
///
/// Missing, malformed, forged or expired tokens are rejected with 401 before roles are looked at.
/// A valid token whose principal lacks the role is rejected with 403.
pub struct RequiresRole<R: RequiredRole> {
    pub user: CurrentUser,
    _role: PhantomData<R>,
}

impl<R: RequiredRole> RequiresRole<R> {
    pub fn into_inner(self) -> CurrentUser {
        self.user
    }
}

impl<R: RequiredRole> FromRequestParts<AppState> for RequiresRole<R> {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let user = CurrentUser::from_request_parts(parts, state).await?;

        if !user.has_role(R::NAME) {
            debug!(user_id = user.id, required = R::NAME, "Missing required role");
            return Err(Error::InsufficientPermissions {
                required: R::NAME.to_string(),
            });
        }

        Ok(Self {
            user,
            _role: PhantomData,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session::TokenError;
    use crate::db::models::users::UserStatus;
    use crate::test_utils::{create_test_state, seed_role, seed_user};
    use axum::http::Request;

    fn parts_with(header: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/api/profile/me");
        if let Some(value) = header {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test_log::test(tokio::test)]
    async fn test_missing_or_wrong_scheme_is_unauthenticated() {
        let (state, _) = create_test_state();

        for header in [None, Some("Basic YWxpY2U6c2VjcmV0"), Some("Bearer "), Some("Bearer"), Some("Bearerabc")] {
            let mut parts = parts_with(header);
            let err = CurrentUser::from_request_parts(&mut parts, &state).await.unwrap_err();
            assert!(matches!(err, Error::Unauthenticated { .. }), "header {header:?}");
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_token_errors_surface() {
        let (state, _) = create_test_state();
        let mut parts = parts_with(Some("Bearer not-a-jwt"));

        let err = CurrentUser::from_request_parts(&mut parts, &state).await.unwrap_err();
        assert!(matches!(err, Error::Token(TokenError::Malformed)));
    }

    #[test_log::test(tokio::test)]
    async fn test_valid_token_resolves_principal_with_roles() {
        let (state, store) = create_test_state();
        let alice = seed_user(&store, "alice", "Secret123", UserStatus::Active).await;
        let token = state.tokens.issue(alice.id, "alice").unwrap().token;

        let mut parts = parts_with(Some(&format!("Bearer {token}")));
        let user = CurrentUser::from_request_parts(&mut parts, &state).await.unwrap();
        assert_eq!(user.id, alice.id);
        assert!(user.roles.is_empty());

        let err = RequiresRole::<role::Admin>::from_request_parts(&mut parts, &state)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::InsufficientPermissions { ref required } if required == "ADMIN"));

        let admin = seed_role(&store, "admin").await;
        state
            .ledger()
            .assign(
                crate::auth::ledger::AssignRole::builder()
                    .user_id(alice.id)
                    .role_id(admin.id)
                    .assigned_by("root")
                    .build(),
            )
            .await
            .unwrap();

        let gated = RequiresRole::<role::Admin>::from_request_parts(&mut parts, &state).await.unwrap();
        assert_eq!(gated.into_inner().id, alice.id);
    }

    #[test_log::test(tokio::test)]
    async fn test_deleted_principal_is_unauthenticated() {
        use crate::db::handlers::UserStore;

        let (state, store) = create_test_state();
        let alice = seed_user(&store, "alice", "Secret123", UserStatus::Active).await;
        let token = state.tokens.issue(alice.id, "alice").unwrap().token;
        store.delete_user(alice.id).await.unwrap();

        let mut parts = parts_with(Some(&format!("Bearer {token}")));
        let err = CurrentUser::from_request_parts(&mut parts, &state).await.unwrap_err();
        assert!(matches!(err, Error::Unauthenticated { .. }));
    }

    #[test_log::test(tokio::test)]
    async fn test_bearer_scheme_is_case_insensitive() {
        let (state, store) = create_test_state();
        let alice = seed_user(&store, "alice", "Secret123", UserStatus::Active).await;
        let token = state.tokens.issue(alice.id, "alice").unwrap().token;

        for scheme in ["Bearer", "bearer", "BEARER"] {
            let mut parts = parts_with(Some(&format!("{scheme} {token}")));
            let user = CurrentUser::from_request_parts(&mut parts, &state).await.unwrap();
            assert_eq!(user.id, alice.id, "scheme {scheme}");
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_non_active_principal_is_unauthenticated() {
        use crate::db::handlers::UserStore;
        use crate::db::models::users::UserUpdateDBRequest;

        let (state, store) = create_test_state();
        let alice = seed_user(&store, "alice", "Secret123", UserStatus::Active).await;
        let admin = seed_role(&store, "ADMIN").await;
        state
            .ledger()
            .assign(
                crate::auth::ledger::AssignRole::builder()
                    .user_id(alice.id)
                    .role_id(admin.id)
                    .assigned_by("root")
                    .build(),
            )
            .await
            .unwrap();
        let token = state.tokens.issue(alice.id, "alice").unwrap().token;

        for status in [UserStatus::Inactive, UserStatus::Suspended, UserStatus::Deleted] {
            store
                .update_user(
                    alice.id,
                    &UserUpdateDBRequest {
                        status: Some(status),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();

            let mut parts = parts_with(Some(&format!("Bearer {token}")));
            let err = RequiresRole::<role::Admin>::from_request_parts(&mut parts, &state)
                .await
                .err()
                .unwrap();
            assert!(matches!(err, Error::Unauthenticated { .. }), "status {status:?}");
        }
    }
}
