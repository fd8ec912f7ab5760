use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::info;

use crate::{
    AppState,
    api::models::roles::{RoleCreate, RoleResponse, RoleUpdate},
    auth::current_user::{RequiresRole, role},
    db::{
        errors::DbError,
        models::roles::{RoleCreateDBRequest, RoleUpdateDBRequest},
    },
    errors::Error,
    types::{RoleId, normalize_role_name},
};

fn validate_name(name: &str) -> Result<String, Error> {
    let normalized = normalize_role_name(name);
    if normalized.is_empty() {
        return Err(Error::BadRequest {
            message: "Role name must not be blank".to_string(),
        });
    }
    Ok(normalized)
}

/// Create a role. Names are stored upper-cased.
#[tracing::instrument(skip_all)]
pub async fn create_role(
    State(state): State<AppState>,
    _: RequiresRole<role::Admin>,
    Json(request): Json<RoleCreate>,
) -> Result<(StatusCode, Json<RoleResponse>), Error> {
    let created = state
        .roles
        .create_role(&RoleCreateDBRequest {
            name: validate_name(&request.name)?,
            description: request.description,
            is_active: request.is_active,
        })
        .await?;

    info!(role_id = created.id, name = %created.name, "Role created");
    Ok((StatusCode::CREATED, Json(created.into())))
}

#[tracing::instrument(skip_all)]
pub async fn list_roles(State(state): State<AppState>, _: RequiresRole<role::Admin>) -> Result<Json<Vec<RoleResponse>>, Error> {
    let roles = state.roles.list_roles().await?;
    Ok(Json(roles.into_iter().map(RoleResponse::from).collect()))
}

#[tracing::instrument(skip_all)]
pub async fn get_role(
    State(state): State<AppState>,
    Path(role_id): Path<RoleId>,
    _: RequiresRole<role::Admin>,
) -> Result<Json<RoleResponse>, Error> {
    let role = state
        .roles
        .get_role(role_id)
        .await?
        .ok_or_else(|| Error::not_found("Role", role_id))?;
    Ok(Json(role.into()))
}

/// Updating `isActive` changes the definition only; assignments keep granting the role.
#[tracing::instrument(skip_all)]
pub async fn update_role(
    State(state): State<AppState>,
    Path(role_id): Path<RoleId>,
    _: RequiresRole<role::Admin>,
    Json(request): Json<RoleUpdate>,
) -> Result<Json<RoleResponse>, Error> {
    let name = request.name.as_deref().map(validate_name).transpose()?;

    let updated = state
        .roles
        .update_role(
            role_id,
            &RoleUpdateDBRequest {
                name,
                description: request.description,
                is_active: request.is_active,
            },
        )
        .await
        .map_err(|e| match e {
            DbError::NotFound => Error::not_found("Role", role_id),
            e => Error::Database(e),
        })?;

    Ok(Json(updated.into()))
}

/// Fails with 409 while any assignment references the role.
#[tracing::instrument(skip_all)]
pub async fn delete_role(
    State(state): State<AppState>,
    Path(role_id): Path<RoleId>,
    _: RequiresRole<role::Admin>,
) -> Result<StatusCode, Error> {
    if !state.roles.delete_role(role_id).await? {
        return Err(Error::not_found("Role", role_id));
    }

    info!(role_id, "Role deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use crate::api::models::roles::RoleResponse;
    use crate::test_utils::{create_test_app, login_token, seed_admin};
    use axum::http::StatusCode;
    use serde_json::json;

    #[test_log::test(tokio::test)]
    async fn test_role_crud() {
        let (server, store) = create_test_app().await;
        seed_admin(&store, "root", "RootPass123").await;
        let token = login_token(&server, "root", "RootPass123").await;

        let response = server
            .post("/api/roles")
            .authorization_bearer(&token)
            .json(&json!({"name": "auditor", "description": "Read-only access"}))
            .await;
        response.assert_status(StatusCode::CREATED);
        let created: RoleResponse = response.json();
        assert_eq!(created.name, "AUDITOR");
        assert!(created.is_active);

        server
            .post("/api/roles")
            .authorization_bearer(&token)
            .json(&json!({"name": "Auditor"}))
            .await
            .assert_status(StatusCode::CONFLICT);

        server
            .post("/api/roles")
            .authorization_bearer(&token)
            .json(&json!({"name": "   "}))
            .await
            .assert_status_bad_request();

        let response = server
            .put(&format!("/api/roles/{}", created.id))
            .authorization_bearer(&token)
            .json(&json!({"isActive": false}))
            .await;
        response.assert_status_ok();
        assert!(!response.json::<RoleResponse>().is_active);

        let roles: Vec<RoleResponse> = server.get("/api/roles").authorization_bearer(&token).await.json();
        assert_eq!(roles.len(), 2);

        server
            .delete(&format!("/api/roles/{}", created.id))
            .authorization_bearer(&token)
            .await
            .assert_status(StatusCode::NO_CONTENT);
        server
            .get(&format!("/api/roles/{}", created.id))
            .authorization_bearer(&token)
            .await
            .assert_status_not_found();
    }

    #[test_log::test(tokio::test)]
    async fn test_delete_assigned_role_conflicts() {
        let (server, store) = create_test_app().await;
        let (_, admin_role) = seed_admin(&store, "root", "RootPass123").await;
        let token = login_token(&server, "root", "RootPass123").await;

        // ADMIN is held by root
        server
            .delete(&format!("/api/roles/{}", admin_role.id))
            .authorization_bearer(&token)
            .await
            .assert_status(StatusCode::CONFLICT);
    }
}
