use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{Duration, Utc};

use crate::{
    AppState,
    api::models::user_roles::{
        AffectedResponse, AssignmentFilter, AssignmentListQuery, AssignmentStatsResponse, BatchAssignQuery, BatchRemoveResponse,
        EffectiveRolesResponse, ExpiringSoonQuery, ExpiryUpdate, HasRoleResponse, RoleUserCountResponse, TransferRequest, TransferResponse,
        UserRoleCreate, UserRoleCountResponse, UserRoleResponse, UserRoleUpdate,
    },
    auth::{
        self,
        current_user::{RequiresRole, role},
        ledger::AssignRole,
    },
    db::models::user_roles::UserRoleDBResponse,
    errors::Error,
    types::{RoleId, UserId, UserRoleId, normalize_role_name},
};

fn to_responses(rows: Vec<UserRoleDBResponse>) -> Json<Vec<UserRoleResponse>> {
    Json(rows.into_iter().map(UserRoleResponse::from).collect())
}

/// Grant a role. The grantor defaults to the calling administrator.
#[tracing::instrument(skip_all)]
pub async fn assign_role(
    State(state): State<AppState>,
    RequiresRole { user: current_user, .. }: RequiresRole<role::Admin>,
    Json(request): Json<UserRoleCreate>,
) -> Result<(StatusCode, Json<UserRoleResponse>), Error> {
    let assignment = AssignRole::builder()
        .user_id(request.user_id)
        .role_id(request.role_id)
        .assigned_by(request.assigned_by.unwrap_or(current_user.username))
        .is_active(request.is_active)
        .maybe_expires_at(request.expires_at)
        .maybe_notes(request.notes)
        .build();

    let created = state.ledger().assign(assignment).await?;
    Ok((StatusCode::CREATED, Json(created.into())))
}

#[tracing::instrument(skip_all)]
pub async fn get_assignment(
    State(state): State<AppState>,
    Path(id): Path<UserRoleId>,
    _: RequiresRole<role::Admin>,
) -> Result<Json<UserRoleResponse>, Error> {
    Ok(Json(state.ledger().get(id).await?.into()))
}

#[tracing::instrument(skip_all)]
pub async fn update_assignment(
    State(state): State<AppState>,
    Path(id): Path<UserRoleId>,
    _: RequiresRole<role::Admin>,
    Json(request): Json<UserRoleUpdate>,
) -> Result<Json<UserRoleResponse>, Error> {
    Ok(Json(state.ledger().update(id, request.into()).await?.into()))
}

#[tracing::instrument(skip_all)]
pub async fn delete_assignment(
    State(state): State<AppState>,
    Path(id): Path<UserRoleId>,
    _: RequiresRole<role::Admin>,
) -> Result<StatusCode, Error> {
    state.ledger().remove(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[tracing::instrument(skip_all)]
pub async fn remove_user_role(
    State(state): State<AppState>,
    Path((user_id, role_id)): Path<(UserId, RoleId)>,
    _: RequiresRole<role::Admin>,
) -> Result<StatusCode, Error> {
    state.ledger().remove_pair(user_id, role_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Sets the active flag only. A lapsed expiry still has to be cleared or extended.
#[tracing::instrument(skip_all)]
pub async fn reactivate_assignment(
    State(state): State<AppState>,
    Path(id): Path<UserRoleId>,
    _: RequiresRole<role::Admin>,
) -> Result<Json<UserRoleResponse>, Error> {
    Ok(Json(state.ledger().reactivate(id).await?.into()))
}

#[tracing::instrument(skip_all)]
pub async fn deactivate_assignment(
    State(state): State<AppState>,
    Path(id): Path<UserRoleId>,
    _: RequiresRole<role::Admin>,
) -> Result<Json<UserRoleResponse>, Error> {
    Ok(Json(state.ledger().deactivate(id).await?.into()))
}

#[tracing::instrument(skip_all)]
pub async fn set_expiry(
    State(state): State<AppState>,
    Path(id): Path<UserRoleId>,
    _: RequiresRole<role::Admin>,
    Json(request): Json<ExpiryUpdate>,
) -> Result<Json<UserRoleResponse>, Error> {
    Ok(Json(state.ledger().set_expiry(id, request.expires_at).await?.into()))
}

#[tracing::instrument(skip_all)]
pub async fn clear_expiry(
    State(state): State<AppState>,
    Path(id): Path<UserRoleId>,
    _: RequiresRole<role::Admin>,
) -> Result<Json<UserRoleResponse>, Error> {
    Ok(Json(state.ledger().clear_expiry(id).await?.into()))
}

/// Assignments of a principal, optionally narrowed to effective or inactive ones
#[tracing::instrument(skip_all)]
pub async fn list_user_assignments(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Query(query): Query<AssignmentListQuery>,
    _: RequiresRole<role::Admin>,
) -> Result<Json<Vec<UserRoleResponse>>, Error> {
    let ledger = state.ledger();
    let now = Utc::now();
    let rows = match query.filter {
        AssignmentFilter::All => ledger.find_by_principal(user_id).await?,
        AssignmentFilter::Effective => ledger.find_effective_by_principal(user_id, now).await?,
        AssignmentFilter::Inactive => ledger.find_inactive_by_principal(user_id, now).await?,
    };
    Ok(to_responses(rows))
}

#[tracing::instrument(skip_all)]
pub async fn list_role_assignments(
    State(state): State<AppState>,
    Path(role_id): Path<RoleId>,
    Query(query): Query<AssignmentListQuery>,
    _: RequiresRole<role::Admin>,
) -> Result<Json<Vec<UserRoleResponse>>, Error> {
    let ledger = state.ledger();
    let now = Utc::now();
    let rows = match query.filter {
        AssignmentFilter::All => ledger.find_by_role(role_id).await?,
        AssignmentFilter::Effective => ledger.find_effective_by_role(role_id, now).await?,
        AssignmentFilter::Inactive => ledger
            .find_by_role(role_id)
            .await?
            .into_iter()
            .filter(|a| !a.is_effective(now))
            .collect(),
    };
    Ok(to_responses(rows))
}

#[tracing::instrument(skip_all)]
pub async fn list_expired(State(state): State<AppState>, _: RequiresRole<role::Admin>) -> Result<Json<Vec<UserRoleResponse>>, Error> {
    Ok(to_responses(state.ledger().find_expired(Utc::now()).await?))
}

/// Effective role names of a principal, as the request gate sees them
#[tracing::instrument(skip_all)]
pub async fn get_effective_roles(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    _: RequiresRole<role::Admin>,
) -> Result<Json<EffectiveRolesResponse>, Error> {
    if state.users.get_user(user_id).await?.is_none() {
        return Err(Error::not_found("User", user_id));
    }

    let roles = state.resolver().effective_roles(user_id).await?;
    let authorities = roles.iter().map(|r| auth::authority(r)).collect();
    Ok(Json(EffectiveRolesResponse {
        user_id,
        roles,
        authorities,
    }))
}

#[tracing::instrument(skip_all)]
pub async fn check_user_role(
    State(state): State<AppState>,
    Path((user_id, role_name)): Path<(UserId, String)>,
    _: RequiresRole<role::Admin>,
) -> Result<Json<HasRoleResponse>, Error> {
    if state.users.get_user(user_id).await?.is_none() {
        return Err(Error::not_found("User", user_id));
    }

    let has_role = state.resolver().has_role(user_id, &role_name).await?;
    Ok(Json(HasRoleResponse {
        user_id,
        role: normalize_role_name(&role_name),
        has_role,
    }))
}

#[tracing::instrument(skip_all)]
pub async fn deactivate_expired(State(state): State<AppState>, _: RequiresRole<role::Admin>) -> Result<Json<AffectedResponse>, Error> {
    let affected = state.ledger().deactivate_expired(Utc::now()).await?;
    Ok(Json(AffectedResponse { affected }))
}

#[tracing::instrument(skip_all)]
pub async fn deactivate_all_for_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    _: RequiresRole<role::Admin>,
) -> Result<Json<AffectedResponse>, Error> {
    let affected = state.ledger().deactivate_all_for_user(user_id).await?;
    Ok(Json(AffectedResponse { affected }))
}

#[tracing::instrument(skip_all)]
pub async fn deactivate_all_for_role(
    State(state): State<AppState>,
    Path(role_id): Path<RoleId>,
    _: RequiresRole<role::Admin>,
) -> Result<Json<AffectedResponse>, Error> {
    let affected = state.ledger().deactivate_all_for_role(role_id).await?;
    Ok(Json(AffectedResponse { affected }))
}

/// Move every effective role of one principal to another
#[tracing::instrument(skip_all)]
pub async fn transfer_roles(
    State(state): State<AppState>,
    RequiresRole { user: current_user, .. }: RequiresRole<role::Admin>,
    Json(request): Json<TransferRequest>,
) -> Result<Json<TransferResponse>, Error> {
    let outcome = state
        .ledger()
        .transfer(request.from_user_id, request.to_user_id, &current_user.username)
        .await?;
    Ok(Json(outcome.into()))
}

/// Grant several roles at once, skipping ones the principal already has a row for
#[tracing::instrument(skip_all)]
pub async fn batch_assign(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Query(query): Query<BatchAssignQuery>,
    RequiresRole { user: current_user, .. }: RequiresRole<role::Admin>,
    Json(role_ids): Json<Vec<RoleId>>,
) -> Result<(StatusCode, Json<Vec<UserRoleResponse>>), Error> {
    let grantor = query.assigned_by.unwrap_or(current_user.username);
    let created = state.ledger().assign_many(user_id, &role_ids, &grantor).await?;
    Ok((StatusCode::CREATED, to_responses(created)))
}

#[tracing::instrument(skip_all)]
pub async fn batch_remove(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    _: RequiresRole<role::Admin>,
    Json(role_ids): Json<Vec<RoleId>>,
) -> Result<Json<BatchRemoveResponse>, Error> {
    let removed = state.ledger().remove_many(user_id, &role_ids).await?;
    Ok(Json(BatchRemoveResponse {
        user_id,
        requested: role_ids.len(),
        removed,
    }))
}

/// Active assignments lapsing within the next `daysAhead` days
#[tracing::instrument(skip_all)]
pub async fn list_expiring_soon(
    State(state): State<AppState>,
    Query(query): Query<ExpiringSoonQuery>,
    _: RequiresRole<role::Admin>,
) -> Result<Json<Vec<UserRoleResponse>>, Error> {
    let within = Duration::try_days(query.days_ahead).ok_or_else(|| Error::BadRequest {
        message: "daysAhead is out of range".to_string(),
    })?;
    Ok(to_responses(state.ledger().find_expiring_soon(Utc::now(), within).await?))
}

#[tracing::instrument(skip_all)]
pub async fn list_by_grantor(
    State(state): State<AppState>,
    Path(assigned_by): Path<String>,
    _: RequiresRole<role::Admin>,
) -> Result<Json<Vec<UserRoleResponse>>, Error> {
    Ok(to_responses(state.ledger().find_by_grantor(&assigned_by).await?))
}

#[tracing::instrument(skip_all)]
pub async fn count_user_roles(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    _: RequiresRole<role::Admin>,
) -> Result<Json<UserRoleCountResponse>, Error> {
    let role_count = state.ledger().count_effective_by_principal(user_id, Utc::now()).await?;
    Ok(Json(UserRoleCountResponse { user_id, role_count }))
}

#[tracing::instrument(skip_all)]
pub async fn count_role_users(
    State(state): State<AppState>,
    Path(role_id): Path<RoleId>,
    _: RequiresRole<role::Admin>,
) -> Result<Json<RoleUserCountResponse>, Error> {
    let user_count = state.ledger().count_effective_by_role(role_id, Utc::now()).await?;
    Ok(Json(RoleUserCountResponse { role_id, user_count }))
}

#[tracing::instrument(skip_all)]
pub async fn assignment_stats(State(state): State<AppState>, _: RequiresRole<role::Admin>) -> Result<Json<AssignmentStatsResponse>, Error> {
    Ok(Json(state.ledger().stats(Utc::now()).await?.into()))
}

#[cfg(test)]
mod tests {
    use crate::api::models::user_roles::{
        AffectedResponse, AssignmentStatsResponse, BatchRemoveResponse, EffectiveRolesResponse, HasRoleResponse, RoleUserCountResponse,
        TransferResponse, UserRoleCountResponse, UserRoleResponse,
    };
    use crate::db::models::users::UserStatus;
    use crate::test_utils::{create_test_app, login_token, seed_admin, seed_role, seed_user};
    use axum::http::StatusCode;
    use chrono::{Duration, Utc};
    use serde_json::json;

    #[test_log::test(tokio::test)]
    async fn test_role_grant_applies_to_existing_token() {
        let (server, store) = create_test_app().await;
        let (_, admin_role) = seed_admin(&store, "root", "RootPass123").await;
        let alice = seed_user(&store, "alice", "Secret123", UserStatus::Active).await;
        let root_token = login_token(&server, "root", "RootPass123").await;
        let alice_token = login_token(&server, "alice", "Secret123").await;

        server
            .get("/api/roles")
            .authorization_bearer(&alice_token)
            .await
            .assert_status_forbidden();

        let response = server
            .post("/api/user-roles")
            .authorization_bearer(&root_token)
            .json(&json!({"userId": alice.id, "roleId": admin_role.id, "assignedBy": "root"}))
            .await;
        response.assert_status(StatusCode::CREATED);
        let assignment: UserRoleResponse = response.json();
        assert!(assignment.effective);
        assert_eq!(assignment.assigned_by, "root");

        // Same token, no re-login
        server
            .get("/api/roles")
            .authorization_bearer(&alice_token)
            .await
            .assert_status_ok();

        server
            .post(&format!("/api/user-roles/{}/deactivate", assignment.id))
            .authorization_bearer(&root_token)
            .await
            .assert_status_ok();
        server
            .get("/api/roles")
            .authorization_bearer(&alice_token)
            .await
            .assert_status_forbidden();
    }

    #[test_log::test(tokio::test)]
    async fn test_duplicate_assignment_conflicts() {
        let (server, store) = create_test_app().await;
        seed_admin(&store, "root", "RootPass123").await;
        let alice = seed_user(&store, "alice", "Secret123", UserStatus::Active).await;
        let auditor = seed_role(&store, "AUDITOR").await;
        let token = login_token(&server, "root", "RootPass123").await;
        let body = json!({"userId": alice.id, "roleId": auditor.id});

        let response = server.post("/api/user-roles").authorization_bearer(&token).json(&body).await;
        response.assert_status(StatusCode::CREATED);
        // Grantor defaults to the caller
        assert_eq!(response.json::<UserRoleResponse>().assigned_by, "root");

        server
            .post("/api/user-roles")
            .authorization_bearer(&token)
            .json(&body)
            .await
            .assert_status(StatusCode::CONFLICT);

        server
            .post("/api/user-roles")
            .authorization_bearer(&token)
            .json(&json!({"userId": 999, "roleId": auditor.id}))
            .await
            .assert_status_not_found();
    }

    #[test_log::test(tokio::test)]
    async fn test_expiry_lifecycle() {
        let (server, store) = create_test_app().await;
        seed_admin(&store, "root", "RootPass123").await;
        let alice = seed_user(&store, "alice", "Secret123", UserStatus::Active).await;
        let temp = seed_role(&store, "TEMP").await;
        let token = login_token(&server, "root", "RootPass123").await;

        let response = server
            .post("/api/user-roles")
            .authorization_bearer(&token)
            .json(&json!({
                "userId": alice.id,
                "roleId": temp.id,
                "expiresAt": Utc::now() - Duration::minutes(5),
            }))
            .await;
        let assignment: UserRoleResponse = response.json();
        assert!(assignment.is_active);
        assert!(!assignment.effective);

        let expired: Vec<UserRoleResponse> = server.get("/api/user-roles/expired").authorization_bearer(&token).await.json();
        assert_eq!(expired.len(), 1);

        let first: AffectedResponse = server
            .post("/api/user-roles/deactivate-expired")
            .authorization_bearer(&token)
            .await
            .json();
        let second: AffectedResponse = server
            .post("/api/user-roles/deactivate-expired")
            .authorization_bearer(&token)
            .await
            .json();
        assert_eq!(first.affected, 1);
        assert_eq!(second.affected, 0);

        let reactivated: UserRoleResponse = server
            .post(&format!("/api/user-roles/{}/reactivate", assignment.id))
            .authorization_bearer(&token)
            .await
            .json();
        assert!(reactivated.is_active);
        assert!(!reactivated.effective);

        let extended: UserRoleResponse = server
            .put(&format!("/api/user-roles/{}/expiry", assignment.id))
            .authorization_bearer(&token)
            .json(&json!({"expiresAt": Utc::now() + Duration::days(1)}))
            .await
            .json();
        assert!(extended.effective);

        let cleared: UserRoleResponse = server
            .delete(&format!("/api/user-roles/{}/expiry", assignment.id))
            .authorization_bearer(&token)
            .await
            .json();
        assert!(cleared.expires_at.is_none());

        let check: HasRoleResponse = server
            .get(&format!("/api/user-roles/users/{}/has-role/temp", alice.id))
            .authorization_bearer(&token)
            .await
            .json();
        assert!(check.has_role);
        assert_eq!(check.role, "TEMP");
    }

    #[test_log::test(tokio::test)]
    async fn test_listing_filters() {
        let (server, store) = create_test_app().await;
        seed_admin(&store, "root", "RootPass123").await;
        let alice = seed_user(&store, "alice", "Secret123", UserStatus::Active).await;
        let auditor = seed_role(&store, "AUDITOR").await;
        let operator = seed_role(&store, "OPERATOR").await;
        let token = login_token(&server, "root", "RootPass123").await;

        server
            .post("/api/user-roles")
            .authorization_bearer(&token)
            .json(&json!({"userId": alice.id, "roleId": auditor.id}))
            .await
            .assert_status(StatusCode::CREATED);
        server
            .post("/api/user-roles")
            .authorization_bearer(&token)
            .json(&json!({"userId": alice.id, "roleId": operator.id, "isActive": false}))
            .await
            .assert_status(StatusCode::CREATED);

        let all: Vec<UserRoleResponse> = server
            .get(&format!("/api/user-roles/users/{}", alice.id))
            .authorization_bearer(&token)
            .await
            .json();
        let effective: Vec<UserRoleResponse> = server
            .get(&format!("/api/user-roles/users/{}?filter=effective", alice.id))
            .authorization_bearer(&token)
            .await
            .json();
        let inactive: Vec<UserRoleResponse> = server
            .get(&format!("/api/user-roles/users/{}?filter=inactive", alice.id))
            .authorization_bearer(&token)
            .await
            .json();
        assert_eq!(all.len(), 2);
        assert_eq!(effective.len(), 1);
        assert_eq!(effective[0].role_id, auditor.id);
        assert_eq!(inactive.len(), 1);
        assert_eq!(inactive[0].role_id, operator.id);

        let by_role: Vec<UserRoleResponse> = server
            .get(&format!("/api/user-roles/roles/{}?filter=effective", operator.id))
            .authorization_bearer(&token)
            .await
            .json();
        assert!(by_role.is_empty());

        let roles: EffectiveRolesResponse = server
            .get(&format!("/api/user-roles/users/{}/roles", alice.id))
            .authorization_bearer(&token)
            .await
            .json();
        assert_eq!(roles.authorities, vec!["ROLE_AUDITOR".to_string()]);

        server
            .get("/api/user-roles/users/999")
            .authorization_bearer(&token)
            .await
            .assert_status_not_found();
    }

    #[test_log::test(tokio::test)]
    async fn test_transfer_and_bulk_deactivation() {
        let (server, store) = create_test_app().await;
        seed_admin(&store, "root", "RootPass123").await;
        let alice = seed_user(&store, "alice", "Secret123", UserStatus::Active).await;
        let bob = seed_user(&store, "bob", "Secret123", UserStatus::Active).await;
        let auditor = seed_role(&store, "AUDITOR").await;
        let operator = seed_role(&store, "OPERATOR").await;
        let token = login_token(&server, "root", "RootPass123").await;

        for (user_id, role_id) in [(alice.id, auditor.id), (alice.id, operator.id), (bob.id, operator.id)] {
            server
                .post("/api/user-roles")
                .authorization_bearer(&token)
                .json(&json!({"userId": user_id, "roleId": role_id}))
                .await
                .assert_status(StatusCode::CREATED);
        }

        let outcome: TransferResponse = server
            .post("/api/user-roles/transfer")
            .authorization_bearer(&token)
            .json(&json!({"fromUserId": alice.id, "toUserId": bob.id}))
            .await
            .json();
        assert_eq!((outcome.deactivated, outcome.created, outcome.skipped), (2, 1, 1));

        server
            .post("/api/user-roles/transfer")
            .authorization_bearer(&token)
            .json(&json!({"fromUserId": bob.id, "toUserId": bob.id}))
            .await
            .assert_status_bad_request();

        let affected: AffectedResponse = server
            .post(&format!("/api/user-roles/roles/{}/deactivate-all", operator.id))
            .authorization_bearer(&token)
            .await
            .json();
        assert_eq!(affected.affected, 1);

        let affected: AffectedResponse = server
            .post(&format!("/api/user-roles/users/{}/deactivate-all", bob.id))
            .authorization_bearer(&token)
            .await
            .json();
        assert_eq!(affected.affected, 1);

        server
            .delete(&format!("/api/user-roles/users/{}/roles/{}", bob.id, auditor.id))
            .authorization_bearer(&token)
            .await
            .assert_status(StatusCode::NO_CONTENT);
    }

    #[test_log::test(tokio::test)]
    async fn test_batch_assign_remove_and_counts() {
        let (server, store) = create_test_app().await;
        let (_, admin_role) = seed_admin(&store, "root", "RootPass123").await;
        let alice = seed_user(&store, "alice", "Secret123", UserStatus::Active).await;
        let auditor = seed_role(&store, "AUDITOR").await;
        let viewer = seed_role(&store, "VIEWER").await;
        let token = login_token(&server, "root", "RootPass123").await;

        let response = server
            .post(&format!("/api/user-roles/users/{}/batch-assign?assignedBy=carol", alice.id))
            .authorization_bearer(&token)
            .json(&json!([auditor.id, viewer.id, auditor.id]))
            .await;
        response.assert_status(StatusCode::CREATED);
        let created: Vec<UserRoleResponse> = response.json();
        assert_eq!(created.len(), 2);
        assert!(created.iter().all(|a| a.assigned_by == "carol" && a.effective));

        // Existing rows are skipped and the grantor defaults to the caller
        let response = server
            .post(&format!("/api/user-roles/users/{}/batch-assign", alice.id))
            .authorization_bearer(&token)
            .json(&json!([auditor.id, admin_role.id]))
            .await;
        response.assert_status(StatusCode::CREATED);
        let created: Vec<UserRoleResponse> = response.json();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].role_id, admin_role.id);
        assert_eq!(created[0].assigned_by, "root");

        let count: UserRoleCountResponse = server
            .get(&format!("/api/user-roles/users/{}/count", alice.id))
            .authorization_bearer(&token)
            .await
            .json();
        assert_eq!(count.role_count, 3);
        let count: RoleUserCountResponse = server
            .get(&format!("/api/user-roles/roles/{}/count", admin_role.id))
            .authorization_bearer(&token)
            .await
            .json();
        assert_eq!(count.user_count, 2);

        let by_carol: Vec<UserRoleResponse> = server
            .get("/api/user-roles/assigned-by/carol")
            .authorization_bearer(&token)
            .await
            .json();
        assert_eq!(by_carol.len(), 2);

        let stats: AssignmentStatsResponse = server.get("/api/user-roles/stats").authorization_bearer(&token).await.json();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.active, 4);
        assert_eq!(stats.inactive, 0);
        assert_eq!(stats.expired, 0);
        assert_eq!(stats.effective, 4);

        let removed: BatchRemoveResponse = server
            .post(&format!("/api/user-roles/users/{}/batch-remove", alice.id))
            .authorization_bearer(&token)
            .json(&json!([auditor.id, viewer.id]))
            .await
            .json();
        assert_eq!(removed.user_id, alice.id);
        assert_eq!(removed.requested, 2);
        assert_eq!(removed.removed, 2);

        let count: UserRoleCountResponse = server
            .get(&format!("/api/user-roles/users/{}/count", alice.id))
            .authorization_bearer(&token)
            .await
            .json();
        assert_eq!(count.role_count, 1);

        server
            .post(&format!("/api/user-roles/users/{}/batch-assign", alice.id))
            .authorization_bearer(&token)
            .json(&json!([viewer.id, 999]))
            .await
            .assert_status_not_found();
        server
            .post("/api/user-roles/users/999/batch-assign")
            .authorization_bearer(&token)
            .json(&json!([viewer.id]))
            .await
            .assert_status_not_found();
        server
            .get("/api/user-roles/roles/999/count")
            .authorization_bearer(&token)
            .await
            .assert_status_not_found();
    }

    #[test_log::test(tokio::test)]
    async fn test_expiring_soon_window() {
        let (server, store) = create_test_app().await;
        seed_admin(&store, "root", "RootPass123").await;
        let alice = seed_user(&store, "alice", "Secret123", UserStatus::Active).await;
        let soon = seed_role(&store, "SOON").await;
        let later = seed_role(&store, "LATER").await;
        let token = login_token(&server, "root", "RootPass123").await;
        let alice_token = login_token(&server, "alice", "Secret123").await;

        for (role_id, days) in [(soon.id, 2), (later.id, 30)] {
            server
                .post("/api/user-roles")
                .authorization_bearer(&token)
                .json(&json!({
                    "userId": alice.id,
                    "roleId": role_id,
                    "expiresAt": Utc::now() + Duration::days(days),
                }))
                .await
                .assert_status(StatusCode::CREATED);
        }

        let week: Vec<UserRoleResponse> = server
            .get("/api/user-roles/expiring-soon")
            .authorization_bearer(&token)
            .await
            .json();
        assert_eq!(week.len(), 1);
        assert_eq!(week[0].role_id, soon.id);

        let two_months: Vec<UserRoleResponse> = server
            .get("/api/user-roles/expiring-soon?daysAhead=60")
            .authorization_bearer(&token)
            .await
            .json();
        assert_eq!(two_months.iter().map(|a| a.role_id).collect::<Vec<_>>(), vec![soon.id, later.id]);

        server
            .get("/api/user-roles/expiring-soon?daysAhead=-1")
            .authorization_bearer(&token)
            .await
            .assert_status_bad_request();
        server
            .get("/api/user-roles/stats")
            .authorization_bearer(&alice_token)
            .await
            .assert_status_forbidden();
    }
}
