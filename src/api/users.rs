//! User API endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};

use super::{error, require_text, success, written, ApiResult};
use crate::errors::AppError;
use crate::models::{
    is_valid_email, ActivationRequest, CreateUserRequest, Page, PageQuery, Role,
    UpdateUserRequest, User, UserFilter,
};
use crate::tenant::Caller;
use crate::AppState;

/// GET /api/users - List users (admin, paginated).
pub async fn list_users(
    State(state): State<AppState>,
    caller: Caller,
    Query(filter): Query<UserFilter>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Page<User>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    if let Err(e) = caller.require_admin() {
        return error(e, revision_id);
    }

    match state.repo.list_users(&caller.company.id, &filter, page).await {
        Ok((users, total)) => success(Page::new(users, page, total), revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// GET /api/users/me - The acting user.
pub async fn get_me(State(state): State<AppState>, caller: Caller) -> ApiResult<User> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    success(caller.user, revision_id)
}

/// GET /api/users/{id} - Get a user (admin or self).
pub async fn get_user(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<User> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    if caller.user.id != id {
        if let Err(e) = caller.require_admin() {
            return error(e, revision_id);
        }
    }

    match state.repo.get_user(&caller.company.id, &id).await {
        Ok(Some(user)) => success(user, revision_id),
        Ok(None) => error(
            AppError::NotFound(format!("User {} not found", id)),
            revision_id,
        ),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/users - Register a user (admin).
pub async fn create_user(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<CreateUserRequest>,
) -> ApiResult<User> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let result: Result<User, AppError> = async {
        caller.require_admin()?;
        require_text(&request.name, "Name")?;
        if !is_valid_email(&request.email) {
            return Err(AppError::Validation(format!(
                "Invalid email {:?}",
                request.email
            )));
        }
        check_store_ids(&state, &caller, &request.store_ids).await?;
        state.repo.create_user(&caller.company.id, &request).await
    }
    .await;

    written(&state, result, revision_id).await
}

/// PUT /api/users/{id} - Modify a user.
///
/// Admins may change anything except their own role and activation; other
/// users may only change their own name and consent flags.
pub async fn update_user(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(request): Json<UpdateUserRequest>,
) -> ApiResult<User> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let result: Result<User, AppError> = async {
        let is_self = caller.user.id == id;
        if caller.user.is_admin() {
            if is_self
                && (request.role.is_some_and(|r| r != Role::Admin) || request.active == Some(false))
            {
                return Err(AppError::Validation(
                    "Admins cannot demote or deactivate themselves".to_string(),
                ));
            }
        } else if !is_self || !request.is_self_service() {
            return Err(AppError::Forbidden(
                "Only admins can change roles, stores, email or activation".to_string(),
            ));
        }

        if let Some(name) = &request.name {
            require_text(name, "Name")?;
        }
        if let Some(email) = &request.email {
            if !is_valid_email(email) {
                return Err(AppError::Validation(format!("Invalid email {:?}", email)));
            }
        }
        if let Some(store_ids) = &request.store_ids {
            check_store_ids(&state, &caller, store_ids).await?;
        }

        state
            .repo
            .update_user(&caller.company.id, &id, &request)
            .await
    }
    .await;

    written(&state, result, revision_id).await
}

/// POST /api/users/{id}/activation - Activate or deactivate a user (admin).
pub async fn set_user_activation(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(request): Json<ActivationRequest>,
) -> ApiResult<User> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let result: Result<User, AppError> = async {
        caller.require_admin()?;
        if caller.user.id == id && !request.active {
            return Err(AppError::Validation(
                "Admins cannot deactivate themselves".to_string(),
            ));
        }
        let update = UpdateUserRequest {
            active: Some(request.active),
            ..UpdateUserRequest::default()
        };
        let user = state
            .repo
            .update_user(&caller.company.id, &id, &update)
            .await?;
        tracing::info!(user_id = %user.id, active = user.active, "User activation changed");
        Ok(user)
    }
    .await;

    written(&state, result, revision_id).await
}

/// Refuse store ids that do not belong to the caller's company.
async fn check_store_ids(
    state: &AppState,
    caller: &Caller,
    store_ids: &[String],
) -> Result<(), AppError> {
    if store_ids.is_empty() {
        return Ok(());
    }
    let stores = state.repo.list_stores(&caller.company.id).await?;
    match store_ids
        .iter()
        .find(|id| !stores.iter().any(|s| &s.id == *id))
    {
        Some(unknown) => Err(AppError::Validation(format!("Unknown store {}", unknown))),
        None => Ok(()),
    }
}
